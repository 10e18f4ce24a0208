//! Instruction decoding for the x86pc execution engine.
//!
//! [`inst`] defines the descriptor the CPU core consumes: an operation, its
//! dispatch category, up to three materializable operands, the legacy prefixes
//! and the encoded length. [`decode`] produces that descriptor from raw bytes
//! using `iced-x86` for opcode/ModRM decoding and a local legacy-prefix scan.
#![forbid(unsafe_code)]

pub mod decoder;
pub mod inst;

pub use decoder::{decode, DecodeError, DecodeMode, MAX_INST_LEN};
pub use inst::{
    AddressSize, Cond, DecodedInst, Gpr, InstCategory, MemRef, Op, Operand, OperandKind,
    OperandSize, Operands, Prefixes, Reg, RegClass, RepPrefix, SegReg,
};
