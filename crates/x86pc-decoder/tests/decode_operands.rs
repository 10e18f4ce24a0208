use x86pc_decoder::{
    decode, AddressSize, Cond, DecodeError, DecodeMode, Gpr, InstCategory, MemRef, Op,
    Operand, OperandKind, OperandSize, Reg, RepPrefix, SegReg,
};

fn decode16(bytes: &[u8]) -> x86pc_decoder::DecodedInst {
    decode(bytes, DecodeMode::Bits16, 0).expect("decodes")
}

#[test]
fn mov_reg_imm16() {
    let inst = decode16(&[0xB8, 0x34, 0x12]);
    assert_eq!(inst.op, Op::Mov);
    assert_eq!(inst.category, InstCategory::DataTransfer);
    assert_eq!(inst.len, 3);
    assert_eq!(inst.operand(0), Some(&Operand::reg(Reg::gpr(0, OperandSize::Bits16))));
    assert_eq!(inst.operand(1), Some(&Operand::imm(0x1234, OperandSize::Bits16)));
}

#[test]
fn bp_based_memory_defaults_to_ss() {
    // mov al, [bp+si+4]
    let inst = decode16(&[0x8A, 0x42, 0x04]);
    let Some(OperandKind::Memory(mem)) = inst.operand(1).map(|op| op.kind) else {
        panic!("expected memory operand, got {:?}", inst.operand(1));
    };
    assert_eq!(mem.base, Some(Gpr::Ebp));
    assert_eq!(mem.index, Some(Gpr::Esi));
    assert_eq!(mem.displacement, 4);
    assert_eq!(mem.segment(), SegReg::Ss);
}

#[test]
fn segment_override_reaches_memory_operand() {
    // mov ax, es:[0x10]
    let inst = decode16(&[0x26, 0xA1, 0x10, 0x00]);
    assert_eq!(inst.prefixes.segment, Some(SegReg::Es));
    let expected = MemRef {
        segment_override: Some(SegReg::Es),
        ..MemRef::absolute(0x10)
    };
    assert_eq!(inst.operand(1), Some(&Operand::mem(expected, OperandSize::Bits16)));
    assert_eq!(inst.len, 4);
}

#[test]
fn operand_size_prefix_widens_in_real_mode() {
    // mov eax, 0x12345678
    let inst = decode16(&[0x66, 0xB8, 0x78, 0x56, 0x34, 0x12]);
    assert_eq!(inst.operand_size, OperandSize::Bits32);
    assert_eq!(inst.operand(1), Some(&Operand::imm(0x1234_5678, OperandSize::Bits32)));

    let inst = decode(&[0x66, 0xB8, 0x34, 0x12], DecodeMode::Bits32, 0).unwrap();
    assert_eq!(inst.operand_size, OperandSize::Bits16);
    assert_eq!(inst.address_size, AddressSize::Bits32);
}

#[test]
fn relative_branch_targets_are_absolute() {
    // jne -2 at ip 0x100
    let inst = decode(&[0x75, 0xFE], DecodeMode::Bits16, 0x100).unwrap();
    assert_eq!(inst.op, Op::Jcc(Cond::Ne));
    assert_eq!(inst.operand(0), Some(&Operand::imm(0x100, OperandSize::Bits16)));

    // call +0x10 at ip 0x200
    let inst = decode(&[0xE8, 0x10, 0x00], DecodeMode::Bits16, 0x200).unwrap();
    assert_eq!(inst.op, Op::Call);
    assert_eq!(inst.operand(0), Some(&Operand::imm(0x213, OperandSize::Bits16)));
}

#[test]
fn far_jump_carries_offset_then_selector() {
    // jmp 0xF000:0xE05B
    let inst = decode16(&[0xEA, 0x5B, 0xE0, 0x00, 0xF0]);
    assert_eq!(inst.op, Op::JmpFar);
    assert_eq!(inst.category, InstCategory::ControlTransfer);
    assert_eq!(inst.operand(0), Some(&Operand::imm(0xE05B, OperandSize::Bits16)));
    assert_eq!(inst.operand(1), Some(&Operand::imm(0xF000, OperandSize::Bits16)));

    // jmp far [bx]
    let inst = decode16(&[0xFF, 0x2F]);
    assert_eq!(inst.op, Op::JmpFar);
}

#[test]
fn string_ops_have_width_and_rep() {
    let inst = decode16(&[0xF3, 0xA4]);
    assert_eq!(inst.op, Op::Movs);
    assert_eq!(inst.data_size, OperandSize::Bits8);
    assert_eq!(inst.prefixes.rep, Some(RepPrefix::Rep));
    assert!(inst.operands.is_empty());

    let inst = decode16(&[0xF2, 0x66, 0xAF]);
    assert_eq!(inst.op, Op::Scas);
    assert_eq!(inst.data_size, OperandSize::Bits32);
    assert_eq!(inst.prefixes.rep, Some(RepPrefix::Repne));
}

#[test]
fn in_out_forms() {
    let inst = decode16(&[0xE4, 0x60]);
    assert_eq!(inst.op, Op::In);
    assert_eq!(inst.operand(1), Some(&Operand::imm(0x60, OperandSize::Bits8)));

    let inst = decode16(&[0xEF]);
    assert_eq!(inst.op, Op::Out);
    assert_eq!(inst.operand(0), Some(&Operand::reg(Reg::gpr(2, OperandSize::Bits16))));
    assert_eq!(inst.operand(1), Some(&Operand::reg(Reg::gpr(0, OperandSize::Bits16))));
}

#[test]
fn mov_to_control_and_segment_registers() {
    // mov cr0, eax
    let inst = decode(&[0x0F, 0x22, 0xC0], DecodeMode::Bits16, 0).unwrap();
    assert_eq!(inst.operand(0), Some(&Operand::reg(Reg::control(0))));

    // mov ds, ax
    let inst = decode16(&[0x8E, 0xD8]);
    assert_eq!(inst.operand(0), Some(&Operand::reg(Reg::seg(SegReg::Ds))));
}

#[test]
fn unsupported_and_truncated_streams() {
    // fld dword [bx]
    assert!(matches!(
        decode(&[0xD9, 0x07], DecodeMode::Bits16, 0),
        Err(DecodeError::Unsupported(_))
    ));
    assert_eq!(
        decode(&[0xB8, 0x34], DecodeMode::Bits16, 0),
        Err(DecodeError::UnexpectedEof)
    );
}
