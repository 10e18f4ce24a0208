use thiserror::Error;

/// A fault raised while executing an instruction.
///
/// Faults abort the current cycle. Instruction pointer and registers are left
/// as they were before the faulting instruction started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Exception {
    #[error("#DE divide error")]
    DivideError,
    #[error("#UD invalid opcode")]
    InvalidOpcode,
    #[error("#NP segment not present (selector {selector:#06x})")]
    SegmentNotPresent { selector: u16 },
    #[error("#GP general protection fault (selector {selector:#06x}): {reason}")]
    GeneralProtection { selector: u16, reason: &'static str },
    #[error("HLT executed with interrupts disabled")]
    HaltWithInterruptsDisabled,
}

impl Exception {
    pub(crate) const fn gp(selector: u16, reason: &'static str) -> Self {
        Exception::GeneralProtection { selector, reason }
    }

    /// Architectural vector, for faults the guest can handle itself.
    pub const fn vector(self) -> Option<u8> {
        match self {
            Exception::DivideError => Some(0),
            Exception::InvalidOpcode => Some(6),
            Exception::SegmentNotPresent { .. } => Some(11),
            Exception::GeneralProtection { .. } => Some(13),
            Exception::HaltWithInterruptsDisabled => None,
        }
    }
}
