//! Decoding of the machine trap cause.

use crate::consts::MCAUSE_INTERRUPT;

/// Machine exception codes that can carry a handler.
pub mod exception {
    pub const INSTRUCTION_MISALIGNED: usize = 0;
    pub const INSTRUCTION_FAULT: usize = 1;
    pub const ILLEGAL_INSTRUCTION: usize = 2;
    pub const BREAKPOINT: usize = 3;
    pub const LOAD_MISALIGNED: usize = 4;
    pub const LOAD_FAULT: usize = 5;
    pub const STORE_MISALIGNED: usize = 6;
    pub const STORE_FAULT: usize = 7;
    pub const USER_ECALL: usize = 8;
    pub const SUPERVISOR_ECALL: usize = 9;
    pub const MACHINE_ECALL: usize = 11;
}

/// A decoded `mcause` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    Interrupt(usize),
    Exception(usize),
}

impl TrapCause {
    /// The most significant bit flags an interrupt, the remaining bits hold the code.
    pub fn decode(raw: usize) -> Self {
        let code = raw & !MCAUSE_INTERRUPT;
        if raw & MCAUSE_INTERRUPT != 0 {
            Self::Interrupt(code)
        } else {
            Self::Exception(code)
        }
    }

    pub fn encode(self) -> usize {
        match self {
            Self::Interrupt(code) => MCAUSE_INTERRUPT | code,
            Self::Exception(code) => code & !MCAUSE_INTERRUPT,
        }
    }

    pub fn code(self) -> usize {
        match self {
            Self::Interrupt(code) | Self::Exception(code) => code,
        }
    }

    pub fn is_interrupt(self) -> bool {
        matches!(self, Self::Interrupt(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_uses_the_top_bit() {
        let timer = (1usize << (usize::BITS - 1)) | 7;
        assert_eq!(TrapCause::decode(timer), TrapCause::Interrupt(7));
        assert_eq!(
            TrapCause::decode(exception::ILLEGAL_INSTRUCTION),
            TrapCause::Exception(2)
        );
        // A large exception code must not be mistaken for an interrupt.
        assert!(!TrapCause::decode(128).is_interrupt());
    }

    #[test]
    fn encode_matches_hardware_layout() {
        assert_eq!(TrapCause::Interrupt(11).encode(), MCAUSE_INTERRUPT | 11);
        assert_eq!(TrapCause::decode(TrapCause::Interrupt(128).encode()).code(), 128);
        assert_eq!(TrapCause::Exception(3).encode(), 3);
    }
}
