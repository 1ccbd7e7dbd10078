//! Morava-32 CPU registers.
//!
//! The machine has 16 general-purpose 32-bit registers with three fixed
//! aliases (r13 = scratch, r14 = SP, r15 = PC), plus three control-status
//! registers: STATUS (the PSW), HANDLER (interrupt vector base) and CAUSE
//! (last interrupt/trap reason code).

use crate::cpu::alu::Flags;
use serde::{Deserialize, Serialize};

/// Register index of the scratch/temp register.
pub const SCRATCH: usize = 13;
/// Register index of the stack pointer.
pub const SP: usize = 14;
/// Register index of the program counter.
pub const PC: usize = 15;

/// The program status word.
///
/// Bit layout:
/// - bit 0: Z (zero)
/// - bit 1: O (overflow)
/// - bit 2: C (carry)
/// - bit 3: N (negative)
/// - bit 13: Tr (timer-interrupt enable)
/// - bit 14: Tl (reserved secondary timer flag)
/// - bit 15: I (global interrupt mask, 1 = masked)
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Psw(u32);

impl Psw {
    pub const Z: u32 = 1 << 0;
    pub const O: u32 = 1 << 1;
    pub const C: u32 = 1 << 2;
    pub const N: u32 = 1 << 3;
    pub const TR: u32 = 1 << 13;
    pub const TL: u32 = 1 << 14;
    pub const I: u32 = 1 << 15;

    /// Reset value: everything clear except the timer armed.
    pub const fn reset() -> Self {
        Self(Self::TR)
    }

    /// Reconstruct from a raw word (used when popping STATUS off the stack).
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw packed word.
    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn zero(self) -> bool {
        self.0 & Self::Z != 0
    }

    pub const fn overflow(self) -> bool {
        self.0 & Self::O != 0
    }

    pub const fn carry(self) -> bool {
        self.0 & Self::C != 0
    }

    pub const fn negative(self) -> bool {
        self.0 & Self::N != 0
    }

    /// Whether the periodic timer interrupt is armed.
    pub const fn timer_enabled(self) -> bool {
        self.0 & Self::TR != 0
    }

    /// Whether interrupts are globally masked.
    pub const fn masked(self) -> bool {
        self.0 & Self::I != 0
    }

    pub fn set_masked(&mut self, masked: bool) {
        self.set(Self::I, masked);
    }

    pub fn set_timer_enabled(&mut self, enabled: bool) {
        self.set(Self::TR, enabled);
    }

    /// Replace the four condition-code bits with an ALU result.
    pub fn apply(&mut self, flags: Flags) {
        self.set(Self::Z, flags.z);
        self.set(Self::O, flags.o);
        self.set(Self::C, flags.c);
        self.set(Self::N, flags.n);
    }

    fn set(&mut self, bit: u32, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

impl std::fmt::Debug for Psw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Psw({:#06x})", self.0)
    }
}

impl std::fmt::Display for Psw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cc = |set: bool, ch: char| if set { ch } else { '-' };
        write!(
            f,
            "{}{}{}{}{}{}",
            cc(self.zero(), 'Z'),
            cc(self.overflow(), 'O'),
            cc(self.carry(), 'C'),
            cc(self.negative(), 'N'),
            cc(self.timer_enabled(), 'T'),
            cc(self.masked(), 'I'),
        )
    }
}

/// Selector for the three control-status registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Csr {
    Status,
    Handler,
    Cause,
}

impl Csr {
    /// Map a 4-bit instruction field onto a CSR. Indices above 2 have no
    /// register behind them and are rejected at dispatch.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Csr::Status),
            1 => Some(Csr::Handler),
            2 => Some(Csr::Cause),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Csr::Status => 0,
            Csr::Handler => 1,
            Csr::Cause => 2,
        }
    }
}

impl std::fmt::Display for Csr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Csr::Status => "status",
            Csr::Handler => "handler",
            Csr::Cause => "cause",
        };
        write!(f, "{}", name)
    }
}

/// The Morava-32 register file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterFile {
    /// 16 general-purpose registers; r14 = SP, r15 = PC.
    gpr: [u32; 16],
    /// STATUS: the program status word.
    pub psw: Psw,
    /// HANDLER: interrupt vector table base.
    pub handler: u32,
    /// CAUSE: reason code of the last interrupt or trap.
    pub cause: u32,
}

impl RegisterFile {
    /// Create a register file in the reset state.
    pub fn new() -> Self {
        Self {
            gpr: [0; 16],
            psw: Psw::reset(),
            handler: 0,
            cause: 0,
        }
    }

    /// Read a general-purpose register.
    #[inline]
    pub fn get(&self, index: u8) -> u32 {
        self.gpr[index as usize & 0xf]
    }

    /// Write a general-purpose register. Writing r15 redirects control flow;
    /// the CPU step loop is responsible for the auto-advance suppression.
    #[inline]
    pub fn set(&mut self, index: u8, value: u32) {
        self.gpr[index as usize & 0xf] = value;
    }

    #[inline]
    pub fn pc(&self) -> u32 {
        self.gpr[PC]
    }

    #[inline]
    pub fn set_pc(&mut self, value: u32) {
        self.gpr[PC] = value;
    }

    #[inline]
    pub fn sp(&self) -> u32 {
        self.gpr[SP]
    }

    #[inline]
    pub fn set_sp(&mut self, value: u32) {
        self.gpr[SP] = value;
    }

    /// Sequential advance past the current 4-byte instruction word.
    pub fn advance_pc(&mut self) {
        self.gpr[PC] = self.gpr[PC].wrapping_add(4);
    }

    /// Read a control-status register.
    pub fn csr_get(&self, csr: Csr) -> u32 {
        match csr {
            Csr::Status => self.psw.bits(),
            Csr::Handler => self.handler,
            Csr::Cause => self.cause,
        }
    }

    /// Write a control-status register.
    pub fn csr_set(&mut self, csr: Csr, value: u32) {
        match csr {
            Csr::Status => self.psw = Psw::from_bits(value),
            Csr::Handler => self.handler = value,
            Csr::Cause => self.cause = value,
        }
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_state() {
        let regs = RegisterFile::new();
        for i in 0..16 {
            assert_eq!(regs.get(i), 0);
        }
        assert!(regs.psw.timer_enabled());
        assert!(!regs.psw.masked());
        assert_eq!(regs.handler, 0);
        assert_eq!(regs.cause, 0);
    }

    #[test]
    fn test_pc_sp_aliases() {
        let mut regs = RegisterFile::new();
        regs.set(PC as u8, 0x4000_0000);
        regs.set(SP as u8, 0xFFFF_F000);
        assert_eq!(regs.pc(), 0x4000_0000);
        assert_eq!(regs.sp(), 0xFFFF_F000);

        regs.advance_pc();
        assert_eq!(regs.pc(), 0x4000_0004);
    }

    #[test]
    fn test_psw_apply_replaces_condition_codes() {
        let mut psw = Psw::reset();
        psw.apply(Flags { z: true, n: false, c: true, o: false });
        assert!(psw.zero());
        assert!(psw.carry());
        assert!(!psw.negative());
        assert!(!psw.overflow());
        // Tr survives a condition-code update.
        assert!(psw.timer_enabled());

        psw.apply(Flags::default());
        assert!(!psw.zero());
        assert!(!psw.carry());
    }

    #[test]
    fn test_csr_roundtrip() {
        let mut regs = RegisterFile::new();
        regs.csr_set(Csr::Handler, 0x100);
        regs.csr_set(Csr::Cause, 3);
        assert_eq!(regs.csr_get(Csr::Handler), 0x100);
        assert_eq!(regs.csr_get(Csr::Cause), 3);

        regs.csr_set(Csr::Status, Psw::I | Psw::TR);
        assert!(regs.psw.masked());
        assert!(regs.psw.timer_enabled());
    }

    #[test]
    fn test_csr_from_index() {
        assert_eq!(Csr::from_index(0), Some(Csr::Status));
        assert_eq!(Csr::from_index(1), Some(Csr::Handler));
        assert_eq!(Csr::from_index(2), Some(Csr::Cause));
        assert_eq!(Csr::from_index(3), None);
        assert_eq!(Csr::from_index(15), None);
    }
}
