//! Instruction decoder for the Morava-32.
//!
//! Every instruction is one 32-bit word. Counting bytes as the assembler
//! emits them (the word is stored little-endian in memory):
//!
//! - byte 0: opcode (the full instruction identifier)
//! - byte 1: regA (high nibble) | regB (low nibble)
//! - byte 2: regC (high nibble) | displacement bits 11..8 (low nibble)
//! - byte 3: displacement bits 7..0
//!
//! The displacement is sign-extended from 12 bits. Unpacking the raw fields
//! is total; unknown opcodes are rejected only when the raw word is mapped
//! to an [`Instruction`] at dispatch time.

use crate::cpu::registers::Csr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw decoded view of one instruction word. Recomputed every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionWord {
    pub opcode: u8,
    pub reg_a: u8,
    pub reg_b: u8,
    pub reg_c: u8,
    /// Sign-extended 12-bit displacement, −2048..=2047.
    pub disp: i32,
}

impl InstructionWord {
    /// Unpack a raw word. Total: no value is rejected here.
    pub fn unpack(word: u32) -> Self {
        let disp12 = (word >> 16 & 0xf) << 8 | word >> 24 & 0xff;
        // Sign-extend from 12 bits.
        let disp = (disp12 as i32) << 20 >> 20;
        Self {
            opcode: (word & 0xff) as u8,
            reg_a: (word >> 12 & 0xf) as u8,
            reg_b: (word >> 8 & 0xf) as u8,
            reg_c: (word >> 20 & 0xf) as u8,
            disp,
        }
    }

    /// Pack back into a raw word. Inverse of [`unpack`](Self::unpack) for
    /// in-range fields; the displacement is truncated to 12 bits.
    pub fn pack(&self) -> u32 {
        let disp12 = self.disp as u32 & 0xfff;
        self.opcode as u32
            | (self.reg_b as u32 & 0xf) << 8
            | (self.reg_a as u32 & 0xf) << 12
            | (disp12 >> 8) << 16
            | (self.reg_c as u32 & 0xf) << 20
            | (disp12 & 0xff) << 24
    }
}

/// How a control-transfer or store resolves its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddrMode {
    /// The computed address is the target.
    Direct,
    /// The computed address holds a word that is the target.
    Indirect,
}

/// Opcode byte values.
struct Opcode;

impl Opcode {
    const HALT: u8 = 0x00;
    const INT: u8 = 0x10;
    const CALL: u8 = 0x20;
    const CALL_IND: u8 = 0x21;
    const JMP: u8 = 0x30;
    const BEQ: u8 = 0x31;
    const BNE: u8 = 0x32;
    const BGT: u8 = 0x33;
    const JMP_IND: u8 = 0x38;
    const BEQ_IND: u8 = 0x39;
    const BNE_IND: u8 = 0x3A;
    const BGT_IND: u8 = 0x3B;
    const XCHG: u8 = 0x40;
    const ADD: u8 = 0x50;
    const SUB: u8 = 0x51;
    const MUL: u8 = 0x52;
    const DIV: u8 = 0x53;
    const NOT: u8 = 0x60;
    const AND: u8 = 0x61;
    const OR: u8 = 0x62;
    const XOR: u8 = 0x63;
    const SHL: u8 = 0x70;
    const SHR: u8 = 0x71;
    const ST: u8 = 0x80;
    const PUSH: u8 = 0x81;
    const ST_IND: u8 = 0x82;
    const CSRRD: u8 = 0x90;
    const LD_REG: u8 = 0x91;
    const LD_MEM: u8 = 0x92;
    const POP: u8 = 0x93;
    const CSRWR: u8 = 0x94;
    const CSR_OR: u8 = 0x95;
    const CSR_LD: u8 = 0x96;
    const CSR_POP: u8 = 0x97;
}

/// A dispatch-ready Morava-32 instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Control Transfer ====================
    /// Stop execution.
    Halt,

    /// Software interrupt.
    Int,

    /// Push the return address, then PC := r[base]+disp (or the word there).
    Call { base: u8, disp: i32, mode: AddrMode },

    /// PC := r[base]+disp (or the word there).
    Jmp { base: u8, disp: i32, mode: AddrMode },

    /// Branch when r[lhs] == r[rhs].
    Beq { base: u8, lhs: u8, rhs: u8, disp: i32, mode: AddrMode },

    /// Branch when r[lhs] != r[rhs].
    Bne { base: u8, lhs: u8, rhs: u8, disp: i32, mode: AddrMode },

    /// Branch when r[lhs] > r[rhs], signed.
    Bgt { base: u8, lhs: u8, rhs: u8, disp: i32, mode: AddrMode },

    // ==================== Arithmetic / Logic ====================
    /// Swap r[lhs] and r[rhs]; condition codes untouched.
    Xchg { lhs: u8, rhs: u8 },

    /// r[dst] := r[lhs] + r[rhs]
    Add { dst: u8, lhs: u8, rhs: u8 },
    /// r[dst] := r[lhs] - r[rhs]
    Sub { dst: u8, lhs: u8, rhs: u8 },
    /// r[dst] := r[lhs] * r[rhs]
    Mul { dst: u8, lhs: u8, rhs: u8 },
    /// r[dst] := r[lhs] / r[rhs]; faults on a zero divisor
    Div { dst: u8, lhs: u8, rhs: u8 },

    /// r[dst] := !r[src]
    Not { dst: u8, src: u8 },
    /// r[dst] := r[lhs] & r[rhs]
    And { dst: u8, lhs: u8, rhs: u8 },
    /// r[dst] := r[lhs] | r[rhs]
    Or { dst: u8, lhs: u8, rhs: u8 },
    /// r[dst] := r[lhs] ^ r[rhs]
    Xor { dst: u8, lhs: u8, rhs: u8 },
    /// r[dst] := r[lhs] << r[rhs]
    Shl { dst: u8, lhs: u8, rhs: u8 },
    /// r[dst] := r[lhs] >> r[rhs], arithmetic
    Shr { dst: u8, lhs: u8, rhs: u8 },

    // ==================== Store ====================
    /// mem[r[base]+r[index]+disp] := r[src] (indirect reads the address cell
    /// from memory first).
    St { base: u8, index: u8, src: u8, disp: i32, mode: AddrMode },

    /// r[base] += disp; mem[r[base]] := r[src]. PUSH when base = sp, disp = -4.
    Push { base: u8, src: u8, disp: i32 },

    // ==================== Load ====================
    /// r[dst] := csr
    CsrRd { dst: u8, csr: Csr },

    /// r[dst] := r[src] + disp
    LdReg { dst: u8, src: u8, disp: i32 },

    /// r[dst] := mem[r[base]+r[index]+disp]
    LdMem { dst: u8, base: u8, index: u8, disp: i32 },

    /// r[dst] := mem[r[base]]; r[base] += disp. POP / RET when base = sp,
    /// disp = +4.
    Pop { dst: u8, base: u8, disp: i32 },

    /// csr := r[src]
    CsrWr { csr: Csr, src: u8 },

    /// dst := src | disp, both control-status registers
    CsrOr { dst: Csr, src: Csr, disp: i32 },

    /// csr := mem[r[base]+r[index]+disp]
    CsrLd { csr: Csr, base: u8, index: u8, disp: i32 },

    /// csr := mem[r[base]]; r[base] += disp. Pops STATUS on interrupt return.
    CsrPop { csr: Csr, base: u8, disp: i32 },
}

impl Instruction {
    /// Map the raw fields onto an instruction. This is the dispatch boundary:
    /// unknown opcode bytes and out-of-range CSR indices are rejected here.
    pub fn decode(w: InstructionWord) -> Result<Self, DecodeError> {
        let InstructionWord { opcode, reg_a: a, reg_b: b, reg_c: c, disp } = w;
        let instr = match opcode {
            Opcode::HALT => Instruction::Halt,
            Opcode::INT => Instruction::Int,

            Opcode::CALL => Instruction::Call { base: a, disp, mode: AddrMode::Direct },
            Opcode::CALL_IND => Instruction::Call { base: a, disp, mode: AddrMode::Indirect },

            Opcode::JMP => Instruction::Jmp { base: a, disp, mode: AddrMode::Direct },
            Opcode::JMP_IND => Instruction::Jmp { base: a, disp, mode: AddrMode::Indirect },
            Opcode::BEQ => Instruction::Beq { base: a, lhs: b, rhs: c, disp, mode: AddrMode::Direct },
            Opcode::BEQ_IND => Instruction::Beq { base: a, lhs: b, rhs: c, disp, mode: AddrMode::Indirect },
            Opcode::BNE => Instruction::Bne { base: a, lhs: b, rhs: c, disp, mode: AddrMode::Direct },
            Opcode::BNE_IND => Instruction::Bne { base: a, lhs: b, rhs: c, disp, mode: AddrMode::Indirect },
            Opcode::BGT => Instruction::Bgt { base: a, lhs: b, rhs: c, disp, mode: AddrMode::Direct },
            Opcode::BGT_IND => Instruction::Bgt { base: a, lhs: b, rhs: c, disp, mode: AddrMode::Indirect },

            Opcode::XCHG => Instruction::Xchg { lhs: b, rhs: c },

            Opcode::ADD => Instruction::Add { dst: a, lhs: b, rhs: c },
            Opcode::SUB => Instruction::Sub { dst: a, lhs: b, rhs: c },
            Opcode::MUL => Instruction::Mul { dst: a, lhs: b, rhs: c },
            Opcode::DIV => Instruction::Div { dst: a, lhs: b, rhs: c },
            Opcode::NOT => Instruction::Not { dst: a, src: b },
            Opcode::AND => Instruction::And { dst: a, lhs: b, rhs: c },
            Opcode::OR => Instruction::Or { dst: a, lhs: b, rhs: c },
            Opcode::XOR => Instruction::Xor { dst: a, lhs: b, rhs: c },
            Opcode::SHL => Instruction::Shl { dst: a, lhs: b, rhs: c },
            Opcode::SHR => Instruction::Shr { dst: a, lhs: b, rhs: c },

            Opcode::ST => Instruction::St { base: a, index: b, src: c, disp, mode: AddrMode::Direct },
            Opcode::ST_IND => Instruction::St { base: a, index: b, src: c, disp, mode: AddrMode::Indirect },
            Opcode::PUSH => Instruction::Push { base: a, src: c, disp },

            Opcode::CSRRD => Instruction::CsrRd { dst: a, csr: csr(b)? },
            Opcode::LD_REG => Instruction::LdReg { dst: a, src: b, disp },
            Opcode::LD_MEM => Instruction::LdMem { dst: a, base: b, index: c, disp },
            Opcode::POP => Instruction::Pop { dst: a, base: b, disp },
            Opcode::CSRWR => Instruction::CsrWr { csr: csr(a)?, src: b },
            Opcode::CSR_OR => Instruction::CsrOr { dst: csr(a)?, src: csr(b)?, disp },
            Opcode::CSR_LD => Instruction::CsrLd { csr: csr(a)?, base: b, index: c, disp },
            Opcode::CSR_POP => Instruction::CsrPop { csr: csr(a)?, base: b, disp },

            _ => return Err(DecodeError::UnknownOpcode(opcode)),
        };
        Ok(instr)
    }
}

fn csr(index: u8) -> Result<Csr, DecodeError> {
    Csr::from_index(index).ok_or(DecodeError::InvalidCsr(index))
}

/// Encode an instruction back into a raw word.
pub fn encode(instr: &Instruction) -> u32 {
    use Instruction::*;

    let w = |opcode, a, b, c, disp| InstructionWord {
        opcode,
        reg_a: a,
        reg_b: b,
        reg_c: c,
        disp,
    };

    let word = match *instr {
        Halt => w(Opcode::HALT, 0, 0, 0, 0),
        Int => w(Opcode::INT, 0, 0, 0, 0),

        Call { base, disp, mode } => {
            w(op_for_mode(Opcode::CALL, Opcode::CALL_IND, mode), base, 0, 0, disp)
        }
        Jmp { base, disp, mode } => {
            w(op_for_mode(Opcode::JMP, Opcode::JMP_IND, mode), base, 0, 0, disp)
        }
        Beq { base, lhs, rhs, disp, mode } => {
            w(op_for_mode(Opcode::BEQ, Opcode::BEQ_IND, mode), base, lhs, rhs, disp)
        }
        Bne { base, lhs, rhs, disp, mode } => {
            w(op_for_mode(Opcode::BNE, Opcode::BNE_IND, mode), base, lhs, rhs, disp)
        }
        Bgt { base, lhs, rhs, disp, mode } => {
            w(op_for_mode(Opcode::BGT, Opcode::BGT_IND, mode), base, lhs, rhs, disp)
        }

        Xchg { lhs, rhs } => w(Opcode::XCHG, 0, lhs, rhs, 0),

        Add { dst, lhs, rhs } => w(Opcode::ADD, dst, lhs, rhs, 0),
        Sub { dst, lhs, rhs } => w(Opcode::SUB, dst, lhs, rhs, 0),
        Mul { dst, lhs, rhs } => w(Opcode::MUL, dst, lhs, rhs, 0),
        Div { dst, lhs, rhs } => w(Opcode::DIV, dst, lhs, rhs, 0),
        Not { dst, src } => w(Opcode::NOT, dst, src, 0, 0),
        And { dst, lhs, rhs } => w(Opcode::AND, dst, lhs, rhs, 0),
        Or { dst, lhs, rhs } => w(Opcode::OR, dst, lhs, rhs, 0),
        Xor { dst, lhs, rhs } => w(Opcode::XOR, dst, lhs, rhs, 0),
        Shl { dst, lhs, rhs } => w(Opcode::SHL, dst, lhs, rhs, 0),
        Shr { dst, lhs, rhs } => w(Opcode::SHR, dst, lhs, rhs, 0),

        St { base, index, src, disp, mode } => {
            w(op_for_mode(Opcode::ST, Opcode::ST_IND, mode), base, index, src, disp)
        }
        Push { base, src, disp } => w(Opcode::PUSH, base, 0, src, disp),

        CsrRd { dst, csr } => w(Opcode::CSRRD, dst, csr.index(), 0, 0),
        LdReg { dst, src, disp } => w(Opcode::LD_REG, dst, src, 0, disp),
        LdMem { dst, base, index, disp } => w(Opcode::LD_MEM, dst, base, index, disp),
        Pop { dst, base, disp } => w(Opcode::POP, dst, base, 0, disp),
        CsrWr { csr, src } => w(Opcode::CSRWR, csr.index(), src, 0, 0),
        CsrOr { dst, src, disp } => w(Opcode::CSR_OR, dst.index(), src.index(), 0, disp),
        CsrLd { csr, base, index, disp } => w(Opcode::CSR_LD, csr.index(), base, index, disp),
        CsrPop { csr, base, disp } => w(Opcode::CSR_POP, csr.index(), base, 0, disp),
    };

    word.pack()
}

fn op_for_mode(direct: u8, indirect: u8, mode: AddrMode) -> u8 {
    match mode {
        AddrMode::Direct => direct,
        AddrMode::Indirect => indirect,
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Instruction::*;

        let star = |mode: &AddrMode| match mode {
            AddrMode::Direct => "",
            AddrMode::Indirect => "*",
        };

        match self {
            Halt => write!(f, "halt"),
            Int => write!(f, "int"),
            Call { base, disp, mode } => {
                write!(f, "call {}[r{}{:+}]", star(mode), base, disp)
            }
            Jmp { base, disp, mode } => {
                write!(f, "jmp {}[r{}{:+}]", star(mode), base, disp)
            }
            Beq { base, lhs, rhs, disp, mode } => {
                write!(f, "beq r{}, r{}, {}[r{}{:+}]", lhs, rhs, star(mode), base, disp)
            }
            Bne { base, lhs, rhs, disp, mode } => {
                write!(f, "bne r{}, r{}, {}[r{}{:+}]", lhs, rhs, star(mode), base, disp)
            }
            Bgt { base, lhs, rhs, disp, mode } => {
                write!(f, "bgt r{}, r{}, {}[r{}{:+}]", lhs, rhs, star(mode), base, disp)
            }
            Xchg { lhs, rhs } => write!(f, "xchg r{}, r{}", lhs, rhs),
            Add { dst, lhs, rhs } => write!(f, "add r{}, r{}, r{}", dst, lhs, rhs),
            Sub { dst, lhs, rhs } => write!(f, "sub r{}, r{}, r{}", dst, lhs, rhs),
            Mul { dst, lhs, rhs } => write!(f, "mul r{}, r{}, r{}", dst, lhs, rhs),
            Div { dst, lhs, rhs } => write!(f, "div r{}, r{}, r{}", dst, lhs, rhs),
            Not { dst, src } => write!(f, "not r{}, r{}", dst, src),
            And { dst, lhs, rhs } => write!(f, "and r{}, r{}, r{}", dst, lhs, rhs),
            Or { dst, lhs, rhs } => write!(f, "or r{}, r{}, r{}", dst, lhs, rhs),
            Xor { dst, lhs, rhs } => write!(f, "xor r{}, r{}, r{}", dst, lhs, rhs),
            Shl { dst, lhs, rhs } => write!(f, "shl r{}, r{}, r{}", dst, lhs, rhs),
            Shr { dst, lhs, rhs } => write!(f, "shr r{}, r{}, r{}", dst, lhs, rhs),
            St { base, index, src, disp, mode } => {
                write!(f, "st r{}, {}[r{}+r{}{:+}]", src, star(mode), base, index, disp)
            }
            Push { base, src, disp } => write!(f, "push r{}, [r{}{:+}]", src, base, disp),
            CsrRd { dst, csr } => write!(f, "csrrd r{}, %{}", dst, csr),
            LdReg { dst, src, disp } => write!(f, "ld r{}, r{}{:+}", dst, src, disp),
            LdMem { dst, base, index, disp } => {
                write!(f, "ld r{}, [r{}+r{}{:+}]", dst, base, index, disp)
            }
            Pop { dst, base, disp } => write!(f, "pop r{}, [r{}]{:+}", dst, base, disp),
            CsrWr { csr, src } => write!(f, "csrwr %{}, r{}", csr, src),
            CsrOr { dst, src, disp } => write!(f, "csror %{}, %{}, {:#x}", dst, src, disp),
            CsrLd { csr, base, index, disp } => {
                write!(f, "csrld %{}, [r{}+r{}{:+}]", csr, base, index, disp)
            }
            CsrPop { csr, base, disp } => write!(f, "csrpop %{}, [r{}]{:+}", csr, base, disp),
        }
    }
}

/// Errors raised when a raw word is mapped onto an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("invalid control-status register index {0}")]
    InvalidCsr(u8),
}
