//! CPU emulation for the Morava-32 computer.
//!
//! This module implements the complete execution engine:
//! - sparse segmented memory with word-granular access
//! - 16 general-purpose registers plus STATUS/HANDLER/CAUSE
//! - the 32-bit instruction word codec and the opcode dispatch
//! - flag-exact ALU operations
//! - timer, keyboard and output handling via the interrupt controller

pub mod alu;
pub mod decode;
pub mod execute;
pub mod irq;
pub mod memory;
pub mod registers;

pub use alu::{AluError, Flags};
pub use decode::{AddrMode, DecodeError, Instruction, InstructionWord};
pub use execute::{Cpu, CpuError, CpuState, Snapshot};
pub use irq::{InterruptController, IrqCause};
pub use memory::{Memory, MemoryError, Segment};
pub use registers::{Csr, Psw, RegisterFile};
