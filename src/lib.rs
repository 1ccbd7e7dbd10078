//! # Morava-32 Emulator
//!
//! An emulator for the Morava-32, a 32-bit educational computer with 16
//! general-purpose registers, a segmented sparse address space, and
//! timer/keyboard interrupts delivered through a configurable vector table.
//!
//! The crate is the execution half of the toolchain: it consumes program
//! images produced by the assembler/linker pipeline and runs them to
//! completion or fault.

pub mod cpu;
pub mod image;

// Re-export commonly used types
pub use cpu::{
    Cpu, CpuError, CpuState, Csr, Instruction, InstructionWord, InterruptController, IrqCause,
    Memory, MemoryError, Psw, RegisterFile, Snapshot,
};
pub use image::{load_image, save_image, Image, ImageError, ImageSegment};
