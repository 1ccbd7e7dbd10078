//! Interrupt controller for the Morava-32.
//!
//! Owns the three asynchronous faces of the machine:
//!
//! - a periodic timer driven by a monotonic clock;
//! - a single-slot keyboard mailbox fed by a dedicated reader thread;
//! - the memory-mapped output cell the execution loop polls.
//!
//! Delivery policy: a due timer tick or an arrived character is dropped,
//! not queued, whenever the PSW masks it. The mailbox is a bounded
//! rendezvous channel of capacity one, so the reader thread can never run
//! ahead by more than one pending character and the handoff is
//! publish-then-consume ordered.

use crate::cpu::registers::Psw;
use std::io::Read;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::thread;
use std::time::{Duration, Instant};

/// Memory-mapped output cell: a non-zero byte here is emitted and cleared
/// after every instruction.
pub const OUTPUT_ADDR: u32 = 0xFFFF_FF00;
/// Memory-mapped cell receiving the latest keyboard character.
pub const KEYBOARD_DATA_ADDR: u32 = 0xFFFF_FF10;
/// Memory-mapped keyboard status cell.
pub const KEYBOARD_STATUS_ADDR: u32 = 0xFFFF_FF14;
/// Ready bit raised in the keyboard status cell on delivery.
pub const KEYBOARD_STATUS_READY: u32 = 1;

/// First address of the memory-mapped register page.
pub const MMIO_BASE: u32 = 0xFFFF_FF00;
/// Size of the memory-mapped register page in bytes.
pub const MMIO_SIZE: usize = 0x20;

/// Reason codes written to CAUSE on interrupt entry. Each code doubles as
/// the word index into the vector table at HANDLER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqCause {
    /// Reserved vector for an illegal instruction (the engine treats unknown
    /// opcodes as fatal, so this is never delivered; the slot stays part of
    /// the table convention).
    BadInstruction,
    /// Periodic timer expiry.
    Timer,
    /// Keyboard character arrival.
    Keyboard,
    /// `int` instruction.
    Software,
}

impl IrqCause {
    pub fn code(self) -> u32 {
        match self {
            IrqCause::BadInstruction => 1,
            IrqCause::Timer => 2,
            IrqCause::Keyboard => 3,
            IrqCause::Software => 4,
        }
    }
}

/// The interrupt controller.
pub struct InterruptController {
    /// When execution started; reported in the run summary.
    started: Instant,
    /// Last timer firing (or dropped-while-masked expiry).
    last_timer: Instant,
    timer_period: Duration,
    key_rx: Receiver<u8>,
    key_tx: SyncSender<u8>,
}

/// The hardware timer period.
pub const TIMER_PERIOD: Duration = Duration::from_secs(1);

impl InterruptController {
    pub fn new() -> Self {
        Self::with_timer_period(TIMER_PERIOD)
    }

    /// Controller with a custom timer period. Tests use `Duration::ZERO` to
    /// make the very next poll due.
    pub fn with_timer_period(period: Duration) -> Self {
        let (key_tx, key_rx) = sync_channel(1);
        let now = Instant::now();
        Self {
            started: now,
            last_timer: now,
            timer_period: period,
            key_rx,
            key_tx,
        }
    }

    /// Wall-clock time since execution started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Spawn the keyboard reader thread. It blocks on the byte source for
    /// the lifetime of the process and parks on the mailbox whenever a
    /// character is already pending.
    pub fn start_reader<R>(&self, source: R)
    where
        R: Read + Send + 'static,
    {
        let tx = self.key_tx.clone();
        thread::spawn(move || {
            for byte in source.bytes() {
                let Ok(byte) = byte else { break };
                // A send error means the CPU side is gone; stop reading.
                if tx.send(byte).is_err() {
                    break;
                }
            }
        });
    }

    /// Hand the controller one character directly, as the reader thread
    /// would. Fails when a character is already pending.
    pub fn inject_key(&self, byte: u8) -> bool {
        !matches!(self.key_tx.try_send(byte), Err(TrySendError::Full(_)))
    }

    /// Poll the timer. A due tick is consumed either way; it is deliverable
    /// only when the PSW has the timer armed and interrupts unmasked.
    pub fn poll_timer(&mut self, psw: Psw) -> bool {
        if self.last_timer.elapsed() < self.timer_period {
            return false;
        }
        self.last_timer = Instant::now();
        psw.timer_enabled() && !psw.masked()
    }

    /// Poll the keyboard mailbox. A pending character is consumed either
    /// way; while masked it is dropped entirely.
    pub fn poll_keyboard(&mut self, psw: Psw) -> Option<u8> {
        let byte = self.key_rx.try_recv().ok()?;
        if psw.masked() {
            return None;
        }
        Some(byte)
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InterruptController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptController")
            .field("timer_period", &self.timer_period)
            .field("elapsed", &self.elapsed())
            .finish()
    }
}
