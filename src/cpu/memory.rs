//! Morava-32 memory subsystem.
//!
//! The address space is sparse: memory owns an ordered set of disjoint
//! segments, each a contiguous byte buffer at a fixed base. Segments are
//! created or grown only when a program image is loaded; a word access that
//! is not wholly inside one segment is a fault, never an extension.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One past the highest representable address.
const ADDRESS_SPACE: u64 = 1 << 32;

/// A contiguous owned range of backing bytes at a fixed base address.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    base: u32,
    data: Vec<u8>,
}

impl Segment {
    /// Base address of the first byte.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// One past the last byte, as a 64-bit value so `base + len` at the top
    /// of the address space does not wrap.
    pub fn end(&self) -> u64 {
        self.base as u64 + self.data.len() as u64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Whether `[addr, addr + len)` lies entirely inside this segment.
    fn contains(&self, addr: u32, len: u32) -> bool {
        addr >= self.base && addr as u64 + len as u64 <= self.end()
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Segment({:#010x}..{:#010x})", self.base, self.end())
    }
}

/// Sparse segmented memory.
#[derive(Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Disjoint segments ordered by base address.
    segments: Vec<Segment>,
}

impl Memory {
    /// Create an empty memory with no mapped segments.
    pub fn new() -> Self {
        Self { segments: Vec::new() }
    }

    /// Map `bytes` at `base`, creating a new segment or growing/overwriting
    /// existing ones. Segments the load touches or becomes adjacent to are
    /// coalesced so the disjoint-and-ordered invariant holds afterwards.
    pub fn load(&mut self, base: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        let end = base as u64 + bytes.len() as u64;
        if end > ADDRESS_SPACE {
            return Err(MemoryError::OutOfSpace { base, size: bytes.len() });
        }
        if bytes.is_empty() {
            return Ok(());
        }

        // Collect every existing segment that overlaps or touches the loaded
        // range; they all collapse into one segment with the new bytes on top.
        let lo = self
            .segments
            .partition_point(|s| s.end() < base as u64);
        let hi = self
            .segments
            .partition_point(|s| s.base as u64 <= end);
        let absorbed: Vec<Segment> = self.segments.drain(lo..hi).collect();

        let new_base = absorbed
            .first()
            .map_or(base, |s| s.base.min(base));
        let new_end = absorbed
            .last()
            .map_or(end, |s| s.end().max(end));

        let mut data = vec![0u8; (new_end - new_base as u64) as usize];
        for seg in &absorbed {
            let offset = (seg.base - new_base) as usize;
            data[offset..offset + seg.len()].copy_from_slice(seg.bytes());
        }
        let offset = (base - new_base) as usize;
        data[offset..offset + bytes.len()].copy_from_slice(bytes);

        self.segments.insert(lo, Segment { base: new_base, data });
        Ok(())
    }

    /// Read the little-endian word at `addr`.
    pub fn read_word(&self, addr: u32) -> Result<u32, MemoryError> {
        let idx = self.locate(addr)?;
        let seg = &self.segments[idx];
        let offset = (addr - seg.base) as usize;
        let b = &seg.data[offset..offset + 4];
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Write `value` as a little-endian word at `addr`.
    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<(), MemoryError> {
        let idx = self.locate(addr)?;
        let seg = &mut self.segments[idx];
        let offset = (addr - seg.base) as usize;
        seg.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Coalesce address-adjacent segments. Idempotent, O(n).
    pub fn merge_adjacent(&mut self) {
        let mut merged: Vec<Segment> = Vec::with_capacity(self.segments.len());
        for seg in self.segments.drain(..) {
            match merged.last_mut() {
                Some(prev) if prev.end() == seg.base as u64 => {
                    prev.data.extend_from_slice(&seg.data);
                }
                _ => merged.push(seg),
            }
        }
        self.segments = merged;
    }

    /// The mapped segments, ordered by base address.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Find the index of the segment wholly containing `[addr, addr + 4)`.
    fn locate(&self, addr: u32) -> Result<usize, MemoryError> {
        let idx = self.segments.partition_point(|s| s.base <= addr);
        if idx == 0 || !self.segments[idx - 1].contains(addr, 4) {
            return Err(MemoryError::UnmappedAddress { addr });
        }
        Ok(idx - 1)
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mapped: u64 = self.segments.iter().map(|s| s.len() as u64).sum();
        f.debug_struct("Memory")
            .field("segments", &self.segments.len())
            .field("mapped_bytes", &mapped)
            .finish()
    }
}

/// Errors raised by memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// `[addr, addr+4)` does not fall entirely within one segment.
    #[error("unmapped memory access at {addr:#010x}")]
    UnmappedAddress { addr: u32 },

    /// A load would run past the end of the address space.
    #[error("segment at {base:#010x} of {size} bytes exceeds the address space")]
    OutOfSpace { base: u32, size: usize },
}
