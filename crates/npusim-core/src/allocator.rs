//! Session-owned id generators and DRAM address allocation
//!
//! Both live inside a [`CompileContext`] that the compile session hands to
//! every operator, so two sessions never share counters or address space.

use crate::error::{Error, Result};
use npusim_isa::Addr;
use npusim_tracing::performance::record_allocation;

/// Alignment of every DRAM region handed out by [`AddressAllocator`]
pub const DRAM_ALIGNMENT: u64 = 256;

/// Monotonic identifier source with two independent counters
///
/// Structural ids name operators and tensors; memory-access ids name DRAM
/// transfer events (MOVIN/MOVOUT).
#[derive(Debug, Default, Clone)]
pub struct IdGenerator {
    next_id: u32,
    next_mem_access_id: u32,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next operator/tensor id
    pub fn generate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Next memory-access event id
    pub fn generate_mem_access_id(&mut self) -> u32 {
        let id = self.next_mem_access_id;
        self.next_mem_access_id += 1;
        id
    }
}

/// Append-only bump allocator over a flat DRAM address space
///
/// Each request is placed at the cursor (always a multiple of
/// [`DRAM_ALIGNMENT`]); the cursor then moves to the first aligned address
/// strictly past the region, so even zero-sized regions get distinct
/// addresses. There is no reclamation.
#[derive(Debug, Default, Clone)]
pub struct AddressAllocator {
    cursor: Addr,
}

impl AddressAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `size` bytes and return the region's aligned base address
    pub fn allocate(&mut self, size: u64) -> Result<Addr> {
        let exhausted = || Error::AddressSpaceExhausted {
            cursor: self.cursor,
            size,
        };

        let base = self.cursor.checked_next_multiple_of(DRAM_ALIGNMENT).ok_or_else(exhausted)?;
        let end = base.checked_add(size).ok_or_else(exhausted)?;
        self.cursor = (end / DRAM_ALIGNMENT)
            .checked_add(1)
            .and_then(|blocks| blocks.checked_mul(DRAM_ALIGNMENT))
            .ok_or_else(exhausted)?;

        debug_assert_eq!(base % DRAM_ALIGNMENT, 0);
        record_allocation(base, size, DRAM_ALIGNMENT);
        Ok(base)
    }

    /// Next address that would be handed out
    pub fn cursor(&self) -> Addr {
        self.cursor
    }
}

/// Mutable compile-pass state shared by every operator of one session
#[derive(Debug, Default)]
pub struct CompileContext {
    pub ids: IdGenerator,
    pub allocator: AddressAllocator,
}

impl CompileContext {
    pub fn new() -> Self {
        Self::default()
    }
}
