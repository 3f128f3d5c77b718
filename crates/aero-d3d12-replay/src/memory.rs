//! Host memory tracked on behalf of the replayed application.
//!
//! - [`MappedMemoryTable`]: live CPU pointers of mapped GPU resources, keyed by the capture's
//!   mapped-memory id, used to replay memory fill commands.
//! - [`HeapAllocationTable`]: host allocations created ahead of
//!   `ID3D12Device3::OpenExistingHeapFromAddress`, owned here until a heap takes them over.

use std::collections::HashMap;

use crate::driver::MappedRegion;
use crate::error::ReplayError;

#[derive(Debug, Default)]
pub struct MappedMemoryTable {
    regions: HashMap<u64, MappedRegion>,
}

impl MappedMemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, memory_id: u64, region: MappedRegion) {
        self.regions.insert(memory_id, region);
    }

    pub fn remove(&mut self, memory_id: u64) -> Option<MappedRegion> {
        self.regions.remove(&memory_id)
    }

    pub fn get(&self, memory_id: u64) -> Option<&MappedRegion> {
        self.regions.get(&memory_id)
    }

    pub fn contains(&self, memory_id: u64) -> bool {
        self.regions.contains_key(&memory_id)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Copies `data` into the mapping for `memory_id` at `offset`.
    pub fn fill(&mut self, memory_id: u64, offset: u64, data: &[u8]) -> Result<(), ReplayError> {
        let region = self
            .regions
            .get(&memory_id)
            .ok_or(ReplayError::UnknownMappedMemory(memory_id))?;

        let out_of_bounds = || ReplayError::FillOutOfBounds {
            memory_id,
            offset,
            size: data.len() as u64,
            len: region.len,
        };
        let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(data.len()).ok_or_else(out_of_bounds)?;
        if end > region.len {
            return Err(out_of_bounds());
        }
        if data.is_empty() {
            return Ok(());
        }

        // Safety: the driver guarantees `region.ptr` addresses `region.len` writable bytes while
        // the subresource stays mapped, entries are removed from this table before the matching
        // unmap, and `start..end` was bounds-checked above. `data` is host memory owned by the
        // caller and cannot alias a driver mapping.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), region.ptr.as_ptr().add(start), data.len());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct HeapAllocationTable {
    allocations: HashMap<u64, Box<[u8]>>,
}

impl HeapAllocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a zeroed host allocation of `size` bytes for `allocation_id`.
    pub fn create(&mut self, allocation_id: u64, size: u64) -> Result<(), ReplayError> {
        if self.allocations.contains_key(&allocation_id) {
            return Err(ReplayError::DuplicateHeapAllocation(allocation_id));
        }
        let len = usize::try_from(size).map_err(|_| ReplayError::HeapAllocationTooLarge(size))?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| ReplayError::HeapAllocationTooLarge(size))?;
        bytes.resize(len, 0);
        self.allocations.insert(allocation_id, bytes.into_boxed_slice());
        Ok(())
    }

    /// Removes the allocation so a heap can take ownership of it.
    pub fn take(&mut self, allocation_id: u64) -> Result<Box<[u8]>, ReplayError> {
        self.allocations
            .remove(&allocation_id)
            .ok_or(ReplayError::UnknownHeapAllocation(allocation_id))
    }

    pub fn contains(&self, allocation_id: u64) -> bool {
        self.allocations.contains_key(&allocation_id)
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn clear(&mut self) {
        self.allocations.clear();
    }
}
