//! Per-resource tracking: GPU virtual address pair and open CPU mappings.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::driver::MappedRegion;
use crate::error::ReplayError;
use crate::gpu_va::GpuVaMap;
use crate::handles::NativeHandle;
use crate::memory::MappedMemoryTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedMemoryInfo {
    pub memory_id: u64,
    pub count: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    /// 0 until the first address query.
    pub capture_address: u64,
    /// 0 until the first address query.
    pub replay_address: u64,
    pub address_range_size: u64,
    pub mapped_memory_info: HashMap<u32, MappedMemoryInfo>,
}

impl ResourceInfo {
    pub fn has_gpu_address(&self) -> bool {
        self.capture_address != 0
    }

    /// Records the capture/replay address pair and registers it for translation. The pair is
    /// fixed for the resource's lifetime; later calls return `Ok(false)` without changes.
    pub fn record_gpu_address(
        &mut self,
        resource: NativeHandle,
        capture_address: u64,
        replay_address: u64,
        size: u64,
        gpu_va: &mut GpuVaMap,
    ) -> Result<bool, ReplayError> {
        if self.has_gpu_address() || capture_address == 0 {
            return Ok(false);
        }
        gpu_va.add_range(resource, capture_address, replay_address, size)?;
        self.capture_address = capture_address;
        self.replay_address = replay_address;
        self.address_range_size = size;
        Ok(true)
    }

    /// Counts one more open map of `subresource`. The first map associates `memory_id` with the
    /// returned CPU pointer so memory fills can reach it.
    pub fn map(
        &mut self,
        subresource: u32,
        memory_id: u64,
        region: Option<MappedRegion>,
        mapped: &mut MappedMemoryTable,
    ) {
        let entry = self
            .mapped_memory_info
            .entry(subresource)
            .or_insert(MappedMemoryInfo { memory_id, count: 0 });
        entry.count += 1;
        if entry.memory_id != memory_id {
            warn!(
                subresource,
                recorded = entry.memory_id,
                memory_id,
                "subresource remapped under a different memory id"
            );
        }
        if entry.count == 1 {
            if let Some(region) = region {
                mapped.insert(entry.memory_id, region);
            }
        }
    }

    /// Drops one open map of `subresource`; returns the memory id that stopped being mapped.
    pub fn unmap(&mut self, subresource: u32, mapped: &mut MappedMemoryTable) -> Option<u64> {
        let Some(entry) = self.mapped_memory_info.get_mut(&subresource) else {
            debug!(subresource, "unmap of a subresource that is not mapped");
            return None;
        };
        entry.count = entry.count.saturating_sub(1);
        if entry.count > 0 {
            return None;
        }
        let memory_id = entry.memory_id;
        self.mapped_memory_info.remove(&subresource);
        mapped.remove(memory_id);
        Some(memory_id)
    }

    /// Drops every association this resource contributed. Safe to call twice.
    pub fn untrack(
        &mut self,
        resource: NativeHandle,
        gpu_va: &mut GpuVaMap,
        mapped: &mut MappedMemoryTable,
    ) {
        if self.has_gpu_address() {
            gpu_va.remove_range(resource, self.capture_address, self.address_range_size);
        }
        for (_, info) in self.mapped_memory_info.drain() {
            mapped.remove(info.memory_id);
        }
    }
}
