//! Capture-to-replay GPU virtual address translation.
//!
//! Resources report a GPU virtual address the first time the application queries it. Capture
//! and replay assign different addresses, so every address embedded in a replayed call (root
//! arguments, vertex/index buffer views, indirect arguments, ...) has to be rebased from the
//! capture range onto the replay range before it reaches the driver.
//!
//! Ranges are kept in a vector sorted by capture start address. They never overlap, so a lookup
//! is a single `partition_point`.

use crate::error::ReplayError;
use crate::handles::NativeHandle;

/// The null GPU virtual address. Translating it yields itself.
pub const NULL_GPU_VA: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuVaRange {
    pub capture_start: u64,
    /// Exclusive.
    pub capture_end: u64,
    pub replay_base: u64,
    pub resource: NativeHandle,
}

impl GpuVaRange {
    pub fn contains(&self, capture_addr: u64) -> bool {
        capture_addr >= self.capture_start && capture_addr < self.capture_end
    }

    pub fn len(&self) -> u64 {
        self.capture_end - self.capture_start
    }

    pub fn is_empty(&self) -> bool {
        self.capture_end == self.capture_start
    }
}

#[derive(Debug, Default)]
pub struct GpuVaMap {
    ranges: Vec<GpuVaRange>,
}

impl GpuVaMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[GpuVaRange] {
        &self.ranges
    }

    pub fn add_range(
        &mut self,
        resource: NativeHandle,
        capture_addr: u64,
        replay_addr: u64,
        size: u64,
    ) -> Result<(), ReplayError> {
        let end = capture_addr
            .checked_add(size)
            .filter(|&end| end > capture_addr)
            .ok_or(ReplayError::InvalidGpuVaRange {
                start: capture_addr,
                end: capture_addr.wrapping_add(size),
            })?;

        let idx = self.ranges.partition_point(|r| r.capture_start < capture_addr);

        for neighbor in [idx.checked_sub(1).and_then(|i| self.ranges.get(i)), self.ranges.get(idx)]
            .into_iter()
            .flatten()
        {
            if capture_addr < neighbor.capture_end && neighbor.capture_start < end {
                return Err(ReplayError::OverlappingGpuVaRange {
                    start: capture_addr,
                    end,
                    existing_start: neighbor.capture_start,
                    existing_end: neighbor.capture_end,
                });
            }
        }

        self.ranges.insert(
            idx,
            GpuVaRange {
                capture_start: capture_addr,
                capture_end: end,
                replay_base: replay_addr,
                resource,
            },
        );
        Ok(())
    }

    /// Removes the range previously registered for `resource`. Returns `false` when no such range
    /// exists, which makes double teardown harmless.
    pub fn remove_range(&mut self, resource: NativeHandle, capture_addr: u64, size: u64) -> bool {
        let idx = self.ranges.partition_point(|r| r.capture_start < capture_addr);
        let Some(range) = self.ranges.get(idx) else {
            return false;
        };
        if range.capture_start != capture_addr
            || range.len() != size
            || range.resource != resource
        {
            return false;
        }
        self.ranges.remove(idx);
        true
    }

    pub fn find(&self, capture_addr: u64) -> Option<&GpuVaRange> {
        let idx = self.ranges.partition_point(|r| r.capture_start <= capture_addr);
        let cand = self.ranges.get(idx.checked_sub(1)?)?;
        cand.contains(capture_addr).then_some(cand)
    }

    pub fn translate(&self, capture_addr: u64) -> Result<u64, ReplayError> {
        if capture_addr == NULL_GPU_VA {
            return Ok(NULL_GPU_VA);
        }
        let range = self
            .find(capture_addr)
            .ok_or(ReplayError::UnmappedGpuVa(capture_addr))?;
        Ok(range.replay_base + (capture_addr - range.capture_start))
    }

    /// Translates every address in place. Unmapped entries are left untouched and the first
    /// failure is reported after the whole slice has been processed.
    pub fn translate_in_place(&self, addresses: &mut [u64]) -> Result<(), ReplayError> {
        let mut first_err = None;
        for addr in addresses.iter_mut() {
            match self.translate(*addr) {
                Ok(replay) => *addr = replay,
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RES_A: NativeHandle = NativeHandle(1);
    const RES_B: NativeHandle = NativeHandle(2);

    #[test]
    fn translate_rebases_within_range() {
        let mut map = GpuVaMap::new();
        map.add_range(RES_A, 0x1000, 0x9000, 0x100).unwrap();
        map.add_range(RES_B, 0x2000, 0x4000, 0x80).unwrap();

        assert_eq!(map.translate(0x1000).unwrap(), 0x9000);
        assert_eq!(map.translate(0x10ff).unwrap(), 0x90ff);
        assert_eq!(map.translate(0x2040).unwrap(), 0x4040);
        assert_eq!(map.translate(NULL_GPU_VA).unwrap(), NULL_GPU_VA);
    }

    #[test]
    fn translate_outside_any_range_is_an_error() {
        let mut map = GpuVaMap::new();
        map.add_range(RES_A, 0x1000, 0x9000, 0x100).unwrap();
        assert_eq!(map.translate(0x1100), Err(ReplayError::UnmappedGpuVa(0x1100)));
        assert_eq!(map.translate(0xfff), Err(ReplayError::UnmappedGpuVa(0xfff)));
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let mut map = GpuVaMap::new();
        map.add_range(RES_A, 0x1000, 0x9000, 0x100).unwrap();

        assert!(matches!(
            map.add_range(RES_B, 0x10f0, 0x5000, 0x20),
            Err(ReplayError::OverlappingGpuVaRange { existing_start: 0x1000, .. })
        ));
        assert!(matches!(
            map.add_range(RES_B, 0xf00, 0x5000, 0x101),
            Err(ReplayError::OverlappingGpuVaRange { .. })
        ));
        // Adjacent ranges are fine.
        map.add_range(RES_B, 0x1100, 0x5000, 0x10).unwrap();
        map.add_range(RES_B, 0xf00, 0x6000, 0x100).unwrap();
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn empty_and_wrapping_ranges_are_rejected() {
        let mut map = GpuVaMap::new();
        assert!(matches!(
            map.add_range(RES_A, 0x1000, 0x2000, 0),
            Err(ReplayError::InvalidGpuVaRange { .. })
        ));
        assert!(matches!(
            map.add_range(RES_A, u64::MAX - 1, 0x2000, 4),
            Err(ReplayError::InvalidGpuVaRange { .. })
        ));
    }

    #[test]
    fn remove_range_is_idempotent() {
        let mut map = GpuVaMap::new();
        map.add_range(RES_A, 0x1000, 0x9000, 0x100).unwrap();

        // Wrong owner or size leaves the range in place.
        assert!(!map.remove_range(RES_B, 0x1000, 0x100));
        assert!(!map.remove_range(RES_A, 0x1000, 0x80));

        assert!(map.remove_range(RES_A, 0x1000, 0x100));
        assert!(!map.remove_range(RES_A, 0x1000, 0x100));
        assert!(map.is_empty());
        assert_eq!(map.translate(0x1000), Err(ReplayError::UnmappedGpuVa(0x1000)));
    }

    #[test]
    fn batch_translation_reports_first_miss() {
        let mut map = GpuVaMap::new();
        map.add_range(RES_A, 0x1000, 0x9000, 0x100).unwrap();

        let mut addrs = [0x1010, 0, 0x5000, 0x1020, 0x6000];
        assert_eq!(
            map.translate_in_place(&mut addrs),
            Err(ReplayError::UnmappedGpuVa(0x5000))
        );
        assert_eq!(addrs, [0x9010, 0, 0x5000, 0x9020, 0x6000]);

        let mut addrs = [0x1000, 0x10ff];
        map.translate_in_place(&mut addrs).unwrap();
        assert_eq!(addrs, [0x9000, 0x90ff]);
    }
}
