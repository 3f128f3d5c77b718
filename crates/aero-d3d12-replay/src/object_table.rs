//! Capture id → live replay object table.
//!
//! Each entry mirrors one application-visible COM object. Two reference counts are tracked:
//!
//! - `ref_count`: references held by the replayed application, driven by captured
//!   `AddRef`/`Release` calls and by objects returned from creation calls.
//! - `extra_ref`: references pinned by the replay engine itself (swap-chain back buffers).
//!
//! An entry is torn down exactly when both counts reach zero. The table only keeps the counts;
//! extension-specific teardown (GPU VA ranges, mapped memory, windows, ...) needs the rest of the
//! engine and is performed by [`crate::Dx12ReplayConsumer`].

use std::collections::HashMap;

use crate::driver::DescriptorHeapType;
use crate::error::ReplayError;
use crate::handles::{CaptureId, NativeHandle};
use crate::resource::ResourceInfo;
use crate::swapchain::SwapchainInfo;
use crate::sync::{CommandQueueInfo, FenceInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtraInfoKind {
    Device,
    CommandQueue,
    DescriptorHeap,
    Fence,
    Resource,
    Heap,
    Swapchain,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Replay-time descriptor handle increment per heap type, recorded on query.
    pub replay_increments: [u32; DescriptorHeapType::COUNT],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorHeapInfo {
    pub descriptor_type: DescriptorHeapType,
    pub replay_increments: [u32; DescriptorHeapType::COUNT],
    /// Set by the first CPU heap-start query; 0 means unset.
    pub replay_cpu_addr_begin: u64,
    /// Set by the first GPU heap-start query; 0 means unset.
    pub replay_gpu_addr_begin: u64,
}

/// A heap created over host memory. The allocation is freed when the info is dropped, which
/// happens exactly once, when the heap leaves the object table.
#[derive(Debug)]
pub struct HeapInfo {
    pub external_allocation: Box<[u8]>,
    /// Allocations from later opens that returned this same heap.
    pub reopened_allocations: Vec<Box<[u8]>>,
}

impl HeapInfo {
    pub fn new(external_allocation: Box<[u8]>) -> Self {
        Self {
            external_allocation,
            reopened_allocations: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub enum ExtraInfo {
    Device(DeviceInfo),
    CommandQueue(CommandQueueInfo),
    DescriptorHeap(DescriptorHeapInfo),
    Fence(FenceInfo),
    Resource(ResourceInfo),
    Heap(HeapInfo),
    Swapchain(SwapchainInfo),
}

impl ExtraInfo {
    pub fn kind(&self) -> ExtraInfoKind {
        match self {
            Self::Device(_) => ExtraInfoKind::Device,
            Self::CommandQueue(_) => ExtraInfoKind::CommandQueue,
            Self::DescriptorHeap(_) => ExtraInfoKind::DescriptorHeap,
            Self::Fence(_) => ExtraInfoKind::Fence,
            Self::Resource(_) => ExtraInfoKind::Resource,
            Self::Heap(_) => ExtraInfoKind::Heap,
            Self::Swapchain(_) => ExtraInfoKind::Swapchain,
        }
    }
}

/// Typed access to one [`ExtraInfo`] variant.
pub trait ExtraInfoVariant: Sized {
    const KIND: ExtraInfoKind;

    fn from_extra(extra: &ExtraInfo) -> Option<&Self>;
    fn from_extra_mut(extra: &mut ExtraInfo) -> Option<&mut Self>;
    fn into_extra(self) -> ExtraInfo;
}

macro_rules! extra_info_variant {
    ($ty:ty, $variant:ident) => {
        impl ExtraInfoVariant for $ty {
            const KIND: ExtraInfoKind = ExtraInfoKind::$variant;

            fn from_extra(extra: &ExtraInfo) -> Option<&Self> {
                match extra {
                    ExtraInfo::$variant(info) => Some(info),
                    _ => None,
                }
            }

            fn from_extra_mut(extra: &mut ExtraInfo) -> Option<&mut Self> {
                match extra {
                    ExtraInfo::$variant(info) => Some(info),
                    _ => None,
                }
            }

            fn into_extra(self) -> ExtraInfo {
                ExtraInfo::$variant(self)
            }
        }
    };
}

extra_info_variant!(DeviceInfo, Device);
extra_info_variant!(CommandQueueInfo, CommandQueue);
extra_info_variant!(DescriptorHeapInfo, DescriptorHeap);
extra_info_variant!(FenceInfo, Fence);
extra_info_variant!(ResourceInfo, Resource);
extra_info_variant!(HeapInfo, Heap);
extra_info_variant!(SwapchainInfo, Swapchain);

#[derive(Debug)]
pub struct ObjectInfo {
    pub capture_id: CaptureId,
    pub object: NativeHandle,
    pub ref_count: u32,
    pub extra_ref: u32,
    pub extra_info: Option<ExtraInfo>,
}

impl ObjectInfo {
    pub fn is_unreferenced(&self) -> bool {
        self.ref_count == 0 && self.extra_ref == 0
    }

    pub fn extra<T: ExtraInfoVariant>(&self) -> Result<&T, ReplayError> {
        let extra = self.extra_info.as_ref().ok_or(ReplayError::MissingExtraInfo {
            capture_id: self.capture_id,
            expected: T::KIND,
        })?;
        T::from_extra(extra).ok_or(ReplayError::ExtraInfoKindMismatch {
            capture_id: self.capture_id,
            expected: T::KIND,
            found: extra.kind(),
        })
    }

    pub fn extra_mut<T: ExtraInfoVariant>(&mut self) -> Result<&mut T, ReplayError> {
        let capture_id = self.capture_id;
        let extra = self.extra_info.as_mut().ok_or(ReplayError::MissingExtraInfo {
            capture_id,
            expected: T::KIND,
        })?;
        let found = extra.kind();
        T::from_extra_mut(extra).ok_or(ReplayError::ExtraInfoKindMismatch {
            capture_id,
            expected: T::KIND,
            found,
        })
    }

    /// Installs an extension record. An object carries at most one.
    pub fn set_extra<T: ExtraInfoVariant>(&mut self, info: T) -> Result<&mut T, ReplayError> {
        if self.extra_info.is_some() {
            return Err(ReplayError::ExtraInfoAlreadySet(self.capture_id));
        }
        self.extra_info = Some(info.into_extra());
        self.extra_mut::<T>()
    }

    /// Returns the extension record, creating it on first use.
    pub fn extra_or_insert_with<T: ExtraInfoVariant>(
        &mut self,
        make: impl FnOnce() -> T,
    ) -> Result<&mut T, ReplayError> {
        if self.extra_info.is_none() {
            self.extra_info = Some(make().into_extra());
        }
        self.extra_mut::<T>()
    }
}

/// Result of dropping a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Both counts reached zero; the caller must tear the object down now.
    Unreferenced,
}

#[derive(Debug, Default)]
pub struct ObjectTable {
    objects: HashMap<CaptureId, ObjectInfo>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, capture_id: CaptureId) -> bool {
        self.objects.contains_key(&capture_id)
    }

    /// Inserts a new entry holding one application reference.
    pub fn create(
        &mut self,
        capture_id: CaptureId,
        object: NativeHandle,
    ) -> Result<&mut ObjectInfo, ReplayError> {
        use std::collections::hash_map::Entry;

        match self.objects.entry(capture_id) {
            Entry::Occupied(_) => Err(ReplayError::DuplicateCaptureId(capture_id)),
            Entry::Vacant(slot) => Ok(slot.insert(ObjectInfo {
                capture_id,
                object,
                ref_count: 1,
                extra_ref: 0,
                extra_info: None,
            })),
        }
    }

    pub fn get(&self, capture_id: CaptureId) -> Option<&ObjectInfo> {
        self.objects.get(&capture_id)
    }

    pub fn get_mut(&mut self, capture_id: CaptureId) -> Option<&mut ObjectInfo> {
        self.objects.get_mut(&capture_id)
    }

    pub fn lookup(&self, capture_id: CaptureId) -> Result<&ObjectInfo, ReplayError> {
        self.get(capture_id).ok_or(ReplayError::UnknownObject(capture_id))
    }

    pub fn lookup_mut(&mut self, capture_id: CaptureId) -> Result<&mut ObjectInfo, ReplayError> {
        self.get_mut(capture_id).ok_or(ReplayError::UnknownObject(capture_id))
    }

    pub fn native(&self, capture_id: CaptureId) -> Option<NativeHandle> {
        self.get(capture_id).map(|info| info.object)
    }

    pub fn extra<T: ExtraInfoVariant>(&self, capture_id: CaptureId) -> Result<&T, ReplayError> {
        self.lookup(capture_id)?.extra::<T>()
    }

    pub fn extra_mut<T: ExtraInfoVariant>(
        &mut self,
        capture_id: CaptureId,
    ) -> Result<&mut T, ReplayError> {
        self.lookup_mut(capture_id)?.extra_mut::<T>()
    }

    pub fn add_ref(&mut self, capture_id: CaptureId) -> Result<u32, ReplayError> {
        let info = self.lookup_mut(capture_id)?;
        info.ref_count += 1;
        Ok(info.ref_count)
    }

    pub fn release(&mut self, capture_id: CaptureId) -> Result<Liveness, ReplayError> {
        let info = self.lookup_mut(capture_id)?;
        info.ref_count = info
            .ref_count
            .checked_sub(1)
            .ok_or(ReplayError::ReferenceUnderflow(capture_id))?;
        Ok(Self::liveness(info))
    }

    pub fn pin(&mut self, capture_id: CaptureId) -> Result<u32, ReplayError> {
        let info = self.lookup_mut(capture_id)?;
        info.extra_ref += 1;
        Ok(info.extra_ref)
    }

    pub fn unpin(&mut self, capture_id: CaptureId) -> Result<Liveness, ReplayError> {
        let info = self.lookup_mut(capture_id)?;
        info.extra_ref = info
            .extra_ref
            .checked_sub(1)
            .ok_or(ReplayError::ReferenceUnderflow(capture_id))?;
        Ok(Self::liveness(info))
    }

    fn liveness(info: &ObjectInfo) -> Liveness {
        if info.is_unreferenced() {
            Liveness::Unreferenced
        } else {
            Liveness::Alive
        }
    }

    pub fn remove(&mut self, capture_id: CaptureId) -> Option<ObjectInfo> {
        self.objects.remove(&capture_id)
    }

    pub fn ids(&self) -> Vec<CaptureId> {
        let mut ids: Vec<_> = self.objects.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectInfo> {
        self.objects.values()
    }

    /// Capture ids of every object carrying an extension of kind `kind`, in id order.
    pub fn ids_with_kind(&self, kind: ExtraInfoKind) -> Vec<CaptureId> {
        let mut ids: Vec<_> = self
            .objects
            .values()
            .filter(|info| info.extra_info.as_ref().map(ExtraInfo::kind) == Some(kind))
            .map(|info| info.capture_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Removes every entry, in capture id order.
    pub fn drain_sorted(&mut self) -> Vec<ObjectInfo> {
        let mut all: Vec<_> = self.objects.drain().map(|(_, info)| info).collect();
        all.sort_unstable_by_key(|info| info.capture_id);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: CaptureId = CaptureId(5);

    #[test]
    fn create_rejects_duplicates_without_touching_the_entry() {
        let mut table = ObjectTable::new();
        table.create(ID, NativeHandle(10)).unwrap();
        table.add_ref(ID).unwrap();

        assert_eq!(
            table.create(ID, NativeHandle(11)).unwrap_err(),
            ReplayError::DuplicateCaptureId(ID)
        );
        let info = table.get(ID).unwrap();
        assert_eq!(info.object, NativeHandle(10));
        assert_eq!(info.ref_count, 2);
    }

    #[test]
    fn unreferenced_only_when_both_counts_are_zero() {
        let mut table = ObjectTable::new();
        table.create(ID, NativeHandle(1)).unwrap();
        table.pin(ID).unwrap();

        assert_eq!(table.release(ID).unwrap(), Liveness::Alive);
        assert_eq!(table.add_ref(ID).unwrap(), 1);
        assert_eq!(table.unpin(ID).unwrap(), Liveness::Alive);
        assert_eq!(table.release(ID).unwrap(), Liveness::Unreferenced);
        assert_eq!(table.release(ID).unwrap_err(), ReplayError::ReferenceUnderflow(ID));
        assert_eq!(table.unpin(ID).unwrap_err(), ReplayError::ReferenceUnderflow(ID));
    }

    #[test]
    fn typed_extra_access_reports_missing_and_mismatched_kinds() {
        let mut table = ObjectTable::new();
        table.create(ID, NativeHandle(1)).unwrap();

        assert_eq!(
            table.extra::<FenceInfo>(ID).unwrap_err(),
            ReplayError::MissingExtraInfo {
                capture_id: ID,
                expected: ExtraInfoKind::Fence
            }
        );

        table
            .lookup_mut(ID)
            .unwrap()
            .set_extra(DeviceInfo::default())
            .unwrap();
        assert_eq!(
            table.extra::<FenceInfo>(ID).unwrap_err(),
            ReplayError::ExtraInfoKindMismatch {
                capture_id: ID,
                expected: ExtraInfoKind::Fence,
                found: ExtraInfoKind::Device
            }
        );
        assert!(table.extra::<DeviceInfo>(ID).is_ok());
        assert_eq!(
            table
                .lookup_mut(ID)
                .unwrap()
                .set_extra(DeviceInfo::default())
                .unwrap_err(),
            ReplayError::ExtraInfoAlreadySet(ID)
        );
        assert_eq!(table.ids_with_kind(ExtraInfoKind::Device), vec![ID]);
    }

    #[test]
    fn unknown_ids_are_errors() {
        let mut table = ObjectTable::new();
        assert_eq!(
            table.add_ref(CaptureId(9)).unwrap_err(),
            ReplayError::UnknownObject(CaptureId(9))
        );
        assert!(table.remove(CaptureId(9)).is_none());
    }
}
