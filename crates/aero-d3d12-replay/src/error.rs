use thiserror::Error;

use crate::handles::CaptureId;
use crate::object_table::ExtraInfoKind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("object {0} already exists")]
    DuplicateCaptureId(CaptureId),
    #[error("unknown object {0}")]
    UnknownObject(CaptureId),
    #[error("object {capture_id} does not have an associated {expected:?} info structure")]
    MissingExtraInfo {
        capture_id: CaptureId,
        expected: ExtraInfoKind,
    },
    #[error("object {capture_id} has a {found:?} info structure, expected {expected:?}")]
    ExtraInfoKindMismatch {
        capture_id: CaptureId,
        expected: ExtraInfoKind,
        found: ExtraInfoKind,
    },
    #[error("object {0} already has an associated info structure")]
    ExtraInfoAlreadySet(CaptureId),
    #[error("object {0} has no outstanding references to release")]
    ReferenceUnderflow(CaptureId),
    #[error("GPU VA range [0x{start:x}..0x{end:x}) is empty or wraps")]
    InvalidGpuVaRange { start: u64, end: u64 },
    #[error(
        "GPU VA range [0x{start:x}..0x{end:x}) overlaps existing range [0x{existing_start:x}..0x{existing_end:x})"
    )]
    OverlappingGpuVaRange {
        start: u64,
        end: u64,
        existing_start: u64,
        existing_end: u64,
    },
    #[error("no replay GPU VA mapping for capture address 0x{0:016x}")]
    UnmappedGpuVa(u64),
    #[error("mapped memory {memory_id} fill [{offset}..+{size}) exceeds mapping of {len} bytes")]
    FillOutOfBounds {
        memory_id: u64,
        offset: u64,
        size: u64,
        len: usize,
    },
    #[error("unrecognized mapped memory object {0}")]
    UnknownMappedMemory(u64),
    #[error("heap allocation {0} already exists")]
    DuplicateHeapAllocation(u64),
    #[error("no heap allocation has been created for allocation id {0}")]
    UnknownHeapAllocation(u64),
    #[error("heap allocation of {0} bytes cannot be represented on this host")]
    HeapAllocationTooLarge(u64),
    #[error("failed to create a window")]
    WindowCreationFailed,
    #[error("failed to retrieve native handle from window")]
    WindowHandleUnavailable,
}
