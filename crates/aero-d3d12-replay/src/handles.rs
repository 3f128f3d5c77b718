use core::fmt;

use serde::{Deserialize, Serialize};

/// Identifier assigned to an object at capture time.
///
/// Capture ids are stable for the lifetime of the captured object and are the key of the
/// replay-side object table. `0` is the null id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptureId(pub u64);

impl CaptureId {
    pub const NULL: CaptureId = CaptureId(0);

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CaptureId({})", self.0)
    }
}

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CaptureId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Opaque handle to a live object owned by the native driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NativeHandle(pub u64);

/// Opaque CPU-visible wait object (an OS event).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventHandle(pub u64);

/// Native surface handle handed out by a window (e.g. an `HWND`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NativeWindowHandle(pub u64);
