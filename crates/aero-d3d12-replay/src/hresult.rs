//! Result codes returned by captured and replayed calls.
//!
//! Every override on the consumer receives the capture-time result and returns the result that
//! the application should observe. Codes are carried as raw 32-bit values so unknown driver
//! results round-trip unchanged.

use core::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HResult(pub i32);

const fn code(raw: u32) -> HResult {
    HResult(raw as i32)
}

impl HResult {
    pub const S_OK: HResult = code(0x0000_0000);
    pub const S_FALSE: HResult = code(0x0000_0001);
    pub const E_FAIL: HResult = code(0x8000_4005);
    pub const E_INVALIDARG: HResult = code(0x8007_0057);
    pub const E_OUTOFMEMORY: HResult = code(0x8007_000E);
    pub const E_NOTIMPL: HResult = code(0x8000_4001);
    pub const DXGI_ERROR_INVALID_CALL: HResult = code(0x887A_0001);
    pub const DXGI_ERROR_DEVICE_REMOVED: HResult = code(0x887A_0005);
    pub const DXGI_ERROR_DEVICE_HUNG: HResult = code(0x887A_0006);
    pub const DXGI_ERROR_DEVICE_RESET: HResult = code(0x887A_0007);
    pub const D3D12_ERROR_ADAPTER_NOT_FOUND: HResult = code(0x887E_0001);
    pub const D3D12_ERROR_DRIVER_VERSION_MISMATCH: HResult = code(0x887E_0002);

    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }

    pub const fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// Device-loss class results. Replay cannot make further progress once one of these is
    /// observed where capture did not report it.
    pub fn is_device_lost(self) -> bool {
        matches!(
            self,
            Self::DXGI_ERROR_DEVICE_REMOVED | Self::DXGI_ERROR_DEVICE_HUNG | Self::DXGI_ERROR_DEVICE_RESET
        )
    }

    pub const fn as_u32(self) -> u32 {
        self.0 as u32
    }

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::S_OK => "S_OK",
            Self::S_FALSE => "S_FALSE",
            Self::E_FAIL => "E_FAIL",
            Self::E_INVALIDARG => "E_INVALIDARG",
            Self::E_OUTOFMEMORY => "E_OUTOFMEMORY",
            Self::E_NOTIMPL => "E_NOTIMPL",
            Self::DXGI_ERROR_INVALID_CALL => "DXGI_ERROR_INVALID_CALL",
            Self::DXGI_ERROR_DEVICE_REMOVED => "DXGI_ERROR_DEVICE_REMOVED",
            Self::DXGI_ERROR_DEVICE_HUNG => "DXGI_ERROR_DEVICE_HUNG",
            Self::DXGI_ERROR_DEVICE_RESET => "DXGI_ERROR_DEVICE_RESET",
            Self::D3D12_ERROR_ADAPTER_NOT_FOUND => "D3D12_ERROR_ADAPTER_NOT_FOUND",
            Self::D3D12_ERROR_DRIVER_VERSION_MISMATCH => "D3D12_ERROR_DRIVER_VERSION_MISMATCH",
            _ => return None,
        };
        Some(name)
    }

    /// Human readable description used for the fatal-error sink.
    pub fn description(self) -> &'static str {
        match self {
            Self::DXGI_ERROR_DEVICE_REMOVED => {
                "The video card has been physically removed from the system, or a driver upgrade for the video card has occurred."
            }
            Self::DXGI_ERROR_DEVICE_HUNG => {
                "The application's device failed due to badly formed commands sent by the application."
            }
            Self::DXGI_ERROR_DEVICE_RESET => {
                "The device failed due to a badly formed command."
            }
            Self::E_OUTOFMEMORY => "Ran out of memory.",
            Self::E_INVALIDARG => "One or more arguments are invalid.",
            _ if self.is_success() => "The operation completed successfully.",
            _ => "The operation failed.",
        }
    }
}

impl Default for HResult {
    fn default() -> Self {
        Self::S_OK
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:08X}", self.as_u32()),
        }
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HResult({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_failure_follow_sign_bit() {
        assert!(HResult::S_OK.is_success());
        assert!(HResult::S_FALSE.is_success());
        assert!(HResult::E_FAIL.is_failure());
        assert!(HResult::D3D12_ERROR_DRIVER_VERSION_MISMATCH.is_failure());
    }

    #[test]
    fn display_uses_name_or_hex() {
        assert_eq!(HResult::DXGI_ERROR_DEVICE_REMOVED.to_string(), "DXGI_ERROR_DEVICE_REMOVED");
        assert_eq!(HResult(0x1234).to_string(), "0x00001234");
    }

    #[test]
    fn device_lost_class() {
        assert!(HResult::DXGI_ERROR_DEVICE_HUNG.is_device_lost());
        assert!(!HResult::E_FAIL.is_device_lost());
    }
}
