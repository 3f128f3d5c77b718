//! OS-level handles passed through API calls without being tracked as objects.
//!
//! A few calls take or return raw OS handles (events, windows). The capture stores an id for
//! them; before such a call replays, the id is resolved to the replay-side handle, and after it
//! returns, handles it produced could be recorded. Calls outside the known set are skipped.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::consumer::Dx12ReplayConsumer;
use crate::driver::Driver;
use crate::handles::{CaptureId, EventHandle, NativeWindowHandle};
use crate::hresult::HResult;
use crate::window::WindowFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiCallId {
    RegisterVideoMemoryBudgetChangeNotificationEvent,
    MakeWindowAssociation,
    GetDc,
    GetWindowAssociation,
    GetHwnd,
    /// Any other call, by its capture-format id.
    Other(u32),
}

impl ApiCallId {
    pub fn name(self) -> &'static str {
        match self {
            Self::RegisterVideoMemoryBudgetChangeNotificationEvent => {
                "IDXGIAdapter3::RegisterVideoMemoryBudgetChangeNotificationEvent"
            }
            Self::MakeWindowAssociation => "IDXGIFactory::MakeWindowAssociation",
            Self::GetDc => "IDXGISurface1::GetDC",
            Self::GetWindowAssociation => "IDXGIFactory::GetWindowAssociation",
            Self::GetHwnd => "IDXGISwapChain1::GetHwnd",
            Self::Other(_) => "unknown call",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalObject {
    Event(EventHandle),
    Window(NativeWindowHandle),
}

impl<D: Driver, W: WindowFactory> Dx12ReplayConsumer<D, W> {
    /// Resolves the captured id of an external handle argument.
    pub fn pre_process_external_object(
        &mut self,
        object_id: u64,
        call: ApiCallId,
    ) -> Option<ExternalObject> {
        match call {
            ApiCallId::RegisterVideoMemoryBudgetChangeNotificationEvent => {
                self.event_object(object_id, false).map(ExternalObject::Event)
            }
            ApiCallId::MakeWindowAssociation => {
                self.native_window(object_id).map(ExternalObject::Window)
            }
            _ => {
                warn!(
                    call = call.name(),
                    ?call,
                    "skipping object handle mapping for unsupported external object type"
                );
                None
            }
        }
    }

    /// Handles returned by these calls are not needed by later calls; they are accepted without
    /// being recorded.
    pub fn post_process_external_object(
        &mut self,
        _replay_result: HResult,
        _object: Option<ExternalObject>,
        call: ApiCallId,
    ) {
        match call {
            ApiCallId::GetDc | ApiCallId::GetWindowAssociation | ApiCallId::GetHwnd => {}
            _ => warn!(
                call = call.name(),
                ?call,
                "skipping object handle mapping for unsupported external object type"
            ),
        }
    }

    /// `IDXGIFactory::MakeWindowAssociation` with the captured window id resolved to the
    /// replay window.
    pub fn make_window_association(
        &mut self,
        factory: CaptureId,
        hwnd_id: u64,
        flags: u32,
    ) -> HResult {
        let Some(factory) = self.map_object(factory) else {
            return HResult::E_INVALIDARG;
        };
        let window = match self.pre_process_external_object(hwnd_id, ApiCallId::MakeWindowAssociation)
        {
            Some(ExternalObject::Window(window)) => Some(window),
            _ => None,
        };
        self.driver.make_window_association(factory, window, flags)
    }
}
