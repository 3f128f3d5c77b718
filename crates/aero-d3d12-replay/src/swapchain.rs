//! Swap chains backed by replay-side windows.
//!
//! Captured swap chains were created for the application's own window. Replay creates a
//! window through the [`WindowFactory`], substitutes its native handle, and ties the window's
//! lifetime to the swap chain's object entry. Back buffers returned by `GetBuffer` are pinned
//! (`extra_ref`) while the swap chain owns them so application releases cannot tear them down.

use core::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::consumer::Dx12ReplayConsumer;
use crate::driver::{Driver, SwapchainDesc};
use crate::error::ReplayError;
use crate::handles::{CaptureId, NativeWindowHandle};
use crate::hresult::HResult;
use crate::object_table::Liveness;
use crate::window::{NativeHandleKind, Window, WindowFactory};

const DEFAULT_WINDOW_X: i32 = 0;
const DEFAULT_WINDOW_Y: i32 = 0;

/// The swap-chain creation entry points that route through [`Dx12ReplayConsumer::create_swapchain`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapchainCreateKind {
    /// `IDXGIFactory::CreateSwapChain`.
    #[default]
    Legacy,
    ForHwnd,
    ForCoreWindow,
    ForComposition,
}

impl SwapchainCreateKind {
    pub fn call_name(self) -> &'static str {
        match self {
            Self::Legacy => "IDXGIFactory::CreateSwapChain",
            Self::ForHwnd => "IDXGIFactory2::CreateSwapChainForHwnd",
            Self::ForCoreWindow => "IDXGIFactory2::CreateSwapChainForCoreWindow",
            Self::ForComposition => "IDXGIFactory2::CreateSwapChainForComposition",
        }
    }

    /// Whether the captured call carried a window handle that later calls may refer to.
    pub fn has_window_handle(self) -> bool {
        matches!(self, Self::Legacy | Self::ForHwnd)
    }
}

pub struct SwapchainInfo {
    pub window: Option<Box<dyn Window>>,
    /// Captured window handle id, 0 when the swap chain was not created for a window handle.
    pub hwnd_id: u64,
    pub native_window: NativeWindowHandle,
    /// Back buffer pinned per slot, if `GetBuffer` was called for it.
    pub images: Vec<Option<CaptureId>>,
}

impl fmt::Debug for SwapchainInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapchainInfo")
            .field("window_size", &self.window.as_ref().map(|w| w.size()))
            .field("hwnd_id", &self.hwnd_id)
            .field("native_window", &self.native_window)
            .field("images", &self.images)
            .finish()
    }
}

impl<D: Driver, W: WindowFactory> Dx12ReplayConsumer<D, W> {
    /// Creates a swap chain on a fresh replay window. The window is destroyed again if the
    /// driver call fails.
    #[allow(clippy::too_many_arguments)]
    pub fn create_swapchain(
        &mut self,
        kind: SwapchainCreateKind,
        factory: CaptureId,
        device: CaptureId,
        hwnd_id: u64,
        desc: &SwapchainDesc,
        out: CaptureId,
    ) -> HResult {
        let call = kind.call_name();
        let Some(factory) = self.map_object(factory) else {
            return HResult::E_INVALIDARG;
        };
        let device = self.map_object(device);

        let Some(window) = self.window_factory.create(
            DEFAULT_WINDOW_X,
            DEFAULT_WINDOW_Y,
            desc.width,
            desc.height,
        ) else {
            let err = ReplayError::WindowCreationFailed;
            error!(call, %err, "replay cannot continue");
            self.raise_fatal_error(&err.to_string());
            return HResult::E_FAIL;
        };
        let Some(native_window) = window.native_handle(NativeHandleKind::Win32Hwnd) else {
            error!(call, err = %ReplayError::WindowHandleUnavailable, "swap chain not created");
            self.window_factory.destroy(window);
            return HResult::E_FAIL;
        };

        let swapchain = match self
            .driver
            .create_swapchain(factory, device, native_window, desc)
        {
            Ok(swapchain) => swapchain,
            Err(hr) => {
                self.window_factory.destroy(window);
                return hr;
            }
        };
        if !self.add_object(out, swapchain) {
            self.window_factory.destroy(window);
            return HResult::S_OK;
        }

        let hwnd_id = if kind.has_window_handle() { hwnd_id } else { 0 };
        if hwnd_id != 0 {
            self.window_handles.insert(hwnd_id, native_window);
        }
        let info = SwapchainInfo {
            window: Some(window),
            hwnd_id,
            native_window,
            images: vec![None; desc.buffer_count as usize],
        };
        if let Err(err) = self
            .objects
            .lookup_mut(out)
            .and_then(|entry| entry.set_extra(info).map(|_| ()))
        {
            error!(capture_id = %out, %err, "failed to attach swap chain state");
        }
        debug!(capture_id = %out, ?native_window, hwnd_id, "swap chain created");
        HResult::S_OK
    }

    /// `IDXGISwapChain::GetBuffer`. The first acquisition of each slot pins the buffer.
    pub fn get_buffer(&mut self, swapchain: CaptureId, index: u32, out: CaptureId) -> HResult {
        let Some(swapchain_object) = self.map_object(swapchain) else {
            return HResult::E_INVALIDARG;
        };
        let buffer = match self.driver.swapchain_buffer(swapchain_object, index) {
            Ok(buffer) => buffer,
            Err(hr) => return hr,
        };
        self.add_object(out, buffer);

        let slot = match self.objects.extra_mut::<SwapchainInfo>(swapchain) {
            Ok(info) => info.images.get_mut(index as usize),
            Err(err) => {
                error!(capture_id = %swapchain, %err, "swap chain has no associated state");
                return HResult::S_OK;
            }
        };
        match slot {
            Some(slot) if slot.is_none() => {
                *slot = Some(out);
                if let Err(err) = self.objects.pin(out) {
                    error!(capture_id = %out, %err, "failed to pin back buffer");
                }
            }
            Some(_) => {}
            None => warn!(capture_id = %swapchain, index, "back buffer index outside the swap chain"),
        }
        HResult::S_OK
    }

    #[allow(clippy::too_many_arguments)]
    pub fn resize_buffers(
        &mut self,
        swapchain: CaptureId,
        buffer_count: u32,
        width: u32,
        height: u32,
        format: u32,
        flags: u32,
    ) -> HResult {
        let Some(object) = self.map_object(swapchain) else {
            return HResult::E_INVALIDARG;
        };
        let replay = self
            .driver
            .resize_buffers(object, buffer_count, width, height, format, flags);
        if replay.is_success() {
            self.reset_swapchain_images(swapchain, buffer_count, width, height);
        }
        replay
    }

    #[allow(clippy::too_many_arguments)]
    pub fn resize_buffers1(
        &mut self,
        swapchain: CaptureId,
        buffer_count: u32,
        width: u32,
        height: u32,
        format: u32,
        flags: u32,
        node_masks: &[u32],
        present_queues: &[CaptureId],
    ) -> HResult {
        let Some(object) = self.map_object(swapchain) else {
            return HResult::E_INVALIDARG;
        };
        let queues: Vec<_> = present_queues
            .iter()
            .filter_map(|&queue| self.map_object(queue))
            .collect();
        let replay = self.driver.resize_buffers1(
            object,
            buffer_count,
            width,
            height,
            format,
            flags,
            node_masks,
            &queues,
        );
        if replay.is_success() {
            self.reset_swapchain_images(swapchain, buffer_count, width, height);
        }
        replay
    }

    /// Drops every back-buffer pin, resizes the window and resets the slot table.
    fn reset_swapchain_images(
        &mut self,
        swapchain: CaptureId,
        buffer_count: u32,
        width: u32,
        height: u32,
    ) {
        let info = match self.objects.extra_mut::<SwapchainInfo>(swapchain) {
            Ok(info) => info,
            Err(err) => {
                error!(capture_id = %swapchain, %err, "swap chain has no associated state");
                return;
            }
        };
        // A buffer count of 0 keeps the current count.
        let slots = match buffer_count {
            0 => info.images.len(),
            count => count as usize,
        };
        let images = core::mem::replace(&mut info.images, vec![None; slots]);
        if let Some(window) = info.window.as_mut() {
            window.set_size(width, height);
        }

        let unreferenced = self.release_swapchain_images(images);
        self.remove_objects(unreferenced);
    }

    /// Unpins back buffers; returns the ones left with no references at all.
    fn release_swapchain_images(&mut self, images: Vec<Option<CaptureId>>) -> Vec<CaptureId> {
        let mut unreferenced = Vec::new();
        for image in images.into_iter().flatten() {
            match self.objects.unpin(image) {
                Ok(Liveness::Unreferenced) => unreferenced.push(image),
                Ok(Liveness::Alive) => {}
                Err(err) => debug!(capture_id = %image, %err, "back buffer was not pinned"),
            }
        }
        unreferenced
    }

    /// Tears down swap chain state: unpins back buffers when asked to, destroys the window and
    /// forgets the window handle association. Returns back buffers that must now be removed.
    pub(crate) fn destroy_swapchain_info(
        &mut self,
        mut info: SwapchainInfo,
        release_extra_refs: bool,
    ) -> Vec<CaptureId> {
        let unreferenced = if release_extra_refs {
            self.release_swapchain_images(core::mem::take(&mut info.images))
        } else {
            Vec::new()
        };
        if let Some(window) = info.window.take() {
            self.window_factory.destroy(window);
        }
        if info.hwnd_id != 0 {
            self.window_handles.remove(&info.hwnd_id);
        }
        unreferenced
    }

    /// Replay window handle for a captured window handle id.
    pub fn native_window(&self, hwnd_id: u64) -> Option<NativeWindowHandle> {
        self.window_handles.get(&hwnd_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::options::ReplayOptions;
    use crate::software::{FailPoint, SoftwareDriver};
    use crate::window::HeadlessWindowFactory;

    const FACTORY: CaptureId = CaptureId(1);
    const DEVICE: CaptureId = CaptureId(2);
    const SWAPCHAIN: CaptureId = CaptureId(3);

    fn desc() -> SwapchainDesc {
        SwapchainDesc {
            width: 320,
            height: 240,
            format: 28,
            buffer_count: 2,
            flags: 0,
        }
    }

    fn consumer() -> Dx12ReplayConsumer<SoftwareDriver, HeadlessWindowFactory> {
        let mut consumer = Dx12ReplayConsumer::new(
            SoftwareDriver::new(),
            HeadlessWindowFactory::new(),
            ReplayOptions::default(),
        );
        assert_eq!(consumer.create_factory(0, FACTORY), HResult::S_OK);
        assert_eq!(consumer.create_device(CaptureId::NULL, 0xb000, DEVICE), HResult::S_OK);
        consumer
    }

    #[test]
    fn failed_creation_destroys_the_window() {
        let mut consumer = consumer();
        consumer
            .driver_mut()
            .fail_next(FailPoint::CreateSwapchain, HResult::DXGI_ERROR_INVALID_CALL);

        let hr = consumer.create_swapchain(
            SwapchainCreateKind::ForHwnd,
            FACTORY,
            DEVICE,
            0x77,
            &desc(),
            SWAPCHAIN,
        );
        assert_eq!(hr, HResult::DXGI_ERROR_INVALID_CALL);
        assert_eq!(consumer.window_factory().created_windows(), 1);
        assert_eq!(consumer.window_factory().live_windows(), 0);
        assert!(consumer.native_window(0x77).is_none());
        assert!(consumer.object(SWAPCHAIN).is_none());
    }

    #[test]
    fn window_creation_failure_is_reported() {
        let mut consumer = Dx12ReplayConsumer::new(
            SoftwareDriver::new(),
            {
                let mut factory = HeadlessWindowFactory::new();
                factory.fail_creation(true);
                factory
            },
            ReplayOptions::default(),
        );
        let messages = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&messages);
        consumer.set_fatal_error_handler(move |msg| sink.borrow_mut().push(msg.to_string()));
        consumer.create_factory(0, FACTORY);
        let hr = consumer.create_swapchain(
            SwapchainCreateKind::Legacy,
            FACTORY,
            CaptureId::NULL,
            0x77,
            &desc(),
            SWAPCHAIN,
        );
        assert_eq!(hr, HResult::E_FAIL);
        assert!(consumer.object(SWAPCHAIN).is_none());
        assert_eq!(*messages.borrow(), vec!["failed to create a window".to_string()]);
    }

    #[test]
    fn core_window_swapchains_record_no_window_association() {
        let mut consumer = consumer();
        let hr = consumer.create_swapchain(
            SwapchainCreateKind::ForCoreWindow,
            FACTORY,
            DEVICE,
            0x77,
            &desc(),
            SWAPCHAIN,
        );
        assert_eq!(hr, HResult::S_OK);
        assert!(consumer.native_window(0x77).is_none());
        assert_eq!(consumer.window_factory().live_windows(), 1);
    }

    #[test]
    fn resize_buffers1_resets_slots_and_window_size() {
        let mut consumer = consumer();
        consumer.create_swapchain(
            SwapchainCreateKind::ForHwnd,
            FACTORY,
            DEVICE,
            0x77,
            &desc(),
            SWAPCHAIN,
        );
        let buffer = CaptureId(10);
        assert_eq!(consumer.get_buffer(SWAPCHAIN, 1, buffer), HResult::S_OK);
        consumer.release(buffer);
        assert!(consumer.object(buffer).is_some());

        let hr = consumer.resize_buffers1(SWAPCHAIN, 3, 640, 480, 28, 0, &[1, 1, 1], &[]);
        assert_eq!(hr, HResult::S_OK);
        assert!(consumer.object(buffer).is_none());

        let info = consumer.objects().extra::<SwapchainInfo>(SWAPCHAIN).unwrap();
        assert_eq!(info.images, vec![None, None, None]);
        assert_eq!(info.window.as_ref().unwrap().size(), (640, 480));
    }
}
