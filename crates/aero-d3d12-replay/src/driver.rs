//! Boundary between the replay engine and the native graphics driver.
//!
//! The engine never talks to a GPU directly. Every native entry point it needs is a method on
//! [`Driver`], so the same engine can run against a real driver binding, the in-memory
//! [`crate::software::SoftwareDriver`], or a test double.
//!
//! Creation methods follow COM out-parameter semantics: a returned handle carries one reference
//! owned by the caller, which the object table mirrors as `ref_count = 1`.

use core::ops::Range;
use core::ptr::NonNull;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::handles::{EventHandle, NativeHandle, NativeWindowHandle};
use crate::hresult::HResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandListType {
    Direct,
    Bundle,
    Compute,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandQueueDesc {
    pub queue_type: CommandListType,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub node_mask: u32,
}

impl Default for CommandQueueDesc {
    fn default() -> Self {
        Self {
            queue_type: CommandListType::Direct,
            priority: 0,
            flags: 0,
            node_mask: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorHeapType {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

impl DescriptorHeapType {
    pub const COUNT: usize = 4;

    pub const fn index(self) -> usize {
        match self {
            Self::CbvSrvUav => 0,
            Self::Sampler => 1,
            Self::Rtv => 2,
            Self::Dsv => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorHeapDesc {
    pub heap_type: DescriptorHeapType,
    pub num_descriptors: u32,
    #[serde(default)]
    pub shader_visible: bool,
    #[serde(default)]
    pub node_mask: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Graphics,
    Compute,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub format: u32,
    pub buffer_count: u32,
    #[serde(default)]
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeapType {
    Default,
    Upload,
    Readback,
}

/// Buffer description. Only the properties the engine depends on are modelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDesc {
    pub width: u64,
    #[serde(default = "ResourceDesc::default_heap_type")]
    pub heap_type: HeapType,
}

impl ResourceDesc {
    fn default_heap_type() -> HeapType {
        HeapType::Upload
    }

    pub fn buffer(width: u64) -> Self {
        Self {
            width,
            heap_type: HeapType::Upload,
        }
    }
}

/// CPU-visible view of mapped GPU memory returned by [`Driver::map`].
///
/// The pointer stays valid until the matching [`Driver::unmap`] brings the subresource's map
/// count back to zero (or the resource is destroyed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRegion {
    pub ptr: NonNull<u8>,
    pub len: usize,
}

/// Outcome of a bounded CPU-side wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
    /// The OS wait itself failed with the given error code.
    Failed(u32),
}

pub trait Driver {
    fn add_ref(&mut self, object: NativeHandle) -> u32;
    fn release(&mut self, object: NativeHandle) -> u32;

    fn create_factory(&mut self, flags: u32) -> Result<NativeHandle, HResult>;
    fn create_device(
        &mut self,
        adapter: Option<NativeHandle>,
        minimum_feature_level: u32,
        debug_layer: bool,
    ) -> Result<NativeHandle, HResult>;
    fn create_command_queue(
        &mut self,
        device: NativeHandle,
        desc: &CommandQueueDesc,
    ) -> Result<NativeHandle, HResult>;
    fn create_fence(
        &mut self,
        device: NativeHandle,
        initial_value: u64,
        flags: u32,
    ) -> Result<NativeHandle, HResult>;
    fn create_descriptor_heap(
        &mut self,
        device: NativeHandle,
        desc: &DescriptorHeapDesc,
    ) -> Result<NativeHandle, HResult>;
    fn create_committed_resource(
        &mut self,
        device: NativeHandle,
        desc: &ResourceDesc,
    ) -> Result<NativeHandle, HResult>;
    fn create_command_list(
        &mut self,
        device: NativeHandle,
        list_type: CommandListType,
    ) -> Result<NativeHandle, HResult>;
    fn descriptor_handle_increment_size(
        &mut self,
        device: NativeHandle,
        heap_type: DescriptorHeapType,
    ) -> u32;
    fn cpu_descriptor_handle_for_heap_start(&mut self, heap: NativeHandle) -> u64;
    fn gpu_descriptor_handle_for_heap_start(&mut self, heap: NativeHandle) -> u64;
    fn create_pipeline_library(
        &mut self,
        device: NativeHandle,
        blob: &[u8],
    ) -> Result<NativeHandle, HResult>;
    fn load_pipeline(
        &mut self,
        library: NativeHandle,
        kind: PipelineKind,
        name: &str,
    ) -> Result<NativeHandle, HResult>;
    fn enqueue_make_resident(
        &mut self,
        device: NativeHandle,
        objects: &[NativeHandle],
        fence: Option<NativeHandle>,
        fence_value: u64,
    ) -> HResult;
    /// Creates a heap over host memory owned by the caller. The allocation must outlive the heap.
    fn open_existing_heap_from_address(
        &mut self,
        device: NativeHandle,
        allocation: &mut [u8],
    ) -> Result<NativeHandle, HResult>;
    fn check_feature_support(&mut self, device: NativeHandle, feature: u32, data: &mut [u8])
        -> HResult;

    fn resource_gpu_virtual_address(&mut self, resource: NativeHandle) -> u64;
    fn resource_width(&mut self, resource: NativeHandle) -> u64;
    /// Maps a subresource. `Ok(None)` means the call succeeded without producing a CPU pointer.
    fn map(
        &mut self,
        resource: NativeHandle,
        subresource: u32,
        read_range: Option<Range<u64>>,
    ) -> Result<Option<MappedRegion>, HResult>;
    fn unmap(&mut self, resource: NativeHandle, subresource: u32, written_range: Option<Range<u64>>);

    fn execute_command_lists(&mut self, queue: NativeHandle, command_lists: &[NativeHandle]);
    fn queue_signal(&mut self, queue: NativeHandle, fence: Option<NativeHandle>, value: u64)
        -> HResult;
    fn queue_wait(&mut self, queue: NativeHandle, fence: Option<NativeHandle>, value: u64)
        -> HResult;

    fn fence_completed_value(&mut self, fence: NativeHandle) -> u64;
    fn fence_signal(&mut self, fence: NativeHandle, value: u64) -> HResult;
    fn fence_set_event_on_completion(
        &mut self,
        fence: NativeHandle,
        value: u64,
        event: Option<EventHandle>,
    ) -> HResult;

    /// Creates a manual-reset event in the unsignaled state.
    fn create_event(&mut self) -> Option<EventHandle>;
    fn reset_event(&mut self, event: EventHandle);
    fn wait_event(&mut self, event: EventHandle, timeout: Duration) -> WaitStatus;
    fn close_event(&mut self, event: EventHandle);

    fn create_swapchain(
        &mut self,
        factory: NativeHandle,
        device: Option<NativeHandle>,
        window: NativeWindowHandle,
        desc: &SwapchainDesc,
    ) -> Result<NativeHandle, HResult>;
    fn swapchain_buffer(&mut self, swapchain: NativeHandle, index: u32)
        -> Result<NativeHandle, HResult>;
    fn resize_buffers(
        &mut self,
        swapchain: NativeHandle,
        buffer_count: u32,
        width: u32,
        height: u32,
        format: u32,
        flags: u32,
    ) -> HResult;
    #[allow(clippy::too_many_arguments)]
    fn resize_buffers1(
        &mut self,
        swapchain: NativeHandle,
        buffer_count: u32,
        width: u32,
        height: u32,
        format: u32,
        flags: u32,
        node_masks: &[u32],
        present_queues: &[NativeHandle],
    ) -> HResult;
    fn make_window_association(
        &mut self,
        factory: NativeHandle,
        window: Option<NativeWindowHandle>,
        flags: u32,
    ) -> HResult;
}
