//! Replay of already-decoded call scripts.
//!
//! A [`ReplayScript`] is a JSON list of calls in capture order. Each [`ReplayCall`] names the
//! capture ids it operates on and, where the engine compares against it, the result code the
//! application observed at capture time.

use core::ops::Range;
use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace};

use crate::consumer::{Dx12ReplayConsumer, FenceState};
use crate::driver::{
    CommandListType, CommandQueueDesc, DescriptorHeapDesc, DescriptorHeapType, Driver,
    PipelineKind, ResourceDesc, SwapchainDesc,
};
use crate::handles::CaptureId;
use crate::hresult::HResult;
use crate::options::ReplayOptions;
use crate::software::SoftwareDriver;
use crate::swapchain::SwapchainCreateKind;
use crate::window::{HeadlessWindowFactory, WindowFactory};

/// `D3D_FEATURE_LEVEL_11_0`.
const DEFAULT_FEATURE_LEVEL: u32 = 0xb000;

fn default_feature_level() -> u32 {
    DEFAULT_FEATURE_LEVEL
}

fn default_list_type() -> CommandListType {
    CommandListType::Direct
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ReplayCall {
    CreateFactory {
        #[serde(default)]
        flags: u32,
        out: CaptureId,
    },
    CreateDevice {
        #[serde(default)]
        adapter: CaptureId,
        #[serde(default = "default_feature_level")]
        minimum_feature_level: u32,
        out: CaptureId,
        #[serde(default)]
        result: HResult,
    },
    CreateCommandQueue {
        device: CaptureId,
        #[serde(default)]
        desc: CommandQueueDesc,
        out: CaptureId,
        #[serde(default)]
        result: HResult,
    },
    CreateFence {
        device: CaptureId,
        #[serde(default)]
        initial_value: u64,
        #[serde(default)]
        flags: u32,
        out: CaptureId,
        #[serde(default)]
        result: HResult,
    },
    CreateDescriptorHeap {
        device: CaptureId,
        desc: DescriptorHeapDesc,
        out: CaptureId,
        #[serde(default)]
        result: HResult,
    },
    CreateCommittedResource {
        device: CaptureId,
        desc: ResourceDesc,
        out: CaptureId,
        #[serde(default)]
        result: HResult,
    },
    CreateCommandList {
        device: CaptureId,
        #[serde(default = "default_list_type")]
        list_type: CommandListType,
        out: CaptureId,
        #[serde(default)]
        result: HResult,
    },
    GetDescriptorHandleIncrementSize {
        device: CaptureId,
        heap_type: DescriptorHeapType,
    },
    GetCpuDescriptorHandleForHeapStart {
        heap: CaptureId,
    },
    GetGpuDescriptorHandleForHeapStart {
        heap: CaptureId,
    },
    GetGpuVirtualAddress {
        resource: CaptureId,
        address: u64,
    },
    /// Captured GPU virtual addresses embedded in a later call's arguments.
    TranslateGpuVirtualAddresses {
        addresses: Vec<u64>,
    },
    CreatePipelineLibrary {
        device: CaptureId,
        #[serde(default)]
        blob: Vec<u8>,
        out: CaptureId,
        #[serde(default)]
        result: HResult,
    },
    LoadPipeline {
        library: CaptureId,
        kind: PipelineKind,
        name: String,
        out: CaptureId,
        #[serde(default)]
        result: HResult,
    },
    CheckFeatureSupport {
        device: CaptureId,
        feature: u32,
        #[serde(default)]
        data_size: usize,
        #[serde(default)]
        result: HResult,
    },
    EnqueueMakeResident {
        device: CaptureId,
        #[serde(default)]
        objects: Vec<CaptureId>,
        fence: CaptureId,
        fence_value: u64,
        #[serde(default)]
        result: HResult,
    },
    CreateHeapAllocation {
        allocation_id: u64,
        size: u64,
    },
    OpenExistingHeapFromAddress {
        device: CaptureId,
        allocation_id: u64,
        out: CaptureId,
        #[serde(default)]
        result: HResult,
    },
    Map {
        resource: CaptureId,
        #[serde(default)]
        subresource: u32,
        #[serde(default)]
        read_range: Option<Range<u64>>,
        memory_id: u64,
        #[serde(default)]
        result: HResult,
    },
    Unmap {
        resource: CaptureId,
        #[serde(default)]
        subresource: u32,
        #[serde(default)]
        written_range: Option<Range<u64>>,
    },
    FillMemory {
        memory_id: u64,
        #[serde(default)]
        offset: u64,
        data: Vec<u8>,
    },
    ExecuteCommandLists {
        queue: CaptureId,
        command_lists: Vec<CaptureId>,
    },
    QueueSignal {
        queue: CaptureId,
        fence: CaptureId,
        value: u64,
        #[serde(default)]
        result: HResult,
    },
    QueueWait {
        queue: CaptureId,
        fence: CaptureId,
        value: u64,
        #[serde(default)]
        result: HResult,
    },
    FenceSignal {
        fence: CaptureId,
        value: u64,
        #[serde(default)]
        result: HResult,
    },
    SetEventOnCompletion {
        fence: CaptureId,
        value: u64,
        event_id: u64,
        #[serde(default)]
        result: HResult,
    },
    GetCompletedValue {
        fence: CaptureId,
        value: u64,
    },
    AddRef {
        object: CaptureId,
    },
    Release {
        object: CaptureId,
    },
    CreateSwapchain {
        #[serde(default)]
        kind: SwapchainCreateKind,
        factory: CaptureId,
        #[serde(default)]
        device: CaptureId,
        #[serde(default)]
        hwnd_id: u64,
        desc: SwapchainDesc,
        out: CaptureId,
        #[serde(default)]
        result: HResult,
    },
    GetBuffer {
        swapchain: CaptureId,
        index: u32,
        out: CaptureId,
        #[serde(default)]
        result: HResult,
    },
    ResizeBuffers {
        swapchain: CaptureId,
        buffer_count: u32,
        width: u32,
        height: u32,
        #[serde(default)]
        format: u32,
        #[serde(default)]
        flags: u32,
        #[serde(default)]
        result: HResult,
    },
    ResizeBuffers1 {
        swapchain: CaptureId,
        buffer_count: u32,
        width: u32,
        height: u32,
        #[serde(default)]
        format: u32,
        #[serde(default)]
        flags: u32,
        #[serde(default)]
        node_masks: Vec<u32>,
        #[serde(default)]
        present_queues: Vec<CaptureId>,
        #[serde(default)]
        result: HResult,
    },
    MakeWindowAssociation {
        factory: CaptureId,
        hwnd_id: u64,
        #[serde(default)]
        flags: u32,
        #[serde(default)]
        result: HResult,
    },
}

impl ReplayCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateFactory { .. } => "CreateDXGIFactory2",
            Self::CreateDevice { .. } => "D3D12CreateDevice",
            Self::CreateCommandQueue { .. } => "ID3D12Device::CreateCommandQueue",
            Self::CreateFence { .. } => "ID3D12Device::CreateFence",
            Self::CreateDescriptorHeap { .. } => "ID3D12Device::CreateDescriptorHeap",
            Self::CreateCommittedResource { .. } => "ID3D12Device::CreateCommittedResource",
            Self::CreateCommandList { .. } => "ID3D12Device::CreateCommandList",
            Self::GetDescriptorHandleIncrementSize { .. } => {
                "ID3D12Device::GetDescriptorHandleIncrementSize"
            }
            Self::GetCpuDescriptorHandleForHeapStart { .. } => {
                "ID3D12DescriptorHeap::GetCPUDescriptorHandleForHeapStart"
            }
            Self::GetGpuDescriptorHandleForHeapStart { .. } => {
                "ID3D12DescriptorHeap::GetGPUDescriptorHandleForHeapStart"
            }
            Self::GetGpuVirtualAddress { .. } => "ID3D12Resource::GetGPUVirtualAddress",
            Self::TranslateGpuVirtualAddresses { .. } => "TranslateGpuVirtualAddresses",
            Self::CreatePipelineLibrary { .. } => "ID3D12Device1::CreatePipelineLibrary",
            Self::LoadPipeline { .. } => "ID3D12PipelineLibrary::LoadPipeline",
            Self::CheckFeatureSupport { .. } => "ID3D12Device::CheckFeatureSupport",
            Self::EnqueueMakeResident { .. } => "ID3D12Device3::EnqueueMakeResident",
            Self::CreateHeapAllocation { .. } => "CreateHeapAllocation",
            Self::OpenExistingHeapFromAddress { .. } => {
                "ID3D12Device3::OpenExistingHeapFromAddress"
            }
            Self::Map { .. } => "ID3D12Resource::Map",
            Self::Unmap { .. } => "ID3D12Resource::Unmap",
            Self::FillMemory { .. } => "FillMemory",
            Self::ExecuteCommandLists { .. } => "ID3D12CommandQueue::ExecuteCommandLists",
            Self::QueueSignal { .. } => "ID3D12CommandQueue::Signal",
            Self::QueueWait { .. } => "ID3D12CommandQueue::Wait",
            Self::FenceSignal { .. } => "ID3D12Fence::Signal",
            Self::SetEventOnCompletion { .. } => "ID3D12Fence::SetEventOnCompletion",
            Self::GetCompletedValue { .. } => "ID3D12Fence::GetCompletedValue",
            Self::AddRef { .. } => "IUnknown::AddRef",
            Self::Release { .. } => "IUnknown::Release",
            Self::CreateSwapchain { kind, .. } => kind.call_name(),
            Self::GetBuffer { .. } => "IDXGISwapChain::GetBuffer",
            Self::ResizeBuffers { .. } => "IDXGISwapChain::ResizeBuffers",
            Self::ResizeBuffers1 { .. } => "IDXGISwapChain3::ResizeBuffers1",
            Self::MakeWindowAssociation { .. } => "IDXGIFactory::MakeWindowAssociation",
        }
    }
}

impl<D: Driver, W: WindowFactory> Dx12ReplayConsumer<D, W> {
    /// Replays one call. Calls that produce a result code have it compared with the captured
    /// one; the replay-time code is returned.
    pub fn dispatch(&mut self, call: &ReplayCall) -> Option<HResult> {
        trace!(call = call.name(), "dispatch");
        let (capture, replay) = match call {
            ReplayCall::CreateFactory { flags, out } => {
                (HResult::S_OK, self.create_factory(*flags, *out))
            }
            ReplayCall::CreateDevice {
                adapter,
                minimum_feature_level,
                out,
                result,
            } => (
                *result,
                self.create_device(*adapter, *minimum_feature_level, *out),
            ),
            ReplayCall::CreateCommandQueue {
                device,
                desc,
                out,
                result,
            } => (*result, self.create_command_queue(*device, desc, *out)),
            ReplayCall::CreateFence {
                device,
                initial_value,
                flags,
                out,
                result,
            } => (
                *result,
                self.create_fence(*device, *initial_value, *flags, *out),
            ),
            ReplayCall::CreateDescriptorHeap {
                device,
                desc,
                out,
                result,
            } => (*result, self.create_descriptor_heap(*device, desc, *out)),
            ReplayCall::CreateCommittedResource {
                device,
                desc,
                out,
                result,
            } => (*result, self.create_committed_resource(*device, desc, *out)),
            ReplayCall::CreateCommandList {
                device,
                list_type,
                out,
                result,
            } => (*result, self.create_command_list(*device, *list_type, *out)),
            ReplayCall::GetDescriptorHandleIncrementSize { device, heap_type } => {
                let size = self.get_descriptor_handle_increment_size(*device, *heap_type);
                debug!(capture_id = %device, ?heap_type, size, "descriptor increment");
                return None;
            }
            ReplayCall::GetCpuDescriptorHandleForHeapStart { heap } => {
                self.get_cpu_descriptor_handle_for_heap_start(*heap);
                return None;
            }
            ReplayCall::GetGpuDescriptorHandleForHeapStart { heap } => {
                self.get_gpu_descriptor_handle_for_heap_start(*heap);
                return None;
            }
            ReplayCall::GetGpuVirtualAddress { resource, address } => {
                self.get_gpu_virtual_address(*resource, *address);
                return None;
            }
            ReplayCall::TranslateGpuVirtualAddresses { addresses } => {
                let mut addresses = addresses.clone();
                self.map_gpu_virtual_addresses(&mut addresses);
                return None;
            }
            ReplayCall::CreatePipelineLibrary {
                device,
                blob,
                out,
                result,
            } => (
                *result,
                self.create_pipeline_library(*device, blob, *out, *result),
            ),
            ReplayCall::LoadPipeline {
                library,
                kind,
                name,
                out,
                result,
            } => (
                *result,
                self.load_pipeline(*library, *kind, name, *out, *result),
            ),
            ReplayCall::CheckFeatureSupport {
                device,
                feature,
                data_size,
                result,
            } => {
                let mut data = vec![0u8; *data_size];
                // Compared inside the override.
                return Some(self.check_feature_support(*device, *feature, &mut data, *result));
            }
            ReplayCall::EnqueueMakeResident {
                device,
                objects,
                fence,
                fence_value,
                result,
            } => (
                *result,
                self.enqueue_make_resident(*device, objects, *fence, *fence_value),
            ),
            ReplayCall::CreateHeapAllocation {
                allocation_id,
                size,
            } => {
                self.process_create_heap_allocation_command(*allocation_id, *size);
                return None;
            }
            ReplayCall::OpenExistingHeapFromAddress {
                device,
                allocation_id,
                out,
                result,
            } => (
                *result,
                self.open_existing_heap_from_address(*device, *allocation_id, *out),
            ),
            ReplayCall::Map {
                resource,
                subresource,
                read_range,
                memory_id,
                result,
            } => (
                *result,
                self.map_resource(*resource, *subresource, read_range.clone(), *memory_id),
            ),
            ReplayCall::Unmap {
                resource,
                subresource,
                written_range,
            } => {
                self.unmap_resource(*resource, *subresource, written_range.clone());
                return None;
            }
            ReplayCall::FillMemory {
                memory_id,
                offset,
                data,
            } => {
                self.process_fill_memory_command(*memory_id, *offset, data);
                return None;
            }
            ReplayCall::ExecuteCommandLists {
                queue,
                command_lists,
            } => {
                self.execute_command_lists(*queue, command_lists);
                return None;
            }
            ReplayCall::QueueSignal {
                queue,
                fence,
                value,
                result,
            } => (*result, self.queue_signal(*queue, *fence, *value, *result)),
            ReplayCall::QueueWait {
                queue,
                fence,
                value,
                result,
            } => (*result, self.queue_wait(*queue, *fence, *value, *result)),
            ReplayCall::FenceSignal {
                fence,
                value,
                result,
            } => (*result, self.fence_signal(*fence, *value, *result)),
            ReplayCall::SetEventOnCompletion {
                fence,
                value,
                event_id,
                result,
            } => (
                *result,
                self.fence_set_event_on_completion(*fence, *value, *event_id, *result),
            ),
            ReplayCall::GetCompletedValue { fence, value } => {
                self.fence_get_completed_value(*fence, *value);
                return None;
            }
            ReplayCall::AddRef { object } => {
                self.add_ref(*object);
                return None;
            }
            ReplayCall::Release { object } => {
                self.release(*object);
                return None;
            }
            ReplayCall::CreateSwapchain {
                kind,
                factory,
                device,
                hwnd_id,
                desc,
                out,
                result,
            } => (
                *result,
                self.create_swapchain(*kind, *factory, *device, *hwnd_id, desc, *out),
            ),
            ReplayCall::GetBuffer {
                swapchain,
                index,
                out,
                result,
            } => (*result, self.get_buffer(*swapchain, *index, *out)),
            ReplayCall::ResizeBuffers {
                swapchain,
                buffer_count,
                width,
                height,
                format,
                flags,
                result,
            } => (
                *result,
                self.resize_buffers(*swapchain, *buffer_count, *width, *height, *format, *flags),
            ),
            ReplayCall::ResizeBuffers1 {
                swapchain,
                buffer_count,
                width,
                height,
                format,
                flags,
                node_masks,
                present_queues,
                result,
            } => (
                *result,
                self.resize_buffers1(
                    *swapchain,
                    *buffer_count,
                    *width,
                    *height,
                    *format,
                    *flags,
                    node_masks,
                    present_queues,
                ),
            ),
            ReplayCall::MakeWindowAssociation {
                factory,
                hwnd_id,
                flags,
                result,
            } => (
                *result,
                self.make_window_association(*factory, *hwnd_id, *flags),
            ),
        };
        self.check_replay_result(call.name(), capture, replay);
        Some(replay)
    }
}

/// A decoded capture: options recorded with it plus the calls in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayScript {
    #[serde(default)]
    pub options: Option<ReplayOptions>,
    pub calls: Vec<ReplayCall>,
}

impl ReplayScript {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub calls_dispatched: usize,
    /// Message passed to the fatal-error sink, if replay had to stop.
    pub fatal_error: Option<String>,
    pub fences: Vec<FenceState>,
    /// Objects still alive in the registry before shutdown.
    pub live_objects: usize,
}

/// Replays `script` against the in-memory driver and a headless window factory. Dispatch stops
/// at the first fatal error.
pub fn replay_software(script: &ReplayScript, options: ReplayOptions) -> ReplaySummary {
    let mut consumer = Dx12ReplayConsumer::new(
        SoftwareDriver::new(),
        HeadlessWindowFactory::new(),
        options,
    );
    let fatal = Rc::new(RefCell::new(None::<String>));
    let sink = Rc::clone(&fatal);
    consumer.set_fatal_error_handler(move |message| {
        sink.borrow_mut().get_or_insert_with(|| message.to_string());
    });

    let mut calls_dispatched = 0;
    for call in &script.calls {
        consumer.dispatch(call);
        calls_dispatched += 1;
        if fatal.borrow().is_some() {
            error!(call = call.name(), calls_dispatched, "fatal error, stopping replay");
            break;
        }
    }

    let summary = ReplaySummary {
        calls_dispatched,
        fatal_error: fatal.borrow().clone(),
        fences: consumer.fence_states(),
        live_objects: consumer.objects().len(),
    };
    consumer.shutdown();
    info!(
        calls = summary.calls_dispatched,
        live_objects = summary.live_objects,
        "replay finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn calls_parse_with_defaulted_results() {
        let script = ReplayScript::from_json(
            r#"{
                "calls": [
                    { "call": "create_device", "out": 1 },
                    { "call": "fence_signal", "fence": 2, "value": 3, "result": -2147467259 }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            script.calls,
            vec![
                ReplayCall::CreateDevice {
                    adapter: CaptureId::NULL,
                    minimum_feature_level: DEFAULT_FEATURE_LEVEL,
                    out: CaptureId(1),
                    result: HResult::S_OK,
                },
                ReplayCall::FenceSignal {
                    fence: CaptureId(2),
                    value: 3,
                    result: HResult::E_FAIL,
                },
            ]
        );
        assert!(script.options.is_none());
    }

    #[test]
    fn unknown_calls_are_rejected() {
        assert!(ReplayScript::from_json(r#"{ "calls": [ { "call": "present" } ] }"#).is_err());
    }

    #[test]
    fn fence_signal_failed_at_capture_keeps_its_result() {
        let mut consumer = Dx12ReplayConsumer::new(
            SoftwareDriver::new(),
            HeadlessWindowFactory::new(),
            ReplayOptions::default(),
        );
        consumer.dispatch(&ReplayCall::CreateDevice {
            adapter: CaptureId::NULL,
            minimum_feature_level: DEFAULT_FEATURE_LEVEL,
            out: CaptureId(1),
            result: HResult::S_OK,
        });
        consumer.dispatch(&ReplayCall::CreateFence {
            device: CaptureId(1),
            initial_value: 0,
            flags: 0,
            out: CaptureId(2),
            result: HResult::S_OK,
        });
        let replay = consumer.dispatch(&ReplayCall::FenceSignal {
            fence: CaptureId(2),
            value: 9,
            result: HResult::E_FAIL,
        });
        assert_eq!(replay, Some(HResult::E_FAIL));
        assert_eq!(consumer.fence_states()[0].last_signaled_value, 0);
    }

    #[test]
    fn replay_stops_at_the_first_fatal_error() {
        let script = ReplayScript {
            options: None,
            calls: vec![
                ReplayCall::TranslateGpuVirtualAddresses {
                    addresses: vec![0xdead_0000],
                },
                ReplayCall::CreateDevice {
                    adapter: CaptureId::NULL,
                    minimum_feature_level: DEFAULT_FEATURE_LEVEL,
                    out: CaptureId(1),
                    result: HResult::S_OK,
                },
            ],
        };
        let summary = replay_software(&script, ReplayOptions::default());
        assert_eq!(summary.calls_dispatched, 1);
        assert!(summary.fatal_error.is_some());
        assert_eq!(summary.live_objects, 0);
    }
}
