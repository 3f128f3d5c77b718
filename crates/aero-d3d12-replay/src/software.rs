//! In-memory [`Driver`] used for headless replays and tests.
//!
//! Every object is a reference-counted entry in a hash map. GPU work completes as soon as it is
//! able to: fence signals and residency requests move the fence's completed value immediately
//! and fire any completion events registered at or below it. A queue `Wait` on a value the fence
//! has not reached holds back the signals submitted after it on the same queue until the value
//! is reached, and that held work outlives the queue object. Waits on events never block; an
//! unsignaled event reports [`WaitStatus::TimedOut`].

use core::ops::Range;
use core::ptr::NonNull;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tracing::trace;

use crate::driver::{
    CommandListType, CommandQueueDesc, DescriptorHeapDesc, DescriptorHeapType, Driver, HeapType,
    MappedRegion, PipelineKind, ResourceDesc, SwapchainDesc, WaitStatus,
};
use crate::handles::{EventHandle, NativeHandle, NativeWindowHandle};
use crate::hresult::HResult;

const DESCRIPTOR_INCREMENTS: [u32; DescriptorHeapType::COUNT] = [32, 32, 8, 8];
const CPU_DESCRIPTOR_BASE: u64 = 0x0001_0000;
const GPU_DESCRIPTOR_BASE: u64 = 0xd000_0000_0000;
const GPU_VA_BASE: u64 = 0x0001_0000_0000;
const GPU_VA_ALIGNMENT: u64 = 0x1_0000;
/// Largest buffer the software driver backs with host memory.
const MAX_RESOURCE_BYTES: u64 = 256 * 1024 * 1024;
/// `ERROR_INVALID_HANDLE`.
const ERROR_INVALID_HANDLE: u32 = 6;

/// Driver entry points whose next call can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateFactory,
    CreateDevice,
    CreateCommandQueue,
    CreateFence,
    CreateDescriptorHeap,
    CreateCommittedResource,
    CreatePipelineLibrary,
    CreateEvent,
    CreateSwapchain,
    ResizeBuffers,
    QueueSignal,
    QueueWait,
    FenceSignal,
    Map,
    OpenExistingHeap,
    CheckFeatureSupport,
}

/// Queue-level work in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOp {
    Execute {
        queue: NativeHandle,
        command_lists: Vec<NativeHandle>,
    },
    Signal {
        queue: NativeHandle,
        fence: NativeHandle,
        value: u64,
    },
    Wait {
        queue: NativeHandle,
        fence: NativeHandle,
        value: u64,
    },
}

/// Queue work held behind an unresolved wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeldWork {
    Wait { fence: NativeHandle, value: u64 },
    Signal { fence: NativeHandle, value: u64 },
}

#[derive(Debug)]
enum ObjectKind {
    Factory {
        flags: u32,
    },
    Device,
    CommandQueue,
    CommandList,
    Fence {
        completed: u64,
        events: Vec<(u64, EventHandle)>,
    },
    DescriptorHeap {
        cpu_start: u64,
        gpu_start: u64,
    },
    Resource {
        gpu_va: u64,
        data: Box<[u8]>,
        mappable: bool,
        map_count: u32,
    },
    Heap,
    PipelineLibrary,
    Pipeline,
    Swapchain {
        buffers: Vec<NativeHandle>,
    },
}

#[derive(Debug)]
struct SoftObject {
    refs: u32,
    kind: ObjectKind,
}

#[derive(Debug)]
pub struct SoftwareDriver {
    next_handle: u64,
    next_event: u64,
    next_gpu_va: u64,
    next_descriptor: u64,
    objects: HashMap<NativeHandle, SoftObject>,
    /// Signaled state per open event.
    events: HashMap<EventHandle, bool>,
    waited: Vec<EventHandle>,
    queue_ops: Vec<QueueOp>,
    held_work: HashMap<NativeHandle, VecDeque<HeldWork>>,
    failures: HashMap<FailPoint, HResult>,
    reopened_heap: Option<NativeHandle>,
    debug_layer: bool,
}

impl Default for SoftwareDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDriver {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            next_event: 1,
            next_gpu_va: GPU_VA_BASE,
            next_descriptor: 0,
            objects: HashMap::new(),
            events: HashMap::new(),
            waited: Vec::new(),
            queue_ops: Vec::new(),
            held_work: HashMap::new(),
            failures: HashMap::new(),
            reopened_heap: None,
            debug_layer: false,
        }
    }

    /// Makes the next call through `point` fail with `hr`.
    pub fn fail_next(&mut self, point: FailPoint, hr: HResult) {
        self.failures.insert(point, hr);
    }

    /// Makes the next `OpenExistingHeapFromAddress` hand out another reference to `heap`.
    pub fn reopen_heap_next(&mut self, heap: NativeHandle) {
        self.reopened_heap = Some(heap);
    }

    /// Events passed to [`Driver::wait_event`], in call order.
    pub fn waited_events(&self) -> &[EventHandle] {
        &self.waited
    }

    pub fn queue_ops(&self) -> &[QueueOp] {
        &self.queue_ops
    }

    /// Number of waits and signals the queue still holds back.
    pub fn held_queue_work(&self, queue: NativeHandle) -> usize {
        self.held_work.get(&queue).map_or(0, VecDeque::len)
    }

    pub fn debug_layer_requested(&self) -> bool {
        self.debug_layer
    }

    pub fn factory_flags(&self, factory: NativeHandle) -> Option<u32> {
        match self.objects.get(&factory)?.kind {
            ObjectKind::Factory { flags } => Some(flags),
            _ => None,
        }
    }

    pub fn is_live(&self, object: NativeHandle) -> bool {
        self.objects.contains_key(&object)
    }

    pub fn ref_count(&self, object: NativeHandle) -> Option<u32> {
        self.objects.get(&object).map(|obj| obj.refs)
    }

    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn live_events(&self) -> usize {
        self.events.len()
    }

    pub fn event_signaled(&self, event: EventHandle) -> Option<bool> {
        self.events.get(&event).copied()
    }

    pub fn fence_value(&self, fence: NativeHandle) -> Option<u64> {
        match self.objects.get(&fence)?.kind {
            ObjectKind::Fence { completed, .. } => Some(completed),
            _ => None,
        }
    }

    /// Host copy of a buffer's contents.
    pub fn resource_contents(&self, resource: NativeHandle) -> Option<&[u8]> {
        match &self.objects.get(&resource)?.kind {
            ObjectKind::Resource { data, .. } => Some(data),
            _ => None,
        }
    }

    fn take_failure(&mut self, point: FailPoint) -> Result<(), HResult> {
        match self.failures.remove(&point) {
            Some(hr) => Err(hr),
            None => Ok(()),
        }
    }

    fn alloc(&mut self, kind: ObjectKind) -> NativeHandle {
        let handle = NativeHandle(self.next_handle);
        self.next_handle += 1;
        self.objects.insert(handle, SoftObject { refs: 1, kind });
        handle
    }

    fn is_kind(&self, object: NativeHandle, pred: fn(&ObjectKind) -> bool) -> bool {
        self.objects
            .get(&object)
            .is_some_and(|obj| pred(&obj.kind))
    }

    fn require_device(&self, device: NativeHandle) -> Result<(), HResult> {
        if self.is_kind(device, |kind| matches!(kind, ObjectKind::Device)) {
            Ok(())
        } else {
            Err(HResult::E_INVALIDARG)
        }
    }

    /// Moves a fence forward and fires the completion events it passed.
    fn complete_fence(&mut self, fence: NativeHandle, value: u64) -> HResult {
        let Some(SoftObject {
            kind: ObjectKind::Fence { completed, events },
            ..
        }) = self.objects.get_mut(&fence)
        else {
            return HResult::E_INVALIDARG;
        };
        *completed = (*completed).max(value);
        let completed = *completed;
        let mut fired = Vec::new();
        events.retain(|&(target, event)| {
            if target <= completed {
                fired.push(event);
                false
            } else {
                true
            }
        });
        for event in fired {
            if let Some(signaled) = self.events.get_mut(&event) {
                *signaled = true;
            }
        }
        HResult::S_OK
    }

    fn is_fence(&self, fence: NativeHandle) -> bool {
        self.is_kind(fence, |kind| matches!(kind, ObjectKind::Fence { .. }))
    }

    /// Completes a fence, then lets every queue run as far as its waits now allow.
    fn signal_and_run_queues(&mut self, fence: NativeHandle, value: u64) -> HResult {
        let hr = self.complete_fence(fence, value);
        if hr.is_success() {
            self.run_held_work();
        }
        hr
    }

    fn run_held_work(&mut self) {
        loop {
            let mut progressed = false;
            let queues: Vec<_> = self.held_work.keys().copied().collect();
            for queue in queues {
                while let Some(work) = self
                    .held_work
                    .get(&queue)
                    .and_then(|held| held.front().copied())
                {
                    match work {
                        HeldWork::Wait { fence, value } => {
                            if self.fence_value(fence).unwrap_or(0) < value {
                                break;
                            }
                        }
                        HeldWork::Signal { fence, value } => {
                            self.complete_fence(fence, value);
                        }
                    }
                    if let Some(held) = self.held_work.get_mut(&queue) {
                        held.pop_front();
                    }
                    progressed = true;
                }
            }
            self.held_work.retain(|_, held| !held.is_empty());
            if !progressed {
                break;
            }
        }
    }

    fn create_buffers(&mut self, count: u32) -> Vec<NativeHandle> {
        (0..count)
            .map(|_| {
                self.alloc(ObjectKind::Resource {
                    gpu_va: 0,
                    data: Box::default(),
                    mappable: false,
                    map_count: 0,
                })
            })
            .collect()
    }

    fn swapchain_buffers_mut(&mut self, swapchain: NativeHandle) -> Option<&mut Vec<NativeHandle>> {
        match &mut self.objects.get_mut(&swapchain)?.kind {
            ObjectKind::Swapchain { buffers } => Some(buffers),
            _ => None,
        }
    }

    fn resize(&mut self, swapchain: NativeHandle, buffer_count: u32) -> HResult {
        if let Err(hr) = self.take_failure(FailPoint::ResizeBuffers) {
            return hr;
        }
        let Some(buffers) = self.swapchain_buffers_mut(swapchain) else {
            return HResult::E_INVALIDARG;
        };
        let old = buffers.clone();
        // Outstanding back-buffer references make the resize fail.
        if old
            .iter()
            .any(|buffer| self.ref_count(*buffer).is_some_and(|refs| refs > 1))
        {
            return HResult::DXGI_ERROR_INVALID_CALL;
        }
        let count = if buffer_count == 0 {
            old.len() as u32
        } else {
            buffer_count
        };
        for buffer in old {
            self.release(buffer);
        }
        let new = self.create_buffers(count);
        if let Some(buffers) = self.swapchain_buffers_mut(swapchain) {
            *buffers = new;
        }
        HResult::S_OK
    }
}

impl Driver for SoftwareDriver {
    fn add_ref(&mut self, object: NativeHandle) -> u32 {
        match self.objects.get_mut(&object) {
            Some(obj) => {
                obj.refs += 1;
                obj.refs
            }
            None => 0,
        }
    }

    fn release(&mut self, object: NativeHandle) -> u32 {
        let mut pending = vec![object];
        let mut remaining = 0;
        while let Some(handle) = pending.pop() {
            let Some(obj) = self.objects.get_mut(&handle) else {
                continue;
            };
            obj.refs = obj.refs.saturating_sub(1);
            if handle == object {
                remaining = obj.refs;
            }
            if obj.refs > 0 {
                continue;
            }
            if let Some(obj) = self.objects.remove(&handle) {
                trace!(?handle, kind = ?obj.kind, "software object destroyed");
                if let ObjectKind::Swapchain { buffers } = obj.kind {
                    pending.extend(buffers);
                }
            }
        }
        remaining
    }

    fn create_factory(&mut self, flags: u32) -> Result<NativeHandle, HResult> {
        self.take_failure(FailPoint::CreateFactory)?;
        Ok(self.alloc(ObjectKind::Factory { flags }))
    }

    fn create_device(
        &mut self,
        _adapter: Option<NativeHandle>,
        _minimum_feature_level: u32,
        debug_layer: bool,
    ) -> Result<NativeHandle, HResult> {
        self.take_failure(FailPoint::CreateDevice)?;
        self.debug_layer |= debug_layer;
        Ok(self.alloc(ObjectKind::Device))
    }

    fn create_command_queue(
        &mut self,
        device: NativeHandle,
        _desc: &CommandQueueDesc,
    ) -> Result<NativeHandle, HResult> {
        self.take_failure(FailPoint::CreateCommandQueue)?;
        self.require_device(device)?;
        Ok(self.alloc(ObjectKind::CommandQueue))
    }

    fn create_fence(
        &mut self,
        device: NativeHandle,
        initial_value: u64,
        _flags: u32,
    ) -> Result<NativeHandle, HResult> {
        self.take_failure(FailPoint::CreateFence)?;
        self.require_device(device)?;
        Ok(self.alloc(ObjectKind::Fence {
            completed: initial_value,
            events: Vec::new(),
        }))
    }

    fn create_descriptor_heap(
        &mut self,
        device: NativeHandle,
        desc: &DescriptorHeapDesc,
    ) -> Result<NativeHandle, HResult> {
        self.take_failure(FailPoint::CreateDescriptorHeap)?;
        self.require_device(device)?;
        if desc.num_descriptors == 0 {
            return Err(HResult::E_INVALIDARG);
        }
        let size = u64::from(desc.num_descriptors)
            * u64::from(DESCRIPTOR_INCREMENTS[desc.heap_type.index()]);
        let offset = self.next_descriptor;
        self.next_descriptor += size.next_multiple_of(GPU_VA_ALIGNMENT);
        let gpu_start = if desc.shader_visible {
            GPU_DESCRIPTOR_BASE + offset
        } else {
            0
        };
        Ok(self.alloc(ObjectKind::DescriptorHeap {
            cpu_start: CPU_DESCRIPTOR_BASE + offset,
            gpu_start,
        }))
    }

    fn create_committed_resource(
        &mut self,
        device: NativeHandle,
        desc: &ResourceDesc,
    ) -> Result<NativeHandle, HResult> {
        self.take_failure(FailPoint::CreateCommittedResource)?;
        self.require_device(device)?;
        if desc.width == 0 {
            return Err(HResult::E_INVALIDARG);
        }
        if desc.width > MAX_RESOURCE_BYTES {
            return Err(HResult::E_OUTOFMEMORY);
        }
        let len = usize::try_from(desc.width).map_err(|_| HResult::E_OUTOFMEMORY)?;
        let gpu_va = self.next_gpu_va;
        self.next_gpu_va += desc.width.next_multiple_of(GPU_VA_ALIGNMENT);
        Ok(self.alloc(ObjectKind::Resource {
            gpu_va,
            data: vec![0; len].into_boxed_slice(),
            mappable: desc.heap_type != HeapType::Default,
            map_count: 0,
        }))
    }

    fn create_command_list(
        &mut self,
        device: NativeHandle,
        _list_type: CommandListType,
    ) -> Result<NativeHandle, HResult> {
        self.require_device(device)?;
        Ok(self.alloc(ObjectKind::CommandList))
    }

    fn descriptor_handle_increment_size(
        &mut self,
        _device: NativeHandle,
        heap_type: DescriptorHeapType,
    ) -> u32 {
        DESCRIPTOR_INCREMENTS[heap_type.index()]
    }

    fn cpu_descriptor_handle_for_heap_start(&mut self, heap: NativeHandle) -> u64 {
        match self.objects.get(&heap).map(|obj| &obj.kind) {
            Some(ObjectKind::DescriptorHeap { cpu_start, .. }) => *cpu_start,
            _ => 0,
        }
    }

    fn gpu_descriptor_handle_for_heap_start(&mut self, heap: NativeHandle) -> u64 {
        match self.objects.get(&heap).map(|obj| &obj.kind) {
            Some(ObjectKind::DescriptorHeap { gpu_start, .. }) => *gpu_start,
            _ => 0,
        }
    }

    fn create_pipeline_library(
        &mut self,
        device: NativeHandle,
        _blob: &[u8],
    ) -> Result<NativeHandle, HResult> {
        self.take_failure(FailPoint::CreatePipelineLibrary)?;
        self.require_device(device)?;
        Ok(self.alloc(ObjectKind::PipelineLibrary))
    }

    fn load_pipeline(
        &mut self,
        library: NativeHandle,
        _kind: PipelineKind,
        name: &str,
    ) -> Result<NativeHandle, HResult> {
        if name.is_empty()
            || !self.is_kind(library, |kind| matches!(kind, ObjectKind::PipelineLibrary))
        {
            return Err(HResult::E_INVALIDARG);
        }
        Ok(self.alloc(ObjectKind::Pipeline))
    }

    fn enqueue_make_resident(
        &mut self,
        _device: NativeHandle,
        _objects: &[NativeHandle],
        fence: Option<NativeHandle>,
        fence_value: u64,
    ) -> HResult {
        match fence {
            Some(fence) => self.signal_and_run_queues(fence, fence_value),
            None => HResult::S_OK,
        }
    }

    fn open_existing_heap_from_address(
        &mut self,
        device: NativeHandle,
        allocation: &mut [u8],
    ) -> Result<NativeHandle, HResult> {
        self.take_failure(FailPoint::OpenExistingHeap)?;
        self.require_device(device)?;
        if allocation.is_empty() {
            return Err(HResult::E_INVALIDARG);
        }
        if let Some(heap) = self.reopened_heap.take() {
            if self.add_ref(heap) > 0 {
                return Ok(heap);
            }
        }
        Ok(self.alloc(ObjectKind::Heap))
    }

    fn check_feature_support(
        &mut self,
        device: NativeHandle,
        _feature: u32,
        data: &mut [u8],
    ) -> HResult {
        if let Err(hr) = self.take_failure(FailPoint::CheckFeatureSupport) {
            return hr;
        }
        if self.require_device(device).is_err() {
            return HResult::E_INVALIDARG;
        }
        data.fill(0);
        if let Some(first) = data.first_mut() {
            *first = 1;
        }
        HResult::S_OK
    }

    fn resource_gpu_virtual_address(&mut self, resource: NativeHandle) -> u64 {
        match self.objects.get(&resource).map(|obj| &obj.kind) {
            Some(ObjectKind::Resource { gpu_va, .. }) => *gpu_va,
            _ => 0,
        }
    }

    fn resource_width(&mut self, resource: NativeHandle) -> u64 {
        self.resource_contents(resource)
            .map_or(0, |data| data.len() as u64)
    }

    fn map(
        &mut self,
        resource: NativeHandle,
        _subresource: u32,
        _read_range: Option<Range<u64>>,
    ) -> Result<Option<MappedRegion>, HResult> {
        self.take_failure(FailPoint::Map)?;
        let Some(ObjectKind::Resource {
            data,
            mappable,
            map_count,
            ..
        }) = self.objects.get_mut(&resource).map(|obj| &mut obj.kind)
        else {
            return Err(HResult::E_INVALIDARG);
        };
        if !*mappable {
            return Err(HResult::E_INVALIDARG);
        }
        *map_count += 1;
        Ok(NonNull::new(data.as_mut_ptr()).map(|ptr| MappedRegion {
            ptr,
            len: data.len(),
        }))
    }

    fn unmap(
        &mut self,
        resource: NativeHandle,
        _subresource: u32,
        _written_range: Option<Range<u64>>,
    ) {
        if let Some(ObjectKind::Resource { map_count, .. }) =
            self.objects.get_mut(&resource).map(|obj| &mut obj.kind)
        {
            *map_count = map_count.saturating_sub(1);
        }
    }

    fn execute_command_lists(&mut self, queue: NativeHandle, command_lists: &[NativeHandle]) {
        self.queue_ops.push(QueueOp::Execute {
            queue,
            command_lists: command_lists.to_vec(),
        });
    }

    fn queue_signal(
        &mut self,
        queue: NativeHandle,
        fence: Option<NativeHandle>,
        value: u64,
    ) -> HResult {
        if let Err(hr) = self.take_failure(FailPoint::QueueSignal) {
            return hr;
        }
        let Some(fence) = fence else {
            return HResult::E_INVALIDARG;
        };
        if !self.is_fence(fence) {
            return HResult::E_INVALIDARG;
        }
        self.queue_ops.push(QueueOp::Signal {
            queue,
            fence,
            value,
        });
        match self.held_work.get_mut(&queue) {
            Some(held) => {
                held.push_back(HeldWork::Signal { fence, value });
                HResult::S_OK
            }
            None => self.signal_and_run_queues(fence, value),
        }
    }

    fn queue_wait(
        &mut self,
        queue: NativeHandle,
        fence: Option<NativeHandle>,
        value: u64,
    ) -> HResult {
        if let Err(hr) = self.take_failure(FailPoint::QueueWait) {
            return hr;
        }
        let Some(fence) = fence else {
            return HResult::E_INVALIDARG;
        };
        self.queue_ops.push(QueueOp::Wait {
            queue,
            fence,
            value,
        });
        let reached = self.fence_value(fence).is_some_and(|completed| completed >= value);
        match self.held_work.get_mut(&queue) {
            Some(held) => held.push_back(HeldWork::Wait { fence, value }),
            None if reached => {}
            None => {
                self.held_work
                    .insert(queue, VecDeque::from([HeldWork::Wait { fence, value }]));
            }
        }
        HResult::S_OK
    }

    fn fence_completed_value(&mut self, fence: NativeHandle) -> u64 {
        self.fence_value(fence).unwrap_or(0)
    }

    fn fence_signal(&mut self, fence: NativeHandle, value: u64) -> HResult {
        if let Err(hr) = self.take_failure(FailPoint::FenceSignal) {
            return hr;
        }
        self.signal_and_run_queues(fence, value)
    }

    fn fence_set_event_on_completion(
        &mut self,
        fence: NativeHandle,
        value: u64,
        event: Option<EventHandle>,
    ) -> HResult {
        let Some(SoftObject {
            kind: ObjectKind::Fence { completed, events },
            ..
        }) = self.objects.get_mut(&fence)
        else {
            return HResult::E_INVALIDARG;
        };
        let Some(event) = event else {
            return HResult::S_OK;
        };
        if value <= *completed {
            if let Some(signaled) = self.events.get_mut(&event) {
                *signaled = true;
            }
        } else {
            events.push((value, event));
        }
        HResult::S_OK
    }

    fn create_event(&mut self) -> Option<EventHandle> {
        if self.take_failure(FailPoint::CreateEvent).is_err() {
            return None;
        }
        let event = EventHandle(self.next_event);
        self.next_event += 1;
        self.events.insert(event, false);
        Some(event)
    }

    fn reset_event(&mut self, event: EventHandle) {
        if let Some(signaled) = self.events.get_mut(&event) {
            *signaled = false;
        }
    }

    fn wait_event(&mut self, event: EventHandle, _timeout: Duration) -> WaitStatus {
        self.waited.push(event);
        match self.events.get(&event) {
            Some(true) => WaitStatus::Signaled,
            Some(false) => WaitStatus::TimedOut,
            None => WaitStatus::Failed(ERROR_INVALID_HANDLE),
        }
    }

    fn close_event(&mut self, event: EventHandle) {
        self.events.remove(&event);
    }

    fn create_swapchain(
        &mut self,
        factory: NativeHandle,
        _device: Option<NativeHandle>,
        window: NativeWindowHandle,
        desc: &SwapchainDesc,
    ) -> Result<NativeHandle, HResult> {
        self.take_failure(FailPoint::CreateSwapchain)?;
        if !self.is_kind(factory, |kind| matches!(kind, ObjectKind::Factory { .. }))
            || window.0 == 0
            || desc.buffer_count == 0
        {
            return Err(HResult::DXGI_ERROR_INVALID_CALL);
        }
        let buffers = self.create_buffers(desc.buffer_count);
        Ok(self.alloc(ObjectKind::Swapchain { buffers }))
    }

    fn swapchain_buffer(
        &mut self,
        swapchain: NativeHandle,
        index: u32,
    ) -> Result<NativeHandle, HResult> {
        let buffer = self
            .swapchain_buffers_mut(swapchain)
            .and_then(|buffers| buffers.get(index as usize).copied())
            .ok_or(HResult::DXGI_ERROR_INVALID_CALL)?;
        self.add_ref(buffer);
        Ok(buffer)
    }

    fn resize_buffers(
        &mut self,
        swapchain: NativeHandle,
        buffer_count: u32,
        _width: u32,
        _height: u32,
        _format: u32,
        _flags: u32,
    ) -> HResult {
        self.resize(swapchain, buffer_count)
    }

    #[allow(clippy::too_many_arguments)]
    fn resize_buffers1(
        &mut self,
        swapchain: NativeHandle,
        buffer_count: u32,
        _width: u32,
        _height: u32,
        _format: u32,
        _flags: u32,
        node_masks: &[u32],
        present_queues: &[NativeHandle],
    ) -> HResult {
        if !present_queues.is_empty() && present_queues.len() != node_masks.len() {
            return HResult::E_INVALIDARG;
        }
        self.resize(swapchain, buffer_count)
    }

    fn make_window_association(
        &mut self,
        factory: NativeHandle,
        _window: Option<NativeWindowHandle>,
        _flags: u32,
    ) -> HResult {
        if self.is_kind(factory, |kind| matches!(kind, ObjectKind::Factory { .. })) {
            HResult::S_OK
        } else {
            HResult::E_INVALIDARG
        }
    }
}
