//! The replay engine instance.
//!
//! [`Dx12ReplayConsumer`] receives already-decoded calls, resolves capture ids to live objects,
//! forwards to the [`Driver`], and feeds results back into the object table, the GPU VA map and
//! the fence emulator. Every piece of state lives in this struct, so several independent replay
//! sessions can coexist in one process.
//!
//! Override methods take the capture-time result code where the engine's behavior depends on it
//! and return the replay-time result. Component failures are logged where they are detected and
//! never unwind across the call.

use std::collections::HashMap;
use std::ops::Range;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::driver::{
    CommandListType, CommandQueueDesc, DescriptorHeapDesc, DescriptorHeapType, Driver,
    PipelineKind, ResourceDesc,
};
use crate::error::ReplayError;
use crate::gpu_va::GpuVaMap;
use crate::handles::{CaptureId, EventHandle, NativeHandle, NativeWindowHandle};
use crate::hresult::HResult;
use crate::memory::{HeapAllocationTable, MappedMemoryTable};
use crate::object_table::{
    DescriptorHeapInfo, DeviceInfo, ExtraInfo, ExtraInfoKind, ExtraInfoVariant, HeapInfo,
    Liveness, ObjectInfo, ObjectTable,
};
use crate::options::ReplayOptions;
use crate::resource::ResourceInfo;
use crate::sync::{
    wait_for_event, CommandQueueInfo, FenceInfo, FenceTarget, QueueSyncFence, RetiredQueues,
    SyncEmulator,
};
use crate::window::WindowFactory;

/// Event table key reserved for waits issued by the engine itself.
pub const INTERNAL_EVENT_ID: u64 = u64::MAX;

/// `DXGI_CREATE_FACTORY_DEBUG`.
pub const CREATE_FACTORY_DEBUG: u32 = 0x1;

pub type FatalErrorHandler = Box<dyn FnMut(&str)>;

/// Snapshot of one application fence, as tracked by the emulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FenceState {
    pub capture_id: CaptureId,
    pub last_signaled_value: u64,
    /// Values that still have CPU events or queues parked on them.
    pub pending_values: Vec<u64>,
}

pub struct Dx12ReplayConsumer<D: Driver, W: WindowFactory> {
    pub(crate) driver: D,
    pub(crate) window_factory: W,
    pub(crate) options: ReplayOptions,
    pub(crate) objects: ObjectTable,
    pub(crate) gpu_va_map: GpuVaMap,
    pub(crate) mapped_memory: MappedMemoryTable,
    pub(crate) heap_allocations: HeapAllocationTable,
    pub(crate) event_objects: HashMap<u64, EventHandle>,
    /// Captured window handle id → replay window handle.
    pub(crate) window_handles: HashMap<u64, NativeWindowHandle>,
    retired_queues: RetiredQueues,
    fatal_error_handler: Option<FatalErrorHandler>,
}

impl<D: Driver, W: WindowFactory> Dx12ReplayConsumer<D, W> {
    pub fn new(driver: D, window_factory: W, options: ReplayOptions) -> Self {
        info!(
            validation = options.enable_validation_layer,
            sync_queue_submissions = options.sync_queue_submissions,
            wait_timeout_ms = options.wait_timeout_ms,
            "replay consumer created"
        );
        Self {
            driver,
            window_factory,
            options,
            objects: ObjectTable::new(),
            gpu_va_map: GpuVaMap::new(),
            mapped_memory: MappedMemoryTable::new(),
            heap_allocations: HeapAllocationTable::new(),
            event_objects: HashMap::new(),
            window_handles: HashMap::new(),
            retired_queues: RetiredQueues::new(),
            fatal_error_handler: None,
        }
    }

    pub fn set_fatal_error_handler(&mut self, handler: impl FnMut(&str) + 'static) {
        self.fatal_error_handler = Some(Box::new(handler));
    }

    pub fn options(&self) -> &ReplayOptions {
        &self.options
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn window_factory(&self) -> &W {
        &self.window_factory
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    pub fn object(&self, capture_id: CaptureId) -> Option<&ObjectInfo> {
        self.objects.get(capture_id)
    }

    pub fn gpu_va_map(&self) -> &GpuVaMap {
        &self.gpu_va_map
    }

    pub fn mapped_memory(&self) -> &MappedMemoryTable {
        &self.mapped_memory
    }

    pub fn heap_allocations(&self) -> &HeapAllocationTable {
        &self.heap_allocations
    }

    /// Released queues that still hold signals behind an unresolved wait.
    pub fn retired_queues(&self) -> &RetiredQueues {
        &self.retired_queues
    }

    pub fn fence_states(&self) -> Vec<FenceState> {
        self.objects
            .ids_with_kind(ExtraInfoKind::Fence)
            .into_iter()
            .filter_map(|id| {
                let fence = self.objects.extra::<FenceInfo>(id).ok()?;
                Some(FenceState {
                    capture_id: id,
                    last_signaled_value: fence.last_signaled_value,
                    pending_values: fence.waiting_objects.keys().copied().collect(),
                })
            })
            .collect()
    }

    pub(crate) fn raise_fatal_error(&mut self, message: &str) {
        match self.fatal_error_handler.as_mut() {
            Some(handler) => handler(message),
            None => debug!(message, "no fatal error handler registered"),
        }
    }

    /// Compares a replay result with the one recorded at capture.
    pub fn check_replay_result(&mut self, call: &str, capture: HResult, replay: HResult) {
        if capture == replay {
            return;
        }
        if replay.is_device_lost() && !capture.is_device_lost() {
            error!(
                call,
                %replay,
                %capture,
                "result does not match the value returned at capture, replay cannot continue"
            );
            if self.options.fatal_on_device_removed {
                self.raise_fatal_error(replay.description());
            }
        } else {
            warn!(
                call,
                %replay,
                %capture,
                "result does not match the value returned at capture"
            );
        }
    }

    fn skip_failed_at_capture(call: &str, capture: HResult) -> bool {
        if capture.is_failure() {
            warn!(call, result = %capture, "ignoring fence operation that failed at capture");
            return true;
        }
        false
    }

    pub(crate) fn sync_emulator(&mut self) -> SyncEmulator<'_, D> {
        let timeout = self.options.wait_timeout();
        SyncEmulator::new(&mut self.objects, &mut self.driver, timeout)
            .with_retired_queues(&mut self.retired_queues)
    }

    // ---------------------------------------------------------------------------------------------
    // Object table

    /// Resolves a capture id. The null id resolves to `None` silently; unknown ids are logged.
    pub fn map_object(&self, capture_id: CaptureId) -> Option<NativeHandle> {
        if capture_id.is_null() {
            return None;
        }
        let object = self.objects.native(capture_id);
        if object.is_none() {
            warn!(capture_id = %capture_id, "call references an object that does not exist at replay");
        }
        object
    }

    /// Registers an object returned by a creation call. Returns `true` when a new entry was made.
    ///
    /// A capture id already bound to the same native object counts as one more application
    /// reference (the driver handed out the same object again).
    pub(crate) fn add_object(&mut self, capture_id: CaptureId, object: NativeHandle) -> bool {
        if capture_id.is_null() {
            debug!(?object, "created object has no capture id, releasing it");
            self.driver.release(object);
            return false;
        }
        match self.objects.native(capture_id) {
            Some(existing) if existing == object => {
                if let Err(err) = self.objects.add_ref(capture_id) {
                    error!(capture_id = %capture_id, %err, "failed to add reference");
                }
                false
            }
            Some(existing) => {
                error!(
                    capture_id = %capture_id,
                    ?existing,
                    ?object,
                    "{}",
                    ReplayError::DuplicateCaptureId(capture_id)
                );
                self.driver.release(object);
                false
            }
            None => match self.objects.create(capture_id, object) {
                Ok(_) => true,
                Err(err) => {
                    error!(capture_id = %capture_id, %err, "failed to register object");
                    false
                }
            },
        }
    }

    fn set_extra_info<T: ExtraInfoVariant>(&mut self, capture_id: CaptureId, extra: T) {
        let result = self
            .objects
            .lookup_mut(capture_id)
            .and_then(|info| info.set_extra(extra).map(|_| ()));
        if let Err(err) = result {
            error!(capture_id = %capture_id, %err, "failed to attach object state");
        }
    }

    /// `AddRef` on a replayed object.
    pub fn add_ref(&mut self, capture_id: CaptureId) -> u32 {
        let Some(object) = self.map_object(capture_id) else {
            return 0;
        };
        let count = self.driver.add_ref(object);
        if let Err(err) = self.objects.add_ref(capture_id) {
            error!(capture_id = %capture_id, %err, "failed to add reference");
        }
        count
    }

    /// `Release` on a replayed object. Tears the entry down when no references remain.
    pub fn release(&mut self, capture_id: CaptureId) -> u32 {
        let Some(object) = self.map_object(capture_id) else {
            return 0;
        };
        let count = self.driver.release(object);
        match self.objects.release(capture_id) {
            Ok(Liveness::Unreferenced) => self.remove_objects(vec![capture_id]),
            Ok(Liveness::Alive) => {}
            Err(err) => error!(capture_id = %capture_id, %err, "failed to release reference"),
        }
        count
    }

    /// Removes entries and everything their teardown releases in turn.
    pub(crate) fn remove_objects(&mut self, mut pending: Vec<CaptureId>) {
        while let Some(capture_id) = pending.pop() {
            let Some(mut info) = self.objects.remove(capture_id) else {
                continue;
            };
            debug!(capture_id = %capture_id, "object removed");
            self.destroy_object_extra_info(&mut info, true, &mut pending);
        }
    }

    /// Drops the state attached to an object. A heap's host allocation is handed back so the
    /// caller can keep it alive until the native heap is gone.
    fn destroy_object_extra_info(
        &mut self,
        info: &mut ObjectInfo,
        release_extra_refs: bool,
        pending: &mut Vec<CaptureId>,
    ) -> Option<HeapInfo> {
        match info.extra_info.take()? {
            ExtraInfo::Resource(mut resource) => {
                resource.untrack(info.object, &mut self.gpu_va_map, &mut self.mapped_memory);
            }
            ExtraInfo::CommandQueue(mut queue) => {
                if let Some(sync) = queue.sync_fence.take() {
                    self.driver.release(sync.fence);
                    self.driver.close_event(sync.event);
                }
                if let Some(retired) = queue.into_retired(info.capture_id) {
                    debug!(capture_id = %info.capture_id, "released queue is still blocked");
                    self.retired_queues.insert(info.capture_id, retired);
                }
            }
            ExtraInfo::Heap(heap) => return Some(heap),
            ExtraInfo::Swapchain(swapchain) => {
                let unreferenced = self.destroy_swapchain_info(swapchain, release_extra_refs);
                pending.extend(unreferenced);
            }
            ExtraInfo::Device(_) | ExtraInfo::DescriptorHeap(_) | ExtraInfo::Fence(_) => {}
        }
        None
    }

    // ---------------------------------------------------------------------------------------------
    // Creation

    pub fn create_factory(&mut self, mut flags: u32, out: CaptureId) -> HResult {
        if self.options.enable_validation_layer {
            flags |= CREATE_FACTORY_DEBUG;
        }
        match self.driver.create_factory(flags) {
            Ok(factory) => {
                self.add_object(out, factory);
                HResult::S_OK
            }
            Err(hr) => hr,
        }
    }

    pub fn create_device(
        &mut self,
        adapter: CaptureId,
        minimum_feature_level: u32,
        out: CaptureId,
    ) -> HResult {
        let adapter = self.map_object(adapter);
        let debug_layer = self.options.enable_validation_layer;
        match self
            .driver
            .create_device(adapter, minimum_feature_level, debug_layer)
        {
            Ok(device) => {
                if self.add_object(out, device) {
                    self.set_extra_info(out, DeviceInfo::default());
                }
                HResult::S_OK
            }
            Err(hr) => hr,
        }
    }

    pub fn create_command_queue(
        &mut self,
        device: CaptureId,
        desc: &CommandQueueDesc,
        out: CaptureId,
    ) -> HResult {
        let Some(device_object) = self.map_object(device) else {
            return HResult::E_INVALIDARG;
        };
        let queue = match self.driver.create_command_queue(device_object, desc) {
            Ok(queue) => queue,
            Err(hr) => return hr,
        };
        if self.add_object(out, queue) {
            let mut info = CommandQueueInfo::new(device_object);
            if self.options.sync_queue_submissions {
                info.sync_fence = self.create_queue_sync_fence(device_object);
            }
            self.set_extra_info(out, info);
        }
        HResult::S_OK
    }

    fn create_queue_sync_fence(&mut self, device: NativeHandle) -> Option<QueueSyncFence> {
        let fence = match self.driver.create_fence(device, 0, 0) {
            Ok(fence) => fence,
            Err(hr) => {
                error!(result = %hr, "failed to create fence for queue submission sync");
                return None;
            }
        };
        let Some(event) = self.driver.create_event() else {
            error!("failed to create event for queue submission sync");
            self.driver.release(fence);
            return None;
        };
        Some(QueueSyncFence {
            fence,
            event,
            value: 0,
            info: FenceInfo::new(0),
        })
    }

    pub fn create_fence(
        &mut self,
        device: CaptureId,
        initial_value: u64,
        flags: u32,
        out: CaptureId,
    ) -> HResult {
        let Some(device) = self.map_object(device) else {
            return HResult::E_INVALIDARG;
        };
        match self.driver.create_fence(device, initial_value, flags) {
            Ok(fence) => {
                if self.add_object(out, fence) {
                    self.set_extra_info(out, FenceInfo::new(initial_value));
                }
                HResult::S_OK
            }
            Err(hr) => hr,
        }
    }

    pub fn create_descriptor_heap(
        &mut self,
        device: CaptureId,
        desc: &DescriptorHeapDesc,
        out: CaptureId,
    ) -> HResult {
        let Some(device_object) = self.map_object(device) else {
            return HResult::E_INVALIDARG;
        };
        let heap = match self.driver.create_descriptor_heap(device_object, desc) {
            Ok(heap) => heap,
            Err(hr) => return hr,
        };
        if self.add_object(out, heap) {
            let replay_increments = match self.objects.extra::<DeviceInfo>(device) {
                Ok(info) => info.replay_increments,
                Err(err) => {
                    error!(capture_id = %device, %err, "device has no associated state");
                    Default::default()
                }
            };
            self.set_extra_info(
                out,
                DescriptorHeapInfo {
                    descriptor_type: desc.heap_type,
                    replay_increments,
                    replay_cpu_addr_begin: 0,
                    replay_gpu_addr_begin: 0,
                },
            );
        }
        HResult::S_OK
    }

    pub fn create_committed_resource(
        &mut self,
        device: CaptureId,
        desc: &ResourceDesc,
        out: CaptureId,
    ) -> HResult {
        let Some(device) = self.map_object(device) else {
            return HResult::E_INVALIDARG;
        };
        match self.driver.create_committed_resource(device, desc) {
            Ok(resource) => {
                self.add_object(out, resource);
                HResult::S_OK
            }
            Err(hr) => hr,
        }
    }

    pub fn create_command_list(
        &mut self,
        device: CaptureId,
        list_type: CommandListType,
        out: CaptureId,
    ) -> HResult {
        let Some(device) = self.map_object(device) else {
            return HResult::E_INVALIDARG;
        };
        match self.driver.create_command_list(device, list_type) {
            Ok(list) => {
                self.add_object(out, list);
                HResult::S_OK
            }
            Err(hr) => hr,
        }
    }

    pub fn get_descriptor_handle_increment_size(
        &mut self,
        device: CaptureId,
        heap_type: DescriptorHeapType,
    ) -> u32 {
        let Some(device_object) = self.map_object(device) else {
            return 0;
        };
        let size = self
            .driver
            .descriptor_handle_increment_size(device_object, heap_type);
        match self.objects.extra_mut::<DeviceInfo>(device) {
            Ok(info) => info.replay_increments[heap_type.index()] = size,
            Err(err) => error!(capture_id = %device, %err, "device has no associated state"),
        }
        size
    }

    pub fn get_cpu_descriptor_handle_for_heap_start(&mut self, heap: CaptureId) -> u64 {
        let Some(heap_object) = self.map_object(heap) else {
            return 0;
        };
        let start = self.driver.cpu_descriptor_handle_for_heap_start(heap_object);
        match self.objects.extra_mut::<DescriptorHeapInfo>(heap) {
            Ok(info) if info.replay_cpu_addr_begin == 0 => info.replay_cpu_addr_begin = start,
            Ok(_) => {}
            Err(err) => error!(capture_id = %heap, %err, "descriptor heap has no associated state"),
        }
        start
    }

    pub fn get_gpu_descriptor_handle_for_heap_start(&mut self, heap: CaptureId) -> u64 {
        let Some(heap_object) = self.map_object(heap) else {
            return 0;
        };
        let start = self.driver.gpu_descriptor_handle_for_heap_start(heap_object);
        match self.objects.extra_mut::<DescriptorHeapInfo>(heap) {
            Ok(info) if info.replay_gpu_addr_begin == 0 => info.replay_gpu_addr_begin = start,
            Ok(_) => {}
            Err(err) => error!(capture_id = %heap, %err, "descriptor heap has no associated state"),
        }
        start
    }

    /// The capture layer may fail this call on purpose so the application rebuilds its library;
    /// such calls are not replayed.
    pub fn create_pipeline_library(
        &mut self,
        device: CaptureId,
        blob: &[u8],
        out: CaptureId,
        capture_result: HResult,
    ) -> HResult {
        if capture_result == HResult::D3D12_ERROR_DRIVER_VERSION_MISMATCH {
            return capture_result;
        }
        let Some(device) = self.map_object(device) else {
            return HResult::E_INVALIDARG;
        };
        match self.driver.create_pipeline_library(device, blob) {
            Ok(library) => {
                self.add_object(out, library);
                HResult::S_OK
            }
            Err(hr) => hr,
        }
    }

    /// `LoadGraphicsPipeline`, `LoadComputePipeline` and `LoadPipeline`. Loads the capture layer
    /// failed with `E_INVALIDARG` are passed through.
    pub fn load_pipeline(
        &mut self,
        library: CaptureId,
        kind: PipelineKind,
        name: &str,
        out: CaptureId,
        capture_result: HResult,
    ) -> HResult {
        if capture_result == HResult::E_INVALIDARG {
            return capture_result;
        }
        let Some(library) = self.map_object(library) else {
            return HResult::E_INVALIDARG;
        };
        match self.driver.load_pipeline(library, kind, name) {
            Ok(pipeline) => {
                self.add_object(out, pipeline);
                HResult::S_OK
            }
            Err(hr) => hr,
        }
    }

    pub fn check_feature_support(
        &mut self,
        device: CaptureId,
        feature: u32,
        data: &mut [u8],
        capture_result: HResult,
    ) -> HResult {
        let Some(device) = self.map_object(device) else {
            return HResult::E_INVALIDARG;
        };
        let replay = self.driver.check_feature_support(device, feature, data);
        self.check_replay_result("ID3D12Device::CheckFeatureSupport", capture_result, replay);
        replay
    }

    // ---------------------------------------------------------------------------------------------
    // Resources and memory

    /// `GetGPUVirtualAddress`. The first query records the capture/replay pair for translation.
    pub fn get_gpu_virtual_address(&mut self, resource: CaptureId, capture_address: u64) -> u64 {
        let Some(object) = self.map_object(resource) else {
            return 0;
        };
        let replay_address = self.driver.resource_gpu_virtual_address(object);
        if capture_address == 0 || replay_address == 0 {
            return replay_address;
        }

        let size = self.driver.resource_width(object);
        let result = self
            .objects
            .lookup_mut(resource)
            .and_then(|info| info.extra_or_insert_with(ResourceInfo::default))
            .and_then(|info| {
                info.record_gpu_address(
                    object,
                    capture_address,
                    replay_address,
                    size,
                    &mut self.gpu_va_map,
                )
            });
        match result {
            Ok(true) => debug!(
                capture_id = %resource,
                capture_address,
                replay_address,
                size,
                "gpu virtual address recorded"
            ),
            Ok(false) => {}
            Err(err) => error!(capture_id = %resource, %err, "failed to record gpu virtual address"),
        }
        replay_address
    }

    /// Translates a captured GPU virtual address. A miss means replay has diverged; it is
    /// reported through the fatal-error sink and the address is returned unchanged.
    pub fn map_gpu_virtual_address(&mut self, address: u64) -> u64 {
        match self.gpu_va_map.translate(address) {
            Ok(replay) => replay,
            Err(err) => {
                error!(%err, "gpu virtual address translation failed");
                self.raise_fatal_error(&err.to_string());
                address
            }
        }
    }

    pub fn map_gpu_virtual_addresses(&mut self, addresses: &mut [u64]) {
        if let Err(err) = self.gpu_va_map.translate_in_place(addresses) {
            error!(%err, "gpu virtual address translation failed");
            self.raise_fatal_error(&err.to_string());
        }
    }

    /// `ID3D12Resource::Map`. `memory_id` is the capture's identifier for the returned pointer.
    pub fn map_resource(
        &mut self,
        resource: CaptureId,
        subresource: u32,
        read_range: Option<Range<u64>>,
        memory_id: u64,
    ) -> HResult {
        let Some(object) = self.map_object(resource) else {
            return HResult::E_INVALIDARG;
        };
        let region = match self.driver.map(object, subresource, read_range) {
            Ok(region) => region,
            Err(hr) => return hr,
        };
        let Some(region) = region.filter(|_| memory_id != 0) else {
            return HResult::S_OK;
        };

        let result = self
            .objects
            .lookup_mut(resource)
            .and_then(|info| info.extra_or_insert_with(ResourceInfo::default));
        match result {
            Ok(info) => info.map(subresource, memory_id, Some(region), &mut self.mapped_memory),
            Err(err) => error!(capture_id = %resource, %err, "failed to track mapped memory"),
        }
        HResult::S_OK
    }

    pub fn unmap_resource(
        &mut self,
        resource: CaptureId,
        subresource: u32,
        written_range: Option<Range<u64>>,
    ) {
        let Some(object) = self.map_object(resource) else {
            return;
        };
        if let Ok(info) = self.objects.extra_mut::<ResourceInfo>(resource) {
            if let Some(memory_id) = info.unmap(subresource, &mut self.mapped_memory) {
                debug!(capture_id = %resource, subresource, memory_id, "memory unmapped");
            }
        }
        self.driver.unmap(object, subresource, written_range);
    }

    /// Replays a captured write into mapped memory. Unknown ids are skipped.
    pub fn process_fill_memory_command(&mut self, memory_id: u64, offset: u64, data: &[u8]) {
        if let Err(err) = self.mapped_memory.fill(memory_id, offset, data) {
            warn!(memory_id, offset, size = data.len(), %err, "skipping memory fill");
        }
    }

    pub fn process_create_heap_allocation_command(&mut self, allocation_id: u64, size: u64) {
        if let Err(err) = self.heap_allocations.create(allocation_id, size) {
            error!(allocation_id, size, %err, "failed to create external heap allocation");
        }
    }

    pub fn open_existing_heap_from_address(
        &mut self,
        device: CaptureId,
        allocation_id: u64,
        out: CaptureId,
    ) -> HResult {
        let Some(device) = self.map_object(device) else {
            return HResult::E_INVALIDARG;
        };
        let mut allocation = match self.heap_allocations.take(allocation_id) {
            Ok(allocation) => allocation,
            Err(err) => {
                error!(allocation_id, %err, "no heap allocation for OpenExistingHeapFromAddress");
                return HResult::E_FAIL;
            }
        };
        match self
            .driver
            .open_existing_heap_from_address(device, &mut allocation)
        {
            Ok(heap) => {
                if self.add_object(out, heap) {
                    self.set_extra_info(out, HeapInfo::new(allocation));
                } else if self.objects.native(out) == Some(heap) {
                    // The heap still points into this allocation.
                    if let Ok(info) = self.objects.extra_mut::<HeapInfo>(out) {
                        info.reopened_allocations.push(allocation);
                    } else {
                        self.set_extra_info(out, HeapInfo::new(allocation));
                    }
                }
                HResult::S_OK
            }
            Err(hr) => hr,
        }
    }

    // ---------------------------------------------------------------------------------------------
    // Queues and fences

    pub fn execute_command_lists(&mut self, queue: CaptureId, command_lists: &[CaptureId]) {
        let Some(queue_object) = self.map_object(queue) else {
            return;
        };
        let lists: Vec<_> = command_lists
            .iter()
            .filter_map(|&list| self.map_object(list))
            .collect();
        self.driver.execute_command_lists(queue_object, &lists);

        if self.options.sync_queue_submissions && !command_lists.is_empty() {
            self.sync_queue_submission(queue, queue_object);
        }
    }

    /// Signals the queue's private fence and holds the host until it completes. Behind a pending
    /// wait the signal is queued like any other, and the host wait happens when it drains.
    fn sync_queue_submission(&mut self, queue: CaptureId, queue_object: NativeHandle) {
        let sync = match self.objects.extra_mut::<CommandQueueInfo>(queue) {
            Ok(info) => info.sync_fence.as_mut(),
            Err(err) => {
                error!(capture_id = %queue, %err, "command queue has no associated state");
                return;
            }
        };
        let Some(sync) = sync else {
            error!(capture_id = %queue, "queue has no objects for queue submission sync");
            return;
        };
        sync.value += 1;
        let (fence, event, value) = (sync.fence, sync.event, sync.value);

        let signaled = self.driver.queue_signal(queue_object, Some(fence), value);
        if signaled.is_failure() {
            error!(capture_id = %queue, result = %signaled, "failed to signal queue submission fence");
            return;
        }
        self.driver.reset_event(event);
        let armed = self
            .driver
            .fence_set_event_on_completion(fence, value, Some(event));
        if armed.is_failure() {
            error!(capture_id = %queue, result = %armed, "failed to set queue submission event");
            return;
        }

        let target = FenceTarget::QueueSync(queue);
        let mut sync = self.sync_emulator();
        sync.queue_signal(queue, target, value);
        sync.set_event_on_completion(target, value, event);
    }

    pub fn queue_signal(
        &mut self,
        queue: CaptureId,
        fence: CaptureId,
        value: u64,
        capture_result: HResult,
    ) -> HResult {
        if Self::skip_failed_at_capture("ID3D12CommandQueue::Signal", capture_result) {
            return capture_result;
        }
        let Some(queue_object) = self.map_object(queue) else {
            return HResult::E_INVALIDARG;
        };
        let fence_object = self.map_object(fence);
        let replay = self.driver.queue_signal(queue_object, fence_object, value);
        if replay.is_success() && fence_object.is_some() {
            self.sync_emulator()
                .queue_signal(queue, FenceTarget::Object(fence), value);
        }
        replay
    }

    pub fn queue_wait(
        &mut self,
        queue: CaptureId,
        fence: CaptureId,
        value: u64,
        capture_result: HResult,
    ) -> HResult {
        if Self::skip_failed_at_capture("ID3D12CommandQueue::Wait", capture_result) {
            return capture_result;
        }
        let Some(queue_object) = self.map_object(queue) else {
            return HResult::E_INVALIDARG;
        };
        let fence_object = self.map_object(fence);
        let replay = self.driver.queue_wait(queue_object, fence_object, value);
        if replay.is_success() && fence_object.is_some() {
            self.sync_emulator().queue_wait(queue, fence, value);
        }
        replay
    }

    pub fn fence_signal(&mut self, fence: CaptureId, value: u64, capture_result: HResult) -> HResult {
        if Self::skip_failed_at_capture("ID3D12Fence::Signal", capture_result) {
            return capture_result;
        }
        let Some(fence_object) = self.map_object(fence) else {
            return HResult::E_INVALIDARG;
        };
        let replay = self.driver.fence_signal(fence_object, value);
        if replay.is_success() {
            self.sync_emulator()
                .signal_fence(FenceTarget::Object(fence), value);
        }
        replay
    }

    pub fn fence_set_event_on_completion(
        &mut self,
        fence: CaptureId,
        value: u64,
        event_id: u64,
        capture_result: HResult,
    ) -> HResult {
        if Self::skip_failed_at_capture("ID3D12Fence::SetEventOnCompletion", capture_result) {
            return capture_result;
        }
        let Some(fence_object) = self.map_object(fence) else {
            return HResult::E_INVALIDARG;
        };
        let event = self.event_object(event_id, true);
        let replay = self
            .driver
            .fence_set_event_on_completion(fence_object, value, event);
        if let (true, Some(event)) = (replay.is_success(), event) {
            self.sync_emulator()
                .set_event_on_completion(FenceTarget::Object(fence), value, event);
        }
        replay
    }

    /// `GetCompletedValue`. When capture had observed more progress than replay has made, the
    /// host waits (bounded) for the driver to catch up. The captured value is returned.
    pub fn fence_get_completed_value(&mut self, fence: CaptureId, capture_value: u64) -> u64 {
        let Some(fence_object) = self.map_object(fence) else {
            return capture_value;
        };
        let replay_value = self.driver.fence_completed_value(fence_object);
        if let Err(err) = self.objects.extra::<FenceInfo>(fence) {
            error!(capture_id = %fence, %err, "fence has no associated state");
            return capture_value;
        }
        if capture_value > replay_value {
            if let Some(event) = self.event_object(INTERNAL_EVENT_ID, true) {
                self.driver
                    .fence_set_event_on_completion(fence_object, capture_value, Some(event));
                wait_for_event(&mut self.driver, event, self.options.wait_timeout());
            }
        }
        capture_value
    }

    pub fn enqueue_make_resident(
        &mut self,
        device: CaptureId,
        objects: &[CaptureId],
        fence: CaptureId,
        fence_value: u64,
    ) -> HResult {
        let Some(device) = self.map_object(device) else {
            return HResult::E_INVALIDARG;
        };
        let pageables: Vec<_> = objects.iter().filter_map(|&id| self.map_object(id)).collect();
        let fence_object = self.map_object(fence);
        let replay = self
            .driver
            .enqueue_make_resident(device, &pageables, fence_object, fence_value);
        if replay.is_success() && fence_object.is_some() {
            self.sync_emulator()
                .signal_fence(FenceTarget::Object(fence), fence_value);
        }
        replay
    }

    /// Looks up (or lazily creates) the event bound to a captured event id.
    pub(crate) fn event_object(&mut self, event_id: u64, reset: bool) -> Option<EventHandle> {
        if let Some(&event) = self.event_objects.get(&event_id) {
            if reset {
                self.driver.reset_event(event);
            }
            return Some(event);
        }
        match self.driver.create_event() {
            Some(event) => {
                self.event_objects.insert(event_id, event);
                Some(event)
            }
            None => {
                error!(event_id, "event creation failed");
                None
            }
        }
    }

    // ---------------------------------------------------------------------------------------------
    // Shutdown

    /// Waits (bounded) for every queue to finish its submitted work.
    pub fn wait_idle(&mut self) {
        let queues = self.objects.ids_with_kind(ExtraInfoKind::CommandQueue);
        if queues.is_empty() {
            return;
        }
        let Some(event) = self.event_object(INTERNAL_EVENT_ID, true) else {
            return;
        };
        let timeout = self.options.wait_timeout();

        for queue in queues {
            let Some(queue_object) = self.objects.native(queue) else {
                continue;
            };
            let Ok(info) = self.objects.extra_mut::<CommandQueueInfo>(queue) else {
                continue;
            };
            let device = info.device;
            let (fence, value, temporary) = match info.sync_fence.as_mut() {
                Some(sync) => {
                    sync.value += 1;
                    (sync.fence, sync.value, false)
                }
                None => match self.driver.create_fence(device, 0, 0) {
                    Ok(fence) => (fence, 1, true),
                    Err(hr) => {
                        warn!(capture_id = %queue, result = %hr, "failed to create fence to wait for queue idle");
                        continue;
                    }
                },
            };

            self.driver.reset_event(event);
            self.driver.queue_signal(queue_object, Some(fence), value);
            self.driver
                .fence_set_event_on_completion(fence, value, Some(event));
            wait_for_event(&mut self.driver, event, timeout);
            if temporary {
                self.driver.release(fence);
            }
        }
    }

    /// Releases everything the engine still holds: waits for idle queues, drops object state,
    /// releases the engine's native references, then closes events and frees pending heap
    /// allocations. Also run on drop; calling it again is a no-op.
    pub fn shutdown(&mut self) {
        self.wait_idle();
        self.destroy_active_objects();
        for (_, event) in self.event_objects.drain() {
            self.driver.close_event(event);
        }
        self.heap_allocations.clear();
    }

    fn destroy_active_objects(&mut self) {
        let mut retired_heaps = Vec::new();
        let mut unused = Vec::new();
        for mut info in self.objects.drain_sorted() {
            // Pins are not released here: the objects they refer to are being torn down anyway.
            if let Some(heap) = self.destroy_object_extra_info(&mut info, false, &mut unused) {
                retired_heaps.push(heap);
            }
            for _ in 0..info.ref_count {
                self.driver.release(info.object);
            }
        }
        // Host memory behind heaps must outlive the native heaps released above.
        drop(retired_heaps);
        self.window_handles.clear();
        self.retired_queues.clear();
    }
}

impl<D: Driver, W: WindowFactory> Drop for Dx12ReplayConsumer<D, W> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
