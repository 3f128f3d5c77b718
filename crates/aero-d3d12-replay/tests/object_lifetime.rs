use aero_d3d12_replay::driver::ResourceDesc;
use aero_d3d12_replay::object_table::HeapInfo;
use aero_d3d12_replay::resource::ResourceInfo;
use aero_d3d12_replay::software::SoftwareDriver;
use aero_d3d12_replay::window::HeadlessWindowFactory;
use aero_d3d12_replay::{CaptureId, Dx12ReplayConsumer, HResult, ReplayOptions};
use pretty_assertions::assert_eq;

type Consumer = Dx12ReplayConsumer<SoftwareDriver, HeadlessWindowFactory>;

const DEVICE: CaptureId = CaptureId(1);
const RESOURCE: CaptureId = CaptureId(2);

fn consumer() -> Consumer {
    let mut consumer = Dx12ReplayConsumer::new(
        SoftwareDriver::new(),
        HeadlessWindowFactory::new(),
        ReplayOptions::default(),
    );
    assert_eq!(consumer.create_device(CaptureId::NULL, 0xb000, DEVICE), HResult::S_OK);
    consumer
}

#[test]
fn object_is_torn_down_once_when_the_last_reference_goes() {
    let mut consumer = consumer();
    assert_eq!(
        consumer.create_committed_resource(DEVICE, &ResourceDesc::buffer(256), RESOURCE),
        HResult::S_OK
    );
    let native = consumer.object(RESOURCE).unwrap().object;
    consumer.get_gpu_virtual_address(RESOURCE, 0x7000_0000);
    assert_eq!(consumer.gpu_va_map().len(), 1);

    assert_eq!(consumer.add_ref(RESOURCE), 2);
    assert_eq!(consumer.object(RESOURCE).unwrap().ref_count, 2);

    consumer.release(RESOURCE);
    assert!(consumer.object(RESOURCE).is_some());
    assert_eq!(consumer.gpu_va_map().len(), 1);

    consumer.release(RESOURCE);
    assert!(consumer.object(RESOURCE).is_none());
    assert!(consumer.gpu_va_map().is_empty());
    assert!(!consumer.driver().is_live(native));

    // Further releases of the dead id resolve to nothing.
    assert_eq!(consumer.release(RESOURCE), 0);
    assert_eq!(consumer.objects().len(), 1);
    assert_eq!(consumer.driver().live_objects(), 1);
}

#[test]
fn null_and_unknown_ids_do_not_resolve() {
    let consumer = consumer();
    assert_eq!(consumer.map_object(CaptureId::NULL), None);
    assert_eq!(consumer.map_object(CaptureId(404)), None);
    assert_eq!(
        consumer.map_object(DEVICE),
        Some(consumer.object(DEVICE).unwrap().object)
    );
}

#[test]
fn calls_on_unknown_objects_fail_without_side_effects() {
    let mut consumer = consumer();
    assert_eq!(
        consumer.create_fence(CaptureId(404), 0, 0, CaptureId(5)),
        HResult::E_INVALIDARG
    );
    assert!(consumer.object(CaptureId(5)).is_none());
    assert_eq!(consumer.add_ref(CaptureId(404)), 0);
    assert_eq!(consumer.objects().len(), 1);
}

#[test]
fn resource_state_is_created_lazily() {
    let mut consumer = consumer();
    consumer.create_committed_resource(DEVICE, &ResourceDesc::buffer(64), RESOURCE);
    assert!(consumer.objects().extra::<ResourceInfo>(RESOURCE).is_err());

    let replay = consumer.get_gpu_virtual_address(RESOURCE, 0x1000);
    let info = consumer.objects().extra::<ResourceInfo>(RESOURCE).unwrap();
    assert_eq!(info.capture_address, 0x1000);
    assert_eq!(info.replay_address, replay);
    assert_eq!(info.address_range_size, 64);
}

#[test]
fn heap_allocation_moves_into_the_heap_object() {
    let mut consumer = consumer();
    let heap = CaptureId(9);
    consumer.process_create_heap_allocation_command(3, 4096);
    assert!(consumer.heap_allocations().contains(3));

    assert_eq!(
        consumer.open_existing_heap_from_address(DEVICE, 3, heap),
        HResult::S_OK
    );
    assert!(consumer.heap_allocations().is_empty());
    let info = consumer.objects().extra::<HeapInfo>(heap).unwrap();
    assert_eq!(info.external_allocation.len(), 4096);

    // The allocation was consumed.
    assert_eq!(
        consumer.open_existing_heap_from_address(DEVICE, 3, CaptureId(10)),
        HResult::E_FAIL
    );

    consumer.release(heap);
    assert!(consumer.object(heap).is_none());
}

#[test]
fn reopened_heap_keeps_every_allocation_it_was_given() {
    let mut consumer = consumer();
    let heap = CaptureId(9);
    consumer.process_create_heap_allocation_command(3, 4096);
    consumer.process_create_heap_allocation_command(4, 256);
    consumer.open_existing_heap_from_address(DEVICE, 3, heap);
    let native = consumer.object(heap).unwrap().object;

    consumer.driver_mut().reopen_heap_next(native);
    assert_eq!(
        consumer.open_existing_heap_from_address(DEVICE, 4, heap),
        HResult::S_OK
    );
    assert!(consumer.heap_allocations().is_empty());
    assert_eq!(consumer.object(heap).unwrap().ref_count, 2);
    let info = consumer.objects().extra::<HeapInfo>(heap).unwrap();
    assert_eq!(info.external_allocation.len(), 4096);
    assert_eq!(info.reopened_allocations.len(), 1);
    assert_eq!(info.reopened_allocations[0].len(), 256);

    consumer.release(heap);
    assert!(consumer.object(heap).is_some());
    consumer.release(heap);
    assert!(consumer.object(heap).is_none());
    assert!(!consumer.driver().is_live(native));
}

#[test]
fn failed_heap_open_frees_the_allocation() {
    let mut consumer = consumer();
    consumer.process_create_heap_allocation_command(3, 4096);
    consumer.driver_mut().fail_next(
        aero_d3d12_replay::software::FailPoint::OpenExistingHeap,
        HResult::E_OUTOFMEMORY,
    );
    assert_eq!(
        consumer.open_existing_heap_from_address(DEVICE, 3, CaptureId(9)),
        HResult::E_OUTOFMEMORY
    );
    assert!(consumer.heap_allocations().is_empty());
    assert!(consumer.object(CaptureId(9)).is_none());
}

#[test]
fn shutdown_releases_every_engine_reference() {
    let mut consumer = consumer();
    consumer.create_committed_resource(DEVICE, &ResourceDesc::buffer(64), RESOURCE);
    consumer.add_ref(RESOURCE);
    consumer.add_ref(DEVICE);
    consumer.process_create_heap_allocation_command(7, 128);

    consumer.shutdown();
    assert!(consumer.objects().is_empty());
    assert!(consumer.heap_allocations().is_empty());
    assert_eq!(consumer.driver().live_objects(), 0);
}
