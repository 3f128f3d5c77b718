use std::cell::RefCell;
use std::rc::Rc;

use aero_d3d12_replay::driver::{HeapType, ResourceDesc};
use aero_d3d12_replay::gpu_va::GpuVaMap;
use aero_d3d12_replay::software::SoftwareDriver;
use aero_d3d12_replay::window::HeadlessWindowFactory;
use aero_d3d12_replay::{
    CaptureId, Dx12ReplayConsumer, HResult, NativeHandle, ReplayError, ReplayOptions,
};
use pretty_assertions::assert_eq;

type Consumer = Dx12ReplayConsumer<SoftwareDriver, HeadlessWindowFactory>;

const DEVICE: CaptureId = CaptureId(1);
const UPLOAD: CaptureId = CaptureId(2);
const MEMORY_ID: u64 = 0x55;

fn consumer() -> Consumer {
    let mut consumer = Dx12ReplayConsumer::new(
        SoftwareDriver::new(),
        HeadlessWindowFactory::new(),
        ReplayOptions::default(),
    );
    assert_eq!(consumer.create_device(CaptureId::NULL, 0xb000, DEVICE), HResult::S_OK);
    assert_eq!(
        consumer.create_committed_resource(DEVICE, &ResourceDesc::buffer(16), UPLOAD),
        HResult::S_OK
    );
    consumer
}

fn contents(consumer: &Consumer, id: CaptureId) -> Vec<u8> {
    let native = consumer.object(id).unwrap().object;
    consumer.driver().resource_contents(native).unwrap().to_vec()
}

fn fatal_messages(consumer: &mut Consumer) -> Rc<RefCell<Vec<String>>> {
    let messages = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&messages);
    consumer.set_fatal_error_handler(move |msg| sink.borrow_mut().push(msg.to_string()));
    messages
}

#[test]
fn memory_stays_writable_until_the_last_unmap() {
    let mut consumer = consumer();
    assert_eq!(consumer.map_resource(UPLOAD, 0, None, MEMORY_ID), HResult::S_OK);
    assert_eq!(consumer.map_resource(UPLOAD, 0, None, MEMORY_ID), HResult::S_OK);
    assert!(consumer.mapped_memory().contains(MEMORY_ID));

    consumer.process_fill_memory_command(MEMORY_ID, 4, &[1, 2, 3, 4]);
    assert_eq!(&contents(&consumer, UPLOAD)[..8], &[0, 0, 0, 0, 1, 2, 3, 4]);

    consumer.unmap_resource(UPLOAD, 0, None);
    assert!(consumer.mapped_memory().contains(MEMORY_ID));
    consumer.process_fill_memory_command(MEMORY_ID, 0, &[9]);
    assert_eq!(contents(&consumer, UPLOAD)[0], 9);

    consumer.unmap_resource(UPLOAD, 0, None);
    assert!(!consumer.mapped_memory().contains(MEMORY_ID));

    // Writes to memory that is no longer mapped are dropped.
    consumer.process_fill_memory_command(MEMORY_ID, 0, &[7]);
    assert_eq!(contents(&consumer, UPLOAD)[0], 9);
}

#[test]
fn out_of_bounds_fill_is_skipped() {
    let mut consumer = consumer();
    consumer.map_resource(UPLOAD, 0, None, MEMORY_ID);
    consumer.process_fill_memory_command(MEMORY_ID, 12, &[1; 8]);
    assert_eq!(contents(&consumer, UPLOAD), vec![0; 16]);
}

#[test]
fn default_heap_resources_fail_to_map_without_tracking() {
    let mut consumer = consumer();
    let gpu_only = CaptureId(3);
    let desc = ResourceDesc {
        width: 16,
        heap_type: HeapType::Default,
    };
    consumer.create_committed_resource(DEVICE, &desc, gpu_only);
    assert_eq!(
        consumer.map_resource(gpu_only, 0, None, MEMORY_ID),
        HResult::E_INVALIDARG
    );
    assert!(consumer.mapped_memory().is_empty());
}

#[test]
fn releasing_a_mapped_resource_drops_its_mapping() {
    let mut consumer = consumer();
    consumer.map_resource(UPLOAD, 0, None, MEMORY_ID);
    consumer.release(UPLOAD);
    assert!(consumer.mapped_memory().is_empty());
    consumer.process_fill_memory_command(MEMORY_ID, 0, &[1]);
}

#[test]
fn captured_addresses_translate_into_replay_ranges() {
    let mut consumer = consumer();
    let other = CaptureId(3);
    consumer.create_committed_resource(DEVICE, &ResourceDesc::buffer(0x100), other);

    let replay_upload = consumer.get_gpu_virtual_address(UPLOAD, 0x10_0000);
    let replay_other = consumer.get_gpu_virtual_address(other, 0x20_0000);
    assert_eq!(consumer.map_gpu_virtual_address(0x10_0008), replay_upload + 8);
    assert_eq!(consumer.map_gpu_virtual_address(0x20_00ff), replay_other + 0xff);
    assert_eq!(consumer.map_gpu_virtual_address(0), 0);

    let mut addresses = [0x20_0010, 0, 0x10_0000];
    consumer.map_gpu_virtual_addresses(&mut addresses);
    assert_eq!(addresses, [replay_other + 0x10, 0, replay_upload]);
}

#[test]
fn untranslatable_address_reports_a_fatal_error() {
    let mut consumer = consumer();
    let messages = fatal_messages(&mut consumer);
    consumer.get_gpu_virtual_address(UPLOAD, 0x10_0000);

    // One past the end of the recorded range.
    assert_eq!(consumer.map_gpu_virtual_address(0x10_0010), 0x10_0010);
    assert_eq!(messages.borrow().len(), 1);

    consumer.release(UPLOAD);
    assert_eq!(consumer.map_gpu_virtual_address(0x10_0000), 0x10_0000);
    assert_eq!(messages.borrow().len(), 2);
}

#[test]
fn removing_a_range_twice_is_harmless() {
    let resource = NativeHandle(8);
    let mut map = GpuVaMap::new();
    map.add_range(resource, 0x1000, 0x9000, 0x100).unwrap();

    assert!(map.remove_range(resource, 0x1000, 0x100));
    assert!(!map.remove_range(resource, 0x1000, 0x100));
    assert_eq!(map.translate(0x1000), Err(ReplayError::UnmappedGpuVa(0x1000)));
}
