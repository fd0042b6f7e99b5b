//! End-to-end behavior of the bridge against the instrumented backend.

use std::time::{Duration, Instant};

use gears::bridge::results::{ResultSlot, ResultTable};
use gears::bridge::worker::WorkerHealth;
use gears::bridge::{Bridge, TextureRequest};
use gears::format::GpuFormat;
use gears::options::ExecutionMode;
use gears::testing::{Call, CallLog, FakeBackend};
use gears::{GearsError, WorkerOptions};

fn options(execution: ExecutionMode) -> WorkerOptions {
    WorkerOptions {
        poll_interval_ms: 1,
        execution,
        ..WorkerOptions::default()
    }
}

fn rgba(unique_id: u32, edge: u32) -> (u32, u32, Vec<u8>) {
    (unique_id, edge, vec![0x7f; (edge * edge * 4) as usize])
}

fn create(bridge: &Bridge, (unique_id, edge, pixels): &(u32, u32, Vec<u8>)) {
    assert!(bridge.create_texture(&TextureRequest {
        unique_id: *unique_id,
        format_code: 4,
        width: *edge,
        height: *edge,
        mip_count: 1,
        pixels,
    }));
}

fn slots(bridge: &Bridge) -> Vec<ResultSlot> {
    bridge
        .queue()
        .with_results(|table| table.slots().to_vec())
        .unwrap()
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn start_fake(bridge: &Bridge, log: &CallLog) {
    let log = log.clone();
    bridge.start_with(move || Ok(FakeBackend::new(log))).unwrap();
}

#[test]
fn three_jobs_publish_into_a_four_slot_table() {
    let bridge = Bridge::new(options(ExecutionMode::HoldLock));
    let _ = bridge.register_results(ResultTable::new(4));

    // Queue all three before the worker exists so they share one cycle.
    for id in 1..=3 {
        create(&bridge, &rgba(id, 4));
    }
    start_fake(&bridge, &CallLog::default());
    wait_for(|| bridge.stats().executed == 3);

    let slots = slots(&bridge);
    assert!(bridge.stats().cycles >= 1);
    assert_eq!(
        slots.iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![1, 2, 3, 0]
    );
    let mut handles: Vec<u32> =
        slots[..3].iter().map(|s| s.texture_handle).collect();
    assert!(handles.iter().all(|&h| h != 0));
    handles.sort_unstable();
    handles.dedup();
    assert_eq!(handles.len(), 3);
    assert_eq!(slots[3], ResultSlot::EMPTY);
}

#[test]
fn more_creates_than_capacity_publish_exactly_capacity() {
    let bridge = Bridge::new(options(ExecutionMode::ReleaseLock));
    let _ = bridge.register_results(ResultTable::new(3));
    for id in 1..=8 {
        create(&bridge, &rgba(id, 2));
    }
    start_fake(&bridge, &CallLog::default());
    wait_for(|| bridge.stats().executed == 8);

    let stats = bridge.stats();
    assert_eq!(stats.published, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(
        slots(&bridge).iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(bridge.health(), WorkerHealth::Running);
}

#[test]
fn unknown_format_falls_back_to_rgba8() {
    let log = CallLog::default();
    let bridge = Bridge::new(options(ExecutionMode::HoldLock));
    let _ = bridge.register_results(ResultTable::new(1));
    start_fake(&bridge, &log);

    assert!(bridge.create_texture(&TextureRequest {
        unique_id: 11,
        format_code: 1234,
        width: 3,
        height: 3,
        mip_count: 1,
        pixels: &[0; 36],
    }));
    wait_for(|| slots(&bridge)[0].id == 11);

    assert_eq!(log.count(|c| matches!(c, Call::Convert { .. })), 0);
    assert_eq!(
        log.count(|c| matches!(
            c,
            Call::Upload { desc, .. } if desc.format == GpuFormat::Rgba8
        )),
        1
    );
}

#[test]
fn deleting_an_unpublished_handle_keeps_the_worker_running() {
    let log = CallLog::default();
    let bridge = Bridge::new(options(ExecutionMode::HoldLock));
    let _ = bridge.register_results(ResultTable::new(1));
    start_fake(&bridge, &log);

    bridge.delete_texture(777);
    create(&bridge, &rgba(1, 2));
    wait_for(|| bridge.stats().executed == 2);

    assert_eq!(log.count(|c| *c == Call::Delete(777)), 1);
    assert_eq!(bridge.health(), WorkerHealth::Running);
    assert_eq!(slots(&bridge)[0].id, 1);
}

#[test]
fn short_pixel_buffer_is_rejected_and_worker_survives() {
    let bridge = Bridge::new(options(ExecutionMode::HoldLock));
    let _ = bridge.register_results(ResultTable::new(2));
    start_fake(&bridge, &CallLog::default());

    assert!(bridge.create_texture(&TextureRequest {
        unique_id: 1,
        format_code: 12,
        width: 8,
        height: 8,
        mip_count: 1,
        pixels: &[0; 63],
    }));
    create(&bridge, &rgba(2, 2));
    wait_for(|| bridge.stats().executed == 2);

    assert_eq!(bridge.stats().failed, 1);
    let slots = slots(&bridge);
    assert_eq!(slots[0].id, 2);
    assert_eq!(slots[1], ResultSlot::EMPTY);
    assert_eq!(bridge.health(), WorkerHealth::Running);
}

#[test]
fn second_start_is_refused() {
    let bridge = Bridge::new(options(ExecutionMode::HoldLock));
    start_fake(&bridge, &CallLog::default());
    let err = bridge
        .start_with(|| Ok(FakeBackend::new(CallLog::default())))
        .unwrap_err();
    assert!(matches!(err, GearsError::AlreadyStarted));
}

#[test]
fn crashed_worker_can_be_replaced_and_drains_the_backlog() {
    let bridge = Bridge::new(options(ExecutionMode::HoldLock));
    let _ = bridge.register_results(ResultTable::new(4));
    bridge
        .start_with(|| {
            Ok(FakeBackend::new(CallLog::default()).panic_on_width(5))
        })
        .unwrap();

    create(&bridge, &rgba(1, 5));
    wait_for(|| bridge.health() == WorkerHealth::Crashed);

    create(&bridge, &rgba(2, 4));
    create(&bridge, &rgba(3, 4));
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(bridge.queue().len(), 2);
    assert_eq!(slots(&bridge)[0], ResultSlot::EMPTY);

    start_fake(&bridge, &CallLog::default());
    wait_for(|| bridge.queue().is_empty() && bridge.stats().published == 2);
    let ids: Vec<u32> = slots(&bridge).iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![2, 3, 0, 0]);
}

#[test]
fn failed_initialization_is_reported_and_restartable() {
    let bridge = Bridge::new(options(ExecutionMode::HoldLock));
    bridge
        .start_with(|| {
            Err::<FakeBackend, _>(gears::BackendError::Fence(
                "device lost".to_owned(),
            ))
        })
        .unwrap();
    wait_for(|| bridge.health() == WorkerHealth::Failed);

    start_fake(&bridge, &CallLog::default());
    wait_for(|| bridge.health() == WorkerHealth::Running);
}

#[test]
fn caller_lock_batches_jobs_into_one_cycle() {
    let log = CallLog::default();
    let bridge = Bridge::new(options(ExecutionMode::HoldLock));
    let _ = bridge.register_results(ResultTable::new(4));
    start_fake(&bridge, &log);

    bridge.lock_raw();
    for id in 1..=4 {
        create(&bridge, &rgba(id, 2));
    }
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(bridge.stats().executed, 0);
    assert!(bridge.unlock_raw());
    assert!(!bridge.unlock_raw());

    wait_for(|| bridge.stats().executed == 4);
    let ids: Vec<u32> = slots(&bridge).iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[test]
fn borrowed_table_receives_results() {
    let bridge = Bridge::new(options(ExecutionMode::HoldLock));
    let mut storage = vec![ResultSlot::EMPTY; 2];
    // SAFETY: `storage` outlives the registration, which ends below.
    let table =
        unsafe { ResultTable::from_raw_parts(storage.as_mut_ptr(), 2) }
            .unwrap();
    let _ = bridge.register_results(table);
    start_fake(&bridge, &CallLog::default());

    create(&bridge, &rgba(5, 2));
    wait_for(|| bridge.stats().published == 1);
    bridge.stop();
    let _ = bridge.queue().unregister_results();

    assert_eq!(storage[0].id, 5);
    assert_ne!(storage[0].texture_handle, 0);
    assert_eq!(storage[1], ResultSlot::EMPTY);
}

#[test]
fn stop_leaves_pending_jobs_queued() {
    let bridge = Bridge::new(WorkerOptions {
        poll_interval_ms: 60_000,
        ..WorkerOptions::default()
    });
    start_fake(&bridge, &CallLog::default());
    create(&bridge, &rgba(1, 2));
    bridge.stop();
    assert_eq!(bridge.health(), WorkerHealth::Stopped);
    assert_eq!(bridge.queue().len(), 1);
}
