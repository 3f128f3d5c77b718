//! Cross-queue fence emulation.
//!
//! Replay re-issues `Signal`/`Wait` through a different scheduler than the one that recorded the
//! capture. To keep the recorded dependency order observable, the engine tracks per-fence and
//! per-queue state alongside the native objects:
//!
//! - Each fence keeps the highest value applied so far and the CPU events / queues waiting on
//!   values it has not reached yet.
//! - Each queue keeps a FIFO of sync operations issued behind a wait that has not resolved.
//!   A signal queued behind an unresolved wait must not fire before that wait.
//!
//! A queue the application releases while it still has signals held behind a wait keeps that
//! state as a retired queue until the wait resolves, since the native queue still runs them.
//!
//! Resolution can cascade (a fence signal unblocks a queue, whose queued signal unblocks another
//! queue, ...). The cascade is driven by an explicit work list so stack depth stays constant no
//! matter how long the dependency chain is.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use crate::driver::{Driver, WaitStatus};
use crate::error::ReplayError;
use crate::handles::{CaptureId, EventHandle, NativeHandle};
use crate::object_table::{ExtraInfoKind, ObjectTable};

/// A fence as seen by the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FenceTarget {
    /// An application fence, keyed by its capture id.
    Object(CaptureId),
    /// The private lockstep fence owned by the given queue.
    QueueSync(CaptureId),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WaitingObjects {
    pub events: Vec<EventHandle>,
    pub queues: Vec<CaptureId>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FenceInfo {
    pub last_signaled_value: u64,
    pub waiting_objects: BTreeMap<u64, WaitingObjects>,
}

impl FenceInfo {
    pub fn new(initial_value: u64) -> Self {
        Self {
            last_signaled_value: initial_value,
            waiting_objects: BTreeMap::new(),
        }
    }

    pub fn is_reached(&self, value: u64) -> bool {
        value <= self.last_signaled_value
    }

    /// Splits off every waiting entry keyed at or below `value`, in ascending order.
    fn take_reached(&mut self, value: u64) -> BTreeMap<u64, WaitingObjects> {
        let above = match value.checked_add(1) {
            Some(next) => self.waiting_objects.split_off(&next),
            None => BTreeMap::new(),
        };
        core::mem::replace(&mut self.waiting_objects, above)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSyncEvent {
    pub is_wait: bool,
    pub is_signaled: bool,
    pub fence: FenceTarget,
    pub value: u64,
}

impl QueueSyncEvent {
    pub fn wait(fence: FenceTarget, value: u64) -> Self {
        Self {
            is_wait: true,
            is_signaled: false,
            fence,
            value,
        }
    }

    pub fn signal(fence: FenceTarget, value: u64) -> Self {
        Self {
            is_wait: false,
            is_signaled: false,
            fence,
            value,
        }
    }

    fn blocks(&self) -> bool {
        self.is_wait && !self.is_signaled
    }
}

/// Private fence and event used to hold the host in lockstep with a queue.
#[derive(Debug)]
pub struct QueueSyncFence {
    pub fence: NativeHandle,
    pub event: EventHandle,
    pub value: u64,
    pub info: FenceInfo,
}

#[derive(Debug)]
pub struct CommandQueueInfo {
    pub device: NativeHandle,
    pub pending_events: VecDeque<QueueSyncEvent>,
    pub sync_fence: Option<QueueSyncFence>,
}

impl CommandQueueInfo {
    pub fn new(device: NativeHandle) -> Self {
        Self {
            device,
            pending_events: VecDeque::new(),
            sync_fence: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self.pending_events.is_empty()
    }

    /// Sync state to keep once the queue is released, or `None` when the queue was not blocked.
    /// Signals to the queue's own lockstep fence are dropped with that fence.
    pub fn into_retired(self, queue: CaptureId) -> Option<Self> {
        let pending_events: VecDeque<_> = self
            .pending_events
            .into_iter()
            .filter(|event| event.fence != FenceTarget::QueueSync(queue))
            .collect();
        if pending_events.is_empty() {
            return None;
        }
        Some(Self {
            device: self.device,
            pending_events,
            sync_fence: None,
        })
    }
}

/// Released queues whose held signals have not run yet.
pub type RetiredQueues = HashMap<CaptureId, CommandQueueInfo>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncAction {
    SignalFence {
        fence: FenceTarget,
        value: u64,
    },
    /// `fence` reached `value`; mark the queue's matching waits and drain it.
    NotifyQueue {
        queue: CaptureId,
        fence: FenceTarget,
        value: u64,
    },
}

pub(crate) fn fence_info_mut(
    objects: &mut ObjectTable,
    target: FenceTarget,
) -> Result<&mut FenceInfo, ReplayError> {
    match target {
        FenceTarget::Object(fence) => objects.extra_mut::<FenceInfo>(fence),
        FenceTarget::QueueSync(queue) => objects
            .extra_mut::<CommandQueueInfo>(queue)?
            .sync_fence
            .as_mut()
            .map(|sync| &mut sync.info)
            .ok_or(ReplayError::MissingExtraInfo {
                capture_id: queue,
                expected: ExtraInfoKind::Fence,
            }),
    }
}

/// Bounded CPU wait. Timeouts and failures are reported and otherwise ignored.
pub(crate) fn wait_for_event<D: Driver + ?Sized>(
    driver: &mut D,
    event: EventHandle,
    timeout: Duration,
) -> WaitStatus {
    let status = driver.wait_event(event, timeout);
    match status {
        WaitStatus::Signaled => {}
        WaitStatus::TimedOut => warn!(
            ?event,
            timeout_ms = timeout.as_millis() as u64,
            "timed out waiting for fence event"
        ),
        WaitStatus::Failed(code) => warn!(?event, code, "waiting for fence event failed"),
    }
    status
}

/// Borrowed view of the engine state the emulator mutates.
pub struct SyncEmulator<'a, D: Driver> {
    objects: &'a mut ObjectTable,
    driver: &'a mut D,
    retired_queues: Option<&'a mut RetiredQueues>,
    wait_timeout: Duration,
}

impl<'a, D: Driver> SyncEmulator<'a, D> {
    pub fn new(objects: &'a mut ObjectTable, driver: &'a mut D, wait_timeout: Duration) -> Self {
        Self {
            objects,
            driver,
            retired_queues: None,
            wait_timeout,
        }
    }

    /// Lets fence signals drain queues that were released while blocked.
    pub fn with_retired_queues(mut self, retired_queues: &'a mut RetiredQueues) -> Self {
        self.retired_queues = Some(retired_queues);
        self
    }

    /// Applies `Signal(fence, value)` and everything it transitively unblocks.
    pub fn signal_fence(&mut self, fence: FenceTarget, value: u64) {
        let mut work = VecDeque::from([SyncAction::SignalFence { fence, value }]);
        while let Some(action) = work.pop_front() {
            match action {
                SyncAction::SignalFence { fence, value } => {
                    self.apply_fence_signal(fence, value, &mut work)
                }
                SyncAction::NotifyQueue {
                    queue,
                    fence,
                    value,
                } => self.resolve_queue(queue, fence, value, &mut work),
            }
        }
    }

    /// A `Signal` issued on `queue`. Applied now unless an earlier wait on the queue is pending.
    pub fn queue_signal(&mut self, queue: CaptureId, fence: FenceTarget, value: u64) {
        let queue_info = match self.objects.extra_mut::<CommandQueueInfo>(queue) {
            Ok(info) => info,
            Err(err) => {
                error!(capture_id = %queue, %err, "queue signal on queue without sync state");
                return;
            }
        };
        if queue_info.is_blocked() {
            queue_info
                .pending_events
                .push_back(QueueSyncEvent::signal(fence, value));
            debug!(capture_id = %queue, ?fence, value, "queue blocked, signal deferred");
            return;
        }
        self.signal_fence(fence, value);
    }

    /// A `Wait` issued on `queue`.
    pub fn queue_wait(&mut self, queue: CaptureId, fence: CaptureId, value: u64) {
        match self.objects.extra::<FenceInfo>(fence) {
            Ok(info) if info.is_reached(value) => {
                trace!(capture_id = %queue, fence = %fence, value, "queue wait already satisfied");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                error!(capture_id = %fence, %err, "queue wait on fence without sync state");
                return;
            }
        }

        let target = FenceTarget::Object(fence);
        match self.objects.extra_mut::<CommandQueueInfo>(queue) {
            Ok(info) => info
                .pending_events
                .push_back(QueueSyncEvent::wait(target, value)),
            Err(err) => {
                error!(capture_id = %queue, %err, "queue wait on queue without sync state");
                return;
            }
        }
        if let Ok(info) = self.objects.extra_mut::<FenceInfo>(fence) {
            info.waiting_objects
                .entry(value)
                .or_default()
                .queues
                .push(queue);
        }
        debug!(capture_id = %queue, fence = %fence, value, "queue blocked on fence");
    }

    /// `SetEventOnCompletion(fence, value, event)`. Waits immediately when the value is
    /// already reached, otherwise parks the event until a signal reaches it.
    pub fn set_event_on_completion(&mut self, fence: FenceTarget, value: u64, event: EventHandle) {
        let info = match fence_info_mut(self.objects, fence) {
            Ok(info) => info,
            Err(err) => {
                error!(?fence, %err, "event registration on fence without sync state");
                return;
            }
        };
        if info.is_reached(value) {
            wait_for_event(self.driver, event, self.wait_timeout);
        } else {
            info.waiting_objects
                .entry(value)
                .or_default()
                .events
                .push(event);
        }
    }

    fn apply_fence_signal(
        &mut self,
        fence: FenceTarget,
        value: u64,
        work: &mut VecDeque<SyncAction>,
    ) {
        let info = match fence_info_mut(self.objects, fence) {
            Ok(info) => info,
            Err(err) => {
                error!(?fence, %err, "signal on fence without sync state");
                return;
            }
        };
        let released = info.take_reached(value);
        info.last_signaled_value = info.last_signaled_value.max(value);
        trace!(?fence, value, released = released.len(), "fence signaled");

        for (key, waiting) in released {
            for event in waiting.events {
                wait_for_event(self.driver, event, self.wait_timeout);
            }
            work.extend(waiting.queues.into_iter().map(|queue| SyncAction::NotifyQueue {
                queue,
                fence,
                value: key,
            }));
        }
    }

    fn resolve_queue(
        &mut self,
        queue: CaptureId,
        fence: FenceTarget,
        value: u64,
        work: &mut VecDeque<SyncAction>,
    ) {
        let retired = self
            .retired_queues
            .as_deref_mut()
            .and_then(|retired| retired.get_mut(&queue));
        let is_retired = retired.is_some();
        let info = match retired {
            Some(info) => info,
            None => match self.objects.extra_mut::<CommandQueueInfo>(queue) {
                Ok(info) => info,
                Err(err) => {
                    error!(capture_id = %queue, %err, "fence released a queue without sync state");
                    return;
                }
            },
        };

        for entry in info
            .pending_events
            .iter_mut()
            .filter(|e| e.is_wait && e.fence == fence && e.value == value)
        {
            entry.is_signaled = true;
        }

        while let Some(entry) = info.pending_events.pop_front() {
            if entry.blocks() {
                info.pending_events.push_front(entry);
                break;
            }
            if !entry.is_wait {
                work.push_back(SyncAction::SignalFence {
                    fence: entry.fence,
                    value: entry.value,
                });
            }
        }
        if info.pending_events.is_empty() {
            debug!(capture_id = %queue, "queue unblocked");
            if is_retired {
                if let Some(retired) = self.retired_queues.as_deref_mut() {
                    retired.remove(&queue);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::object_table::ObjectInfo;
    use crate::software::SoftwareDriver;

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn add_fence(objects: &mut ObjectTable, id: u64, initial: u64) -> CaptureId {
        let id = CaptureId(id);
        let info: &mut ObjectInfo = objects.create(id, NativeHandle(100 + id.0)).unwrap();
        info.set_extra(FenceInfo::new(initial)).unwrap();
        id
    }

    fn add_queue(objects: &mut ObjectTable, id: u64) -> CaptureId {
        let id = CaptureId(id);
        objects
            .create(id, NativeHandle(100 + id.0))
            .unwrap()
            .set_extra(CommandQueueInfo::new(NativeHandle(1)))
            .unwrap();
        id
    }

    fn last_value(objects: &ObjectTable, fence: CaptureId) -> u64 {
        objects.extra::<FenceInfo>(fence).unwrap().last_signaled_value
    }

    #[test]
    fn signal_behind_a_cross_queue_wait_fires_only_after_the_wait_resolves() {
        let mut objects = ObjectTable::new();
        let mut driver = SoftwareDriver::new();
        let f = add_fence(&mut objects, 1, 0);
        let g = add_fence(&mut objects, 2, 0);
        let queue_a = add_queue(&mut objects, 10);
        let queue_b = add_queue(&mut objects, 11);

        let mut sync = SyncEmulator::new(&mut objects, &mut driver, TIMEOUT);
        sync.queue_wait(queue_a, f, 5);
        sync.queue_signal(queue_a, FenceTarget::Object(g), 1);
        drop(sync);

        assert_eq!(last_value(&objects, g), 0);
        assert_eq!(
            objects
                .extra::<CommandQueueInfo>(queue_a)
                .unwrap()
                .pending_events
                .len(),
            2
        );

        let mut sync = SyncEmulator::new(&mut objects, &mut driver, TIMEOUT);
        sync.queue_signal(queue_b, FenceTarget::Object(f), 4);
        drop(sync);
        assert_eq!(last_value(&objects, f), 4);
        assert_eq!(last_value(&objects, g), 0);

        let mut sync = SyncEmulator::new(&mut objects, &mut driver, TIMEOUT);
        sync.queue_signal(queue_b, FenceTarget::Object(f), 5);
        drop(sync);
        assert_eq!(last_value(&objects, f), 5);
        assert_eq!(last_value(&objects, g), 1);
        assert!(!objects.extra::<CommandQueueInfo>(queue_a).unwrap().is_blocked());
        assert!(objects.extra::<FenceInfo>(f).unwrap().waiting_objects.is_empty());
    }

    #[test]
    fn wait_on_reached_value_does_not_block_the_queue() {
        let mut objects = ObjectTable::new();
        let mut driver = SoftwareDriver::new();
        let f = add_fence(&mut objects, 1, 3);
        let g = add_fence(&mut objects, 2, 0);
        let queue = add_queue(&mut objects, 10);

        let mut sync = SyncEmulator::new(&mut objects, &mut driver, TIMEOUT);
        sync.queue_wait(queue, f, 3);
        sync.queue_signal(queue, FenceTarget::Object(g), 7);
        drop(sync);

        assert_eq!(last_value(&objects, g), 7);
        assert!(!objects.extra::<CommandQueueInfo>(queue).unwrap().is_blocked());
    }

    #[test]
    fn signal_releases_every_lower_key_in_ascending_order() {
        let mut objects = ObjectTable::new();
        let mut driver = SoftwareDriver::new();
        let f = add_fence(&mut objects, 1, 0);
        let e2 = driver.create_event().unwrap();
        let e4 = driver.create_event().unwrap();
        let e9 = driver.create_event().unwrap();

        let mut sync = SyncEmulator::new(&mut objects, &mut driver, TIMEOUT);
        sync.set_event_on_completion(FenceTarget::Object(f), 4, e4);
        sync.set_event_on_completion(FenceTarget::Object(f), 9, e9);
        sync.set_event_on_completion(FenceTarget::Object(f), 2, e2);
        sync.signal_fence(FenceTarget::Object(f), 6);
        drop(sync);

        assert_eq!(driver.waited_events(), &[e2, e4]);
        let info = objects.extra::<FenceInfo>(f).unwrap();
        assert_eq!(info.last_signaled_value, 6);
        assert_eq!(info.waiting_objects.keys().copied().collect::<Vec<_>>(), vec![9]);
    }

    #[test]
    fn lower_signal_never_moves_the_fence_backwards() {
        let mut objects = ObjectTable::new();
        let mut driver = SoftwareDriver::new();
        let f = add_fence(&mut objects, 1, 0);

        let mut sync = SyncEmulator::new(&mut objects, &mut driver, TIMEOUT);
        sync.signal_fence(FenceTarget::Object(f), 8);
        sync.signal_fence(FenceTarget::Object(f), 3);
        drop(sync);
        assert_eq!(last_value(&objects, f), 8);
    }

    #[test]
    fn completion_event_at_or_below_signaled_value_waits_immediately() {
        let mut objects = ObjectTable::new();
        let mut driver = SoftwareDriver::new();
        let f = add_fence(&mut objects, 1, 0);
        let event = driver.create_event().unwrap();

        let mut sync = SyncEmulator::new(&mut objects, &mut driver, TIMEOUT);
        for value in [1, 2, 5] {
            sync.signal_fence(FenceTarget::Object(f), value);
        }
        for value in [0, 2, 5] {
            sync.set_event_on_completion(FenceTarget::Object(f), value, event);
        }
        drop(sync);

        assert_eq!(driver.waited_events(), &[event, event, event]);
        assert!(objects.extra::<FenceInfo>(f).unwrap().waiting_objects.is_empty());
    }

    #[test]
    fn long_dependency_chain_resolves_without_recursion() {
        const QUEUES: u64 = 20_000;

        let mut objects = ObjectTable::new();
        let mut driver = SoftwareDriver::new();
        // Queue i waits on fence i and then signals fence i + 1.
        let fences: Vec<_> = (0..=QUEUES).map(|i| add_fence(&mut objects, 1 + i, 0)).collect();
        let queues: Vec<_> = (0..QUEUES)
            .map(|i| add_queue(&mut objects, 1_000_000 + i))
            .collect();

        let mut sync = SyncEmulator::new(&mut objects, &mut driver, TIMEOUT);
        for (i, &queue) in queues.iter().enumerate() {
            sync.queue_wait(queue, fences[i], 1);
            sync.queue_signal(queue, FenceTarget::Object(fences[i + 1]), 1);
        }
        sync.signal_fence(FenceTarget::Object(fences[0]), 1);
        drop(sync);

        for fence in fences {
            assert_eq!(last_value(&objects, fence), 1);
        }
    }

    #[test]
    fn deferred_signals_keep_submission_order() {
        let mut objects = ObjectTable::new();
        let mut driver = SoftwareDriver::new();
        let f = add_fence(&mut objects, 1, 0);
        let g = add_fence(&mut objects, 2, 0);
        let queue = add_queue(&mut objects, 10);
        let e3 = driver.create_event().unwrap();
        let e5 = driver.create_event().unwrap();

        let mut sync = SyncEmulator::new(&mut objects, &mut driver, TIMEOUT);
        sync.set_event_on_completion(FenceTarget::Object(g), 5, e5);
        sync.set_event_on_completion(FenceTarget::Object(g), 3, e3);
        sync.queue_wait(queue, f, 1);
        sync.queue_signal(queue, FenceTarget::Object(g), 3);
        sync.queue_signal(queue, FenceTarget::Object(g), 5);
        sync.signal_fence(FenceTarget::Object(f), 1);
        drop(sync);

        assert_eq!(driver.waited_events(), &[e3, e5]);
        assert_eq!(last_value(&objects, g), 5);
    }

    #[test]
    fn missing_fence_state_is_skipped() {
        let mut objects = ObjectTable::new();
        let mut driver = SoftwareDriver::new();
        let queue = add_queue(&mut objects, 10);
        objects.create(CaptureId(3), NativeHandle(3)).unwrap();

        let mut sync = SyncEmulator::new(&mut objects, &mut driver, TIMEOUT);
        sync.queue_wait(queue, CaptureId(3), 1);
        sync.signal_fence(FenceTarget::Object(CaptureId(3)), 1);
        sync.signal_fence(FenceTarget::QueueSync(queue), 1);
        drop(sync);

        assert!(!objects.extra::<CommandQueueInfo>(queue).unwrap().is_blocked());
    }
}
