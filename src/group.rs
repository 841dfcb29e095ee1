//! Group Controller (C7): the lifecycle state machine that wires C1–C6
//! together for one group, owns its TX periodic task handles, and emits
//! summary events from a 1 Hz poll loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::archive::{Archive, GroupSummary, SlotRecordMerge};
use crate::bus::{BusManager, CanFrame, TaskHandle};
use crate::classifier::SlotStatusClassifier;
use crate::diag::MultiSlotDiagEngine;
use crate::dispatch::AppFrameTable;
use crate::error::CoreError;
use crate::scheduler::Scheduler;
use crate::slot::{SlotId, SlotTable};

/// `idle -> running -> {paused <-> running} -> stopped` (design §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// A periodic TX message with a finite round-robin list of payloads
/// (design §4.7 `PeriodicSwitchMsg1`/`PeriodicSwitchMsg2`).
#[derive(Clone)]
pub struct SwitchMessage {
    pub id: u32,
    pub fd: bool,
    pub payloads: Vec<Vec<u8>>,
}

/// Static per-group configuration handed to [`GroupController::new`].
pub struct GroupConfig {
    pub project_name: String,
    pub max_slots: u16,
    pub aging_hours: Option<f64>,
    pub non_recoverable: Vec<i8>,
    pub alarm_delay: Duration,
    pub switch_msg1: Option<SwitchMessage>,
    pub switch_msg2: Option<SwitchMessage>,
    pub periodic_diag_interval: Duration,
    pub periodic_rediag_interval: Duration,
}

struct LifecycleState {
    kind: GroupState,
    start_monotonic: Option<Instant>,
    paused_at: Option<Instant>,
    accumulated_pause: Duration,
    table: Option<u64>,
}

/// One group's summary, as emitted by the 1 Hz poll loop (design §4.7).
#[derive(Debug, Clone, Default)]
pub struct SummaryEvent {
    pub total: usize,
    pub good: usize,
    pub bad: usize,
    pub pass_rate: f64,
    pub max_temperature: i32,
}

struct SwitchTask {
    ch1: TaskHandle,
    ch2: TaskHandle,
    payloads: Vec<Vec<u8>>,
    next: usize,
}

#[derive(Default)]
struct TxTasks {
    switch1: Option<SwitchTask>,
    switch2: Option<SwitchTask>,
}

/// Shared teardown used by both an explicit `stop()` call and the poll
/// thread's own aging-timeout self-stop (design §4.7 "on `stop` or on
/// `elapsed ≥ aging_hours·3600`"). Returns the final summary.
#[allow(clippy::too_many_arguments)]
fn teardown(
    bus: &BusManager,
    diag: &MultiSlotDiagEngine,
    archive: &dyn Archive,
    classifier: &SlotStatusClassifier,
    latch: &Mutex<SlotTable<i8>>,
    non_recoverable: &[i8],
    elapsed: Duration,
    alarm_delay: Duration,
    scheduler: Option<Scheduler>,
    tx_tasks: &mut TxTasks,
    table: Option<u64>,
) -> SummaryEvent {
    if let Some(scheduler) = scheduler {
        scheduler.stop(Duration::from_secs(2));
    }
    stop_tx_tasks(tx_tasks);
    diag.shutdown();
    if let Err(error) = bus.shutdown() {
        tracing::warn!(%error, "bus shutdown reported an error");
    }

    let summary = compute_summary(classifier, latch, non_recoverable, elapsed, alarm_delay);
    if let Some(table) = table {
        archive.finalize(
            table,
            &GroupSummary { total: summary.total, good: summary.good, bad: summary.bad, pass_rate: summary.pass_rate, max_temperature: summary.max_temperature },
        );
    }
    latch.lock().unwrap().clear_all();
    summary
}

/// Evaluates the alarm-delay display rule (design §4.7): within
/// `alarm_delay` of group start, a transient status in `{-3,-2,-1,1,2,3,4}`
/// is shown as nominal. Classification/latching are untouched; this only
/// affects the summary counts.
fn display_status(status: i8, elapsed: Duration, alarm_delay: Duration) -> i8 {
    const TRANSIENT: [i8; 7] = [-3, -2, -1, 1, 2, 3, 4];
    if elapsed < alarm_delay && TRANSIENT.contains(&status) {
        1
    } else {
        status
    }
}

/// Applies invariant 1's latch rule and computes the group summary (design
/// §4.3 step, §4.7 "1 Hz poll task"). A factored-out free function so both
/// [`GroupController::stop`] and the background poll thread can call it
/// without holding a `&GroupController`.
fn compute_summary(
    classifier: &SlotStatusClassifier,
    latch: &Mutex<SlotTable<i8>>,
    non_recoverable: &[i8],
    elapsed: Duration,
    alarm_delay: Duration,
) -> SummaryEvent {
    let snapshot = classifier.snapshot();
    let mut total = 0;
    let mut good = 0;
    let mut bad = 0;
    let mut max_temperature = i32::MIN;

    let mut latch = latch.lock().unwrap();
    for (slot, record) in &snapshot {
        if record.status == -5 || record.status == -4 {
            continue;
        }
        total += 1;
        max_temperature = max_temperature.max(record.temperature);

        // Remap the whole transient set to nominal *before* latching, so the
        // window suppresses it uniformly instead of only the displayed count.
        let remapped = display_status(record.status, elapsed, alarm_delay);
        let previously_latched = latch.get(*slot).copied();
        let latched_status = match previously_latched {
            Some(prev) if non_recoverable.contains(&prev) => prev,
            _ => remapped,
        };
        latch.set(*slot, latched_status);

        if non_recoverable.contains(&latched_status) {
            bad += 1;
        } else if latched_status == 1 {
            good += 1;
        }
    }

    let pass_rate = if total > 0 { good as f64 / total as f64 } else { 0.0 };
    SummaryEvent {
        total,
        good,
        bad,
        pass_rate,
        max_temperature: if max_temperature == i32::MIN { 0 } else { max_temperature },
    }
}

/// Lifecycle state machine for one group; owns C1–C6 and drives them
/// through start/pause/resume/stop.
pub struct GroupController {
    config: GroupConfig,
    bus: Arc<BusManager>,
    classifier: Arc<SlotStatusClassifier>,
    diag: Arc<MultiSlotDiagEngine>,
    archive: Arc<dyn Archive>,

    lifecycle: Arc<Mutex<LifecycleState>>,
    latch: Arc<Mutex<SlotTable<i8>>>,
    scheduler: Arc<Mutex<Option<Scheduler>>>,
    tx_tasks: Arc<Mutex<TxTasks>>,

    poll_stop: Arc<AtomicBool>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
    last_summary: Arc<Mutex<SummaryEvent>>,
    app_rx1: Arc<AppFrameTable>,
    app_rx2: Arc<AppFrameTable>,
}

impl GroupController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GroupConfig,
        bus: Arc<BusManager>,
        classifier: Arc<SlotStatusClassifier>,
        diag: Arc<MultiSlotDiagEngine>,
        archive: Arc<dyn Archive>,
        app_rx1: Arc<AppFrameTable>,
        app_rx2: Arc<AppFrameTable>,
    ) -> Self {
        let max_slots = config.max_slots;
        Self {
            config,
            bus,
            classifier,
            diag,
            archive,
            app_rx1,
            app_rx2,
            lifecycle: Arc::new(Mutex::new(LifecycleState {
                kind: GroupState::Idle,
                start_monotonic: None,
                paused_at: None,
                accumulated_pause: Duration::ZERO,
                table: None,
            })),
            latch: Arc::new(Mutex::new(SlotTable::new(max_slots))),
            scheduler: Arc::new(Mutex::new(None)),
            tx_tasks: Arc::new(Mutex::new(TxTasks::default())),
            poll_stop: Arc::new(AtomicBool::new(false)),
            poll_handle: Mutex::new(None),
            last_summary: Arc::new(Mutex::new(SummaryEvent::default())),
        }
    }

    pub fn state(&self) -> GroupState {
        self.lifecycle.lock().unwrap().kind
    }

    pub fn last_summary(&self) -> SummaryEvent {
        self.last_summary.lock().unwrap().clone()
    }

    pub fn record(&self, slot: SlotId) -> Option<crate::classifier::SlotRecord> {
        self.classifier.record(slot)
    }

    /// The last decoded app-rx1 signal map for `slot`, if any has arrived
    /// (design §3 per-slot state).
    pub fn app_rx1(&self, slot: SlotId) -> Option<crate::codec::SignalMap> {
        self.app_rx1.record(slot)
    }

    /// The last decoded app-rx2 signal map for `slot`, if any has arrived
    /// (design §3 per-slot state).
    pub fn app_rx2(&self, slot: SlotId) -> Option<crate::codec::SignalMap> {
        self.app_rx2.record(slot)
    }

    /// The group's diagnostic engine, for operator-triggered pending reads
    /// and writes (design §4.6 "pending diagnostics").
    pub fn diag(&self) -> &Arc<MultiSlotDiagEngine> {
        &self.diag
    }

    /// `idle -> running`: records the start time, resets latches, registers
    /// periodic jobs, starts TX periodic tasks and the 1 Hz poll loop
    /// (design §4.7).
    pub fn start(&self) -> Result<(), CoreError> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if lifecycle.kind != GroupState::Idle && lifecycle.kind != GroupState::Stopped {
            return Err(CoreError::InvalidState(format!("cannot start from {:?}", lifecycle.kind)));
        }
        self.latch.lock().unwrap().clear_all();
        lifecycle.kind = GroupState::Running;
        lifecycle.start_monotonic = Some(Instant::now());
        lifecycle.accumulated_pause = Duration::ZERO;
        lifecycle.table = Some(self.archive.begin_table(&self.config.project_name));
        drop(lifecycle);

        *self.tx_tasks.lock().unwrap() = self.start_tx_tasks()?;

        let scheduler = Scheduler::start();
        self.register_periodic_jobs(&scheduler);
        *self.scheduler.lock().unwrap() = Some(scheduler);

        self.poll_stop.store(false, Ordering::Relaxed);
        *self.poll_handle.lock().unwrap() = Some(self.spawn_poll_thread());
        Ok(())
    }

    /// `running -> paused`: suspends the scheduler and stops TX tasks
    /// without clearing state (design §4.7).
    pub fn pause(&self) -> Result<(), CoreError> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if lifecycle.kind != GroupState::Running {
            return Err(CoreError::InvalidState(format!("cannot pause from {:?}", lifecycle.kind)));
        }
        lifecycle.kind = GroupState::Paused;
        lifecycle.paused_at = Some(Instant::now());
        drop(lifecycle);

        if let Some(scheduler) = self.scheduler.lock().unwrap().take() {
            scheduler.stop(Duration::from_secs(2));
        }
        stop_tx_tasks(&mut self.tx_tasks.lock().unwrap());
        Ok(())
    }

    /// `paused -> running`: restores accumulated pause, restarts the
    /// scheduler and recreates TX tasks (design §4.7).
    pub fn resume(&self) -> Result<(), CoreError> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if lifecycle.kind != GroupState::Paused {
            return Err(CoreError::InvalidState(format!("cannot resume from {:?}", lifecycle.kind)));
        }
        if let Some(paused_at) = lifecycle.paused_at.take() {
            lifecycle.accumulated_pause += paused_at.elapsed();
        }
        lifecycle.kind = GroupState::Running;
        drop(lifecycle);

        *self.tx_tasks.lock().unwrap() = self.start_tx_tasks()?;

        let scheduler = Scheduler::start();
        self.register_periodic_jobs(&scheduler);
        *self.scheduler.lock().unwrap() = Some(scheduler);
        Ok(())
    }

    /// `running | paused -> stopped`: freezes status updates, stops every
    /// background worker and writes the summary-end record (design §4.7).
    pub fn stop(&self) -> Result<(), CoreError> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if lifecycle.kind != GroupState::Running && lifecycle.kind != GroupState::Paused {
            return Err(CoreError::InvalidState(format!("cannot stop from {:?}", lifecycle.kind)));
        }
        let elapsed = lifecycle
            .start_monotonic
            .map(|t| t.elapsed())
            .unwrap_or_default()
            .saturating_sub(lifecycle.accumulated_pause);
        lifecycle.kind = GroupState::Stopped;
        let table = lifecycle.table.take();
        drop(lifecycle);

        self.poll_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.poll_handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        let scheduler = self.scheduler.lock().unwrap().take();
        let summary = teardown(
            &self.bus,
            &self.diag,
            self.archive.as_ref(),
            &self.classifier,
            &self.latch,
            &self.config.non_recoverable,
            elapsed,
            self.config.alarm_delay,
            scheduler,
            &mut self.tx_tasks.lock().unwrap(),
            table,
        );
        *self.last_summary.lock().unwrap() = summary;
        Ok(())
    }

    fn start_tx_tasks(&self) -> Result<TxTasks, CoreError> {
        Ok(TxTasks {
            switch1: self.config.switch_msg1.as_ref().map(|m| self.start_switch_task(m)).transpose()?,
            switch2: self.config.switch_msg2.as_ref().map(|m| self.start_switch_task(m)).transpose()?,
        })
    }

    fn start_switch_task(&self, msg: &SwitchMessage) -> Result<SwitchTask, CoreError> {
        let payload = msg.payloads.first().cloned().unwrap_or_default();
        let mut frame = CanFrame::new(msg.id, payload);
        frame.fd = msg.fd;
        let ch1 = self.bus.start_periodic(frame.clone(), Duration::from_millis(100)).map_err(CoreError::Transport)?;
        let ch2 = self.bus.start_periodic(frame, Duration::from_millis(100)).map_err(CoreError::Transport)?;
        Ok(SwitchTask { ch1, ch2, payloads: msg.payloads.clone(), next: 0 })
    }

    /// Wires `PeriodicSwitchMsg1`/`2` (round-robin payload rotation, one
    /// tick per second) and `PeriodicDiag` (`MultiSlotDiagEngine::periodic_tick`,
    /// ticking at `min(interval, rediag_interval)` so failure back-off can
    /// fire independently) (design §4.7).
    fn register_periodic_jobs(&self, scheduler: &Scheduler) {
        if self.config.switch_msg1.is_some() {
            let tx_tasks = Arc::clone(&self.tx_tasks);
            scheduler.add_job(
                "PeriodicSwitchMsg1",
                Duration::from_secs(1),
                Box::new(move || {
                    if let Some(task) = tx_tasks.lock().unwrap().switch1.as_mut() {
                        rotate_switch_task(task);
                    }
                }),
            );
        }
        if self.config.switch_msg2.is_some() {
            let tx_tasks = Arc::clone(&self.tx_tasks);
            scheduler.add_job(
                "PeriodicSwitchMsg2",
                Duration::from_secs(1),
                Box::new(move || {
                    if let Some(task) = tx_tasks.lock().unwrap().switch2.as_mut() {
                        rotate_switch_task(task);
                    }
                }),
            );
        }

        let diag = Arc::clone(&self.diag);
        let tick = std::cmp::min(self.config.periodic_diag_interval, self.config.periodic_rediag_interval);
        scheduler.add_job(
            "PeriodicDiag",
            tick,
            Box::new(move || {
                diag.periodic_tick();
            }),
        );

        // Pending-only diagnostics: at `rediag_interval`, re-run every
        // pending slot against its configured DID set (design §4.7
        // "Diagnostic" job, distinct from the `PeriodicDiag` job above which
        // drives the separately-tracked periodic-slot set).
        let diag = Arc::clone(&self.diag);
        let pending_dids = self.diag.pending_dids();
        scheduler.add_job(
            "Diagnostic",
            self.config.periodic_rediag_interval,
            Box::new(move || {
                if diag.has_pending_slots() {
                    diag.run_pending_once(&pending_dids);
                }
            }),
        );
    }

    /// Also watches the aging-hours deadline: when `elapsed >= aging_hours *
    /// 3600s` the thread tears itself down the same way an explicit `stop()`
    /// would (design §4.7 "on `stop` or on `elapsed >= aging_hours*3600`"),
    /// since only this thread can observe elapsed time without a caller.
    fn spawn_poll_thread(&self) -> JoinHandle<()> {
        let stop = Arc::clone(&self.poll_stop);
        let classifier = Arc::clone(&self.classifier);
        let latch = Arc::clone(&self.latch);
        let non_recoverable = self.config.non_recoverable.clone();
        let alarm_delay = self.config.alarm_delay;
        let start = self.lifecycle.lock().unwrap().start_monotonic.unwrap_or_else(Instant::now);
        let last_summary = Arc::clone(&self.last_summary);
        let archive = Arc::clone(&self.archive);
        let diag = Arc::clone(&self.diag);
        let bus = Arc::clone(&self.bus);
        let scheduler = Arc::clone(&self.scheduler);
        let tx_tasks = Arc::clone(&self.tx_tasks);
        let lifecycle = Arc::clone(&self.lifecycle);
        let aging_deadline = self.config.aging_hours.map(|hours| Duration::from_secs_f64(hours * 3600.0));
        let table = lifecycle.lock().unwrap().table;
        let app_rx1 = Arc::clone(&self.app_rx1);
        let app_rx2 = Arc::clone(&self.app_rx2);

        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_secs(1));
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let accumulated_pause = lifecycle.lock().unwrap().accumulated_pause;
                let elapsed = start.elapsed().saturating_sub(accumulated_pause);
                let summary = compute_summary(&classifier, &latch, &non_recoverable, elapsed, alarm_delay);
                *last_summary.lock().unwrap() = summary;

                if let Some(table) = table {
                    let diag_periodic = diag.periodic_snapshot();
                    for (slot, status) in classifier.snapshot() {
                        archive.append(
                            table,
                            &SlotRecordMerge {
                                slot,
                                status: Some(status),
                                app_rx1: app_rx1.record(slot),
                                app_rx2: app_rx2.record(slot),
                                diag_result: None,
                                diag_periodic: diag_periodic.data.get(&slot.get()).cloned(),
                            },
                        );
                    }
                }

                if let Some(deadline) = aging_deadline {
                    if elapsed >= deadline {
                        let mut guard = lifecycle.lock().unwrap();
                        if guard.kind != GroupState::Running && guard.kind != GroupState::Paused {
                            break;
                        }
                        guard.kind = GroupState::Stopped;
                        let table = guard.table.take();
                        drop(guard);

                        let scheduler = scheduler.lock().unwrap().take();
                        let summary = teardown(
                            &bus,
                            &diag,
                            archive.as_ref(),
                            &classifier,
                            &latch,
                            &non_recoverable,
                            elapsed,
                            alarm_delay,
                            scheduler,
                            &mut tx_tasks.lock().unwrap(),
                            table,
                        );
                        *last_summary.lock().unwrap() = summary;
                        tracing::info!("group stopped automatically: aging-hours deadline reached");
                        break;
                    }
                }
            }
        })
    }
}

fn rotate_switch_task(task: &mut SwitchTask) {
    if task.payloads.is_empty() {
        return;
    }
    task.next = (task.next + 1) % task.payloads.len();
    let payload = task.payloads[task.next].clone();
    if let Err(error) = task.ch1.modify(payload.clone(), None, false) {
        tracing::warn!(%error, "failed to modify PeriodicSwitch CH1 task");
    }
    if let Err(error) = task.ch2.modify(payload, None, false) {
        tracing::warn!(%error, "failed to modify PeriodicSwitch CH2 task");
    }
}

fn stop_tx_tasks(tasks: &mut TxTasks) {
    if let Some(task) = tasks.switch1.take() {
        let _ = task.ch1.stop();
        let _ = task.ch2.stop();
    }
    if let Some(task) = tasks.switch2.take() {
        let _ = task.ch1.stop();
        let _ = task.ch2.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::NullArchive;
    use crate::bus::{BusConfig, CanTransport, TestTransport};
    use crate::classifier::ClassifierRanges;
    use crate::codec::StaticSignalDatabase;
    use crate::diag::did::{DidKind, DidOperation, DidSpec};
    use crate::diag::transport::mock::{MockScript, MockStackFactory};
    use crate::security::unimplemented_algorithm;

    fn test_group() -> GroupController {
        let transport = Arc::new(Mutex::new(TestTransport::new()));
        let db: Arc<dyn crate::codec::SignalDatabase> = Arc::new(StaticSignalDatabase::new(vec![]));
        let cfg = BusConfig {
            interface: "vcan0".into(),
            arbitration_bitrate: 500_000,
            data_bitrate: 2_000_000,
            fd_enabled: true,
            receive_own_messages: true,
        };
        let bus = Arc::new(BusManager::new(transport as Arc<Mutex<dyn CanTransport>>, &cfg, db, None).unwrap());
        let ranges = ClassifierRanges { voltage_min: 11.0, voltage_max: 14.0, current_min: 0.4, current_max: 1.0, dark_current: 0.002 };
        let classifier = Arc::new(SlotStatusClassifier::new(80, ranges));
        let factory = MockStackFactory::new(MockScript::new());
        let dids: Vec<DidSpec> = vec![DidSpec { id: 0xF190, size: 2, kind: DidKind::Bytes, operation: DidOperation::Read, padding: 0, value: None }];
        let diag = Arc::new(
            MultiSlotDiagEngine::build(80, false, dids, unimplemented_algorithm(), Duration::from_millis(50), &factory).unwrap(),
        );

        let config = GroupConfig {
            project_name: "test".into(),
            max_slots: 80,
            aging_hours: None,
            non_recoverable: vec![-5, -4, -3, -2],
            alarm_delay: Duration::from_secs(0),
            switch_msg1: None,
            switch_msg2: None,
            periodic_diag_interval: Duration::from_secs(10),
            periodic_rediag_interval: Duration::from_secs(1),
        };

        GroupController::new(
            config,
            bus,
            classifier,
            diag,
            Arc::new(NullArchive),
            Arc::new(AppFrameTable::new(80)),
            Arc::new(AppFrameTable::new(80)),
        )
    }

    #[test]
    fn starts_from_idle_and_rejects_double_start() {
        let group = test_group();
        assert_eq!(group.state(), GroupState::Idle);
        group.start().unwrap();
        assert_eq!(group.state(), GroupState::Running);
        assert!(group.start().is_err());
        group.stop().unwrap();
        assert_eq!(group.state(), GroupState::Stopped);
    }

    #[test]
    fn pause_resume_round_trip() {
        let group = test_group();
        group.start().unwrap();
        group.pause().unwrap();
        assert_eq!(group.state(), GroupState::Paused);
        group.resume().unwrap();
        assert_eq!(group.state(), GroupState::Running);
        group.stop().unwrap();
    }

    #[test]
    fn stop_requires_running_or_paused() {
        let group = test_group();
        assert!(group.stop().is_err());
    }

    #[test]
    fn latched_status_stays_bad_until_stop() {
        let group = test_group();
        group.start().unwrap();
        let slot = SlotId::new(1, 80).unwrap();
        group.classifier.decode_and_store(slot, &[0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x5A], 0.0);
        let summary = compute_summary(&group.classifier, &group.latch, &group.config.non_recoverable, Duration::from_secs(10), group.config.alarm_delay);
        assert_eq!(summary.bad, 1);

        group.classifier.decode_and_store(slot, &[0xFF, 0x7C, 0x00, 0x01, 0xF4, 0x07, 0x11, 0x5A], 0.0);
        let summary = compute_summary(&group.classifier, &group.latch, &group.config.non_recoverable, Duration::from_secs(10), group.config.alarm_delay);
        assert_eq!(summary.bad, 1, "latched bad status must survive a nominal reading");
        group.stop().unwrap();
    }

    #[test]
    fn alarm_delay_remaps_transient_status_for_display() {
        assert_eq!(display_status(-1, Duration::from_secs(1), Duration::from_secs(5)), 1);
        assert_eq!(display_status(-1, Duration::from_secs(10), Duration::from_secs(5)), -1);
        assert_eq!(display_status(-5, Duration::from_secs(1), Duration::from_secs(5)), -5);
    }

    #[test]
    fn alarm_delay_window_suppresses_the_whole_remap_set_uniformly() {
        let ranges = ClassifierRanges { voltage_min: 11.0, voltage_max: 14.0, current_min: 0.4, current_max: 1.0, dark_current: 0.002 };
        let classifier = SlotStatusClassifier::new(80, ranges);
        let latch: Mutex<SlotTable<i8>> = Mutex::new(SlotTable::new(80));
        let slot = SlotId::new(1, 80).unwrap();
        let non_recoverable = vec![-5, -4, -3, -2];
        let alarm_delay = Duration::from_secs(5);

        // voltage=5.0V, current=0.1A -> classify_status yields -3, which is both
        // non-recoverable and in the display remap set.
        classifier.decode_and_store(slot, &[0xFF, 50, 0, 0, 100, 0, 0, 0x5A], 0.0);
        let summary = compute_summary(&classifier, &latch, &non_recoverable, Duration::from_secs(1), alarm_delay);
        assert_eq!(summary.bad, 0, "a startup-transient -3 must not be counted bad during the alarm-delay window");
        assert_eq!(summary.good, 1);

        // A nominal reading after the window confirms the slot was never
        // latched bad, so it isn't stuck once the window closes.
        classifier.decode_and_store(slot, &[0xFF, 0x7C, 0x00, 0x01, 0xF4, 0x07, 0x11, 0x5A], 0.0);
        let summary = compute_summary(&classifier, &latch, &non_recoverable, Duration::from_secs(10), alarm_delay);
        assert_eq!(summary.bad, 0);
        assert_eq!(summary.good, 1);
    }
}
