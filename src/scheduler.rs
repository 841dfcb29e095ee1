//! Periodic Scheduler (C5): a single cooperative worker running named jobs
//! at individual intervals, with disable/enable/restart semantics.
//!
//! The worker loop sleeps a fixed tick, then invokes every job whose
//! `next_due` has passed. A job's overrun delays only that job's next
//! invocation (design invariant 4): `next_due` is recomputed from the
//! completion time of the call, not wall-clock ticks.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// The scheduler's sleep granularity between checking job due-times.
pub const TICK: Duration = Duration::from_millis(10);

pub type Job = Box<dyn FnMut() + Send>;

struct RunningJob {
    interval: Duration,
    next_due: Instant,
    job: Job,
}

struct RegisteredJob {
    interval: Duration,
    job: Job,
}

#[derive(Default)]
struct Inner {
    running: HashMap<String, RunningJob>,
    order: Vec<String>,
    registry: HashMap<String, RegisteredJob>,
}

impl Inner {
    fn remove_from_order(&mut self, name: &str) {
        self.order.retain(|n| n != name);
    }
}

/// Error returned by scheduler operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("job {0:?} is not registered")]
    NotRegistered(String),
}

/// A cooperative periodic job scheduler running on one dedicated thread.
pub struct Scheduler {
    inner: Arc<Mutex<Inner>>,
    stop_flag: Arc<std::sync::atomic::AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawns the worker thread. The scheduler starts with no jobs.
    pub fn start() -> Self {
        let inner = Arc::new(Mutex::new(Inner::default()));
        let stop_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let worker_inner = Arc::clone(&inner);
        let worker_stop = Arc::clone(&stop_flag);
        let handle = std::thread::spawn(move || {
            while !worker_stop.load(std::sync::atomic::Ordering::Relaxed) {
                std::thread::sleep(TICK);
                let now = Instant::now();
                let due: Vec<String> = {
                    let guard = worker_inner.lock().unwrap();
                    guard
                        .order
                        .iter()
                        .filter(|name| guard.running.get(*name).map(|j| j.next_due <= now).unwrap_or(false))
                        .cloned()
                        .collect()
                };
                for name in due {
                    let mut guard = worker_inner.lock().unwrap();
                    let Some(running) = guard.running.get_mut(&name) else { continue };
                    let interval = running.interval;
                    let result = catch_unwind(AssertUnwindSafe(|| (running.job)()));
                    if result.is_err() {
                        tracing::error!(job = %name, "scheduled job panicked");
                    }
                    if let Some(running) = guard.running.get_mut(&name) {
                        running.next_due = Instant::now() + interval;
                    }
                }
            }
        });

        Self { inner, stop_flag, handle: Mutex::new(Some(handle)) }
    }

    /// Registers `name` to run every `interval`, starting immediately
    /// (design §4.5: "Jobs added while running start immediate").
    pub fn add_job(&self, name: impl Into<String>, interval: Duration, job: Job) {
        let name = name.into();
        let mut guard = self.inner.lock().unwrap();
        guard.remove_from_order(&name);
        guard.order.push(name.clone());
        guard.running.insert(name, RunningJob { interval, next_due: Instant::now(), job });
    }

    pub fn remove_job(&self, name: &str) {
        let mut guard = self.inner.lock().unwrap();
        guard.running.remove(name);
        guard.remove_from_order(name);
    }

    pub fn has_job(&self, name: &str) -> bool {
        self.inner.lock().unwrap().running.contains_key(name)
    }

    /// Removes the running job but keeps it in a registry for [`Self::enable`].
    pub fn disable(&self, name: &str) {
        let mut guard = self.inner.lock().unwrap();
        guard.remove_from_order(name);
        if let Some(running) = guard.running.remove(name) {
            guard.registry.insert(name.to_string(), RegisteredJob { interval: running.interval, job: running.job });
        }
    }

    /// Re-adds a previously [`Self::disable`]d job, starting immediately.
    pub fn enable(&self, name: &str) -> Result<(), SchedulerError> {
        let mut guard = self.inner.lock().unwrap();
        let Some(registered) = guard.registry.remove(name) else {
            return Err(SchedulerError::NotRegistered(name.to_string()));
        };
        guard.remove_from_order(name);
        guard.order.push(name.to_string());
        guard.running.insert(
            name.to_string(),
            RunningJob { interval: registered.interval, next_due: Instant::now(), job: registered.job },
        );
        Ok(())
    }

    /// Removes then re-enables `name`, resetting `next_due` to now.
    pub fn restart(&self, name: &str) -> Result<(), SchedulerError> {
        self.disable(name);
        self.enable(name)
    }

    /// Returns `(running_names, registered_names)`.
    pub fn list_jobs(&self) -> (Vec<String>, Vec<String>) {
        let guard = self.inner.lock().unwrap();
        (guard.order.clone(), guard.registry.keys().cloned().collect())
    }

    /// Signals the worker to stop and joins it, waiting up to `timeout`.
    pub fn stop(&self, timeout: Duration) {
        self.stop_flag.store(true, std::sync::atomic::Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let start = Instant::now();
            while !handle.is_finished() && start.elapsed() < timeout {
                std::thread::sleep(Duration::from_millis(5));
            }
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_flag.store(true, std::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn job_runs_at_configured_interval() {
        let sched = Scheduler::start();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        sched.add_job("tick", Duration::from_millis(20), Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        std::thread::sleep(Duration::from_millis(95));
        sched.stop(Duration::from_secs(1));
        let n = count.load(Ordering::SeqCst);
        assert!(n >= 3 && n <= 6, "expected 3-6 invocations in ~95ms at 20ms interval, got {n}");
    }

    #[test]
    fn disable_then_enable_resumes() {
        let sched = Scheduler::start();
        sched.add_job("job", Duration::from_millis(500), Box::new(|| {}));
        assert!(sched.has_job("job"));
        sched.disable("job");
        assert!(!sched.has_job("job"));
        sched.enable("job").unwrap();
        assert!(sched.has_job("job"));
        sched.stop(Duration::from_secs(1));
    }

    #[test]
    fn enable_unregistered_job_errors() {
        let sched = Scheduler::start();
        assert_eq!(sched.enable("ghost"), Err(SchedulerError::NotRegistered("ghost".into())));
        sched.stop(Duration::from_secs(1));
    }

    #[test]
    fn panicking_job_is_still_rescheduled() {
        let sched = Scheduler::start();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        sched.add_job("flaky", Duration::from_millis(15), Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            panic!("always fails");
        }));
        std::thread::sleep(Duration::from_millis(80));
        sched.stop(Duration::from_secs(1));
        assert!(count.load(Ordering::SeqCst) >= 2);
    }
}
