//! Process supervisor - Tracks launched clients per profile and polls them for exit

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::events::{self, ProcessEvent};
use super::monitor::ResourceMonitor;
use super::process::ClientProcess;
use super::profile::{Profile, ProfileId};
use super::resource::ResourceUsage;

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Exit code recorded when the process could not be queried
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Lifecycle state of a tracked process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessState {
    Running,
    /// Exited with code 0
    Exited,
    /// Exited with a non-zero code, or could not be observed
    Crashed,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Exited => "Exited",
            Self::Crashed => "Crashed",
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Point-in-time view of a tracked process
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedProcess {
    /// Profile that owns the process
    pub profile_id: ProfileId,
    /// Profile name at the time tracking started
    pub profile_name: String,
    /// OS process id
    pub pid: u32,
    /// When tracking started
    pub started_at: DateTime<Utc>,
    /// When the exit was observed
    pub exited_at: Option<DateTime<Utc>>,
    /// Exit code, once exited
    pub exit_code: Option<i32>,
    /// Current state
    pub state: ProcessState,
    /// Last sampled resource usage
    pub usage: ResourceUsage,
}

impl TrackedProcess {
    pub fn has_exited(&self) -> bool {
        self.state.is_terminal()
    }

    /// Time from start until exit, or until now while still running
    pub fn run_time(&self) -> chrono::Duration {
        self.exited_at.unwrap_or_else(Utc::now) - self.started_at
    }
}

struct Entry {
    info: TrackedProcess,
    handle: Box<dyn ClientProcess>,
}

impl Entry {
    /// Move a running entry into its terminal state.
    ///
    /// Returns the notification for the transition, or `None` if the entry had
    /// already finished.
    fn finish(&mut self, code: i32) -> Option<ProcessEvent> {
        if self.info.state.is_terminal() {
            return None;
        }

        self.info.exited_at = Some(Utc::now());
        self.info.exit_code = Some(code);
        self.info.state = if code == 0 {
            ProcessState::Exited
        } else {
            ProcessState::Crashed
        };

        let snapshot = self.info.clone();
        Some(match snapshot.state {
            ProcessState::Exited => ProcessEvent::Exited(snapshot),
            _ => ProcessEvent::Crashed(snapshot),
        })
    }
}

struct Inner {
    entries: Mutex<HashMap<ProfileId, Entry>>,
    monitor: Mutex<ResourceMonitor>,
    events: broadcast::Sender<ProcessEvent>,
    interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, HashMap<ProfileId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn poll(&self) -> usize {
        let mut transitions = 0;
        let mut running = Vec::new();

        {
            let mut entries = self.entries();
            for entry in entries.values_mut().filter(|e| !e.info.has_exited()) {
                let event = match entry.handle.try_wait() {
                    Ok(Some(code)) => entry.finish(code),
                    Ok(None) => {
                        running.push(entry.info.pid);
                        None
                    }
                    Err(e) => {
                        error!(
                            "Failed to query process {} for '{}': {}",
                            entry.info.pid, entry.info.profile_name, e
                        );
                        entry.finish(UNKNOWN_EXIT_CODE)
                    }
                };

                if let Some(event) = event {
                    let info = event.process();
                    match &event {
                        ProcessEvent::Exited(_) => info!(
                            "Client for '{}' (PID {}) exited normally",
                            info.profile_name, info.pid
                        ),
                        _ => warn!(
                            "Client for '{}' (PID {}) crashed with exit code {:?}",
                            info.profile_name, info.pid, info.exit_code
                        ),
                    }
                    transitions += 1;
                    events::publish(&self.events, event);
                }
            }
        }

        if !running.is_empty() {
            let samples: Vec<(u32, ResourceUsage)> = {
                let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
                monitor.refresh(&running);
                running
                    .iter()
                    .filter_map(|&pid| monitor.get_process_usage(pid).map(|u| (pid, u)))
                    .collect()
            };

            let mut entries = self.entries();
            for (pid, usage) in samples {
                if let Some(entry) = entries
                    .values_mut()
                    .find(|e| e.info.pid == pid && !e.info.has_exited())
                {
                    entry.info.usage = usage;
                }
            }
        }

        transitions
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let poller = self
            .poller
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = poller.take() {
            handle.abort();
        }
    }
}

/// Tracks at most one live client process per profile.
///
/// Exits are detected by polling on a fixed interval. Entries are kept after the
/// process exits so the final exit code stays queryable until the caller removes
/// them.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ProcessSupervisor {
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                monitor: Mutex::new(ResourceMonitor::new()),
                events: events::channel(),
                interval,
                poller: Mutex::new(None),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Receive process notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.inner.events.subscribe()
    }

    /// Start tracking a freshly launched process for `profile`.
    ///
    /// Returns false, leaving the existing entry untouched, if the profile already
    /// has a process that has not exited. A finished entry is replaced.
    pub fn track_process(&self, profile: &Profile, handle: Box<dyn ClientProcess>) -> bool {
        let mut entries = self.inner.entries();

        if let Some(existing) = entries.get(&profile.id) {
            if !existing.info.has_exited() {
                warn!(
                    "Profile '{}' already has a running process (PID {}), not tracking PID {}",
                    profile.name,
                    existing.info.pid,
                    handle.id()
                );
                return false;
            }
        }

        let info = TrackedProcess {
            profile_id: profile.id,
            profile_name: profile.name.clone(),
            pid: handle.id(),
            started_at: Utc::now(),
            exited_at: None,
            exit_code: None,
            state: ProcessState::Running,
            usage: ResourceUsage::default(),
        };
        info!("Tracking PID {} for profile '{}'", info.pid, info.profile_name);

        events::publish(&self.inner.events, ProcessEvent::Detected(info.clone()));
        entries.insert(profile.id, Entry { info, handle });
        true
    }

    /// Forget a profile's entry. The process itself is left alone.
    pub fn stop_tracking(&self, profile_id: ProfileId) -> Option<TrackedProcess> {
        let removed = self.inner.entries().remove(&profile_id).map(|e| e.info);
        if let Some(ref info) = removed {
            debug!("Stopped tracking PID {} for '{}'", info.pid, info.profile_name);
        }
        removed
    }

    /// Forget every entry
    pub fn clear_all(&self) {
        self.inner.entries().clear();
    }

    pub fn get_tracked_process(&self, profile_id: ProfileId) -> Option<TrackedProcess> {
        self.inner.entries().get(&profile_id).map(|e| e.info.clone())
    }

    /// Snapshot of all entries, ordered by start time
    pub fn tracked_processes(&self) -> Vec<TrackedProcess> {
        let mut all: Vec<TrackedProcess> =
            self.inner.entries().values().map(|e| e.info.clone()).collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        all
    }

    /// True if the profile has a tracked process that has not exited
    pub fn is_running(&self, profile_id: ProfileId) -> bool {
        self.inner
            .entries()
            .get(&profile_id)
            .is_some_and(|e| !e.info.has_exited())
    }

    pub fn running_count(&self) -> usize {
        self.inner
            .entries()
            .values()
            .filter(|e| !e.info.has_exited())
            .count()
    }

    /// Run one polling pass now. Returns the number of processes that exited.
    pub fn poll(&self) -> usize {
        self.inner.poll()
    }

    /// Start the background polling task. Calling this while it runs does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_monitoring(&self) {
        let mut poller = self
            .inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if poller.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.interval;
        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => {
                        inner.poll();
                    }
                    None => break,
                }
            }
        }));
        info!("Process monitoring started ({:?} interval)", period);
    }

    /// Stop the background polling task
    pub fn stop_monitoring(&self) {
        let handle = self
            .inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            info!("Process monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner
            .poller
            .lock()
            .map(|p| p.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io;
    use tokio::sync::broadcast::error::TryRecvError;

    #[derive(Debug, Clone, Copy)]
    pub(crate) enum FakeState {
        Running,
        Exited(i32),
        Broken,
    }

    /// Scripted process whose state the test flips from outside
    #[derive(Clone)]
    pub(crate) struct FakeProcess {
        pid: u32,
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeProcess {
        pub(crate) fn new(pid: u32) -> Self {
            Self {
                pid,
                state: Arc::new(Mutex::new(FakeState::Running)),
            }
        }

        pub(crate) fn set(&self, state: FakeState) {
            *self.state.lock().unwrap() = state;
        }
    }

    impl ClientProcess for FakeProcess {
        fn id(&self) -> u32 {
            self.pid
        }

        fn try_wait(&mut self) -> io::Result<Option<i32>> {
            match *self.state.lock().unwrap() {
                FakeState::Running => Ok(None),
                FakeState::Exited(code) => Ok(Some(code)),
                FakeState::Broken => Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
            }
        }
    }

    // High pids that are very unlikely to exist on the test machine
    const PID_A: u32 = 3_999_001;
    const PID_B: u32 = 3_999_002;

    #[test]
    fn second_track_for_live_profile_is_rejected() {
        let supervisor = ProcessSupervisor::default();
        let profile = Profile::new("Main");

        assert!(supervisor.track_process(&profile, Box::new(FakeProcess::new(PID_A))));
        let before = supervisor.get_tracked_process(profile.id).unwrap();

        assert!(!supervisor.track_process(&profile, Box::new(FakeProcess::new(PID_B))));
        let after = supervisor.get_tracked_process(profile.id).unwrap();

        assert_eq!(before, after);
        assert_eq!(after.pid, PID_A);
        assert_eq!(supervisor.tracked_processes().len(), 1);
    }

    #[test]
    fn non_zero_exit_is_a_single_crash() {
        let supervisor = ProcessSupervisor::default();
        let mut rx = supervisor.subscribe();
        let profile = Profile::new("Alt");
        let fake = FakeProcess::new(PID_A);
        supervisor.track_process(&profile, Box::new(fake.clone()));

        assert!(matches!(rx.try_recv(), Ok(ProcessEvent::Detected(_))));

        assert_eq!(supervisor.poll(), 0);
        fake.set(FakeState::Exited(1));
        assert_eq!(supervisor.poll(), 1);
        assert_eq!(supervisor.poll(), 0);

        match rx.try_recv() {
            Ok(ProcessEvent::Crashed(p)) => {
                assert_eq!(p.exit_code, Some(1));
                assert_eq!(p.state, ProcessState::Crashed);
            }
            other => panic!("expected crash, got {:?}", other),
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        let entry = supervisor.get_tracked_process(profile.id).unwrap();
        assert!(entry.exited_at.is_some());
        assert!(!supervisor.is_running(profile.id));
    }

    #[test]
    fn zero_exit_is_normal() {
        let supervisor = ProcessSupervisor::default();
        let mut rx = supervisor.subscribe();
        let profile = Profile::new("Main");
        let fake = FakeProcess::new(PID_A);
        supervisor.track_process(&profile, Box::new(fake.clone()));
        let _ = rx.try_recv();

        fake.set(FakeState::Exited(0));
        supervisor.poll();

        assert!(matches!(rx.try_recv(), Ok(ProcessEvent::Exited(p)) if p.exit_code == Some(0)));
    }

    #[test]
    fn query_failure_counts_as_crash() {
        let supervisor = ProcessSupervisor::default();
        let mut rx = supervisor.subscribe();
        let profile = Profile::new("Main");
        let fake = FakeProcess::new(PID_A);
        supervisor.track_process(&profile, Box::new(fake.clone()));
        let _ = rx.try_recv();

        fake.set(FakeState::Broken);
        supervisor.poll();

        match rx.try_recv() {
            Ok(ProcessEvent::Crashed(p)) => assert_eq!(p.exit_code, Some(UNKNOWN_EXIT_CODE)),
            other => panic!("expected crash, got {:?}", other),
        }
    }

    #[test]
    fn exited_entry_is_kept_and_can_be_replaced() {
        let supervisor = ProcessSupervisor::default();
        let profile = Profile::new("Main");
        let fake = FakeProcess::new(PID_A);
        supervisor.track_process(&profile, Box::new(fake.clone()));
        fake.set(FakeState::Exited(0));
        supervisor.poll();

        assert_eq!(supervisor.running_count(), 0);
        assert!(supervisor.get_tracked_process(profile.id).is_some());

        assert!(supervisor.track_process(&profile, Box::new(FakeProcess::new(PID_B))));
        assert_eq!(supervisor.get_tracked_process(profile.id).unwrap().pid, PID_B);
        assert!(supervisor.is_running(profile.id));
    }

    #[test]
    fn stop_tracking_and_clear() {
        let supervisor = ProcessSupervisor::default();
        let a = Profile::new("A");
        let b = Profile::new("B");
        supervisor.track_process(&a, Box::new(FakeProcess::new(PID_A)));
        supervisor.track_process(&b, Box::new(FakeProcess::new(PID_B)));

        assert_eq!(supervisor.stop_tracking(a.id).map(|p| p.pid), Some(PID_A));
        assert!(supervisor.stop_tracking(a.id).is_none());
        assert_eq!(supervisor.running_count(), 1);

        supervisor.clear_all();
        assert!(supervisor.tracked_processes().is_empty());
    }

    #[test]
    fn run_time_stops_at_exit() {
        let started = Utc::now() - chrono::Duration::minutes(30);
        let info = TrackedProcess {
            profile_id: ProfileId::new(),
            profile_name: "x".into(),
            pid: 1,
            started_at: started,
            exited_at: Some(started + chrono::Duration::minutes(12)),
            exit_code: Some(0),
            state: ProcessState::Exited,
            usage: ResourceUsage::default(),
        };
        assert_eq!(info.run_time().num_minutes(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_reports_crash_within_one_interval() {
        let supervisor = ProcessSupervisor::new(Duration::from_millis(5000));
        let mut rx = supervisor.subscribe();
        let profile = Profile::new("Main");
        let fake = FakeProcess::new(PID_A);
        supervisor.track_process(&profile, Box::new(fake.clone()));
        assert!(matches!(rx.recv().await, Ok(ProcessEvent::Detected(_))));

        supervisor.start_monitoring();
        supervisor.start_monitoring();
        assert!(supervisor.is_monitoring());

        fake.set(FakeState::Exited(1));
        tokio::time::sleep(Duration::from_millis(5001)).await;

        match rx.try_recv() {
            Ok(ProcessEvent::Crashed(p)) => assert_eq!(p.exit_code, Some(1)),
            other => panic!("expected crash, got {:?}", other),
        }

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        supervisor.stop_monitoring();
        assert!(!supervisor.is_monitoring());
    }
}
