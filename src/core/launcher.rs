//! Launch orchestration - Turns profiles into launcher invocations

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::events::{self, LaunchEvent};
use super::process::ProcessLauncher;
use super::profile::Profile;
use super::settings::Settings;
use super::supervisor::ProcessSupervisor;
use crate::error::LaunchError;

/// Launcher argument string for a profile.
///
/// Flags appear in a fixed order; `additional_args` is appended as-is.
pub fn build_launch_arguments(profile: &Profile) -> String {
    let mut args = String::new();

    if let Some(config) = profile.config_path.as_ref().filter(|p| !p.as_os_str().is_empty()) {
        args.push_str(&format!("--roamingPath=\"{}\" ", config.display()));
    }
    if profile.enable_dalamud {
        if let Some(plugins) = profile.plugin_path.as_ref().filter(|p| !p.as_os_str().is_empty()) {
            args.push_str(&format!("--dalamudPath=\"{}\" ", plugins.display()));
        }
    }
    if profile.is_steam {
        args.push_str("--steam ");
    }
    if profile.force_dx11 {
        args.push_str("--dx11 ");
    }
    if profile.no_auto_login {
        args.push_str("--noautologin ");
    }
    if profile.use_otp {
        args.push_str("--otp ");
    }
    args.push_str(&profile.additional_args);

    args.trim().to_string()
}

/// Result of a successful spawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchedClient {
    pub pid: u32,
    /// False when the supervisor refused the process because the profile
    /// already had a live one
    pub tracked: bool,
}

/// Starts clients through the external launcher and hands them to the supervisor
#[derive(Clone)]
pub struct LaunchOrchestrator {
    settings: Arc<RwLock<Settings>>,
    supervisor: ProcessSupervisor,
    launcher: Arc<dyn ProcessLauncher>,
    launch_delay_secs: Arc<AtomicU64>,
    events: broadcast::Sender<LaunchEvent>,
}

impl LaunchOrchestrator {
    pub fn new(
        settings: Arc<RwLock<Settings>>,
        supervisor: ProcessSupervisor,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let delay = settings
            .read()
            .map(|s| s.default_launch_delay_secs)
            .unwrap_or(0);
        Self {
            settings,
            supervisor,
            launcher,
            launch_delay_secs: Arc::new(AtomicU64::new(delay)),
            events: events::channel(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LaunchEvent> {
        self.events.subscribe()
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Seconds to wait between launches in a batch. Negative values become zero.
    pub fn set_launch_delay(&self, seconds: i64) {
        let seconds = seconds.max(0) as u64;
        self.launch_delay_secs.store(seconds, Ordering::Relaxed);
    }

    pub fn launch_delay(&self) -> u64 {
        self.launch_delay_secs.load(Ordering::Relaxed)
    }

    fn launcher_executable(&self) -> Result<PathBuf, LaunchError> {
        let path = self
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .launcher_path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(LaunchError::LauncherNotConfigured)?;

        if !path.is_file() {
            return Err(LaunchError::LauncherNotFound(path));
        }
        Ok(path)
    }

    fn launch_failed(&self, profile: &Profile, message: String) {
        events::publish(
            &self.events,
            LaunchEvent::LaunchFailed {
                profile_id: profile.id,
                profile_name: profile.name.clone(),
                message,
            },
        );
    }

    /// Report a failure on the event channel and hand it back for propagation
    pub(crate) fn fail(&self, profile: &Profile, err: LaunchError) -> LaunchError {
        error!("Launch of profile '{}' failed: {}", profile.name, err);
        self.launch_failed(profile, err.to_string());
        err
    }

    /// Start the client for one profile.
    ///
    /// Errors are published as `LaunchFailed` and also returned. If the profile
    /// already has a supervised process the new one still runs but is not
    /// tracked; that is reported as `LaunchFailed` and `tracked: false`.
    pub fn launch_client(&self, profile: &mut Profile) -> Result<LaunchedClient, LaunchError> {
        let executable = self
            .launcher_executable()
            .map_err(|e| self.fail(profile, e))?;

        info!("Launching client for profile '{}'", profile.name);
        let arguments = build_launch_arguments(profile);

        let process = self
            .launcher
            .launch(&executable, &arguments)
            .map_err(|source| self.fail(profile, LaunchError::Spawn { source }))?;
        let pid = process.id();
        info!("Launched client for '{}' with PID {}", profile.name, pid);

        let tracked = self.supervisor.track_process(profile, process);
        profile.mark_used();

        if tracked {
            events::publish(
                &self.events,
                LaunchEvent::ClientLaunched {
                    profile_id: profile.id,
                    profile_name: profile.name.clone(),
                    pid,
                },
            );
        } else {
            warn!("PID {} for '{}' is running unsupervised", pid, profile.name);
            self.launch_failed(
                profile,
                format!(
                    "profile already has a running client; PID {} is not supervised",
                    pid
                ),
            );
        }

        Ok(LaunchedClient { pid, tracked })
    }

    /// Launch profiles one after another, waiting the launch delay between them.
    ///
    /// A failed launch is logged and the sequence carries on. Returns how many
    /// profiles produced a process.
    pub async fn launch_multiple_clients(&self, profiles: &mut [Profile]) -> usize {
        let delay = Duration::from_secs(self.launch_delay());
        let total = profiles.len();
        let mut launched = 0;

        for (i, profile) in profiles.iter_mut().enumerate() {
            match self.launch_client(profile) {
                Ok(_) => launched += 1,
                Err(e) => error!("Skipping profile '{}': {}", profile.name, e),
            }

            if i + 1 < total && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        info!("Launched {} of {} clients", launched, total);
        launched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::ClientProcess;
    use crate::core::supervisor::tests::FakeProcess;
    use pretty_assertions::assert_eq;
    use std::io;
    use std::path::Path;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;
    use tokio::sync::broadcast::error::TryRecvError;

    const FAIL_MARKER: &str = "--fail-spawn";

    /// Records invocations; refuses any whose arguments carry `FAIL_MARKER`
    #[derive(Default)]
    struct FakeLauncher {
        calls: Mutex<Vec<(PathBuf, String)>>,
        next_pid: AtomicU32,
    }

    impl ProcessLauncher for FakeLauncher {
        fn launch(&self, executable: &Path, arguments: &str) -> io::Result<Box<dyn ClientProcess>> {
            self.calls
                .lock()
                .unwrap()
                .push((executable.to_path_buf(), arguments.to_string()));
            if arguments.contains(FAIL_MARKER) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "refused"));
            }
            let pid = 3_998_000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeProcess::new(pid)))
        }
    }

    struct Fixture {
        _exe: NamedTempFile,
        launcher: Arc<FakeLauncher>,
        orchestrator: LaunchOrchestrator,
    }

    fn fixture() -> Fixture {
        let exe = NamedTempFile::new().unwrap();
        let settings = Arc::new(RwLock::new(Settings {
            launcher_path: Some(exe.path().to_path_buf()),
            ..Default::default()
        }));
        let launcher = Arc::new(FakeLauncher::default());
        let orchestrator =
            LaunchOrchestrator::new(settings, ProcessSupervisor::default(), launcher.clone());
        Fixture {
            _exe: exe,
            launcher,
            orchestrator,
        }
    }

    fn calls(fx: &Fixture) -> Vec<(PathBuf, String)> {
        fx.launcher.calls.lock().unwrap().clone()
    }

    #[test]
    fn arguments_follow_fixed_order() {
        let mut profile = Profile::new("Main");
        profile.config_path = Some(PathBuf::from("/a/config"));
        profile.plugin_path = Some(PathBuf::from("/a/plugins"));
        profile.is_steam = true;
        profile.no_auto_login = true;
        profile.use_otp = true;
        profile.additional_args = "--extra \"x y\"".into();

        assert_eq!(
            build_launch_arguments(&profile),
            "--roamingPath=\"/a/config\" --dalamudPath=\"/a/plugins\" --steam --dx11 --noautologin --otp --extra \"x y\""
        );
    }

    #[test]
    fn plugin_path_requires_plugin_system() {
        let mut profile = Profile::new("Main");
        profile.plugin_path = Some(PathBuf::from("/a/plugins"));
        profile.enable_dalamud = false;
        profile.force_dx11 = false;

        assert_eq!(build_launch_arguments(&profile), "");
    }

    #[test]
    fn extra_args_are_not_escaped() {
        let mut profile = Profile::new("Main");
        profile.force_dx11 = false;
        profile.additional_args = "  --a=1;rm  ".into();
        assert_eq!(build_launch_arguments(&profile), "--a=1;rm");
    }

    #[test]
    fn launch_tracks_and_reports() {
        let fx = fixture();
        let mut rx = fx.orchestrator.subscribe();
        let mut profile = Profile::new("Main");

        let launched = fx.orchestrator.launch_client(&mut profile).unwrap();

        assert!(launched.tracked);
        assert!(profile.last_used.is_some());
        assert!(fx.orchestrator.supervisor().is_running(profile.id));
        assert_eq!(calls(&fx)[0].1, "--dx11");
        assert_eq!(
            rx.try_recv().unwrap(),
            LaunchEvent::ClientLaunched {
                profile_id: profile.id,
                profile_name: "Main".into(),
                pid: launched.pid,
            }
        );
    }

    #[test]
    fn unconfigured_launcher_fails_without_spawning() {
        let fx = fixture();
        fx.orchestrator.settings.write().unwrap().launcher_path = None;
        let mut rx = fx.orchestrator.subscribe();
        let mut profile = Profile::new("Main");

        let err = fx.orchestrator.launch_client(&mut profile).unwrap_err();

        assert!(matches!(err, LaunchError::LauncherNotConfigured));
        assert!(matches!(rx.try_recv(), Ok(LaunchEvent::LaunchFailed { .. })));
        assert!(calls(&fx).is_empty());
        assert!(profile.last_used.is_none());
    }

    #[test]
    fn missing_launcher_executable_fails() {
        let fx = fixture();
        let missing = PathBuf::from("/no/such/launcher.exe");
        fx.orchestrator.settings.write().unwrap().launcher_path = Some(missing.clone());

        let err = fx.orchestrator.launch_client(&mut Profile::new("x")).unwrap_err();
        assert!(matches!(err, LaunchError::LauncherNotFound(p) if p == missing));
        assert!(calls(&fx).is_empty());
    }

    #[test]
    fn spawn_failure_fires_event_and_returns_error() {
        let fx = fixture();
        let mut rx = fx.orchestrator.subscribe();
        let mut profile = Profile::new("Broken");
        profile.additional_args = FAIL_MARKER.into();

        let err = fx.orchestrator.launch_client(&mut profile).unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert!(matches!(rx.try_recv(), Ok(LaunchEvent::LaunchFailed { .. })));
        assert!(!fx.orchestrator.supervisor().is_running(profile.id));
    }

    #[test]
    fn second_launch_of_live_profile_is_untracked() {
        let fx = fixture();
        let mut profile = Profile::new("Main");
        let first = fx.orchestrator.launch_client(&mut profile).unwrap();
        let mut rx = fx.orchestrator.subscribe();

        let second = fx.orchestrator.launch_client(&mut profile).unwrap();

        assert!(!second.tracked);
        assert_eq!(
            fx.orchestrator
                .supervisor()
                .get_tracked_process(profile.id)
                .unwrap()
                .pid,
            first.pid
        );
        assert!(matches!(rx.try_recv(), Ok(LaunchEvent::LaunchFailed { .. })));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn launch_delay_is_clamped() {
        let fx = fixture();
        assert_eq!(fx.orchestrator.launch_delay(), 5);
        fx.orchestrator.set_launch_delay(-3);
        assert_eq!(fx.orchestrator.launch_delay(), 0);
        fx.orchestrator.set_launch_delay(12);
        assert_eq!(fx.orchestrator.launch_delay(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_continues_past_failures_and_waits_between_launches() {
        let fx = fixture();
        let mut profiles: Vec<Profile> = ["A", "B", "C", "D"].iter().map(|n| Profile::new(*n)).collect();
        profiles[1].additional_args = FAIL_MARKER.into();

        let start = tokio::time::Instant::now();
        let launched = fx.orchestrator.launch_multiple_clients(&mut profiles).await;

        assert_eq!(launched, 3);
        assert_eq!(calls(&fx).len(), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
        assert!(profiles[1].last_used.is_none());
        assert!(profiles[3].last_used.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_batch_does_not_sleep() {
        let fx = fixture();
        fx.orchestrator.set_launch_delay(0);
        let mut profiles = vec![Profile::new("A"), Profile::new("B")];

        let start = tokio::time::Instant::now();
        assert_eq!(fx.orchestrator.launch_multiple_clients(&mut profiles).await, 2);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn empty_batch_launches_nothing() {
        let fx = fixture();
        assert_eq!(fx.orchestrator.launch_multiple_clients(&mut []).await, 0);
    }
}
