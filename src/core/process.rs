//! Process spawning - Starting the external launcher and observing the child

use std::io;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use tracing::{debug, info};

/// A spawned client process as seen by the supervisor
pub trait ClientProcess: Send {
    /// OS process id
    fn id(&self) -> u32;

    /// Non-blocking exit check: `Ok(None)` while running, `Ok(Some(code))` once exited
    fn try_wait(&mut self) -> io::Result<Option<i32>>;
}

impl ClientProcess for Child {
    fn id(&self) -> u32 {
        Child::id(self)
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        // A child killed by a signal has no exit code
        Ok(Child::try_wait(self)?.map(|status| status.code().unwrap_or(-1)))
    }
}

/// Starts the external launcher executable
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, executable: &Path, arguments: &str) -> io::Result<Box<dyn ClientProcess>>;
}

/// Launches real OS processes, detached from our console and process group
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, executable: &Path, arguments: &str) -> io::Result<Box<dyn ClientProcess>> {
        let mut cmd = Command::new(executable);

        if let Some(parent) = executable.parent().filter(|p| !p.as_os_str().is_empty()) {
            cmd.current_dir(parent);
        }

        // The argument string is handed over as-is
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.raw_arg(arguments);
            cmd.creation_flags(0x00000008); // DETACHED_PROCESS
        }

        #[cfg(not(windows))]
        {
            let args = shell_words::split(arguments)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            debug!("Launcher arguments: {:?}", args);
            cmd.args(args);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }
        }

        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        info!("Spawned process with PID {}", child.id());
        Ok(Box::new(child))
    }
}
