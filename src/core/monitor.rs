//! Resource monitoring - Per-process CPU and memory sampling

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::trace;

use super::resource::ResourceUsage;

/// Samples CPU and memory for a set of client processes.
///
/// CPU usage is derived by sysinfo from the processor time consumed between two
/// refreshes, so the first sample for a new process reads as zero.
pub struct ResourceMonitor {
    system: System,
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Refresh the given processes only
    pub fn refresh(&mut self, pids: &[u32]) {
        if pids.is_empty() {
            return;
        }
        let pids: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
        trace!("Refreshed usage for {} processes", pids.len());
    }

    /// Get resource usage for a specific process
    pub fn get_process_usage(&self, pid: u32) -> Option<ResourceUsage> {
        let process = self.system.process(Pid::from_u32(pid))?;
        Some(ResourceUsage {
            cpu_percent: process.cpu_usage(),
            memory_bytes: process.memory(),
        })
    }
}
