//! Resource usage samples for supervised clients

use serde::{Deserialize, Serialize};

/// Last sampled resource usage of a client process
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU usage percentage (best-effort, may exceed 100 on multi-core machines)
    pub cpu_percent: f32,
    /// Resident memory in bytes
    pub memory_bytes: u64,
}

impl ResourceUsage {
    pub fn memory_display(&self) -> String {
        format_bytes(self.memory_bytes)
    }
}

/// Format bytes to human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
