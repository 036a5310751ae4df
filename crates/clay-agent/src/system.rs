//! Host identity and CPU load via sysinfo.

use crate::capture::CpuProbe;
use std::sync::Mutex;
use sysinfo::System;

/// Hostname and OS description reported at registration.
pub fn host_info() -> (String, String) {
    let hostname = System::host_name().unwrap_or_else(|| "unknown".to_string());
    let os = format!(
        "{} {}",
        System::name().unwrap_or_else(|| "Unknown".to_string()),
        System::os_version().unwrap_or_default()
    );
    (hostname, os.trim().to_string())
}

/// [`CpuProbe`] backed by sysinfo. Each reading refreshes CPU stats; the
/// reported value is the average since the previous refresh.
pub struct SysinfoCpuProbe {
    sys: Mutex<System>,
}

impl SysinfoCpuProbe {
    pub fn new() -> Self {
        let mut sys = System::new();
        // Prime the counters so the first real reading has a baseline.
        sys.refresh_cpu_usage();
        Self {
            sys: Mutex::new(sys),
        }
    }
}

impl Default for SysinfoCpuProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuProbe for SysinfoCpuProbe {
    fn cpu_percent(&self) -> f32 {
        let mut sys = self.sys.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_cpu_usage();
        sys.global_cpu_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_info_is_never_empty() {
        let (hostname, os) = host_info();
        assert!(!hostname.is_empty());
        assert!(!os.is_empty());
    }

    #[test]
    fn cpu_percent_is_in_range() {
        let probe = SysinfoCpuProbe::new();
        let pct = probe.cpu_percent();
        assert!((0.0..=100.0).contains(&pct), "cpu {pct} out of range");
    }
}
