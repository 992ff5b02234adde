use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::resource::ResourceSample;

/// Samples the CPU and memory usage of a single process.
///
/// CPU usage is computed by `sysinfo` from the difference between two refreshes, so the first
/// sample of a new monitor always reports 0% CPU. Samples should be taken no more often than
/// [sysinfo::MINIMUM_CPU_UPDATE_INTERVAL] for the CPU figure to be meaningful.
#[derive(Debug)]
pub struct ProcessMonitor {
    pid: Pid,
    system: System,
}

impl ProcessMonitor {
    pub fn new(pid: u32) -> Self {
        Self {
            pid: Pid::from_u32(pid),
            system: System::new(),
        }
    }

    /// Take a sample, or [None] if the process no longer exists.
    pub fn sample(&mut self) -> Option<ResourceSample> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );

        let process = self.system.process(self.pid)?;

        Some(ResourceSample {
            cpu_percent: process.cpu_usage() as f64,
            ram_bytes: process.memory(),
        })
    }
}
