use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::error::MetricCollectionError;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

/// Source of per-process memory and CPU counters.
pub trait ResourceProbe: Send {
    /// A pid the OS no longer knows yields zero usage, not an error.
    fn sample(&mut self, pid: u32) -> Result<ResourceUsage, MetricCollectionError>;
}

pub struct SysinfoProbe {
    system: System,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&mut self, pid: u32) -> Result<ResourceUsage, MetricCollectionError> {
        let pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        Ok(self
            .system
            .process(pid)
            .map(|process| ResourceUsage {
                memory_bytes: process.memory(),
                cpu_percent: process.cpu_usage(),
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_own_process() {
        let mut probe = SysinfoProbe::new();
        let usage = probe.sample(std::process::id()).expect("sample");
        assert!(usage.memory_bytes > 0);
    }

    #[test]
    fn unknown_pid_reads_as_zero() {
        let mut probe = SysinfoProbe::new();
        let usage = probe.sample(u32::MAX - 7).expect("sample");
        assert_eq!(usage, ResourceUsage::default());
    }
}
