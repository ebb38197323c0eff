use std::sync::{Arc, Mutex, PoisonError};

use sysinfo::{Pid, System};

use crate::config::EngineConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemorySample {
    /// Resident set size of this process, in bytes.
    pub process_bytes: u64,
    /// Physical memory of the machine, in bytes.
    pub total_bytes: u64,
}

impl MemorySample {
    pub fn process_mib(&self) -> u64 {
        self.process_bytes / (1024 * 1024)
    }
}

/// Source of memory readings. Sampling is best-effort; `None` means "unknown" and never
/// triggers a backoff.
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> Option<MemorySample>;
}

/// Reads process RSS and total memory through `sysinfo`.
pub struct SystemMemoryProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                log::warn!("memory checks disabled, cannot resolve current pid: {err}");
                None
            }
        };
        Self {
            pid,
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn sample(&self) -> Option<MemorySample> {
        let pid = self.pid?;
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        if !system.refresh_process(pid) {
            return None;
        }
        let process = system.process(pid)?;
        Some(MemorySample {
            process_bytes: process.memory(),
            total_bytes: system.total_memory(),
        })
    }
}

/// Applies the configured thresholds to a [`MemoryProbe`].
#[derive(Clone)]
pub struct MemoryMonitor {
    probe: Arc<dyn MemoryProbe>,
    high_water_fraction: f64,
    soft_limit_bytes: u64,
}

impl MemoryMonitor {
    pub fn new(probe: Arc<dyn MemoryProbe>, config: &EngineConfig) -> Self {
        Self {
            probe,
            high_water_fraction: config.memory_high_water_fraction,
            soft_limit_bytes: config.row_memory_soft_limit_bytes,
        }
    }

    /// The sample, if the process is using more than the high-water fraction of total memory.
    pub fn above_high_water(&self) -> Option<MemorySample> {
        let sample = self.probe.sample()?;
        if sample.total_bytes == 0 {
            return None;
        }
        let limit = sample.total_bytes as f64 * self.high_water_fraction;
        (sample.process_bytes as f64 > limit).then_some(sample)
    }

    /// The sample, if the process is using more than the soft limit.
    pub fn above_soft_limit(&self) -> Option<MemorySample> {
        let sample = self.probe.sample()?;
        (sample.process_bytes > self.soft_limit_bytes).then_some(sample)
    }
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("high_water_fraction", &self.high_water_fraction)
            .field("soft_limit_bytes", &self.soft_limit_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<MemorySample>);

    impl MemoryProbe for Fixed {
        fn sample(&self) -> Option<MemorySample> {
            self.0
        }
    }

    fn monitor(process_bytes: u64, total_bytes: u64) -> MemoryMonitor {
        let config = EngineConfig {
            memory_high_water_fraction: 0.5,
            row_memory_soft_limit_bytes: 1000,
            ..EngineConfig::default()
        };
        MemoryMonitor::new(
            Arc::new(Fixed(Some(MemorySample {
                process_bytes,
                total_bytes,
            }))),
            &config,
        )
    }

    #[test]
    fn thresholds() {
        assert!(monitor(600, 1000).above_high_water().is_some());
        assert!(monitor(500, 1000).above_high_water().is_none());
        assert!(monitor(1001, 10_000).above_soft_limit().is_some());
        assert!(monitor(1000, 10_000).above_soft_limit().is_none());
        assert!(monitor(10, 0).above_high_water().is_none());
    }

    #[test]
    fn unknown_readings_never_trigger() {
        let monitor = MemoryMonitor::new(Arc::new(Fixed(None)), &EngineConfig::default());
        assert!(monitor.above_high_water().is_none());
        assert!(monitor.above_soft_limit().is_none());
    }

    #[test]
    fn system_probe_reports_this_process() {
        let Some(sample) = SystemMemoryProbe::new().sample() else {
            return;
        };
        assert!(sample.process_bytes > 0);
        assert!(sample.total_bytes >= sample.process_bytes);
    }
}
