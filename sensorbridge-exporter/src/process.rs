//! Default process metrics for the exporter's own process.

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::exposition::write_single;
use crate::mapping::MetricType;
use crate::registry::{Collector, SnapshotError};

const RESIDENT_MEMORY: &str = "process_resident_memory_bytes";
const VIRTUAL_MEMORY: &str = "process_virtual_memory_bytes";
const START_TIME: &str = "process_start_time_seconds";
const UPTIME: &str = "process_uptime_seconds";
const CPU_USAGE: &str = "process_cpu_usage_percent";

/// Families written by [`ProcessCollector`].
pub const PROCESS_METRIC_NAMES: &[&str] =
    &[RESIDENT_MEMORY, VIRTUAL_MEMORY, START_TIME, UPTIME, CPU_USAGE];

/// Reports memory, start time, uptime and CPU usage of the current process.
///
/// Refreshes the process entry on every snapshot. CPU usage is computed
/// between two refreshes, so the first scrape reports 0.
pub struct ProcessCollector {
    system: Mutex<System>,
    pid: Pid,
}

impl ProcessCollector {
    /// Create a collector for the current process.
    pub fn new() -> Result<Self, SnapshotError> {
        let pid = sysinfo::get_current_pid().map_err(|e| SnapshotError::Process(e.to_string()))?;
        Ok(Self {
            system: Mutex::new(System::new()),
            pid,
        })
    }
}

impl Collector for ProcessCollector {
    fn metric_names(&self) -> &'static [&'static str] {
        PROCESS_METRIC_NAMES
    }

    fn encode(&self, out: &mut String) -> Result<(), SnapshotError> {
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let process = system
            .process(self.pid)
            .ok_or_else(|| SnapshotError::Process(format!("process {} not found", self.pid)))?;

        write_single(
            out,
            RESIDENT_MEMORY,
            "Resident memory size in bytes.",
            MetricType::Gauge,
            process.memory() as f64,
        )?;
        write_single(
            out,
            VIRTUAL_MEMORY,
            "Virtual memory size in bytes.",
            MetricType::Gauge,
            process.virtual_memory() as f64,
        )?;
        write_single(
            out,
            START_TIME,
            "Start time of the process since unix epoch in seconds.",
            MetricType::Gauge,
            process.start_time() as f64,
        )?;
        write_single(
            out,
            UPTIME,
            "Time the process has been running in seconds.",
            MetricType::Gauge,
            process.run_time() as f64,
        )?;
        write_single(
            out,
            CPU_USAGE,
            "CPU usage of the process in percent.",
            MetricType::Gauge,
            f64::from(process.cpu_usage()),
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_metrics_rendered() {
        let collector = ProcessCollector::new().unwrap();
        let mut out = String::new();
        collector.encode(&mut out).unwrap();

        for name in collector.metric_names() {
            assert!(
                out.contains(&format!("# TYPE {} gauge", name)),
                "missing {name} in:\n{out}"
            );
        }

        let rss = out
            .lines()
            .find(|l| l.starts_with("process_resident_memory_bytes "))
            .unwrap();
        let value: f64 = rss.rsplit(' ').next().unwrap().parse().unwrap();
        assert!(value > 0.0);
    }
}
