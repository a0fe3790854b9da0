//! Periodic CPU and memory usage sampling of a running child process.
//!
//! The sampler runs on a dedicated thread so the driver can keep draining the child's output
//! streams while samples accumulate. Sampling is strictly best-effort: the throughput signal
//! a benchmark run produces comes from the child's own output, so a sampling failure (for
//! example, the process exiting between a liveness check and a read) ends the trace early
//! instead of failing the run.
//!
//! On Linux, samples come from `/proc/<pid>/stat` (CPU jiffies) and `/proc/<pid>/statm`
//! (resident pages). On other targets no samples are produced.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::ResourceSample;

/// The default wall-clock interval between two resource usage samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Starts a sampler thread observing the process with the given PID.
///
/// The thread takes one sample per interval until the process disappears or `stop` is raised,
/// then returns the collected trace through its join handle. An empty trace is normal for
/// short-lived processes.
#[must_use]
pub fn spawn(
    pid: u32,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> JoinHandle<Vec<ResourceSample>> {
    thread::spawn(move || sample_until_gone(pid, interval, &stop))
}

fn sample_until_gone(pid: u32, interval: Duration, stop: &AtomicBool) -> Vec<ResourceSample> {
    let mut samples = Vec::new();

    let Some(mut previous_jiffies) = read_cpu_jiffies(pid) else {
        // Process already gone (or no procfs on this target).
        return samples;
    };

    loop {
        if sleep_interruptibly(interval, stop) {
            break;
        }

        let Some(jiffies) = read_cpu_jiffies(pid) else {
            break;
        };

        let Some(resident_bytes) = read_resident_bytes(pid) else {
            break;
        };

        let cpu_percent = cpu_percent_of_machine(jiffies.saturating_sub(previous_jiffies), interval);
        previous_jiffies = jiffies;

        samples.push(ResourceSample::new(cpu_percent, resident_bytes));
    }

    debug!(pid, sample_count = samples.len(), "sampler finished");

    samples
}

/// Sleeps for one sampling interval in short slices so a raised stop flag is noticed
/// promptly. Returns whether the flag was raised.
fn sleep_interruptibly(interval: Duration, stop: &AtomicBool) -> bool {
    const SLICE: Duration = Duration::from_millis(25);

    let mut remaining = interval;

    while !remaining.is_zero() {
        if stop.load(Ordering::Relaxed) {
            return true;
        }

        let slice = remaining.min(SLICE);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }

    stop.load(Ordering::Relaxed)
}

/// Converts a jiffy delta over one interval into a percentage of total machine capacity,
/// matching how the comparison charts have historically normalized CPU usage.
fn cpu_percent_of_machine(jiffy_delta: u64, interval: Duration) -> f64 {
    // A zero interval cannot be divided by; the trace must stay free of NaN/infinity because
    // persisted samples are compared for equality on reload.
    if interval.is_zero() {
        return 0.0;
    }

    let processor_count = thread::available_parallelism().map_or(1, usize::from);

    let seconds_busy = jiffy_delta as f64 / clock_ticks_per_second();

    seconds_busy / interval.as_secs_f64() * 100.0 / processor_count as f64
}

#[cfg(target_os = "linux")]
fn clock_ticks_per_second() -> f64 {
    // SAFETY: No safety requirements beyond passing a valid constant.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };

    if ticks > 0 { ticks as f64 } else { 100.0 }
}

#[cfg(not(target_os = "linux"))]
fn clock_ticks_per_second() -> f64 {
    100.0
}

/// Total CPU time (user + system) of the process in jiffies, or `None` once it is gone.
#[cfg(target_os = "linux")]
fn read_cpu_jiffies(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;

    // The comm field is parenthesized and may contain spaces; everything of interest comes
    // after the closing parenthesis. utime and stime are the 14th and 15th fields overall,
    // which puts them at offsets 11 and 12 of the remainder.
    let after_comm = stat.rsplit_once(')')?.1;
    let mut fields = after_comm.split_whitespace();

    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;

    Some(utime + stime)
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_jiffies(_pid: u32) -> Option<u64> {
    None
}

/// Resident set size of the process in bytes, or `None` once it is gone.
#[cfg(target_os = "linux")]
fn read_resident_bytes(pid: u32) -> Option<u64> {
    let statm = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;

    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;

    // SAFETY: No safety requirements beyond passing a valid constant.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page_size = if page_size > 0 { page_size as u64 } else { 4096 };

    Some(resident_pages * page_size)
}

#[cfg(not(target_os = "linux"))]
fn read_resident_bytes(_pid: u32) -> Option<u64> {
    None
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn nonexistent_process_yields_empty_trace() {
        // PIDs this large do not occur on any supported system.
        let stop = Arc::new(AtomicBool::new(false));
        let samples = spawn(u32::MAX - 1, Duration::from_millis(10), stop)
            .join()
            .unwrap();

        assert!(samples.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn samples_a_live_process() {
        use std::process::Command;

        let mut child = Command::new("sleep")
            .arg("1")
            .spawn()
            .expect("spawning 'sleep' must succeed on Linux");

        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn(child.id(), Duration::from_millis(100), Arc::clone(&stop));

        child.wait().unwrap();
        stop.store(true, Ordering::Relaxed);

        let samples = handle.join().unwrap();

        // Sampling a sleeping process measures near-zero CPU but a real resident set.
        for sample in &samples {
            assert!(sample.cpu_percent() >= 0.0);
            assert!(sample.resident_bytes() > 0);
        }
    }

    #[test]
    fn cpu_percent_is_zero_for_zero_delta() {
        assert!(cpu_percent_of_machine(0, Duration::from_secs(1)).abs() < f64::EPSILON);
    }

    #[test]
    fn cpu_percent_stays_finite_for_zero_interval() {
        let percent = cpu_percent_of_machine(100, Duration::ZERO);

        assert!(percent.is_finite());
        assert!(percent.abs() < f64::EPSILON);
    }
}
