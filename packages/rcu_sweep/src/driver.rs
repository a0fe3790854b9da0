use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{self, Read};
use std::num::NonZero;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use std::{env, fmt, fs};

use new_zealand::nz;
use tracing::{debug, info, warn};

use crate::counters::{CountPolicy, parse_throughput};
use crate::record::{ExitDisposition, RunRecord};
use crate::variant::Variant;
use crate::{Configuration, Error, Result, RunStore, SweepSpec, VariantRegistry, sampler};

/// How often the driver polls a child process for exit between samples.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Executes benchmark sweeps: builds variant executables, launches each configuration under
/// CPU affinity, samples resource usage while the child runs, parses its output and persists
/// one [`RunRecord`] per configuration.
///
/// Configurations run on a bounded worker pool; each configuration itself is strictly
/// sequential (build, launch, sample/capture, parse, store). Failures are isolated per
/// configuration and collected into the [`SweepSummary`] rather than aborting siblings.
///
/// Keeping the worker count at one guarantees configurations never contend for the CPU set.
/// With more workers the caller must provision disjoint CPU sets per concurrent
/// configuration, which the driver does not verify.
#[derive(Debug)]
pub struct Driver<'a> {
    registry: &'a VariantRegistry,
    store: &'a RunStore,
    workdir: PathBuf,
    workers: NonZero<usize>,
    sample_interval: Duration,
    count_policy: CountPolicy,
    perf_events: Vec<String>,
    library_path: Option<PathBuf>,
    abort: Arc<AtomicBool>,
}

/// One configuration that could not be executed, with the reason.
#[derive(Debug)]
pub struct FailedConfiguration {
    configuration: Configuration,
    error: Error,
}

impl FailedConfiguration {
    /// The configuration that failed.
    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Why it failed.
    #[must_use]
    pub fn error(&self) -> &Error {
        &self.error
    }
}

impl fmt::Display for FailedConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.configuration, self.error)
    }
}

/// The per-configuration outcomes of one sweep execution.
#[derive(Debug, Default)]
pub struct SweepSummary {
    completed: Vec<Configuration>,
    skipped: Vec<Configuration>,
    failed: Vec<FailedConfiguration>,
}

impl SweepSummary {
    /// Configurations whose record was stored (including non-zero-exit and aborted runs,
    /// which are stored with their disposition for downstream filtering).
    #[must_use]
    pub fn completed(&self) -> &[Configuration] {
        &self.completed
    }

    /// Configurations that never started because the sweep was aborted first.
    #[must_use]
    pub fn skipped(&self) -> &[Configuration] {
        &self.skipped
    }

    /// Configurations that failed to build or launch.
    #[must_use]
    pub fn failed(&self) -> &[FailedConfiguration] {
        &self.failed
    }

    /// Whether every configuration of the sweep completed and was stored.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }
}

/// A unit of work for one pool worker: one fully resolved configuration.
#[derive(Debug)]
struct Job {
    variant: Variant,
    configuration: Configuration,
    executable: PathBuf,
}

enum JobOutcome {
    Completed,
    Skipped,
    Failed(Error),
}

impl<'a> Driver<'a> {
    /// Creates a driver over the given registry and store, with variant sources and build
    /// outputs in `workdir`.
    ///
    /// Defaults: one worker, one-second sampling interval, lenient sum-all count policy,
    /// no profiling.
    pub fn new(
        registry: &'a VariantRegistry,
        store: &'a RunStore,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            store,
            workdir: workdir.into(),
            workers: nz!(1),
            sample_interval: sampler::DEFAULT_SAMPLE_INTERVAL,
            count_policy: CountPolicy::default(),
            perf_events: Vec::new(),
            library_path: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets how many configurations may execute in parallel.
    #[must_use]
    pub fn with_workers(mut self, workers: NonZero<usize>) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the resource sampling interval.
    #[must_use]
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Sets how completion counts are combined into totals.
    #[must_use]
    pub fn with_count_policy(mut self, policy: CountPolicy) -> Self {
        self.count_policy = policy;
        self
    }

    /// Enables hardware counter profiling by wrapping each launch in `perf stat` with the
    /// given event names. Counter output lands next to the run records, keyed identically.
    ///
    /// The profiler stays resident as the parent of the benchmark process for the whole run,
    /// so resource sampling follows through to the wrapped process rather than measuring the
    /// profiler itself.
    #[must_use]
    pub fn with_perf_events(mut self, events: Vec<String>) -> Self {
        self.perf_events = events;
        self
    }

    /// Adds a directory to the dynamic library search path of every launched process, on top
    /// of whatever each variant declares for itself.
    #[must_use]
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    /// A handle that aborts the sweep when set: in-flight children are killed and their
    /// partial output is still parsed and stored, tagged as aborted; queued configurations
    /// are skipped.
    #[must_use]
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Executes every configuration of the sweep and reports per-configuration outcomes.
    ///
    /// All workers have finished by the time this returns, so the store holds every record
    /// the summary reports as completed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownVariant`] if the sweep names a variant the registry does not
    /// know. Per-configuration failures do not surface here; they are collected in the
    /// summary.
    pub fn run_sweep(&self, spec: &SweepSpec) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();
        let mut jobs = VecDeque::new();

        // Build phase: synchronous, because binaries must exist before any launch. A build
        // failure takes down only that variant's configurations.
        for id in spec.variants() {
            let variant = self
                .registry
                .resolve(id)
                .ok_or_else(|| Error::UnknownVariant { id: id.clone() })?;

            match variant.ensure_built(&self.workdir) {
                Ok(executable) => {
                    for configuration in configurations_of(spec, id) {
                        jobs.push_back(Job {
                            variant: variant.clone(),
                            configuration,
                            executable: executable.clone(),
                        });
                    }
                }
                Err(error) => {
                    warn!(variant = %id, %error, "variant build failed; skipping its configurations");

                    let details = match &error {
                        Error::BuildFailed { details, .. } => details.clone(),
                        other => other.to_string(),
                    };

                    for configuration in configurations_of(spec, id) {
                        summary.failed.push(FailedConfiguration {
                            configuration,
                            error: Error::BuildFailed {
                                variant: id.clone(),
                                details: details.clone(),
                            },
                        });
                    }
                }
            }
        }

        let worker_count = self.workers.get().min(jobs.len().max(1));
        let queue = Mutex::new(jobs);
        let (outcome_tx, outcome_rx) = mpsc::channel::<(Configuration, JobOutcome)>();

        thread::scope(|scope| {
            for _ in 0..worker_count {
                let outcome_tx = outcome_tx.clone();
                let queue = &queue;

                scope.spawn(move || {
                    loop {
                        let job = queue
                            .lock()
                            .expect("work queue mutex poisoned - a worker panicked")
                            .pop_front();

                        let Some(job) = job else {
                            break;
                        };

                        let outcome = if self.abort.load(Ordering::Relaxed) {
                            JobOutcome::Skipped
                        } else {
                            match self.run_configuration(&job) {
                                Ok(()) => JobOutcome::Completed,
                                Err(error) => JobOutcome::Failed(error),
                            }
                        };

                        outcome_tx
                            .send((job.configuration, outcome))
                            .expect("outcome receiver lives until all workers are joined");
                    }
                });
            }
        });

        // The scope joined every worker, which is the barrier between execution and
        // reporting: nothing is in flight past this point.
        drop(outcome_tx);

        for (configuration, outcome) in outcome_rx.try_iter() {
            match outcome {
                JobOutcome::Completed => summary.completed.push(configuration),
                JobOutcome::Skipped => summary.skipped.push(configuration),
                JobOutcome::Failed(error) => {
                    warn!(%configuration, %error, "configuration failed");
                    summary.failed.push(FailedConfiguration {
                        configuration,
                        error,
                    });
                }
            }
        }

        info!(
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "sweep finished"
        );

        Ok(summary)
    }

    /// Runs one configuration end to end: launch, sample, capture, parse, store.
    fn run_configuration(&self, job: &Job) -> Result<()> {
        let configuration = &job.configuration;

        info!(%configuration, "launching");

        let mut command = self.prepare_command(job);

        apply_affinity(&mut command, configuration)?;

        let mut child = command.spawn().map_err(|source| Error::LaunchFailed {
            configuration: configuration.to_string(),
            source,
        })?;

        let stop = Arc::new(AtomicBool::new(false));
        let sampler_handle = sampler::spawn(
            self.sample_pid(child.id()),
            self.sample_interval,
            Arc::clone(&stop),
        );
        let stdout_handle = collect_stream(child.stdout.take());
        let stderr_handle = collect_stream(child.stderr.take());

        let mut killed_on_abort = false;

        let status = loop {
            if !killed_on_abort && self.abort.load(Ordering::Relaxed) {
                killed_on_abort = true;
                warn!(%configuration, "abort requested; killing child");
                // Kill failure means the child is already gone; try_wait picks that up.
                _ = child.kill();
            }

            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
                Err(source) => {
                    stop.store(true, Ordering::Relaxed);
                    return Err(Error::LaunchFailed {
                        configuration: configuration.to_string(),
                        source,
                    });
                }
            }
        };

        stop.store(true, Ordering::Relaxed);

        let samples = sampler_handle.join().unwrap_or_default();
        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();

        if !stderr.is_empty() {
            debug!(%configuration, stderr = %String::from_utf8_lossy(&stderr), "child stderr");
        }

        let text = String::from_utf8(stdout).map_err(|_invalid| Error::OutputNotUtf8 {
            configuration: configuration.to_string(),
        })?;

        let exit = if killed_on_abort {
            ExitDisposition::Aborted
        } else {
            // A signal-terminated child has no status code; -1 marks that case.
            ExitDisposition::Completed(status.code().unwrap_or(-1))
        };

        if !exit.is_clean() {
            warn!(%configuration, %exit, "child did not complete cleanly; storing partial results");
        }

        let counters = parse_throughput(&text, self.count_policy);

        debug!(
            %configuration,
            total_reads = counters.total_reads(),
            total_writes = counters.total_writes(),
            sample_count = samples.len(),
            "run finished"
        );

        let record = RunRecord::new(
            counters.total_reads(),
            counters.total_writes(),
            exit,
            samples,
        );

        self.store.put(configuration, &record)
    }

    /// The pid whose resources are sampled: the child itself, or the benchmark process under
    /// the profiler wrapper when one is in use. `perf stat` forks the workload and stays
    /// resident as its parent, so sampling the spawned pid directly would measure the
    /// profiler, not the benchmark.
    fn sample_pid(&self, child_pid: u32) -> u32 {
        if self.perf_events.is_empty() {
            child_pid
        } else {
            workload_pid(child_pid).unwrap_or(child_pid)
        }
    }

    fn prepare_command(&self, job: &Job) -> Command {
        let configuration = &job.configuration;

        let mut command = if self.perf_events.is_empty() {
            Command::new(&job.executable)
        } else {
            let perf_output = self
                .store
                .dir()
                .join(format!("perf_{}.txt", configuration.file_stem()));

            let mut command = Command::new("perf");
            command
                .arg("stat")
                .arg("-e")
                .arg(self.perf_events.join(","))
                .arg("-o")
                .arg(perf_output)
                .arg("--")
                .arg(&job.executable);
            command
        };

        command
            .arg(configuration.readers().to_string())
            .arg(configuration.writers().to_string());

        if job.variant.takes_cpu_argument() {
            command.arg(configuration.cpus().as_argument());
        }

        command
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut search_dirs = Vec::new();

        if let Some(library_path) = job.variant.library_path() {
            search_dirs.push(self.workdir.join(library_path));
        }

        if let Some(library_path) = &self.library_path {
            search_dirs.push(library_path.clone());
        }

        if !search_dirs.is_empty() {
            let mut value = OsString::new();

            for dir in search_dirs {
                if !value.is_empty() {
                    value.push(":");
                }
                value.push(dir);
            }

            if let Some(existing) = env::var_os("LD_LIBRARY_PATH") {
                value.push(":");
                value.push(existing);
            }

            command.env("LD_LIBRARY_PATH", value);
        }

        command
    }
}

/// All configurations of the sweep belonging to one variant, in sweep order.
fn configurations_of(spec: &SweepSpec, variant: &str) -> Vec<Configuration> {
    spec.configurations()
        .filter(|configuration| configuration.variant() == variant)
        .collect()
}

/// First child of the given process, polled from procfs until it appears or the parent is
/// gone. A profiler wrapper forks its workload immediately, so a few attempts suffice.
#[cfg(target_os = "linux")]
fn workload_pid(parent: u32) -> Option<u32> {
    const ATTEMPTS: u32 = 40;

    let path = format!("/proc/{parent}/task/{parent}/children");

    for _ in 0..ATTEMPTS {
        let children = fs::read_to_string(&path).ok()?;

        if let Some(pid) = children.split_whitespace().next() {
            return pid.parse().ok();
        }

        thread::sleep(Duration::from_millis(25));
    }

    None
}

#[cfg(not(target_os = "linux"))]
fn workload_pid(_parent: u32) -> Option<u32> {
    None
}

/// Drains a child's output stream on its own thread so a full pipe can never stall the child
/// or the exit-polling loop.
fn collect_stream(stream: Option<impl Read + Send + 'static>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();

        if let Some(mut stream) = stream {
            // A read error just truncates the capture; partial output is still parsed.
            _ = stream.read_to_end(&mut buffer);
        }

        buffer
    })
}

/// Pins the child process to the configuration's CPU set before exec.
#[cfg(unix)]
fn apply_affinity(command: &mut Command, configuration: &Configuration) -> Result<()> {
    use std::os::unix::process::CommandExt;

    let indices = configuration.cpus().indices().to_vec();

    // CPU_SET indexes into a fixed-size mask; a past-the-end index corrupts memory, and the
    // closure below runs between fork and exec where nothing is recoverable. Cpulist parsing
    // accepts any u32, so the bound must be enforced here.
    let limit = libc::CPU_SETSIZE as usize;
    if let Some(&cpu) = indices.iter().find(|&&cpu| cpu as usize >= limit) {
        return Err(Error::LaunchFailed {
            configuration: configuration.to_string(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("CPU index {cpu} exceeds the pinnable range of {limit} processors"),
            ),
        });
    }

    // SAFETY: The closure runs between fork and exec, where only async-signal-safe calls are
    // permitted; sched_setaffinity is a raw syscall wrapper and allocates nothing.
    unsafe {
        command.pre_exec(move || {
            let mut set: libc::cpu_set_t = std::mem::zeroed();

            for &cpu in &indices {
                libc::CPU_SET(cpu as usize, &mut set);
            }

            // 0 means the calling (child) process.
            if libc::sched_setaffinity(0, size_of::<libc::cpu_set_t>(), &set) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            Ok(())
        });
    }

    Ok(())
}

#[cfg(not(unix))]
fn apply_affinity(_command: &mut Command, _configuration: &Configuration) -> Result<()> {
    // There is no portable affinity mechanism, and an unpinned measurement would be
    // silently wrong rather than visibly unsupported.
    Err(Error::UnsupportedPlatform)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::CpuSet;

    #[test]
    fn summary_completeness() {
        let summary = SweepSummary::default();
        assert!(summary.is_complete());

        let incomplete = SweepSummary {
            completed: Vec::new(),
            skipped: vec![Configuration::new(
                "qsbr",
                1,
                1,
                CpuSet::parse("0").unwrap(),
            )],
            failed: Vec::new(),
        };
        assert!(!incomplete.is_complete());
    }

    #[test]
    fn unknown_variant_fails_the_sweep_up_front() {
        let registry = VariantRegistry::builtin();
        let temp = tempfile::tempdir().unwrap();
        let store = RunStore::new(temp.path().join("records")).unwrap();

        let driver = Driver::new(&registry, &store, temp.path());

        let spec = SweepSpec::new(["no-such-variant"], [1], 1, CpuSet::parse("0").unwrap());

        assert!(matches!(
            driver.run_sweep(&spec),
            Err(Error::UnknownVariant { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn executes_a_scripted_variant_end_to_end() {
        use crate::BuildCommand;

        let temp = tempfile::tempdir().unwrap();
        let store = RunStore::new(temp.path().join("records")).unwrap();

        // The "build" emits a shell script that prints the expected completion lines.
        let script = "printf '#!/bin/sh\\necho Reader 0 read 7 times\\necho Writer 0 wrote 3 times\\n' > fake && chmod +x fake";
        let registry = VariantRegistry::from_variants(vec![Variant::new(
            "fake",
            BuildCommand::new("sh", ["-c", script]),
        )]);

        let driver = Driver::new(&registry, &store, temp.path())
            .with_sample_interval(Duration::from_millis(10));

        let spec = SweepSpec::new(["fake"], [1], 1, CpuSet::parse("0").unwrap());
        let summary = driver.run_sweep(&spec).unwrap();

        assert!(summary.is_complete());
        assert_eq!(summary.completed().len(), 1);

        let record = store.get("fake", 1, 1).unwrap();
        assert_eq!(record.total_reads(), 7);
        assert_eq!(record.total_writes(), 3);
        assert!(record.exit().is_clean());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn abort_kills_in_flight_and_skips_queued() {
        use crate::BuildCommand;

        let temp = tempfile::tempdir().unwrap();
        let store = RunStore::new(temp.path().join("records")).unwrap();

        // The script prints its completion line up front, then stalls until killed.
        let script = "printf '#!/bin/sh\\necho Reader 0 read 5 times\\nsleep 30\\n' > stall && chmod +x stall";
        let registry = VariantRegistry::from_variants(vec![Variant::new(
            "stall",
            BuildCommand::new("sh", ["-c", script]),
        )]);

        let driver = Driver::new(&registry, &store, temp.path())
            .with_sample_interval(Duration::from_millis(10));

        let abort = driver.abort_flag();
        let aborter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(400));
            abort.store(true, Ordering::Relaxed);
        });

        let spec = SweepSpec::new(["stall"], [1, 2], 1, CpuSet::parse("0").unwrap());
        let summary = driver.run_sweep(&spec).unwrap();
        aborter.join().unwrap();

        // The in-flight configuration was killed but its partial output still stored; the
        // queued one never started.
        assert!(!summary.is_complete());
        assert_eq!(summary.completed().len(), 1);
        assert_eq!(summary.skipped().len(), 1);

        let record = store.get("stall", 1, 1).unwrap();
        assert_eq!(record.exit(), ExitDisposition::Aborted);
        assert_eq!(record.total_reads(), 5);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn workload_pid_resolves_the_wrapped_process() {
        // The trailing command forces the shell to fork for 'sleep' instead of exec'ing it,
        // mimicking how a profiler wrapper stays resident above its workload.
        let mut wrapper = Command::new("sh")
            .arg("-c")
            .arg("sleep 1; true")
            .spawn()
            .unwrap();

        let pid = workload_pid(wrapper.id()).unwrap();
        assert_ne!(pid, wrapper.id());

        let comm = fs::read_to_string(format!("/proc/{pid}/comm")).unwrap();
        assert_eq!(comm.trim(), "sleep");

        wrapper.wait().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn oversized_cpu_index_is_rejected_before_launch() {
        let mut command = Command::new("true");
        let configuration = Configuration::new("qsbr", 1, 1, CpuSet::parse("99999").unwrap());

        assert!(matches!(
            apply_affinity(&mut command, &configuration),
            Err(Error::LaunchFailed { .. })
        ));
    }

    #[test]
    fn build_failure_skips_only_that_variant() {
        let temp = tempfile::tempdir().unwrap();
        let store = RunStore::new(temp.path().join("records")).unwrap();

        let registry = VariantRegistry::from_variants(vec![Variant::new(
            "unbuildable",
            crate::BuildCommand::new("definitely-not-a-real-compiler", ["x"]),
        )]);

        let driver = Driver::new(&registry, &store, temp.path());
        let spec = SweepSpec::new(["unbuildable"], [1, 2], 1, CpuSet::parse("0").unwrap());

        let summary = driver.run_sweep(&spec).unwrap();

        assert!(summary.completed().is_empty());
        assert_eq!(summary.failed().len(), 2);
        assert!(
            summary
                .failed()
                .iter()
                .all(|failure| matches!(failure.error(), Error::BuildFailed { .. }))
        );
    }
}
