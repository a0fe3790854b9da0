#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]

//! Binary entry point for the benchmark sweep harness.
//!
//! Two subcommands cover the harness lifecycle: `run` executes a sweep and persists one run
//! record per configuration, `report` turns the persisted records into comparison datasets
//! for the external charting layer.

use std::num::NonZero;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use argh::FromArgs;
use new_zealand::nz;
use rcu_sweep::{
    CountPolicy, CpuSet, Driver, RunStore, SweepSpec, VariantRegistry, load_sweep,
    profile_metrics_default,
};
use tracing::error;

/// A benchmark harness that sweeps reader-heavy synchronization strategies across thread
/// counts, records throughput and resource usage, and emits comparison datasets.
#[derive(FromArgs)]
struct Args {
    #[argh(subcommand)]
    command: Subcommand,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Subcommand {
    Run(RunArgs),
    Report(ReportArgs),
}

/// Execute a sweep, storing one run record per (variant, reader count) configuration.
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
struct RunArgs {
    /// reader thread counts to sweep, as a cpulist-style string (e.g. "1-11" or "1,2,4,8")
    #[argh(option)]
    readers: String,

    /// writer thread count shared by every configuration
    #[argh(option, default = "1")]
    writers: u32,

    /// logical processors to pin each benchmark process to, as a cpulist-style string
    #[argh(option)]
    cpus: String,

    /// directory holding the variant sources; executables are built here too
    #[argh(option, default = "PathBuf::from(\".\")")]
    workdir: PathBuf,

    /// directory run records are stored in
    #[argh(option)]
    out: PathBuf,

    /// comma-separated variant identifiers to sweep (default: every built-in variant)
    #[argh(option)]
    variants: Option<String>,

    /// how many configurations to execute concurrently
    #[argh(option, default = "nz!(1)")]
    workers: NonZero<usize>,

    /// comma-separated profiler event names to record alongside each run, or "default" for
    /// the standard comparison set
    #[argh(option)]
    perf_events: Option<String>,

    /// extra directory to put on the dynamic library search path of every benchmark process
    #[argh(option)]
    lib_path: Option<PathBuf>,

    /// how per-thread counters combine into totals ("sum" or "truncate")
    #[argh(option, default = "CountPolicy::SumAll")]
    count_policy: CountPolicy,

    /// seconds between two resource usage samples; must be at least one
    #[argh(option, default = "nz!(1)")]
    sample_interval: NonZero<u64>,
}

/// Produce comparison datasets from the run records of a completed sweep.
#[derive(FromArgs)]
#[argh(subcommand, name = "report")]
struct ReportArgs {
    /// reader thread counts the sweep covered, as a cpulist-style string
    #[argh(option)]
    readers: String,

    /// writer thread count the sweep used
    #[argh(option, default = "1")]
    writers: u32,

    /// directory the run records were stored in; datasets are written here too
    #[argh(option)]
    out: PathBuf,

    /// comma-separated variant identifiers to include (default: every built-in variant)
    #[argh(option)]
    variants: Option<String>,

    /// comma-separated profiler event names to emit datasets for, or "default" for the
    /// standard comparison set
    #[argh(option)]
    perf_metrics: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Args = argh::from_env();

    let result = match args.command {
        Subcommand::Run(run) => execute_sweep(&run),
        Subcommand::Report(report) => produce_report(&report),
    };

    match result {
        Ok(exit_code) => exit_code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn execute_sweep(args: &RunArgs) -> rcu_sweep::Result<ExitCode> {
    let registry = VariantRegistry::builtin();
    let store = RunStore::new(&args.out)?;
    let spec = sweep_spec(
        &registry,
        args.variants.as_deref(),
        &args.readers,
        args.writers,
        Some(&args.cpus),
    )?;

    let mut driver = Driver::new(&registry, &store, &args.workdir)
        .with_workers(args.workers)
        .with_count_policy(args.count_policy)
        .with_sample_interval(Duration::from_secs(args.sample_interval.get()));

    if let Some(events) = &args.perf_events {
        driver = driver.with_perf_events(metric_list(events));
    }

    if let Some(lib_path) = &args.lib_path {
        driver = driver.with_library_path(lib_path);
    }

    install_abort_handler(driver.abort_flag());

    let summary = driver.run_sweep(&spec)?;

    for failure in summary.failed() {
        error!("{failure}");
    }

    if summary.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn produce_report(args: &ReportArgs) -> rcu_sweep::Result<ExitCode> {
    let registry = VariantRegistry::builtin();
    let store = RunStore::new(&args.out)?;
    let spec = sweep_spec(
        &registry,
        args.variants.as_deref(),
        &args.readers,
        args.writers,
        None,
    )?;

    let data = load_sweep(&store, &registry, &spec)?;
    data.write_datasets(&args.out)?;

    if let Some(metrics) = &args.perf_metrics {
        for metric in metric_list(metrics) {
            data.write_profile_dataset(&store, &args.out, &metric)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Builds the sweep specification shared by both subcommands.
///
/// Reporting does not launch processes, so it has no CPU set of its own; the records it reads
/// are keyed by (variant, readers, writers) only.
fn sweep_spec(
    registry: &VariantRegistry,
    variants: Option<&str>,
    readers: &str,
    writers: u32,
    cpus: Option<&str>,
) -> rcu_sweep::Result<SweepSpec> {
    let variants: Vec<String> = match variants {
        Some(list) => split_list(list),
        None => registry.iter().map(|variant| variant.id().to_string()).collect(),
    };

    let reader_counts = cpulist::parse(readers)?;
    let cpus = CpuSet::parse(cpus.unwrap_or("0"))?;

    Ok(SweepSpec::new(variants, reader_counts, writers, cpus))
}

/// Expands a profiler metric list, with `default` standing for the standard comparison set.
fn metric_list(list: &str) -> Vec<String> {
    if list == "default" {
        profile_metrics_default()
            .into_iter()
            .map(str::to_string)
            .collect()
    } else {
        split_list(list)
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(unix)]
mod abort {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, OnceLock};

    static ABORT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    extern "C" fn raise_abort_flag(_signal: libc::c_int) {
        if let Some(flag) = ABORT_FLAG.get() {
            flag.store(true, Ordering::Relaxed);
        }
    }

    /// Routes SIGINT into the driver's abort flag so an interrupted sweep kills its child
    /// processes and reports which configurations were cut short instead of dying mid-write.
    pub(crate) fn install_abort_handler(flag: Arc<AtomicBool>) {
        if ABORT_FLAG.set(flag).is_err() {
            // Already installed; the existing flag stays authoritative.
            return;
        }

        // SAFETY: The handler only performs an atomic store, which is async-signal-safe.
        unsafe {
            libc::signal(libc::SIGINT, raise_abort_flag as libc::sighandler_t);
        }
    }
}

#[cfg(unix)]
use abort::install_abort_handler;

#[cfg(not(unix))]
fn install_abort_handler(_flag: std::sync::Arc<std::sync::atomic::AtomicBool>) {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn list_splitting_trims_and_drops_empties() {
        assert_eq!(split_list("a, b,,c"), vec!["a", "b", "c"]);
        assert_eq!(split_list(""), Vec::<String>::new());
    }

    #[test]
    fn default_metric_list_expands() {
        let metrics = metric_list("default");
        assert!(metrics.iter().any(|m| m == "cache-misses"));

        assert_eq!(metric_list("cycles,instructions"), vec!["cycles", "instructions"]);
    }

    #[test]
    fn zero_sample_interval_is_rejected_at_parse_time() {
        let result = RunArgs::from_args(
            &["run"],
            &[
                "--readers",
                "1",
                "--cpus",
                "0",
                "--out",
                "records",
                "--sample-interval",
                "0",
            ],
        );

        assert!(result.is_err());
    }

    #[test]
    fn spec_defaults_to_every_builtin_variant() {
        let registry = VariantRegistry::builtin();
        let spec = sweep_spec(&registry, None, "1-3", 1, Some("0,1")).unwrap();

        assert_eq!(spec.variants().len(), registry.len());
        assert_eq!(spec.reader_counts(), &[1, 2, 3]);
    }
}
