#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]

//! Binary entry point for the log verification oracle.

use std::path::PathBuf;
use std::process::ExitCode;

use argh::FromArgs;
use rcu_verify::{read_log, verify, write_report};
use tracing::{error, warn};

/// Cross-checks the writer and reader logs of one instrumented benchmark run, reporting a
/// verdict per reader observation.
#[derive(FromArgs)]
struct Args {
    /// path to the writer's publication log
    #[argh(option, default = "PathBuf::from(\"writer_log.txt\")")]
    writer_log: PathBuf,

    /// path to the reader observation log
    #[argh(option, default = "PathBuf::from(\"reader_log.txt\")")]
    reader_log: PathBuf,

    /// path the verification report is written to
    #[argh(option)]
    report: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Args = argh::from_env();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> rcu_verify::Result<()> {
    let writer_entries = read_log(&args.writer_log)?;
    let reader_observations = read_log(&args.reader_log)?;

    let outcomes = verify(&writer_entries, &reader_observations);

    let violations = outcomes.iter().filter(|o| o.is_violation()).count();

    if violations > 0 {
        // Findings belong in the report; the tool itself still succeeded.
        warn!(violations, "consistency violations found");
    }

    write_report(&args.report, &outcomes)
}
