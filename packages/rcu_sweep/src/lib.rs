#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Orchestrates benchmark sweeps over a family of read-mostly synchronization strategies
//! (quiescent-state-based reclamation variants, signal-based and slot-based designs), each
//! compiled as a standalone executable with a common command-line contract.
//!
//! The pipeline, leaf first:
//!
//! * [`VariantRegistry`] - the static table of strategies under comparison and how to build them.
//! * [`parse_throughput`]/[`parse_profile`] - extract counters from free-form program output.
//! * [`RunStore`] - one durable record per (variant, reader count, writer count) key.
//! * [`sampler`] - periodic CPU/memory usage sampling of a running child process.
//! * [`Driver`] - builds variants, executes configurations under CPU affinity with bounded
//!   parallelism, samples resource usage and persists [`RunRecord`]s.
//! * [`load_sweep`] - validates sweep completeness and produces comparison datasets for the
//!   external charting layer.
//!
//! The independent correctness oracle that cross-checks writer and reader logs lives in the
//! `rcu_verify` package.

mod config;
mod counters;
mod driver;
mod error;
mod record;
mod report;
pub mod sampler;
mod store;
mod variant;

pub use config::{Configuration, CpuSet, SweepSpec};
pub use counters::{
    CountPolicy, ThroughputCounters, parse_profile, parse_throughput, profile_metrics_default,
};
pub use driver::{Driver, FailedConfiguration, SweepSummary};
pub use error::{Error, Result};
pub use record::{ExitDisposition, ResourceSample, RunRecord};
pub use report::{Metric, Series, SweepData, load_sweep};
pub use store::{RunStore, StoredRun};
pub use variant::{BuildCommand, Variant, VariantRegistry};
