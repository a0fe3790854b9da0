use std::fmt;

use itertools::Itertools;

use crate::{Error, Result};

/// An ordered set of logical CPU indices that a benchmark configuration is pinned to.
///
/// Parsed from the Linux cpulist format (`0-3,6`). The set is never empty; every configuration
/// needs at least one processor to run on. Disjointness from other concurrently running
/// configurations is the sweep scheduler's responsibility, not enforced here.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CpuSet {
    indices: Vec<u32>,
}

impl CpuSet {
    /// Parses a cpulist string such as `0-3,6` into a CPU set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCpuSet`] if the string is not valid cpulist syntax and
    /// [`Error::EmptyCpuSet`] if it denotes no processors at all.
    pub fn parse(cpulist: &str) -> Result<Self> {
        let indices = cpulist::parse(cpulist)?;

        if indices.is_empty() {
            return Err(Error::EmptyCpuSet);
        }

        Ok(Self { indices })
    }

    /// The logical CPU indices in this set, in ascending order.
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// The number of processors in this set. Always at least one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the set holds no processors. Always false; [`Self::parse`] rejects empty sets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Renders the set in the form the benchmarked executables expect as their CPU-set
    /// argument: a plain comma-separated list without range shorthand (`0,1,2,3`).
    ///
    /// The executables tokenize on commas only, so the range syntax that [`fmt::Display`]
    /// may produce is not acceptable there.
    #[must_use]
    pub fn as_argument(&self) -> String {
        self.indices.iter().join(",")
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", cpulist::emit(self.indices.iter().copied()))
    }
}

/// Identifies one benchmark trial: a variant executed with a specific number of reader and
/// writer threads on a specific CPU set.
///
/// The persistence key of a trial is `(variant, readers, writers)`; the CPU set affects how
/// the trial runs but not where its record is stored.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Configuration {
    variant: String,
    readers: u32,
    writers: u32,
    cpus: CpuSet,
}

impl Configuration {
    /// Creates a configuration for the given variant and thread counts.
    pub fn new(variant: impl Into<String>, readers: u32, writers: u32, cpus: CpuSet) -> Self {
        Self {
            variant: variant.into(),
            readers,
            writers,
            cpus,
        }
    }

    /// Identifier of the variant this configuration exercises.
    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Number of reader threads the child process is asked to start.
    #[must_use]
    pub fn readers(&self) -> u32 {
        self.readers
    }

    /// Number of writer threads the child process is asked to start.
    #[must_use]
    pub fn writers(&self) -> u32 {
        self.writers
    }

    /// The CPU set the child process is pinned to.
    #[must_use]
    pub fn cpus(&self) -> &CpuSet {
        &self.cpus
    }

    /// The filename fragment shared by all artifacts of this configuration.
    pub(crate) fn file_stem(&self) -> String {
        format!("{}_{}_{}", self.variant, self.readers, self.writers)
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "variant '{}' with {} readers and {} writers on CPUs {}",
            self.variant, self.readers, self.writers, self.cpus
        )
    }
}

/// Describes a full benchmarking session: which variants to run and which reader counts to
/// sweep over, with a fixed writer count and CPU set shared by every configuration.
///
/// Concurrently executing configurations must not share processors for the measurements to be
/// uncontended; when running with more than one driver worker, size the CPU set accordingly or
/// keep the worker count at one.
#[derive(Clone, Debug)]
pub struct SweepSpec {
    variants: Vec<String>,
    reader_counts: Vec<u32>,
    writers: u32,
    cpus: CpuSet,
}

impl SweepSpec {
    /// Creates a sweep specification.
    ///
    /// The reader counts form the sweep dimension; one configuration is produced per
    /// (variant, reader count) pair.
    pub fn new(
        variants: impl IntoIterator<Item = impl Into<String>>,
        reader_counts: impl IntoIterator<Item = u32>,
        writers: u32,
        cpus: CpuSet,
    ) -> Self {
        Self {
            variants: variants.into_iter().map(Into::into).collect(),
            reader_counts: reader_counts.into_iter().collect(),
            writers,
            cpus,
        }
    }

    /// The variant identifiers this sweep exercises, in the order given by the caller.
    #[must_use]
    pub fn variants(&self) -> &[String] {
        &self.variants
    }

    /// The reader thread counts being swept.
    #[must_use]
    pub fn reader_counts(&self) -> &[u32] {
        &self.reader_counts
    }

    /// The writer thread count shared by every configuration.
    #[must_use]
    pub fn writers(&self) -> u32 {
        self.writers
    }

    /// The CPU set shared by every configuration.
    #[must_use]
    pub fn cpus(&self) -> &CpuSet {
        &self.cpus
    }

    /// All configurations of this sweep, variant-major: every reader count of the first
    /// variant, then every reader count of the second, and so on.
    pub fn configurations(&self) -> impl Iterator<Item = Configuration> + '_ {
        self.variants.iter().flat_map(move |variant| {
            self.reader_counts.iter().map(move |&readers| {
                Configuration::new(variant.clone(), readers, self.writers, self.cpus.clone())
            })
        })
    }
}
