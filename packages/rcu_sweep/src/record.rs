use std::fmt;

/// One point-in-time resource usage measurement of a running benchmark process.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResourceSample {
    cpu_percent: f64,
    resident_bytes: u64,
}

impl ResourceSample {
    /// Creates a sample from measured values.
    #[must_use]
    pub fn new(cpu_percent: f64, resident_bytes: u64) -> Self {
        Self {
            cpu_percent,
            resident_bytes,
        }
    }

    /// CPU usage over the sampling interval, as a percentage of total machine capacity
    /// (normalized by the logical processor count, so 100 means every processor saturated).
    #[must_use]
    pub fn cpu_percent(&self) -> f64 {
        self.cpu_percent
    }

    /// Resident set size in bytes at the moment of the sample.
    #[must_use]
    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes
    }
}

/// How a benchmark child process came to an end.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ExitDisposition {
    /// The process exited on its own with the given status code.
    ///
    /// A code of `-1` stands in for termination by a signal the driver did not send, where no
    /// status code exists.
    Completed(i32),

    /// The driver killed the process because the sweep was aborted. The record holds whatever
    /// partial output was captured before the kill; it must never be confused with a normal
    /// completion.
    Aborted,
}

impl ExitDisposition {
    /// Whether this is a normal zero-status completion.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Completed(0))
    }
}

impl fmt::Display for ExitDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(code) => write!(f, "{code}"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// The persisted outcome of executing one benchmark configuration.
///
/// Records are written exactly once per configuration per execution and overwritten wholesale
/// on re-run; they are never merged and never observable partially written.
#[derive(Clone, Debug, PartialEq)]
pub struct RunRecord {
    total_reads: u64,
    total_writes: u64,
    exit: ExitDisposition,
    samples: Vec<ResourceSample>,
}

impl RunRecord {
    /// Creates a record from the parsed output and observed lifecycle of one run.
    #[must_use]
    pub fn new(
        total_reads: u64,
        total_writes: u64,
        exit: ExitDisposition,
        samples: Vec<ResourceSample>,
    ) -> Self {
        Self {
            total_reads,
            total_writes,
            exit,
            samples,
        }
    }

    /// Sum of read operations across all reader threads.
    #[must_use]
    pub fn total_reads(&self) -> u64 {
        self.total_reads
    }

    /// Sum of write operations across all writer threads.
    #[must_use]
    pub fn total_writes(&self) -> u64 {
        self.total_writes
    }

    /// How the child process ended.
    #[must_use]
    pub fn exit(&self) -> ExitDisposition {
        self.exit
    }

    /// The resource usage trace collected while the process ran, in sampling order.
    /// Empty when sampling was unavailable or the process exited before the first tick.
    #[must_use]
    pub fn samples(&self) -> &[ResourceSample] {
        &self.samples
    }
}
