use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while orchestrating a benchmark sweep.
///
/// A child process exiting with a non-zero status is deliberately not represented here; the
/// driver records such runs with their exit status and keeps going. Likewise, program output
/// containing zero recognizable counter lines is a valid (if suspicious) result, not an error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Building a variant executable failed. Fatal for that variant only; a sweep continues
    /// with the remaining variants.
    #[error("building variant '{variant}' failed: {details}")]
    BuildFailed {
        /// Identifier of the variant that failed to build.
        variant: String,

        /// Captured build diagnostics, typically the compiler's standard error output.
        details: String,
    },

    /// A benchmark child process could not be started. Fatal for that configuration only.
    #[error("failed to launch {configuration}: {source}")]
    LaunchFailed {
        /// Human-readable identity of the configuration that could not be launched.
        configuration: String,

        /// The underlying operating system error.
        #[source]
        source: io::Error,
    },

    /// Launching pinned child processes requires a Unix target.
    #[error("launching processes under CPU affinity is only supported on Unix targets")]
    UnsupportedPlatform,

    /// The captured standard output of a child process was not valid UTF-8.
    #[error("captured output of {configuration} is not valid UTF-8")]
    OutputNotUtf8 {
        /// Human-readable identity of the configuration whose output could not be decoded.
        configuration: String,
    },

    /// An I/O operation on the run record store failed.
    #[error("store I/O failed on {}: {source}", path.display())]
    StoreIo {
        /// The file or directory the operation targeted.
        path: PathBuf,

        /// The underlying operating system error.
        #[source]
        source: io::Error,
    },

    /// A persisted record file exists but does not have the expected shape.
    #[error("malformed record file {}: {problem}", path.display())]
    RecordFormat {
        /// The file that could not be interpreted.
        path: PathBuf,

        /// A human-readable description of the problem.
        problem: String,
    },

    /// A record required by the aggregator has not been stored. A sweep report refuses to
    /// render with silent gaps, so this names the missing configuration exactly.
    #[error(
        "no record stored for variant '{variant}' with {readers} readers and {writers} writers"
    )]
    MissingRecord {
        /// Identifier of the variant the missing record belongs to.
        variant: String,

        /// Reader thread count of the missing configuration.
        readers: u32,

        /// Writer thread count of the missing configuration.
        writers: u32,
    },

    /// A profiling counter file required by the aggregator has not been produced (the sweep
    /// likely ran without profiling enabled).
    #[error(
        "no profiling output for variant '{variant}' with {readers} readers and {writers} writers"
    )]
    MissingProfile {
        /// Identifier of the variant the missing profile belongs to.
        variant: String,

        /// Reader thread count of the configuration.
        readers: u32,

        /// Writer thread count of the configuration.
        writers: u32,
    },

    /// A sweep referenced a variant identifier the registry does not know.
    #[error("unknown variant '{id}'")]
    UnknownVariant {
        /// The unresolvable identifier.
        id: String,
    },

    /// A CPU set string could not be parsed as a cpulist.
    #[error(transparent)]
    InvalidCpuSet(#[from] cpulist::Error),

    /// A CPU set must contain at least one logical processor.
    #[error("CPU set must not be empty")]
    EmptyCpuSet,
}

/// A specialized `Result` type for sweep operations, returning the crate's [`Error`] type as
/// the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn missing_record_names_the_configuration() {
        let error = Error::MissingRecord {
            variant: "qsbr".to_string(),
            readers: 4,
            writers: 2,
        };

        let message = error.to_string();
        assert!(message.contains("qsbr"));
        assert!(message.contains('4'));
        assert!(message.contains('2'));
    }
}
