use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while verifying a pair of benchmark logs.
///
/// A consistency violation found in the logs is a verification finding, not an error; errors
/// mean the verification itself could not run to completion.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A log or report file could not be read or written.
    #[error("log I/O failed on {}: {source}", path.display())]
    LogIo {
        /// The file the operation targeted.
        path: PathBuf,

        /// The underlying operating system error.
        #[source]
        source: io::Error,
    },

    /// A non-blank log line carries no parseable `value=`/`version=` pair.
    #[error("malformed line {line_number} in {}: {content:?}", path.display())]
    MalformedLine {
        /// The log file the line came from.
        path: PathBuf,

        /// One-based line number of the offending line.
        line_number: usize,

        /// The offending line, verbatim.
        content: String,
    },
}

/// A specialized `Result` type for verification operations, returning the crate's [`Error`]
/// type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn malformed_line_names_file_and_line() {
        let error = Error::MalformedLine {
            path: PathBuf::from("reader_log.txt"),
            line_number: 7,
            content: "garbage".to_string(),
        };

        let message = error.to_string();
        assert!(message.contains("reader_log.txt"));
        assert!(message.contains('7'));
        assert!(message.contains("garbage"));
    }
}
