use std::fs;
use std::path::Path;

use tracing::debug;

use crate::{Error, Result};

/// One published version or one reader observation: a `(version, value)` pair from an
/// instrumented benchmark log.
///
/// Both fields are signed because the benchmark programs seed the shared state with version
/// -1 before the first write, and a reader that gets in early observes and logs exactly that.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LogEntry {
    version: i64,
    value: i64,
}

impl LogEntry {
    /// Creates an entry from a version and the value published under it.
    #[must_use]
    pub fn new(version: i64, value: i64) -> Self {
        Self { version, value }
    }

    /// The version the entry was logged under.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// The value the entry carries.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.value
    }
}

/// Reads and parses one log file, preserving line order.
///
/// # Errors
///
/// Returns [`Error::LogIo`] if the file cannot be read and [`Error::MalformedLine`] if a
/// non-blank line carries no parseable entry.
pub fn read_log(path: &Path) -> Result<Vec<LogEntry>> {
    let text = fs::read_to_string(path).map_err(|source| Error::LogIo {
        path: path.to_path_buf(),
        source,
    })?;

    let entries = parse_log(&text, path)?;

    debug!(path = %path.display(), entry_count = entries.len(), "log parsed");

    Ok(entries)
}

/// Parses log text into entries, preserving line order.
///
/// Lines look like `Writer: value=10, version=3`; any line containing a `value=<int>` token
/// and a `version=<int>` token qualifies, so the surrounding prose may differ between
/// benchmark variants. Blank lines are skipped.
///
/// # Errors
///
/// Returns [`Error::MalformedLine`] naming the first non-blank line that carries no
/// parseable entry; a log this tool cannot read in full must not be silently half-verified.
pub fn parse_log(text: &str, path: &Path) -> Result<Vec<LogEntry>> {
    let mut entries = Vec::new();

    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let (Some(value), Some(version)) = (field(line, "value="), field(line, "version="))
        else {
            return Err(Error::MalformedLine {
                path: path.to_path_buf(),
                line_number: index + 1,
                content: line.to_string(),
            });
        };

        entries.push(LogEntry { version, value });
    }

    Ok(entries)
}

/// Extracts the integer following `key` in a log line, tolerating trailing punctuation by
/// splitting on separators first.
fn field(line: &str, key: &str) -> Option<i64> {
    line.split([',', ' '])
        .filter_map(|token| token.strip_prefix(key))
        .find_map(|rest| rest.parse().ok())
}
