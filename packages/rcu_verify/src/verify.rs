use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::log::LogEntry;
use crate::{Error, Result};

/// The verdict for one reader observation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Outcome {
    /// The observed version exists and carries the value the writer published under it.
    Success {
        /// The observed version.
        version: i64,

        /// The value read, matching the published one.
        value: i64,
    },

    /// The observed version was never published by any writer.
    UnknownVersion {
        /// The version no writer logged.
        version: i64,
    },

    /// The observed version exists but the value read differs from the published one.
    ValueMismatch {
        /// The observed version.
        version: i64,

        /// The value the writer published under this version.
        expected: i64,

        /// The value the reader actually observed.
        actual: i64,
    },
}

impl Outcome {
    /// Whether this outcome is a consistency violation.
    #[must_use]
    pub fn is_violation(&self) -> bool {
        !matches!(self, Self::Success { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { version, value } => {
                write!(f, "OK: version {version} read value {value}")
            }
            Self::UnknownVersion { version } => {
                write!(f, "ERROR: version {version} was never written")
            }
            Self::ValueMismatch {
                version,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "ERROR: version {version} expected value {expected}, read {actual}"
                )
            }
        }
    }
}

/// Cross-checks reader observations against the writer's publication log.
///
/// The writer log is folded into a version-to-value map first; when a version appears more
/// than once, the last occurrence wins, mirroring how later publications of the same version
/// overwrite earlier ones in the shared state.
///
/// Observations are then judged in log order and every one produces exactly one [`Outcome`],
/// so the result lines up index-for-index with the reader log. Runs in one pass over each
/// log.
#[must_use]
pub fn verify(writer_entries: &[LogEntry], reader_observations: &[LogEntry]) -> Vec<Outcome> {
    let mut published: HashMap<i64, i64> = HashMap::with_capacity(writer_entries.len());

    for entry in writer_entries {
        published.insert(entry.version(), entry.value());
    }

    reader_observations
        .iter()
        .map(|observation| match published.get(&observation.version()) {
            None => Outcome::UnknownVersion {
                version: observation.version(),
            },
            Some(&expected) if expected != observation.value() => Outcome::ValueMismatch {
                version: observation.version(),
                expected,
                actual: observation.value(),
            },
            Some(_) => Outcome::Success {
                version: observation.version(),
                value: observation.value(),
            },
        })
        .collect()
}

/// Writes the verification report: one line per outcome, in observation order.
///
/// Summary counts go to the log rather than the report so the report stays line-per-line
/// comparable with the reader log it judges.
///
/// # Errors
///
/// Returns [`Error::LogIo`] if the report file cannot be written.
pub fn write_report(path: &Path, outcomes: &[Outcome]) -> Result<()> {
    let mut contents = String::new();

    for outcome in outcomes {
        contents.push_str(&outcome.to_string());
        contents.push('\n');
    }

    fs::write(path, contents).map_err(|source| Error::LogIo {
        path: path.to_path_buf(),
        source,
    })?;

    let violations = outcomes.iter().filter(|o| o.is_violation()).count();

    info!(
        observations = outcomes.len(),
        violations,
        report = %path.display(),
        "verification report written"
    );

    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn entries(pairs: &[(i64, i64)]) -> Vec<LogEntry> {
        pairs
            .iter()
            .map(|&(version, value)| LogEntry::new(version, value))
            .collect()
    }

    #[test]
    fn judges_observations_in_order() {
        let writers = entries(&[(1, 10), (2, 20)]);
        let readers = entries(&[(1, 10), (2, 99), (3, 5)]);

        assert_eq!(
            verify(&writers, &readers),
            vec![
                Outcome::Success {
                    version: 1,
                    value: 10
                },
                Outcome::ValueMismatch {
                    version: 2,
                    expected: 20,
                    actual: 99
                },
                Outcome::UnknownVersion { version: 3 },
            ]
        );
    }

    #[test]
    fn later_writer_entry_wins_for_a_repeated_version() {
        let writers = entries(&[(1, 10), (1, 11)]);
        let readers = entries(&[(1, 11), (1, 10)]);

        assert_eq!(
            verify(&writers, &readers),
            vec![
                Outcome::Success {
                    version: 1,
                    value: 11
                },
                Outcome::ValueMismatch {
                    version: 1,
                    expected: 11,
                    actual: 10
                },
            ]
        );
    }

    #[test]
    fn duplicate_observations_are_judged_independently() {
        let writers = entries(&[(1, 10)]);
        let readers = entries(&[(1, 10), (1, 10)]);

        let outcomes = verify(&writers, &readers);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| !o.is_violation()));
    }

    #[test]
    fn empty_reader_log_verifies_vacuously() {
        let writers = entries(&[(1, 10)]);

        assert!(verify(&writers, &[]).is_empty());
    }

    #[test]
    fn seeded_version_is_valid_once_logged_by_the_writer() {
        // A writer log that records the -1 seed makes early observations of it legitimate.
        let writers = entries(&[(-1, 0), (1, 10)]);
        let readers = entries(&[(-1, 0)]);

        assert_eq!(
            verify(&writers, &readers),
            vec![Outcome::Success {
                version: -1,
                value: 0
            }]
        );
    }

    #[test]
    fn report_has_one_line_per_observation() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("report.txt");

        let outcomes = vec![
            Outcome::Success {
                version: 1,
                value: 10,
            },
            Outcome::UnknownVersion { version: 3 },
        ];

        write_report(&path, &outcomes).unwrap();

        let report = fs::read_to_string(&path).unwrap();
        assert_eq!(
            report,
            "OK: version 1 read value 10\nERROR: version 3 was never written\n"
        );
    }
}
