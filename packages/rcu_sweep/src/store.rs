use std::env;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::record::{ExitDisposition, ResourceSample, RunRecord};
use crate::{Configuration, Error, Result};

const RECORD_HEADER: &str = "variant,num_readers,num_writers,total_reads,total_writes,exit_status";
const USAGE_HEADER: &str = "cpu_percent,resident_bytes";

/// Durable storage of one [`RunRecord`] per (variant, reader count, writer count) key.
///
/// Each record is a small CSV file in the store directory; the resource usage trace, when
/// present, is a sibling file keyed identically. Files are written to a temporary path and
/// renamed into place, so a record is either fully present or absent, never truncated.
///
/// Writers targeting distinct keys need no coordination because they touch distinct files.
/// Concurrent writers to the same key are a scheduling error on the caller's side; the store
/// does not arbitrate beyond last-write-wins.
#[derive(Debug)]
pub struct RunStore {
    dir: PathBuf,
}

/// One record retrieved by [`RunStore::list`], together with the key it was stored under.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRun {
    variant: String,
    readers: u32,
    writers: u32,
    record: RunRecord,
}

impl StoredRun {
    /// Identifier of the variant this record belongs to.
    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Reader thread count of the recorded configuration.
    #[must_use]
    pub fn readers(&self) -> u32 {
        self.readers
    }

    /// Writer thread count of the recorded configuration.
    #[must_use]
    pub fn writers(&self) -> u32 {
        self.writers
    }

    /// The record itself.
    #[must_use]
    pub fn record(&self) -> &RunRecord {
        &self.record
    }
}

impl RunStore {
    /// Opens (and creates, if needed) a store rooted at the given directory.
    ///
    /// A relative directory is resolved against the current working directory once, here.
    /// Paths derived from the store are later handed to processes running from other working
    /// directories (profiler output lands next to the records), so the store location must
    /// not depend on whoever resolves it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreIo`] if the directory cannot be created or resolved.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        fs::create_dir_all(&dir).map_err(|source| Error::StoreIo {
            path: dir.clone(),
            source,
        })?;

        let dir = if dir.is_absolute() {
            dir
        } else {
            let cwd = env::current_dir().map_err(|source| Error::StoreIo {
                path: dir.clone(),
                source,
            })?;
            cwd.join(dir)
        };

        Ok(Self { dir })
    }

    /// The directory this store keeps its files in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists a record under the configuration's key, replacing any previous record for
    /// that key in full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreIo`] on any filesystem failure.
    pub fn put(&self, config: &Configuration, record: &RunRecord) -> Result<()> {
        let mut contents = String::new();
        _ = writeln!(contents, "{RECORD_HEADER}");
        _ = writeln!(
            contents,
            "{},{},{},{},{},{}",
            config.variant(),
            config.readers(),
            config.writers(),
            record.total_reads(),
            record.total_writes(),
            record.exit()
        );

        let record_path = self.record_path(config.variant(), config.readers(), config.writers());
        self.write_atomic(&record_path, &contents)?;

        let usage_path = self.usage_path(config.variant(), config.readers(), config.writers());

        if record.samples().is_empty() {
            // A re-run without samples must not leave a stale trace from the previous run.
            match fs::remove_file(&usage_path) {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(Error::StoreIo {
                        path: usage_path,
                        source,
                    });
                }
            }
        } else {
            let mut usage = String::new();
            _ = writeln!(usage, "{USAGE_HEADER}");
            for sample in record.samples() {
                _ = writeln!(usage, "{},{}", sample.cpu_percent(), sample.resident_bytes());
            }
            self.write_atomic(&usage_path, &usage)?;
        }

        debug!(
            variant = config.variant(),
            readers = config.readers(),
            writers = config.writers(),
            "stored run record"
        );

        Ok(())
    }

    /// Loads the record stored under the given key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRecord`] when no record exists for the key,
    /// [`Error::RecordFormat`] when a file exists but cannot be interpreted and
    /// [`Error::StoreIo`] on other filesystem failures.
    pub fn get(&self, variant: &str, readers: u32, writers: u32) -> Result<RunRecord> {
        let path = self.record_path(variant, readers, writers);

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(Error::MissingRecord {
                    variant: variant.to_string(),
                    readers,
                    writers,
                });
            }
            Err(source) => return Err(Error::StoreIo { path, source }),
        };

        let (total_reads, total_writes, exit) = parse_record_file(&path, &text, variant)?;
        let samples = self.load_samples(variant, readers, writers)?;

        Ok(RunRecord::new(total_reads, total_writes, exit, samples))
    }

    /// Loads every stored record whose key satisfies the predicate.
    ///
    /// Results are ordered by file name for determinism.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreIo`] if the directory cannot be read and propagates any error
    /// from loading an individual matching record.
    pub fn list(&self, predicate: impl Fn(&str, u32, u32) -> bool) -> Result<Vec<StoredRun>> {
        let entries = fs::read_dir(&self.dir).map_err(|source| Error::StoreIo {
            path: self.dir.clone(),
            source,
        })?;

        let mut names: Vec<String> = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|source| Error::StoreIo {
                path: self.dir.clone(),
                source,
            })?;

            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        names.sort();

        let mut results = Vec::new();

        for name in names {
            let Some((variant, readers, writers)) = parse_record_file_name(&name) else {
                continue;
            };

            if !predicate(&variant, readers, writers) {
                continue;
            }

            let record = self.get(&variant, readers, writers)?;
            results.push(StoredRun {
                variant,
                readers,
                writers,
                record,
            });
        }

        Ok(results)
    }

    fn record_path(&self, variant: &str, readers: u32, writers: u32) -> PathBuf {
        self.dir
            .join(format!("results_{variant}_{readers}_{writers}.csv"))
    }

    fn usage_path(&self, variant: &str, readers: u32, writers: u32) -> PathBuf {
        self.dir
            .join(format!("usage_{variant}_{readers}_{writers}.csv"))
    }

    fn load_samples(
        &self,
        variant: &str,
        readers: u32,
        writers: u32,
    ) -> Result<Vec<ResourceSample>> {
        let path = self.usage_path(variant, readers, writers);

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            // No usage file simply means no trace was collected.
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(Error::StoreIo { path, source }),
        };

        let mut lines = text.lines();

        if lines.next() != Some(USAGE_HEADER) {
            return Err(Error::RecordFormat {
                path,
                problem: format!("expected header '{USAGE_HEADER}'"),
            });
        }

        let mut samples = Vec::new();

        for line in lines {
            if line.is_empty() {
                continue;
            }

            let Some((cpu, rss)) = line.split_once(',') else {
                return Err(Error::RecordFormat {
                    path,
                    problem: format!("expected two comma-separated fields, got '{line}'"),
                });
            };

            let cpu_percent: f64 = cpu.parse().map_err(|_ignored| Error::RecordFormat {
                path: path.clone(),
                problem: format!("'{cpu}' is not a valid CPU percentage"),
            })?;

            let resident_bytes: u64 = rss.parse().map_err(|_ignored| Error::RecordFormat {
                path: path.clone(),
                problem: format!("'{rss}' is not a valid byte count"),
            })?;

            samples.push(ResourceSample::new(cpu_percent, resident_bytes));
        }

        Ok(samples)
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> Result<()> {
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        fs::write(&temp, contents).map_err(|source| Error::StoreIo {
            path: temp.clone(),
            source,
        })?;

        fs::rename(&temp, path).map_err(|source| Error::StoreIo {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn parse_record_file(
    path: &Path,
    text: &str,
    expected_variant: &str,
) -> Result<(u64, u64, ExitDisposition)> {
    let format_error = |problem: String| Error::RecordFormat {
        path: path.to_path_buf(),
        problem,
    };

    let mut lines = text.lines();

    if lines.next() != Some(RECORD_HEADER) {
        return Err(format_error(format!("expected header '{RECORD_HEADER}'")));
    }

    let row = lines
        .next()
        .ok_or_else(|| format_error("missing data row".to_string()))?;

    if lines.any(|line| !line.is_empty()) {
        return Err(format_error("expected exactly one data row".to_string()));
    }

    let fields: Vec<&str> = row.split(',').collect();

    let [variant, _readers, _writers, total_reads, total_writes, exit_status] = fields[..] else {
        return Err(format_error(format!(
            "expected 6 comma-separated fields, got {}",
            fields.len()
        )));
    };

    if variant != expected_variant {
        return Err(format_error(format!(
            "record is for variant '{variant}', expected '{expected_variant}'"
        )));
    }

    let total_reads: u64 = total_reads
        .parse()
        .map_err(|_ignored| format_error(format!("'{total_reads}' is not a valid read total")))?;

    let total_writes: u64 = total_writes
        .parse()
        .map_err(|_ignored| format_error(format!("'{total_writes}' is not a valid write total")))?;

    let exit = if exit_status == "aborted" {
        ExitDisposition::Aborted
    } else {
        ExitDisposition::Completed(exit_status.parse().map_err(|_ignored| {
            format_error(format!("'{exit_status}' is not a valid exit status"))
        })?)
    };

    Ok((total_reads, total_writes, exit))
}

/// Recovers the (variant, readers, writers) key from a record file name, if it is one.
fn parse_record_file_name(name: &str) -> Option<(String, u32, u32)> {
    let stem = name.strip_prefix("results_")?.strip_suffix(".csv")?;

    let mut parts = stem.rsplitn(3, '_');
    let writers: u32 = parts.next()?.parse().ok()?;
    let readers: u32 = parts.next()?.parse().ok()?;
    let variant = parts.next()?;

    Some((variant.to_string(), readers, writers))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::CpuSet;

    fn test_configuration(variant: &str, readers: u32, writers: u32) -> Configuration {
        Configuration::new(variant, readers, writers, CpuSet::parse("0-3").unwrap())
    }

    #[test]
    fn round_trips_a_full_record() {
        let temp = tempfile::tempdir().unwrap();
        let store = RunStore::new(temp.path()).unwrap();

        let config = test_configuration("qsbr", 4, 2);
        let record = RunRecord::new(
            123_456,
            789,
            ExitDisposition::Completed(0),
            vec![
                ResourceSample::new(98.5, 4096),
                ResourceSample::new(100.0, 8192),
            ],
        );

        store.put(&config, &record).unwrap();

        let loaded = store.get("qsbr", 4, 2).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn round_trips_without_samples() {
        let temp = tempfile::tempdir().unwrap();
        let store = RunStore::new(temp.path()).unwrap();

        let config = test_configuration("signal", 1, 1);
        let record = RunRecord::new(10, 20, ExitDisposition::Completed(1), Vec::new());

        store.put(&config, &record).unwrap();

        let loaded = store.get("signal", 1, 1).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn round_trips_aborted_disposition() {
        let temp = tempfile::tempdir().unwrap();
        let store = RunStore::new(temp.path()).unwrap();

        let config = test_configuration("slotpair", 2, 1);
        let record = RunRecord::new(5, 0, ExitDisposition::Aborted, Vec::new());

        store.put(&config, &record).unwrap();

        assert_eq!(
            store.get("slotpair", 2, 1).unwrap().exit(),
            ExitDisposition::Aborted
        );
    }

    #[test]
    fn rerun_overwrites_wholesale() {
        let temp = tempfile::tempdir().unwrap();
        let store = RunStore::new(temp.path()).unwrap();

        let config = test_configuration("qsbr", 1, 1);

        let first = RunRecord::new(
            1,
            1,
            ExitDisposition::Completed(0),
            vec![ResourceSample::new(50.0, 1024)],
        );
        store.put(&config, &first).unwrap();

        // Second run collected no samples; the stale trace must not survive.
        let second = RunRecord::new(2, 2, ExitDisposition::Completed(0), Vec::new());
        store.put(&config, &second).unwrap();

        assert_eq!(store.get("qsbr", 1, 1).unwrap(), second);
    }

    #[test]
    fn relative_store_directory_is_resolved_to_absolute() {
        let store = RunStore::new("relative_store_dir_for_test").unwrap();

        assert!(store.dir().is_absolute());
        assert!(store.dir().ends_with("relative_store_dir_for_test"));

        fs::remove_dir_all(store.dir()).unwrap();
    }

    #[test]
    fn absent_record_is_missing_record() {
        let temp = tempfile::tempdir().unwrap();
        let store = RunStore::new(temp.path()).unwrap();

        let result = store.get("qsbr", 9, 9);

        assert!(matches!(
            result,
            Err(Error::MissingRecord {
                readers: 9,
                writers: 9,
                ..
            })
        ));
    }

    #[test]
    fn list_filters_by_key() {
        let temp = tempfile::tempdir().unwrap();
        let store = RunStore::new(temp.path()).unwrap();

        let record = RunRecord::new(1, 1, ExitDisposition::Completed(0), Vec::new());
        store
            .put(&test_configuration("qsbr", 1, 1), &record)
            .unwrap();
        store
            .put(&test_configuration("qsbr", 2, 1), &record)
            .unwrap();
        store
            .put(&test_configuration("signal", 1, 1), &record)
            .unwrap();

        let qsbr_only = store.list(|variant, _, _| variant == "qsbr").unwrap();
        assert_eq!(qsbr_only.len(), 2);
        assert!(qsbr_only.iter().all(|run| run.variant() == "qsbr"));
    }

    #[test]
    fn variant_ids_with_underscores_survive_the_file_name() {
        let temp = tempfile::tempdir().unwrap();
        let store = RunStore::new(temp.path()).unwrap();

        let record = RunRecord::new(3, 4, ExitDisposition::Completed(0), Vec::new());
        store
            .put(&test_configuration("my_variant", 2, 1), &record)
            .unwrap();

        let runs = store.list(|_, _, _| true).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].variant(), "my_variant");
        assert_eq!(runs[0].readers(), 2);
        assert_eq!(runs[0].writers(), 1);
    }

    #[test]
    fn tampered_record_is_a_format_error() {
        let temp = tempfile::tempdir().unwrap();
        let store = RunStore::new(temp.path()).unwrap();

        fs::write(
            temp.path().join("results_qsbr_1_1.csv"),
            "not,a,record\n1,2,3\n",
        )
        .unwrap();

        assert!(matches!(
            store.get("qsbr", 1, 1),
            Err(Error::RecordFormat { .. })
        ));
    }
}
