use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use derive_more::Display;
use itertools::Itertools;
use tracing::info;

use crate::counters::parse_profile;
use crate::record::RunRecord;
use crate::{Error, Result, RunStore, SweepSpec, VariantRegistry};

/// A built-in metric that comparison datasets can be produced for.
///
/// Named profiling counters are handled separately via [`SweepData::profile_series`] because
/// their set is configuration-dependent.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[non_exhaustive]
pub enum Metric {
    /// Sum of read operations across all reader threads.
    #[display("total_reads")]
    TotalReads,

    /// Sum of write operations across all writer threads.
    #[display("total_writes")]
    TotalWrites,
}

impl Metric {
    /// Both built-in metrics.
    pub const ALL: [Self; 2] = [Self::TotalReads, Self::TotalWrites];

    fn extract(self, record: &RunRecord) -> u64 {
        match self {
            Self::TotalReads => record.total_reads(),
            Self::TotalWrites => record.total_writes(),
        }
    }

    /// The file name the dataset for this metric is written to.
    #[must_use]
    pub fn dataset_file_name(self) -> String {
        format!("dataset_{self}.csv")
    }
}

/// One variant's curve in a comparison dataset: metric values ordered by the sweep parameter
/// (reader count).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Series {
    variant: String,
    points: Vec<(u32, u64)>,
}

impl Series {
    /// Identifier of the variant this series belongs to.
    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// The (reader count, metric value) points, ordered by ascending reader count.
    #[must_use]
    pub fn points(&self) -> &[(u32, u64)] {
        &self.points
    }
}

/// One loaded sweep row: the record of one (variant, reader count) point.
#[derive(Debug)]
struct SweepRow {
    variant: String,
    readers: u32,
    record: RunRecord,
}

/// A complete, validated sweep loaded from the store, ready to be turned into comparison
/// datasets for the external charting layer.
///
/// Completeness is established at load time; see [`load_sweep`].
#[derive(Debug)]
pub struct SweepData {
    rows: Vec<SweepRow>,
    writers: u32,
}

/// Loads every record the sweep requires, failing fast on the first gap.
///
/// Variants are ordered by the registry's declared order regardless of the order the sweep
/// specification (or the store's directory listing) presents them in, so downstream chart
/// layout is reproducible. Reader counts are ordered ascending.
///
/// # Errors
///
/// Returns [`Error::UnknownVariant`] if the sweep names a variant the registry does not know
/// and [`Error::MissingRecord`] naming the exact configuration of the first absent record; a
/// sweep report must be complete or explicitly partial, never silently gappy.
pub fn load_sweep(
    store: &RunStore,
    registry: &VariantRegistry,
    spec: &SweepSpec,
) -> Result<SweepData> {
    let mut variant_ids = Vec::with_capacity(spec.variants().len());

    for id in spec.variants() {
        let position = registry
            .position(id)
            .ok_or_else(|| Error::UnknownVariant { id: id.clone() })?;
        variant_ids.push((position, id.clone()));
    }

    variant_ids.sort_unstable_by_key(|(position, _)| *position);

    let reader_counts: Vec<u32> = spec
        .reader_counts()
        .iter()
        .copied()
        .sorted_unstable()
        .dedup()
        .collect();

    let mut rows = Vec::new();

    for (_, variant) in &variant_ids {
        for &readers in &reader_counts {
            let record = store.get(variant, readers, spec.writers())?;
            rows.push(SweepRow {
                variant: variant.clone(),
                readers,
                record,
            });
        }
    }

    info!(row_count = rows.len(), "sweep loaded and complete");

    Ok(SweepData {
        rows,
        writers: spec.writers(),
    })
}

impl SweepData {
    /// The dataset for one built-in metric: one series per variant, in registry order.
    #[must_use]
    pub fn series(&self, metric: Metric) -> Vec<Series> {
        self.series_by(|row| metric.extract(&row.record))
    }

    /// The dataset for one named profiling counter, read from the profiler output files
    /// stored alongside the run records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingProfile`] naming the first configuration whose profiler
    /// output is absent, and [`Error::StoreIo`] on other read failures.
    pub fn profile_series(&self, store: &RunStore, metric: &str) -> Result<Vec<Series>> {
        let mut values = Vec::with_capacity(self.rows.len());

        for row in &self.rows {
            let path = store.dir().join(format!(
                "perf_{}_{}_{}.txt",
                row.variant, row.readers, self.writers
            ));

            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    return Err(Error::MissingProfile {
                        variant: row.variant.clone(),
                        readers: row.readers,
                        writers: self.writers,
                    });
                }
                Err(source) => return Err(Error::StoreIo { path, source }),
            };

            let totals = parse_profile(&text, &[metric]);
            values.push(totals.get(metric).copied().unwrap_or_default());
        }

        let mut values = values.into_iter();
        Ok(self.series_by(move |_| {
            values
                .next()
                .expect("one value was computed per row just above")
        }))
    }

    /// Writes the built-in metric datasets into the given directory as CSV files consumable
    /// by the charting layer (`variant,num_readers,value` rows).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreIo`] if a dataset file cannot be written.
    pub fn write_datasets(&self, dir: &Path) -> Result<()> {
        for metric in Metric::ALL {
            write_series_csv(&dir.join(metric.dataset_file_name()), &self.series(metric))?;
        }

        Ok(())
    }

    /// Writes the dataset for one named profiling counter as
    /// `dataset_<metric>.csv` in the given directory.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::MissingProfile`] from [`Self::profile_series`] and returns
    /// [`Error::StoreIo`] if the file cannot be written.
    pub fn write_profile_dataset(
        &self,
        store: &RunStore,
        dir: &Path,
        metric: &str,
    ) -> Result<()> {
        let series = self.profile_series(store, metric)?;
        write_series_csv(&dir.join(format!("dataset_{metric}.csv")), &series)
    }

    fn series_by(&self, mut value: impl FnMut(&SweepRow) -> u64) -> Vec<Series> {
        let mut result: Vec<Series> = Vec::new();

        // Rows are already ordered variant-major with ascending reader counts.
        for row in &self.rows {
            let point = (row.readers, value(row));

            match result.last_mut() {
                Some(series) if series.variant == row.variant => series.points.push(point),
                _ => result.push(Series {
                    variant: row.variant.clone(),
                    points: vec![point],
                }),
            }
        }

        result
    }
}

fn write_series_csv(path: &Path, series: &[Series]) -> Result<()> {
    let mut contents = String::from("variant,num_readers,value\n");

    for curve in series {
        for &(readers, value) in curve.points() {
            _ = writeln!(contents, "{},{readers},{value}", curve.variant());
        }
    }

    fs::write(path, contents).map_err(|source| Error::StoreIo {
        path: path.to_path_buf(),
        source,
    })
}
