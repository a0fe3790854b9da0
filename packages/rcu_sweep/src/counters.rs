use std::collections::BTreeMap;
use std::str::FromStr;

/// How per-thread completion counts are combined into sweep totals.
///
/// The benchmarked executables print one completion line per thread. Under high contention,
/// slow-finishing threads sometimes never print theirs, so the two count lists can have
/// different lengths.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum CountPolicy {
    /// Sum every matched count; threads without a completion line contribute zero.
    ///
    /// This is the default. A reader/writer line count mismatch is tolerated rather than
    /// treated as a failed run.
    #[default]
    SumAll,

    /// Truncate the reader and writer count lists to the shorter of the two before summing.
    ///
    /// Mirrors the behavior of the verification-style harness, which paired counts up
    /// line by line.
    TruncatePairwise,
}

impl FromStr for CountPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sum" => Ok(Self::SumAll),
            "truncate" => Ok(Self::TruncatePairwise),
            _ => Err(format!(
                "invalid count policy: '{s}'. Valid options are: sum, truncate"
            )),
        }
    }
}

/// Total read and write operation counts extracted from one program's output.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ThroughputCounters {
    total_reads: u64,
    total_writes: u64,
}

impl ThroughputCounters {
    /// Creates counters from known totals.
    #[must_use]
    pub fn new(total_reads: u64, total_writes: u64) -> Self {
        Self {
            total_reads,
            total_writes,
        }
    }

    /// Sum of all reader thread completion counts.
    #[must_use]
    pub fn total_reads(&self) -> u64 {
        self.total_reads
    }

    /// Sum of all writer thread completion counts.
    #[must_use]
    pub fn total_writes(&self) -> u64 {
        self.total_writes
    }
}

/// Extracts throughput counters from the standard output of a benchmarked executable.
///
/// Matches lines of the exact shapes `Reader <id> read <n> times` and
/// `Writer <id> wrote <n> times`. Anything else is ignored, and zero matches is a valid
/// result: totals of zero, never an error. Duplicate thread IDs are summed like any other
/// occurrence.
#[must_use]
pub fn parse_throughput(text: &str, policy: CountPolicy) -> ThroughputCounters {
    let mut read_counts = Vec::new();
    let mut write_counts = Vec::new();

    for line in text.lines() {
        if let Some(count) = match_completion_line(line, "Reader", "read") {
            read_counts.push(count);
        } else if let Some(count) = match_completion_line(line, "Writer", "wrote") {
            write_counts.push(count);
        }
    }

    if policy == CountPolicy::TruncatePairwise {
        let shorter = read_counts.len().min(write_counts.len());
        read_counts.truncate(shorter);
        write_counts.truncate(shorter);
    }

    ThroughputCounters {
        total_reads: read_counts.iter().sum(),
        total_writes: write_counts.iter().sum(),
    }
}

/// Matches `<role> <id> <verb> <n> times` against a single line, returning `n`.
fn match_completion_line(line: &str, role: &str, verb: &str) -> Option<u64> {
    let mut tokens = line.split_whitespace();

    if tokens.next()? != role {
        return None;
    }

    // The thread ID itself is not interesting, but it must be numeric for the line to count.
    tokens.next()?.parse::<u64>().ok()?;

    if tokens.next()? != verb {
        return None;
    }

    let count = tokens.next()?.parse::<u64>().ok()?;

    if tokens.next()? != "times" {
        return None;
    }

    Some(count)
}

/// The hardware counter labels collected by default when profiling is enabled, matching the
/// event set the comparison charts are built from.
#[must_use]
pub fn profile_metrics_default() -> Vec<&'static str> {
    vec![
        "cycles",
        "instructions",
        "context-switches",
        "cpu-migrations",
        "cache-references",
        "cache-misses",
        "L1-dcache-stores",
        "L1-dcache-loads",
        "L1-dcache-store-misses",
        "L1-dcache-load-misses",
        "LLC-load-misses",
        "LLC-store-misses",
    ]
}

/// Extracts named hardware counters from profiler output text.
///
/// Every requested metric is present in the result, starting at zero. For each line that
/// contains a metric's label, the first integer on the line (thousands separators allowed)
/// is added to that metric's total. Summing across multiple matching lines is intentional:
/// per-CPU breakdown output accumulates into one figure per metric.
#[must_use]
pub fn parse_profile(text: &str, metrics: &[&str]) -> BTreeMap<String, u64> {
    let mut totals: BTreeMap<String, u64> = metrics
        .iter()
        .map(|metric| ((*metric).to_string(), 0))
        .collect();

    for line in text.lines() {
        for metric in metrics {
            if !line.contains(metric) {
                continue;
            }

            if let Some(value) = first_integer(line) {
                if let Some(total) = totals.get_mut(*metric) {
                    *total = total.saturating_add(value);
                }
            }
        }
    }

    totals
}

/// Finds the first run of digits on a line, allowing embedded comma separators (`1,234,567`).
fn first_integer(line: &str) -> Option<u64> {
    let start = line.find(|c: char| c.is_ascii_digit())?;

    let digits: String = line
        .get(start..)?
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();

    digits.parse().ok()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    const TYPICAL_OUTPUT: &str = "\
Will use 2 reader threads and 1 writer threads
Reader 0 read 1000 times
Reader 1 read 500 times
Writer 0 wrote 42 times
";

    #[test]
    fn sums_all_matched_counts() {
        let counters = parse_throughput(TYPICAL_OUTPUT, CountPolicy::SumAll);
        assert_eq!(counters.total_reads(), 1500);
        assert_eq!(counters.total_writes(), 42);
    }

    #[test]
    fn zero_matches_is_not_an_error() {
        let counters = parse_throughput("no counters here at all", CountPolicy::SumAll);
        assert_eq!(counters.total_reads(), 0);
        assert_eq!(counters.total_writes(), 0);
    }

    #[test]
    fn duplicate_thread_ids_are_summed() {
        let text = "Reader 0 read 10 times\nReader 0 read 5 times\n";
        let counters = parse_throughput(text, CountPolicy::SumAll);
        assert_eq!(counters.total_reads(), 15);
    }

    #[test]
    fn parsing_is_idempotent() {
        let first = parse_throughput(TYPICAL_OUTPUT, CountPolicy::SumAll);
        let second = parse_throughput(TYPICAL_OUTPUT, CountPolicy::SumAll);
        assert_eq!(first, second);
    }

    #[test]
    fn near_miss_lines_are_ignored() {
        // Wrong verb, non-numeric ID, missing trailing token.
        let text = "\
Reader 0 wrote 10 times
Reader zero read 10 times
Writer 0 wrote 10
";
        let counters = parse_throughput(text, CountPolicy::SumAll);
        assert_eq!(counters, ThroughputCounters::new(0, 0));
    }

    #[test]
    fn truncating_policy_drops_unpaired_counts() {
        let text = "\
Reader 0 read 100 times
Reader 1 read 200 times
Reader 2 read 400 times
Writer 0 wrote 7 times
";
        let lenient = parse_throughput(text, CountPolicy::SumAll);
        assert_eq!(lenient.total_reads(), 700);
        assert_eq!(lenient.total_writes(), 7);

        let truncated = parse_throughput(text, CountPolicy::TruncatePairwise);
        assert_eq!(truncated.total_reads(), 100);
        assert_eq!(truncated.total_writes(), 7);
    }

    #[test]
    fn count_policy_parses_from_str() {
        assert_eq!("sum".parse::<CountPolicy>().unwrap(), CountPolicy::SumAll);
        assert_eq!(
            "TRUNCATE".parse::<CountPolicy>().unwrap(),
            CountPolicy::TruncatePairwise
        );
        assert!("average".parse::<CountPolicy>().is_err());
    }

    #[test]
    fn profile_metrics_accumulate_across_lines() {
        let text = "\
 1,234      cache-misses              #    1.23% of all cache refs
 4,766      cache-misses
   100      cycles
";
        let totals = parse_profile(text, &["cache-misses", "cycles"]);
        assert_eq!(totals["cache-misses"], 6000);
        assert_eq!(totals["cycles"], 100);
    }

    #[test]
    fn absent_profile_metric_is_zero() {
        let totals = parse_profile("nothing relevant", &["instructions"]);
        assert_eq!(totals["instructions"], 0);
    }

    #[test]
    fn profile_parses_plain_integers() {
        let totals = parse_profile("instructions: 42", &["instructions"]);
        assert_eq!(totals["instructions"], 42);
    }
}
