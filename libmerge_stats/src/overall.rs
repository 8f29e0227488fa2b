//! Overall merging statistics from the log of the statistics job.
//!
//! The log is free text written incrementally by the external job. Lines are matched
//! against a table of rules; each rule names the line it recognises, the field it fills
//! and how the value is pulled out of the line. Unknown lines are ignored, so supporting a
//! new log layout means adding rules rather than branches.
use regex::Regex;
use std::path::Path;

use super::cutoff::round_to;
use super::waiter::FileWaiter;

/// The Wilson B-factor line is the last thing the job writes
pub const COMPLETION_MARKER: &str = "B =";
/// Comment recorded on runs whose log never reached the marker
pub const INCOMPLETE_COMMENT: &str =
    "Something odd happened with calculation overall statistics. Did not finish calculating B-factor";

const DECIMALS: i32 = 4;
const DECIMAL_PATTERN: &str = r"-?\d+(?:\.\d+)?";
const INTEGER_PATTERN: &str = r"\d+";

/// Flat record of the overall (all shells) statistics of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverallStats {
    /// Resolution range as written by the job, e.g. "50.00 - 1.70"
    pub resolution_range: Option<String>,
    pub cc_star: Option<f64>,
    pub rsplit: Option<f64>,
    pub cc: Option<f64>,
    pub cc_ano: Option<f64>,
    pub snr: Option<f64>,
    pub completeness: Option<f64>,
    pub multiplicity: Option<f64>,
    pub total_measurements: Option<u64>,
    pub unique_reflections: Option<u64>,
    pub wilson_b: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    ResolutionRange,
    CcStar,
    Rsplit,
    Cc,
    CcAno,
    Snr,
    Completeness,
    Multiplicity,
    TotalMeasurements,
    UniqueReflections,
    WilsonB,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    StartsWith(&'static str),
    Contains(&'static str),
}

impl Predicate {
    pub fn matches(&self, line: &str) -> bool {
        match self {
            Self::StartsWith(prefix) => line.starts_with(prefix),
            Self::Contains(needle) => line.contains(needle),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    /// First number after the '=' (or anywhere if there is none), rounded to 4 decimals.
    /// Trailing values and units are ignored: "0.95, 0.50" and "12.34%" both work.
    Decimal,
    /// First unsigned integer in the line
    Integer,
    /// Text inside the first parentheses, "to" replaced by "-" and units dropped
    ResolutionRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub predicate: Predicate,
    pub field: Field,
    pub extractor: Extractor,
}

const fn rule(predicate: Predicate, field: Field, extractor: Extractor) -> Rule {
    Rule {
        predicate,
        field,
        extractor,
    }
}

/// Rules for the compare_hkl / check_hkl log layout
pub const RULES: [Rule; 11] = [
    rule(Predicate::StartsWith("Overall CC* = "), Field::CcStar, Extractor::Decimal),
    rule(Predicate::StartsWith("Overall Rsplit = "), Field::Rsplit, Extractor::Decimal),
    rule(Predicate::StartsWith("Overall CC = "), Field::Cc, Extractor::Decimal),
    rule(Predicate::StartsWith("Overall CCano = "), Field::CcAno, Extractor::Decimal),
    rule(
        Predicate::StartsWith("Fixed resolution range: "),
        Field::ResolutionRange,
        Extractor::ResolutionRange,
    ),
    rule(
        Predicate::Contains(" measurements in total."),
        Field::TotalMeasurements,
        Extractor::Integer,
    ),
    rule(
        Predicate::Contains(" reflections in total."),
        Field::UniqueReflections,
        Extractor::Integer,
    ),
    rule(Predicate::StartsWith("Overall <snr> ="), Field::Snr, Extractor::Decimal),
    rule(
        Predicate::StartsWith("Overall redundancy ="),
        Field::Multiplicity,
        Extractor::Decimal,
    ),
    rule(
        Predicate::StartsWith("Overall completeness ="),
        Field::Completeness,
        Extractor::Decimal,
    ),
    rule(Predicate::StartsWith(COMPLETION_MARKER), Field::WilsonB, Extractor::Decimal),
];

enum Value {
    Float(f64),
    Count(u64),
    Text(String),
}

/// Compiled number patterns shared by every extractor of a parse
struct NumberPatterns {
    decimal: Regex,
    integer: Regex,
}

impl NumberPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            decimal: Regex::new(DECIMAL_PATTERN)?,
            integer: Regex::new(INTEGER_PATTERN)?,
        })
    }
}

impl Extractor {
    fn extract(&self, line: &str, patterns: &NumberPatterns) -> Option<Value> {
        match self {
            Self::Decimal => {
                let value_text = line.split_once('=').map_or(line, |(_, rest)| rest);
                let value = patterns
                    .decimal
                    .find(value_text)?
                    .as_str()
                    .parse::<f64>()
                    .ok()?;
                Some(Value::Float(round_to(value, DECIMALS)))
            }
            Self::Integer => patterns
                .integer
                .find(line)?
                .as_str()
                .parse::<u64>()
                .ok()
                .map(Value::Count),
            Self::ResolutionRange => {
                let open = line.find('(')?;
                let close = open + line[open..].find(')')?;
                let range = line[open + 1..close]
                    .replace("to", "-")
                    .replace("Angstroms", "");
                Some(Value::Text(range.trim().to_string()))
            }
        }
    }
}

impl OverallStats {
    fn apply(&mut self, field: Field, value: Value) {
        match (field, value) {
            (Field::ResolutionRange, Value::Text(t)) => self.resolution_range = Some(t),
            (Field::CcStar, Value::Float(v)) => self.cc_star = Some(v),
            (Field::Rsplit, Value::Float(v)) => self.rsplit = Some(v),
            (Field::Cc, Value::Float(v)) => self.cc = Some(v),
            (Field::CcAno, Value::Float(v)) => self.cc_ano = Some(v),
            (Field::Snr, Value::Float(v)) => self.snr = Some(v),
            (Field::Completeness, Value::Float(v)) => self.completeness = Some(v),
            (Field::Multiplicity, Value::Float(v)) => self.multiplicity = Some(v),
            (Field::TotalMeasurements, Value::Count(v)) => self.total_measurements = Some(v),
            (Field::UniqueReflections, Value::Count(v)) => self.unique_reflections = Some(v),
            (Field::WilsonB, Value::Float(v)) => self.wilson_b = Some(v),
            (field, _) => log::debug!("Extractor produced the wrong kind of value for {field:?}"),
        }
    }
}

/// Parse log text with the given rule table. Every matching rule fires for every line.
pub fn parse_with_rules(text: &str, rules: &[Rule]) -> OverallStats {
    let mut stats = OverallStats::default();
    let patterns = match NumberPatterns::new() {
        Ok(patterns) => patterns,
        Err(e) => {
            log::error!("{e}");
            return stats;
        }
    };
    for line in text.lines() {
        for rule in rules.iter().filter(|r| r.predicate.matches(line)) {
            if let Some(value) = rule.extractor.extract(line, &patterns) {
                stats.apply(rule.field, value);
            }
        }
    }
    stats
}

/// Parse log text with the standard [RULES]
pub fn parse_overall_text(text: &str) -> OverallStats {
    parse_with_rules(text, &RULES)
}

/// Overall statistics plus whether the log was complete when it was read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverallReport {
    pub stats: OverallStats,
    pub complete: bool,
}

/// Wait for the completion marker, then parse whatever the log holds.
///
/// A log that never reaches the marker is still parsed on a best-effort basis; the report
/// is flagged incomplete. A log that does not exist at all gives empty statistics.
pub fn parse_overall_statistics(log_path: &Path, waiter: &FileWaiter) -> OverallReport {
    let complete = waiter.wait_for_ready(log_path, Some(COMPLETION_MARKER));
    if !complete {
        log::warn!(
            "{} never reported the Wilson B-factor; parsing what is there",
            log_path.display()
        );
    }
    let stats = match std::fs::read(log_path) {
        Ok(bytes) => parse_overall_text(&String::from_utf8_lossy(&bytes)),
        Err(e) => {
            log::warn!("Could not read {}: {e}", log_path.display());
            OverallStats::default()
        }
    };
    OverallReport { stats, complete }
}
