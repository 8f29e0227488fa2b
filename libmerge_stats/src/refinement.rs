//! Results of a structure refinement (Phenix) run against a dataset.
//!
//! Two layouts are understood: the refined PDB written by current versions, whose
//! `REMARK   3` records carry the R-factors and resolution limits, and the log of older
//! versions. Each layout is a table of rules so a new layout is new data.
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::cutoff::round_to;
use super::error::RefinementError;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RefinementSummary {
    pub r_work: Option<f64>,
    pub r_free: Option<f64>,
    pub resolution_high: Option<f64>,
    pub resolution_low: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    RWork,
    RFree,
    ResolutionHigh,
    ResolutionLow,
    /// Both limits in one capture pair; the smaller is the high resolution limit
    ResolutionRange,
}

/// `REMARK   3` records of a refined PDB, keyed by the text before the colon
const PDB_RULES: [(&str, Target); 4] = [
    ("RESOLUTION RANGE HIGH (ANGSTROMS)", Target::ResolutionHigh),
    ("RESOLUTION RANGE LOW  (ANGSTROMS)", Target::ResolutionLow),
    ("R VALUE            (WORKING SET)", Target::RWork),
    ("FREE R VALUE", Target::RFree),
];

/// Legacy log lines; each capture group feeds the targets in order
const LOG_RULES: [(&str, &[Target]); 2] = [
    (
        r"Final R-work = ([\d.+-]+), R-free = ([\d.+-]+)",
        &[Target::RWork, Target::RFree],
    ),
    (
        r"Resolution range: ([\d.+-]+) ([\d.+-]+)",
        &[Target::ResolutionRange],
    ),
];

impl RefinementSummary {
    fn set(&mut self, target: Target, values: &[f64]) {
        match (target, values) {
            (Target::RWork, [v, ..]) => self.r_work = Some(*v),
            (Target::RFree, [v, ..]) => self.r_free = Some(*v),
            (Target::ResolutionHigh, [v, ..]) => self.resolution_high = Some(*v),
            (Target::ResolutionLow, [v, ..]) => self.resolution_low = Some(*v),
            (Target::ResolutionRange, [a, b, ..]) => {
                self.resolution_high = Some(round_to(a.min(*b), 3));
                self.resolution_low = Some(round_to(a.max(*b), 3));
            }
            _ => (),
        }
    }

    fn from_pdb_text(text: &str) -> Self {
        let mut summary = Self::default();
        for line in text.lines() {
            let Some(record) = line.strip_prefix("REMARK   3") else {
                continue;
            };
            let Some((key, value)) = record.split_once(':') else {
                continue;
            };
            let Some((_, target)) = PDB_RULES.iter().find(|(label, _)| key.trim() == *label)
            else {
                continue;
            };
            if let Ok(value) = value.trim().parse::<f64>() {
                summary.set(*target, &[value]);
            }
        }
        summary
    }

    fn from_log_text(text: &str) -> Result<Self, RefinementError> {
        let mut summary = Self::default();
        for (pattern, targets) in LOG_RULES {
            let re = Regex::new(pattern)?;
            let Some(caps) = re.captures_iter(text).last() else {
                continue;
            };
            let values: Vec<f64> = caps
                .iter()
                .skip(1)
                .filter_map(|m| m.and_then(|m| m.as_str().parse::<f64>().ok()))
                .collect();
            match targets {
                [Target::ResolutionRange] => summary.set(Target::ResolutionRange, &values),
                _ => {
                    for (target, value) in targets.iter().zip(values.iter()) {
                        summary.set(*target, &[*value]);
                    }
                }
            }
        }
        Ok(summary)
    }

    /// Parse a refined PDB or a refinement log, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self, RefinementError> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        let is_pdb = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdb"));
        let summary = if is_pdb {
            Self::from_pdb_text(&text)
        } else {
            Self::from_log_text(&text)?
        };
        if summary.r_work.is_none() && summary.r_free.is_none() {
            return Err(RefinementError::NoRFactors(path.to_path_buf()));
        }
        Ok(summary)
    }

    /// "Rwork/Rfree" as written to the output table
    pub fn r_factors(&self) -> Option<String> {
        match (self.r_work, self.r_free) {
            (Some(work), Some(free)) => Some(format!("{work}/{free}")),
            _ => None,
        }
    }
}

fn newest(pattern: &str) -> Result<Option<PathBuf>, RefinementError> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for path in glob::glob(pattern)?.flatten() {
        let Ok(modified) = path.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        match &newest {
            Some((time, _)) if modified <= *time => (),
            _ => newest = Some((modified, path)),
        }
    }
    Ok(newest.map(|(_, path)| path))
}

/// The most recent refinement output for a dataset stem: a refined PDB if one exists,
/// otherwise a log
pub fn find_refinement(dir: &Path, stem: &str) -> Result<Option<PathBuf>, RefinementError> {
    let base = dir.join(format!("*{stem}*")).join("**");
    if let Some(pdb) = newest(&base.join("*.pdb").to_string_lossy())? {
        return Ok(Some(pdb));
    }
    newest(&base.join("*.log").to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFINED_PDB: &str = "\
REMARK   3  REFINEMENT TARGET : ML
REMARK   3   RESOLUTION RANGE HIGH (ANGSTROMS) : 1.70
REMARK   3   RESOLUTION RANGE LOW  (ANGSTROMS) : 39.55
REMARK   3   R VALUE            (WORKING SET) : 0.1712
REMARK   3   FREE R VALUE                     : 0.2034
REMARK   3   FREE R VALUE TEST SET SIZE   (%) : 5.02
CRYST1   79.100   79.100   38.000  90.00  90.00  90.00 P 43 21 2
";

    const LEGACY_LOG: &str = "\
Resolution range: 39.5512 1.70049
start: r_work = 0.2500 r_free = 0.2700
Final R-work = 0.1801, R-free = 0.2155
";

    #[test]
    fn test_pdb_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lyso_refine_001.pdb");
        std::fs::write(&path, REFINED_PDB).unwrap();
        let summary = RefinementSummary::from_file(&path).unwrap();
        assert_eq!(summary.r_work, Some(0.1712));
        assert_eq!(summary.r_free, Some(0.2034));
        assert_eq!(summary.resolution_high, Some(1.7));
        assert_eq!(summary.resolution_low, Some(39.55));
        assert_eq!(summary.r_factors().as_deref(), Some("0.1712/0.2034"));
    }

    #[test]
    fn test_legacy_log_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lyso_refine_001.log");
        std::fs::write(&path, LEGACY_LOG).unwrap();
        let summary = RefinementSummary::from_file(&path).unwrap();
        assert_eq!(summary.r_work, Some(0.1801));
        assert_eq!(summary.r_free, Some(0.2155));
        assert_eq!(summary.resolution_high, Some(1.7));
        assert_eq!(summary.resolution_low, Some(39.551));
    }

    #[test]
    fn test_no_r_factors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lyso.log");
        std::fs::write(&path, "Resolution range: 39.5 1.7\n").unwrap();
        assert!(matches!(
            RefinementSummary::from_file(&path),
            Err(RefinementError::NoRFactors(_))
        ));
    }

    #[test]
    fn test_find_prefers_pdb() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("phenix_lyso_1").join("refine");
        std::fs::create_dir_all(&run_dir).unwrap();
        std::fs::write(run_dir.join("lyso_refine_001.log"), LEGACY_LOG).unwrap();
        assert_eq!(
            find_refinement(dir.path(), "lyso").unwrap(),
            Some(run_dir.join("lyso_refine_001.log"))
        );
        std::fs::write(run_dir.join("lyso_refine_001.pdb"), REFINED_PDB).unwrap();
        assert_eq!(
            find_refinement(dir.path(), "lyso").unwrap(),
            Some(run_dir.join("lyso_refine_001.pdb"))
        );
        assert_eq!(find_refinement(dir.path(), "thau").unwrap(), None);
    }
}
