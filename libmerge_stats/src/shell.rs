use std::path::Path;

use super::cutoff::round_to;
use super::error::ShellError;
use super::orchestrator::JobArtifacts;
use super::waiter::FileWaiter;

const SNR_MIN_FIELDS: usize = 9;

/// Statistics of the outermost (highest resolution) shell of a run.
///
/// Always taken from the last data row of each shell table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShellStats {
    /// Resolution label of the shell as written in the CC* table
    pub label: String,
    pub cc_star: f64,
    pub rsplit: f64,
    pub cc: f64,
    pub snr: f64,
    pub completeness: f64,
    pub multiplicity: f64,
    pub unique_reflections: u64,
    /// Low resolution edge of the shell in Angstrom
    pub max_resolution: f64,
    /// High resolution edge of the shell in Angstrom
    pub min_resolution: f64,
}

/// Outer shell values from the SNR table
#[derive(Debug, Clone, Default, PartialEq)]
struct SnrRow {
    unique_reflections: u64,
    completeness: f64,
    multiplicity: f64,
    snr: f64,
    max_resolution: f64,
    min_resolution: f64,
}

/// Run `read_row` on every line and keep the last row it accepts
fn last_row<T>(
    path: &Path,
    read_row: impl Fn(&[&str]) -> Option<T>,
) -> Result<T, ShellError> {
    let bytes = std::fs::read(path)?;
    let contents = String::from_utf8_lossy(&bytes);
    contents
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            read_row(&fields)
        })
        .last()
        .ok_or_else(|| ShellError::NoDataRows(path.to_path_buf()))
}

fn float_at(fields: &[&str], idx: usize) -> Option<f64> {
    fields
        .get(idx)?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// 1/nm shell edge to Angstrom
fn edge_to_angstrom(fields: &[&str], idx: usize) -> Option<f64> {
    let inverse = float_at(fields, idx)?;
    if inverse == 0.0 {
        return None;
    }
    Some(round_to(10.0 / inverse, 2))
}

fn read_scalar(fields: &[&str]) -> Option<f64> {
    float_at(fields, 1).map(|v| round_to(v, 3))
}

fn read_labelled_scalar(fields: &[&str]) -> Option<(f64, String)> {
    let value = read_scalar(fields)?;
    let label = fields.get(3)?.to_string();
    Some((value, label))
}

fn read_snr_row(fields: &[&str]) -> Option<SnrRow> {
    if fields.len() < SNR_MIN_FIELDS {
        return None;
    }
    let n = fields.len();
    Some(SnrRow {
        unique_reflections: fields[1].parse::<u64>().ok()?,
        completeness: round_to(float_at(fields, 3)?, 3),
        multiplicity: round_to(float_at(fields, 5)?, 3),
        snr: round_to(float_at(fields, 6)?, 3),
        max_resolution: edge_to_angstrom(fields, n - 2)?,
        min_resolution: edge_to_angstrom(fields, n - 1)?,
    })
}

fn await_table(waiter: &FileWaiter, path: &Path) -> Result<(), ShellError> {
    if waiter.wait_for_ready(path, None) {
        Ok(())
    } else {
        Err(ShellError::NotReady(path.to_path_buf()))
    }
}

/// Pull the outer shell out of the CCstar, Rsplit, CC and SNR tables of a run, waiting for
/// each table in turn.
pub fn extract_outer_shell(
    artifacts: &JobArtifacts,
    waiter: &FileWaiter,
) -> Result<ShellStats, ShellError> {
    await_table(waiter, &artifacts.ccstar)?;
    let (cc_star, label) = last_row(&artifacts.ccstar, read_labelled_scalar)?;

    await_table(waiter, &artifacts.rsplit)?;
    let rsplit = last_row(&artifacts.rsplit, read_scalar)?;

    await_table(waiter, &artifacts.cc)?;
    let cc = last_row(&artifacts.cc, read_scalar)?;

    await_table(waiter, &artifacts.snr)?;
    let snr_row = last_row(&artifacts.snr, read_snr_row)?;

    Ok(ShellStats {
        label,
        cc_star,
        rsplit,
        cc,
        snr: snr_row.snr,
        completeness: snr_row.completeness,
        multiplicity: snr_row.multiplicity,
        unique_reflections: snr_row.unique_reflections,
        max_resolution: snr_row.max_resolution,
        min_resolution: snr_row.min_resolution,
    })
}
