//! Resolution cut-off estimates derived from figure-of-merit curves.
//!
//! Two estimates are produced for every run: the resolution at which a single curve falls
//! through a fixed threshold (SNR = 1, CC1/2 = 0.3), and the resolution at which the CC*
//! curve (in percent) and the Rsplit curve cross. "Not found" is an ordinary outcome for
//! both and is never an error.
use std::path::Path;

use super::error::FomTableError;
use super::fom_table::{ColumnSpec, FomCurve};

/// Value reported in place of an intersection that could not be located
pub const UNAVAILABLE_SENTINEL: f64 = -1000.0;
/// Fixed conservative correction applied to the solved CC*/Rsplit crossing
pub const INTERSECTION_CORRECTION: f64 = 0.98;
/// CC1/2 threshold used for the CC cut-off estimate
pub const CC_THRESHOLD: f64 = 0.3;
/// SNR threshold used for the SNR cut-off estimate
pub const SNR_THRESHOLD: f64 = 1.0;
/// Resolution contributed by a missing table when picking a fallback cut-off
pub const MISSING_TABLE_RESOLUTION: f64 = 10.0;

pub const RESOLUTION_COLUMN: &str = "d";
pub const CCSTAR_COLUMN: &str = "CC*";
pub const RSPLIT_COLUMN: &str = "Rsplit/%";

/// Column layout of the CC1/2 shell table
pub const CC_COLUMNS: ColumnSpec = ColumnSpec::Positional {
    x: 3,
    y: 1,
    min_fields: 5,
};
/// Column layout of the SNR shell table
pub const SNR_COLUMNS: ColumnSpec = ColumnSpec::Positional {
    x: 8,
    y: 6,
    min_fields: 9,
};

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Outcome of the CC*/Rsplit crossing search
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intersection {
    Found(f64),
    Unavailable,
}

impl Intersection {
    /// The resolution, or [UNAVAILABLE_SENTINEL]
    pub fn value(&self) -> f64 {
        match self {
            Self::Found(d) => *d,
            Self::Unavailable => UNAVAILABLE_SENTINEL,
        }
    }

    pub fn found(&self) -> Option<f64> {
        match self {
            Self::Found(d) => Some(*d),
            Self::Unavailable => None,
        }
    }
}

/// Keep the strictly decreasing run of values starting from the first point.
///
/// A point is accepted only if its value is below the last accepted value, so noise
/// reversals are dropped instead of breaking the bracket search.
pub fn monotonic_decreasing(curve: &FomCurve) -> FomCurve {
    let mut kept: Vec<(f64, f64)> = Vec::with_capacity(curve.len());
    for &(x, y) in curve.points() {
        match kept.last() {
            Some(&(_, last)) if y >= last || y.is_nan() => continue,
            _ => kept.push((x, y)),
        }
    }
    FomCurve::new(kept)
}

/// Resolution at which a decreasing curve crosses `target`, linearly interpolated between
/// the bracketing points and rounded to 3 decimals. None if the target is never bracketed.
pub fn resolution_at_threshold(curve: &FomCurve, target: f64) -> Option<f64> {
    let filtered = monotonic_decreasing(curve);
    let points = filtered.points();
    for (idx, &(x1, y1)) in points.iter().enumerate() {
        if y1 == target {
            return Some(x1);
        }
        let Some(&(x2, y2)) = points.get(idx + 1) else {
            break;
        };
        if y1 > target && target > y2 {
            return Some(round_to(x1 + (x2 - x1) * (target - y1) / (y2 - y1), 3));
        }
    }
    None
}

/// Fit `value = k * x + b` through two points; slope and intercept rounded to 3 decimals
fn line_through(p1: (f64, f64), p2: (f64, f64)) -> (f64, f64) {
    let (x1, y1) = p1;
    let (x2, y2) = p2;
    let k = round_to((y2 - y1) / (x2 - x1), 3);
    let b = round_to((y1 * x2 - y2 * x1) / (x2 - x1), 3);
    (k, b)
}

/// Resolution at which `curve_b` first rises above `curve_a`.
///
/// `curve_a` must already be scaled to percent (CC* x 100) and `curve_b` is the Rsplit
/// curve. Points are paired by index. The crossing is solved between the last pair where
/// `b <= a` held and the first pair where it failed, then multiplied by
/// [INTERSECTION_CORRECTION].
pub fn intersection(curve_a: &FomCurve, curve_b: &FomCurve) -> Intersection {
    let a = curve_a.points();
    let b = curve_b.points();
    let n = a.len().min(b.len());
    if n == 0 {
        return Intersection::Unavailable;
    }

    // (d, value) of the last held pair and of the first failing pair
    let (mut a1, mut b1) = ((0.0, 0.0), (0.0, 0.0));
    let (mut a2, mut b2) = (a[0], (a[0].0, b[0].1));
    let mut idx = 0;
    while idx < n && b[idx].1 <= a[idx].1 {
        a1 = a2;
        b1 = b2;
        idx += 1;
        if idx >= n {
            return Intersection::Unavailable;
        }
        a2 = a[idx];
        b2 = (a[idx].0, b[idx].1);
        if b[idx].1 == a[idx].1 {
            return Intersection::Found(a[idx].0);
        }
    }

    if a2.0 == a1.0 {
        return Intersection::Unavailable;
    }
    let (k_a, b_a) = line_through(a1, a2);
    let (k_b, b_b) = line_through(b1, b2);
    if k_a == k_b {
        return Intersection::Unavailable;
    }
    let crossing = round_to(INTERSECTION_CORRECTION * (b_b - b_a) / (k_a - k_b), 3);
    if crossing.is_finite() {
        Intersection::Found(crossing)
    } else {
        Intersection::Unavailable
    }
}

/// Resolution at SNR = 1 from an SNR shell table
pub fn resolution_at_snr_one(snr_table: &Path) -> Result<Option<f64>, FomTableError> {
    let curve = FomCurve::from_file(snr_table, &SNR_COLUMNS)?;
    Ok(resolution_at_threshold(&curve, SNR_THRESHOLD))
}

/// Resolution at CC1/2 = `target` from a CC shell table
pub fn resolution_at_cc_threshold(
    cc_table: &Path,
    target: f64,
) -> Result<Option<f64>, FomTableError> {
    let curve = FomCurve::from_file(cc_table, &CC_COLUMNS)?;
    Ok(resolution_at_threshold(&curve, target))
}

/// Crossing of the CC* and Rsplit shell tables
pub fn ccstar_rsplit_intersection(
    ccstar_table: &Path,
    rsplit_table: &Path,
) -> Result<Intersection, FomTableError> {
    let ccstar = FomCurve::from_file(
        ccstar_table,
        &ColumnSpec::named(RESOLUTION_COLUMN, CCSTAR_COLUMN),
    )?;
    let rsplit = FomCurve::from_file(
        rsplit_table,
        &ColumnSpec::named(RESOLUTION_COLUMN, RSPLIT_COLUMN),
    )?;
    Ok(intersection(&ccstar.scaled(100.0), &rsplit))
}

/// Cut-off to submit when no refinement result is available.
///
/// The largest of `floor` and the SNR/CC estimates from earlier shell tables. A table that
/// does not exist yet counts as [MISSING_TABLE_RESOLUTION]; an estimate that was not found
/// is ignored.
pub fn fallback_cutoff(snr_table: &Path, cc_table: &Path, floor: f64) -> f64 {
    let snr = if snr_table.exists() {
        resolution_at_snr_one(snr_table).ok().flatten()
    } else {
        Some(MISSING_TABLE_RESOLUTION)
    };
    let cc = if cc_table.exists() {
        resolution_at_cc_threshold(cc_table, CC_THRESHOLD)
            .ok()
            .flatten()
    } else {
        Some(MISSING_TABLE_RESOLUTION)
    };
    [snr, cc].into_iter().flatten().fold(floor, f64::max)
}
