use std::path::Path;

use super::error::FomTableError;

/// Annotations that decorate header tokens in the shell files and must go before tokenizing
const HEADER_DECORATIONS: [&str; 6] = ["1/nm", "# ", "centre", "/ A", " dev", "(A)"];

/// How the (x, y) columns of a figure-of-merit table are located
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSpec {
    /// Find the header line containing `y`, then use the positions of `x` and `y` in it.
    /// Only non-negative finite `y` values are kept.
    Named { x: String, y: String },
    /// Skip the first line and read fixed positions. Rows with fewer than `min_fields`
    /// fields are skipped; only non-finite values are rejected.
    Positional {
        x: usize,
        y: usize,
        min_fields: usize,
    },
}

impl ColumnSpec {
    pub fn named(x: &str, y: &str) -> Self {
        Self::Named {
            x: x.to_string(),
            y: y.to_string(),
        }
    }
}

/// An ordered series of (resolution, value) pairs read from one shell file.
///
/// Points keep file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FomCurve {
    points: Vec<(f64, f64)>,
}

impl FomCurve {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self { points }
    }

    /// Read a curve from a file
    pub fn from_file(path: &Path, columns: &ColumnSpec) -> Result<Self, FomTableError> {
        let bytes = std::fs::read(path)?;
        let contents = String::from_utf8_lossy(&bytes);
        match columns {
            ColumnSpec::Named { x, y } => Self::parse_named(path, &contents, x, y),
            ColumnSpec::Positional { x, y, min_fields } => {
                Ok(Self::parse_positional(&contents, *x, *y, *min_fields))
            }
        }
    }

    fn parse_named(
        path: &Path,
        contents: &str,
        x_name: &str,
        y_name: &str,
    ) -> Result<Self, FomTableError> {
        let mut columns: Option<(usize, usize)> = None;
        let mut points = Vec::new();
        for line in contents.lines() {
            if line.contains(y_name) {
                let header = strip_decorations(line);
                let tokens: Vec<&str> = header.split_whitespace().collect();
                let y_idx = tokens.iter().position(|t| *t == y_name).ok_or_else(|| {
                    FomTableError::MissingColumn(path.to_path_buf(), y_name.to_string())
                })?;
                let x_idx = tokens.iter().position(|t| *t == x_name).ok_or_else(|| {
                    FomTableError::MissingColumn(path.to_path_buf(), x_name.to_string())
                })?;
                columns = Some((x_idx, y_idx));
                continue;
            }

            // Anything before the header is not a data row
            let Some((x_idx, y_idx)) = columns else {
                continue;
            };
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (Some(x), Some(y)) = (parse_field(&fields, x_idx), parse_field(&fields, y_idx))
            else {
                continue;
            };
            if x.is_finite() && !y.is_nan() && y >= 0.0 {
                points.push((x, y));
            }
        }

        if columns.is_none() {
            return Err(FomTableError::MissingHeader(
                path.to_path_buf(),
                y_name.to_string(),
            ));
        }
        Ok(Self { points })
    }

    fn parse_positional(contents: &str, x_idx: usize, y_idx: usize, min_fields: usize) -> Self {
        let points = contents
            .lines()
            .skip(1)
            .filter_map(|line| {
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() < min_fields {
                    return None;
                }
                let x = parse_field(&fields, x_idx)?;
                let y = parse_field(&fields, y_idx)?;
                (x.is_finite() && y.is_finite()).then_some((x, y))
            })
            .collect();
        Self { points }
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn x(&self) -> Vec<f64> {
        self.points.iter().map(|(x, _)| *x).collect()
    }

    pub fn y(&self) -> Vec<f64> {
        self.points.iter().map(|(_, y)| *y).collect()
    }

    /// Copy of the curve with every value multiplied by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            points: self.points.iter().map(|(x, y)| (*x, y * factor)).collect(),
        }
    }
}

fn strip_decorations(line: &str) -> String {
    HEADER_DECORATIONS
        .iter()
        .fold(line.to_string(), |acc, deco| acc.replace(deco, ""))
}

fn parse_field(fields: &[&str], idx: usize) -> Option<f64> {
    fields.get(idx)?.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CCSTAR_TABLE: &str = "  1/d centre         CC*    nref      d / A   Min 1/nm   Max 1/nm\n\
        1.234     0.9912     2000      8.10      1.000      1.468\n\
        3.456     0.9500     1800      2.89      3.200      3.700\n\
        5.123        nan     1500      1.95      4.900      5.300\n\
        6.000    -0.0100     1200      1.66      5.900      6.100\n\
        6.500     garbage     900      1.54      6.400      6.600\n\
        7.000     0.2000      800      1.43      6.900      7.100\n";

    #[test]
    fn test_named_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_CCstar.dat");
        std::fs::write(&path, CCSTAR_TABLE).unwrap();
        let curve = FomCurve::from_file(&path, &ColumnSpec::named("d", "CC*")).unwrap();
        assert_eq!(
            curve.points(),
            &[(8.10, 0.9912), (2.89, 0.95), (1.43, 0.2)]
        );
    }

    #[test]
    fn test_reparse_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_CCstar.dat");
        std::fs::write(&path, CCSTAR_TABLE).unwrap();
        let columns = ColumnSpec::named("d", "CC*");
        let first = FomCurve::from_file(&path, &columns).unwrap();
        let second = FomCurve::from_file(&path, &columns).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rsplit_header_with_percent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_Rsplit.dat");
        std::fs::write(
            &path,
            "  1/d centre    Rsplit/%    nref      d / A   Min 1/nm   Max 1/nm\n\
             1.234      5.20     2000      8.10      1.000      1.468\n\
             3.456     41.00     1800      2.89      3.200      3.700\n",
        )
        .unwrap();
        let curve = FomCurve::from_file(&path, &ColumnSpec::named("d", "Rsplit/%")).unwrap();
        assert_eq!(curve.y(), vec![5.2, 41.0]);
        assert_eq!(curve.x(), vec![8.10, 2.89]);
    }

    #[test]
    fn test_missing_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_CC.dat");
        std::fs::write(&path, "1.0 2.0 3.0\n").unwrap();
        match FomCurve::from_file(&path, &ColumnSpec::named("d", "CC*")) {
            Err(FomTableError::MissingHeader(_, col)) => assert_eq!(col, "CC*"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_positional_keeps_negative_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_CC.dat");
        std::fs::write(
            &path,
            "  1/d centre     CC    nref      d / A   Min 1/nm   Max 1/nm\n\
             1.0   0.90   100   4.00   0.5   1.5\n\
             2.0   0.40   100   2.50\n\
             3.0  -0.05   100   2.00   2.5   3.5\n\
             4.0    nan   100   1.80   3.5   4.5\n",
        )
        .unwrap();
        let columns = ColumnSpec::Positional {
            x: 3,
            y: 1,
            min_fields: 5,
        };
        let curve = FomCurve::from_file(&path, &columns).unwrap();
        assert_eq!(curve.points(), &[(4.0, 0.9), (2.0, -0.05)]);
    }

    #[test]
    fn test_scaled() {
        let curve = FomCurve::new(vec![(3.0, 0.99), (2.0, 0.5)]);
        assert_eq!(curve.scaled(100.0).y(), vec![99.0, 50.0]);
    }
}
