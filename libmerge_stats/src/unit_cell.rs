use regex::{Regex, RegexBuilder};
use std::path::Path;

use super::error::UnitCellError;

const CRYST1_PATTERN: &str =
    r"CRYST1\s+([\d.]+)\s+([\d.]+)\s+([\d.]+)\s+([\d.]+)\s+([\d.]+)\s+([\d.]+)";
const CELL_PATTERN: &str = r"a = ([\d.]+) A.*?b = ([\d.]+) A.*?c = ([\d.]+) A.*?al = ([\d.]+) deg.*?be = ([\d.]+) deg.*?ga = ([\d.]+) deg";

/// Lattice parameters: lengths in Angstrom, angles in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UnitCell {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl UnitCell {
    /// Read the cell from a PDB file (CRYST1 record) or a CrystFEL cell file
    pub fn from_file(path: &Path) -> Result<Self, UnitCellError> {
        let contents = std::fs::read_to_string(path)?;
        let is_pdb = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdb"));
        let re = if is_pdb {
            Regex::new(CRYST1_PATTERN)?
        } else {
            RegexBuilder::new(CELL_PATTERN)
                .dot_matches_new_line(true)
                .build()?
        };
        Self::from_captures(&re, &contents)
            .ok_or_else(|| UnitCellError::NotFound(path.to_path_buf()))
    }

    fn from_captures(re: &Regex, text: &str) -> Option<Self> {
        let caps = re.captures(text)?;
        let mut values = [0.0; 6];
        for (idx, value) in values.iter_mut().enumerate() {
            *value = caps.get(idx + 1)?.as_str().parse().ok()?;
        }
        let [a, b, c, alpha, beta, gamma] = values;
        Some(Self {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
        })
    }

    /// Parameters in a, b, c, alpha, beta, gamma order
    pub fn as_array(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.alpha, self.beta, self.gamma]
    }
}

impl std::fmt::Display for UnitCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.a, self.b, self.c, self.alpha, self.beta, self.gamma
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdb_cryst1() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lyso.pdb");
        std::fs::write(
            &path,
            "REMARK   1 lysozyme\nCRYST1   79.100   79.100   38.000  90.00  90.00  90.00 P 43 21 2\n",
        )
        .unwrap();
        let cell = UnitCell::from_file(&path).unwrap();
        assert_eq!(cell.as_array(), [79.1, 79.1, 38.0, 90.0, 90.0, 90.0]);
        assert_eq!(cell.to_string(), "79.1,79.1,38,90,90,90");
    }

    #[test]
    fn test_crystfel_cell() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lyso.cell");
        std::fs::write(
            &path,
            "CrystFEL unit cell file version 1.0\n\n\
             lattice_type = tetragonal\ncentering = P\nunique_axis = c\n\n\
             a = 79.10 A\nb = 79.10 A\nc = 38.00 A\n\
             al = 90.00 deg\nbe = 90.00 deg\nga = 90.00 deg\n",
        )
        .unwrap();
        let cell = UnitCell::from_file(&path).unwrap();
        assert_eq!(cell.c, 38.0);
        assert_eq!(cell.gamma, 90.0);
    }

    #[test]
    fn test_no_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.cell");
        std::fs::write(&path, "lattice_type = cubic\n").unwrap();
        assert!(matches!(
            UnitCell::from_file(&path),
            Err(UnitCellError::NotFound(_))
        ));
    }
}
