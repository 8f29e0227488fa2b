use regex::Regex;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::config::Config;
use super::error::DatasetError;

const UNIT_CELL_REFERENCE: &str = r"[^\s=]+\.(?:cell|pdb)\b";

/// A merged reflection list and the metadata its header carries
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub hkl: PathBuf,
    pub stem: String,
    pub dir: PathBuf,
    /// Unit cell file the indexing was run with, as recorded in the file
    pub embedded_cell: Option<PathBuf>,
    pub point_group: String,
}

impl Dataset {
    /// Load the dataset metadata from a `.hkl` file
    pub fn load(hkl: &Path) -> Result<Self, DatasetError> {
        if !hkl.is_file() {
            return Err(DatasetError::BadFilePath(hkl.to_path_buf()));
        }
        let stem = hkl
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| DatasetError::BadFilePath(hkl.to_path_buf()))?;
        let dir = hkl
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let cell_re = Regex::new(UNIT_CELL_REFERENCE)?;
        let mut embedded_cell: Option<PathBuf> = None;
        let mut point_group: Option<String> = None;

        let reader = BufReader::new(std::fs::File::open(hkl)?);
        for raw in reader.split(b'\n') {
            let raw = raw?;
            let line = String::from_utf8_lossy(&raw);
            if embedded_cell.is_none() && line.contains("indexamajig") {
                embedded_cell = cell_re.find(&line).map(|m| {
                    let reference = m.as_str();
                    if reference.starts_with('/') {
                        PathBuf::from(reference)
                    } else {
                        PathBuf::from(format!("/{reference}"))
                    }
                });
            }
            if point_group.is_none() && line.contains("Symmetry") {
                point_group = line.rsplit(':').next().map(|s| s.trim().to_string());
            }
            if embedded_cell.is_some() && point_group.is_some() {
                break;
            }
        }

        Ok(Self {
            hkl: hkl.to_path_buf(),
            stem,
            dir,
            embedded_cell,
            point_group: point_group.unwrap_or_default(),
        })
    }

    /// The two half-dataset files the split statistics are computed from
    pub fn split_files(&self) -> Result<(PathBuf, PathBuf), DatasetError> {
        let hkl1 = self.dir.join(format!("{}.hkl1", self.stem));
        let hkl2 = self.dir.join(format!("{}.hkl2", self.stem));
        if hkl1.is_file() && hkl2.is_file() {
            Ok((hkl1, hkl2))
        } else {
            Err(DatasetError::MissingSplitFiles(self.hkl.clone()))
        }
    }

    pub fn stream_path(&self) -> PathBuf {
        self.dir.join(format!("{}.stream", self.stem))
    }

    /// Candidate unit cell files, most trusted first
    pub fn unit_cell_candidates(&self, override_dir: Option<&Path>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(embedded) = &self.embedded_cell {
            candidates.push(embedded.clone());
            if let Some(name) = embedded.file_name() {
                candidates.push(self.dir.join(name));
            }
        }
        if let Some(dir) = override_dir {
            candidates.push(dir.join(format!("{}.cell", self.stem)));
            candidates.push(dir.join(format!("{}.pdb", self.stem)));
        }
        candidates
    }

    /// The first candidate unit cell file that exists
    pub fn resolve_unit_cell(&self, override_dir: Option<&Path>) -> Result<PathBuf, DatasetError> {
        self.unit_cell_candidates(override_dir)
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| DatasetError::NoUnitCell(self.hkl.clone()))
    }
}

/// Find the datasets to process, either from the block file or by searching the data path
pub fn discover_datasets(config: &Config) -> Result<Vec<PathBuf>, DatasetError> {
    let mut found: Vec<PathBuf> = match &config.block_file {
        Some(block_file) => {
            if !block_file.is_file() {
                return Err(DatasetError::BadFilePath(block_file.clone()));
            }
            std::fs::read_to_string(block_file)?
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(|l| config.data_path.join(l))
                .collect()
        }
        None => {
            let pattern = config.data_path.join("**").join("*.hkl");
            glob::glob(&pattern.to_string_lossy())?
                .filter_map(|entry| match entry {
                    Ok(path) => Some(path),
                    Err(e) => {
                        log::warn!("Skipping unreadable path during discovery: {e}");
                        None
                    }
                })
                .collect()
        }
    };

    // Matched below data_path so the data directory's own name never matches
    if let Some(pattern) = &config.pattern {
        found.retain(|path| {
            path.strip_prefix(&config.data_path)
                .unwrap_or(path.as_path())
                .to_string_lossy()
                .contains(pattern.as_str())
        });
    }
    found.retain(|path| {
        let exists = path.is_file();
        if !exists {
            log::warn!("Dataset {} does not exist, skipping...", path.display());
        }
        exists
    });
    found.sort();
    found.dedup();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_hkl(dir: &Path, stem: &str, cell: &str) -> PathBuf {
        let path = dir.join(format!("{stem}.hkl"));
        std::fs::write(
            &path,
            format!(
                "CrystFEL reflection list version 2.0\n\
                 Symmetry: 4/mmm\n\
                    h    k    l          I    phase   sigma(I)   nmeas\n\
                    1    0    0     123.45        -      10.00      12\n\
                 End of reflections\n\
                 Generated by CrystFEL 0.10.2\n\
                 indexamajig -i files.lst -o {stem}.stream -g det.geom -p {cell} --peaks=peakfinder8\n\
                 partialator -i {stem}.stream -o {stem}.hkl -y 4/mmm\n"
            ),
        )
        .unwrap();
        path
    }

    #[test]
    fn test_load_header() {
        let dir = tempfile::tempdir().unwrap();
        let hkl = write_hkl(dir.path(), "lyso", "/gpfs/exp/lyso.cell");
        let dataset = Dataset::load(&hkl).unwrap();
        assert_eq!(dataset.stem, "lyso");
        assert_eq!(dataset.point_group, "4/mmm");
        assert_eq!(dataset.embedded_cell, Some(PathBuf::from("/gpfs/exp/lyso.cell")));
        assert_eq!(dataset.stream_path(), dir.path().join("lyso.stream"));
    }

    #[test]
    fn test_missing_split_files() {
        let dir = tempfile::tempdir().unwrap();
        let hkl = write_hkl(dir.path(), "lyso", "lyso.cell");
        let dataset = Dataset::load(&hkl).unwrap();
        assert!(matches!(
            dataset.split_files(),
            Err(DatasetError::MissingSplitFiles(_))
        ));
        std::fs::write(dir.path().join("lyso.hkl1"), "x").unwrap();
        std::fs::write(dir.path().join("lyso.hkl2"), "x").unwrap();
        assert!(dataset.split_files().is_ok());
    }

    #[test]
    fn test_unit_cell_priority() {
        let dir = tempfile::tempdir().unwrap();
        let override_dir = dir.path().join("cells");
        std::fs::create_dir(&override_dir).unwrap();
        let hkl = write_hkl(dir.path(), "lyso", "/nonexistent/lyso_ref.cell");
        let dataset = Dataset::load(&hkl).unwrap();

        assert!(matches!(
            dataset.resolve_unit_cell(Some(&override_dir)),
            Err(DatasetError::NoUnitCell(_))
        ));

        let pdb_override = override_dir.join("lyso.pdb");
        std::fs::write(&pdb_override, "CRYST1").unwrap();
        assert_eq!(dataset.resolve_unit_cell(Some(&override_dir)).unwrap(), pdb_override);

        let cell_override = override_dir.join("lyso.cell");
        std::fs::write(&cell_override, "a = 1 A").unwrap();
        assert_eq!(dataset.resolve_unit_cell(Some(&override_dir)).unwrap(), cell_override);

        let sibling = dir.path().join("lyso_ref.cell");
        std::fs::write(&sibling, "a = 1 A").unwrap();
        assert_eq!(dataset.resolve_unit_cell(Some(&override_dir)).unwrap(), sibling);
    }

    #[test]
    fn test_discover_with_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("block_a");
        std::fs::create_dir(&nested).unwrap();
        write_hkl(&nested, "lyso_run2", "lyso.cell");
        write_hkl(dir.path(), "lyso_run1", "lyso.cell");
        write_hkl(dir.path(), "thau_run1", "thau.cell");

        let config = Config {
            data_path: dir.path().to_path_buf(),
            pattern: Some(String::from("lyso")),
            ..Default::default()
        };
        let found = discover_datasets(&config).unwrap();
        assert_eq!(
            found,
            vec![dir.path().join("block_a/lyso_run2.hkl"), dir.path().join("lyso_run1.hkl")]
        );

        let by_directory = Config {
            pattern: Some(String::from("block_a")),
            ..config
        };
        assert_eq!(
            discover_datasets(&by_directory).unwrap(),
            vec![dir.path().join("block_a/lyso_run2.hkl")]
        );
    }

    #[test]
    fn test_discover_from_block_file() {
        let dir = tempfile::tempdir().unwrap();
        let hkl = write_hkl(dir.path(), "lyso", "lyso.cell");
        let block_file = dir.path().join("blocks.lst");
        std::fs::write(
            &block_file,
            format!("# datasets\n{}\n{}/missing.hkl\n", hkl.display(), dir.path().display()),
        )
        .unwrap();
        let config = Config {
            block_file: Some(block_file),
            ..Default::default()
        };
        assert_eq!(discover_datasets(&config).unwrap(), vec![hkl]);
    }

    #[test]
    fn test_block_file_entries_are_relative_to_data_path() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let nested = data.join("run2");
        std::fs::create_dir_all(&nested).unwrap();
        let lyso = write_hkl(&data, "lyso", "lyso.cell");
        let thau = write_hkl(&nested, "thau", "thau.cell");
        let block_file = dir.path().join("blocks.lst");
        std::fs::write(&block_file, "lyso.hkl
run2/thau.hkl
").unwrap();

        let config = Config {
            data_path: data,
            block_file: Some(block_file),
            ..Default::default()
        };
        assert_eq!(discover_datasets(&config).unwrap(), vec![lyso, thau]);
    }
}
