use fxhash::FxHashMap;
use std::fs::OpenOptions;
use std::path::Path;

use super::error::RunTableError;
use super::run::{Run, RunState};

/// The consolidated result of an aggregation pass: one finalized run per name, in the order
/// the names were first seen
#[derive(Debug, Default)]
pub struct RunTable {
    runs: Vec<Run>,
    index: FxHashMap<String, usize>,
    collisions: usize,
}

impl RunTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finalize a run and add it to the table.
    ///
    /// A run with a name already in the table replaces the earlier one (last writer wins).
    /// The displaced run is returned and the collision is logged and counted.
    pub fn insert(&mut self, mut run: Run) -> Option<Run> {
        if run.state() == RunState::Parsed {
            if let Err(e) = run.transition(RunState::Finalized) {
                log::error!("{e}");
            }
        }
        match self.index.get(&run.name) {
            Some(&idx) => {
                self.collisions += 1;
                log::warn!(
                    "Run name {} already in the table; replacing the earlier record",
                    run.name
                );
                Some(std::mem::replace(&mut self.runs[idx], run))
            }
            None => {
                self.index.insert(run.name.clone(), self.runs.len());
                self.runs.push(run);
                None
            }
        }
    }

    /// Move every run of another table into this one, in order
    pub fn merge(&mut self, other: RunTable) {
        self.collisions += other.collisions;
        for run in other.runs {
            self.insert(run);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Run> {
        self.index.get(name).map(|&idx| &self.runs[idx])
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Number of inserts that replaced an existing run
    pub fn collisions(&self) -> usize {
        self.collisions
    }

    /// Write the whole table, replacing any existing file
    pub fn write_csv(&self, path: &Path, extended: bool, delimiter: u8) -> Result<(), RunTableError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(path)?;
        if let Some(first) = self.runs.first() {
            writer.write_record(first.columns(extended).iter().map(|(name, _)| *name))?;
        }
        for run in &self.runs {
            writer.write_record(run.columns(extended).iter().map(|(_, value)| value))?;
        }
        writer.flush()?;
        log::info!("Wrote {} run(s) to {}", self.runs.len(), path.display());
        Ok(())
    }
}

/// Append a single run to a table file. The header is written only when the file is new
/// or empty.
pub fn append_csv(
    path: &Path,
    run: &Run,
    extended: bool,
    delimiter: u8,
) -> Result<(), RunTableError> {
    let needs_header = path.metadata().map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(file);
    let columns = run.columns(extended);
    if needs_header {
        writer.write_record(columns.iter().map(|(name, _)| *name))?;
    }
    writer.write_record(columns.iter().map(|(_, value)| value))?;
    writer.flush()?;
    Ok(())
}
