use std::path::PathBuf;
use thiserror::Error;

use super::run::RunState;
use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config requested {0} worker threads; at least 1 is required")]
    BadThreadCount(i32),
}

#[derive(Debug, Error)]
pub enum FomTableError {
    #[error("FomTable failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("FomTable {0:?} has no header line containing column {1}")]
    MissingHeader(PathBuf, String),
    #[error("FomTable {0:?} header does not contain column {1}")]
    MissingColumn(PathBuf, String),
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Outer shell table {0:?} was not ready before the wait timed out")]
    NotReady(PathBuf),
    #[error("Outer shell extraction failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Outer shell table {0:?} has no usable data row")]
    NoDataRows(PathBuf),
}

#[derive(Debug, Error)]
pub enum UnitCellError {
    #[error("UnitCell failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("No unit cell parameters found in {0:?}")]
    NotFound(PathBuf),
    #[error("UnitCell failed due to regex error: {0}")]
    RegexError(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum RefinementError {
    #[error("Refinement lookup failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Refinement lookup failed due to bad glob pattern: {0}")]
    PatternError(#[from] glob::PatternError),
    #[error("Refinement file {0:?} contains no R-factors")]
    NoRFactors(PathBuf),
    #[error("Refinement parsing failed due to regex error: {0}")]
    RegexError(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Dataset {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Dataset {0:?} has no hkl1 and/or hkl2 split files")]
    MissingSplitFiles(PathBuf),
    #[error("No cell/pdb file exists for dataset {0:?}")]
    NoUnitCell(PathBuf),
    #[error("Dataset discovery failed due to bad glob pattern: {0}")]
    PatternError(#[from] glob::PatternError),
    #[error("Dataset failed due to regex error: {0}")]
    RegexError(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("JobOrchestrator failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("JobOrchestrator failed to submit {0}: {1}")]
    SubmitFailed(String, String),
    #[error("JobOrchestrator failed to query the scheduler: {0}")]
    QueryFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error("Run {0} cannot move from {1:?} to {2:?}")]
    InvalidTransition(String, RunState, RunState),
}

#[derive(Debug, Error)]
pub enum RunTableError {
    #[error("RunTable failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("RunTable failed to write CSV: {0}")]
    CsvError(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("Run preparation failed due to Dataset error: {0}")]
    DatasetError(#[from] DatasetError),
    #[error("Run preparation failed due to JobOrchestrator error: {0}")]
    OrchestratorError(#[from] OrchestratorError),
    #[error("Run preparation failed due to Run error: {0}")]
    RunError(#[from] RunError),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Dataset error: {0}")]
    DatasetError(#[from] DatasetError),
    #[error("Processor failed due to RunTable error: {0}")]
    TableError(#[from] RunTableError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed because worker {0} panicked")]
    WorkerPanic(usize),
}
