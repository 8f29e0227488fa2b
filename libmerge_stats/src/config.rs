use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;
use super::waiter::WaitPolicy;

/// Settings for the SLURM cluster the statistics jobs run on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub user: String,
    pub partition: String,
    pub time_limit: String,
    pub memory: String,
    pub modules: Vec<String>,
    /// Parsing starts once this many (or fewer) jobs are pending
    pub pending_threshold: usize,
    pub poll_interval_secs: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            user: std::env::var("USER").unwrap_or_default(),
            partition: String::from("short,upex,allcpu"),
            time_limit: String::from("12:00:00"),
            memory: String::from("500000"),
            modules: vec![
                String::from("xray"),
                String::from("hdf5/1.10.5"),
                String::from("anaconda3/5.2"),
                String::from("maxwell crystfel"),
            ],
            pending_threshold: 0,
            poll_interval_secs: 10.0,
        }
    }
}

/// Structure representing the application configuration. Contains pathing and run information
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory searched for merged `.hkl` datasets
    pub data_path: PathBuf,
    /// The table is written here
    pub output_path: PathBuf,
    /// Optional list of datasets, one path per line, used instead of searching data_path
    pub block_file: Option<PathBuf>,
    /// Only datasets whose file name contains this text are processed
    pub pattern: Option<String>,
    /// Directory holding `<stem>.cell` or `<stem>.pdb` files
    pub cell_path: Option<PathBuf>,
    /// Directory holding refinement results
    pub refinement_path: Option<PathBuf>,
    pub n_shells: usize,
    /// Resolution offsets (Angstrom) added to each dataset's cutoff
    pub offsets: Vec<f64>,
    pub default_cutoff: f64,
    pub extended: bool,
    pub append: bool,
    pub online: bool,
    pub n_threads: i32,
    pub csv_delimiter: char,
    pub marker_wait: WaitPolicy,
    pub artifact_wait: WaitPolicy,
    pub scheduler: SchedulerConfig,
}

impl Default for Config {
    /// Generate a new Config object. All paths will be empty/invalid
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            block_file: None,
            pattern: None,
            cell_path: None,
            refinement_path: None,
            n_shells: 10,
            offsets: Vec::new(),
            default_cutoff: 1.5,
            extended: false,
            append: false,
            online: false,
            n_threads: 1,
            csv_delimiter: ',',
            marker_wait: WaitPolicy::new(2.0, 40.0),
            artifact_wait: WaitPolicy::new(5.0, 12.0 * 3600.0),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;
        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        if !config.is_n_threads_valid() {
            return Err(ConfigError::BadThreadCount(config.n_threads));
        }
        Ok(config)
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    /// The offsets each dataset is run at. `None` is a single run without a name suffix.
    /// A non-empty list always includes the unshifted cutoff.
    pub fn run_offsets(&self) -> Vec<Option<f64>> {
        if self.offsets.is_empty() {
            return vec![None];
        }
        let mut offsets = self.offsets.clone();
        if !offsets.contains(&0.0) {
            offsets.push(0.0);
        }
        offsets.into_iter().map(Some).collect()
    }

    /// Path of the output table
    pub fn table_path(&self) -> PathBuf {
        if self.output_path.extension().is_some() {
            self.output_path.clone()
        } else {
            self.output_path.join("merge_statistics.csv")
        }
    }

    /// Field delimiter for the table as a single byte
    pub fn delimiter(&self) -> u8 {
        if self.csv_delimiter.is_ascii() {
            self.csv_delimiter as u8
        } else {
            log::warn!(
                "Delimiter {:?} is not ASCII, falling back to ','",
                self.csv_delimiter
            );
            b','
        }
    }
}
