//! # merge_stats
//!
//! merge_stats collects the merging statistics of serial crystallography datasets into a
//! single table, written in Rust. For every merged reflection list (`.hkl`) it submits a
//! statistics job (CrystFEL `compare_hkl`/`check_hkl`) to a SLURM cluster, waits for the
//! job output, parses the shell tables and the job log, and derives resolution cut-offs from
//! the figure-of-merit curves. One row per run ends up in a CSV table.
//!
//! ## Installation
//!
//! The only method of install is from source.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./merge_stats_cli` from the top
//! level repository. The binary is installed to your cargo install location (typically
//! something like `~/.cargo/bin/`).
//!
//! The statistics jobs need `sbatch` and `squeue` on the path, and the cluster modules
//! listed in the configuration must provide `compare_hkl` and `check_hkl`.
//!
//! ## Datasets
//!
//! A dataset is a merged `<stem>.hkl` file with its two halves `<stem>.hkl1` and
//! `<stem>.hkl2` next to it. The point group is read from the `Symmetry` line of the file
//! and the unit cell file from the recorded `indexamajig` command. If the unit cell file
//! has moved, a file of the same name next to the dataset is used, then
//! `<cell_path>/<stem>.cell` and `<cell_path>/<stem>.pdb`. Datasets without split files or
//! without a unit cell are skipped. The indexing stream `<stem>.stream`, if present, gives
//! the pattern and crystal counts.
//!
//! ## Resolution cut-off and offsets
//!
//! If `refinement_path` is set, the high resolution limit of the latest refinement of the
//! dataset is used as the cut-off (`default_cutoff` if there is none). Otherwise the cut-off
//! is the largest of `default_cutoff` and the SNR = 1 and CC1/2 = 0.3 estimates from earlier
//! `<stem>_SNR.dat`/`<stem>_CC.dat` tables.
//!
//! Each value in `offsets` is added to the cut-off to make an additional run named
//! `<stem>_offset_<offset>`. An offset of 0 is always included when offsets are given.
//!
//! ## Configuration
//!
//! The CLI reads a YAML configuration. A template can be made with
//! `merge_stats_cli -p config.yml new`:
//!
//! ```yml
//! data_path: None
//! output_path: None
//! block_file: null
//! pattern: null
//! cell_path: null
//! refinement_path: null
//! n_shells: 10
//! offsets: []
//! default_cutoff: 1.5
//! extended: false
//! append: false
//! online: false
//! n_threads: 1
//! csv_delimiter: ','
//! marker_wait:
//!   poll_interval_secs: 2.0
//!   timeout_secs: 40.0
//! artifact_wait:
//!   poll_interval_secs: 5.0
//!   timeout_secs: 43200.0
//! scheduler:
//!   user: me
//!   partition: short,upex,allcpu
//!   time_limit: '12:00:00'
//!   memory: '500000'
//!   modules:
//!   - xray
//!   - hdf5/1.10.5
//!   - anaconda3/5.2
//!   - maxwell crystfel
//!   pending_threshold: 0
//!   poll_interval_secs: 10.0
//! ```
//!
//! - `block_file`: a list of `.hkl` paths relative to `data_path`, one per line, processed
//! instead of searching `data_path`.
//! - `pattern`: only datasets whose path below `data_path` contains this text are processed.
//! - `extended`: adds the overall and outer shell values as separate columns.
//! - `append`: writes each run to the table as soon as it is finished.
//! - `online`: keeps watching `data_path` and processes new datasets as they appear.
//! - `n_threads`: the number of worker threads the runs are divided amongst. Must be at
//! least 1.
//!
//! ## Output
//!
//! The table (`output_path`, or `merge_statistics.csv` inside it if it is a directory) has
//! one row per run. Values are written as `overall (outer shell)`. A run whose job log never
//! reported the Wilson B-factor keeps whatever was parsed and carries a comment saying so.
pub mod config;
pub mod cutoff;
pub mod dataset;
pub mod error;
pub mod fom_table;
pub mod orchestrator;
pub mod overall;
pub mod process;
pub mod refinement;
pub mod run;
pub mod shell;
pub mod stream;
pub mod table;
pub mod unit_cell;
pub mod waiter;
pub mod worker_status;
