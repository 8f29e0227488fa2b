use std::path::PathBuf;

use super::cutoff::Intersection;
use super::error::RunError;
use super::orchestrator::JobArtifacts;
use super::overall::OverallStats;
use super::refinement::RefinementSummary;
use super::shell::ShellStats;
use super::stream::StreamStats;
use super::unit_cell::UnitCell;

/// Lifecycle of a run.
///
/// ```text
/// Pending -> Submitted -> AwaitingArtifacts -> Parsed -> Finalized
///                                 |               |
///                                 +-> Incomplete <+
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Pending,
    Submitted,
    AwaitingArtifacts,
    Parsed,
    Finalized,
    Incomplete,
}

impl RunState {
    pub fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Submitted)
                | (Self::Submitted, Self::AwaitingArtifacts)
                | (Self::AwaitingArtifacts, Self::Parsed)
                | (Self::AwaitingArtifacts, Self::Incomplete)
                | (Self::Parsed, Self::Finalized)
                | (Self::Parsed, Self::Incomplete)
        )
    }

    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Incomplete)
    }
}

/// Name of the run for a dataset stem at a resolution offset. No offset means no suffix.
pub fn run_name(stem: &str, offset: Option<f64>) -> String {
    let Some(offset) = offset else {
        return stem.to_string();
    };
    let mut suffix = offset.to_string();
    if !suffix.contains('.') {
        suffix.push_str(".0");
    }
    format!("{stem}_offset_{}", suffix.replace('.', "_"))
}

/// One statistics computation for one dataset at one resolution offset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Run {
    pub name: String,
    pub hkl: PathBuf,
    pub offset: Option<f64>,
    /// High resolution limit the statistics job was run with
    pub resolution_cutoff: f64,
    pub point_group: String,
    pub unit_cell_file: Option<PathBuf>,
    pub artifacts: Option<JobArtifacts>,
    state: RunState,

    pub stream: StreamStats,
    pub refinement: Option<RefinementSummary>,
    pub overall: OverallStats,
    pub shell: Option<ShellStats>,
    pub resolution_snr_one: Option<f64>,
    pub resolution_cc: Option<f64>,
    pub intersection: Option<Intersection>,
    pub unit_cell: Option<UnitCell>,
    pub comments: Vec<String>,
}

impl Run {
    pub fn new(name: &str, hkl: PathBuf, offset: Option<f64>, resolution_cutoff: f64) -> Self {
        Self {
            name: name.to_string(),
            hkl,
            offset,
            resolution_cutoff,
            ..Default::default()
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transition(&mut self, next: RunState) -> Result<(), RunError> {
        if !self.state.can_transition_to(next) {
            return Err(RunError::InvalidTransition(
                self.name.clone(),
                self.state,
                next,
            ));
        }
        log::debug!("{}: {:?} -> {:?}", self.name, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Record a problem with the run, and mark it incomplete if it can still change state
    pub fn mark_incomplete(&mut self, comment: &str) {
        self.comments.push(comment.to_string());
        if self.state.can_transition_to(RunState::Incomplete) {
            self.state = RunState::Incomplete;
        }
    }

    pub fn comment(&self) -> String {
        self.comments.join("; ")
    }

    /// The row of the output table for this run, as (column, value) pairs.
    /// The extended layout appends the separated overall/outer shell columns.
    pub fn columns(&self, extended: bool) -> Vec<(&'static str, String)> {
        let overall = &self.overall;
        let shell = self.shell.as_ref();
        let shell_range = shell.map(|s| format!("{} - {}", s.max_resolution, s.min_resolution));
        let cell = self.unit_cell.map(|c| c.to_string()).unwrap_or_default();
        let refinement = self.refinement.unwrap_or_default();

        let mut columns = vec![
            ("Run", self.name.clone()),
            (
                "Num. patterns/hits",
                format!("{}/{}", self.stream.chunks, self.stream.hits),
            ),
            (
                "Indexed patterns/crystals",
                format!(
                    "{}/{}",
                    self.stream.indexed_patterns, self.stream.indexed_crystals
                ),
            ),
            (
                "Resolution",
                with_shell(overall.resolution_range.clone(), shell_range.clone()),
            ),
            (
                "Rsplit(%)",
                with_shell(num(overall.rsplit), num(shell.map(|s| s.rsplit))),
            ),
            ("CC1/2", with_shell(num(overall.cc), num(shell.map(|s| s.cc)))),
            (
                "CC*",
                with_shell(num(overall.cc_star), num(shell.map(|s| s.cc_star))),
            ),
            ("CCano", text(num(overall.cc_ano))),
            ("SNR", with_shell(num(overall.snr), num(shell.map(|s| s.snr)))),
            (
                "Completeness(%)",
                with_shell(num(overall.completeness), num(shell.map(|s| s.completeness))),
            ),
            (
                "Multiplicity",
                with_shell(num(overall.multiplicity), num(shell.map(|s| s.multiplicity))),
            ),
            ("Total Measurements", text(num(overall.total_measurements))),
            (
                "Unique Reflections",
                with_shell(
                    num(overall.unique_reflections),
                    num(shell.map(|s| s.unique_reflections)),
                ),
            ),
            ("Wilson B-factor", text(num(overall.wilson_b))),
            ("Resolution SNR=1", text(num(self.resolution_snr_one))),
            ("Resolution CC>=0.3", text(num(self.resolution_cc))),
            ("a,b,c,alpha,betta,gamma", cell),
            (
                "CC* intersects with Rsplit at",
                text(num(self.intersection.map(|i| i.value()))),
            ),
            ("Rwork/Rfree", refinement.r_factors().unwrap_or_default()),
            (
                "Refinement resolution cut-off high",
                text(num(refinement.resolution_high)),
            ),
            (
                "Refinement resolution cut-off low",
                text(num(refinement.resolution_low)),
            ),
        ];

        if extended {
            let cell_values = self.unit_cell.map(|c| c.as_array());
            let cell_at = |idx: usize| text(num(cell_values.map(|v| v[idx])));
            columns.extend([
                (
                    "UC_file",
                    self.unit_cell_file
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                ),
                ("N_patterns", self.stream.chunks.to_string()),
                ("N_hits", self.stream.hits.to_string()),
                ("Indexed_patterns", self.stream.indexed_patterns.to_string()),
                ("Indexed_crystals", self.stream.indexed_crystals.to_string()),
                ("Rwork", text(num(refinement.r_work))),
                ("Rfree", text(num(refinement.r_free))),
                ("a", cell_at(0)),
                ("b", cell_at(1)),
                ("c", cell_at(2)),
                ("alpha", cell_at(3)),
                ("betta", cell_at(4)),
                ("gamma", cell_at(5)),
                ("Resolution_overall", text(overall.resolution_range.clone())),
                ("Rsplit(%)_overall", text(num(overall.rsplit))),
                ("CC1/2_overall", text(num(overall.cc))),
                ("CC*_overall", text(num(overall.cc_star))),
                ("SNR_overall", text(num(overall.snr))),
                ("Completeness(%)_overall", text(num(overall.completeness))),
                ("Multiplicity_overall", text(num(overall.multiplicity))),
                (
                    "Unique Reflections_overall",
                    text(num(overall.unique_reflections)),
                ),
                ("Resolution_outer_shell", text(shell_range)),
                ("Rsplit(%)_outer_shell", text(num(shell.map(|s| s.rsplit)))),
                ("CC1/2_outer_shell", text(num(shell.map(|s| s.cc)))),
                ("CC*_outer_shell", text(num(shell.map(|s| s.cc_star)))),
                ("SNR_outer_shell", text(num(shell.map(|s| s.snr)))),
                (
                    "Completeness(%)_outer_shell",
                    text(num(shell.map(|s| s.completeness))),
                ),
                (
                    "Multiplicity_outer_shell",
                    text(num(shell.map(|s| s.multiplicity))),
                ),
                (
                    "Unique_Reflections_outer_shell",
                    text(num(shell.map(|s| s.unique_reflections))),
                ),
            ]);
        }

        columns.push(("Comment", self.comment()));
        columns
    }
}

fn num<T: ToString>(value: Option<T>) -> Option<String> {
    value.map(|v| v.to_string())
}

fn text(value: Option<String>) -> String {
    value.unwrap_or_default()
}

/// "overall (shell)", degrading to whichever half is known
fn with_shell(overall: Option<String>, shell: Option<String>) -> String {
    match (overall, shell) {
        (Some(o), Some(s)) => format!("{o} ({s})"),
        (Some(o), None) => o,
        (None, Some(s)) => format!("({s})"),
        (None, None) => String::new(),
    }
}
