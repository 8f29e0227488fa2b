use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use super::config::SchedulerConfig;
use super::error::OrchestratorError;
use super::waiter::Clock;

/// Figures of merit computed pairwise from the two half-datasets
const SPLIT_FOMS: [&str; 4] = ["CCstar", "Rsplit", "CC", "CCano"];

/// The files a statistics job will eventually produce for one run
#[derive(Debug, Clone, PartialEq)]
pub struct JobArtifacts {
    pub ccstar: PathBuf,
    pub rsplit: PathBuf,
    pub cc: PathBuf,
    pub ccano: PathBuf,
    pub snr: PathBuf,
    pub wilson: PathBuf,
    /// Log of the job; carries the overall statistics
    pub err: PathBuf,
}

impl JobArtifacts {
    pub fn for_run(dir: &Path, name: &str) -> Self {
        let table = |fom: &str| dir.join(format!("{name}_{fom}.dat"));
        Self {
            ccstar: table("CCstar"),
            rsplit: table("Rsplit"),
            cc: table("CC"),
            ccano: table("CCano"),
            snr: table("SNR"),
            wilson: table("Wilson"),
            err: dir.join(format!("{name}.err")),
        }
    }
}

/// Everything a statistics job needs to know about one run
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub name: String,
    /// Directory the job runs in and writes its artifacts to
    pub work_dir: PathBuf,
    pub hkl: PathBuf,
    pub hkl1: PathBuf,
    pub hkl2: PathBuf,
    pub unit_cell: PathBuf,
    pub point_group: String,
    pub high_res: f64,
    pub n_shells: usize,
}

/// The batch system that computes the statistics tables
pub trait JobOrchestrator: Send + Sync {
    /// Queue the statistics job for a run and return where its output will appear
    fn submit(&self, request: &JobRequest) -> Result<JobArtifacts, OrchestratorError>;
    /// Number of this user's jobs still waiting in the queue
    fn pending_jobs(&self) -> Result<usize, OrchestratorError>;
}

/// Submits jobs to a SLURM cluster through `sbatch` and watches them with `squeue`
#[derive(Debug, Clone)]
pub struct SlurmOrchestrator {
    scheduler: SchedulerConfig,
}

impl SlurmOrchestrator {
    pub fn new(scheduler: SchedulerConfig) -> Self {
        Self { scheduler }
    }

    /// Render the batch script for a run
    pub fn job_script(&self, request: &JobRequest) -> String {
        let name = &request.name;
        let mut lines = vec![
            String::from("#!/bin/sh"),
            String::new(),
            format!("#SBATCH --job-name={name}"),
            format!("#SBATCH --partition={}", self.scheduler.partition),
            format!("#SBATCH --time={}", self.scheduler.time_limit),
            String::from("#SBATCH --nodes=1"),
            String::from("#SBATCH --nice=100"),
            format!("#SBATCH --mem={}", self.scheduler.memory),
            format!("#SBATCH --output={name}.out"),
            format!("#SBATCH --error={name}.err"),
            String::new(),
            String::from("source /etc/profile.d/modules.sh"),
        ];
        lines.extend(
            self.scheduler
                .modules
                .iter()
                .map(|module| format!("module load {module}")),
        );
        lines.push(String::from("export QT_QPA_PLATFORM=offscreen"));
        lines.push(format!("cd {}", request.work_dir.display()));
        lines.push(String::new());

        let common = format!(
            "-p {} -y {} --highres={} --nshells={}",
            request.unit_cell.display(),
            request.point_group,
            request.high_res,
            request.n_shells
        );
        for fom in SPLIT_FOMS {
            lines.push(format!(
                "compare_hkl {common} --fom={fom} --shell-file={name}_{fom}.dat {} {}",
                request.hkl1.display(),
                request.hkl2.display()
            ));
        }
        lines.push(format!(
            "check_hkl {common} --shell-file={name}_SNR.dat {}",
            request.hkl.display()
        ));
        lines.push(format!(
            "check_hkl {common} --wilson --shell-file={name}_Wilson.dat {}",
            request.hkl.display()
        ));
        lines.push(String::new());
        lines.join("\n")
    }
}

impl JobOrchestrator for SlurmOrchestrator {
    fn submit(&self, request: &JobRequest) -> Result<JobArtifacts, OrchestratorError> {
        let script_path = request.work_dir.join(format!("{}.sh", request.name));
        std::fs::write(&script_path, self.job_script(request))?;

        let output = Command::new("sbatch")
            .arg(&script_path)
            .current_dir(&request.work_dir)
            .output()?;
        if !output.status.success() {
            return Err(OrchestratorError::SubmitFailed(
                request.name.clone(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        log::info!(
            "Submitted {}: {}",
            request.name,
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(JobArtifacts::for_run(&request.work_dir, &request.name))
    }

    fn pending_jobs(&self) -> Result<usize, OrchestratorError> {
        let output = Command::new("squeue")
            .args(["-u", &self.scheduler.user, "-t", "pending", "-h"])
            .output()
            .map_err(|e| OrchestratorError::QueryFailed(e.to_string()))?;
        if !output.status.success() {
            return Err(OrchestratorError::QueryFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(count_queue_lines(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn count_queue_lines(listing: &str) -> usize {
    listing.lines().filter(|l| !l.trim().is_empty()).count()
}

/// How the wait for the scheduler queue ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Pending jobs fell to the threshold
    Drained,
    /// The scheduler could not be queried; the pipeline carries on as if drained
    QueryFailed,
}

/// Block until the scheduler reports no more than `threshold` pending jobs.
///
/// Nothing is parsed while a producing job may still be queued. A failed query ends the
/// wait (fail-open) and is reported as [DrainOutcome::QueryFailed].
pub fn drain_pending_jobs(
    orchestrator: &dyn JobOrchestrator,
    threshold: usize,
    poll: Duration,
    clock: &dyn Clock,
) -> DrainOutcome {
    loop {
        match orchestrator.pending_jobs() {
            Ok(pending) if pending <= threshold => return DrainOutcome::Drained,
            Ok(pending) => {
                log::info!("{pending} job(s) still pending...");
                clock.sleep(poll);
            }
            Err(e) => {
                log::warn!("{e}; continuing as if no jobs are pending");
                return DrainOutcome::QueryFailed;
            }
        }
    }
}
