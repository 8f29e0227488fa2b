use fxhash::FxHashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::config::Config;
use super::cutoff::{
    ccstar_rsplit_intersection, fallback_cutoff, resolution_at_cc_threshold,
    resolution_at_snr_one, round_to, CC_THRESHOLD,
};
use super::dataset::{discover_datasets, Dataset};
use super::error::{PrepareError, ProcessorError, RunTableError};
use super::orchestrator::{drain_pending_jobs, DrainOutcome, JobOrchestrator, JobRequest};
use super::overall::{parse_overall_statistics, INCOMPLETE_COMMENT};
use super::refinement::{find_refinement, RefinementSummary};
use super::run::{run_name, Run, RunState};
use super::shell::extract_outer_shell;
use super::stream::StreamStats;
use super::table::{append_csv, RunTable};
use super::unit_cell::UnitCell;
use super::waiter::{Clock, FileWaiter};
use super::worker_status::{Phase, WorkerStatus};

/// The outside world the pipeline talks to
#[derive(Clone)]
pub struct Context {
    pub orchestrator: Arc<dyn JobOrchestrator>,
    pub clock: Arc<dyn Clock>,
}

impl Context {
    pub fn new(orchestrator: Arc<dyn JobOrchestrator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            orchestrator,
            clock,
        }
    }
}

/// One (dataset, offset) pair to compute statistics for
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRun {
    pub hkl: PathBuf,
    pub offset: Option<f64>,
}

/// Expand datasets into one planned run per configured offset
pub fn plan_runs(datasets: &[PathBuf], config: &Config) -> Vec<PlannedRun> {
    let offsets = config.run_offsets();
    datasets
        .iter()
        .flat_map(|hkl| {
            offsets.iter().map(move |offset| PlannedRun {
                hkl: hkl.clone(),
                offset: *offset,
            })
        })
        .collect()
}

/// Refinement results for a dataset, if a refinement directory is configured and holds any
fn lookup_refinement(config: &Config, stem: &str) -> Option<RefinementSummary> {
    let dir = config.refinement_path.as_ref()?;
    let path = match find_refinement(dir, stem) {
        Ok(Some(path)) => path,
        Ok(None) => {
            log::info!("No refinement results for {stem} in {}", dir.display());
            return None;
        }
        Err(e) => {
            log::warn!("{e}");
            return None;
        }
    };
    match RefinementSummary::from_file(&path) {
        Ok(summary) => Some(summary),
        Err(e) => {
            log::warn!("{e}");
            None
        }
    }
}

/// Resolution cut-off before the offset is applied
fn base_cutoff(config: &Config, dataset: &Dataset, refinement: Option<&RefinementSummary>) -> f64 {
    if config.refinement_path.is_some() {
        return refinement
            .and_then(|r| r.resolution_high)
            .unwrap_or(config.default_cutoff);
    }
    fallback_cutoff(
        &dataset.dir.join(format!("{}_SNR.dat", dataset.stem)),
        &dataset.dir.join(format!("{}_CC.dat", dataset.stem)),
        config.default_cutoff,
    )
}

/// Resolve the inputs of a planned run and submit its statistics job.
///
/// Fails when the dataset, its split files or its unit cell cannot be found; such a run is
/// never created.
pub fn prepare_run(
    config: &Config,
    context: &Context,
    planned: &PlannedRun,
) -> Result<Run, PrepareError> {
    let dataset = Dataset::load(&planned.hkl)?;
    let (hkl1, hkl2) = dataset.split_files()?;
    let unit_cell_file = dataset.resolve_unit_cell(config.cell_path.as_deref())?;

    let refinement = lookup_refinement(config, &dataset.stem);
    let cutoff = round_to(
        base_cutoff(config, &dataset, refinement.as_ref()) + planned.offset.unwrap_or(0.0),
        3,
    );
    let name = run_name(&dataset.stem, planned.offset);

    let mut run = Run::new(&name, dataset.hkl.clone(), planned.offset, cutoff);
    run.point_group = dataset.point_group.clone();
    run.unit_cell_file = Some(unit_cell_file.clone());
    run.refinement = refinement;

    let request = JobRequest {
        name,
        work_dir: dataset.dir.clone(),
        hkl: dataset.hkl.clone(),
        hkl1,
        hkl2,
        unit_cell: unit_cell_file,
        point_group: dataset.point_group,
        high_res: cutoff,
        n_shells: config.n_shells,
    };
    run.artifacts = Some(context.orchestrator.submit(&request)?);
    run.transition(RunState::Submitted)?;
    Ok(run)
}

/// Wait for the job output of a submitted run and fill in its statistics.
///
/// Nothing here aborts the run: each missing or unparseable piece becomes an empty field
/// plus a comment, and the run ends up Parsed or Incomplete.
pub fn collect_run(config: &Config, context: &Context, mut run: Run) -> Run {
    let Some(artifacts) = run.artifacts.clone() else {
        run.comments.push(String::from("Statistics job was never submitted"));
        return run;
    };
    if let Err(e) = run.transition(RunState::AwaitingArtifacts) {
        log::error!("{e}");
        return run;
    }
    let table_waiter = FileWaiter::new(context.clock.clone(), config.artifact_wait);
    let marker_waiter = FileWaiter::new(context.clock.clone(), config.marker_wait);

    match extract_outer_shell(&artifacts, &table_waiter) {
        Ok(shell) => run.shell = Some(shell),
        Err(e) => {
            log::warn!("{}: {e}", run.name);
            run.mark_incomplete(&e.to_string());
        }
    }
    let log_ready = table_waiter.wait_for_ready(&artifacts.err, None);
    if !log_ready {
        run.mark_incomplete(&format!("{} never appeared", artifacts.err.display()));
    }

    match resolution_at_snr_one(&artifacts.snr) {
        Ok(d) => run.resolution_snr_one = d,
        Err(e) => log::warn!("{}: {e}", run.name),
    }
    match resolution_at_cc_threshold(&artifacts.cc, CC_THRESHOLD) {
        Ok(d) => run.resolution_cc = d,
        Err(e) => log::warn!("{}: {e}", run.name),
    }
    match ccstar_rsplit_intersection(&artifacts.ccstar, &artifacts.rsplit) {
        Ok(crossing) => run.intersection = Some(crossing),
        Err(e) => log::warn!("{}: {e}", run.name),
    }
    if let Some(cell_file) = &run.unit_cell_file {
        match UnitCell::from_file(cell_file) {
            Ok(cell) => run.unit_cell = Some(cell),
            Err(e) => log::warn!("{}: {e}", run.name),
        }
    }
    run.stream = StreamStats::from_file(&run.hkl.with_extension("stream"));

    if run.state() == RunState::AwaitingArtifacts {
        if let Err(e) = run.transition(RunState::Parsed) {
            log::error!("{e}");
        }
    }

    if log_ready {
        let report = parse_overall_statistics(&artifacts.err, &marker_waiter);
        run.overall = report.stats;
        if !report.complete {
            run.mark_incomplete(INCOMPLETE_COMMENT);
        }
    }
    run
}

/// Divide work items in to a set of subsets (per thread/worker), round robin
pub fn create_subsets<T>(items: Vec<T>, n_subsets: usize) -> Vec<Vec<T>> {
    let n_subsets = n_subsets.max(1);
    let mut subsets: Vec<Vec<T>> = (0..n_subsets).map(|_| Vec::new()).collect();
    for (idx, item) in items.into_iter().enumerate() {
        subsets[idx % n_subsets].push(item)
    }
    subsets
}

fn progress(done: usize, total: usize) -> f32 {
    if total == 0 {
        1.0
    } else {
        done as f32 / total as f32
    }
}

/// Prepare and submit a subset of runs. Runs that cannot be created are logged and skipped.
pub fn prepare_subset(
    config: &Config,
    context: &Context,
    tx: &Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<PlannedRun>,
) -> Result<Vec<Run>, ProcessorError> {
    let total = subset.len();
    let mut runs = Vec::with_capacity(total);
    for (idx, planned) in subset.iter().enumerate() {
        let label = planned.hkl.display().to_string();
        match prepare_run(config, context, planned) {
            Ok(run) => {
                log::info!("Submitted {} at {} A", run.name, run.resolution_cutoff);
                runs.push(run);
            }
            Err(e) => log::error!("Skipping {label}: {e}"),
        }
        tx.send(WorkerStatus::new(
            progress(idx + 1, total),
            &label,
            worker_id,
            Phase::Submit,
        ))?;
    }
    Ok(runs)
}

/// Collect the results of a subset of submitted runs
pub fn collect_subset(
    config: &Config,
    context: &Context,
    tx: &Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<Run>,
) -> Result<Vec<Run>, ProcessorError> {
    let total = subset.len();
    let mut runs = Vec::with_capacity(total);
    for (idx, run) in subset.into_iter().enumerate() {
        log::info!("Collecting statistics for {}...", run.name);
        let run = collect_run(config, context, run);
        tx.send(WorkerStatus::new(
            progress(idx + 1, total),
            &run.name,
            worker_id,
            Phase::Collect,
        ))?;
        runs.push(run);
    }
    Ok(runs)
}

/// Run `work` on every subset in its own thread and wait for all of them
fn run_pool<T, F>(
    config: &Config,
    context: &Context,
    tx: &Sender<WorkerStatus>,
    items: Vec<T>,
    work: F,
) -> Result<Vec<Run>, ProcessorError>
where
    T: Send + 'static,
    F: Fn(&Config, &Context, &Sender<WorkerStatus>, usize, Vec<T>) -> Result<Vec<Run>, ProcessorError>
        + Copy
        + Send
        + 'static,
{
    let subsets = create_subsets(items, config.n_threads.max(1) as usize);
    let handles: Vec<JoinHandle<Result<Vec<Run>, ProcessorError>>> = subsets
        .into_iter()
        .enumerate()
        .map(|(worker_id, subset)| {
            let config = config.clone();
            let context = context.clone();
            let tx = tx.clone();
            std::thread::spawn(move || work(&config, &context, &tx, worker_id, subset))
        })
        .collect();

    let mut runs = Vec::new();
    for (worker_id, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(result) => runs.extend(result?),
            Err(_) => return Err(ProcessorError::WorkerPanic(worker_id)),
        }
    }
    Ok(runs)
}

fn table_writer_path(config: &Config) -> Result<PathBuf, RunTableError> {
    let path = config.table_path();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(path)
}

/// Merge collected runs into a table. With `incremental` set, the surviving runs of this
/// batch are appended to the output once the batch is merged.
fn merge_runs(config: &Config, runs: Vec<Run>, incremental: bool) -> Result<RunTable, RunTableError> {
    let mut table = RunTable::new();
    for run in runs {
        table.insert(run);
    }
    if incremental {
        let path = table_writer_path(config)?;
        for run in table.runs() {
            append_csv(&path, run, config.extended, config.delimiter())?;
        }
    }
    Ok(table)
}

/// The full pass over a set of datasets: submit every run, wait for the queue to drain,
/// collect every run, merge.
fn process_datasets(
    config: &Config,
    context: &Context,
    tx: &Sender<WorkerStatus>,
    datasets: &[PathBuf],
    incremental: bool,
) -> Result<RunTable, ProcessorError> {
    let planned = plan_runs(datasets, config);
    log::info!(
        "Planned {} run(s) over {} dataset(s)",
        planned.len(),
        datasets.len()
    );

    let submitted = run_pool(config, context, tx, planned, prepare_subset)?;
    log::info!("Submitted {} run(s); waiting for the queue...", submitted.len());

    let poll = Duration::from_secs_f64(config.scheduler.poll_interval_secs.max(0.0));
    if drain_pending_jobs(
        context.orchestrator.as_ref(),
        config.scheduler.pending_threshold,
        poll,
        context.clock.as_ref(),
    ) == DrainOutcome::QueryFailed
    {
        log::warn!("Scheduler queue state unknown; collecting anyway");
    }

    let collected = run_pool(config, context, tx, submitted, collect_subset)?;
    let table = merge_runs(config, collected, incremental)?;
    if table.collisions() > 0 {
        log::warn!("{} run name collision(s) while merging", table.collisions());
    }
    Ok(table)
}

/// Process every discovered dataset and write the table.
///
/// With `append` set the table is written run by run; otherwise in one go at the end.
pub fn process(
    config: &Config,
    context: &Context,
    tx: &Sender<WorkerStatus>,
) -> Result<RunTable, ProcessorError> {
    let datasets = discover_datasets(config)?;
    log::info!("Found {} dataset(s)", datasets.len());
    let table = process_datasets(config, context, tx, &datasets, config.append)?;
    if !config.append {
        let path = table_writer_path(config)?;
        table.write_csv(&path, config.extended, config.delimiter())?;
    }
    Ok(table)
}

/// Process datasets that have not been seen before, appending their runs to the table file
pub fn process_new_datasets(
    config: &Config,
    context: &Context,
    tx: &Sender<WorkerStatus>,
    seen: &mut FxHashSet<PathBuf>,
) -> Result<RunTable, ProcessorError> {
    let fresh: Vec<PathBuf> = discover_datasets(config)?
        .into_iter()
        .filter(|path| !seen.contains(path))
        .collect();
    if fresh.is_empty() {
        return Ok(RunTable::new());
    }
    log::info!("Found {} new dataset(s)", fresh.len());
    seen.extend(fresh.iter().cloned());
    process_datasets(config, context, tx, &fresh, true)
}

/// Keep processing new datasets as they appear until `stop` is set
pub fn watch(
    config: &Config,
    context: &Context,
    tx: &Sender<WorkerStatus>,
    stop: &AtomicBool,
) -> Result<RunTable, ProcessorError> {
    let mut seen: FxHashSet<PathBuf> = FxHashSet::default();
    let mut table = RunTable::new();
    let poll = Duration::from_secs_f64(config.scheduler.poll_interval_secs.max(0.0));
    log::info!("Watching {} for new datasets...", config.data_path.display());
    while !stop.load(Ordering::Relaxed) {
        table.merge(process_new_datasets(config, context, tx, &mut seen)?);
        context.clock.sleep(poll);
    }
    log::info!("Stopped watching after {} run(s)", table.len());
    Ok(table)
}
