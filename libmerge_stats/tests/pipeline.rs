use fxhash::FxHashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use libmerge_stats::config::Config;
use libmerge_stats::error::OrchestratorError;
use libmerge_stats::orchestrator::{JobArtifacts, JobOrchestrator, JobRequest};
use libmerge_stats::overall::INCOMPLETE_COMMENT;
use libmerge_stats::process::{process, process_new_datasets, watch, Context};
use libmerge_stats::run::RunState;
use libmerge_stats::waiter::{Clock, ManualClock, WaitPolicy};

const CCSTAR: &str = "  1/d centre         CC*    nref      d / A   Min 1/nm   Max 1/nm
 3.333     0.9900     2000      3.00      3.000      3.600
 5.000     0.9000     1800      2.00      4.800      5.200
 6.667     0.5000     1500      1.50      6.500      6.800
";
const RSPLIT: &str = "  1/d centre    Rsplit/%    nref      d / A   Min 1/nm   Max 1/nm
 3.333      5.0000     2000      3.00      3.000      3.600
 5.000     40.0000     1800      2.00      4.800      5.200
 6.667     80.0000     1500      1.50      6.500      6.800
";
const CC: &str = "  1/d centre          CC    nref      d / A   Min 1/nm   Max 1/nm
 3.333      0.9800     2000      3.00      3.000      3.600
 5.000      0.6000     1800      2.00      4.800      5.200
 6.667      0.2000     1500      1.50      6.500      6.800
";
const SNR: &str = "Center 1/nm  # refs Possible  Compl  Meas   Red   SNR  Mean  d(A)  Min 1/nm   Max 1/nm
 3.333  2000  2000  100.00  40000  20.0  15.00  300.0  3.00  3.000  3.600
 5.000  1800  1800  100.00  30000  16.6   3.00   80.0  2.00  4.800  5.200
 6.667  1187  1200   98.90   9000   7.58  0.80   12.0  1.50  6.500  6.800
";
const PARTIAL_LOG: &str = "Fixed resolution range: 1.0 to 6.8 1/nm (10.00 to 1.47 Angstroms)
Overall CC* = 0.9876
Overall Rsplit = 12.34 %
Overall CC = 0.9512
Overall CCano = 0.0123
1234567 measurements in total.
54321 reflections in total.
Overall <snr> = 7.65
Overall redundancy = 22.7 measurements/unique reflection
Overall completeness = 99.9 %
";

/// Writes every artifact at submission, as if the job finished instantly. Runs whose name
/// starts with one of `truncated` get a log without the Wilson B-factor line.
#[derive(Default)]
struct InstantOrchestrator {
    truncated: Vec<String>,
    submitted: Mutex<Vec<JobRequest>>,
}

impl JobOrchestrator for InstantOrchestrator {
    fn submit(&self, request: &JobRequest) -> Result<JobArtifacts, OrchestratorError> {
        let artifacts = JobArtifacts::for_run(&request.work_dir, &request.name);
        std::fs::write(&artifacts.ccstar, CCSTAR)?;
        std::fs::write(&artifacts.rsplit, RSPLIT)?;
        std::fs::write(&artifacts.cc, CC)?;
        std::fs::write(&artifacts.ccano, CC)?;
        std::fs::write(&artifacts.snr, SNR)?;
        std::fs::write(&artifacts.wilson, "B = 23.45 A^2\n")?;
        let log = if self.truncated.iter().any(|t| request.name.starts_with(t)) {
            PARTIAL_LOG.to_string()
        } else {
            format!("{PARTIAL_LOG}B = 23.45 A^2\n")
        };
        std::fs::write(&artifacts.err, log)?;
        self.submitted.lock().unwrap().push(request.clone());
        Ok(artifacts)
    }

    fn pending_jobs(&self) -> Result<usize, OrchestratorError> {
        Ok(0)
    }
}

/// Sets the stop flag the first time anyone sleeps on it
struct StoppingClock {
    inner: ManualClock,
    stop: Arc<AtomicBool>,
}

impl Clock for StoppingClock {
    fn now(&self) -> Duration {
        self.inner.now()
    }

    fn sleep(&self, duration: Duration) {
        self.inner.sleep(duration);
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn write_dataset(root: &Path, stem: &str, with_split_files: bool) -> PathBuf {
    let dir = root.join(stem);
    std::fs::create_dir_all(&dir).unwrap();
    let cell = dir.join(format!("{stem}.cell"));
    std::fs::write(
        &cell,
        "CrystFEL unit cell file version 1.0\n\na = 79.10 A\nb = 79.10 A\nc = 38.00 A\n\
         al = 90.00 deg\nbe = 90.00 deg\nga = 90.00 deg\n",
    )
    .unwrap();
    let hkl = dir.join(format!("{stem}.hkl"));
    std::fs::write(
        &hkl,
        format!(
            "CrystFEL reflection list version 2.0\nSymmetry: 4/mmm\n\
             End of reflections\n\
             indexamajig -i files.lst -o {stem}.stream -g det.geom -p {}\n",
            cell.display()
        ),
    )
    .unwrap();
    if with_split_files {
        std::fs::write(dir.join(format!("{stem}.hkl1")), "half").unwrap();
        std::fs::write(dir.join(format!("{stem}.hkl2")), "half").unwrap();
    }
    std::fs::write(
        dir.join(format!("{stem}.stream")),
        "Image filename: a.cxi\nhit = 1\nindexed_by = xgandalf\n--- Begin crystal\n\
         Image filename: b.cxi\nhit = 0\nindexed_by = none\n",
    )
    .unwrap();
    hkl
}

fn test_config(root: &Path) -> Config {
    Config {
        data_path: root.join("data"),
        output_path: root.join("out").join("table.csv"),
        n_threads: 2,
        marker_wait: WaitPolicy::new(2.0, 40.0),
        artifact_wait: WaitPolicy::new(5.0, 60.0),
        ..Default::default()
    }
}

#[test]
fn test_full_pass() {
    let root = tempfile::tempdir().unwrap();
    let data = root.path().join("data");
    write_dataset(&data, "lyso", true);
    write_dataset(&data, "thau", true);
    write_dataset(&data, "broken", false);

    let config = test_config(root.path());
    let orchestrator = Arc::new(InstantOrchestrator {
        truncated: vec![String::from("thau")],
        ..Default::default()
    });
    let context = Context::new(orchestrator.clone(), Arc::new(ManualClock::new()));
    let (tx, rx) = mpsc::channel();

    let table = process(&config, &context, &tx).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(orchestrator.submitted.lock().unwrap().len(), 2);
    assert!(rx.try_iter().count() > 0);

    let lyso = table.get("lyso").unwrap();
    assert_eq!(lyso.state(), RunState::Finalized);
    assert_eq!(lyso.comment(), "");
    assert_eq!(lyso.overall.wilson_b, Some(23.45));
    assert_eq!(lyso.shell.as_ref().unwrap().label, "1.50");
    assert_eq!(lyso.stream.chunks, 2);
    assert_eq!(lyso.stream.indexed_patterns, 1);
    assert_eq!(lyso.unit_cell.unwrap().c, 38.0);
    let crossing = lyso.intersection.unwrap().found().unwrap();
    assert!(crossing > 1.6 && crossing < 1.7);
    let cc_cut = lyso.resolution_cc.unwrap();
    assert!((cc_cut - 1.625).abs() < 1e-9);
    assert!(lyso.resolution_snr_one.is_some());

    let thau = table.get("thau").unwrap();
    assert_eq!(thau.state(), RunState::Incomplete);
    assert_eq!(thau.comment(), INCOMPLETE_COMMENT);
    assert_eq!(thau.overall.cc_star, Some(0.9876));
    assert_eq!(thau.overall.total_measurements, Some(1234567));
    assert_eq!(thau.overall.wilson_b, None);

    let written = std::fs::read_to_string(config.table_path()).unwrap();
    assert_eq!(written.lines().count(), 3);
    assert!(written.contains(INCOMPLETE_COMMENT));
}

#[test]
fn test_cutoff_and_offsets_reach_the_job() {
    let root = tempfile::tempdir().unwrap();
    let data = root.path().join("data");
    let hkl = write_dataset(&data, "lyso", true);
    // Statistics from an earlier pass put both estimates below the floor
    let dir = hkl.parent().unwrap();
    std::fs::write(dir.join("lyso_SNR.dat"), SNR).unwrap();
    std::fs::write(dir.join("lyso_CC.dat"), CC).unwrap();

    let config = Config {
        offsets: vec![0.2],
        default_cutoff: 1.7,
        ..test_config(root.path())
    };
    let orchestrator = Arc::new(InstantOrchestrator::default());
    let context = Context::new(orchestrator.clone(), Arc::new(ManualClock::new()));
    let (tx, _rx) = mpsc::channel();

    let table = process(&config, &context, &tx).unwrap();
    assert_eq!(table.len(), 2);
    assert!(table.get("lyso_offset_0_2").is_some());
    assert!(table.get("lyso_offset_0_0").is_some());

    let submitted = orchestrator.submitted.lock().unwrap();
    let mut cutoffs: Vec<f64> = submitted.iter().map(|r| r.high_res).collect();
    cutoffs.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(cutoffs, vec![1.7, 1.9]);
    assert!(submitted.iter().all(|r| r.point_group == "4/mmm"));
}

#[test]
fn test_new_datasets_are_appended_once() {
    let root = tempfile::tempdir().unwrap();
    let data = root.path().join("data");
    write_dataset(&data, "lyso", true);

    let config = test_config(root.path());
    let context = Context::new(
        Arc::new(InstantOrchestrator::default()),
        Arc::new(ManualClock::new()),
    );
    let (tx, _rx) = mpsc::channel();
    let mut seen = FxHashSet::default();

    assert_eq!(process_new_datasets(&config, &context, &tx, &mut seen).unwrap().len(), 1);
    assert!(process_new_datasets(&config, &context, &tx, &mut seen).unwrap().is_empty());

    write_dataset(&data, "thau", true);
    let table = process_new_datasets(&config, &context, &tx, &mut seen).unwrap();
    assert!(table.get("thau").is_some());

    let written = std::fs::read_to_string(config.table_path()).unwrap();
    assert_eq!(written.lines().count(), 3);
}

#[test]
fn test_watch_stops() {
    let root = tempfile::tempdir().unwrap();
    let data = root.path().join("data");
    write_dataset(&data, "lyso", true);

    let config = test_config(root.path());
    let stop = Arc::new(AtomicBool::new(false));
    let clock = Arc::new(StoppingClock {
        inner: ManualClock::new(),
        stop: stop.clone(),
    });
    let context = Context::new(Arc::new(InstantOrchestrator::default()), clock);
    let (tx, _rx) = mpsc::channel();

    let table = watch(&config, &context, &tx, &stop).unwrap();
    assert_eq!(table.len(), 1);
}
