use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};

use libmerge_stats::config::Config;
use libmerge_stats::orchestrator::SlurmOrchestrator;
use libmerge_stats::process::{process, watch, Context};
use libmerge_stats::waiter::SystemClock;
use libmerge_stats::worker_status::{BarColor, WorkerStatus};

fn make_template_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config)?;
    let mut file = File::create(path)?;
    file.write_all(yaml_str.as_bytes())?;
    Ok(())
}

fn bar_style(color: BarColor) -> ProgressStyle {
    let template = match color {
        BarColor::CYAN => "[{prefix}] {bar:40.cyan/blue} {pos:>3}% {msg}",
        BarColor::GREEN => "[{prefix}] {bar:40.green/white} {pos:>3}% {msg}",
    };
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn update_bar(bars: &[ProgressBar], status: WorkerStatus) {
    let Some(bar) = bars.get(status.worker_id) else {
        return;
    };
    bar.set_style(bar_style(status.phase.color()));
    bar.set_position((status.progress * 100.0) as u64);
    bar.set_message(status.run_name);
}

fn main() {
    // Create a cli
    let matches = Command::new("merge_stats_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
        return;
    }

    // Parse the cli
    let Some(config_path) = matches.get_one::<String>("path").map(PathBuf::from) else {
        log::error!("A configuration path is required");
        return;
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        match make_template_config(&config_path) {
            Ok(()) => log::info!("Done."),
            Err(e) => log::error!("Failed to write template config: {e}"),
        }
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    match &config.block_file {
        Some(block) => log::info!("Block file: {}", block.to_string_lossy()),
        None => log::info!("Data Path: {}", config.data_path.to_string_lossy()),
    }
    log::info!("Output Table: {}", config.table_path().to_string_lossy());
    if let Some(pattern) = &config.pattern {
        log::info!("Pattern: {pattern}");
    }
    if let Some(refinement) = &config.refinement_path {
        log::info!("Refinement Path: {}", refinement.to_string_lossy());
    }
    log::info!(
        "Default cut-off: {} Offsets: {:?}",
        config.default_cutoff,
        config.offsets
    );
    log::info!("Partition: {}", config.scheduler.partition);
    log::info!("Is Online: {}", config.online);

    // Setup the progress bars, one per worker
    let bars: Vec<ProgressBar> = (0..config.n_threads)
        .map(|id| {
            let bar = pb_manager.add(ProgressBar::new(100));
            bar.set_style(bar_style(BarColor::default()));
            bar.set_prefix(format!("Worker {id}"));
            bar
        })
        .collect();

    let context = Context::new(
        Arc::new(SlurmOrchestrator::new(config.scheduler.clone())),
        Arc::new(SystemClock::default()),
    );
    let (tx, rx) = mpsc::channel::<WorkerStatus>();

    // Spawn the task! Online mode runs until the process is interrupted.
    let handle = std::thread::spawn(move || {
        if config.online {
            let stop = AtomicBool::new(false);
            watch(&config, &context, &tx, &stop)
        } else {
            process(&config, &context, &tx)
        }
    });

    loop {
        // No UI event loop here, so check in on the workers about once a second
        std::thread::sleep(std::time::Duration::from_secs(1));
        for status in rx.try_iter() {
            update_bar(&bars, status);
        }

        if handle.is_finished() {
            match handle.join() {
                Ok(result) => match result {
                    Ok(table) => log::info!("Successfully tabulated {} run(s)!", table.len()),
                    Err(e) => log::error!("Processing failed with error: {e}"),
                },
                Err(_) => log::error!("Failed to join processing task!"),
            }
            break;
        }
    }

    for bar in bars {
        bar.finish();
    }

    log::info!("Done.");
}
