#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    /// Resolving inputs and submitting jobs
    #[default]
    Submit,
    /// Waiting on and parsing job output
    Collect,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BarColor {
    #[default]
    CYAN,
    GREEN,
}

impl Phase {
    pub fn color(&self) -> BarColor {
        match self {
            Self::Submit => BarColor::GREEN,
            Self::Collect => BarColor::CYAN,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub run_name: String,
    pub worker_id: usize,
    pub phase: Phase,
}

impl WorkerStatus {
    pub fn new(progress: f32, run_name: &str, worker_id: usize, phase: Phase) -> Self {
        Self {
            progress,
            run_name: run_name.to_string(),
            worker_id,
            phase,
        }
    }
}
