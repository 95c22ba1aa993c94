//! Execution backends: one strategy interface over local processes and
//! cluster batch queues.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

use sc_types::{CalResult, RunConfig, SubmissionError};

use crate::job::EvaluationJob;
use crate::queue::QueueBackend;

/// Which execution strategy an iteration runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Direct,
    Queue,
}

impl BackendKind {
    /// Pure selection rule: the batch queue takes over when per-particle
    /// CPU demand exceeds the local-execution threshold. Decided once per
    /// iteration, never per particle.
    pub fn select(cpus_per_particle: usize, direct_cpu_threshold: usize) -> Self {
        if cpus_per_particle > direct_cpu_threshold {
            Self::Queue
        } else {
            Self::Direct
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

/// Backend-specific handle to one submitted job.
#[derive(Debug)]
pub enum JobHandle {
    /// A spawned local process.
    Process(Child),
    /// A batch job accepted by the cluster scheduler.
    Batch { job_id: u64 },
}

/// Execution strategy for one iteration's jobs.
///
/// `submit` must return without waiting for completion; blocking on the
/// batch happens once, in the waiter.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Hand one rendered job to the execution layer. Fire-and-forget: the
    /// returned handle is only ever interpreted by the waiter.
    async fn submit(&self, job: &EvaluationJob) -> CalResult<JobHandle>;
}

/// Build the backend selected by the run configuration. Called once per
/// iteration.
pub fn make_backend(config: &RunConfig) -> Box<dyn ExecutionBackend> {
    match BackendKind::select(config.cpus_per_particle, config.direct_cpu_threshold) {
        BackendKind::Direct => Box::new(DirectBackend::new(config)),
        BackendKind::Queue => Box::new(QueueBackend::new(config)),
    }
}

/// Runs one simulation process per particle on the local machine. All
/// spawned processes run concurrently; nothing here waits on them.
#[derive(Debug)]
pub struct DirectBackend {
    binary: PathBuf,
    ranks: usize,
    launcher: Option<String>,
}

impl DirectBackend {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            binary: config.simulation_binary.clone(),
            ranks: config.cpus_per_particle,
            launcher: config.launcher.clone(),
        }
    }
}

#[async_trait]
impl ExecutionBackend for DirectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    async fn submit(&self, job: &EvaluationJob) -> CalResult<JobHandle> {
        let mut command = match &self.launcher {
            Some(launcher) => {
                let mut c = Command::new(launcher);
                c.arg("-np").arg(self.ranks.to_string()).arg(&self.binary);
                c
            }
            None => Command::new(&self.binary),
        };

        let child = command
            .arg(&job.workspace.param_file)
            .current_dir(&job.workspace.dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SubmissionError::SpawnFailed {
                binary: self.binary.display().to_string(),
                message: e.to_string(),
            })?;

        debug!(
            particle = job.index,
            pid = child.id(),
            "simulation process spawned"
        );

        Ok(JobHandle::Process(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_selected_above_threshold() {
        assert_eq!(BackendKind::select(8, 4), BackendKind::Queue);
    }

    #[test]
    fn direct_selected_at_or_below_threshold() {
        assert_eq!(BackendKind::select(2, 4), BackendKind::Direct);
        assert_eq!(BackendKind::select(4, 4), BackendKind::Direct);
    }

    #[test]
    fn factory_follows_selection() {
        let direct = RunConfig::new("run", "/bin/sim", "/tmp/t.cfg", "/tmp/out");
        assert_eq!(make_backend(&direct).kind(), BackendKind::Direct);

        let queued = RunConfig::new("run", "/bin/sim", "/tmp/t.cfg", "/tmp/out")
            .with_cpus_per_particle(8);
        assert_eq!(make_backend(&queued).kind(), BackendKind::Queue);
    }
}
