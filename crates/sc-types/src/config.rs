//! Run configuration for the particle-evaluation scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::errors::{CalResult, ConfigError};

/// Bounded-retry settings for per-particle evaluation failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum evaluation attempts per particle.
    pub max_attempts: u32,
    /// Delay between attempts, in seconds.
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_secs: 30,
        }
    }
}

/// Batch-queue settings used when the queue backend is selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Batch submission command (e.g. "sbatch").
    pub submit_command: String,
    /// Queue listing command (e.g. "squeue").
    pub stat_command: String,
    /// Submitting user for queue-count filtering. When absent, counting
    /// falls back to matching the run's job name.
    pub user: Option<String>,
    /// Charge account, when the cluster requires one.
    pub account: Option<String>,
    /// Target partition/queue name.
    pub partition: Option<String>,
    /// Walltime limit in scheduler format.
    pub walltime: String,
    /// Memory per task, in MiB.
    pub memory_per_task_mb: u64,
    /// Local scratch request per job, in MiB.
    pub scratch_mb: u64,
    /// Interval between queue polls, in seconds.
    pub poll_interval_secs: u64,
    /// Extra wait after the queue drains; staged results may lag behind
    /// queue-empty on shared storage.
    pub settle_delay_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            submit_command: "sbatch".to_string(),
            stat_command: "squeue".to_string(),
            user: None,
            account: None,
            partition: None,
            walltime: "08:00:00".to_string(),
            memory_per_task_mb: 1500,
            scratch_mb: 4096,
            poll_interval_secs: 60,
            settle_delay_secs: 60,
        }
    }
}

/// Top-level configuration for a calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub id: Uuid,

    /// Short name for this run; also the scheduler job name, so it must be
    /// unique among the user's concurrently queued runs.
    pub run_name: String,

    /// The wrapped simulation executable.
    pub simulation_binary: PathBuf,

    /// Template parameter file rendered once per particle.
    pub template_path: PathBuf,

    /// Root directory under which per-iteration workspaces are created.
    pub output_root: PathBuf,

    /// Leading token of the template line that names the simulation's
    /// output directory.
    pub output_dir_key: String,

    /// Parallel ranks each simulation instance runs with.
    pub cpus_per_particle: usize,

    /// Above this many CPUs per particle, evaluation moves to the batch
    /// queue instead of local processes.
    pub direct_cpu_threshold: usize,

    /// Parallel launcher (e.g. "mpirun"). `None` runs the binary bare.
    pub launcher: Option<String>,

    /// Simulation subvolumes each constraint reader aggregates over.
    pub subvolumes: Vec<u32>,

    /// Keep per-particle workspaces after evaluation instead of deleting
    /// them.
    pub keep_artifacts: bool,

    pub retry: RetryConfig,

    pub queue: QueueConfig,

    pub created_at: DateTime<Utc>,
}

impl RunConfig {
    pub fn new(
        run_name: impl Into<String>,
        simulation_binary: impl Into<PathBuf>,
        template_path: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_name: run_name.into(),
            simulation_binary: simulation_binary.into(),
            template_path: template_path.into(),
            output_root: output_root.into(),
            output_dir_key: "OutputDir".to_string(),
            cpus_per_particle: 1,
            direct_cpu_threshold: 4,
            launcher: None,
            subvolumes: vec![0],
            keep_artifacts: false,
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_cpus_per_particle(mut self, n: usize) -> Self {
        self.cpus_per_particle = n;
        self
    }

    pub fn with_direct_cpu_threshold(mut self, n: usize) -> Self {
        self.direct_cpu_threshold = n;
        self
    }

    pub fn with_launcher(mut self, launcher: impl Into<String>) -> Self {
        self.launcher = Some(launcher.into());
        self
    }

    pub fn with_subvolumes(mut self, subvolumes: Vec<u32>) -> Self {
        self.subvolumes = subvolumes;
        self
    }

    pub fn with_keep_artifacts(mut self, keep: bool) -> Self {
        self.keep_artifacts = keep;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_output_dir_key(mut self, key: impl Into<String>) -> Self {
        self.output_dir_key = key.into();
        self
    }

    /// Load a run configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> CalResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Whether per-particle CPU demand moves this run onto the batch queue.
    pub fn uses_queue(&self) -> bool {
        self.cpus_per_particle > self.direct_cpu_threshold
    }

    /// Check fatal configuration errors up front: missing simulation
    /// binary, unreadable template, and missing scheduler commands when the
    /// queue backend would be selected.
    pub fn validate(&self) -> CalResult<()> {
        if !self.simulation_binary.is_file() {
            return Err(ConfigError::SimulationBinaryMissing {
                path: self.simulation_binary.display().to_string(),
            }
            .into());
        }

        if let Err(e) = std::fs::metadata(&self.template_path) {
            return Err(ConfigError::TemplateUnreadable {
                path: self.template_path.display().to_string(),
                message: e.to_string(),
            }
            .into());
        }

        if self.subvolumes.is_empty() {
            return Err(ConfigError::Invalid {
                message: "at least one subvolume is required".to_string(),
            }
            .into());
        }

        if self.uses_queue() {
            for command in [&self.queue.submit_command, &self.queue.stat_command] {
                if !command_available(command) {
                    return Err(ConfigError::SchedulerMissing {
                        command: command.clone(),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }
}

/// Whether a command can be invoked: an existing file for explicit paths,
/// otherwise a PATH lookup.
fn command_available(command: &str) -> bool {
    let path = Path::new(command);
    if path.components().count() > 1 {
        return path.is_file();
    }

    let Some(search_path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&search_path).any(|dir| dir.join(command).is_file())
}
