//! Cluster batch-queue backend: wrapper-script generation, submission, and
//! queue-listing helpers.

use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use sc_types::{CalResult, QueueConfig, RunConfig, SubmissionError};

use crate::backend::{BackendKind, ExecutionBackend, JobHandle};
use crate::job::EvaluationJob;
use crate::workspace::{OUTPUT_SUBDIR, SUBMIT_SCRIPT};

/// Submits one batch job per particle with stage-run-copyback semantics.
///
/// The generated wrapper script stages a scratch working directory, runs
/// the simulation there under the parallel launcher, and copies results
/// back to the permanent workspace, exiting non-zero when the staged
/// output is empty, so the scheduler records the job as failed.
pub struct QueueBackend {
    binary: PathBuf,
    ranks: usize,
    launcher: Option<String>,
    /// Run-wide scheduler job name; queue counting matches on it when no
    /// user filter is configured.
    job_name: String,
    queue: QueueConfig,
}

impl QueueBackend {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            binary: config.simulation_binary.clone(),
            ranks: config.cpus_per_particle,
            launcher: config.launcher.clone(),
            job_name: config.run_name.clone(),
            queue: config.queue.clone(),
        }
    }

    /// Render the wrapper script for one job.
    fn render_script(&self, job: &EvaluationJob) -> String {
        let workspace = &job.workspace;
        let param_name = workspace
            .param_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "params.cfg".to_string());

        let launch = match &self.launcher {
            Some(launcher) => format!("{} -np {} ", launcher, self.ranks),
            None => String::new(),
        };

        let mut directives = vec![
            format!("#SBATCH --job-name={}", self.job_name),
            format!("#SBATCH --ntasks={}", self.ranks),
            format!("#SBATCH --mem-per-cpu={}M", self.queue.memory_per_task_mb),
            format!("#SBATCH --tmp={}M", self.queue.scratch_mb),
            format!("#SBATCH --time={}", self.queue.walltime),
        ];
        if let Some(account) = &self.queue.account {
            directives.push(format!("#SBATCH --account={account}"));
        }
        if let Some(partition) = &self.queue.partition {
            directives.push(format!("#SBATCH --partition={partition}"));
        }

        format!(
            r#"#!/bin/bash
{directives}

WORKSPACE="{workspace}"
SCRATCH="${{TMPDIR:-/tmp}}/{job_name}-i{iteration}-p{index}"

rm -rf "$SCRATCH"
mkdir -p "$SCRATCH/{output}"
cp "$WORKSPACE/{param_name}" "$SCRATCH/"
sed -i "s|$WORKSPACE/{output}|$SCRATCH/{output}|" "$SCRATCH/{param_name}"
cd "$SCRATCH"

{launch}"{binary}" "{param_name}"

if [ -z "$(ls -A "$SCRATCH/{output}" 2>/dev/null)" ]; then
    echo "no staged output produced" >&2
    exit 1
fi
mkdir -p "$WORKSPACE/{output}"
cp -r "$SCRATCH/{output}/." "$WORKSPACE/{output}/"
rm -rf "$SCRATCH"
"#,
            directives = directives.join("\n"),
            workspace = workspace.dir.display(),
            job_name = self.job_name,
            iteration = workspace.iteration,
            index = workspace.index,
            output = OUTPUT_SUBDIR,
            param_name = param_name,
            launch = launch,
            binary = self.binary.display(),
        )
    }
}

#[async_trait]
impl ExecutionBackend for QueueBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Queue
    }

    async fn submit(&self, job: &EvaluationJob) -> CalResult<JobHandle> {
        let script_path = job.workspace.dir.join(SUBMIT_SCRIPT);
        fs::write(&script_path, self.render_script(job))?;
        debug!(particle = job.index, script = %script_path.display(), "submit script written");

        let output = Command::new(&self.queue.submit_command)
            .arg(&script_path)
            .current_dir(&job.workspace.dir)
            .output()
            .await
            .map_err(|e| SubmissionError::SpawnFailed {
                binary: self.queue.submit_command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(SubmissionError::CommandFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = parse_job_id(&stdout).ok_or_else(|| SubmissionError::JobIdUnparsable {
            output: stdout.trim().to_string(),
        })?;

        info!(particle = job.index, job_id, "batch job submitted");
        Ok(JobHandle::Batch { job_id })
    }
}

/// Parse the scheduler-assigned job id from submit-command output, e.g.
/// `Submitted batch job 123456`. The last numeric token wins.
pub fn parse_job_id(output: &str) -> Option<u64> {
    output
        .split_whitespace()
        .filter_map(|token| token.parse().ok())
        .next_back()
}

/// How outstanding jobs are identified in a queue listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueFilter {
    /// Listing was already filtered to one user by the stat command; count
    /// its lines minus the header.
    User(String),
    /// Match the run's job name as an exact whitespace-separated field.
    JobName(String),
}

/// Count outstanding jobs in a captured scheduler listing.
pub fn count_pending(listing: &str, filter: &QueueFilter) -> usize {
    let lines = listing.lines().filter(|l| !l.trim().is_empty());
    match filter {
        QueueFilter::User(_) => lines.count().saturating_sub(1),
        QueueFilter::JobName(name) => lines
            .filter(|line| line.split_whitespace().any(|field| field == name))
            .count(),
    }
}
