//! Batch-completion detection for one iteration's jobs.

use std::time::Duration;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{info, warn};

use sc_types::{internal_error, CalResult, ConfigError, RunConfig};

use crate::backend::JobHandle;
use crate::job::{EvaluationJob, JobDiagnostics};
use crate::queue::{count_pending, QueueFilter};

/// Blocks until every job of one iteration has finished, regardless of
/// backend. Only detects "finished"; success or failure is judged later,
/// by evaluation.
pub struct JobWaiter {
    stat_command: String,
    filter: QueueFilter,
    poll_interval: Duration,
    settle_delay: Duration,
}

impl JobWaiter {
    pub fn new(config: &RunConfig) -> Self {
        let filter = match &config.queue.user {
            Some(user) => QueueFilter::User(user.clone()),
            None => QueueFilter::JobName(config.run_name.clone()),
        };

        Self {
            stat_command: config.queue.stat_command.clone(),
            filter,
            poll_interval: Duration::from_secs(config.queue.poll_interval_secs),
            settle_delay: Duration::from_secs(config.queue.settle_delay_secs),
        }
    }

    /// Wait for the whole batch. Process handles are joined one by one
    /// (order-independent, and every join must complete before returning);
    /// batch handles are covered by polling the queue until it drains.
    pub async fn wait_all(&self, jobs: &mut [EvaluationJob]) -> CalResult<()> {
        let mut batch_pending = false;

        for job in jobs.iter_mut() {
            job.mark_running();
            match job.take_handle() {
                Some(JobHandle::Process(child)) => {
                    match child.wait_with_output().await {
                        Ok(output) => {
                            if !output.status.success() {
                                warn!(
                                    particle = job.index,
                                    status = %output.status,
                                    "simulation process exited abnormally"
                                );
                            }
                            job.set_diagnostics(JobDiagnostics {
                                exit_code: output.status.code(),
                                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                            });
                        }
                        Err(e) => {
                            // The process is gone either way; record what we
                            // know and let evaluation judge the workspace.
                            warn!(particle = job.index, error = %e, "process join failed");
                            job.set_diagnostics(JobDiagnostics {
                                exit_code: None,
                                stdout: String::new(),
                                stderr: e.to_string(),
                            });
                        }
                    }
                }
                Some(JobHandle::Batch { .. }) => {
                    batch_pending = true;
                }
                None => {
                    return Err(internal_error!(
                        "job {} reached the waiter without a handle",
                        job.index
                    ));
                }
            }
        }

        if batch_pending {
            self.poll_until_drained().await?;
        }

        for job in jobs.iter_mut() {
            job.mark_finished();
        }

        Ok(())
    }

    /// Poll the scheduler's outstanding-job count until it reaches zero,
    /// then sleep one settle delay, since staged results can lag behind
    /// queue-empty on shared storage.
    async fn poll_until_drained(&self) -> CalResult<()> {
        loop {
            match self.query_pending().await? {
                Some(0) => break,
                Some(pending) => {
                    info!(pending, "jobs still queued");
                }
                None => {}
            }
            sleep(self.poll_interval).await;
        }

        sleep(self.settle_delay).await;
        Ok(())
    }

    /// One queue-listing invocation. `None` means the listing could not be
    /// taken this round (transient scheduler hiccup); keep polling.
    async fn query_pending(&self) -> CalResult<Option<usize>> {
        let mut command = Command::new(&self.stat_command);
        if let QueueFilter::User(user) = &self.filter {
            command.arg("-u").arg(user);
        }

        let output = command.output().await.map_err(|_| ConfigError::SchedulerMissing {
            command: self.stat_command.clone(),
        })?;

        if !output.status.success() {
            warn!(
                status = %output.status,
                "queue listing failed, retrying next poll"
            );
            return Ok(None);
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(Some(count_pending(&listing, &self.filter)))
    }
}
