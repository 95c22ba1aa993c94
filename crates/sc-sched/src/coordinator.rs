//! One full calibration generation: dispatch → wait → evaluate → cleanup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use sc_constraints::FitnessEvaluator;
use sc_types::{CalResult, ParameterSpace, Particle, RunConfig};

use crate::backend::{make_backend, BackendKind};
use crate::job::EvaluationJob;
use crate::retry::RetryPolicy;
use crate::waiter::JobWaiter;
use crate::workspace::WorkspaceManager;

/// Subdirectory of the output root holding per-iteration track files.
const TRACKS_SUBDIR: &str = "tracks";

/// The contract the external swarm optimizer calls against, and the seam a
/// trained emulator would implement to substitute for real evaluation.
#[async_trait]
pub trait ParticleEvaluator: Send {
    /// Score one batch of particles. The returned vector has exactly the
    /// input's length and order.
    async fn evaluate(&mut self, particles: &[Particle]) -> CalResult<Vec<f64>>;
}

/// Checkpoint of one iteration: every particle position and its fitness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u64,
    pub positions: Vec<Particle>,
    pub fitness: Vec<f64>,
    pub created_at: DateTime<Utc>,
}

impl IterationRecord {
    /// Track file name for an iteration, zero-padded so lexical and
    /// numeric order agree.
    pub fn file_name(iteration: u64) -> String {
        format!("track_{iteration:05}.json")
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> CalResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> CalResult<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Orchestrates the evaluation of one optimizer generation after another.
///
/// Owns the monotonically increasing iteration counter; everything here
/// runs on the single orchestration task, so the counter is never touched
/// concurrently.
pub struct IterationCoordinator {
    id: Uuid,
    config: RunConfig,
    space: ParameterSpace,
    workspaces: WorkspaceManager,
    evaluator: FitnessEvaluator,
    retry: RetryPolicy,
    waiter: JobWaiter,
    iteration: u64,
    tracks_dir: PathBuf,
}

impl IterationCoordinator {
    pub fn new(
        config: RunConfig,
        space: ParameterSpace,
        evaluator: FitnessEvaluator,
    ) -> CalResult<Self> {
        config.validate()?;

        let workspaces = WorkspaceManager::new(&config, space.clone())?;
        let retry = RetryPolicy::from_config(&config.retry);
        let waiter = JobWaiter::new(&config);

        let tracks_dir = config.output_root.join(TRACKS_SUBDIR);
        fs::create_dir_all(&tracks_dir)?;

        Ok(Self {
            id: config.id,
            config,
            space,
            workspaces,
            evaluator,
            retry,
            waiter,
            iteration: 0,
            tracks_dir,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.id
    }

    /// The next iteration index this coordinator will dispatch.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Evaluate one generation of particles.
    ///
    /// Returns exactly `particles.len()` finite fitness values, index-aligned
    /// with the input; failed particles carry the penalty sentinel.
    pub async fn evaluate_batch(&mut self, particles: &[Particle]) -> CalResult<Vec<f64>> {
        let iteration = self.iteration;
        let kind = BackendKind::select(
            self.config.cpus_per_particle,
            self.config.direct_cpu_threshold,
        );
        let backend = make_backend(&self.config);
        info!(
            iteration,
            particles = particles.len(),
            backend = %kind,
            "dispatching generation"
        );

        // Dispatch: fire-and-forget, no blocking between submissions.
        let mut jobs = Vec::with_capacity(particles.len());
        for (index, particle) in particles.iter().enumerate() {
            self.space.validate(particle)?;
            let workspace = self.workspaces.create(iteration, index, particle)?;
            let mut job = EvaluationJob::new(index, particle.clone(), workspace);
            let handle = backend.submit(&job).await?;
            job.mark_submitted(handle);
            jobs.push(job);
        }

        // One blocking wait for the whole batch.
        self.waiter.wait_all(&mut jobs).await?;

        // Score each finished workspace behind the retry boundary; results
        // land at the particle's original index, never completion order.
        let mut fitness = vec![f64::NAN; particles.len()];
        for job in &mut jobs {
            let workspace_dir = job.workspace.dir.clone();
            let evaluator = &self.evaluator;
            let label = format!("iteration {iteration} particle {}", job.index);
            let outcome = self
                .retry
                .run(&label, || evaluator.evaluate(&workspace_dir))
                .await;

            let value = outcome.value();
            fitness[job.index] = value;
            if outcome.is_penalty() {
                job.mark_penalized(value);
                warn!(iteration, particle = job.index, penalty = value, "particle penalized");
            } else {
                job.mark_evaluated(value);
                info!(iteration, particle = job.index, fitness = value, "particle evaluated");
            }
        }

        // Cleanup is best-effort and never aborts the batch.
        for job in &jobs {
            self.workspaces.remove_job_temporaries(&job.workspace);
        }
        self.workspaces.cleanup_iteration(iteration);

        let record = IterationRecord {
            iteration,
            positions: particles.to_vec(),
            fitness: fitness.clone(),
            created_at: Utc::now(),
        };
        record.save(self.tracks_dir.join(IterationRecord::file_name(iteration)))?;

        self.iteration += 1;
        Ok(fitness)
    }

    /// Write the best particle and its fitness to a caller-specified path:
    /// one tab-separated line of parameter values, then the scalar.
    pub fn export_best_csv<P: AsRef<Path>>(
        &self,
        path: P,
        particle: &[f64],
        fitness: f64,
    ) -> CalResult<()> {
        let export_err =
            |e: csv::Error| sc_types::CalError::Internal(format!("csv export failed: {e}"));

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_path(path.as_ref())
            .map_err(export_err)?;

        let values: Vec<String> = particle.iter().map(|v| v.to_string()).collect();
        writer.write_record(&values).map_err(export_err)?;
        writer.write_record([fitness.to_string()]).map_err(export_err)?;
        writer.flush()?;

        Ok(())
    }
}

#[async_trait]
impl ParticleEvaluator for IterationCoordinator {
    async fn evaluate(&mut self, particles: &[Particle]) -> CalResult<Vec<f64>> {
        IterationCoordinator::evaluate_batch(self, particles).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_file_names_are_zero_padded() {
        assert_eq!(IterationRecord::file_name(0), "track_00000.json");
        assert_eq!(IterationRecord::file_name(123), "track_00123.json");
    }

    #[test]
    fn record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let record = IterationRecord {
            iteration: 4,
            positions: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
            fitness: vec![1.0, 2.0],
            created_at: Utc::now(),
        };

        let path = dir.path().join(IterationRecord::file_name(4));
        record.save(&path).unwrap();
        let loaded = IterationRecord::load(&path).unwrap();
        assert_eq!(loaded, record);
    }
}
