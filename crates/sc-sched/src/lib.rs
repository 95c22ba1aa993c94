//! # sc-sched
//!
//! Distributed particle-evaluation scheduling for SwarmCal.
//!
//! One optimizer generation flows through this crate: per-particle
//! workspaces are allocated and rendered, jobs are dispatched through an
//! execution backend (local processes or a cluster batch queue), a single
//! waiter blocks on the whole batch, and retry-wrapped fitness evaluation
//! turns each finished workspace into one scalar.

mod backend;
mod coordinator;
mod job;
mod queue;
mod retry;
mod waiter;
mod workspace;

pub use backend::{make_backend, BackendKind, DirectBackend, ExecutionBackend, JobHandle};
pub use coordinator::{IterationCoordinator, IterationRecord, ParticleEvaluator};
pub use job::{EvaluationJob, JobDiagnostics, JobState};
pub use queue::{count_pending, parse_job_id, QueueBackend, QueueFilter};
pub use retry::{RetryOutcome, RetryPolicy, PENALTY_FITNESS};
pub use waiter::JobWaiter;
pub use workspace::{Workspace, WorkspaceManager};
