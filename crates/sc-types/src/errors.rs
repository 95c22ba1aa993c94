use thiserror::Error;

/// Main error type for the SwarmCal system
#[derive(Error, Debug)]
pub enum CalError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Fatal configuration errors. These abort the run before any particle is
/// dispatched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Simulation binary not found: {path}")]
    SimulationBinaryMissing { path: String },

    #[error("Scheduler command not found: {command}")]
    SchedulerMissing { command: String },

    #[error("Parameter template unreadable: {path}: {message}")]
    TemplateUnreadable { path: String, message: String },

    #[error("Workspace directory already exists: {path}")]
    WorkspaceCollision { path: String },

    #[error("Invalid parameter space: {message}")]
    InvalidParameterSpace { message: String },

    #[error("Particle outside parameter bounds: {message}")]
    ParticleOutOfBounds { message: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Errors raised while handing a job to an execution backend. Fatal for the
/// affected job and raised before any retry or penalty logic runs.
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Failed to launch {binary}: {message}")]
    SpawnFailed { binary: String, message: String },

    #[error("Submit command exited with status {status}: {stderr}")]
    CommandFailed { status: i32, stderr: String },

    #[error("Could not parse a job id from submit output: {output:?}")]
    JobIdUnparsable { output: String },
}

/// Per-particle runtime failures. Contained at the retry boundary and
/// converted into the penalty sentinel, never aborting the batch.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Model output missing: {path}")]
    MissingOutput { path: String },

    #[error("Failed to parse model output {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Constraint {name} extraction failed: {message}")]
    ConstraintExtraction { name: String, message: String },

    #[error("Observed and modeled lengths differ for {name}: {observed} vs {modeled}")]
    ShapeMismatch {
        name: String,
        observed: usize,
        modeled: usize,
    },

    #[error("No bins left after domain filtering for {name}")]
    EmptyDomain { name: String },

    #[error("Fitness score is not finite")]
    NonFiniteScore,
}

/// Result type alias for SwarmCal operations
pub type CalResult<T> = Result<T, CalError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::CalError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::CalError::Config($crate::ConfigError::Invalid {
            message: format!($($arg)*),
        })
    };
}
