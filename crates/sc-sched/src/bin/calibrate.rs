//! Environment-driven evaluation service.
//!
//! Reads a run bundle from environment variables, evaluates one batch of
//! particles, and prints the fitness vector as JSON. Argument parsing and
//! optimizer mathematics live outside this repository.
//!
//! Variables:
//! - `SWARMCAL_CONFIG`      path to a `RunConfig` JSON file
//! - `SWARMCAL_SPACE`       path to a parameter-spec JSON list
//! - `SWARMCAL_CONSTRAINTS` path to a `ConstraintConfig` JSON list
//! - `SWARMCAL_PARTICLES`   path to a JSON array of particle vectors
//! - `SWARMCAL_TEST`        "chi2" (default) or "student_t"
//! - `SWARMCAL_AGGREGATION` "additive" (default) or "multiplicative_log"

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use sc_constraints::{
    Aggregation, ConstraintConfig, ConstraintSet, FitnessEvaluator, StatisticalTest,
};
use sc_sched::IterationCoordinator;
use sc_types::{ParameterSpace, Particle, RunConfig};

fn env_path(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = RunConfig::from_json_file(env_path("SWARMCAL_CONFIG")?)?;
    let space = ParameterSpace::from_json_file(env_path("SWARMCAL_SPACE")?)?;

    let constraint_configs: Vec<ConstraintConfig> =
        serde_json::from_str(&std::fs::read_to_string(env_path("SWARMCAL_CONSTRAINTS")?)?)?;
    let mut constraints = ConstraintSet::default();
    for cc in &constraint_configs {
        constraints.push(cc.build()?);
    }

    let particles: Vec<Particle> =
        serde_json::from_str(&std::fs::read_to_string(env_path("SWARMCAL_PARTICLES")?)?)?;

    let test = match std::env::var("SWARMCAL_TEST").as_deref() {
        Ok("student_t") => StatisticalTest::StudentT,
        _ => StatisticalTest::Chi2,
    };
    let aggregation = match std::env::var("SWARMCAL_AGGREGATION").as_deref() {
        Ok("multiplicative_log") => Aggregation::MultiplicativeLog,
        _ => Aggregation::Additive,
    };

    let evaluator = FitnessEvaluator::new(constraints, test, aggregation, config.subvolumes.clone());
    let mut coordinator = IterationCoordinator::new(config, space, evaluator)?;

    let fitness = coordinator.evaluate_batch(&particles).await?;
    println!("{}", serde_json::to_string(&fitness)?);

    Ok(())
}
