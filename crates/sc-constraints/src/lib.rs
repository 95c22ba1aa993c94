//! # sc-constraints
//!
//! Observational constraints and fitness evaluation for SwarmCal.
//!
//! Provides observed-data loading, model-output readers, the chi-squared and
//! Student-t comparison statistics, and the per-particle fitness evaluator
//! with its two aggregation strategies.

mod constraint;
mod fitness;
mod reader;
mod stats;

pub use constraint::{Constraint, ConstraintConfig, ConstraintSet, ObservedData};
pub use fitness::{Aggregation, FitnessEvaluator, StatisticalTest};
pub use reader::{ModelReader, TableModelReader};
pub use stats::{chi2, student_t, MIN_DENSITY, MIN_ERROR, MIN_VARIANCE};
