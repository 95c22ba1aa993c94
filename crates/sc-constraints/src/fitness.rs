//! Per-particle fitness evaluation.
//!
//! Reduces every constraint's comparison statistic to the single scalar the
//! swarm optimizer minimizes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use sc_types::{CalResult, EvaluationError};

use crate::constraint::ConstraintSet;
use crate::stats::{chi2, student_t};

/// Floor applied to each weighted statistic before `log10` in the
/// multiplicative strategy.
const LOG_TERM_FLOOR: f64 = 1e-12;

/// Which comparison statistic scores a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticalTest {
    Chi2,
    StudentT,
}

impl StatisticalTest {
    pub fn apply(&self, observed: &[f64], modeled: &[f64], err: &[f64]) -> f64 {
        match self {
            Self::Chi2 => chi2(observed, modeled, err),
            Self::StudentT => student_t(observed, modeled, err),
        }
    }
}

/// How per-constraint statistics combine into one fitness value.
///
/// The two formulas are intentionally kept as separate named strategies;
/// they do not agree numerically and are never reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// `Σ(weight × statistic)`.
    Additive,
    /// `10^(Σ log10(weight × statistic))`.
    MultiplicativeLog,
}

/// Scores one particle's simulation output against a constraint set.
///
/// Constraints share no mutable state; evaluation order cannot affect the
/// result.
pub struct FitnessEvaluator {
    constraints: ConstraintSet,
    test: StatisticalTest,
    aggregation: Aggregation,
    subvolumes: Vec<u32>,
}

impl FitnessEvaluator {
    pub fn new(
        constraints: ConstraintSet,
        test: StatisticalTest,
        aggregation: Aggregation,
        subvolumes: Vec<u32>,
    ) -> Self {
        Self {
            constraints,
            test,
            aggregation,
            subvolumes,
        }
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Evaluate one finished workspace. Deterministic: the same unmodified
    /// output always yields the identical scalar.
    pub fn evaluate(&self, workspace_dir: &Path) -> CalResult<f64> {
        let mut terms = Vec::with_capacity(self.constraints.len());

        for constraint in self.constraints.iter() {
            let (observed, modeled, err) = constraint.get_data(workspace_dir, &self.subvolumes)?;
            let statistic = self.test.apply(&observed, &modeled, &err);
            debug!(
                constraint = %constraint.name,
                statistic,
                weight = constraint.weight,
                "constraint scored"
            );
            terms.push(constraint.weight * statistic);
        }

        let score = match self.aggregation {
            Aggregation::Additive => terms.iter().sum(),
            Aggregation::MultiplicativeLog => {
                let log_sum: f64 = terms.iter().map(|t| t.max(LOG_TERM_FLOOR).log10()).sum();
                10f64.powf(log_sum)
            }
        };

        if !score.is_finite() {
            return Err(EvaluationError::NonFiniteScore.into());
        }

        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{Constraint, ObservedData};
    use crate::reader::TableModelReader;
    use std::fs;
    use std::path::Path;

    fn write_table(dir: &Path, file: &str, rows: &str) {
        fs::create_dir_all(dir.join("output")).unwrap();
        fs::write(dir.join("output").join(file), rows).unwrap();
    }

    fn constraint(name: &str, file_template: &str, y: Vec<f64>) -> Constraint {
        let observed = ObservedData::new(vec![8.5, 9.5, 10.5], y, vec![1.0, 1.0, 1.0]).unwrap();
        Constraint::new(
            name,
            observed,
            Box::new(TableModelReader::new(format!("output/{file_template}"), 1)),
        )
    }

    #[test]
    fn additive_sums_weighted_statistics() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), "a_0.tsv", "8.5\t2.0\n9.5\t2.0\n10.5\t3.0\n");
        write_table(dir.path(), "b_0.tsv", "8.5\t1.0\n9.5\t2.0\n10.5\t3.0\n");

        // chi2(a) = 1, chi2(b) = 0; weights 2 and 5.
        let set = ConstraintSet::new(vec![
            constraint("a", "a_{subvolume}.tsv", vec![1.0, 2.0, 3.0]).with_weight(2.0),
            constraint("b", "b_{subvolume}.tsv", vec![1.0, 2.0, 3.0]).with_weight(5.0),
        ]);

        let evaluator =
            FitnessEvaluator::new(set, StatisticalTest::Chi2, Aggregation::Additive, vec![0]);
        let score = evaluator.evaluate(dir.path()).unwrap();
        assert!((score - 2.0).abs() < 1e-12, "score = {score}");
    }

    #[test]
    fn multiplicative_log_is_product_of_terms() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), "a_0.tsv", "8.5\t3.0\n9.5\t2.0\n10.5\t3.0\n"); // chi2 = 4
        write_table(dir.path(), "b_0.tsv", "8.5\t1.0\n9.5\t5.0\n10.5\t3.0\n"); // chi2 = 9

        let set = ConstraintSet::new(vec![
            constraint("a", "a_{subvolume}.tsv", vec![1.0, 2.0, 3.0]),
            constraint("b", "b_{subvolume}.tsv", vec![1.0, 2.0, 3.0]),
        ]);

        let evaluator = FitnessEvaluator::new(
            set,
            StatisticalTest::Chi2,
            Aggregation::MultiplicativeLog,
            vec![0],
        );
        let score = evaluator.evaluate(dir.path()).unwrap();
        assert!((score - 36.0).abs() < 1e-9, "score = {score}");
    }

    #[test]
    fn multiplicative_log_stays_finite_on_zero_statistic() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), "a_0.tsv", "8.5\t1.0\n9.5\t2.0\n10.5\t3.0\n"); // chi2 = 0

        let set = ConstraintSet::new(vec![constraint(
            "a",
            "a_{subvolume}.tsv",
            vec![1.0, 2.0, 3.0],
        )]);

        let evaluator = FitnessEvaluator::new(
            set,
            StatisticalTest::Chi2,
            Aggregation::MultiplicativeLog,
            vec![0],
        );
        let score = evaluator.evaluate(dir.path()).unwrap();
        assert!(score.is_finite());
        assert!(score >= 0.0);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), "a_0.tsv", "8.5\t1.3\n9.5\t2.7\n10.5\t3.9\n");

        let set = ConstraintSet::new(vec![constraint(
            "a",
            "a_{subvolume}.tsv",
            vec![1.0, 2.0, 3.0],
        )]);
        let evaluator =
            FitnessEvaluator::new(set, StatisticalTest::StudentT, Aggregation::Additive, vec![0]);

        let first = evaluator.evaluate(dir.path()).unwrap();
        let second = evaluator.evaluate(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn constraint_order_does_not_matter() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), "a_0.tsv", "8.5\t2.0\n9.5\t2.0\n10.5\t3.0\n");
        write_table(dir.path(), "b_0.tsv", "8.5\t1.0\n9.5\t4.0\n10.5\t3.0\n");

        let forward = ConstraintSet::new(vec![
            constraint("a", "a_{subvolume}.tsv", vec![1.0, 2.0, 3.0]),
            constraint("b", "b_{subvolume}.tsv", vec![1.0, 2.0, 3.0]),
        ]);
        let reversed = ConstraintSet::new(vec![
            constraint("b", "b_{subvolume}.tsv", vec![1.0, 2.0, 3.0]),
            constraint("a", "a_{subvolume}.tsv", vec![1.0, 2.0, 3.0]),
        ]);

        let eval_forward =
            FitnessEvaluator::new(forward, StatisticalTest::Chi2, Aggregation::Additive, vec![0]);
        let eval_reversed =
            FitnessEvaluator::new(reversed, StatisticalTest::Chi2, Aggregation::Additive, vec![0]);

        assert_eq!(
            eval_forward.evaluate(dir.path()).unwrap(),
            eval_reversed.evaluate(dir.path()).unwrap()
        );
    }
}
