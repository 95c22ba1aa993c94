//! Comparison statistics reducing (observed, modeled, error) to one scalar.
//!
//! Both tests are pure functions of equal-length input slices. The floors
//! below guard against division-by-zero and log-of-zero on degenerate
//! inputs; they are shared so both tests behave identically at the edges.

use statrs::function::gamma::ln_gamma;

/// Floor on the residual second moment used for the dof estimate.
pub const MIN_VARIANCE: f64 = 1e-8;

/// Floor on per-bin errors.
pub const MIN_ERROR: f64 = 1e-8;

/// Floor on the Student-t density before taking its log.
pub const MIN_DENSITY: f64 = 1e-8;

/// Effective dof used when the residual spread is at or below the normal
/// limit.
const NORMAL_LIMIT_DOF: f64 = 1e6;

const MIN_DOF: f64 = 2.0 + 1e-6;

/// Classic chi-squared statistic: `Σ((modeled − observed) / error)²`.
pub fn chi2(observed: &[f64], modeled: &[f64], err: &[f64]) -> f64 {
    observed
        .iter()
        .zip(modeled)
        .zip(err)
        .map(|((&o, &m), &e)| {
            let d = (m - o) / e.abs().max(MIN_ERROR);
            d * d
        })
        .sum()
}

/// Student-t log-likelihood statistic: `Σ(−ln t(residual; ν))`.
///
/// Zero entries in `err` are substituted by the standard deviation of the
/// observed array. The effective degrees of freedom ν are estimated from
/// the second moment of the standardized residuals (`Var[T] = ν/(ν−2)`),
/// falling back to the normal limit when the spread does not exceed one.
/// Heavier tails than the Gaussian make this statistic down-weight outlier
/// bins relative to [`chi2`].
pub fn student_t(observed: &[f64], modeled: &[f64], err: &[f64]) -> f64 {
    let residuals = standardized_residuals(observed, modeled, err);

    let n = residuals.len();
    if n == 0 {
        return 0.0;
    }

    let second_moment = (residuals.iter().map(|r| r * r).sum::<f64>() / n as f64).max(MIN_VARIANCE);
    let dof = if second_moment > 1.0 {
        (2.0 * second_moment / (second_moment - 1.0)).clamp(MIN_DOF, NORMAL_LIMIT_DOF)
    } else {
        NORMAL_LIMIT_DOF
    };

    residuals
        .iter()
        .map(|&r| {
            let density = ln_t_density(r, dof).exp().max(MIN_DENSITY);
            -density.ln()
        })
        .sum()
}

/// `(modeled − observed) / error`, with zero errors replaced by the
/// observed array's standard deviation.
fn standardized_residuals(observed: &[f64], modeled: &[f64], err: &[f64]) -> Vec<f64> {
    let fallback = std_dev(observed).max(MIN_ERROR);

    observed
        .iter()
        .zip(modeled)
        .zip(err)
        .map(|((&o, &m), &e)| {
            let sigma = if e == 0.0 { fallback } else { e.abs().max(MIN_ERROR) };
            (m - o) / sigma
        })
        .collect()
}

/// Log density of the standard Student-t distribution with `dof` degrees of
/// freedom. Uses `ln_gamma` differences for numerical stability.
fn ln_t_density(x: f64, dof: f64) -> f64 {
    ln_gamma((dof + 1.0) / 2.0)
        - ln_gamma(dof / 2.0)
        - 0.5 * (dof * std::f64::consts::PI).ln()
        - (dof + 1.0) / 2.0 * (x * x / dof).ln_1p()
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chi2_is_zero_for_identical_arrays() {
        let obs = [1.0, 2.0, 3.0];
        let err = [1.0, 0.5, 2.0];
        assert_eq!(chi2(&obs, &obs, &err), 0.0);
    }

    #[test]
    fn chi2_counts_standardized_deviations() {
        let obs = [1.0, 2.0];
        let modeled = [2.0, 4.0];
        let err = [1.0, 1.0];
        // (1/1)^2 + (2/1)^2
        assert!((chi2(&obs, &modeled, &err) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn student_t_finite_on_exact_match() {
        let obs = [0.1, 0.2, 0.3, 0.4];
        let err = [0.01, 0.01, 0.01, 0.01];
        let score = student_t(&obs, &obs, &err);
        assert!(score.is_finite(), "score = {score}");
    }

    #[test]
    fn student_t_finite_with_zero_errors() {
        let obs = [1.0, 2.0, 3.0];
        let modeled = [1.1, 2.2, 2.7];
        let err = [0.0, 0.0, 0.0];
        let score = student_t(&obs, &modeled, &err);
        assert!(score.is_finite(), "score = {score}");
    }

    #[test]
    fn student_t_downweights_outliers_relative_to_chi2() {
        let obs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let err = [0.1, 0.1, 0.1, 0.1, 0.1];
        // One wild bin, the rest close.
        let modeled = [1.01, 2.01, 2.99, 4.02, 9.0];

        let base_t = student_t(&obs, &obs, &err);
        let with_outlier_t = student_t(&obs, &modeled, &err);
        let chi = chi2(&obs, &modeled, &err);

        // The outlier dominates chi2 completely; the t statistic grows far
        // more slowly over its no-deviation baseline.
        assert!(chi > 1000.0);
        assert!(with_outlier_t - base_t < chi / 10.0);
    }

    #[test]
    fn student_t_deterministic() {
        let obs = [1.0, 2.0, 3.0];
        let modeled = [1.5, 2.5, 3.5];
        let err = [0.3, 0.3, 0.3];
        assert_eq!(student_t(&obs, &modeled, &err), student_t(&obs, &modeled, &err));
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(chi2(&[], &[], &[]), 0.0);
        assert_eq!(student_t(&[], &[], &[]), 0.0);
    }
}
