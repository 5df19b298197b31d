//! Descriptive statistics and A/B significance testing over paired task runs.
//!
//! The p-value comes from Welch's t statistic evaluated against a normal
//! distribution rather than Student's t. Below roughly 30 degrees of freedom
//! this understates the p-value, so treat it as indicative for small batches.

use crate::models::{ABTestResult, StatisticalResult};

/// z value of the two-sided 95% interval
const Z_95: f64 = 1.96;

/// Significance threshold applied to the p-value
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Mean, sample standard deviation and 95% interval of `values`
pub fn summarize(values: &[f64]) -> StatisticalResult {
    let mean = calculate_mean(values);
    let std_dev = calculate_std_dev(values, mean);
    StatisticalResult {
        mean,
        std_dev,
        ci95: confidence_interval(mean, std_dev, values.len()),
        sample_size: values.len(),
    }
}

/// Compare two index-aligned arms of the same tasks
pub fn compute_ab_test(control_values: &[f64], treatment_values: &[f64]) -> ABTestResult {
    let control = summarize(control_values);
    let treatment = summarize(treatment_values);

    let deltas: Vec<f64> = control_values
        .iter()
        .zip(treatment_values)
        .map(|(c, t)| t - c)
        .collect();
    let delta = summarize(&deltas);

    let p_value = welch_t_test(&control, &treatment).p_value;
    let effect_size = cohens_d(&control, &treatment);

    ABTestResult {
        control,
        treatment,
        delta,
        effect_size,
        p_value,
        significant: p_value < SIGNIFICANCE_LEVEL,
    }
}

/// Outcome of Welch's unequal-variance t-test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchTest {
    pub t_stat: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
}

impl WelchTest {
    fn inconclusive(degrees_of_freedom: f64) -> Self {
        Self {
            t_stat: 0.0,
            degrees_of_freedom,
            p_value: 1.0,
        }
    }
}

/// Two-sided Welch t-test between two summarized samples
pub fn welch_t_test(a: &StatisticalResult, b: &StatisticalResult) -> WelchTest {
    if a.sample_size < 2 || b.sample_size < 2 {
        return WelchTest::inconclusive(0.0);
    }

    let n1 = a.sample_size as f64;
    let n2 = b.sample_size as f64;
    let v1 = a.std_dev.powi(2) / n1;
    let v2 = b.std_dev.powi(2) / n2;
    let se = (v1 + v2).sqrt();
    if se == 0.0 {
        return WelchTest::inconclusive(n1 + n2 - 2.0);
    }

    let t_stat = (a.mean - b.mean) / se;
    let degrees_of_freedom = (v1 + v2).powi(2) / (v1.powi(2) / (n1 - 1.0) + v2.powi(2) / (n2 - 1.0));
    let p_value = (2.0 * (1.0 - normal_cdf(t_stat.abs()))).clamp(0.0, 1.0);

    WelchTest {
        t_stat,
        degrees_of_freedom,
        p_value,
    }
}

/// Standard normal CDF (Abramowitz & Stegun 7.1.26)
pub fn normal_cdf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let abs_x = x.abs();
    let t = 1.0 / (1.0 + P * abs_x);
    let y = 1.0 - ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t * (-abs_x * abs_x / 2.0).exp();
    0.5 * (1.0 + sign * y)
}

/// Cohen's d with an unweighted pooled standard deviation, positive when
/// the treatment mean is higher
pub fn cohens_d(control: &StatisticalResult, treatment: &StatisticalResult) -> f64 {
    if control.sample_size < 2 || treatment.sample_size < 2 {
        return 0.0;
    }
    let pooled = ((control.std_dev.powi(2) + treatment.std_dev.powi(2)) / 2.0).sqrt();
    if pooled == 0.0 {
        return 0.0;
    }
    (treatment.mean - control.mean) / pooled
}

fn calculate_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Bessel-corrected; zero below two observations
fn calculate_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

fn confidence_interval(mean: f64, std_dev: f64, n: usize) -> (f64, f64) {
    if n < 2 {
        return (mean, mean);
    }
    let se = std_dev / (n as f64).sqrt();
    (mean - Z_95 * se, mean + Z_95 * se)
}
