use crate::models::{EvalComparison, EvalMetrics, Impact, ImpactDelta};
use serde::{Deserialize, Serialize};

/// Weights of the impact components.
///
/// The defaults score outcomes only. Skill injection always adds context, so
/// token and wall-time overhead is reported in the deltas but carries zero
/// weight unless a run configuration opts in.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ImpactWeights {
    pub completion: f64,
    pub quality: f64,
    pub token_efficiency: f64,
    pub time_efficiency: f64,
}

impl Default for ImpactWeights {
    fn default() -> Self {
        Self {
            completion: 0.55,
            quality: 0.45,
            token_efficiency: 0.0,
            time_efficiency: 0.0,
        }
    }
}

/// Compare a control and a treatment run of the same task
pub fn compute_impact(
    control: &EvalMetrics,
    treatment: &EvalMetrics,
    weights: &ImpactWeights,
) -> Impact {
    let delta = compute_delta(control, treatment);

    let completion_impact = delta.completion_rate_delta;
    let quality_impact = delta.quality_composite_delta;
    let token_impact = relative_saving(control.efficiency.total_tokens, delta.token_reduction);
    let time_impact = relative_saving(control.efficiency.wall_time_ms, delta.wall_time_reduction_ms);

    let raw = weights.completion * completion_impact
        + weights.quality * quality_impact
        + weights.token_efficiency * token_impact
        + weights.time_efficiency * time_impact;

    Impact {
        delta,
        impact_score: clamp_score(raw),
    }
}

fn compute_delta(control: &EvalMetrics, treatment: &EvalMetrics) -> ImpactDelta {
    ImpactDelta {
        completion_rate_delta: treatment.completion_rate - control.completion_rate,
        check_pass_rate_delta: treatment.check_pass_rate - control.check_pass_rate,
        quality_composite_delta: treatment.quality_composite - control.quality_composite,
        token_reduction: treatment.efficiency.total_tokens - control.efficiency.total_tokens,
        message_reduction: treatment.efficiency.message_count - control.efficiency.message_count,
        wall_time_reduction_ms: treatment.efficiency.wall_time_ms - control.efficiency.wall_time_ms,
        cost_reduction_usd: treatment.estimated_cost_usd - control.estimated_cost_usd,
    }
}

/// Positive when the treatment consumed less than the control
fn relative_saving(control_amount: f64, difference: f64) -> f64 {
    if control_amount > 0.0 {
        -difference / control_amount
    } else {
        0.0
    }
}

fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(-1.0, 1.0)
}

impl EvalComparison {
    /// Pair control and treatment metrics and score them
    pub fn new(
        skill_slug: &str,
        task_id: &str,
        control: EvalMetrics,
        treatment: EvalMetrics,
        weights: &ImpactWeights,
    ) -> Self {
        let Impact {
            delta,
            impact_score,
        } = compute_impact(&control, &treatment, weights);
        Self {
            skill_slug: skill_slug.to_string(),
            task_id: task_id.to_string(),
            control,
            treatment,
            delta,
            impact_score,
        }
    }
}
