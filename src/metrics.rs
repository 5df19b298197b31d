use crate::config::CostRates;
use crate::models::{AgentResult, CheckResult, Efficiency, EvalMetrics, JudgeResult};
use std::collections::{BTreeMap, BTreeSet};

/// Fraction of passed checks, 0 when there are none
pub fn check_pass_rate(checks: &[CheckResult]) -> f64 {
    if checks.is_empty() {
        return 0.0;
    }
    let passed = checks.iter().filter(|c| c.passed).count();
    passed as f64 / checks.len() as f64
}

/// Estimated spend of one run
pub fn estimate_cost(input_tokens: u64, output_tokens: u64, rates: &CostRates) -> f64 {
    input_tokens as f64 / 1_000_000.0 * rates.input_per_million
        + output_tokens as f64 / 1_000_000.0 * rates.output_per_million
}

/// Normalize one run into the canonical scorecard.
///
/// An agent that did not report completion gets a zero completion rate even
/// if some checks passed by accident.
pub fn build_metrics(
    agent: &AgentResult,
    checks: &[CheckResult],
    judge: Option<&JudgeResult>,
    rates: &CostRates,
) -> EvalMetrics {
    let check_pass_rate = check_pass_rate(checks);
    let completion_rate = if agent.completed { check_pass_rate } else { 0.0 };

    EvalMetrics {
        completion_rate,
        check_pass_rate,
        quality_scores: judge.map(|j| j.dimensions.clone()).unwrap_or_default(),
        quality_composite: judge.map(|j| j.composite).unwrap_or(0.0),
        efficiency: Efficiency {
            total_tokens: (agent.input_tokens + agent.output_tokens) as f64,
            message_count: agent.message_count as f64,
            wall_time_ms: agent.wall_time_ms as f64,
            tool_call_count: agent.tool_call_count as f64,
            failed_tool_call_count: agent.failed_tool_call_count as f64,
        },
        estimated_cost_usd: estimate_cost(agent.input_tokens, agent.output_tokens, rates),
    }
}

/// Field-wise mean of repeated runs of one arm.
///
/// Quality dimensions are the union over all runs; a run that lacks a
/// dimension contributes 0 to it.
pub fn average_metrics(runs: &[EvalMetrics]) -> EvalMetrics {
    if runs.is_empty() {
        return EvalMetrics::default();
    }
    let dimensions: BTreeSet<&String> = runs.iter().flat_map(|m| m.quality_scores.keys()).collect();
    let quality_scores: BTreeMap<String, f64> = dimensions
        .into_iter()
        .map(|dim| {
            let mean = mean_of(runs, |m| m.quality_scores.get(dim).copied().unwrap_or(0.0));
            (dim.clone(), mean)
        })
        .collect();

    EvalMetrics {
        completion_rate: mean_of(runs, |m| m.completion_rate),
        check_pass_rate: mean_of(runs, |m| m.check_pass_rate),
        quality_scores,
        quality_composite: mean_of(runs, |m| m.quality_composite),
        efficiency: Efficiency {
            total_tokens: mean_of(runs, |m| m.efficiency.total_tokens),
            message_count: mean_of(runs, |m| m.efficiency.message_count),
            wall_time_ms: mean_of(runs, |m| m.efficiency.wall_time_ms),
            tool_call_count: mean_of(runs, |m| m.efficiency.tool_call_count),
            failed_tool_call_count: mean_of(runs, |m| m.efficiency.failed_tool_call_count),
        },
        estimated_cost_usd: mean_of(runs, |m| m.estimated_cost_usd),
    }
}

fn mean_of(runs: &[EvalMetrics], field: impl Fn(&EvalMetrics) -> f64) -> f64 {
    runs.iter().map(field).sum::<f64>() / runs.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(completed: bool) -> AgentResult {
        AgentResult {
            completed,
            wall_time_ms: 1500,
            message_count: 4,
            input_tokens: 2_000_000,
            output_tokens: 1_000_000,
            tool_call_count: 7,
            failed_tool_call_count: 1,
            ..Default::default()
        }
    }

    fn checks(outcomes: &[bool]) -> Vec<CheckResult> {
        outcomes
            .iter()
            .enumerate()
            .map(|(i, &passed)| CheckResult {
                name: format!("check-{}", i),
                passed,
                detail: None,
            })
            .collect()
    }

    fn judge(composite: f64) -> JudgeResult {
        let mut dimensions = BTreeMap::new();
        dimensions.insert("correctness".to_string(), composite);
        JudgeResult {
            dimensions,
            composite,
            reasoning: "ok".to_string(),
        }
    }

    #[test]
    fn test_check_pass_rate_zero_checks() {
        assert_eq!(check_pass_rate(&[]), 0.0);
    }

    #[test]
    fn test_build_metrics_completed() {
        let metrics = build_metrics(
            &agent(true),
            &checks(&[true, true, false, true]),
            Some(&judge(0.75)),
            &CostRates::default(),
        );

        assert_eq!(metrics.check_pass_rate, 0.75);
        assert_eq!(metrics.completion_rate, 0.75);
        assert_eq!(metrics.quality_composite, 0.75);
        assert_eq!(metrics.quality_scores.get("correctness"), Some(&0.75));
        assert_eq!(metrics.efficiency.total_tokens, 3_000_000.0);
        assert_eq!(metrics.efficiency.message_count, 4.0);
        assert_eq!(metrics.efficiency.failed_tool_call_count, 1.0);
        // 2M * 0.5 + 1M * 1.5
        assert!((metrics.estimated_cost_usd - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_build_metrics_not_completed_zeroes_completion() {
        let metrics = build_metrics(&agent(false), &checks(&[true, true]), None, &CostRates::default());

        assert_eq!(metrics.check_pass_rate, 1.0);
        assert_eq!(metrics.completion_rate, 0.0);
        assert_eq!(metrics.quality_composite, 0.0);
        assert!(metrics.quality_scores.is_empty());
    }

    #[test]
    fn test_custom_cost_rates() {
        let rates = CostRates {
            input_per_million: 3.0,
            output_per_million: 15.0,
        };
        assert!((estimate_cost(1_000_000, 100_000, &rates) - 4.5).abs() < 1e-12);
    }

    #[test]
    fn test_average_metrics_empty() {
        assert_eq!(average_metrics(&[]), EvalMetrics::default());
    }

    #[test]
    fn test_average_metrics_unions_dimensions() {
        let first = build_metrics(&agent(true), &checks(&[true]), Some(&judge(1.0)), &CostRates::default());
        let mut second = build_metrics(&agent(true), &checks(&[false]), None, &CostRates::default());
        second.quality_scores.insert("style".to_string(), 0.5);

        let avg = average_metrics(&[first, second]);
        assert_eq!(avg.completion_rate, 0.5);
        assert_eq!(avg.quality_composite, 0.5);
        assert_eq!(avg.quality_scores.get("correctness"), Some(&0.5));
        assert_eq!(avg.quality_scores.get("style"), Some(&0.25));
        assert_eq!(avg.efficiency.wall_time_ms, 1500.0);
    }
}
