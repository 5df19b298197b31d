use super::RunContext;
use super::deterministic::run_deterministic_checks;
use super::judge::{JudgeBackend, run_llm_judge};
use crate::metrics::check_pass_rate;
use crate::models::{CheckResult, CompositeVerifier, JudgeResult};

/// Both halves of a composite verification and their blend
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeOutput {
    pub check_results: Vec<CheckResult>,
    pub judge_result: JudgeResult,
    pub check_pass_rate: f64,
    pub composite_score: f64,
}

/// `w * check_pass_rate + (1 - w) * judge_composite`
pub fn blend_scores(deterministic_weight: f64, check_pass_rate: f64, judge_composite: f64) -> f64 {
    deterministic_weight * check_pass_rate + (1.0 - deterministic_weight) * judge_composite
}

/// Run the checks and the judge concurrently, then blend them
pub async fn run_composite(
    backend: &dyn JudgeBackend,
    verifier: &CompositeVerifier,
    ctx: &RunContext<'_>,
    default_test_command: &str,
) -> CompositeOutput {
    let (check_results, judge_result) = tokio::join!(
        run_deterministic_checks(
            &verifier.deterministic,
            ctx.workspace_dir,
            ctx.timeout,
            default_test_command,
        ),
        run_llm_judge(
            backend,
            &verifier.llm_judge,
            ctx.prompt,
            ctx.transcript,
            ctx.files_written,
        ),
    );

    let rate = check_pass_rate(&check_results);
    CompositeOutput {
        composite_score: blend_scores(verifier.deterministic_weight, rate, judge_result.composite),
        check_results,
        judge_result,
        check_pass_rate: rate,
    }
}
