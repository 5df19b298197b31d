//! Strategies that turn a finished agent run into pass/fail and quality signals.
//!
//! Nothing in this module returns an error: failed checks, unreachable judges
//! and malformed judge output all degrade to failing or neutral results.

pub mod composite;
pub mod deterministic;
pub mod judge;

pub use composite::{CompositeOutput, blend_scores, run_composite};
pub use deterministic::run_deterministic_checks;
pub use judge::{JudgeBackend, run_llm_judge};

use crate::config::VerifierSettings;
use crate::metrics::check_pass_rate;
use crate::models::{CheckResult, JudgeResult, Verifier};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// What the verifier sees of a finished run
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub workspace_dir: &'a Path,
    /// Task prompt given to the agent
    pub prompt: &'a str,
    /// Agent transcript
    pub transcript: &'a str,
    pub files_written: &'a BTreeMap<String, String>,
    /// Budget for each command a check spawns
    pub timeout: Duration,
}

/// Verification signals of one run
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutput {
    pub check_results: Vec<CheckResult>,
    pub judge_result: Option<JudgeResult>,
    pub check_pass_rate: f64,
    /// Pass rate, judge composite, or their blend, depending on the variant
    pub score: f64,
}

/// Runs whichever strategy a task declares
#[derive(Clone)]
pub struct VerifierEngine {
    judge: Arc<dyn JudgeBackend>,
    settings: VerifierSettings,
}

impl VerifierEngine {
    pub fn new(judge: Arc<dyn JudgeBackend>, settings: VerifierSettings) -> Self {
        Self { judge, settings }
    }

    pub async fn run(&self, verifier: &Verifier, ctx: &RunContext<'_>) -> VerificationOutput {
        match verifier {
            Verifier::Deterministic(deterministic) => {
                let check_results = run_deterministic_checks(
                    deterministic,
                    ctx.workspace_dir,
                    ctx.timeout,
                    &self.settings.default_test_command,
                )
                .await;
                let rate = check_pass_rate(&check_results);
                VerificationOutput {
                    check_results,
                    judge_result: None,
                    check_pass_rate: rate,
                    score: rate,
                }
            }
            Verifier::LlmJudge(llm_judge) => {
                let judge_result = run_llm_judge(
                    self.judge.as_ref(),
                    llm_judge,
                    ctx.prompt,
                    ctx.transcript,
                    ctx.files_written,
                )
                .await;
                VerificationOutput {
                    check_results: Vec::new(),
                    check_pass_rate: 0.0,
                    score: judge_result.composite,
                    judge_result: Some(judge_result),
                }
            }
            Verifier::Composite(composite) => {
                let output = run_composite(
                    self.judge.as_ref(),
                    composite,
                    ctx,
                    &self.settings.default_test_command,
                )
                .await;
                VerificationOutput {
                    check_results: output.check_results,
                    judge_result: Some(output.judge_result),
                    check_pass_rate: output.check_pass_rate,
                    score: output.composite_score,
                }
            }
        }
    }
}
