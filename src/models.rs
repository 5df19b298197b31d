use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default timeout for a task, in milliseconds
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 120_000;

/// Default blend weight of deterministic checks inside a composite verifier
pub const DEFAULT_DETERMINISTIC_WEIGHT: f64 = 0.6;

/// Task difficulty as declared in the task store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        };
        f.write_str(label)
    }
}

/// Kind of a deterministic check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckKind {
    FileExists,
    FileContains,
    CommandExit,
    TestPass,
}

/// A single deterministic check declared by a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierCheck {
    /// Human readable check name, echoed in the check result
    pub name: String,
    /// Which check semantics to apply
    pub kind: CheckKind,
    /// Kind-specific settings (path, pattern, command, ...)
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
}

/// Ordered list of deterministic checks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeterministicVerifier {
    #[serde(default)]
    pub checks: Vec<VerifierCheck>,
}

/// Rubric and dimensions handed to the LLM judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmJudgeVerifier {
    pub rubric: String,
    pub dimensions: Vec<String>,
}

/// Deterministic checks blended with an LLM judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeVerifier {
    pub deterministic: DeterministicVerifier,
    pub llm_judge: LlmJudgeVerifier,
    /// Weight of the check pass rate in the blend, in [0, 1]
    #[serde(default = "default_deterministic_weight")]
    pub deterministic_weight: f64,
}

fn default_deterministic_weight() -> f64 {
    DEFAULT_DETERMINISTIC_WEIGHT
}

/// How a finished run is turned into pass/fail and quality signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Verifier {
    Deterministic(DeterministicVerifier),
    LlmJudge(LlmJudgeVerifier),
    Composite(CompositeVerifier),
}

impl Verifier {
    /// Check variant-specific invariants that serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Verifier::Composite(composite) => {
                let w = composite.deterministic_weight;
                if !(0.0..=1.0).contains(&w) {
                    return Err(format!("deterministicWeight {} is outside [0, 1]", w));
                }
                Ok(())
            }
            Verifier::Deterministic(_) | Verifier::LlmJudge(_) => Ok(()),
        }
    }
}

/// Immutable task definition loaded from `<domain>/<task>/task.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalTask {
    pub id: String,
    pub name: String,
    /// Skills this task is meant to exercise
    pub target_skill_slugs: Vec<String>,
    pub domain: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Natural-language instruction handed to the agent
    pub prompt: String,
    /// Initial files, relative path -> content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaffold: Option<BTreeMap<String, String>>,
    pub verifier: Verifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TASK_TIMEOUT_MS
}

impl EvalTask {
    /// Validate the fields serde accepts but the harness does not
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("task id is empty".to_string());
        }
        if self.timeout_ms == 0 {
            return Err("timeoutMs must be positive".to_string());
        }
        self.verifier.validate()
    }

    /// Whether the task shares at least one tag with `tags`
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        let own = self.tags.as_deref().unwrap_or_default();
        tags.iter().any(|t| own.contains(t))
    }
}

/// Skill content injected into the treatment arm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillInjection {
    pub slug: String,
    pub markdown: String,
}

/// Report of the agent runner for one arm of one task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    /// Whether the agent reported that it finished
    pub completed: bool,
    pub wall_time_ms: u64,
    pub message_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_call_count: u64,
    pub failed_tool_call_count: u64,
    /// Files written by the agent, relative path -> content
    pub files_written: BTreeMap<String, String>,
    /// Full conversation transcript
    pub conversation_log: String,
    pub exit_code: i32,
}

/// Outcome of one deterministic check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    pub fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: Some(detail.into()),
        }
    }

    pub fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

/// Quality scores produced by the LLM judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeResult {
    /// Dimension name -> normalized score in [0, 1]
    pub dimensions: BTreeMap<String, f64>,
    /// Mean of the dimension scores, in [0, 1]
    pub composite: f64,
    pub reasoning: String,
}

/// Resource usage of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Efficiency {
    pub total_tokens: f64,
    pub message_count: f64,
    pub wall_time_ms: f64,
    pub tool_call_count: f64,
    pub failed_tool_call_count: f64,
}

/// Canonical per-run scorecard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalMetrics {
    pub completion_rate: f64,
    pub check_pass_rate: f64,
    pub quality_scores: BTreeMap<String, f64>,
    pub quality_composite: f64,
    pub efficiency: Efficiency,
    pub estimated_cost_usd: f64,
}

/// Treatment-minus-control differences for one task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactDelta {
    pub completion_rate_delta: f64,
    pub check_pass_rate_delta: f64,
    pub quality_composite_delta: f64,
    /// Negative when the treatment used fewer tokens
    pub token_reduction: f64,
    pub message_reduction: f64,
    pub wall_time_reduction_ms: f64,
    pub cost_reduction_usd: f64,
}

/// Deltas plus the bounded scalar derived from them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Impact {
    #[serde(flatten)]
    pub delta: ImpactDelta,
    /// In [-1, 1]
    pub impact_score: f64,
}

/// Control and treatment metrics of one task for one skill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalComparison {
    pub skill_slug: String,
    pub task_id: String,
    pub control: EvalMetrics,
    pub treatment: EvalMetrics,
    pub delta: ImpactDelta,
    pub impact_score: f64,
}

/// Descriptive statistics over one list of observations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticalResult {
    pub mean: f64,
    pub std_dev: f64,
    /// (low, high), serialized as a two-element array
    pub ci95: (f64, f64),
    pub sample_size: usize,
}

/// Two-arm comparison of one metric across paired runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ABTestResult {
    pub control: StatisticalResult,
    pub treatment: StatisticalResult,
    pub delta: StatisticalResult,
    pub effect_size: f64,
    /// Normal approximation of Welch's t-test; indicative only for small samples
    pub p_value: f64,
    pub significant: bool,
}

/// A/B tests attached to a task when it ran more than once per arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatistics {
    pub completion_rate: ABTestResult,
    pub quality_composite: ABTestResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub task_id: String,
    pub task_name: String,
    pub domain: String,
    pub control: EvalMetrics,
    pub treatment: EvalMetrics,
    pub delta: ImpactDelta,
    pub impact_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<TaskStatistics>,
}

/// Mean deltas over every task of a skill
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillAggregate {
    pub completion_rate_delta: f64,
    pub quality_composite_delta: f64,
    /// Fraction of control tokens saved by the treatment
    pub token_reduction_pct: f64,
    pub impact_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillReport {
    pub skill_slug: String,
    pub tasks: Vec<TaskReport>,
    pub aggregate: SkillAggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestSkill {
    pub slug: String,
    pub impact_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub skills_evaluated: usize,
    pub tasks_executed: usize,
    pub average_impact_score: f64,
    pub best_skill: Option<BestSkill>,
    pub total_cost_usd: f64,
    pub total_time_ms: u64,
}

/// Terminal artifact of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalReport {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub skills: Vec<SkillReport>,
    pub summary: ReportSummary,
}
