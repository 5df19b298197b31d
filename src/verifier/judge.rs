use crate::llm::ChatClient;
use crate::models::{JudgeResult, LlmJudgeVerifier};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Characters of the agent transcript shown to the judge
pub const TRANSCRIPT_LIMIT: usize = 3000;

/// Normalized score used for missing dimensions and failed judge calls
pub const NEUTRAL_SCORE: f64 = 0.5;

const MIN_RAW_SCORE: f64 = 1.0;
const MAX_RAW_SCORE: f64 = 5.0;

/// Text-completion service that grades a run
#[async_trait]
pub trait JudgeBackend: Send + Sync {
    async fn evaluate(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
impl JudgeBackend for ChatClient {
    async fn evaluate(&self, prompt: &str) -> Result<String> {
        let completion = self.complete(None, prompt).await?;
        Ok(completion.content)
    }
}

/// Grade a run with the judge backend.
///
/// Transport failures and unparseable answers fall back to a neutral
/// result; this function never fails.
pub async fn run_llm_judge(
    backend: &dyn JudgeBackend,
    verifier: &LlmJudgeVerifier,
    task_prompt: &str,
    transcript: &str,
    files_written: &BTreeMap<String, String>,
) -> JudgeResult {
    let judge_prompt = build_judge_prompt(verifier, task_prompt, transcript, files_written);

    let outcome = match backend.evaluate(&judge_prompt).await {
        Ok(response) => parse_judge_response(&response, &verifier.dimensions),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(result) => {
            debug!(composite = result.composite, "judge scored run");
            result
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "judge failed, using neutral scores");
            fallback_result(&verifier.dimensions, &e)
        }
    }
}

/// Build the single prompt sent to the judge
pub fn build_judge_prompt(
    verifier: &LlmJudgeVerifier,
    task_prompt: &str,
    transcript: &str,
    files_written: &BTreeMap<String, String>,
) -> String {
    let files = if files_written.is_empty() {
        "No files were written.".to_string()
    } else {
        files_written
            .iter()
            .map(|(path, content)| format!("--- {} ---\n{}", path, content))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    let truncated: String = transcript.chars().take(TRANSCRIPT_LIMIT).collect();

    let score_lines = verifier
        .dimensions
        .iter()
        .map(|d| format!("    \"{}\": <1-5>", d))
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        "You are an expert code reviewer. Evaluate the AI agent's output below.\n\n\
         ## Original Task\n{task}\n\n\
         ## Agent Output (Files Written)\n{files}\n\n\
         ## Agent Conversation (truncated)\n{transcript}\n\n\
         ## Evaluation Rubric\n{rubric}\n\n\
         ## Instructions\n\
         Score each of these dimensions from 1 (poor) to 5 (excellent): {dimensions}\n\n\
         Respond with ONLY a JSON object in this exact format:\n\
         {{\n  \"scores\": {{\n{scores}\n  }},\n  \"reasoning\": \"<brief explanation>\"\n}}",
        task = task_prompt,
        files = files,
        transcript = truncated,
        rubric = verifier.rubric,
        dimensions = verifier.dimensions.join(", "),
        scores = score_lines,
    )
}

/// Turn the judge's free text into normalized dimension scores
pub fn parse_judge_response(response: &str, dimensions: &[String]) -> Result<JudgeResult> {
    let json = extract_json_object(response).ok_or_else(|| anyhow!("No JSON found in judge response"))?;
    let parsed: Value = serde_json::from_str(json).context("Failed to parse judge JSON")?;

    let scores = parsed.get("scores");
    let normalized: BTreeMap<String, f64> = dimensions
        .iter()
        .map(|dim| {
            let raw = scores.and_then(|s| s.get(dim)).and_then(Value::as_f64);
            (dim.clone(), normalize_score(raw))
        })
        .collect();

    let reasoning = parsed
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or("No reasoning provided")
        .to_string();

    Ok(JudgeResult {
        composite: mean_score(&normalized),
        dimensions: normalized,
        reasoning,
    })
}

/// Neutral result recorded when the judge cannot be used
pub fn fallback_result(dimensions: &[String], error: &anyhow::Error) -> JudgeResult {
    JudgeResult {
        dimensions: dimensions.iter().map(|d| (d.clone(), NEUTRAL_SCORE)).collect(),
        composite: NEUTRAL_SCORE,
        reasoning: format!("Judge failed: {:#}", error),
    }
}

/// First balanced `{...}` in `text`, ignoring braces inside JSON strings
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Map a raw 1-5 score to [0, 1]; anything else is neutral
fn normalize_score(raw: Option<f64>) -> f64 {
    match raw {
        Some(s) if (MIN_RAW_SCORE..=MAX_RAW_SCORE).contains(&s) => {
            (s - MIN_RAW_SCORE) / (MAX_RAW_SCORE - MIN_RAW_SCORE)
        }
        _ => NEUTRAL_SCORE,
    }
}

fn mean_score(scores: &BTreeMap<String, f64>) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.values().sum::<f64>() / scores.len() as f64
}
