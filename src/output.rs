use crate::models::{EvalReport, EvalTask, SkillAggregate, TaskReport};
use anyhow::{Context, Result};
use chrono::SecondsFormat;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;

const RULE_WIDTH: usize = 70;
const TASK_NAME_WIDTH: usize = 33;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Render the report in the requested format
pub fn render_report(report: &EvalReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Plain => Ok(format_text_report(report)),
        OutputFormat::Json => format_json_report(report),
    }
}

/// Fixed-width table per skill followed by the batch summary
pub fn format_text_report(report: &EvalReport) -> String {
    let heavy = "=".repeat(RULE_WIDTH);
    let light = "-".repeat(RULE_WIDTH);
    let mut lines = vec![
        heavy.clone(),
        "  SKILL EVAL REPORT".to_string(),
        format!(
            "  Run: {}  |  {}",
            report.run_id.chars().take(8).collect::<String>(),
            report.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
        ),
        heavy.clone(),
        String::new(),
    ];

    for skill in &report.skills {
        lines.push(format!("SKILL: {}", skill.skill_slug));
        lines.push(light.clone());
        lines.push(table_row("Task", "Completion", "Quality", "Tokens", "Impact"));
        lines.push(light.clone());
        for task in &skill.tasks {
            lines.push(task_row(task));
        }
        lines.push(light.clone());
        lines.push(aggregate_row(&skill.aggregate));
        lines.push(String::new());
    }

    let summary = &report.summary;
    lines.push(heavy.clone());
    lines.push("SUMMARY".to_string());
    lines.push(heavy.clone());
    lines.push(format!("  Skills evaluated:    {}", summary.skills_evaluated));
    lines.push(format!("  Tasks executed:      {}", summary.tasks_executed));
    lines.push(format!(
        "  Average impact:      {}%",
        signed(summary.average_impact_score * 100.0, 1)
    ));
    if let Some(best) = &summary.best_skill {
        lines.push(format!(
            "  Best skill:          {} ({}%)",
            best.slug,
            signed(best.impact_score * 100.0, 1)
        ));
    }
    lines.push(format!("  Total cost:          ${:.4}", summary.total_cost_usd));
    lines.push(format!("  Total time:          {}", format_duration(summary.total_time_ms)));
    lines.push(heavy);

    lines.join("\n")
}

fn table_row(task: &str, completion: &str, quality: &str, tokens: &str, impact: &str) -> String {
    format!(
        "{:<35}{:<14}{:<10}{:<12}{:<10}",
        task, completion, quality, tokens, impact
    )
}

fn task_row(task: &TaskReport) -> String {
    let completion = format!(
        "{:.0}%\u{2192}{:.0}%",
        task.control.completion_rate * 100.0,
        task.treatment.completion_rate * 100.0
    );
    let quality = signed(task.treatment.quality_composite - task.control.quality_composite, 2);

    let control_tokens = task.control.efficiency.total_tokens;
    let treatment_tokens = task.treatment.efficiency.total_tokens;
    let tokens = if control_tokens > 0.0 {
        format!("{:.0}%", (control_tokens - treatment_tokens) / control_tokens * 100.0)
    } else {
        "0%".to_string()
    };

    let name: String = task.task_name.chars().take(TASK_NAME_WIDTH).collect();
    table_row(
        &name,
        &completion,
        &quality,
        &tokens,
        &format!("{}%", signed(task.impact_score * 100.0, 1)),
    )
}

fn aggregate_row(aggregate: &SkillAggregate) -> String {
    table_row(
        "AGGREGATE",
        &format!("{}pp", signed(aggregate.completion_rate_delta * 100.0, 1)),
        &signed(aggregate.quality_composite_delta, 2),
        &format!("{:.0}%", aggregate.token_reduction_pct * 100.0),
        &format!("{}%", signed(aggregate.impact_score * 100.0, 1)),
    )
}

/// Fixed decimals with an explicit `+` for non-negative values
fn signed(value: f64, decimals: usize) -> String {
    let value = if value == 0.0 { 0.0 } else { value };
    if value >= 0.0 {
        format!("+{:.*}", decimals, value)
    } else {
        format!("{:.*}", decimals, value)
    }
}

/// `850ms`, `42s` or `3m 7s`
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        return format!("{}ms", ms);
    }
    let seconds = ms / 1000;
    let minutes = seconds / 60;
    if minutes == 0 {
        format!("{}s", seconds)
    } else {
        format!("{}m {}s", minutes, seconds % 60)
    }
}

/// Pretty-printed JSON of the whole report
pub fn format_json_report(report: &EvalReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize report to JSON")
}

/// Write the JSON report, creating parent directories
pub fn write_json_report(report: &EvalReport, path: &Path) -> Result<()> {
    write_report(path, &format_json_report(report)?)
}

/// Write rendered report content to `path`
pub fn write_report(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to: {}", path.display()))
}

/// One line per task for the `tasks` command
pub fn format_task_list(tasks: &[EvalTask]) -> String {
    if tasks.is_empty() {
        return "No tasks found.".to_string();
    }
    let mut lines = vec![format!(
        "{:<30} {:<30} {:<12} {:<8} {}",
        "ID", "Name", "Domain", "Level", "Skills"
    )];
    lines.push("-".repeat(RULE_WIDTH + 20));
    for task in tasks {
        lines.push(format!(
            "{:<30} {:<30} {:<12} {:<8} {}",
            task.id,
            task.name.chars().take(30).collect::<String>(),
            task.domain,
            task.difficulty.to_string(),
            task.target_skill_slugs.join(", ")
        ));
    }
    lines.push(String::new());
    lines.push(format!("{} task(s)", tasks.len()));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BestSkill, DeterministicVerifier, Difficulty, EvalMetrics, ReportSummary, SkillReport,
        Verifier,
    };
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn metrics(completion: f64, quality: f64, tokens: f64) -> EvalMetrics {
        let mut m = EvalMetrics {
            completion_rate: completion,
            quality_composite: quality,
            ..Default::default()
        };
        m.efficiency.total_tokens = tokens;
        m
    }

    fn create_test_report() -> EvalReport {
        let task = TaskReport {
            task_id: "counter".to_string(),
            task_name: "Build a counter component with hooks and tests".to_string(),
            domain: "web".to_string(),
            control: metrics(0.5, 0.5, 1000.0),
            treatment: metrics(1.0, 0.75, 800.0),
            delta: Default::default(),
            impact_score: 0.38,
            statistics: None,
        };
        EvalReport {
            run_id: "0123456789abcdef-run".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            skills: vec![SkillReport {
                skill_slug: "react-hooks".to_string(),
                tasks: vec![task],
                aggregate: SkillAggregate {
                    completion_rate_delta: 0.5,
                    quality_composite_delta: 0.25,
                    token_reduction_pct: 0.2,
                    impact_score: 0.38,
                },
            }],
            summary: ReportSummary {
                skills_evaluated: 1,
                tasks_executed: 1,
                average_impact_score: 0.38,
                best_skill: Some(BestSkill {
                    slug: "react-hooks".to_string(),
                    impact_score: 0.38,
                }),
                total_cost_usd: 0.001234,
                total_time_ms: 125_000,
            },
        }
    }

    #[test]
    fn test_text_report_layout() {
        let text = format_text_report(&create_test_report());

        assert!(text.contains("  Run: 01234567  |  2024-05-01T12:30:00.000Z"));
        assert!(text.contains("SKILL: react-hooks"));
        assert!(text.contains(&table_row("Task", "Completion", "Quality", "Tokens", "Impact")));
        assert!(text.contains("Build a counter component with ho  50%\u{2192}100%"));
        assert!(text.contains("+0.25"));
        assert!(text.contains("20%"));
        assert!(text.contains("+38.0%"));
        assert!(text.contains("+50.0pp"));
        assert!(text.contains("  Best skill:          react-hooks (+38.0%)"));
        assert!(text.contains("  Total cost:          $0.0012"));
        assert!(text.contains("  Total time:          2m 5s"));
    }

    #[test]
    fn test_text_report_without_skills() {
        let mut report = create_test_report();
        report.skills.clear();
        report.summary.best_skill = None;

        let text = format_text_report(&report);
        assert!(!text.contains("SKILL:"));
        assert!(!text.contains("Best skill"));
        assert!(text.contains("SUMMARY"));
    }

    #[test]
    fn test_negative_values_have_no_plus() {
        let mut report = create_test_report();
        report.skills[0].tasks[0].impact_score = -0.125;
        report.skills[0].tasks[0].control.efficiency.total_tokens = 0.0;

        let row = task_row(&report.skills[0].tasks[0]);
        assert!(row.contains("-12.5%"));
        assert!(row.contains("0%"));
        assert_eq!(signed(-0.0, 2), "+0.00");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(850), "850ms");
        assert_eq!(format_duration(42_000), "42s");
        assert_eq!(format_duration(187_500), "3m 7s");
    }

    #[test]
    fn test_json_report_is_camel_case() {
        let json = format_json_report(&create_test_report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["runId"], "0123456789abcdef-run");
        assert_eq!(value["summary"]["bestSkill"]["slug"], "react-hooks");
        assert_eq!(value["skills"][0]["tasks"][0]["treatment"]["completionRate"], 1.0);
        assert!(value["skills"][0]["tasks"][0].get("statistics").is_none());
    }

    #[test]
    fn test_write_json_report_creates_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/report.json");

        write_json_report(&create_test_report(), &path).unwrap();

        let parsed: EvalReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, create_test_report());
    }

    #[test]
    fn test_render_report_formats() {
        let report = create_test_report();
        assert!(render_report(&report, OutputFormat::Plain).unwrap().contains("SUMMARY"));
        assert!(render_report(&report, OutputFormat::Json).unwrap().starts_with('{'));
    }

    #[test]
    fn test_task_list() {
        let task = EvalTask {
            id: "counter".to_string(),
            name: "Counter".to_string(),
            target_skill_slugs: vec!["react-hooks".to_string(), "testing".to_string()],
            domain: "web".to_string(),
            difficulty: Difficulty::Hard,
            prompt: "p".to_string(),
            scaffold: None,
            verifier: Verifier::Deterministic(DeterministicVerifier::default()),
            tags: None,
            timeout_ms: 1000,
        };

        let listing = format_task_list(&[task]);
        assert!(listing.contains("counter"));
        assert!(listing.contains("hard"));
        assert!(listing.contains("react-hooks, testing"));
        assert!(listing.ends_with("1 task(s)"));
        assert_eq!(format_task_list(&[]), "No tasks found.");
    }
}
