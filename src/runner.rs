use crate::agent::AgentRunner;
use crate::config::{Config, CostRates, VerifierSettings};
use crate::impact::ImpactWeights;
use crate::metrics::{average_metrics, build_metrics};
use crate::models::{
    AgentResult, BestSkill, EvalComparison, EvalMetrics, EvalReport, EvalTask, ReportSummary,
    SkillAggregate, SkillInjection, SkillReport, TaskReport, TaskStatistics,
};
use crate::statistics::compute_ab_test;
use crate::verifier::{JudgeBackend, RunContext, VerifierEngine};
use crate::workspace::{SKILL_FILE, create_workspace};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Batch-level knobs of the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Repetitions per task and arm
    pub runs: usize,
    pub max_concurrent_tasks: usize,
    pub cost: CostRates,
    pub impact_weights: ImpactWeights,
    pub verifier: VerifierSettings,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            runs: 1,
            max_concurrent_tasks: 1,
            cost: CostRates::default(),
            impact_weights: ImpactWeights::default(),
            verifier: VerifierSettings::default(),
        }
    }
}

impl From<&Config> for RunSettings {
    fn from(config: &Config) -> Self {
        Self {
            runs: config.runs,
            max_concurrent_tasks: config.max_concurrent_tasks,
            cost: config.cost,
            impact_weights: config.impact_weights,
            verifier: config.verifier.clone(),
        }
    }
}

/// Which side of the comparison a run belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arm {
    Control,
    Treatment,
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arm::Control => f.write_str("control"),
            Arm::Treatment => f.write_str("treatment"),
        }
    }
}

/// Main runner that orchestrates control/treatment evaluations
pub struct Runner {
    agent: Arc<dyn AgentRunner>,
    verifier: VerifierEngine,
    settings: RunSettings,
}

impl Runner {
    /// Create a new runner with the given backends and settings
    pub fn new(agent: Arc<dyn AgentRunner>, judge: Arc<dyn JudgeBackend>, settings: RunSettings) -> Self {
        let verifier = VerifierEngine::new(judge, settings.verifier.clone());
        Self {
            agent,
            verifier,
            settings: RunSettings {
                runs: settings.runs.max(1),
                max_concurrent_tasks: settings.max_concurrent_tasks.max(1),
                ..settings
            },
        }
    }

    /// Evaluate every task against each targeted skill whose content is known.
    ///
    /// Skills run one after another; tasks of a skill run with bounded
    /// concurrency and keep their input order in the report.
    pub async fn run_evaluations(
        &self,
        tasks: &[EvalTask],
        skill_contents: &BTreeMap<String, String>,
    ) -> EvalReport {
        let run_id = uuid::Uuid::new_v4().to_string();
        let start = Instant::now();
        info!(run_id = %run_id, tasks = tasks.len(), runs = self.settings.runs, "starting evaluation");

        let mut skills = Vec::new();
        for (slug, skill_tasks) in group_by_skill(tasks, skill_contents) {
            let Some(markdown) = skill_contents.get(slug) else {
                continue;
            };
            let skill = SkillInjection {
                slug: slug.to_string(),
                markdown: markdown.clone(),
            };
            skills.push(self.evaluate_skill(&skill, &skill_tasks).await);
        }

        let summary = summarize(&skills, tasks.len(), start.elapsed());
        info!(
            run_id = %run_id,
            skills = summary.skills_evaluated,
            average_impact = summary.average_impact_score,
            "evaluation finished"
        );

        EvalReport {
            run_id,
            timestamp: Utc::now(),
            skills,
            summary,
        }
    }

    async fn evaluate_skill(&self, skill: &SkillInjection, tasks: &[&EvalTask]) -> SkillReport {
        info!(skill = %skill.slug, tasks = tasks.len(), "evaluating skill");

        let reports: Vec<TaskReport> = stream::iter(tasks.iter().copied())
            .map(|task| self.evaluate_task(task, skill))
            .buffered(self.settings.max_concurrent_tasks)
            .collect()
            .await;

        SkillReport {
            skill_slug: skill.slug.clone(),
            aggregate: aggregate_skill(&reports),
            tasks: reports,
        }
    }

    /// Run both arms `runs` times and compare their averaged metrics
    async fn evaluate_task(&self, task: &EvalTask, skill: &SkillInjection) -> TaskReport {
        let mut control_runs = Vec::with_capacity(self.settings.runs);
        let mut treatment_runs = Vec::with_capacity(self.settings.runs);

        for run in 1..=self.settings.runs {
            debug!(skill = %skill.slug, task_id = %task.id, run, "starting run");
            let (control, treatment) = tokio::join!(
                self.execute_arm(task, None, Arm::Control),
                self.execute_arm(task, Some(skill), Arm::Treatment),
            );
            control_runs.push(control);
            treatment_runs.push(treatment);
        }

        let statistics = (self.settings.runs >= 2).then(|| task_statistics(&control_runs, &treatment_runs));
        let comparison = EvalComparison::new(
            &skill.slug,
            &task.id,
            average_metrics(&control_runs),
            average_metrics(&treatment_runs),
            &self.settings.impact_weights,
        );
        info!(
            skill = %skill.slug,
            task_id = %task.id,
            impact = comparison.impact_score,
            "task evaluated"
        );

        TaskReport {
            task_id: comparison.task_id,
            task_name: task.name.clone(),
            domain: task.domain.clone(),
            control: comparison.control,
            treatment: comparison.treatment,
            delta: comparison.delta,
            impact_score: comparison.impact_score,
            statistics,
        }
    }

    /// One agent run in a fresh workspace, verified and scored.
    ///
    /// The workspace is released on every path; a workspace that cannot be
    /// provisioned counts as a non-completed run.
    async fn execute_arm(&self, task: &EvalTask, skill: Option<&SkillInjection>, arm: Arm) -> EvalMetrics {
        let workspace = match create_workspace(task.scaffold.as_ref(), skill) {
            Ok(workspace) => workspace,
            Err(e) => {
                warn!(task_id = %task.id, arm = %arm, error = %e, "workspace provisioning failed");
                let agent = AgentResult {
                    completed: false,
                    exit_code: 1,
                    conversation_log: format!("Error: {}", e),
                    ..Default::default()
                };
                return build_metrics(&agent, &[], None, &self.settings.cost);
            }
        };

        let timeout = Duration::from_millis(task.timeout_ms);
        let agent = self.agent.run(workspace.path(), &task.prompt, timeout).await;
        debug!(task_id = %task.id, arm = %arm, completed = agent.completed, "agent returned");

        let ctx = RunContext {
            workspace_dir: workspace.path(),
            prompt: &task.prompt,
            transcript: &agent.conversation_log,
            files_written: &agent.files_written,
            timeout,
        };
        let verification = self.verifier.run(&task.verifier, &ctx).await;
        workspace.cleanup();

        build_metrics(
            &agent,
            &verification.check_results,
            verification.judge_result.as_ref(),
            &self.settings.cost,
        )
    }
}

/// Tasks per skill, in order of first appearance, for skills with content
fn group_by_skill<'a>(
    tasks: &'a [EvalTask],
    skill_contents: &BTreeMap<String, String>,
) -> Vec<(&'a str, Vec<&'a EvalTask>)> {
    let mut groups: Vec<(&str, Vec<&EvalTask>)> = Vec::new();
    for task in tasks {
        for slug in &task.target_skill_slugs {
            if !skill_contents.contains_key(slug) {
                continue;
            }
            match groups.iter_mut().find(|(s, _)| *s == slug.as_str()) {
                Some((_, group)) => group.push(task),
                None => groups.push((slug.as_str(), vec![task])),
            }
        }
    }
    groups
}

fn task_statistics(control: &[EvalMetrics], treatment: &[EvalMetrics]) -> TaskStatistics {
    let values = |runs: &[EvalMetrics], field: fn(&EvalMetrics) -> f64| -> Vec<f64> {
        runs.iter().map(field).collect()
    };
    TaskStatistics {
        completion_rate: compute_ab_test(
            &values(control, |m: &EvalMetrics| m.completion_rate),
            &values(treatment, |m: &EvalMetrics| m.completion_rate),
        ),
        quality_composite: compute_ab_test(
            &values(control, |m: &EvalMetrics| m.quality_composite),
            &values(treatment, |m: &EvalMetrics| m.quality_composite),
        ),
    }
}

/// Mean deltas and token reduction over the tasks of one skill
pub fn aggregate_skill(tasks: &[TaskReport]) -> SkillAggregate {
    let n = tasks.len().max(1) as f64;
    let mean = |field: fn(&TaskReport) -> f64| tasks.iter().map(field).sum::<f64>() / n;

    let control_tokens: f64 = tasks.iter().map(|t| t.control.efficiency.total_tokens).sum();
    let treatment_tokens: f64 = tasks.iter().map(|t| t.treatment.efficiency.total_tokens).sum();
    let token_reduction_pct = if control_tokens > 0.0 {
        (control_tokens - treatment_tokens) / control_tokens
    } else {
        0.0
    };

    SkillAggregate {
        completion_rate_delta: mean(|t: &TaskReport| t.treatment.completion_rate - t.control.completion_rate),
        quality_composite_delta: mean(|t: &TaskReport| t.treatment.quality_composite - t.control.quality_composite),
        token_reduction_pct,
        impact_score: mean(|t: &TaskReport| t.impact_score),
    }
}

/// Batch summary over all skill reports
pub fn summarize(skills: &[SkillReport], tasks_executed: usize, elapsed: Duration) -> ReportSummary {
    let best_skill = skills.iter().fold(None::<BestSkill>, |best, skill| match best {
        Some(b) if b.impact_score >= skill.aggregate.impact_score => Some(b),
        _ => Some(BestSkill {
            slug: skill.skill_slug.clone(),
            impact_score: skill.aggregate.impact_score,
        }),
    });

    let average_impact_score = if skills.is_empty() {
        0.0
    } else {
        skills.iter().map(|s| s.aggregate.impact_score).sum::<f64>() / skills.len() as f64
    };

    let total_cost_usd = skills
        .iter()
        .flat_map(|s| &s.tasks)
        .map(|t| t.control.estimated_cost_usd + t.treatment.estimated_cost_usd)
        .sum();

    ReportSummary {
        skills_evaluated: skills.len(),
        tasks_executed,
        average_impact_score,
        best_skill,
        total_cost_usd,
        total_time_ms: elapsed.as_millis() as u64,
    }
}

/// Read `<skills_dir>/<slug>/SKILL.md` for each slug; unreadable skills are left out
pub fn load_skill_contents(skills_dir: &Path, slugs: &[String]) -> BTreeMap<String, String> {
    let mut contents = BTreeMap::new();
    for slug in slugs {
        let path = skills_dir.join(slug).join(SKILL_FILE);
        match std::fs::read_to_string(&path) {
            Ok(markdown) => {
                contents.insert(slug.clone(), markdown);
            }
            Err(e) => warn!(skill = %slug, path = %path.display(), error = %e, "skill not loaded"),
        }
    }
    contents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckKind, DeterministicVerifier, Difficulty, Verifier, VerifierCheck};
    use crate::verifier::tests::StaticJudge;
    use crate::workspace::SKILLS_SUBDIR;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Writes `out.txt` only when a skill was injected; the treatment also
    /// uses fewer tokens than the control
    struct MockAgent {
        delays_ms: BTreeMap<String, u64>,
        workspaces: Mutex<Vec<PathBuf>>,
    }

    impl MockAgent {
        fn new() -> Self {
            Self {
                delays_ms: BTreeMap::new(),
                workspaces: Mutex::new(Vec::new()),
            }
        }

        fn with_delays(delays: &[(&str, u64)]) -> Self {
            Self {
                delays_ms: delays.iter().map(|(p, d)| (p.to_string(), *d)).collect(),
                workspaces: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AgentRunner for MockAgent {
        async fn run(&self, workspace_dir: &Path, prompt: &str, _timeout: Duration) -> AgentResult {
            self.workspaces.lock().unwrap().push(workspace_dir.to_path_buf());
            if let Some(delay) = self.delays_ms.get(prompt) {
                tokio::time::sleep(Duration::from_millis(*delay)).await;
            }

            let treated = workspace_dir.join(SKILLS_SUBDIR).exists();
            if treated {
                std::fs::write(workspace_dir.join("out.txt"), prompt).unwrap();
            }
            AgentResult {
                completed: true,
                wall_time_ms: 10,
                message_count: 1,
                input_tokens: if treated { 800 } else { 1000 },
                exit_code: 0,
                ..Default::default()
            }
        }
    }

    fn task(id: &str, skills: &[&str]) -> EvalTask {
        let mut config = BTreeMap::new();
        config.insert("path".to_string(), serde_json::json!("out.txt"));
        EvalTask {
            id: id.to_string(),
            name: format!("Task {}", id),
            target_skill_slugs: skills.iter().map(|s| s.to_string()).collect(),
            domain: "web".to_string(),
            difficulty: Difficulty::Easy,
            prompt: id.to_string(),
            scaffold: None,
            verifier: Verifier::Deterministic(DeterministicVerifier {
                checks: vec![VerifierCheck {
                    name: "output written".to_string(),
                    kind: CheckKind::FileExists,
                    config,
                }],
            }),
            tags: None,
            timeout_ms: 5_000,
        }
    }

    fn skills(slugs: &[&str]) -> BTreeMap<String, String> {
        slugs
            .iter()
            .map(|s| (s.to_string(), format!("# {}", s)))
            .collect()
    }

    fn runner(agent: Arc<MockAgent>, settings: RunSettings) -> Runner {
        Runner::new(agent, Arc::new(StaticJudge(Err("unused".to_string()))), settings)
    }

    #[tokio::test]
    async fn test_skill_improves_completion() {
        let agent = Arc::new(MockAgent::new());
        let report = runner(agent, RunSettings::default())
            .run_evaluations(&[task("t1", &["writer"])], &skills(&["writer"]))
            .await;

        assert_eq!(report.skills.len(), 1);
        let task_report = &report.skills[0].tasks[0];
        assert_eq!(task_report.task_name, "Task t1");
        assert_eq!(task_report.control.completion_rate, 0.0);
        assert_eq!(task_report.treatment.completion_rate, 1.0);
        assert_eq!(task_report.delta.token_reduction, -200.0);
        // completion weight only; no judge ran
        assert!((task_report.impact_score - 0.55).abs() < 1e-12);
        assert!(task_report.statistics.is_none());

        let aggregate = &report.skills[0].aggregate;
        assert_eq!(aggregate.completion_rate_delta, 1.0);
        assert!((aggregate.token_reduction_pct - 0.2).abs() < 1e-12);

        assert_eq!(report.summary.skills_evaluated, 1);
        assert_eq!(report.summary.tasks_executed, 1);
        assert_eq!(report.summary.best_skill.as_ref().unwrap().slug, "writer");
        assert!(report.summary.total_cost_usd > 0.0);
        assert_eq!(report.run_id.len(), 36);
    }

    #[tokio::test]
    async fn test_repeated_runs_attach_statistics() {
        let agent = Arc::new(MockAgent::new());
        let settings = RunSettings {
            runs: 3,
            ..Default::default()
        };
        let report = runner(agent.clone(), settings)
            .run_evaluations(&[task("t1", &["writer"])], &skills(&["writer"]))
            .await;

        let stats = report.skills[0].tasks[0].statistics.as_ref().unwrap();
        assert_eq!(stats.completion_rate.control.sample_size, 3);
        assert_eq!(stats.completion_rate.treatment.mean, 1.0);
        assert_eq!(stats.completion_rate.delta.mean, 1.0);
        // 3 runs x 2 arms
        assert_eq!(agent.workspaces.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_workspaces_are_released() {
        let agent = Arc::new(MockAgent::new());
        runner(agent.clone(), RunSettings::default())
            .run_evaluations(&[task("t1", &["writer"])], &skills(&["writer"]))
            .await;

        let workspaces = agent.workspaces.lock().unwrap();
        assert_eq!(workspaces.len(), 2);
        assert!(workspaces.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn test_grouping_by_skill() {
        let agent = Arc::new(MockAgent::new());
        let tasks = vec![
            task("t1", &["beta", "alpha"]),
            task("t2", &["alpha", "missing"]),
            task("t3", &["missing"]),
        ];
        let report = runner(agent, RunSettings::default())
            .run_evaluations(&tasks, &skills(&["alpha", "beta"]))
            .await;

        let slugs: Vec<&str> = report.skills.iter().map(|s| s.skill_slug.as_str()).collect();
        assert_eq!(slugs, vec!["beta", "alpha"]);
        assert_eq!(report.skills[1].tasks.len(), 2);
        assert_eq!(report.summary.tasks_executed, 3);
        assert_eq!(report.summary.skills_evaluated, 2);
    }

    #[tokio::test]
    async fn test_concurrency_preserves_task_order() {
        let agent = Arc::new(MockAgent::with_delays(&[("slow", 150), ("medium", 50)]));
        let settings = RunSettings {
            max_concurrent_tasks: 3,
            ..Default::default()
        };
        let tasks = vec![task("slow", &["s"]), task("medium", &["s"]), task("fast", &["s"])];
        let report = runner(agent, settings).run_evaluations(&tasks, &skills(&["s"])).await;

        let ids: Vec<&str> = report.skills[0].tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["slow", "medium", "fast"]);
    }

    #[tokio::test]
    async fn test_unsafe_scaffold_counts_as_not_completed() {
        let agent = Arc::new(MockAgent::new());
        let mut bad = task("bad", &["writer"]);
        let mut scaffold = BTreeMap::new();
        scaffold.insert("../escape.txt".to_string(), "x".to_string());
        bad.scaffold = Some(scaffold);

        let report = runner(agent.clone(), RunSettings::default())
            .run_evaluations(&[bad], &skills(&["writer"]))
            .await;

        let task_report = &report.skills[0].tasks[0];
        assert_eq!(task_report.control.completion_rate, 0.0);
        assert_eq!(task_report.treatment.completion_rate, 0.0);
        assert_eq!(task_report.impact_score, 0.0);
        assert!(agent.workspaces.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_skills_yields_empty_report() {
        let agent = Arc::new(MockAgent::new());
        let report = runner(agent, RunSettings::default())
            .run_evaluations(&[task("t1", &["writer"])], &BTreeMap::new())
            .await;

        assert!(report.skills.is_empty());
        assert_eq!(report.summary.average_impact_score, 0.0);
        assert!(report.summary.best_skill.is_none());
        assert_eq!(report.summary.tasks_executed, 1);
    }

    fn task_report(control_tokens: f64, treatment_tokens: f64, impact: f64) -> TaskReport {
        let mut control = EvalMetrics::default();
        control.efficiency.total_tokens = control_tokens;
        control.estimated_cost_usd = 0.25;
        let mut treatment = EvalMetrics::default();
        treatment.efficiency.total_tokens = treatment_tokens;
        treatment.completion_rate = 0.5;
        treatment.estimated_cost_usd = 0.5;
        TaskReport {
            task_id: "t".to_string(),
            task_name: "t".to_string(),
            domain: "d".to_string(),
            control,
            treatment,
            delta: Default::default(),
            impact_score: impact,
            statistics: None,
        }
    }

    #[test]
    fn test_aggregate_skill() {
        let aggregate = aggregate_skill(&[task_report(1000.0, 500.0, 0.2), task_report(1000.0, 1100.0, 0.4)]);
        assert_eq!(aggregate.completion_rate_delta, 0.5);
        assert!((aggregate.token_reduction_pct - 0.2).abs() < 1e-12);
        assert!((aggregate.impact_score - 0.3).abs() < 1e-12);

        let zero_control = aggregate_skill(&[task_report(0.0, 500.0, 0.0)]);
        assert_eq!(zero_control.token_reduction_pct, 0.0);

        assert_eq!(aggregate_skill(&[]), SkillAggregate::default());
    }

    #[test]
    fn test_summarize_picks_first_best_skill() {
        let skill = |slug: &str, impact: f64| SkillReport {
            skill_slug: slug.to_string(),
            tasks: vec![task_report(1.0, 1.0, impact)],
            aggregate: SkillAggregate {
                impact_score: impact,
                ..Default::default()
            },
        };
        let summary = summarize(
            &[skill("a", 0.1), skill("b", 0.4), skill("c", 0.4)],
            5,
            Duration::from_millis(1234),
        );

        assert_eq!(summary.best_skill.unwrap().slug, "b");
        assert!((summary.average_impact_score - 0.3).abs() < 1e-12);
        assert!((summary.total_cost_usd - 2.25).abs() < 1e-12);
        assert_eq!(summary.tasks_executed, 5);
        assert_eq!(summary.total_time_ms, 1234);
    }

    #[test]
    fn test_load_skill_contents_skips_missing() {
        let dir = tempdir().unwrap();
        let skill_dir = dir.path().join("react-hooks");
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(skill_dir.join(SKILL_FILE), "# Hooks").unwrap();

        let contents = load_skill_contents(
            dir.path(),
            &["react-hooks".to_string(), "missing".to_string()],
        );
        assert_eq!(contents.len(), 1);
        assert_eq!(contents["react-hooks"], "# Hooks");
    }
}
