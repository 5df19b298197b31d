use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skill_impact_eval::agent::LlmAgentRunner;
use skill_impact_eval::config::Config;
use skill_impact_eval::llm::ChatClient;
use skill_impact_eval::loader::{TaskFilter, load_tasks};
use skill_impact_eval::models::EvalTask;
use skill_impact_eval::output::{self, OutputFormat};
use skill_impact_eval::runner::{RunSettings, Runner, load_skill_contents};
use skill_impact_eval::telemetry::init_tracing;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info, warn};

/// Skill Eval CLI - Measure how an injected skill changes agent task results
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the tasks a run would pick up
    Tasks {
        /// Path to the TOML run file
        run_file: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,

        /// Only tasks targeting this skill
        #[arg(long)]
        skill: Option<String>,
    },

    /// Evaluate skills against their tasks
    Run {
        /// Path to the TOML run file
        run_file: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,

        /// Skills to evaluate (comma separated); defaults to every targeted skill
        #[arg(long, value_delimiter = ',')]
        skill: Vec<String>,

        /// Repetitions per task and arm, overrides the run file
        #[arg(long)]
        runs: Option<usize>,

        /// Output format: plain or json
        #[arg(short, long, default_value = "plain")]
        output_format: OutputFormat,

        /// Also write the rendered report to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct FilterArgs {
    /// Only tasks of this domain
    #[arg(long)]
    domain: Option<String>,

    /// Only tasks carrying one of these tags (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json, if args.verbose { Level::DEBUG } else { Level::INFO });

    match args.command {
        Command::Tasks {
            run_file,
            filter,
            skill,
        } => list_tasks(run_file, filter, skill),
        Command::Run {
            run_file,
            filter,
            skill,
            runs,
            output_format,
            output,
        } => run(run_file, filter, skill, runs, output_format, output).await,
    }
}

fn list_tasks(run_file: PathBuf, filter: FilterArgs, skill: Option<String>) -> Result<()> {
    let config = Config::from_file(&run_file)?;
    let filter = TaskFilter {
        domain: filter.domain,
        skill_slug: skill,
        tags: filter.tags,
    };
    let tasks = load_tasks(&config.tasks_dir, &filter);
    println!("{}", output::format_task_list(&tasks));
    Ok(())
}

async fn run(
    run_file: PathBuf,
    filter: FilterArgs,
    skills: Vec<String>,
    runs: Option<usize>,
    output_format: OutputFormat,
    output_path: Option<PathBuf>,
) -> Result<()> {
    let mut config = Config::from_file(&run_file)?;
    if let Some(runs) = runs {
        config.runs = runs;
        config.validate().context("Invalid --runs")?;
    }

    // Credentials are resolved before any task runs
    let judge = ChatClient::from_config(&config.judge).context("Judge backend misconfigured")?;
    let agent = ChatClient::from_config(&config.agent).context("Agent backend misconfigured")?;
    info!(judge_model = judge.model(), agent_model = agent.model(), "backends ready");

    let filter = TaskFilter {
        domain: filter.domain,
        skill_slug: None,
        tags: filter.tags,
    };
    let tasks: Vec<EvalTask> = load_tasks(&config.tasks_dir, &filter)
        .into_iter()
        .filter(|task| skills.is_empty() || task.target_skill_slugs.iter().any(|s| skills.contains(s)))
        .collect();
    if tasks.is_empty() {
        warn!(tasks_dir = %config.tasks_dir.display(), "no tasks matched");
    }

    let slugs: Vec<String> = if skills.is_empty() {
        tasks
            .iter()
            .flat_map(|t| t.target_skill_slugs.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    } else {
        skills
    };
    let skill_contents = load_skill_contents(&config.skills_dir, &slugs);

    let runner = Runner::new(
        Arc::new(LlmAgentRunner::new(agent)),
        Arc::new(judge),
        RunSettings::from(&config),
    );
    let report = runner.run_evaluations(&tasks, &skill_contents).await;

    let rendered = output::render_report(&report, output_format)?;
    println!("{}", rendered);

    if let Some(path) = output_path {
        output::write_report(&path, &rendered)?;
        info!(path = %path.display(), "report written");
    }
    if let Some(path) = &config.output_path {
        output::write_json_report(&report, path)?;
        info!(path = %path.display(), "JSON report written");
    }

    Ok(())
}
