use crate::error::TaskLoadError;
use crate::models::EvalTask;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of a task definition inside its task directory
pub const TASK_FILE: &str = "task.yaml";

/// Restricts which tasks a batch picks up
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Exact domain directory name
    pub domain: Option<String>,
    /// Skill the task must target
    pub skill_slug: Option<String>,
    /// Task must carry at least one of these tags; empty means no restriction
    pub tags: Vec<String>,
}

impl TaskFilter {
    fn accepts(&self, task: &EvalTask) -> bool {
        if let Some(slug) = &self.skill_slug {
            if !task.target_skill_slugs.contains(slug) {
                return false;
            }
        }
        self.tags.is_empty() || task.has_any_tag(&self.tags)
    }
}

/// A task file that was left out of the batch
#[derive(Debug)]
pub struct SkippedTask {
    pub path: PathBuf,
    pub error: TaskLoadError,
}

/// Tasks that loaded plus the files that did not
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub tasks: Vec<EvalTask>,
    pub skipped: Vec<SkippedTask>,
}

/// Load every valid task under `root`, logging each skipped file
pub fn load_tasks(root: &Path, filter: &TaskFilter) -> Vec<EvalTask> {
    let outcome = load_tasks_with_report(root, filter);
    for skipped in &outcome.skipped {
        warn!(path = %skipped.path.display(), error = %skipped.error, "skipping task file");
    }
    outcome.tasks
}

/// Walk `<root>/<domain>/<task>/task.yaml` in lexical order.
///
/// Unreadable directories contribute nothing; malformed or invalid task files
/// are collected in [`LoadOutcome::skipped`] instead of aborting the walk.
pub fn load_tasks_with_report(root: &Path, filter: &TaskFilter) -> LoadOutcome {
    let mut outcome = LoadOutcome::default();

    for (domain, domain_dir) in sorted_subdirs(root) {
        if let Some(wanted) = &filter.domain {
            if &domain != wanted {
                continue;
            }
        }

        for (_, task_dir) in sorted_subdirs(&domain_dir) {
            let path = task_dir.join(TASK_FILE);
            if !path.is_file() {
                continue;
            }
            match load_task_file(&path) {
                Ok(task) if filter.accepts(&task) => outcome.tasks.push(task),
                Ok(task) => debug!(task_id = %task.id, "task filtered out"),
                Err(error) => outcome.skipped.push(SkippedTask { path, error }),
            }
        }
    }

    outcome
}

/// Parse and validate a single task file
pub fn load_task_file(path: &Path) -> Result<EvalTask, TaskLoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| TaskLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let task: EvalTask = serde_yaml::from_str(&content).map_err(|source| TaskLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    task.validate().map_err(|reason| TaskLoadError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;

    Ok(task)
}

fn sorted_subdirs(dir: &Path) -> Vec<(String, PathBuf)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "cannot list directory");
            return Vec::new();
        }
    };

    let mut dirs: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?.to_string();
            Some((name, path))
        })
        .collect();
    dirs.sort();
    dirs
}
