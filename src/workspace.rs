use crate::error::WorkspaceError;
use crate::models::SkillInjection;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Directory, relative to the workspace root, the agent scans for skills
pub const SKILLS_SUBDIR: &str = ".agents/skills";

/// Skill file name inside `<SKILLS_SUBDIR>/<slug>/`
pub const SKILL_FILE: &str = "SKILL.md";

const WORKSPACE_PREFIX: &str = "skill-eval-";

/// Isolated scratch directory owned by a single run.
///
/// The directory is removed when the workspace is dropped, so every exit
/// path of the owning run releases it. Removal errors are logged, never
/// raised.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory tree now instead of at drop
    pub fn cleanup(self) {
        drop(self);
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => debug!(path = %self.path.display(), "workspace removed"),
                Err(e) => warn!(path = %self.path.display(), error = %e, "workspace cleanup failed"),
            }
        }
    }
}

/// Allocate a fresh workspace, materialize the scaffold and inject the skill.
///
/// The skill lands at `.agents/skills/<slug>/SKILL.md`; its presence is the
/// only difference between a treatment and a control workspace.
pub fn create_workspace(
    scaffold: Option<&BTreeMap<String, String>>,
    skill: Option<&SkillInjection>,
) -> Result<Workspace, WorkspaceError> {
    let dir = tempfile::Builder::new()
        .prefix(WORKSPACE_PREFIX)
        .tempdir()
        .map_err(WorkspaceError::Create)?;
    let workspace = Workspace {
        path: dir.path().to_path_buf(),
        dir: Some(dir),
    };

    if let Some(files) = scaffold {
        for (relative, content) in files {
            let target = resolve_in_workspace(workspace.path(), relative)?;
            write_file(&target, content)?;
        }
    }

    if let Some(skill) = skill {
        if !is_single_component(&skill.slug) {
            return Err(WorkspaceError::UnsafePath(skill.slug.clone()));
        }
        let target = workspace
            .path()
            .join(SKILLS_SUBDIR)
            .join(&skill.slug)
            .join(SKILL_FILE);
        write_file(&target, &skill.markdown)?;
    }

    debug!(path = %workspace.path().display(), skill = ?skill.map(|s| &s.slug), "workspace created");
    Ok(workspace)
}

/// Join `relative` onto `root`, refusing absolute paths and `..` components
pub fn resolve_in_workspace(root: &Path, relative: &str) -> Result<PathBuf, WorkspaceError> {
    let candidate = Path::new(relative);
    let safe = !relative.is_empty()
        && candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        return Err(WorkspaceError::UnsafePath(relative.to_string()));
    }
    Ok(root.join(candidate))
}

/// Write `content` to `path`, creating parent directories
pub fn write_file(path: &Path, content: &str) -> Result<(), WorkspaceError> {
    let to_error = |source| WorkspaceError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(to_error)?;
    }
    std::fs::write(path, content).map_err(to_error)
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
