use std::path::PathBuf;

/// Why a task file was left out of a batch
#[derive(Debug, thiserror::Error)]
pub enum TaskLoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid task {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Errors raised while provisioning a workspace
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace directory: {0}")]
    Create(#[source] std::io::Error),

    #[error("path escapes the workspace: {0}")]
    UnsafePath(String),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal configuration problems detected before any task runs
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {0} not found")]
    MissingCredential(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
