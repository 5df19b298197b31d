use crate::error::ConfigError;
use crate::impact::ImpactWeights;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection settings for an OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// API base URL
    pub api_endpoint: String,
    /// Environment variable name containing the API key
    pub env_var_api_key: String,
    /// Model name sent with every request
    pub model: String,
    /// Sampling temperature, the role default when unset
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Maximum tokens for a completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Requests per second, 0 disables rate limiting
    #[serde(default)]
    pub rate_limit_rps: f64,
}

impl EndpointConfig {
    /// Resolve the API key from the configured environment variable
    pub fn resolve_api_key(&self) -> std::result::Result<String, ConfigError> {
        std::env::var(&self.env_var_api_key)
            .map_err(|_| ConfigError::MissingCredential(self.env_var_api_key.clone()))
    }

    fn validate(&self, role: &str) -> std::result::Result<(), ConfigError> {
        let usable = self.rate_limit_rps == 0.0
            || (self.rate_limit_rps > 0.0
                && Duration::try_from_secs_f64(1.0 / self.rate_limit_rps).is_ok());
        if !usable {
            return Err(ConfigError::Invalid(format!(
                "{role}.rate_limit_rps must be a finite number >= 0"
            )));
        }
        if self.temperature.is_some_and(|t| !t.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "{role}.temperature must be a finite number"
            )));
        }
        Ok(())
    }
}

/// Judge temperature when the run file sets none
pub const JUDGE_TEMPERATURE: f64 = 0.1;

/// Agent temperature when the run file sets none
pub const AGENT_TEMPERATURE: f64 = 0.2;

fn default_max_tokens() -> u32 {
    4096
}

/// Token prices used for cost estimation, USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct CostRates {
    #[serde(default = "default_input_rate")]
    pub input_per_million: f64,
    #[serde(default = "default_output_rate")]
    pub output_per_million: f64,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            input_per_million: default_input_rate(),
            output_per_million: default_output_rate(),
        }
    }
}

fn default_input_rate() -> f64 {
    0.5
}

fn default_output_rate() -> f64 {
    1.5
}

/// Settings for the deterministic verifier
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VerifierSettings {
    /// Command run by `test-pass` checks that declare none
    #[serde(default = "default_test_command")]
    pub default_test_command: String,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            default_test_command: default_test_command(),
        }
    }
}

fn default_test_command() -> String {
    "bun test".to_string()
}

/// Root configuration of an evaluation batch
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Root of the task store (`<domain>/<task>/task.yaml`)
    pub tasks_dir: PathBuf,
    /// Directory holding `<slug>/SKILL.md`
    pub skills_dir: PathBuf,
    /// Repetitions per task and arm
    #[serde(default = "default_runs")]
    pub runs: usize,
    /// Number of tasks evaluated concurrently
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Optional path the JSON report is written to
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    /// LLM judge backend
    pub judge: EndpointConfig,
    /// LLM agent runner
    pub agent: EndpointConfig,
    #[serde(default)]
    pub cost: CostRates,
    #[serde(default)]
    pub impact_weights: ImpactWeights,
    #[serde(default)]
    pub verifier: VerifierSettings,
}

fn default_runs() -> usize {
    1
}

fn default_max_concurrent_tasks() -> usize {
    1
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;
        config.judge.temperature.get_or_insert(JUDGE_TEMPERATURE);
        config.agent.temperature.get_or_insert(AGENT_TEMPERATURE);

        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Reject settings that would make a batch meaningless
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.runs == 0 {
            return Err(ConfigError::Invalid("runs must be at least 1".to_string()));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.cost.input_per_million < 0.0 || self.cost.output_per_million < 0.0 {
            return Err(ConfigError::Invalid(
                "cost rates must not be negative".to_string(),
            ));
        }
        self.judge.validate("judge")?;
        self.agent.validate("agent")?;
        Ok(())
    }
}
