use crate::llm::ChatClient;
use crate::models::AgentResult;
use crate::workspace::{SKILL_FILE, SKILLS_SUBDIR, resolve_in_workspace, write_file};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You are an expert software engineer. Complete the task below by writing the required code.";

const FORMAT_INSTRUCTIONS: &str = "IMPORTANT: Respond ONLY with the files you create/modify in this exact format:
--- FILE: path/to/file.ts ---
```
file content here
```

Do not include explanations outside of file blocks. Only output the code files.";

/// Something that attempts a task inside a prepared workspace.
///
/// Implementations never fail: errors and timeouts are reported as a
/// non-completed [`AgentResult`].
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, workspace_dir: &Path, prompt: &str, timeout: Duration) -> AgentResult;
}

/// Single-shot agent: one chat completion whose file blocks are written
/// into the workspace
pub struct LlmAgentRunner {
    client: ChatClient,
}

impl LlmAgentRunner {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    async fn invoke(&self, workspace_dir: &Path, prompt: &str) -> Result<AgentResult> {
        let system = build_system_prompt(&read_skills(workspace_dir));
        let user = build_user_prompt(prompt, &collect_files(workspace_dir));

        let completion = self.client.complete(Some(&system), &user).await?;
        let parsed = parse_files_from_response(&completion.content);

        let mut files_written = BTreeMap::new();
        for (relative, content) in parsed {
            let written = resolve_in_workspace(workspace_dir, &relative)
                .and_then(|target| write_file(&target, &content));
            match written {
                Ok(()) => {
                    files_written.insert(relative, content);
                }
                Err(e) => warn!(path = %relative, error = %e, "agent file not written"),
            }
        }

        Ok(AgentResult {
            completed: true,
            message_count: 1,
            input_tokens: completion.prompt_tokens,
            output_tokens: completion.completion_tokens,
            files_written,
            conversation_log: completion.content,
            exit_code: 0,
            ..Default::default()
        })
    }
}

#[async_trait]
impl AgentRunner for LlmAgentRunner {
    async fn run(&self, workspace_dir: &Path, prompt: &str, timeout: Duration) -> AgentResult {
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.invoke(workspace_dir, prompt)).await;
        let wall_time_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(result)) => {
                debug!(files = result.files_written.len(), wall_time_ms, "agent finished");
                AgentResult {
                    wall_time_ms,
                    ..result
                }
            }
            Ok(Err(e)) => {
                warn!(error = %format!("{:#}", e), "agent run failed");
                failed_result(wall_time_ms, format!("Error: {:#}", e))
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "agent run timed out");
                failed_result(
                    wall_time_ms,
                    format!("Error: agent timed out after {} ms", timeout.as_millis()),
                )
            }
        }
    }
}

fn failed_result(wall_time_ms: u64, conversation_log: String) -> AgentResult {
    AgentResult {
        completed: false,
        wall_time_ms,
        message_count: 1,
        conversation_log,
        exit_code: 1,
        ..Default::default()
    }
}

fn build_system_prompt(skills: &[(String, String)]) -> String {
    let skill_context: String = skills
        .iter()
        .map(|(slug, content)| format!("\n\n## Skill: {}\n{}", slug, content))
        .collect();
    format!("{}\n{}\n\n{}", SYSTEM_PROMPT, skill_context, FORMAT_INSTRUCTIONS)
}

fn build_user_prompt(prompt: &str, files: &[(String, String)]) -> String {
    if files.is_empty() {
        return prompt.to_string();
    }
    let rendered = files
        .iter()
        .map(|(path, content)| format!("### {}\n```\n{}\n```", path, content))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{}\n\n## Existing Project Files\n{}", prompt, rendered)
}

/// Skills injected into the workspace, by slug
fn read_skills(workspace_dir: &Path) -> Vec<(String, String)> {
    let Ok(entries) = std::fs::read_dir(workspace_dir.join(SKILLS_SUBDIR)) else {
        return Vec::new();
    };
    let mut skills: Vec<(String, String)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let slug = entry.file_name().to_str()?.to_string();
            let content = std::fs::read_to_string(entry.path().join(SKILL_FILE)).ok()?;
            Some((slug, content))
        })
        .collect();
    skills.sort();
    skills
}

/// Text files under `dir`, skipping dot-entries and `node_modules`
pub fn collect_files(dir: &Path) -> Vec<(String, String)> {
    let mut files = Vec::new();
    collect_into(dir, "", &mut files);
    files.sort();
    files
}

fn collect_into(dir: &Path, prefix: &str, files: &mut Vec<(String, String)>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(|entry| entry.ok()) {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') || name == "node_modules" {
            continue;
        }
        let relative = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };
        let path = entry.path();
        if path.is_dir() {
            collect_into(&path, &relative, files);
        } else if let Ok(content) = std::fs::read_to_string(&path) {
            files.push((relative, content));
        }
    }
}

/// Extract `--- FILE: path ---` blocks from a model answer.
///
/// When none are present, fenced JS/TS blocks whose first line is a
/// `// path` comment are accepted instead.
pub fn parse_files_from_response(response: &str) -> BTreeMap<String, String> {
    static FILE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"---\s*FILE:\s*(.+?)\s*---\s*\n```[^\n]*\n([\s\S]*?)```").unwrap()
    });
    static COMMENT_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"```(?:typescript|tsx?|javascript|jsx?)\s*\n//\s*(.+?)\s*\n([\s\S]*?)```").unwrap()
    });

    let mut files: BTreeMap<String, String> = FILE_BLOCK_RE
        .captures_iter(response)
        .map(|caps| (caps[1].trim().to_string(), caps[2].to_string()))
        .collect();

    if files.is_empty() {
        files = COMMENT_PATH_RE
            .captures_iter(response)
            .map(|caps| (caps[1].trim().to_string(), caps[2].to_string()))
            .filter(|(path, _)| path.contains('.') || path.contains('/'))
            .collect();
    }

    files
}
