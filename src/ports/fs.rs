//! Filesystem port: the read/write/exec surface behind executor tools
//!
//! Semantics match the tool table exposed to the LLM:
//! - `read_file`: whole-file read
//! - `create_file`: write with parent-directory creation
//! - `edit_file`: exact single-occurrence replace, failing if absent
//! - `run_command`: shell execution with a 30 s hard timeout

use crate::error::{OrchestrationError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

/// Default subprocess timeout.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadOutput {
    pub content: String,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteOutput {
    pub message: String,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditOutput {
    pub message: String,
    pub replaced_length: usize,
    pub new_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Port to the filesystem and subprocess surface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FsPort: Send + Sync {
    async fn read_file(&self, path: &Path) -> Result<ReadOutput>;

    async fn create_file(&self, path: &Path, content: &str) -> Result<WriteOutput>;

    async fn edit_file(&self, path: &Path, old_text: &str, new_text: &str) -> Result<EditOutput>;

    async fn run_command(
        &self,
        command: &str,
        working_dir: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<CommandOutput>;
}

/// Local filesystem implementation over tokio.
#[derive(Debug, Clone, Default)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FsPort for LocalFs {
    async fn read_file(&self, path: &Path) -> Result<ReadOutput> {
        debug!("Reading file: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| OrchestrationError::Tool(format!("File not found: {}: {}", path.display(), e)))?;

        let size = content.len();
        Ok(ReadOutput { content, size })
    }

    async fn create_file(&self, path: &Path, content: &str) -> Result<WriteOutput> {
        debug!("Creating file: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    OrchestrationError::Tool(format!(
                        "Failed to create parent directories for {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            }
        }

        tokio::fs::write(path, content).await.map_err(|e| {
            OrchestrationError::Tool(format!("Failed to write {}: {}", path.display(), e))
        })?;

        Ok(WriteOutput {
            message: format!("File created: {}", path.display()),
            size: content.len(),
        })
    }

    async fn edit_file(&self, path: &Path, old_text: &str, new_text: &str) -> Result<EditOutput> {
        debug!("Editing file: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| OrchestrationError::Tool(format!("File not found: {}: {}", path.display(), e)))?;

        if !content.contains(old_text) {
            return Err(OrchestrationError::Tool(format!(
                "Text to replace not found in {}",
                path.display()
            )));
        }

        let new_content = content.replacen(old_text, new_text, 1);
        tokio::fs::write(path, new_content).await.map_err(|e| {
            OrchestrationError::Tool(format!("Failed to write {}: {}", path.display(), e))
        })?;

        Ok(EditOutput {
            message: format!("File edited: {}", path.display()),
            replaced_length: old_text.len(),
            new_length: new_text.len(),
        })
    }

    async fn run_command(
        &self,
        command: &str,
        working_dir: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        debug!("Running command: {}", command);

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| OrchestrationError::Tool(format!("Failed to spawn command: {}", e)))?;

        // kill_on_drop reaps the child if the timeout wins the race
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(OrchestrationError::Tool(format!(
                "Command execution failed: {}",
                e
            ))),
            Err(_) => Err(OrchestrationError::Timeout(format!(
                "Command execution timeout ({}s limit)",
                timeout.as_secs()
            ))),
        }
    }
}
