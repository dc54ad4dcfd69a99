//! Markdown transcript files for workflow runs.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::agent::AgentId;
use crate::state::WorkflowStatus;

/// Per-workflow transcript logger.
///
/// Writes a markdown audit file per workflow run: start, each agent step,
/// retries, and completion. Console logging is handled separately through
/// `tracing`; the transcript is the durable record.
#[derive(Debug)]
pub struct TranscriptLogger {
    log_file: PathBuf,
}

impl TranscriptLogger {
    /// Open (or create) the transcript file for one workflow.
    ///
    /// # Arguments
    /// * `dir` - Transcript directory; created if missing.
    /// * `workflow_id` - Id used to name the file.
    pub fn for_workflow(dir: &Path, workflow_id: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create transcript directory: {}", dir.display()))?;

        let log_file = dir.join(format!("workflow_{}.md", workflow_id));
        let logger = Self { log_file };

        if !logger.log_file.exists() {
            logger.initialize_log_file(workflow_id)?;
        }

        Ok(logger)
    }

    fn initialize_log_file(&self, workflow_id: &str) -> Result<()> {
        let mut file = File::create(&self.log_file).with_context(|| {
            format!("Failed to create transcript file: {}", self.log_file.display())
        })?;

        let now: DateTime<Utc> = Utc::now();
        writeln!(file, "# Workflow Transcript - {}\n", workflow_id)?;
        writeln!(file, "Transcript started: {}\n", now.to_rfc3339())?;
        writeln!(file, "---\n")?;
        Ok(())
    }

    fn append_to_log(&self, content: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .with_context(|| {
                format!("Failed to open transcript file: {}", self.log_file.display())
            })?;

        write!(file, "{}", content).with_context(|| "Failed to write to transcript file")?;
        Ok(())
    }

    /// Log workflow start with the task description.
    pub fn log_workflow_started(&self, task: &str) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let content = format!(
            "## Workflow Started - {}\n\n**Task:** {}\n\n",
            now.to_rfc3339(),
            task
        );
        self.append_to_log(&content)
    }

    /// Log one completed agent step.
    pub fn log_agent_step(&self, agent: AgentId, step: usize) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let content = format!(
            "### Step {} - {}\n\n**Agent:** {}\n\n",
            step,
            now.to_rfc3339(),
            agent
        );
        self.append_to_log(&content)
    }

    /// Log a retried recoverable failure.
    pub fn log_retry(&self, agent: AgentId, attempt: u32, error: &str) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let content = format!(
            "### Retry - {}\n\n**Agent:** {}\n**Attempt:** {}\n**Error:** {}\n\n",
            now.to_rfc3339(),
            agent,
            attempt,
            error
        );
        self.append_to_log(&content)
    }

    /// Log workflow completion.
    pub fn log_workflow_finished(&self, status: WorkflowStatus, detail: Option<&str>) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let mut content = format!(
            "## Workflow Finished - {}\n\n**Status:** {}\n",
            now.to_rfc3339(),
            status
        );
        if let Some(detail) = detail {
            content.push_str(&format!("**Detail:** {}\n", detail));
        }
        content.push_str("\n---\n\n");
        self.append_to_log(&content)
    }

    /// Path of the transcript file.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}
