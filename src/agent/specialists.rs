//! The built-in specialist roster.
//!
//! Each specialist is a thin shell around the text-generation capability:
//! it renders a prompt from its declared read slots, parses the reply into
//! its write slots, and appends one audit message. All routing decisions
//! stay outside, in the routing policy.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::traits::{Agent, MemoryStore, TextGenerator};
use super::types::{AgentError, AgentId, IoContract, StateField};
use crate::state::{
    CodeIssue, FileArtifact, IssueCategory, SecurityFinding, Severity, TestResult, WorkflowState,
};

/// Extract a JSON payload from a provider reply.
///
/// Providers frequently fence their JSON in a markdown block; accept both
/// the fenced and the bare form.
fn json_payload(reply: &str) -> &str {
    let trimmed = reply.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    trimmed
}

fn render_files(state: &WorkflowState) -> String {
    if state.files.is_empty() {
        return "(no files yet)".to_string();
    }
    let mut out = String::new();
    for (path, artifact) in &state.files {
        out.push_str(&format!(
            "--- {} ({})\n{}\n",
            path,
            artifact.language.as_deref().unwrap_or("unknown"),
            artifact.content
        ));
    }
    out
}

#[derive(Debug, Deserialize)]
struct FileDraft {
    path: String,
    #[serde(default)]
    language: Option<String>,
    content: String,
}

fn apply_file_drafts(state: &mut WorkflowState, drafts: Vec<FileDraft>) -> Vec<String> {
    let mut paths = Vec::with_capacity(drafts.len());
    for draft in drafts {
        state.files.insert(
            draft.path.clone(),
            FileArtifact {
                content: draft.content,
                language: draft.language,
            },
        );
        paths.push(draft.path);
    }
    paths
}

/// Designs the solution before any code is written.
pub struct ArchitectAgent {
    provider: Arc<dyn TextGenerator>,
    memory: Arc<dyn MemoryStore>,
}

impl ArchitectAgent {
    /// Create the architect over its collaborator capabilities.
    pub fn new(provider: Arc<dyn TextGenerator>, memory: Arc<dyn MemoryStore>) -> Self {
        Self { provider, memory }
    }
}

#[async_trait]
impl Agent for ArchitectAgent {
    fn id(&self) -> AgentId {
        AgentId::Architect
    }

    fn contract(&self) -> IoContract {
        IoContract::new(&[StateField::Files], &[StateField::Plan])
    }

    async fn run(&self, mut state: WorkflowState) -> Result<WorkflowState, AgentError> {
        let memories = self.memory.recall(&state.task, 3).await;
        let mut context = String::new();
        for entry in &memories {
            context.push_str(&format!("- {}\n", entry.text));
        }

        let prompt = format!(
            "You are the architect in a team of software agents.\n\
             Task: {}\n\n\
             Existing files:\n{}\n\
             Relevant notes from earlier work:\n{}\n\
             Produce a short implementation plan: the components to build or \
             change, in order, with one line of rationale each.",
            state.task,
            render_files(&state),
            if context.is_empty() { "(none)" } else { &context }
        );

        let reply = self.provider.generate(&prompt).await?;
        let plan = reply.trim().to_string();
        self.memory
            .remember(&format!("plan for '{}': {}", state.task, plan), Some(self.id()))
            .await;

        state.push_message(self.id(), plan.clone());
        state.plan = Some(plan);
        Ok(state)
    }
}

/// Writes and reworks code artifacts.
pub struct CoderAgent {
    provider: Arc<dyn TextGenerator>,
}

impl CoderAgent {
    /// Create the coder over the text-generation capability.
    pub fn new(provider: Arc<dyn TextGenerator>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Agent for CoderAgent {
    fn id(&self) -> AgentId {
        AgentId::Coder
    }

    fn contract(&self) -> IoContract {
        IoContract::new(
            &[
                StateField::Plan,
                StateField::Files,
                StateField::CodeIssues,
                StateField::TestResults,
                StateField::SecurityFindings,
            ],
            &[StateField::Files],
        )
    }

    async fn run(&self, mut state: WorkflowState) -> Result<WorkflowState, AgentError> {
        let mut feedback = String::new();
        for issue in state.code_issues.iter().filter(|i| i.blocking) {
            feedback.push_str(&format!("- review: {} ({})\n", issue.description, issue.file_path));
        }
        for result in state.test_results.iter().filter(|t| !t.passed) {
            feedback.push_str(&format!(
                "- failing test {}: {}\n",
                result.name,
                result.message.as_deref().unwrap_or("no detail")
            ));
        }
        for finding in state.security_findings.iter().filter(|f| f.severity.is_blocking()) {
            feedback.push_str(&format!("- security: {} ({})\n", finding.description, finding.file_path));
        }

        let prompt = format!(
            "You are the coder in a team of software agents.\n\
             Task: {}\n\n\
             Plan:\n{}\n\n\
             Current files:\n{}\n\
             Outstanding feedback to resolve:\n{}\n\
             Reply with ONLY a JSON array of files to write, each object \
             {{\"path\", \"language\", \"content\"}}.",
            state.task,
            state.plan.as_deref().unwrap_or("(none)"),
            render_files(&state),
            if feedback.is_empty() { "(none)" } else { &feedback }
        );

        let reply = self.provider.generate(&prompt).await?;
        let drafts: Vec<FileDraft> = serde_json::from_str(json_payload(&reply))
            .map_err(|e| AgentError::Recoverable(format!("coder reply was not valid JSON: {}", e)))?;

        let paths = apply_file_drafts(&mut state, drafts);
        state.push_message(self.id(), format!("Wrote {} file(s): {}", paths.len(), paths.join(", ")));
        Ok(state)
    }
}

#[derive(Debug, Deserialize)]
struct IssueDraft {
    file_path: String,
    #[serde(default)]
    line: Option<u32>,
    category: IssueCategory,
    description: String,
    #[serde(default)]
    recommendation: Option<String>,
    #[serde(default)]
    blocking: bool,
}

#[derive(Debug, Deserialize)]
struct ReviewDraft {
    #[serde(default)]
    issues: Vec<IssueDraft>,
    #[serde(default)]
    summary: Option<String>,
}

/// Examines code for quality, style, and correctness issues.
pub struct ReviewerAgent {
    provider: Arc<dyn TextGenerator>,
    memory: Arc<dyn MemoryStore>,
}

impl ReviewerAgent {
    /// Create the reviewer over its collaborator capabilities.
    pub fn new(provider: Arc<dyn TextGenerator>, memory: Arc<dyn MemoryStore>) -> Self {
        Self { provider, memory }
    }
}

#[async_trait]
impl Agent for ReviewerAgent {
    fn id(&self) -> AgentId {
        AgentId::Reviewer
    }

    fn contract(&self) -> IoContract {
        IoContract::new(
            &[StateField::Files],
            &[StateField::CodeIssues, StateField::ReviewNotes],
        )
    }

    async fn run(&self, mut state: WorkflowState) -> Result<WorkflowState, AgentError> {
        let prompt = format!(
            "You are the code reviewer in a team of software agents.\n\
             Task: {}\n\n\
             Files under review:\n{}\n\
             Reply with ONLY a JSON object {{\"summary\", \"issues\"}} where \
             issues is an array of {{\"file_path\", \"line\", \"category\" \
             (STYLE|PERFORMANCE|MAINTAINABILITY|BUG), \"description\", \
             \"recommendation\", \"blocking\"}}. Mark an issue blocking only \
             if the code must not ship with it.",
            state.task,
            render_files(&state)
        );

        let reply = self.provider.generate(&prompt).await?;

        // Lenient parse: an unstructured review still carries signal, so it
        // lands in the notes with zero issues rather than failing the step.
        let (issues, summary) = match serde_json::from_str::<ReviewDraft>(json_payload(&reply)) {
            Ok(draft) => (draft.issues, draft.summary),
            Err(_) => (Vec::new(), Some(reply.trim().to_string())),
        };

        state.code_issues = issues
            .into_iter()
            .map(|draft| CodeIssue {
                file_path: draft.file_path,
                line: draft.line,
                category: draft.category,
                description: draft.description,
                recommendation: draft.recommendation,
                blocking: draft.blocking,
            })
            .collect();

        let blocking = state.code_issues.iter().filter(|i| i.blocking).count();
        let note = format!(
            "Review finished: {} issue(s), {} blocking.",
            state.code_issues.len(),
            blocking
        );
        if let Some(summary) = &summary {
            self.memory
                .remember(&format!("review of '{}': {}", state.task, summary), Some(self.id()))
                .await;
        }
        state.review_notes = summary;
        state.push_message(self.id(), note);
        Ok(state)
    }
}

#[derive(Debug, Deserialize)]
struct TestDraft {
    name: String,
    passed: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Derives test outcomes for the produced artifacts.
pub struct TesterAgent {
    provider: Arc<dyn TextGenerator>,
}

impl TesterAgent {
    /// Create the tester over the text-generation capability.
    pub fn new(provider: Arc<dyn TextGenerator>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Agent for TesterAgent {
    fn id(&self) -> AgentId {
        AgentId::Tester
    }

    fn contract(&self) -> IoContract {
        IoContract::new(&[StateField::Files], &[StateField::TestResults])
    }

    async fn run(&self, mut state: WorkflowState) -> Result<WorkflowState, AgentError> {
        let prompt = format!(
            "You are the tester in a team of software agents.\n\
             Task: {}\n\n\
             Files under test:\n{}\n\
             Walk through the code and report the outcome of each behavior \
             you would test. Reply with ONLY a JSON array of \
             {{\"name\", \"passed\", \"message\"}}.",
            state.task,
            render_files(&state)
        );

        let reply = self.provider.generate(&prompt).await?;
        let drafts: Vec<TestDraft> = serde_json::from_str(json_payload(&reply))
            .map_err(|e| AgentError::Recoverable(format!("tester reply was not valid JSON: {}", e)))?;

        state.test_results = drafts
            .into_iter()
            .map(|draft| TestResult {
                name: draft.name,
                passed: draft.passed,
                message: draft.message,
            })
            .collect();

        let passed = state.test_results.iter().filter(|t| t.passed).count();
        let failed = state.test_results.len() - passed;
        state.push_message(self.id(), format!("Test results: {} passed, {} failed.", passed, failed));
        Ok(state)
    }
}

/// Improves structure without changing behavior.
pub struct RefactorerAgent {
    provider: Arc<dyn TextGenerator>,
}

impl RefactorerAgent {
    /// Create the refactorer over the text-generation capability.
    pub fn new(provider: Arc<dyn TextGenerator>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Agent for RefactorerAgent {
    fn id(&self) -> AgentId {
        AgentId::Refactorer
    }

    fn contract(&self) -> IoContract {
        IoContract::new(
            &[StateField::Files, StateField::CodeIssues],
            &[StateField::Files],
        )
    }

    async fn run(&self, mut state: WorkflowState) -> Result<WorkflowState, AgentError> {
        let mut advisories = String::new();
        for issue in &state.code_issues {
            advisories.push_str(&format!("- {} ({})\n", issue.description, issue.file_path));
        }

        let prompt = format!(
            "You are the refactorer in a team of software agents.\n\
             Task: {}\n\n\
             Current files:\n{}\n\
             Advisory review notes:\n{}\n\
             Improve structure and readability without changing behavior. \
             Reply with ONLY a JSON array of rewritten files, each object \
             {{\"path\", \"language\", \"content\"}}.",
            state.task,
            render_files(&state),
            if advisories.is_empty() { "(none)" } else { &advisories }
        );

        let reply = self.provider.generate(&prompt).await?;
        let drafts: Vec<FileDraft> = serde_json::from_str(json_payload(&reply)).map_err(|e| {
            AgentError::Recoverable(format!("refactorer reply was not valid JSON: {}", e))
        })?;

        let paths = apply_file_drafts(&mut state, drafts);
        state.push_message(self.id(), format!("Refactored {} file(s): {}", paths.len(), paths.join(", ")));
        Ok(state)
    }
}

#[derive(Debug, Deserialize)]
struct FindingDraft {
    file_path: String,
    #[serde(default)]
    line: Option<u32>,
    severity: Severity,
    description: String,
    #[serde(default)]
    recommendation: Option<String>,
}

/// Audits the artifacts for vulnerabilities.
pub struct SecurityAgent {
    provider: Arc<dyn TextGenerator>,
}

impl SecurityAgent {
    /// Create the security auditor over the text-generation capability.
    pub fn new(provider: Arc<dyn TextGenerator>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Agent for SecurityAgent {
    fn id(&self) -> AgentId {
        AgentId::Security
    }

    fn contract(&self) -> IoContract {
        IoContract::new(&[StateField::Files], &[StateField::SecurityFindings])
    }

    async fn run(&self, mut state: WorkflowState) -> Result<WorkflowState, AgentError> {
        let prompt = format!(
            "You are the security auditor in a team of software agents.\n\
             Task: {}\n\n\
             Files under audit:\n{}\n\
             Reply with ONLY a JSON array of findings, each object \
             {{\"file_path\", \"line\", \"severity\" (LOW|MEDIUM|HIGH|CRITICAL), \
             \"description\", \"recommendation\"}}. An empty array means the \
             audit is clean.",
            state.task,
            render_files(&state)
        );

        let reply = self.provider.generate(&prompt).await?;
        let findings = match serde_json::from_str::<Vec<FindingDraft>>(json_payload(&reply)) {
            Ok(drafts) => drafts,
            Err(_) => Vec::new(),
        };

        state.security_findings = findings
            .into_iter()
            .map(|draft| SecurityFinding {
                file_path: draft.file_path,
                line: draft.line,
                severity: draft.severity,
                description: draft.description,
                recommendation: draft.recommendation,
            })
            .collect();

        let blocking = state
            .security_findings
            .iter()
            .filter(|f| f.severity.is_blocking())
            .count();
        state.push_message(
            self.id(),
            format!(
                "Security audit: {} finding(s), {} blocking.",
                state.security_findings.len(),
                blocking
            ),
        );
        Ok(state)
    }
}

/// Produces the closing documentation; the terminal specialist.
pub struct DocumentationAgent {
    provider: Arc<dyn TextGenerator>,
}

impl DocumentationAgent {
    /// Create the documentation agent over the text-generation capability.
    pub fn new(provider: Arc<dyn TextGenerator>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Agent for DocumentationAgent {
    fn id(&self) -> AgentId {
        AgentId::Documentation
    }

    fn contract(&self) -> IoContract {
        IoContract::new(
            &[StateField::Files, StateField::Plan],
            &[StateField::DocSummary],
        )
    }

    async fn run(&self, mut state: WorkflowState) -> Result<WorkflowState, AgentError> {
        let prompt = format!(
            "You are the documentation writer in a team of software agents.\n\
             Task: {}\n\n\
             Plan:\n{}\n\n\
             Final files:\n{}\n\
             Write a concise summary of what was built and how to use it.",
            state.task,
            state.plan.as_deref().unwrap_or("(none)"),
            render_files(&state)
        );

        let reply = self.provider.generate(&prompt).await?;
        let summary = reply.trim().to_string();
        state.push_message(self.id(), summary.clone());
        state.doc_summary = Some(summary);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::traits::GenerateError;
    use crate::agent::InMemoryStore;
    use std::sync::Mutex;

    struct ScriptedProvider {
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(str::to_string).collect()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedProvider {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerateError> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Err(GenerateError::Permanent("script exhausted".to_string()))
            } else {
                Ok(replies.remove(0))
            }
        }
    }

    #[tokio::test]
    async fn test_coder_writes_files_from_json() {
        let provider = ScriptedProvider::new(vec![
            r#"```json
            [{"path": "src/parse.rs", "language": "rust", "content": "fn parse() {}"}]
            ```"#,
        ]);
        let coder = CoderAgent::new(provider);

        let state = coder.run(WorkflowState::new("add parsing")).await.unwrap();
        assert_eq!(state.files.len(), 1);
        assert_eq!(state.files["src/parse.rs"].content, "fn parse() {}");
        assert_eq!(state.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_coder_rejects_unparseable_reply_as_recoverable() {
        let provider = ScriptedProvider::new(vec!["sure, here is the code!"]);
        let coder = CoderAgent::new(provider);

        let err = coder.run(WorkflowState::new("task")).await.unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_reviewer_parses_issues() {
        let provider = ScriptedProvider::new(vec![
            r#"{"summary": "one real problem", "issues": [{"file_path": "src/parse.rs",
               "line": 3, "category": "BUG", "description": "panics on empty input",
               "recommendation": "return an error", "blocking": true}]}"#,
        ]);
        let reviewer = ReviewerAgent::new(provider, Arc::new(InMemoryStore::new()));

        let state = reviewer.run(WorkflowState::new("task")).await.unwrap();
        assert_eq!(state.code_issues.len(), 1);
        assert!(state.has_blocking_issues());
        assert_eq!(state.review_notes.as_deref(), Some("one real problem"));
    }

    #[tokio::test]
    async fn test_reviewer_falls_back_to_notes_on_freeform_reply() {
        let provider = ScriptedProvider::new(vec!["Looks good to me overall."]);
        let reviewer = ReviewerAgent::new(provider, Arc::new(InMemoryStore::new()));

        let state = reviewer.run(WorkflowState::new("task")).await.unwrap();
        assert!(state.code_issues.is_empty());
        assert_eq!(state.review_notes.as_deref(), Some("Looks good to me overall."));
    }

    #[tokio::test]
    async fn test_tester_counts_outcomes() {
        let provider = ScriptedProvider::new(vec![
            r#"[{"name": "parses_digits", "passed": true},
                {"name": "rejects_empty", "passed": false, "message": "no guard"}]"#,
        ]);
        let tester = TesterAgent::new(provider);

        let state = tester.run(WorkflowState::new("task")).await.unwrap();
        assert_eq!(state.test_results.len(), 2);
        assert!(state.has_failing_tests());
        assert!(state.messages[0].content.contains("1 passed, 1 failed"));
    }

    #[tokio::test]
    async fn test_security_clean_audit_is_empty() {
        let provider = ScriptedProvider::new(vec!["[]"]);
        let security = SecurityAgent::new(provider);

        let state = security.run(WorkflowState::new("task")).await.unwrap();
        assert!(state.security_findings.is_empty());
        assert!(!state.has_blocking_findings());
    }

    #[tokio::test]
    async fn test_architect_records_plan() {
        let provider = ScriptedProvider::new(vec!["1. Add a parser module.\n2. Wire it up."]);
        let memory = Arc::new(InMemoryStore::new());
        let architect = ArchitectAgent::new(provider, memory.clone());

        let state = architect
            .run(WorkflowState::new("add input validation to parse_int"))
            .await
            .unwrap();
        assert!(state.plan.as_deref().unwrap().contains("parser module"));
        assert_eq!(memory.len().await, 1);
    }
}
