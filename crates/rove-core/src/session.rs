//! Per-model session records.
//!
//! A [`ModelSession`] is a plain value: background tasks clone it, work on
//! the copy, and write it back through the [`SessionStore`] only while their
//! epoch ticket is still current.

use rove_config::CaptureMode;
use rove_planner::{PlanParseResult, PlanStep, SnapshotSection};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    None,
    PlanPending,
    PlanConfirmed,
    NeedsEntry,
    HtmlCaptured,
    CodeGenerated,
    Executing,
    ReadyExecute,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::None => "NONE",
            SessionState::PlanPending => "PLAN_PENDING",
            SessionState::PlanConfirmed => "PLAN_CONFIRMED",
            SessionState::NeedsEntry => "NEEDS_ENTRY",
            SessionState::HtmlCaptured => "HTML_CAPTURED",
            SessionState::CodeGenerated => "CODE_GENERATED",
            SessionState::Executing => "EXECUTING",
            SessionState::ReadyExecute => "READY_EXECUTE",
            SessionState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which artifact the session produced last
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArtifactType {
    Plan,
    Code,
}

#[derive(Debug, Clone)]
pub struct ModelSession {
    pub model: String,
    pub user_prompt: String,
    pub plan_text: String,
    pub steps: Vec<PlanStep>,
    pub plan_confirmed: bool,
    pub has_question: bool,
    pub has_unknown_status: bool,
    /// The user's entry-address supplement, verbatim
    pub supplement: String,
    pub step_snapshots: BTreeMap<usize, Snapshot>,
    pub html_prepared: bool,
    /// Mode the session captures in; `step_snapshots` are valid only for it
    pub capture_mode: CaptureMode,
    pub last_artifact: Option<ArtifactType>,
    pub code: String,
    /// Next plan step to execute
    pub next_step: usize,
    pub state: SessionState,
}

impl ModelSession {
    pub fn new(model: &str, user_prompt: &str, capture_mode: CaptureMode) -> Self {
        Self {
            model: model.to_string(),
            user_prompt: user_prompt.to_string(),
            plan_text: String::new(),
            steps: Vec::new(),
            plan_confirmed: false,
            has_question: false,
            has_unknown_status: false,
            supplement: String::new(),
            step_snapshots: BTreeMap::new(),
            html_prepared: false,
            capture_mode,
            last_artifact: None,
            code: String::new(),
            next_step: 1,
            state: SessionState::None,
        }
    }

    /// Replace the plan wholesale. Snapshots and code derived from the old
    /// plan are dropped.
    pub fn apply_plan(&mut self, parsed: PlanParseResult) {
        self.plan_text = parsed.plan_text;
        self.steps = parsed.steps;
        self.plan_confirmed = parsed.confirmed;
        self.has_question = parsed.has_question;
        self.has_unknown_status = parsed.has_unknown_status;
        self.invalidate_snapshots();
        self.code.clear();
        self.next_step = 1;
        self.last_artifact = Some(ArtifactType::Plan);
        self.state = if self.plan_confirmed {
            SessionState::PlanConfirmed
        } else {
            SessionState::NeedsEntry
        };
    }

    /// Capture is allowed only for a confirmed plan with steps
    pub fn ready_for_capture(&self) -> bool {
        self.plan_confirmed && !self.has_question && !self.has_unknown_status && !self.steps.is_empty()
    }

    pub fn snapshots_valid(&self, mode: CaptureMode) -> bool {
        self.html_prepared && self.capture_mode == mode
    }

    pub fn set_snapshots(&mut self, mode: CaptureMode, snapshots: Vec<Snapshot>) {
        self.capture_mode = mode;
        self.step_snapshots = snapshots
            .into_iter()
            .map(|s| (s.step_index, s))
            .collect();
        self.html_prepared = true;
        self.state = SessionState::HtmlCaptured;
    }

    pub fn invalidate_snapshots(&mut self) {
        self.step_snapshots.clear();
        self.html_prepared = false;
    }

    pub fn set_capture_mode(&mut self, mode: CaptureMode) {
        if self.capture_mode != mode {
            self.capture_mode = mode;
            self.invalidate_snapshots();
        }
    }

    pub fn set_code(&mut self, code: String) {
        self.code = code;
        self.next_step = 1;
        self.last_artifact = Some(ArtifactType::Code);
        self.state = SessionState::CodeGenerated;
    }

    pub fn snapshot_sections(&self) -> Vec<SnapshotSection> {
        self.step_snapshots
            .values()
            .map(|s| SnapshotSection {
                step_index: s.step_index,
                url: s.url.clone(),
                content: s.content.clone(),
            })
            .collect()
    }

    pub fn step_indices(&self) -> Vec<usize> {
        self.steps.iter().map(|s| s.index).collect()
    }
}

/// All sessions of one user task
#[derive(Debug, Default)]
pub struct SessionStore {
    task: String,
    sessions: BTreeMap<String, ModelSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Set the task prompt; a different prompt discards every session.
    /// Returns whether the task changed.
    pub fn set_task(&mut self, prompt: &str) -> bool {
        if self.task == prompt {
            return false;
        }
        self.task = prompt.to_string();
        self.sessions.clear();
        true
    }

    /// The session for `model`, created on first use
    pub fn get_or_create(&mut self, model: &str, mode: CaptureMode) -> &mut ModelSession {
        let task = self.task.clone();
        self.sessions
            .entry(model.to_string())
            .or_insert_with(|| ModelSession::new(model, &task, mode))
    }

    pub fn get(&self, model: &str) -> Option<&ModelSession> {
        self.sessions.get(model)
    }

    /// Write back a session copy. Copies made for an older task are ignored.
    pub fn store(&mut self, session: ModelSession) -> bool {
        if session.user_prompt != self.task {
            return false;
        }
        self.sessions.insert(session.model.clone(), session);
        true
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    pub fn set_capture_mode(&mut self, mode: CaptureMode) {
        for session in self.sessions.values_mut() {
            session.set_capture_mode(mode);
        }
    }

    pub fn invalidate_snapshots(&mut self) {
        for session in self.sessions.values_mut() {
            session.invalidate_snapshots();
            if session.state == SessionState::HtmlCaptured {
                session.state = SessionState::PlanConfirmed;
            }
        }
    }

    pub fn sessions(&self) -> impl Iterator<Item = &ModelSession> {
        self.sessions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rove_planner::parse_plan;

    fn snapshot(step_index: usize, url: &str) -> Snapshot {
        Snapshot {
            step_index,
            url: url.to_string(),
            entry_action: String::new(),
            cache_key: crate::snapshot::cache_key(url, ""),
            content: format!("content of {}", url),
        }
    }

    #[test]
    fn test_plan_replacement_drops_derived_state() {
        let mut session = ModelSession::new("openai.a", "task", CaptureMode::Html);
        session.apply_plan(parse_plan("Step 1: a\n- Status: OK\nStep 2: b\n- Status: OK"));
        assert_eq!(session.state, SessionState::PlanConfirmed);
        assert!(session.ready_for_capture());

        session.set_snapshots(CaptureMode::Html, vec![snapshot(1, "https://x/a")]);
        session.set_code("// Step 1\npage.click(\"#a\");".to_string());
        session.next_step = 2;

        session.apply_plan(parse_plan("Step 1: a\n- Status: UNKNOWN"));
        assert_eq!(session.state, SessionState::NeedsEntry);
        assert!(!session.ready_for_capture());
        assert!(session.step_snapshots.is_empty());
        assert!(!session.html_prepared);
        assert!(session.code.is_empty());
        assert_eq!(session.next_step, 1);
        assert_eq!(session.last_artifact, Some(ArtifactType::Plan));
    }

    #[test]
    fn test_capture_mode_change_invalidates_snapshots() {
        let mut session = ModelSession::new("m", "task", CaptureMode::Html);
        session.set_snapshots(CaptureMode::Html, vec![snapshot(1, "https://x/a")]);
        assert!(session.snapshots_valid(CaptureMode::Html));
        assert!(!session.snapshots_valid(CaptureMode::Outline));

        session.set_capture_mode(CaptureMode::Outline);
        assert!(!session.html_prepared);
        assert!(session.step_snapshots.is_empty());
    }

    #[test]
    fn test_store_resets_on_new_task_and_rejects_stale_copies() {
        let mut store = SessionStore::new();
        assert!(store.set_task("export orders"));
        assert!(!store.set_task("export orders"));

        let stale = store.get_or_create("m", CaptureMode::Html).clone();
        assert!(store.set_task("export invoices"));
        assert!(store.get("m").is_none());

        assert!(!store.store(stale));
        assert!(store.get("m").is_none());

        let fresh = store.get_or_create("m", CaptureMode::Html).clone();
        assert_eq!(fresh.user_prompt, "export invoices");
        assert!(store.store(fresh));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::ReadyExecute.to_string(), "READY_EXECUTE");
        assert_eq!(
            serde_json::to_string(&SessionState::NeedsEntry).unwrap(),
            "\"NEEDS_ENTRY\""
        );
    }
}
