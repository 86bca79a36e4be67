//! Session orchestration.
//!
//! The [`Orchestrator`] owns one [`ModelSession`] per selected model and
//! sequences Plan, Capture, Codegen and Execute for them. Model calls run one
//! task per model; anything touching the browser goes through the single
//! [`CaptureQueue`] worker or the [`StepExecutor`], both of which hold the
//! browser lock for the duration of their work.
//!
//! Every background task takes an [`EpochTicket`] when it starts. Results are
//! written back only while that ticket is current, so an interrupt or reset
//! silently drops whatever was still in flight.

use anyhow::{Context, Result};
use rove_browser::BrowserDriver;
use rove_config::{CaptureMode, Config};
use rove_planner::{
    extract_url_mappings, merge_mappings, parse_plan, Payload, PayloadBudget, PayloadBuilder,
    PlanStep, PromptKind, PromptTemplates, StepTarget, UrlMapping,
};
use rove_providers::{strip_code_fences, CompletionRequest, LLMProvider, ProviderRegistry};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::{shared_browser, CaptureBatch, CaptureQueue, CaptureRequest, CaptureSettings};
use crate::debug_log::{ArtifactKind, DebugArtifacts};
use crate::epoch::{Epoch, EpochTicket};
use crate::execution::{has_step_markers, is_plan_only_text, needs_marker_repair, StepExecutor, StepOutcome, WHOLE_SCRIPT};
use crate::paths::{get_debug_dir, get_visual_dir, resolve_path};
use crate::session::{ModelSession, SessionState, SessionStore};
use crate::snapshot::SnapshotCache;
use crate::visual::{VisualCache, VisualDescriber};

/// Everything the orchestrator needs from configuration
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub capture: CaptureSettings,
    pub capture_mode: CaptureMode,
    pub model_timeout: Duration,
    pub step_timeout: Duration,
    pub budget: PayloadBudget,
    pub cache_dir: PathBuf,
    pub visual_dir: PathBuf,
    /// `None` disables debug artifacts
    pub debug_dir: Option<PathBuf>,
    pub prompt_dir: Option<PathBuf>,
    /// Ask the vision provider for page descriptions in refine stages
    pub visual: bool,
    pub screenshot_ttl: Duration,
    pub description_ttl: Duration,
    pub max_screenshots: usize,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        let pipeline = &config.pipeline;
        Self {
            capture: CaptureSettings::from_config(&config.browser),
            capture_mode: pipeline.capture_mode,
            model_timeout: Duration::from_secs(pipeline.model_timeout_seconds),
            step_timeout: Duration::from_millis(pipeline.step_timeout_ms),
            budget: PayloadBudget {
                snapshots: pipeline.snapshot_budget_chars,
                live_snapshot: pipeline.live_snapshot_budget_chars,
            },
            cache_dir: resolve_path(&config.cache.dir),
            visual_dir: get_visual_dir(),
            debug_dir: pipeline.debug_artifacts.then(get_debug_dir),
            prompt_dir: pipeline.prompt_dir.as_deref().map(resolve_path),
            visual: pipeline.visual,
            screenshot_ttl: Duration::from_secs(config.cache.screenshot_ttl_seconds),
            description_ttl: Duration::from_secs(config.cache.description_ttl_seconds),
            max_screenshots: config.cache.max_screenshots,
        }
    }
}

/// Per-model result of one orchestrator operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelReport {
    pub model: String,
    pub state: SessionState,
    pub ok: bool,
    pub reason: String,
}

impl ModelReport {
    fn new(session: &ModelSession, ok: bool, reason: impl Into<String>) -> Self {
        Self {
            model: session.model.clone(),
            state: session.state,
            ok,
            reason: reason.into(),
        }
    }

    fn cancelled(session: &ModelSession) -> Self {
        Self::new(session, false, "cancelled")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub report: ModelReport,
    pub steps: Vec<StepOutcome>,
}

struct Inner {
    /// Selected models in display order
    models: Vec<(String, Arc<dyn LLMProvider>)>,
    sessions: Mutex<SessionStore>,
    epoch: Epoch,
    capture: CaptureQueue,
    cache: SnapshotCache,
    visual: VisualDescriber,
    visual_enabled: bool,
    payloads: PayloadBuilder,
    prompts: PromptTemplates,
    debug: DebugArtifacts,
    executor: StepExecutor,
    capture_mode: std::sync::Mutex<CaptureMode>,
    execution_cancel: std::sync::Mutex<CancellationToken>,
    model_timeout: Duration,
}

/// Cheap to clone; every clone drives the same sessions and browser
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Must be called inside a tokio runtime: the capture worker is spawned here.
    pub fn new(
        settings: OrchestratorSettings,
        browser: Box<dyn BrowserDriver>,
        models: Vec<(String, Arc<dyn LLMProvider>)>,
        vision: Option<Arc<dyn LLMProvider>>,
    ) -> Result<Self> {
        if models.is_empty() {
            anyhow::bail!("No models selected");
        }

        let prompts = PromptTemplates::load(settings.prompt_dir.as_deref())?;
        let browser = shared_browser(browser);
        let cache = SnapshotCache::new(settings.cache_dir.clone());
        let capture = CaptureQueue::spawn(browser.clone(), cache.clone(), settings.capture.clone());
        let executor = StepExecutor::new(browser, &settings.capture, settings.step_timeout);
        let visual = VisualDescriber::new(
            vision,
            prompts.get(PromptKind::VisualDescription).to_string(),
            settings.visual_dir.clone(),
            settings.max_screenshots,
            settings.model_timeout,
            VisualCache::new(settings.screenshot_ttl, settings.description_ttl),
        );
        let visual_enabled = settings.visual && visual.is_enabled();
        if settings.visual && !visual_enabled {
            warn!("Visual descriptions requested but no vision provider is configured");
        }
        let debug = match &settings.debug_dir {
            Some(dir) => DebugArtifacts::new(dir.clone()),
            None => DebugArtifacts::disabled(),
        };

        info!(
            "Orchestrator ready: {} model(s), capture mode {}",
            models.len(),
            settings.capture_mode.as_str()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                models,
                sessions: Mutex::new(SessionStore::new()),
                epoch: Epoch::new(),
                capture,
                cache,
                visual,
                visual_enabled,
                payloads: PayloadBuilder::new(settings.budget),
                prompts,
                debug,
                executor,
                capture_mode: std::sync::Mutex::new(settings.capture_mode),
                execution_cancel: std::sync::Mutex::new(CancellationToken::new()),
                model_timeout: settings.model_timeout,
            }),
        })
    }

    /// Build from configuration, resolving the selected and vision models
    /// in `registry`
    pub fn from_config(
        config: &Config,
        browser: Box<dyn BrowserDriver>,
        registry: &ProviderRegistry,
    ) -> Result<Self> {
        let models = config
            .providers
            .models
            .iter()
            .map(|reference| Ok((reference.clone(), registry.get(reference)?)))
            .collect::<Result<Vec<_>>>()?;
        let vision = config
            .providers
            .vision
            .as_deref()
            .map(|reference| registry.get(reference))
            .transpose()
            .context("Vision provider is not registered")?;

        Self::new(OrchestratorSettings::from_config(config), browser, models, vision)
    }

    pub fn models(&self) -> Vec<String> {
        self.inner.models.iter().map(|(name, _)| name.clone()).collect()
    }

    pub async fn session(&self, model: &str) -> Option<ModelSession> {
        self.inner.sessions.lock().await.get(model).cloned()
    }

    pub fn capture_mode(&self) -> CaptureMode {
        *lock_or_recover(&self.inner.capture_mode)
    }

    pub fn epoch(&self) -> u64 {
        self.inner.epoch.current()
    }

    /// Set the task prompt. A new prompt discards every session and
    /// invalidates work still running for the old one.
    pub async fn set_task(&self, prompt: &str) -> bool {
        let changed = self.inner.sessions.lock().await.set_task(prompt);
        if changed {
            self.advance_epoch();
            info!("New task, sessions reset");
        }
        changed
    }

    /// Drop in-flight results and stop the running execution between steps
    pub fn interrupt(&self) {
        let epoch = self.advance_epoch();
        info!("Interrupted, epoch {}", epoch);
    }

    /// Forget every session of the current task
    pub async fn clear(&self) {
        self.inner.sessions.lock().await.clear();
        self.advance_epoch();
        info!("Sessions cleared");
    }

    /// Remove every snapshot artifact and visual cache entry. Work in flight
    /// is dropped so it cannot write old snapshots back.
    pub async fn clear_cache(&self) -> Result<()> {
        self.advance_epoch();
        self.inner.cache.clear()?;
        self.inner.visual.clear().await;
        self.inner.sessions.lock().await.invalidate_snapshots();
        info!("Cache cleared");
        Ok(())
    }

    pub async fn set_capture_mode(&self, mode: CaptureMode) {
        *lock_or_recover(&self.inner.capture_mode) = mode;
        self.inner.sessions.lock().await.set_capture_mode(mode);
        info!("Capture mode set to {}", mode.as_str());
    }

    /// Ask every model for a plan of the current task
    pub async fn plan(&self, same_page: bool) -> Vec<ModelReport> {
        let ticket = self.inner.epoch.ticket();
        let current_url = self.current_url().await;
        self.fan_out(self.models(), move |this, model, provider| {
            let ticket = ticket.clone();
            let current_url = current_url.clone();
            async move {
                this.plan_model(model, provider, ticket, current_url, same_page)
                    .await
            }
        })
        .await
    }

    /// Resubmit plans that need input together with the user's supplement
    pub async fn refine_plan(&self, supplement: &str) -> Vec<ModelReport> {
        let ticket = self.inner.epoch.ticket();
        let pending = self
            .select_sessions(|s| !s.plan_text.is_empty() && !s.ready_for_capture())
            .await;
        if pending.is_empty() {
            info!("No plan needs refinement");
            return Vec::new();
        }

        let current_url = self.current_url().await;
        let visual = self.visual_description(&ticket).await;
        let supplement = supplement.to_string();
        self.fan_out(pending, move |this, model, provider| {
            let ticket = ticket.clone();
            let current_url = current_url.clone();
            let supplement = supplement.clone();
            let visual = visual.clone();
            async move {
                this.refine_plan_model(model, provider, ticket, current_url, supplement, visual)
                    .await
            }
        })
        .await
    }

    /// Capture snapshots for every confirmed plan
    pub async fn prepare(&self) -> Vec<ModelReport> {
        let ticket = self.inner.epoch.ticket();
        let ready = self.select_sessions(ModelSession::ready_for_capture).await;
        self.fan_out(ready, move |this, model, _provider| {
            let ticket = ticket.clone();
            async move {
                let mut session = this.checkout(&model).await;
                match this.prepare_session(&mut session, &ticket).await {
                    Ok(batch) => {
                        let reason = format!(
                            "{} snapshot(s), {} capture(s), {} failure(s)",
                            batch.snapshots.len(),
                            batch.physical_captures,
                            batch.failures.len()
                        );
                        this.commit(session, &ticket, true, reason).await
                    }
                    Err(e) => this.fail_or_cancel(session, &ticket, e).await,
                }
            }
        })
        .await
    }

    /// Generate a script for every confirmed plan, capturing first where the
    /// session's snapshots are missing or stale
    pub async fn generate_code(&self) -> Vec<ModelReport> {
        let ticket = self.inner.epoch.ticket();
        let ready = self.select_sessions(ModelSession::ready_for_capture).await;
        if ready.is_empty() {
            info!("No confirmed plan to generate code for");
        }
        self.fan_out(ready, move |this, model, provider| {
            let ticket = ticket.clone();
            async move { this.generate_code_model(model, provider, ticket).await }
        })
        .await
    }

    /// Revise existing scripts using feedback and the live page
    pub async fn refine_code(&self, feedback: &str) -> Vec<ModelReport> {
        let ticket = self.inner.epoch.ticket();
        let with_code = self.select_sessions(|s| !s.code.trim().is_empty()).await;
        if with_code.is_empty() {
            info!("No script to refine");
            return Vec::new();
        }

        let mode = self.capture_mode();
        let live = match self.inner.capture.capture_live(mode, ticket.clone()).await {
            Ok(live) => live,
            Err(e) => {
                warn!("Live capture failed: {:#}", e);
                return Vec::new();
            }
        };
        let visual = self.visual_description(&ticket).await;
        let feedback = feedback.to_string();

        self.fan_out(with_code, move |this, model, provider| {
            let ticket = ticket.clone();
            let live = live.clone();
            let feedback = feedback.clone();
            let visual = visual.clone();
            async move {
                let mut session = this.checkout(&model).await;
                let payload = this.inner.payloads.refine_code(
                    &session.user_prompt,
                    &live.url,
                    &session.supplement,
                    &live.content,
                    &session.plan_text,
                    &session.snapshot_sections(),
                    &session.code,
                    &feedback,
                    visual.as_deref(),
                );
                let response = this.call_model(&model, &provider, &payload).await;
                this.finish_script(&mut session, &provider, &ticket, response).await
            }
        })
        .await
    }

    /// Run the selected steps of `model`'s script. Without a selection the
    /// steps from the session cursor onward run.
    pub async fn execute(&self, model: &str, steps: Option<Vec<usize>>) -> Result<ExecutionReport> {
        let ticket = self.inner.epoch.ticket();
        let cancel = lock_or_recover(&self.inner.execution_cancel).clone();

        let original = self
            .session(model)
            .await
            .with_context(|| format!("No session for model '{}'", model))?;
        if original.code.trim().is_empty() {
            anyhow::bail!("Model '{}' has no script to execute", model);
        }

        let selected = steps.unwrap_or_else(|| default_steps(&original));
        let mut session = original.clone();
        session.state = SessionState::Executing;
        self.inner.sessions.lock().await.store(session.clone());
        info!("Executing {} step(s) for {}", selected.len(), model);

        let outcomes = self
            .inner
            .executor
            .run_steps(&session.code, &selected, &cancel)
            .await;

        if !ticket.is_current() || cancel.is_cancelled() {
            self.inner.sessions.lock().await.store(original.clone());
            return Ok(ExecutionReport {
                report: ModelReport::cancelled(&original),
                steps: outcomes,
            });
        }

        let failed = outcomes.iter().filter(|o| !o.ok).count();
        if let Some(last) = outcomes.iter().filter(|o| o.ok).map(|o| o.index).max() {
            session.next_step = if last == WHOLE_SCRIPT {
                session.steps.len().max(1) + 1
            } else {
                last + 1
            };
        }
        session.state = if failed == 0 {
            SessionState::ReadyExecute
        } else {
            SessionState::Failed
        };
        let reason = format!("{} of {} step(s) succeeded", outcomes.len() - failed, outcomes.len());
        let report = self.commit(session, &ticket, failed == 0, reason).await;
        Ok(ExecutionReport {
            report,
            steps: outcomes,
        })
    }

    async fn plan_model(
        &self,
        model: String,
        provider: Arc<dyn LLMProvider>,
        ticket: EpochTicket,
        current_url: String,
        same_page: bool,
    ) -> ModelReport {
        let mut session = self.checkout(&model).await;
        session.state = SessionState::PlanPending;
        if !self.store_if_current(&session, &ticket).await {
            return ModelReport::cancelled(&session);
        }

        let payload = self
            .inner
            .payloads
            .plan(&session.user_prompt, &current_url, same_page);
        let response = self.call_model(&model, &provider, &payload).await;
        self.apply_plan_response(session, &ticket, response).await
    }

    async fn refine_plan_model(
        &self,
        model: String,
        provider: Arc<dyn LLMProvider>,
        ticket: EpochTicket,
        current_url: String,
        supplement: String,
        visual: Option<String>,
    ) -> ModelReport {
        let mut session = self.checkout(&model).await;
        session.supplement = supplement;
        session.state = SessionState::PlanPending;
        if !self.store_if_current(&session, &ticket).await {
            return ModelReport::cancelled(&session);
        }

        let payload = self.inner.payloads.plan_refine(
            &session.user_prompt,
            &current_url,
            &session.plan_text,
            &session.supplement,
            visual.as_deref(),
        );
        let response = self.call_model(&model, &provider, &payload).await;
        self.apply_plan_response(session, &ticket, response).await
    }

    async fn apply_plan_response(
        &self,
        mut session: ModelSession,
        ticket: &EpochTicket,
        response: String,
    ) -> ModelReport {
        if response.trim().is_empty() {
            session.state = SessionState::NeedsEntry;
            return self.commit(session, ticket, false, "no response from model").await;
        }

        let parsed = parse_plan(&response);
        let reason = if parsed.confirmed {
            format!("plan confirmed with {} step(s)", parsed.steps.len())
        } else if parsed.steps.is_empty() {
            "no plan steps recognized".to_string()
        } else if parsed.has_question {
            "model asked a question".to_string()
        } else {
            "plan has steps with unknown status".to_string()
        };
        let ok = parsed.confirmed;
        session.apply_plan(parsed);
        self.commit(session, ticket, ok, reason).await
    }

    async fn generate_code_model(
        &self,
        model: String,
        provider: Arc<dyn LLMProvider>,
        ticket: EpochTicket,
    ) -> ModelReport {
        let mut session = self.checkout(&model).await;
        let mode = self.capture_mode();

        if !session.snapshots_valid(mode) {
            if let Err(e) = self.prepare_session(&mut session, &ticket).await {
                return self.fail_or_cancel(session, &ticket, e).await;
            }
        }
        if !ticket.is_current() {
            return ModelReport::cancelled(&session);
        }

        let current_url = self.current_url().await;
        let payload = self.inner.payloads.codegen(
            &session.user_prompt,
            &current_url,
            &session.plan_text,
            &session.snapshot_sections(),
        );
        let response = self.call_model(&model, &provider, &payload).await;
        self.finish_script(&mut session, &provider, &ticket, response).await
    }

    /// Capture the session's plan steps and attach the snapshots
    async fn prepare_session(
        &self,
        session: &mut ModelSession,
        ticket: &EpochTicket,
    ) -> Result<CaptureBatch> {
        let mode = self.capture_mode();
        let mappings = merge_mappings(
            &extract_url_mappings(&session.user_prompt),
            &extract_url_mappings(&session.supplement),
        );
        let requests = session
            .steps
            .iter()
            .map(|step| CaptureRequest {
                step_index: step.index,
                url: resolve_target(step, &mappings),
                entry_action: step.entry_action.clone(),
            })
            .collect();

        let batch = self
            .inner
            .capture
            .capture_steps(requests, mode, ticket.clone())
            .await?;
        for (step, reason) in &batch.failures {
            warn!("{}: step {} has no snapshot: {}", session.model, step, reason);
        }
        info!(
            "{}: {} snapshot(s) prepared, {} capture(s), {} cache hit(s)",
            session.model,
            batch.snapshots.len(),
            batch.physical_captures,
            batch.cache_hits
        );
        session.set_snapshots(mode, batch.snapshots.clone());
        Ok(batch)
    }

    /// Validate a generated script, repairing missing step markers once, and
    /// store it on the session
    async fn finish_script(
        &self,
        session: &mut ModelSession,
        provider: &Arc<dyn LLMProvider>,
        ticket: &EpochTicket,
        response: String,
    ) -> ModelReport {
        if response.trim().is_empty() {
            session.state = SessionState::Failed;
            return self.commit(session.clone(), ticket, false, "no script from model").await;
        }
        if is_plan_only_text(&response) {
            session.state = SessionState::Failed;
            return self
                .commit(session.clone(), ticket, false, "model returned a plan instead of a script")
                .await;
        }

        let mut script = response;
        let mut reason = "script generated".to_string();
        if needs_marker_repair(&script, session.steps.len()) {
            if !ticket.is_current() {
                return ModelReport::cancelled(session);
            }
            info!("{}: script has no step markers, requesting repair", session.model);
            let payload = self
                .inner
                .payloads
                .marker_repair(&session.plan_text, session.steps.len(), &script);
            let repaired = self.call_model(&session.model, provider, &payload).await;
            if has_step_markers(&repaired) && !is_plan_only_text(&repaired) {
                script = repaired;
                reason = "script generated, step markers added".to_string();
            } else {
                warn!("{}: marker repair did not add markers, keeping original script", session.model);
                reason = "script generated without step markers".to_string();
            }
        }

        session.set_code(script);
        self.commit(session.clone(), ticket, true, reason).await
    }

    /// Render, send and log one model call. Failures and timeouts yield an
    /// empty response.
    async fn call_model(&self, model: &str, provider: &Arc<dyn LLMProvider>, payload: &Payload) -> String {
        let stage = PromptKind::for_payload(&payload.text)
            .map(|kind| kind.file_stem())
            .unwrap_or("unknown");
        let debug = &self.inner.debug;
        debug.write(model, stage, ArtifactKind::Payload, &payload.text);

        let prompt = match self.inner.prompts.render(&payload.text) {
            Ok(prompt) => prompt,
            Err(e) => {
                error!("{} {}: {:#}", model, stage, e);
                return String::new();
            }
        };
        debug.write(model, stage, ArtifactKind::Prompt, &prompt);

        let request = CompletionRequest::user_prompt(provider.as_ref(), prompt);
        let started = Instant::now();
        let response = match tokio::time::timeout(self.inner.model_timeout, provider.complete(request)).await {
            Err(_) => {
                warn!("{} {} timed out after {:?}", model, stage, self.inner.model_timeout);
                String::new()
            }
            Ok(Err(e)) => {
                warn!("{} {} failed: {:#}", model, stage, e);
                String::new()
            }
            Ok(Ok(response)) => strip_code_fences(&response.content),
        };

        debug.write(model, stage, ArtifactKind::Response, &response);
        info!(
            "Model call {} {}: {} chars in {:?}",
            model,
            stage,
            response.len(),
            started.elapsed()
        );
        response
    }

    async fn visual_description(&self, ticket: &EpochTicket) -> Option<String> {
        if !self.inner.visual_enabled {
            return None;
        }
        match self.inner.visual.describe(&self.inner.capture, ticket.clone()).await {
            Ok(description) => description,
            Err(e) => {
                warn!("Visual description unavailable: {:#}", e);
                None
            }
        }
    }

    async fn current_url(&self) -> String {
        match self.inner.capture.current_url().await {
            Ok(url) => url,
            Err(e) => {
                warn!("Current URL unavailable: {:#}", e);
                String::new()
            }
        }
    }

    /// Run `task` once per selected model, one tokio task each
    async fn fan_out<F, Fut>(&self, models: Vec<String>, task: F) -> Vec<ModelReport>
    where
        F: Fn(Orchestrator, String, Arc<dyn LLMProvider>) -> Fut,
        Fut: Future<Output = ModelReport> + Send + 'static,
    {
        let mut join_set = JoinSet::new();
        for (name, provider) in &self.inner.models {
            if models.contains(name) {
                join_set.spawn(task(self.clone(), name.clone(), Arc::clone(provider)));
            }
        }

        let mut reports = Vec::with_capacity(join_set.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!("Model task panicked: {}", e),
            }
        }
        reports.sort_by_key(|r| self.model_position(&r.model));
        reports
    }

    fn model_position(&self, model: &str) -> usize {
        self.inner
            .models
            .iter()
            .position(|(name, _)| name == model)
            .unwrap_or(usize::MAX)
    }

    /// Models whose current session satisfies `filter`
    async fn select_sessions(&self, filter: impl Fn(&ModelSession) -> bool) -> Vec<String> {
        let sessions = self.inner.sessions.lock().await;
        self.models()
            .into_iter()
            .filter(|model| sessions.get(model).map(&filter).unwrap_or(false))
            .collect()
    }

    async fn checkout(&self, model: &str) -> ModelSession {
        let mode = self.capture_mode();
        self.inner
            .sessions
            .lock()
            .await
            .get_or_create(model, mode)
            .clone()
    }

    async fn store_if_current(&self, session: &ModelSession, ticket: &EpochTicket) -> bool {
        let mut sessions = self.inner.sessions.lock().await;
        ticket.is_current() && sessions.store(session.clone())
    }

    /// Write the session back unless its ticket went stale
    async fn commit(
        &self,
        session: ModelSession,
        ticket: &EpochTicket,
        ok: bool,
        reason: impl Into<String>,
    ) -> ModelReport {
        if !self.store_if_current(&session, ticket).await {
            debug!("Dropping stale result for {}", session.model);
            return ModelReport::cancelled(&session);
        }
        ModelReport::new(&session, ok, reason)
    }

    async fn fail_or_cancel(
        &self,
        mut session: ModelSession,
        ticket: &EpochTicket,
        e: anyhow::Error,
    ) -> ModelReport {
        if !ticket.is_current() {
            return ModelReport::cancelled(&session);
        }
        warn!("{}: capture failed: {:#}", session.model, e);
        session.state = SessionState::Failed;
        self.commit(session, ticket, false, format!("capture failed: {:#}", e))
            .await
    }

    fn advance_epoch(&self) -> u64 {
        let epoch = self.inner.epoch.advance();
        let mut token = lock_or_recover(&self.inner.execution_cancel);
        token.cancel();
        *token = CancellationToken::new();
        epoch
    }
}

/// Capture address for a step. Current-page and unspecified targets capture
/// wherever the batch is.
fn resolve_target(step: &PlanStep, mappings: &[UrlMapping]) -> Option<String> {
    match step.target() {
        StepTarget::Url(url) => Some(url.to_string()),
        StepTarget::Reference(label) => {
            let found = mappings
                .iter()
                .find(|m| m.label.eq_ignore_ascii_case(label))
                .map(|m| m.url.clone());
            if found.is_none() {
                warn!("Step {} target '{}' matches no known address", step.index, label);
            }
            found
        }
        StepTarget::CurrentPage | StepTarget::Unspecified => None,
    }
}

/// Steps from the cursor to the end of the plan, or the whole plan when the
/// cursor has run past it
fn default_steps(session: &ModelSession) -> Vec<usize> {
    let all = session.step_indices();
    let remaining: Vec<usize> = all
        .iter()
        .copied()
        .filter(|&index| index >= session.next_step)
        .collect();
    if remaining.is_empty() {
        all
    } else {
        remaining
    }
}

fn lock_or_recover<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rove_planner::CURRENT_PAGE;

    fn step(index: usize, target: &str) -> PlanStep {
        PlanStep {
            index,
            description: format!("step {}", index),
            target_url: target.to_string(),
            entry_action: String::new(),
            status: "OK".to_string(),
        }
    }

    #[test]
    fn test_resolve_target_uses_mappings() {
        let mappings = vec![UrlMapping::new("Orders", "https://x.test/orders")];
        assert_eq!(
            resolve_target(&step(1, "https://x.test/a"), &mappings).as_deref(),
            Some("https://x.test/a")
        );
        assert_eq!(
            resolve_target(&step(2, "orders"), &mappings).as_deref(),
            Some("https://x.test/orders")
        );
        assert_eq!(resolve_target(&step(3, "Invoices"), &mappings), None);
        assert_eq!(resolve_target(&step(4, CURRENT_PAGE), &mappings), None);
        assert_eq!(resolve_target(&step(5, ""), &mappings), None);
    }

    #[test]
    fn test_default_steps_follow_cursor() {
        let mut session = ModelSession::new("m", "task", CaptureMode::Html);
        session.steps = vec![step(1, ""), step(2, ""), step(3, "")];
        assert_eq!(default_steps(&session), vec![1, 2, 3]);

        session.next_step = 3;
        assert_eq!(default_steps(&session), vec![3]);

        session.next_step = 4;
        assert_eq!(default_steps(&session), vec![1, 2, 3]);
    }
}
