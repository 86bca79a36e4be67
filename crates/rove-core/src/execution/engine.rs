use anyhow::{Context, Result};
use rove_browser::{BrowserDriver, ContextScanner};
use rove_planner::parse_plan;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::markers::{extract_step, has_step_markers};
use crate::capture::{CaptureSettings, SharedBrowser};
use crate::error::{classify_error, ErrorKind, StepError};
use crate::runtime::{ScriptLog, ScriptRuntime, LOG_TAIL_LINES};

/// Outcome index used when an unmarked script runs as one unit
pub const WHOLE_SCRIPT: usize = 0;

/// Multiplier applied to the step budget for the single timeout retry
const TIMEOUT_RETRY_FACTOR: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    /// Plan step index, or [`WHOLE_SCRIPT`]
    pub index: usize,
    pub ok: bool,
    pub error: Option<String>,
    pub log_tail: Vec<String>,
    pub attempts: u32,
}

impl StepOutcome {
    fn success(index: usize, log: &ScriptLog, attempts: u32) -> Self {
        Self {
            index,
            ok: true,
            error: None,
            log_tail: log.tail(LOG_TAIL_LINES),
            attempts,
        }
    }

    fn failure(index: usize, error: String, log: &ScriptLog, attempts: u32) -> Self {
        Self {
            index,
            ok: false,
            error: Some(error),
            log_tail: log.tail(LOG_TAIL_LINES),
            attempts,
        }
    }
}

/// Text that is a plan rather than a script: no script statements, but plan
/// delimiters or recognizable step headers
pub fn is_plan_only_text(text: &str) -> bool {
    let has_statements = text.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("page.") || line.starts_with("await page.") || line.starts_with("log(")
    });
    if has_statements {
        return false;
    }
    text.contains("PLAN_START") || !parse_plan(text).steps.is_empty()
}

/// Whether a generated script warrants the one marker-only repair call
pub fn needs_marker_repair(script: &str, plan_steps: usize) -> bool {
    !script.trim().is_empty()
        && !is_plan_only_text(script)
        && plan_steps > 1
        && !has_step_markers(script)
}

pub struct StepExecutor {
    browser: SharedBrowser,
    runtime: ScriptRuntime,
    scanner: ContextScanner,
    frame_wait_timeout: Duration,
    step_timeout: Duration,
}

impl StepExecutor {
    pub fn new(browser: SharedBrowser, capture: &CaptureSettings, step_timeout: Duration) -> Self {
        Self {
            browser,
            runtime: ScriptRuntime::new(capture.page_load_timeout, step_timeout),
            scanner: capture.scanner(),
            frame_wait_timeout: capture.frame_wait_timeout,
            step_timeout,
        }
    }

    /// Run the selected steps in index order. A failing step is recorded and
    /// execution moves on; cancellation stops before the next step.
    pub async fn run_steps(
        &self,
        script: &str,
        steps: &[usize],
        cancel: &CancellationToken,
    ) -> Vec<StepOutcome> {
        if !has_step_markers(script) {
            if cancel.is_cancelled() {
                return Vec::new();
            }
            return vec![self.run_unit(WHOLE_SCRIPT, script, cancel).await];
        }

        let mut selected = steps.to_vec();
        selected.sort_unstable();
        selected.dedup();

        let mut outcomes = Vec::with_capacity(selected.len());
        for index in selected {
            if cancel.is_cancelled() {
                info!("Execution cancelled before step {}", index);
                break;
            }
            let body = extract_step(script, index);
            if body.trim().is_empty() {
                let log = ScriptLog::new();
                warn!("Step {} has no code", index);
                outcomes.push(StepOutcome::failure(
                    index,
                    StepError::MissingCode(index).to_string(),
                    &log,
                    0,
                ));
                continue;
            }
            outcomes.push(self.run_unit(index, &body, cancel).await);
        }
        outcomes
    }

    async fn run_unit(&self, index: usize, body: &str, cancel: &CancellationToken) -> StepOutcome {
        let log = ScriptLog::new();
        let mut budget = self.step_timeout;
        let mut attempts = 0;

        let outcome = loop {
            attempts += 1;
            match self.attempt(body, budget, &log, cancel).await {
                Ok(()) => break StepOutcome::success(index, &log, attempts),
                Err(e) => {
                    let retry = attempts == 1
                        && classify_error(&e) == ErrorKind::Timeout
                        && !cancel.is_cancelled();
                    if retry {
                        budget *= TIMEOUT_RETRY_FACTOR;
                        warn!("Step {} timed out, retrying with {:?}", index, budget);
                        continue;
                    }
                    break StepOutcome::failure(index, format!("{:#}", e), &log, attempts);
                }
            }
        };

        info!(
            "Step {} {} after {} attempt(s)",
            index,
            if outcome.ok { "succeeded" } else { "failed" },
            outcome.attempts
        );
        outcome
    }

    /// Re-select the content context, then run `body` under `budget`. Waits
    /// without an explicit timeout get the same budget.
    async fn attempt(
        &self,
        body: &str,
        budget: Duration,
        log: &ScriptLog,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut guard = self.browser.lock().await;
        let driver: &mut dyn BrowserDriver = guard.as_mut();

        let context = self
            .scanner
            .wait_and_select(driver, self.frame_wait_timeout)
            .await;
        driver
            .switch_to(&context.handle)
            .await
            .with_context(|| format!("Failed to enter context '{}'", context.name))?;

        let runtime = self.runtime.with_wait_timeout(budget);
        match tokio::time::timeout(budget, runtime.run(driver, body, log, cancel)).await {
            Err(_) => Err(StepError::Timeout(budget).into()),
            Ok(result) => result.map_err(Into::into),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::shared_browser;
    use rove_browser::mock::{MockBrowser, MockPage};

    fn settings() -> CaptureSettings {
        CaptureSettings {
            frame_wait_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(5),
            ..CaptureSettings::default()
        }
    }

    fn executor(browser: MockBrowser, step_timeout: Duration) -> StepExecutor {
        StepExecutor::new(shared_browser(Box::new(browser)), &settings(), step_timeout)
    }

    const SCRIPT: &str = "// Step 1\npage.goto('https://x.test/a');\n// Step 2\npage.click('#missing');\n// Step 3\npage.click('#ok');\nlog('clicked');";

    #[tokio::test]
    async fn test_failure_does_not_abort_batch() {
        let browser = MockBrowser::new()
            .with_page(MockPage::new("https://x.test/a", "<html></html>"))
            .with_failing_selector("#missing", "no such element");
        let executor = executor(browser, Duration::from_secs(5));

        let outcomes = executor
            .run_steps(SCRIPT, &[3, 1, 2], &CancellationToken::new())
            .await;
        let summary: Vec<(usize, bool)> = outcomes.iter().map(|o| (o.index, o.ok)).collect();
        assert_eq!(summary, vec![(1, true), (2, false), (3, true)]);
        assert!(outcomes[1].error.as_deref().unwrap().contains("no such element"));
        assert_eq!(outcomes[2].log_tail, vec!["clicked"]);
    }

    #[tokio::test]
    async fn test_timeout_is_retried_once_with_larger_budget() {
        let browser = MockBrowser::new().with_slow_selector("#ok", Duration::from_millis(150), 1);
        let executor = executor(browser, Duration::from_millis(100));

        let outcomes = executor
            .run_steps(SCRIPT, &[3], &CancellationToken::new())
            .await;
        assert!(outcomes[0].ok, "{:?}", outcomes[0]);
        assert_eq!(outcomes[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_extends_selector_waits() {
        let browser =
            MockBrowser::new().with_late_selector("#slow", Duration::from_millis(250));
        let executor = executor(browser, Duration::from_millis(100));

        let outcomes = executor
            .run_steps("page.waitFor('#slow');", &[], &CancellationToken::new())
            .await;
        let outcome = &outcomes[0];
        assert!(outcome.ok, "{:?}", outcome);
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_second_timeout_is_terminal() {
        let browser = MockBrowser::new().with_slow_selector("#ok", Duration::from_millis(400), 5);
        let executor = executor(browser, Duration::from_millis(50));

        let outcomes = executor
            .run_steps(SCRIPT, &[3], &CancellationToken::new())
            .await;
        let outcome = &outcomes[0];
        assert!(!outcome.ok);
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unmarked_script_runs_as_one_unit() {
        let browser = MockBrowser::new();
        let actions = browser.actions();
        let executor = executor(browser, Duration::from_secs(5));

        let outcomes = executor
            .run_steps("page.click('#a');\npage.click('#b');", &[1, 2], &CancellationToken::new())
            .await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].index, WHOLE_SCRIPT);
        assert!(outcomes[0].ok);
        assert_eq!(actions.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_step_code_and_cancellation() {
        let executor = executor(MockBrowser::new(), Duration::from_secs(5));
        let outcomes = executor
            .run_steps(SCRIPT, &[4], &CancellationToken::new())
            .await;
        assert!(!outcomes[0].ok);
        assert_eq!(outcomes[0].attempts, 0);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(executor.run_steps(SCRIPT, &[1, 2], &cancel).await.is_empty());
    }

    #[test]
    fn test_repair_predicates() {
        let unmarked = "page.goto('https://x');\npage.click('#a');";
        assert!(needs_marker_repair(unmarked, 3));
        assert!(!needs_marker_repair(unmarked, 1));
        assert!(!needs_marker_repair("", 3));
        assert!(!needs_marker_repair(SCRIPT, 3));

        let plan = "Step 1: open\n- Status: OK\nStep 2: export";
        assert!(is_plan_only_text(plan));
        assert!(!needs_marker_repair(plan, 2));
        assert!(!is_plan_only_text(unmarked));
    }
}
