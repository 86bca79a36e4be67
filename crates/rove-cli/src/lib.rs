//! rove CLI: runs one task through plan, capture, codegen and execution.

mod cli_args;
mod output;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use rove_browser::ChromeDriver;
use rove_config::{CaptureMode, Config};
use rove_core::Orchestrator;
use tracing::{info, warn};

pub use cli_args::Cli;
use output::ReportOutput;
use utils::{build_registry, initialize_logging, load_config_with_cli_overrides, prompt_line};

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    initialize_logging(cli.verbose);

    let config = load_config_with_cli_overrides(&cli)?;
    let registry = build_registry(&config)?;
    let orchestrator = connect(&config, &registry).await?;

    if let Some(mode) = &cli.capture_mode {
        orchestrator.set_capture_mode(mode.parse::<CaptureMode>()?).await;
    }
    if cli.clear_cache {
        orchestrator.clear_cache().await?;
    }

    let task = match cli.task.clone() {
        Some(task) => task,
        None if cli.clear_cache => return Ok(()),
        None => match prompt_line("task> ")? {
            Some(task) => task,
            None => anyhow::bail!("No task given"),
        },
    };

    // Ctrl-C interrupts the pipeline; in-flight results are dropped
    let watcher = orchestrator.clone();
    let interrupts = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt requested");
            watcher.interrupt();
        }
    });

    let result = run_task(&orchestrator, &cli, &task).await;
    interrupts.abort();
    result
}

async fn connect(config: &Config, registry: &rove_providers::ProviderRegistry) -> Result<Orchestrator> {
    let browser = &config.browser;
    let driver = ChromeDriver::connect(
        browser.chrome_port,
        browser.headless,
        browser.chrome_binary.as_deref(),
    )
    .await
    .with_context(|| format!("Failed to connect to chromedriver on port {}", browser.chrome_port))?;
    info!("Connected to chromedriver on port {}", browser.chrome_port);

    Orchestrator::from_config(config, Box::new(driver), registry)
}

/// Refine plans that still need input, one supplement per round, until they
/// confirm or no supplement is given. `first` is used before asking.
async fn refine_until_confirmed(
    orchestrator: &Orchestrator,
    output: &ReportOutput,
    mut first: Option<String>,
    mut next_supplement: impl FnMut() -> Result<Option<String>>,
) -> Result<()> {
    while plans_need_input(orchestrator).await {
        let supplement = match first.take() {
            Some(text) => Some(text),
            None => next_supplement()?,
        };
        let Some(supplement) = supplement.filter(|s| !s.trim().is_empty()) else {
            break;
        };
        let refined = orchestrator.refine_plan(&supplement).await;
        output.stage("Refine", &refined);
        if refined.is_empty() {
            break;
        }
    }
    Ok(())
}

async fn plans_need_input(orchestrator: &Orchestrator) -> bool {
    for model in orchestrator.models() {
        if let Some(session) = orchestrator.session(&model).await {
            if !session.plan_text.is_empty() && !session.ready_for_capture() {
                return true;
            }
        }
    }
    false
}

async fn run_task(orchestrator: &Orchestrator, cli: &Cli, task: &str) -> Result<()> {
    let output = ReportOutput::new(cli.json);
    orchestrator.set_task(task).await;

    let plans = orchestrator.plan(cli.same_page).await;
    output.stage("Plan", &plans);

    let hint = || {
        output.print("Some plans need entry addresses (e.g. 'Orders: https://...').");
        prompt_line("entry> ")
    };
    refine_until_confirmed(orchestrator, &output, cli.supplement.clone(), hint).await?;

    for model in orchestrator.models() {
        if let Some(session) = orchestrator.session(&model).await {
            if session.ready_for_capture() {
                output.plan(&session);
            }
        }
    }
    if cli.plan_only {
        return Ok(());
    }

    let code = orchestrator.generate_code().await;
    output.stage("Codegen", &code);
    let Some(model) = code.iter().find(|r| r.ok).map(|r| r.model.clone()) else {
        anyhow::bail!("No model produced a script");
    };

    let steps = cli.steps.clone().filter(|steps| !steps.is_empty());
    let execution = orchestrator.execute(&model, steps).await?;
    output.execution(&execution);
    if !execution.report.ok {
        anyhow::bail!("Execution {}: {}", execution.report.state, execution.report.reason);
    }
    Ok(())
}
