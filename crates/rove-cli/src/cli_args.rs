//! CLI argument parsing for rove.

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(name = "rove")]
#[command(about = "Plan, generate and run browser automation with several models at once")]
#[command(version)]
pub struct Cli {
    /// Task to accomplish (prompted for when omitted)
    pub task: Option<String>,

    /// Selected models, overriding the configuration (e.g. 'openai.default,openai_compatible.groq')
    #[arg(long, value_delimiter = ',', value_name = "MODELS")]
    pub models: Option<Vec<String>>,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// The task operates on the page the browser is already on
    #[arg(long)]
    pub same_page: bool,

    /// Plan steps to execute (e.g. '1,3'); defaults to the remaining steps
    #[arg(long, value_delimiter = ',', value_name = "STEPS")]
    pub steps: Option<Vec<usize>>,

    /// Stop after planning
    #[arg(long)]
    pub plan_only: bool,

    /// Page capture mode: 'html' or 'outline'
    #[arg(long, value_name = "MODE")]
    pub capture_mode: Option<String>,

    /// Remove cached snapshots and visual descriptions before running
    #[arg(long)]
    pub clear_cache: bool,

    /// Entry addresses for plans that need them (e.g. 'Orders: https://...')
    #[arg(long, value_name = "TEXT")]
    pub supplement: Option<String>,

    /// Print reports as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_lists_and_flags() {
        let cli = Cli::try_parse_from([
            "rove",
            "--models",
            "openai.default,openai_compatible.groq",
            "--steps",
            "1,3",
            "--same-page",
            "--capture-mode",
            "outline",
            "Export the report",
        ])
        .unwrap();

        assert_eq!(cli.task.as_deref(), Some("Export the report"));
        assert_eq!(
            cli.models,
            Some(vec!["openai.default".to_string(), "openai_compatible.groq".to_string()])
        );
        assert_eq!(cli.steps, Some(vec![1, 3]));
        assert!(cli.same_page);
        assert!(!cli.plan_only);
        assert_eq!(cli.capture_mode.as_deref(), Some("outline"));
    }

    #[test]
    fn test_rejects_non_numeric_steps() {
        assert!(Cli::try_parse_from(["rove", "--steps", "1,x", "task"]).is_err());
    }
}
