//! Prompt templates for each pipeline stage.
//!
//! Built-in defaults can be overridden per template by a `<name>.txt` file
//! in a prompt directory.

use anyhow::{Context, Result};
use const_format::concatcp;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::payload::{Stage, MARKER_REPAIR_INSTRUCTION};

/// Plan wire format shared by every plan stage
const PLAN_FORMAT: &str = r#"Answer with a plan between the lines PLAN_START and PLAN_END, using exactly this layout for every step:

Step N:
- Description: what the step does
- Target URL: the address the step starts from, or CURRENT_PAGE to stay on the page left by the previous step
- Entry Point Action: how to reach the relevant content once the page is open
- Status: OK, or UNKNOWN if you cannot tell where the step starts

If anything about the task is unclear, add a line starting with QUESTION: after PLAN_END.
Never invent addresses. Use a status of UNKNOWN instead."#;

/// Script rules shared by every code stage
const SCRIPT_RULES: &str = r#"Write the automation script as plain statements, one per line, ending with a semicolon:

page.goto("https://...");
page.click("css selector");
page.type("css selector", "text");
page.getText("css selector");
page.scroll(0, 600);
page.waitFor("css selector");
page.press("css selector", "Enter");
page.select("css selector", "option value");
page.sleep(500);
log("message");

No other calls exist. Start the code of every plan step with a comment line `// Step N` matching the plan numbering.
Choose selectors from the page snapshots; prefer id, name, data-testid and aria-label attributes.
Reply with the script only."#;

pub const PLAN_ONLY_PROMPT: &str = concatcp!(
    "You plan browser automation tasks. The payload below describes the task, the page the browser is on and the addresses the user mentioned.\n\n",
    PLAN_FORMAT
);

pub const PLAN_ENTRY_PROMPT: &str = concatcp!(
    "You plan browser automation tasks. The user did not give an address for this task: start from the current page where possible, and mark every step whose starting page you cannot determine with Status: UNKNOWN so the user can supply it.\n\n",
    PLAN_FORMAT
);

pub const PLAN_REFINE_PROMPT: &str = concatcp!(
    "You revise a browser automation plan. The user has answered with the missing entry addresses (USER_SUPPLEMENT, also parsed into URL_MAPPINGS). Resolve every UNKNOWN you can with them and keep the rest of the plan unchanged.\n\n",
    PLAN_FORMAT
);

pub const CODEGEN_PROMPT: &str = concatcp!(
    "You write browser automation scripts. The payload holds the confirmed plan and a snapshot of the page every step starts on. A snapshot marked DUPLICATE_URL is identical to the one of the step it names.\n\n",
    SCRIPT_RULES
);

pub const REFINE_CODE_PROMPT: &str = concatcp!(
    "You fix browser automation scripts. The payload holds the current script, the user's feedback, the live page and the plan. Change only what the feedback requires.\n\n",
    SCRIPT_RULES
);

pub const MARKER_REPAIR_PROMPT: &str = r#"The script below implements the plan below but lacks step markers.
Insert a comment line `// Step N` before the code of each plan step, numbered like the plan (STEP_COUNT steps).
Do not change, add, reorder or remove any other line. Reply with the script only."#;

pub const VISUAL_DESCRIPTION_PROMPT: &str = r#"These screenshots show one web page from top to bottom.
Describe the layout a script author needs: navigation, forms, tables, buttons and their visible labels.
Be concise and factual; do not guess at content that is not visible."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Stage(Stage),
    MarkerRepair,
    VisualDescription,
}

impl PromptKind {
    pub const ALL: [PromptKind; 7] = [
        PromptKind::Stage(Stage::PlanOnly),
        PromptKind::Stage(Stage::PlanEntry),
        PromptKind::Stage(Stage::PlanRefine),
        PromptKind::Stage(Stage::Codegen),
        PromptKind::Stage(Stage::RefineCode),
        PromptKind::MarkerRepair,
        PromptKind::VisualDescription,
    ];

    /// Override file stem inside a prompt directory
    pub fn file_stem(&self) -> &'static str {
        match self {
            PromptKind::Stage(Stage::PlanOnly) => "plan_only",
            PromptKind::Stage(Stage::PlanEntry) => "plan_entry",
            PromptKind::Stage(Stage::PlanRefine) => "plan_refine",
            PromptKind::Stage(Stage::Codegen) => "codegen",
            PromptKind::Stage(Stage::RefineCode) => "refine_code",
            PromptKind::MarkerRepair => "marker_repair",
            PromptKind::VisualDescription => "visual",
        }
    }

    fn default_template(&self) -> &'static str {
        match self {
            PromptKind::Stage(Stage::PlanOnly) => PLAN_ONLY_PROMPT,
            PromptKind::Stage(Stage::PlanEntry) => PLAN_ENTRY_PROMPT,
            PromptKind::Stage(Stage::PlanRefine) => PLAN_REFINE_PROMPT,
            PromptKind::Stage(Stage::Codegen) => CODEGEN_PROMPT,
            PromptKind::Stage(Stage::RefineCode) => REFINE_CODE_PROMPT,
            PromptKind::MarkerRepair => MARKER_REPAIR_PROMPT,
            PromptKind::VisualDescription => VISUAL_DESCRIPTION_PROMPT,
        }
    }

    /// Template kind for a payload, from its `MODE:` line
    pub fn for_payload(payload: &str) -> Option<Self> {
        let stage = Stage::of_payload(payload)?;
        if stage == Stage::RefineCode
            && payload
                .lines()
                .any(|line| line.trim() == MARKER_REPAIR_INSTRUCTION)
        {
            return Some(PromptKind::MarkerRepair);
        }
        Some(PromptKind::Stage(stage))
    }
}

#[derive(Debug, Clone)]
pub struct PromptTemplates {
    templates: HashMap<PromptKind, String>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        let templates = PromptKind::ALL
            .into_iter()
            .map(|kind| (kind, kind.default_template().to_string()))
            .collect();
        Self { templates }
    }
}

impl PromptTemplates {
    /// Defaults, overridden by `<stem>.txt` files found in `dir`
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut templates = Self::default();
        let Some(dir) = dir else {
            return Ok(templates);
        };

        for kind in PromptKind::ALL {
            let path = dir.join(format!("{}.txt", kind.file_stem()));
            if path.is_file() {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read prompt template {}", path.display()))?;
                debug!("Prompt override for {}: {}", kind.file_stem(), path.display());
                templates.templates.insert(kind, text);
            }
        }

        Ok(templates)
    }

    pub fn get(&self, kind: PromptKind) -> &str {
        self.templates
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_template())
    }

    /// Full prompt for a payload: the template its `MODE:` line selects,
    /// followed by the payload itself
    pub fn render(&self, payload: &str) -> Result<String> {
        let kind = PromptKind::for_payload(payload)
            .context("Payload does not start with a known MODE line")?;
        Ok(format!("{}\n\n{}", self.get(kind).trim_end(), payload))
    }
}
