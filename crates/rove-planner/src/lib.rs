//! rove-planner: the text protocol between the pipeline and the model.
//!
//! This crate turns model output into typed plan steps ([`parse_plan`]),
//! pulls address/label pairs out of free text ([`extract_url_mappings`]),
//! and assembles the tagged payload sent for each pipeline stage
//! ([`PayloadBuilder`]) together with the prompt template it selects
//! ([`PromptTemplates`]).

pub mod payload;
pub mod plan;
pub mod prompts;
pub mod urls;

pub use payload::{
    truncate_section, Payload, PayloadBudget, PayloadBuilder, SnapshotSection, Stage,
    MARKER_REPAIR_INSTRUCTION, TRUNCATION_MARKER,
};
pub use plan::{parse_plan, PlanParseResult, PlanStep, StepTarget, CURRENT_PAGE};
pub use prompts::{PromptKind, PromptTemplates};
pub use urls::{extract_url_mappings, find_first_url, format_mappings, merge_mappings, UrlMapping};
