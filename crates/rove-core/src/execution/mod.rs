//! Step-wise execution of generated scripts.

pub mod engine;
pub mod markers;

pub use engine::{is_plan_only_text, needs_marker_repair, StepExecutor, StepOutcome, WHOLE_SCRIPT};
pub use markers::{extract_step, has_step_markers, marker_step, split_steps, ScriptSection};
