//! Stage payloads.
//!
//! Every payload is line oriented and starts with `MODE: <TAG>`; the tag
//! selects the prompt template and names the debug artifact bucket.

use std::collections::HashMap;

use crate::urls::{extract_url_mappings, find_first_url, format_mappings, merge_mappings};

pub const TRUNCATION_MARKER: &str = "...(truncated)";
pub const MODE_PREFIX: &str = "MODE:";

/// Instruction line marking a refine-code payload as a marker-only repair
pub const MARKER_REPAIR_INSTRUCTION: &str = "INSTRUCTION: ADD_STEP_MARKERS_ONLY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    PlanOnly,
    PlanEntry,
    PlanRefine,
    Codegen,
    RefineCode,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::PlanOnly,
        Stage::PlanEntry,
        Stage::PlanRefine,
        Stage::Codegen,
        Stage::RefineCode,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Stage::PlanOnly => "PLAN_ONLY",
            Stage::PlanEntry => "PLAN_ENTRY",
            Stage::PlanRefine => "PLAN_REFINE",
            Stage::Codegen => "CODEGEN",
            Stage::RefineCode => "REFINE_CODE",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.tag().eq_ignore_ascii_case(tag.trim()))
    }

    pub fn is_plan_stage(&self) -> bool {
        matches!(self, Stage::PlanOnly | Stage::PlanEntry | Stage::PlanRefine)
    }

    /// Read the stage from a payload's first `MODE:` line
    pub fn of_payload(payload: &str) -> Option<Self> {
        payload
            .lines()
            .find_map(|line| line.trim().strip_prefix(MODE_PREFIX))
            .and_then(Stage::from_tag)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A captured page as it is presented to the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSection {
    pub step_index: usize,
    pub url: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PayloadBudget {
    /// Combined size of all step snapshots, in characters
    pub snapshots: usize,
    pub live_snapshot: usize,
}

impl Default for PayloadBudget {
    fn default() -> Self {
        Self {
            snapshots: 500_000,
            live_snapshot: 200_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub stage: Stage,
    pub text: String,
}

/// Cut `text` to `budget` characters and mark the cut. The result is at most
/// `budget + TRUNCATION_MARKER.len()` characters long.
pub fn truncate_section(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
    }
}

#[derive(Debug, Clone, Default)]
pub struct PayloadBuilder {
    budget: PayloadBudget,
}

impl PayloadBuilder {
    pub fn new(budget: PayloadBudget) -> Self {
        Self { budget }
    }

    /// PLAN_ONLY when the task names an address, PLAN_ENTRY otherwise
    pub fn plan(&self, task: &str, current_url: &str, same_page: bool) -> Payload {
        let user_url = find_first_url(task);
        let stage = if user_url.is_some() {
            Stage::PlanOnly
        } else {
            Stage::PlanEntry
        };

        let mut text = header(stage, current_url);
        if let Some(url) = &user_url {
            push_line(&mut text, &format!("USER_URL: {}", url));
        }
        push_line(&mut text, &format!("SAME_PAGE_OPERATION: {}", same_page));
        push_block(&mut text, "URL_MAPPINGS", &format_mappings(&extract_url_mappings(task)));
        push_block(&mut text, "TASK", task);

        Payload { stage, text }
    }

    /// PLAN_REFINE: the previous plan plus the user's entry-address supplement
    pub fn plan_refine(
        &self,
        task: &str,
        current_url: &str,
        previous_plan: &str,
        supplement: &str,
        visual: Option<&str>,
    ) -> Payload {
        let stage = Stage::PlanRefine;
        let mappings = merge_mappings(
            &extract_url_mappings(task),
            &extract_url_mappings(supplement),
        );

        let mut text = header(stage, current_url);
        push_block(&mut text, "URL_MAPPINGS", &format_mappings(&mappings));
        push_block(&mut text, "USER_SUPPLEMENT", supplement);
        push_block(&mut text, "TASK", task);
        push_block(&mut text, "PREVIOUS_PLAN", previous_plan);
        if let Some(visual) = visual.filter(|v| !v.trim().is_empty()) {
            push_block(&mut text, "VISUAL_DESCRIPTION", visual);
        }

        Payload { stage, text }
    }

    /// CODEGEN: the confirmed plan and one snapshot per step
    pub fn codegen(
        &self,
        task: &str,
        current_url: &str,
        plan_text: &str,
        snapshots: &[SnapshotSection],
    ) -> Payload {
        let stage = Stage::Codegen;
        let mut text = header(stage, current_url);
        push_block(&mut text, "TASK", task);
        push_block(&mut text, "PLAN", plan_text);
        push_block(&mut text, "STEP_SNAPSHOTS", &self.snapshot_sections(snapshots));
        Payload { stage, text }
    }

    /// REFINE_CODE: everything codegen saw plus the live page, the current
    /// script and the user's feedback
    #[allow(clippy::too_many_arguments)]
    pub fn refine_code(
        &self,
        task: &str,
        current_url: &str,
        supplement: &str,
        live_snapshot: &str,
        plan_text: &str,
        snapshots: &[SnapshotSection],
        current_code: &str,
        feedback: &str,
        visual: Option<&str>,
    ) -> Payload {
        let stage = Stage::RefineCode;
        let mappings = merge_mappings(
            &extract_url_mappings(task),
            &extract_url_mappings(supplement),
        );

        let mut text = header(stage, current_url);
        push_block(&mut text, "URL_MAPPINGS", &format_mappings(&mappings));
        push_block(&mut text, "TASK", task);
        push_block(
            &mut text,
            "LIVE_PAGE_SNAPSHOT",
            &truncate_section(live_snapshot, self.budget.live_snapshot),
        );
        push_block(&mut text, "PLAN", plan_text);
        push_block(&mut text, "STEP_SNAPSHOTS", &self.snapshot_sections(snapshots));
        push_block(&mut text, "CURRENT_CODE", current_code);
        push_block(&mut text, "FEEDBACK", feedback);
        if let Some(visual) = visual.filter(|v| !v.trim().is_empty()) {
            push_block(&mut text, "VISUAL_DESCRIPTION", visual);
        }

        Payload { stage, text }
    }

    /// REFINE_CODE restricted to inserting `// Step N` markers
    pub fn marker_repair(&self, plan_text: &str, step_count: usize, script: &str) -> Payload {
        let stage = Stage::RefineCode;
        let mut text = header(stage, "");
        push_line(&mut text, MARKER_REPAIR_INSTRUCTION);
        push_line(&mut text, &format!("STEP_COUNT: {}", step_count));
        push_block(&mut text, "PLAN", plan_text);
        push_block(&mut text, "CURRENT_CODE", script);
        Payload { stage, text }
    }

    /// Snapshots in step order under the combined budget. A snapshot whose
    /// address was already shown for an earlier step is replaced by a
    /// reference to that step.
    fn snapshot_sections(&self, snapshots: &[SnapshotSection]) -> String {
        let mut ordered: Vec<&SnapshotSection> = snapshots.iter().collect();
        ordered.sort_by_key(|s| s.step_index);

        let mut first_seen: HashMap<&str, usize> = HashMap::new();
        let mut out = String::new();
        for snapshot in ordered {
            push_line(&mut out, &format!("=== STEP {} ===", snapshot.step_index));
            push_line(&mut out, &format!("URL: {}", snapshot.url));
            match first_seen.get(snapshot.url.as_str()) {
                Some(first) => {
                    push_line(&mut out, &format!("DUPLICATE_URL: SAME_AS_STEP {}", first));
                }
                None => {
                    first_seen.insert(snapshot.url.as_str(), snapshot.step_index);
                    push_line(&mut out, snapshot.content.trim_end());
                }
            }
        }

        truncate_section(out.trim_end(), self.budget.snapshots)
    }
}

fn header(stage: Stage, current_url: &str) -> String {
    let mut text = String::new();
    push_line(&mut text, &format!("{} {}", MODE_PREFIX, stage.tag()));
    push_line(&mut text, &format!("CURRENT_URL: {}", current_url));
    text
}

fn push_block(text: &mut String, name: &str, body: &str) {
    push_line(text, &format!("{}:", name));
    let body = body.trim_end();
    if body.is_empty() {
        push_line(text, "(none)");
    } else {
        push_line(text, body);
    }
}

fn push_line(text: &mut String, line: &str) {
    text.push_str(line);
    text.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(step_index: usize, url: &str, content: &str) -> SnapshotSection {
        SnapshotSection {
            step_index,
            url: url.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_plan_stage_depends_on_task_url() {
        let builder = PayloadBuilder::default();
        let with_url = builder.plan("Export orders from https://x.test/orders", "about:blank", false);
        assert_eq!(with_url.stage, Stage::PlanOnly);
        assert!(with_url.text.starts_with("MODE: PLAN_ONLY\n"));
        assert!(with_url.text.contains("USER_URL: https://x.test/orders"));
        assert!(with_url.text.contains("URL_1: https://x.test/orders"));

        let without = builder.plan("Export orders", "https://x.test/home", true);
        assert_eq!(without.stage, Stage::PlanEntry);
        assert!(without.text.starts_with("MODE: PLAN_ENTRY\n"));
        assert!(!without.text.contains("USER_URL"));
        assert!(without.text.contains("SAME_PAGE_OPERATION: true"));
        assert_eq!(Stage::of_payload(&without.text), Some(Stage::PlanEntry));
    }

    #[test]
    fn test_plan_refine_keeps_supplement_verbatim() {
        let payload = PayloadBuilder::default().plan_refine(
            "Export orders",
            "https://x.test/home",
            "Step 1: open orders\n- Status: UNKNOWN",
            "orders are under https://x.test/o (Orders) i think",
            Some("A table with an Export button"),
        );
        assert!(payload.text.starts_with("MODE: PLAN_REFINE\n"));
        assert!(payload.text.contains("Orders: https://x.test/o"));
        assert!(payload
            .text
            .contains("USER_SUPPLEMENT:\norders are under https://x.test/o (Orders) i think\n"));
        assert!(payload.text.contains("VISUAL_DESCRIPTION:\nA table"));
    }

    #[test]
    fn test_codegen_replaces_duplicate_snapshots() {
        let payload = PayloadBuilder::default().codegen(
            "task",
            "https://x/a",
            "Step 1: a\nStep 2: b\nStep 3: a again",
            &[
                section(3, "https://x/a", "<a>page a</a>"),
                section(1, "https://x/a", "<a>page a</a>"),
                section(2, "https://x/b", "<b>page b</b>"),
            ],
        );
        let text = &payload.text;
        assert_eq!(text.matches("<a>page a</a>").count(), 1);
        assert!(text.contains("=== STEP 3 ===\nURL: https://x/a\nDUPLICATE_URL: SAME_AS_STEP 1"));
        let step1 = text.find("=== STEP 1 ===").unwrap();
        let step2 = text.find("=== STEP 2 ===").unwrap();
        assert!(step1 < step2);
    }

    #[test]
    fn test_truncate_section_bounds() {
        assert_eq!(truncate_section("short", 10), "short");
        assert_eq!(truncate_section("exactly10!", 10), "exactly10!");

        let long = "é".repeat(50);
        let cut = truncate_section(&long, 20);
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert!(cut.chars().count() <= 20 + TRUNCATION_MARKER.len());
        assert_eq!(cut.chars().filter(|c| *c == 'é').count(), 20);
    }

    #[test]
    fn test_snapshot_and_live_budgets() {
        let builder = PayloadBuilder::new(PayloadBudget {
            snapshots: 100,
            live_snapshot: 30,
        });
        let big = "x".repeat(500);
        let payload = builder.refine_code(
            "task",
            "https://x/a",
            "",
            &"y".repeat(500),
            "Step 1: a",
            &[section(1, "https://x/a", &big)],
            "// Step 1\npage.click(\"#go\");",
            "the button moved",
            None,
        );
        assert!(payload.text.contains(&format!("{}{}", "y".repeat(30), TRUNCATION_MARKER)));
        assert!(!payload.text.contains(&"y".repeat(31)));
        assert!(payload.text.contains(TRUNCATION_MARKER));
        assert!(!payload.text.contains(&"x".repeat(100)));
        assert!(payload.text.contains("FEEDBACK:\nthe button moved"));
        assert!(!payload.text.contains("VISUAL_DESCRIPTION"));
    }

    #[test]
    fn test_marker_repair_payload() {
        let payload = PayloadBuilder::default().marker_repair("Step 1: a\nStep 2: b", 2, "page.click(\"#a\");");
        assert_eq!(payload.stage, Stage::RefineCode);
        assert!(payload.text.contains(MARKER_REPAIR_INSTRUCTION));
        assert!(payload.text.contains("STEP_COUNT: 2"));
    }
}
