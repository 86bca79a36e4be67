//! Plan parsing.
//!
//! Model plans are tokenized line by line into headers, labeled fields and
//! free text, then step blocks are built in one pass by header position.
//! Parsing fails closed: text without recognizable step headers yields no
//! steps and an unconfirmed plan.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Target value meaning "stay on whatever page the previous step left"
pub const CURRENT_PAGE: &str = "CURRENT_PAGE";

const PLAN_START: &str = "PLAN_START";
const PLAN_END: &str = "PLAN_END";

static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:[-+•]\s*)?(?:#{1,6}\s*)?(?:\*\*|__)?\s*(?:(?:step|part)\s*(\d+)|第\s*(\d+)\s*(?:步|部分)|步骤\s*(\d+))\s*(?:\*\*|__)?\s*[:：.)、\-–]?\s*(?:\*\*|__)?\s*(.*)$",
    )
    .unwrap()
});

static FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:[-+•*]\s*)?(?:\*\*|__)?\s*(description|target\s*url|entry\s*point\s*action|entry\s*action|status|描述|目标\s*(?:url|网址|地址)|入口\s*(?:操作|动作)|状态)\s*(?:\*\*|__)?\s*[:：]\s*(?:\*\*|__)?\s*(.*)$",
    )
    .unwrap()
});

static QUESTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bquestions?\s*[:：]").unwrap());

static UNKNOWN_STATUS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:status|状态)\s*(?:\*\*|__)?\s*[:：]\s*(?:\*\*|__)?\s*unknown").unwrap()
});

/// One step of a proposed plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// 1-based position in the plan
    pub index: usize,
    pub description: String,
    /// An address, [`CURRENT_PAGE`], a mapping label, or empty
    pub target_url: String,
    pub entry_action: String,
    pub status: String,
}

/// Where a step expects to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepTarget<'a> {
    CurrentPage,
    Url(&'a str),
    /// A label or description the caller may resolve through URL mappings
    Reference(&'a str),
    Unspecified,
}

impl PlanStep {
    pub fn target(&self) -> StepTarget<'_> {
        let target = self.target_url.trim();
        let lower = target.to_ascii_lowercase();
        if target.is_empty() || matches!(lower.as_str(), "unknown" | "n/a" | "none" | "-") {
            StepTarget::Unspecified
        } else if target.eq_ignore_ascii_case(CURRENT_PAGE)
            || lower == "current page"
            || target == "当前页面"
        {
            StepTarget::CurrentPage
        } else if lower.starts_with("http://")
            || lower.starts_with("https://")
            || lower.starts_with("file://")
        {
            StepTarget::Url(target)
        } else {
            StepTarget::Reference(target)
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.status.to_lowercase().contains("unknown")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanParseResult {
    pub plan_text: String,
    pub steps: Vec<PlanStep>,
    /// Steps were found and neither gate below is set
    pub confirmed: bool,
    /// The model asked the user something
    pub has_question: bool,
    /// The plan or one of its steps left a status unresolved
    pub has_unknown_status: bool,
}

impl PlanParseResult {
    /// Whether the user must answer or supply addresses before capture
    pub fn needs_input(&self) -> bool {
        !self.confirmed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Description,
    TargetUrl,
    EntryAction,
    Status,
}

impl Field {
    fn from_label(label: &str) -> Option<Self> {
        let label: String = label
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        match label.as_str() {
            "description" | "描述" => Some(Field::Description),
            "targeturl" | "目标url" | "目标网址" | "目标地址" => Some(Field::TargetUrl),
            "entrypointaction" | "entryaction" | "入口操作" | "入口动作" => {
                Some(Field::EntryAction)
            }
            "status" | "状态" => Some(Field::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Header { trailing: &'a str },
    Field { field: Field, value: &'a str },
    Text(&'a str),
    Blank,
}

fn tokenize(line: &str) -> Token<'_> {
    let line = strip_comment_prefix(line);
    if line.is_empty() {
        return Token::Blank;
    }
    if let Some(caps) = HEADER_RE.captures(line) {
        let trailing = caps.get(4).map(|m| m.as_str()).unwrap_or("");
        return Token::Header { trailing };
    }
    if let Some(caps) = FIELD_RE.captures(line) {
        let field = caps.get(1).and_then(|m| Field::from_label(m.as_str()));
        let value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if let Some(field) = field {
            return Token::Field { field, value };
        }
    }
    Token::Text(line)
}

/// Remove `//`, `/*`, `*/` and single `*` bullet prefixes left over when a
/// plan is echoed inside a comment block. Bold markers (`**`) are kept.
fn strip_comment_prefix(line: &str) -> &str {
    let mut s = line.trim();
    loop {
        let rest = if let Some(rest) = s.strip_prefix("//") {
            rest
        } else if let Some(rest) = s.strip_prefix("/*") {
            rest
        } else if let Some(rest) = s.strip_prefix("*/") {
            rest
        } else if s == "*" || s.starts_with("* ") {
            &s[1..]
        } else {
            break;
        };
        s = rest.trim_start();
    }
    s.trim_end().trim_end_matches("*/").trim_end()
}

fn clean_value(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c| c == '*' || c == '_' || c == '`')
        .trim()
        .to_string()
}

fn clean_url(value: &str) -> String {
    clean_value(value)
        .trim_matches(|c| c == '<' || c == '>' || c == '"' || c == '\'')
        .to_string()
}

/// The text between `PLAN_START` and `PLAN_END`, or all of it
fn plan_region(text: &str) -> &str {
    let Some(start) = text.find(PLAN_START) else {
        return text;
    };
    let after = &text[start + PLAN_START.len()..];
    match after.find(PLAN_END) {
        Some(end) => &after[..end],
        None => after,
    }
}

#[derive(Default)]
struct StepBlock {
    header_text: String,
    description: Option<String>,
    target_url: Option<String>,
    entry_action: Option<String>,
    status: Option<String>,
}

impl StepBlock {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Description => &mut self.description,
            Field::TargetUrl => &mut self.target_url,
            Field::EntryAction => &mut self.entry_action,
            Field::Status => &mut self.status,
        }
    }

    fn set(&mut self, field: Field, value: &str) {
        let value = match field {
            Field::TargetUrl => clean_url(value),
            _ => clean_value(value),
        };
        let slot = self.slot(field);
        if slot.as_deref().map(str::is_empty).unwrap_or(true) {
            *slot = Some(value);
        }
    }

    fn into_step(self, index: usize) -> PlanStep {
        let description = self
            .description
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| clean_value(&self.header_text));
        PlanStep {
            index,
            description,
            target_url: self.target_url.unwrap_or_default(),
            entry_action: self.entry_action.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
        }
    }
}

/// Parse a model's plan response.
pub fn parse_plan(text: &str) -> PlanParseResult {
    let region = plan_region(text);

    let mut blocks: Vec<StepBlock> = Vec::new();
    // A field whose value was left for the next line
    let mut pending: Option<Field> = None;

    for line in region.lines() {
        match tokenize(line) {
            Token::Header { trailing } => {
                blocks.push(StepBlock {
                    header_text: trailing.to_string(),
                    ..StepBlock::default()
                });
                pending = None;
            }
            Token::Field { field, value } => {
                let Some(block) = blocks.last_mut() else {
                    continue;
                };
                if value.trim().is_empty() {
                    pending = Some(field);
                } else {
                    block.set(field, value);
                    pending = None;
                }
            }
            Token::Text(text) => {
                if let (Some(field), Some(block)) = (pending.take(), blocks.last_mut()) {
                    block.set(field, text);
                }
            }
            Token::Blank => {}
        }
    }

    let steps: Vec<PlanStep> = blocks
        .into_iter()
        .enumerate()
        .map(|(i, block)| block.into_step(i + 1))
        .collect();

    let has_question = QUESTION_RE.is_match(text);
    let has_unknown_status =
        UNKNOWN_STATUS_RE.is_match(text) || steps.iter().any(PlanStep::is_unknown);
    let confirmed = !steps.is_empty() && !has_question && !has_unknown_status;

    PlanParseResult {
        plan_text: region.trim().to_string(),
        steps,
        confirmed,
        has_question,
        has_unknown_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_STEPS: &str = "Step 1:\n- Description: open list\n- Target URL: https://x/list\n- Status: OK\nStep 2:\n- Description: click export\n- Target URL: CURRENT_PAGE\n- Status: OK";

    #[test]
    fn test_two_step_plan_is_confirmed() {
        let result = parse_plan(TWO_STEPS);
        assert_eq!(result.steps.len(), 2);
        assert!(result.confirmed);
        assert!(!result.needs_input());
        assert_eq!(result.steps[0].description, "open list");
        assert_eq!(result.steps[0].target(), StepTarget::Url("https://x/list"));
        assert_eq!(result.steps[1].index, 2);
        assert_eq!(result.steps[1].target(), StepTarget::CurrentPage);
    }

    #[test]
    fn test_unknown_step_status_blocks_confirmation() {
        let text = TWO_STEPS.replace(
            "- Target URL: CURRENT_PAGE\n- Status: OK",
            "- Target URL: CURRENT_PAGE\n- Status: UNKNOWN",
        );
        let result = parse_plan(&text);
        assert_eq!(result.steps.len(), 2);
        assert!(!result.confirmed);
        assert!(result.has_unknown_status);
        assert!(!result.has_question);
    }

    #[test]
    fn test_step_status_containing_unknown_blocks_confirmation() {
        // No "Status: unknown" prefix, only a step status mentioning it
        let text = "Step 1: open\n- Status: address unknown\n";
        let result = parse_plan(text);
        assert_eq!(result.steps.len(), 1);
        assert!(result.has_unknown_status);
        assert!(!result.confirmed);
    }

    #[test]
    fn test_no_headers_fails_closed() {
        for text in [
            "",
            "I will open the page and click export.",
            "- Description: open list\n- Status: OK",
        ] {
            let result = parse_plan(text);
            assert!(result.steps.is_empty(), "{text:?}");
            assert!(!result.confirmed);
            assert!(result.needs_input());
        }
    }

    #[test]
    fn test_question_marker_is_separate_gate() {
        let text = format!("{TWO_STEPS}\nQuestion: which account should be used?");
        let result = parse_plan(&text);
        assert!(result.has_question);
        assert!(!result.has_unknown_status);
        assert!(!result.confirmed);
    }

    #[test]
    fn test_region_restricts_parsing() {
        let text = "Sure! Step 1 would be obvious.\nPLAN_START\nStep 1: open dashboard\n- Target URL: https://x/dash\nPLAN_END\nStep 9: ignored";
        let result = parse_plan(text);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].description, "open dashboard");
        assert!(result.plan_text.starts_with("Step 1"));
        assert!(!result.plan_text.contains("Step 9"));
    }

    #[test]
    fn test_header_variants() {
        let text = "**Step 1:** Open\n### Part 2 - Filter\n第3步：导出\n步骤4：下载\n* Step 5) Close";
        let result = parse_plan(text);
        let descriptions: Vec<_> = result.steps.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Open", "Filter", "导出", "下载", "Close"]);
    }

    #[test]
    fn test_comment_wrapped_plan() {
        let text = "/*\n * Step 1:\n * - Description: open list\n * - Target URL: https://x/list\n */\n// Step 2: click export\n// - Status: OK";
        let result = parse_plan(text);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].target_url, "https://x/list");
        assert_eq!(result.steps[1].description, "click export");
        assert_eq!(result.steps[1].status, "OK");
    }

    #[test]
    fn test_indices_follow_plan_order() {
        let text = "Step 2: a\nStep 2: b\nStep 7: c";
        let indices: Vec<_> = parse_plan(text).steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_bold_fields_and_next_line_values() {
        let text = "Step 1\n**Description:** open the orders page\n**Entry Point Action**:\nclick the Orders tab\n- Target URL: `https://x/orders`";
        let step = &parse_plan(text).steps[0];
        assert_eq!(step.description, "open the orders page");
        assert_eq!(step.entry_action, "click the Orders tab");
        assert_eq!(step.target_url, "https://x/orders");
    }

    #[test]
    fn test_chinese_fields() {
        let text = "第1步\n描述：打开列表\n目标URL：https://x/list\n状态：OK";
        let step = &parse_plan(text).steps[0];
        assert_eq!(step.description, "打开列表");
        assert_eq!(step.target_url, "https://x/list");
        assert_eq!(step.status, "OK");
    }

    #[test]
    fn test_step_targets() {
        let mut step = PlanStep {
            index: 1,
            description: String::new(),
            target_url: String::new(),
            entry_action: String::new(),
            status: String::new(),
        };
        assert_eq!(step.target(), StepTarget::Unspecified);
        step.target_url = "current_page".to_string();
        assert_eq!(step.target(), StepTarget::CurrentPage);
        step.target_url = "URL_2".to_string();
        assert_eq!(step.target(), StepTarget::Reference("URL_2"));
        step.target_url = "Unknown".to_string();
        assert_eq!(step.target(), StepTarget::Unspecified);
    }
}
