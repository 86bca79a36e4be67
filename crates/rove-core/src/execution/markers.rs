//! Step markers in generated scripts.
//!
//! A marker is a comment line naming a plan step (`// Step 2`, `# 第2步`,
//! `/* Step 2: export */`). Code between consecutive markers belongs to the
//! earlier one; code before the first marker belongs to the first.

use once_cell::sync::Lazy;
use regex::Regex;

static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?://+|/\*+|#+|\*+)\s*(?:[-*•]\s*)?(?:\*\*)?\s*(?:step\s*(\d+)|第\s*(\d+)\s*步|步骤\s*(\d+))(?:\D|$)",
    )
    .unwrap()
});

/// One marked section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSection {
    /// Step number as written in the marker
    pub step: usize,
    /// Code lines of the section, markers excluded
    pub body: String,
}

/// Step number of a marker line
pub fn marker_step(line: &str) -> Option<usize> {
    let caps = MARKER_RE.captures(line)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn has_step_markers(script: &str) -> bool {
    script.lines().any(|line| marker_step(line).is_some())
}

/// Split a marked script into sections in script order. An unmarked script
/// yields no sections.
pub fn split_steps(script: &str) -> Vec<ScriptSection> {
    let mut preamble: Vec<&str> = Vec::new();
    let mut sections: Vec<(usize, Vec<&str>)> = Vec::new();

    for line in script.lines() {
        if let Some(step) = marker_step(line) {
            let mut lines = Vec::new();
            if sections.is_empty() {
                lines.append(&mut preamble);
            }
            sections.push((step, lines));
        } else if let Some((_, lines)) = sections.last_mut() {
            lines.push(line);
        } else {
            preamble.push(line);
        }
    }

    sections
        .into_iter()
        .map(|(step, lines)| ScriptSection {
            step,
            body: lines.join("\n"),
        })
        .collect()
}

/// Code for plan step `step`. Sections repeating a step number are joined.
/// An unmarked script is one inseparable unit and is returned whole.
pub fn extract_step(script: &str, step: usize) -> String {
    if !has_step_markers(script) {
        return script.to_string();
    }
    split_steps(script)
        .into_iter()
        .filter(|s| s.step == step)
        .map(|s| s.body)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_grammar() {
        assert_eq!(marker_step("// Step 1"), Some(1));
        assert_eq!(marker_step("  //STEP 12: export"), Some(12));
        assert_eq!(marker_step("/* Step 3 */"), Some(3));
        assert_eq!(marker_step("# Step 4 - download"), Some(4));
        assert_eq!(marker_step(" * - Step 5"), Some(5));
        assert_eq!(marker_step("// **Step 6**"), Some(6));
        assert_eq!(marker_step("// 第7步：导出"), Some(7));
        assert_eq!(marker_step("// 步骤8"), Some(8));

        assert_eq!(marker_step("Step 1"), None);
        assert_eq!(marker_step("page.click('#step1');"), None);
        assert_eq!(marker_step("// Steps are below"), None);
        assert_eq!(marker_step("// stepper 2"), None);
    }

    #[test]
    fn test_sections_cover_every_line_once() {
        let script = "const note = 1;\n// Step 1\npage.goto('https://x/a');\n\n// Step 2\npage.click('#b');\npage.click('#c');\n// Step 3\nlog('done');";
        let sections = split_steps(script);
        assert_eq!(sections.len(), 3);

        for n in 1..=3 {
            assert!(!extract_step(script, n).trim().is_empty(), "step {n}");
        }

        let mut covered: Vec<&str> = Vec::new();
        let extracted: Vec<String> = (1..=3).map(|n| extract_step(script, n)).collect();
        for body in &extracted {
            covered.extend(body.split('\n'));
        }
        let expected: Vec<&str> = script.lines().filter(|l| marker_step(l).is_none()).collect();
        assert_eq!(covered, expected);
        assert!(extract_step(script, 1).starts_with("const note = 1;"));
    }

    #[test]
    fn test_repeated_marker_numbers_join() {
        let script = "// Step 1\na();\n// Step 2\nb();\n// Step 1\nc();";
        assert_eq!(extract_step(script, 1), "a();\nc();");
        assert_eq!(extract_step(script, 2), "b();");
        assert_eq!(extract_step(script, 5), "");
    }

    #[test]
    fn test_unmarked_script_is_one_unit() {
        let script = "page.goto('https://x');\npage.click('#a');";
        assert!(!has_step_markers(script));
        assert!(split_steps(script).is_empty());
        assert_eq!(extract_step(script, 1), script);
        assert_eq!(extract_step(script, 3), script);
    }
}
