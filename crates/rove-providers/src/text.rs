//! Cleanup of raw model responses before downstream parsing.

/// Strip a surrounding markdown code fence (```lang ... ```) from a response.
///
/// Only a fence that wraps the whole response is removed; fences in the
/// middle of prose are left alone. Text before an opening fence is dropped
/// when the fence is the first block in the response.
pub fn strip_code_fences(response: &str) -> String {
    let trimmed = response.trim();

    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };

    // A fence far into the response is part of prose, not a wrapper
    let preamble = &trimmed[..start];
    if preamble.lines().count() > 2 {
        return trimmed.to_string();
    }

    let after_open = &trimmed[start + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(after_open.len());
    let body = &after_open[body_start..];

    match body.rfind("```") {
        Some(end) => body[..end].trim_end().to_string(),
        // Unterminated fence (response cut off): keep everything after the opener
        None => body.trim_end().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_language_fence() {
        let raw = "```javascript\npage.click(\"#go\");\n```";
        assert_eq!(strip_code_fences(raw), "page.click(\"#go\");");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(strip_code_fences("  Step 1: open  \n"), "Step 1: open");
    }

    #[test]
    fn test_short_preamble_dropped() {
        let raw = "Here is the script:\n```\n// Step 1\npage.goto(\"https://x\");\n```\nGood luck";
        assert_eq!(strip_code_fences(raw), "// Step 1\npage.goto(\"https://x\");");
    }

    #[test]
    fn test_unterminated_fence() {
        let raw = "```js\n// Step 1\npage.click(\"a\");";
        assert_eq!(strip_code_fences(raw), "// Step 1\npage.click(\"a\");");
    }

    #[test]
    fn test_fence_deep_in_prose_kept() {
        let raw = "line one\nline two\nline three\nline four\n```\ncode\n```";
        assert_eq!(strip_code_fences(raw), raw);
    }
}
