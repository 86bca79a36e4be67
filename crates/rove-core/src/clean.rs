//! Page content reduction before it is cached and shown to a model.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Attributes a script author can build selectors from
const KEPT_ATTRIBUTES: &[&str] = &[
    "id",
    "name",
    "class",
    "type",
    "href",
    "placeholder",
    "aria-label",
    "role",
    "title",
    "value",
    "for",
    "data-testid",
];

const MAX_ATTRIBUTE_CHARS: usize = 200;

static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static REMOVED_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["script", "style", "noscript", "svg", "template"]
        .iter()
        .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*?(?:/>|>.*?</{tag}\s*>)")).unwrap())
        .collect()
});

static DROPPED_TAGS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(?:meta|link|base)\b[^>]*>").unwrap());

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([a-zA-Z][a-zA-Z0-9-]*)(\s[^<>]*?)?\s*(/?)>").unwrap());

static ATTRIBUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([^\s=/"'<>]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'<>]+)))?"#).unwrap()
});

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static BETWEEN_TAGS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r">\s+<").unwrap());

/// Reduce raw page HTML to structure, text and selector-relevant attributes.
pub fn clean_html(raw: &str) -> String {
    let mut html = COMMENT_RE.replace_all(raw, "").into_owned();
    for block in REMOVED_BLOCKS.iter() {
        html = block.replace_all(&html, "").into_owned();
    }
    html = DROPPED_TAGS_RE.replace_all(&html, "").into_owned();
    html = TAG_RE
        .replace_all(&html, |caps: &Captures| rewrite_tag(caps))
        .into_owned();
    html = WHITESPACE_RE.replace_all(&html, " ").into_owned();
    BETWEEN_TAGS_RE.replace_all(&html, "><").trim().to_string()
}

fn rewrite_tag(caps: &Captures) -> String {
    let tag = caps[1].to_ascii_lowercase();
    let self_closing = !caps[3].is_empty();
    let mut out = format!("<{}", tag);

    if let Some(attributes) = caps.get(2) {
        for attr in ATTRIBUTE_RE.captures_iter(attributes.as_str()) {
            let name = attr[1].to_ascii_lowercase();
            if !KEPT_ATTRIBUTES.contains(&name.as_str()) {
                continue;
            }
            let value = attr
                .get(2)
                .or_else(|| attr.get(3))
                .or_else(|| attr.get(4))
                .map(|m| m.as_str())
                .unwrap_or("");
            let value = WHITESPACE_RE.replace_all(value.trim(), " ");
            let value: String = if value.chars().count() > MAX_ATTRIBUTE_CHARS {
                value.chars().take(MAX_ATTRIBUTE_CHARS).collect()
            } else {
                value.into_owned()
            };
            out.push_str(&format!(" {}=\"{}\"", name, value.replace('"', "&quot;")));
        }
    }

    if self_closing {
        out.push_str("/>");
    } else {
        out.push('>');
    }
    out
}

/// Trim an outline: no trailing spaces, no blank lines.
pub fn clean_outline(raw: &str) -> String {
    raw.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_non_content_blocks_and_comments() {
        let raw = r#"<html><head><meta charset="utf-8"><style>body{color:red}</style>
            <script type="text/javascript">var a = "<div>";</script></head>
            <body><!-- nav --><noscript>enable js</noscript>
            <svg viewBox="0 0 1 1"><path d="M0"/></svg><template><p>x</p></template>
            <p>Hello</p></body></html>"#;
        let cleaned = clean_html(raw);
        assert_eq!(cleaned, "<html><head></head><body><p>Hello</p></body></html>");
    }

    #[test]
    fn test_keeps_selector_attributes_only() {
        let raw = r#"<button id="export" class="btn  primary" onclick="go()" style="x" data-testid='export-btn' disabled>Export</button>"#;
        assert_eq!(
            clean_html(raw),
            r#"<button id="export" class="btn primary" data-testid="export-btn">Export</button>"#
        );
    }

    #[test]
    fn test_unquoted_and_self_closing() {
        let raw = "<INPUT type=text name=q placeholder=\"Search orders\" autofocus/>";
        assert_eq!(
            clean_html(raw),
            r#"<input type="text" name="q" placeholder="Search orders"/>"#
        );
    }

    #[test]
    fn test_collapses_whitespace_and_is_stable() {
        let raw = "<ul>\n   <li>One\n\n item</li>\n\t<li>Two</li>\n</ul>";
        let cleaned = clean_html(raw);
        assert_eq!(cleaned, "<ul><li>One item</li><li>Two</li></ul>");
        assert_eq!(clean_html(&cleaned), cleaned);
    }

    #[test]
    fn test_long_attribute_values_are_cut() {
        let raw = format!("<a href=\"https://x.test/{}\">x</a>", "a".repeat(500));
        let cleaned = clean_html(&raw);
        assert!(cleaned.len() < 260);
        assert!(cleaned.ends_with(">x</a>"));
    }

    #[test]
    fn test_clean_outline() {
        let raw = "document \"Orders\" https://x\n\n- table   \n   \n  - cell \"42\"\n";
        assert_eq!(clean_outline(raw), "document \"Orders\" https://x\n- table\n  - cell \"42\"");
    }
}
