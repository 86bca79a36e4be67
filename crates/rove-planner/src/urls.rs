//! Address/label extraction from free text.
//!
//! Users describe where things live in prose ("orders: https://..."). The
//! extractors below run in priority order; an address claimed by an earlier
//! extractor is never relabeled by a later one.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Prefix of labels generated for bare addresses
const GENERATED_LABEL_PREFIX: &str = "URL_";

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"'()（）\[\]{}，。；]+"#).unwrap());

static LABELED_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:[-*•+]\s*)?([^:：\n]{1,60}?)\s*[:：]\s*(https?://[^\s<>"']+)\s*$"#).unwrap()
});

static PAREN_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(https?://[^\s<>"'()（）]+)\s*[(（]\s*([^)）\n]{1,60}?)\s*[)）]"#).unwrap()
});

static USED_FOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(https?://[^\s<>"'，,]+)[^\n]*?(?:\bused\s+for\b|\bis\s+for\b|用于)\s*[:：]?\s*([^\n,，.。;；]{1,60})"#,
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlMapping {
    pub label: String,
    pub url: String,
}

impl UrlMapping {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }

    pub fn is_generated(&self) -> bool {
        self.label
            .strip_prefix(GENERATED_LABEL_PREFIX)
            .map(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
    }
}

/// An extractor yields (label, url) pairs; `None` asks for a generated label
type Extractor = fn(&str) -> Vec<(Option<String>, String)>;

struct Strategy {
    name: &'static str,
    extract: Extractor,
}

const STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "labeled-line",
        extract: labeled_lines,
    },
    Strategy {
        name: "parenthesized-label",
        extract: parenthesized_labels,
    },
    Strategy {
        name: "used-for",
        extract: used_for_labels,
    },
    Strategy {
        name: "bare",
        extract: bare_urls,
    },
];

fn trim_url(url: &str) -> String {
    url.trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '*' | '`'))
        .to_string()
}

fn clean_label(label: &str) -> Option<String> {
    let label = label
        .trim()
        .trim_matches(|c: char| c == '*' || c == '`' || c == '"' || c == '\'')
        .trim();
    if label.is_empty() {
        None
    } else {
        Some(label.to_string())
    }
}

/// `label: URL` alone on a line
fn labeled_lines(text: &str) -> Vec<(Option<String>, String)> {
    text.lines()
        .filter_map(|line| LABELED_LINE_RE.captures(line))
        .filter_map(|caps| {
            let label = clean_label(&caps[1])?;
            Some((Some(label), trim_url(&caps[2])))
        })
        .collect()
}

/// `URL (label)`
fn parenthesized_labels(text: &str) -> Vec<(Option<String>, String)> {
    PAREN_LABEL_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let label = clean_label(&caps[2])?;
            Some((Some(label), trim_url(&caps[1])))
        })
        .collect()
}

/// `URL ... used for ... label`
fn used_for_labels(text: &str) -> Vec<(Option<String>, String)> {
    text.lines()
        .filter_map(|line| USED_FOR_RE.captures(line))
        .filter_map(|caps| {
            let label = clean_label(&caps[2])?;
            Some((Some(label), trim_url(&caps[1])))
        })
        .collect()
}

fn bare_urls(text: &str) -> Vec<(Option<String>, String)> {
    URL_RE
        .find_iter(text)
        .map(|m| (None, trim_url(m.as_str())))
        .collect()
}

/// Extract address/label pairs from `text`, in strategy priority order.
pub fn extract_url_mappings(text: &str) -> Vec<UrlMapping> {
    let mut claimed: HashSet<String> = HashSet::new();
    let mut mappings = Vec::new();
    let mut generated = 0usize;

    for strategy in STRATEGIES {
        for (label, url) in (strategy.extract)(text) {
            if url.is_empty() || !claimed.insert(url.clone()) {
                continue;
            }
            let label = label.unwrap_or_else(|| {
                generated += 1;
                format!("{}{}", GENERATED_LABEL_PREFIX, generated)
            });
            tracing::debug!("{} mapping: {} -> {}", strategy.name, label, url);
            mappings.push(UrlMapping { label, url });
        }
    }

    mappings
}

/// First address mentioned in `text`
pub fn find_first_url(text: &str) -> Option<String> {
    URL_RE
        .find(text)
        .map(|m| trim_url(m.as_str()))
        .filter(|u| !u.is_empty())
}

/// Combine mappings, letting `supplement` override `original` for the same
/// address or the same user-written label. Generated labels of the
/// supplement are renumbered after the original's.
pub fn merge_mappings(original: &[UrlMapping], supplement: &[UrlMapping]) -> Vec<UrlMapping> {
    let mut merged: Vec<UrlMapping> = original.to_vec();
    let mut generated = merged.iter().filter(|m| m.is_generated()).count();

    for extra in supplement {
        if let Some(existing) = merged.iter_mut().find(|m| m.url == extra.url) {
            if !extra.is_generated() {
                existing.label = extra.label.clone();
            }
            continue;
        }
        if !extra.is_generated() {
            if let Some(existing) = merged
                .iter_mut()
                .find(|m| !m.is_generated() && m.label.eq_ignore_ascii_case(&extra.label))
            {
                existing.url = extra.url.clone();
                continue;
            }
            merged.push(extra.clone());
        } else {
            generated += 1;
            merged.push(UrlMapping::new(
                format!("{}{}", GENERATED_LABEL_PREFIX, generated),
                extra.url.clone(),
            ));
        }
    }

    merged
}

/// One `label: url` line per mapping
pub fn format_mappings(mappings: &[UrlMapping]) -> String {
    mappings
        .iter()
        .map(|m| format!("{}: {}", m.label, m.url))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategies_in_priority_order() {
        let text = "Export the monthly report.\n\
                    Orders: https://shop.test/orders\n\
                    The report lives at https://shop.test/reports (Reports)\n\
                    Use https://shop.test/login which is used for signing in\n\
                    Also see https://shop.test/help.";
        let mappings = extract_url_mappings(text);
        assert_eq!(
            mappings,
            vec![
                UrlMapping::new("Orders", "https://shop.test/orders"),
                UrlMapping::new("Reports", "https://shop.test/reports"),
                UrlMapping::new("signing in", "https://shop.test/login"),
                UrlMapping::new("URL_1", "https://shop.test/help"),
            ]
        );
    }

    #[test]
    fn test_claimed_url_is_not_relabeled() {
        let text = "Dashboard: https://x.test/dash\nhttps://x.test/dash (Home)";
        let mappings = extract_url_mappings(text);
        assert_eq!(mappings, vec![UrlMapping::new("Dashboard", "https://x.test/dash")]);
    }

    #[test]
    fn test_bare_urls_get_sequential_labels() {
        let text = "go to https://a.test/1, then https://a.test/2; finally https://a.test/1";
        let labels: Vec<_> = extract_url_mappings(text)
            .into_iter()
            .map(|m| (m.label, m.url))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("URL_1".to_string(), "https://a.test/1".to_string()),
                ("URL_2".to_string(), "https://a.test/2".to_string()),
            ]
        );
    }

    #[test]
    fn test_find_first_url_trims_punctuation() {
        assert_eq!(
            find_first_url("Open https://x.test/list. Then export."),
            Some("https://x.test/list".to_string())
        );
        assert_eq!(find_first_url("no address here"), None);
    }

    #[test]
    fn test_merge_prefers_supplement() {
        let original = vec![
            UrlMapping::new("Orders", "https://x.test/orders"),
            UrlMapping::new("URL_1", "https://x.test/a"),
        ];
        let supplement = vec![
            UrlMapping::new("Orders", "https://x.test/v2/orders"),
            UrlMapping::new("Archive", "https://x.test/a"),
            UrlMapping::new("URL_1", "https://x.test/b"),
        ];
        let merged = merge_mappings(&original, &supplement);
        assert_eq!(
            merged,
            vec![
                UrlMapping::new("Orders", "https://x.test/v2/orders"),
                UrlMapping::new("Archive", "https://x.test/a"),
                UrlMapping::new("URL_2", "https://x.test/b"),
            ]
        );
        assert_eq!(
            format_mappings(&merged[..1]),
            "Orders: https://x.test/v2/orders"
        );
    }
}
