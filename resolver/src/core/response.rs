//! Parsing of free-form oracle responses.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::ContentSplitError;

static OUTER_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A\s*```[\w+\-.]*[ \t]*\r?\n(.*?)\r?\n?```\s*\z").expect("valid fence regex")
});

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("valid ansi regex"));

/// Drop one surrounding markdown code fence, if the whole text is fenced.
pub fn remove_outer_markdown(text: &str) -> String {
    match OUTER_FENCE_RE.captures(text) {
        Some(caps) => caps[1].to_string(),
        None => text.to_string(),
    }
}

/// Split a response into `(content, summary)`.
///
/// The oracle is told to answer with the file content followed by exactly one
/// summary line. The last non-empty line is the summary; everything before it
/// (minus an outer code fence) is the content.
pub fn split_content_and_summary(response: &str) -> Result<(String, String), ContentSplitError> {
    let trimmed = response.trim_end();
    let (content, summary) = trimmed.rsplit_once('\n').ok_or(ContentSplitError)?;
    let summary = summary.trim();
    if summary.is_empty() || summary.starts_with("```") {
        return Err(ContentSplitError);
    }
    let content = remove_outer_markdown(content.trim_end());
    if content.trim().is_empty() {
        return Err(ContentSplitError);
    }
    Ok((content, summary.to_string()))
}

/// Extract a JSON array from a response that may wrap it in a fence or prose.
pub fn extract_json_list(response: &str) -> Option<Vec<Value>> {
    let unfenced = remove_outer_markdown(response.trim());
    if let Ok(Value::Array(items)) = serde_json::from_str(unfenced.trim()) {
        return Some(items);
    }
    let start = response.find('[')?;
    let end = response.rfind(']')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&response[start..=end]) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Extract a JSON list of strings, dropping non-string entries.
pub fn extract_string_list(response: &str) -> Option<Vec<String>> {
    let items = extract_json_list(response)?;
    Some(
        items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
    )
}

pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}
