//! Output Formatter
//!
//! Enforces platform constraints on an answer before it leaves the pipeline:
//! length limits (Discord caps a message at 2000 chars, a document assistant
//! allows more) and markup handling (rich markdown vs. plain text).
//! Pure functions, no I/O.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AgentError;

/// Markup handling for the final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Markup {
    /// Keep markdown as-is.
    #[default]
    Rich,
    /// Strip markdown down to plain text.
    Plain,
}

/// Delivery mode. Both are valid; neither is canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// One complete string.
    #[default]
    Batch,
    /// Ordered chunks whose concatenation equals the batch output.
    Streaming,
}

/// Formatter style: markup handling plus delivery mode.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OutputStyle {
    #[serde(default)]
    pub markup: Markup,
    #[serde(default)]
    pub delivery: Delivery,
}

impl OutputStyle {
    pub fn plain() -> Self {
        Self { markup: Markup::Plain, delivery: Delivery::Batch }
    }

    pub fn rich() -> Self {
        Self { markup: Markup::Rich, delivery: Delivery::Batch }
    }
}

// Markdown elements reduced for Plain output. Links become "text (url)".
static MD_CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[a-zA-Z0-9_+-]*\n?").unwrap());
static MD_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap());
static MD_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s+").unwrap());
static MD_EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\*{1,3}|_{1,3}|`)([^*_`]+)(\*{1,3}|_{1,3}|`)").unwrap());

/// Truncate to at most `max_chars` characters, never splitting a multibyte
/// character (the cut lands on a char boundary by construction).
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Strip markdown markup, keeping link targets as "text (url)".
fn strip_markup(text: &str) -> String {
    let text = MD_CODE_FENCE.replace_all(text, "");
    let text = MD_LINK.replace_all(&text, "$1 ($2)");
    let text = MD_HEADER.replace_all(&text, "");
    let text = MD_EMPHASIS.replace_all(&text, "$2");
    text.into_owned()
}

/// Format an answer: apply markup handling, then bound the length.
///
/// Deterministic and pure. Fails only if stripping destroyed a non-empty
/// input; callers should fall back to [`format`] which handles that.
pub fn try_format(text: &str, max_chars: usize, style: &OutputStyle) -> Result<String, AgentError> {
    let shaped = match style.markup {
        Markup::Rich => text.to_string(),
        Markup::Plain => {
            let stripped = strip_markup(text);
            if stripped.trim().is_empty() && !text.trim().is_empty() {
                return Err(AgentError::Formatting(
                    "markup stripping produced empty output".to_string(),
                ));
            }
            stripped
        }
    };

    Ok(truncate_chars(&shaped, max_chars).to_string())
}

/// Format an answer, falling back to raw char-safe truncation if shaping
/// fails. The failure is logged, never swallowed into a panic or an empty
/// answer.
pub fn format(text: &str, max_chars: usize, style: &OutputStyle) -> String {
    match try_format(text, max_chars, style) {
        Ok(out) => out,
        Err(e) => {
            warn!("formatter fallback: {}", e);
            truncate_chars(text, max_chars).to_string()
        }
    }
}

/// Split formatted text into ordered streaming chunks of at most
/// `chunk_chars` characters each. Concatenating the chunks reproduces the
/// input exactly.
pub fn into_chunks(text: &str, chunk_chars: usize) -> Vec<String> {
    if text.is_empty() || chunk_chars == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let head = truncate_chars(rest, chunk_chars);
        chunks.push(head.to_string());
        rest = &rest[head.len()..];
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo wörld 🦀 teşt";
        for limit in 0..=text.chars().count() {
            let cut = truncate_chars(text, limit);
            assert_eq!(cut.chars().count(), limit);
            assert!(text.starts_with(cut));
        }
        assert_eq!(truncate_chars(text, 1000), text);
    }

    #[test]
    fn test_format_bounds_length() {
        let long = "a".repeat(5000);
        let out = format(&long, 2000, &OutputStyle::rich());
        assert_eq!(out.chars().count(), 2000);
    }

    #[test]
    fn test_plain_strips_markdown() {
        let md = "# Report\n\nSee **bold** and [link](https://example.com) and `code`.";
        let out = format(md, 500, &OutputStyle::plain());
        assert!(!out.contains('#'));
        assert!(!out.contains("**"));
        assert!(out.contains("link (https://example.com)"));
        assert!(out.contains("bold"));
    }

    #[test]
    fn test_rich_preserves_markdown() {
        let md = "## Findings\n- **item**";
        let out = format(md, 500, &OutputStyle::rich());
        assert_eq!(out, md);
    }

    #[test]
    fn test_chunks_concatenate_to_batch_output() {
        let text = "αβγδε".repeat(100);
        let chunks = into_chunks(&text, 37);
        assert!(chunks.iter().all(|c| c.chars().count() <= 37));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunks_empty_input() {
        assert!(into_chunks("", 10).is_empty());
    }

    #[test]
    fn test_format_deterministic() {
        let text = "Some *answer* with [a link](https://x.y)";
        let style = OutputStyle::plain();
        assert_eq!(format(text, 30, &style), format(text, 30, &style));
    }
}
