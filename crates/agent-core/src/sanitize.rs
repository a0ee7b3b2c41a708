//! Reply sanitizer
//!
//! Drafts arrive as markdown; the forum post must be plain text. The
//! flattener keeps the wording and drops the markup: headings and
//! emphasis are unwrapped, links become "text (url)", list markers become
//! bullets, fenced and inline code keep only their content.

use once_cell::sync::Lazy;
use regex::Regex;

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```(.*?)```").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").unwrap());
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s*(.+)$").unwrap());
static BOLD_STARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static ITALIC_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*]+)\*").unwrap());
static BOLD_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"__([^_]+)__").unwrap());
static ITALIC_UNDERSCORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_([^_]+)_").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap());
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[-*+]\s+").unwrap());
static NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*\d+\.\s+").unwrap());
static LEFTOVER_MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*_~`]").unwrap());
static EXTRA_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n\s*\n+").unwrap());
static LINE_EDGE_WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]+|[ \t]+$").unwrap());

/// Flatten markdown to plain text suitable for posting.
pub fn markdown_to_plain_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    // Unwrap fenced code blocks, keeping their content
    let text = CODE_FENCE.replace_all(text, |caps: &regex::Captures| {
        caps[1].trim().to_string()
    });
    let text = INLINE_CODE.replace_all(&text, "$1");

    // Headings become their own paragraph
    let text = HEADING.replace_all(&text, "$1\n\n");

    // Strip emphasis but keep the text
    let text = BOLD_STARS.replace_all(&text, "$1");
    let text = ITALIC_STAR.replace_all(&text, "$1");
    let text = BOLD_UNDERSCORES.replace_all(&text, "$1");
    let text = ITALIC_UNDERSCORE.replace_all(&text, "$1");

    // [text](url) -> "text (url)"
    let text = LINK.replace_all(&text, "$1 ($2)");

    // Bulleted and numbered lists become simple bullets
    let text = BULLET.replace_all(&text, "\u{2022} ");
    let text = NUMBERED.replace_all(&text, "\u{2022} ");

    let text = LEFTOVER_MARKUP.replace_all(&text, "");

    // Collapse runs of blank lines and trim line edges
    let text = EXTRA_BLANK_LINES.replace_all(&text, "\n\n");
    let text = LINE_EDGE_WHITESPACE.replace_all(&text, "");

    text.trim().to_string()
}
