//! Response parser: free-form model output → `ParsedAnalysis`.
//!
//! Never fails. Any field that cannot be extracted gets a fixed, clearly
//! labeled fallback so an analysis is always presentable.
//!
//! Recognized markers (case-insensitive, optional `#`/`**` decoration,
//! followed by a colon or alone on their line):
//! - summary: `SUMMARY`, `One-line summary`, `Headline`
//! - body: `ANALYSIS`, `Body`, `Content`, `Reflection`
//! - insights: `INSIGHTS`, `Key Insights`, `Key Takeaways`, `Takeaways`,
//!   `Bullet Points`
//!
//! Bullets are lines starting with `-`, `*`, `•` or `–`, capped at
//! `MAX_BULLETS`.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::ParsedAnalysis;

pub const FALLBACK_SUMMARY: &str = "[Summary unavailable] Reflections on your recent entries";
pub const FALLBACK_CONTENT: &str =
    "[Analysis unavailable] We couldn't format a full analysis this time. Your entries were \
     saved and will be included the next time you run an analysis.";
pub const FALLBACK_BULLET: &str = "[Insights unavailable] Keep journaling to surface new patterns.";

/// Longest summary kept, in characters.
pub const MAX_SUMMARY_CHARS: usize = 200;
pub const MAX_BULLETS: usize = 5;

const SUMMARY_LABELS: &str = r"summary|one[- ]line summary|headline";
const BODY_LABELS: &str = r"analysis|body|content|reflection";
const INSIGHT_LABELS: &str = r"insights|key insights|key takeaways|takeaways|bullet points";

/// Matches a marker line: optional heading/bold decoration, the label, then
/// either a colon followed by same-line text (captured as `rest`) or the end
/// of the line. Requiring one of those keeps prose like "Content with..." out.
fn marker_regex(labels: &str) -> Regex {
    let pattern = format!(
        r"(?im)^[ \t]*(?:#{{1,6}}[ \t]*)?(?:\*\*|__)?[ \t]*(?:{labels})[ \t]*(?:\*\*|__)?[ \t]*(?::[ \t]*(?:\*\*|__)?[ \t]*(?P<rest>[^\n]*)|(?:\*\*|__)?[ \t]*)$"
    );
    Regex::new(&pattern).expect("marker labels form a valid regex")
}

fn summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| marker_regex(SUMMARY_LABELS))
}

fn body_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| marker_regex(BODY_LABELS))
}

fn insights_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| marker_regex(INSIGHT_LABELS))
}

/// A located marker: where its line starts, where it ends, and the text
/// that followed the marker on the same line.
struct Marker<'a> {
    start: usize,
    end: usize,
    rest: &'a str,
}

fn find_marker<'a>(re: &Regex, text: &'a str) -> Option<Marker<'a>> {
    let caps = re.captures(text)?;
    let whole = caps.get(0)?;
    Some(Marker {
        start: whole.start(),
        end: whole.end(),
        rest: caps.name("rest").map(|m| m.as_str()).unwrap_or(""),
    })
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

/// Strip markdown emphasis and quotes a model tends to wrap a summary in.
fn clean_inline(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| c == '*' || c == '_' || c == '"' || c == '`')
        .trim()
        .to_string()
}

fn parse_summary(text: &str) -> Option<String> {
    let marker = find_marker(summary_re(), text)?;
    let inline = clean_inline(marker.rest);
    let summary = if inline.is_empty() {
        // Summary on the following non-blank line
        text[marker.end..]
            .lines()
            .map(clean_inline)
            .find(|line| !line.is_empty())
            .filter(|line| {
                find_marker(body_re(), line).is_none() && find_marker(insights_re(), line).is_none()
            })?
    } else {
        inline
    };
    Some(truncate_chars(&summary, MAX_SUMMARY_CHARS))
}

fn parse_body(text: &str) -> Option<String> {
    let marker = find_marker(body_re(), text)?;
    let mut body = String::new();
    if !marker.rest.trim().is_empty() {
        body.push_str(marker.rest.trim());
        body.push('\n');
    }
    let after = &text[marker.end..];
    let section = match find_marker(insights_re(), after) {
        Some(insights) => &after[..insights.start],
        None => after,
    };
    body.push_str(section);

    let body = strip_leaked_markers(&body);
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}

/// Drop any marker line that slipped into the body (a summary restated at
/// the end, or an insights heading the model mangled).
fn strip_leaked_markers(body: &str) -> String {
    let kept: Vec<&str> = body
        .lines()
        .filter(|line| {
            let line = line.trim();
            let is_bare_marker = |re: &Regex| {
                find_marker(re, line).is_some_and(|m| m.rest.trim().is_empty())
            };
            !(is_bare_marker(insights_re()) || is_bare_marker(summary_re()))
        })
        .collect();
    collapse_blank_lines(&kept.join("\n"))
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.trim().lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run == 1 {
                out.push('\n');
            }
        } else {
            blank_run = 0;
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }
    out.trim().to_string()
}

fn bullet_text(line: &str) -> Option<&str> {
    let line = line.trim_start();
    let rest = line
        .strip_prefix('•')
        .or_else(|| line.strip_prefix('–'))
        .or_else(|| line.strip_prefix('-'))
        .or_else(|| line.strip_prefix('*'))?;
    // "**Bold**" is emphasis and "---" is a rule, neither is a bullet
    if rest.starts_with('*') || rest.starts_with('-') {
        return None;
    }
    let rest = rest.trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

fn parse_bullets(text: &str) -> Vec<String> {
    let Some(marker) = find_marker(insights_re(), text) else {
        return Vec::new();
    };
    text[marker.end..]
        .lines()
        .filter_map(bullet_text)
        .map(clean_inline)
        .filter(|b| !b.is_empty())
        .take(MAX_BULLETS)
        .collect()
}

/// Parse generated text into summary, body and insights.
pub fn parse_analysis_response(raw: &str) -> ParsedAnalysis {
    let text = raw.replace("\r\n", "\n");

    let summary = parse_summary(&text);
    let content = parse_body(&text);
    let bullet_points = parse_bullets(&text);

    if summary.is_none() || content.is_none() || bullet_points.is_empty() {
        log::warn!(
            "ResponseParser: fell back on {}{}{}({} chars of output)",
            if summary.is_none() { "summary " } else { "" },
            if content.is_none() { "content " } else { "" },
            if bullet_points.is_empty() { "insights " } else { "" },
            raw.len()
        );
    }

    ParsedAnalysis {
        summary: summary.unwrap_or_else(|| FALLBACK_SUMMARY.to_string()),
        content: content.unwrap_or_else(|| FALLBACK_CONTENT.to_string()),
        bullet_points: if bullet_points.is_empty() {
            vec![FALLBACK_BULLET.to_string()]
        } else {
            bullet_points
        },
    }
}
