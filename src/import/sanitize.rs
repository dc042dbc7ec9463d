//! Allow-list input sanitization for operator-supplied strings.
//!
//! Every function here is total: bad input yields an empty string or `None`,
//! never a panic or an error. Each one caps its output length before
//! returning. Sanitization runs at every boundary (storage and forwarding)
//! and callers must not assume another layer already did it.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use reqwest::Url;

use super::types::{RawLeadRecord, SanitizedLeadRecord};
use super::validation::MAX_FIELD_LENGTH;

pub const DEFAULT_PLAIN_TEXT_MAX: usize = 10_000;
pub const MAX_EMAIL_LENGTH: usize = 320;
pub const MAX_PHONE_LENGTH: usize = 20;
pub const MAX_URL_LENGTH: usize = 2048;
pub const DEFAULT_MAX_TAGS: usize = 50;
pub const DEFAULT_MAX_TAG_LENGTH: usize = 100;

const ALLOWED_URL_PREFIXES: &[&str] = &["http://", "https://", "mailto:"];
const BLOCKED_URL_SCHEMES: &[&str] = &["javascript:", "data:", "vbscript:", "file:"];

static TAG_REGEX: OnceLock<Regex> = OnceLock::new();
static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();

fn tag_regex() -> &'static Regex {
    TAG_REGEX.get_or_init(|| Regex::new(r"<[^>]*>").expect("Invalid HTML tag regex"))
}

fn email_regex() -> &'static Regex {
    EMAIL_REGEX.get_or_init(|| {
        Regex::new(
            r"^[a-z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*$",
        )
        .expect("Invalid email sanitization regex")
    })
}

fn is_stripped_control(c: char) -> bool {
    c.is_control() && c != '\n' && c != '\t' && c != '\r'
}

fn truncate_chars(value: &str, max_len: usize) -> String {
    value.chars().take(max_len).collect()
}

/// Reduce arbitrary input to safe single-paragraph-or-multiline plain text.
///
/// Tags are removed wholesale and any stray angle bracket left behind is
/// dropped, so the result never contains `<` or `>`. Runs of spaces and tabs
/// collapse to one space; line breaks survive.
pub fn sanitize_plain_text(input: &str, max_len: usize) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let without_tags = tag_regex().replace_all(trimmed, "");

    let mut collapsed = String::with_capacity(without_tags.len());
    let mut in_blank_run = false;
    for c in without_tags.chars() {
        if c == '<' || c == '>' || is_stripped_control(c) {
            continue;
        }
        if c == ' ' || c == '\t' {
            if !in_blank_run {
                collapsed.push(' ');
                in_blank_run = true;
            }
            continue;
        }
        in_blank_run = false;
        collapsed.push(c);
    }

    truncate_chars(collapsed.trim(), max_len)
        .trim_end()
        .to_string()
}

/// Lower-case and validate an address. Returns `None` rather than an error
/// for anything that does not look like a deliverable mailbox.
pub fn sanitize_email(input: &str) -> Option<String> {
    let normalized = input.trim().to_lowercase();
    if normalized.is_empty() || normalized.chars().count() > MAX_EMAIL_LENGTH {
        return None;
    }
    if email_regex().is_match(&normalized) {
        Some(normalized)
    } else {
        None
    }
}

/// Keep only the characters that appear in written phone numbers.
pub fn sanitize_phone(input: &str) -> String {
    let mut cleaned = String::with_capacity(input.len());
    let mut last_was_space = false;
    for c in input.trim().chars() {
        match c {
            '0'..='9' | '+' | '-' | '(' | ')' => {
                cleaned.push(c);
                last_was_space = false;
            }
            ' ' if !last_was_space => {
                cleaned.push(' ');
                last_was_space = true;
            }
            _ => {}
        }
    }

    truncate_chars(cleaned.trim(), MAX_PHONE_LENGTH)
        .trim_end()
        .to_string()
}

/// Accept only web and mail links that parse as URLs.
pub fn sanitize_url(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lower = trimmed.to_ascii_lowercase();
    if BLOCKED_URL_SCHEMES
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }
    if !ALLOWED_URL_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return None;
    }
    if trimmed.chars().count() > MAX_URL_LENGTH {
        return None;
    }

    Url::parse(trimmed).ok().map(|_| trimmed.to_string())
}

/// Clean a tag list: blank entries dropped, each tag sanitized, list
/// truncated to `max_tags`, then de-duplicated keeping first occurrences.
pub fn sanitize_tags(tags: &[String], max_tags: usize, max_len: usize) -> Vec<String> {
    let truncated: Vec<String> = tags
        .iter()
        .filter(|tag| !tag.trim().is_empty())
        .map(|tag| sanitize_plain_text(tag, max_len))
        .filter(|tag| !tag.is_empty())
        .take(max_tags)
        .collect();

    let mut seen = HashSet::new();
    truncated
        .into_iter()
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// Escape pattern metacharacters so user text matches literally inside a
/// `LIKE`/`ILIKE ... ESCAPE '\'` clause.
pub fn sanitize_like_pattern(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn sanitize_optional(value: Option<&str>, max_len: usize) -> Option<String> {
    value
        .map(|value| sanitize_plain_text(value, max_len))
        .filter(|value| !value.is_empty())
}

/// Sanitize every field of an already validated record.
///
/// Returns the list of fields that did not survive sanitization when a
/// required field ends up empty.
pub fn sanitize_lead(record: &RawLeadRecord) -> Result<SanitizedLeadRecord, Vec<String>> {
    let mut problems = Vec::new();

    let email = sanitize_email(&record.email);
    if email.is_none() {
        problems.push(super::validation::INVALID_EMAIL.to_string());
    }

    let first_name = sanitize_plain_text(&record.first_name, MAX_FIELD_LENGTH);
    if first_name.is_empty() {
        problems.push("First Name is required".to_string());
    }

    let last_name = sanitize_plain_text(&record.last_name, MAX_FIELD_LENGTH);
    if last_name.is_empty() {
        problems.push("Last Name is required".to_string());
    }

    let phone = record
        .phone
        .as_deref()
        .map(sanitize_phone)
        .filter(|phone| !phone.is_empty());

    match email {
        Some(email) if problems.is_empty() => Ok(SanitizedLeadRecord {
            email,
            first_name,
            last_name,
            phone,
            company: sanitize_optional(record.company.as_deref(), MAX_FIELD_LENGTH),
            title: sanitize_optional(record.title.as_deref(), MAX_FIELD_LENGTH),
        }),
        _ => Err(problems),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_collapses_whitespace() {
        assert_eq!(sanitize_plain_text("  John   Doe  ", 255), "John Doe");
        assert_eq!(
            sanitize_plain_text("line one\n\t line  two", 255),
            "line one\n line two"
        );
    }

    #[test]
    fn plain_text_strips_markup_and_stray_brackets() {
        let cleaned = sanitize_plain_text("<script>alert(1)</script>Hi <b>there</b> a<b", 100);
        assert_eq!(cleaned, "alert(1)Hi there ab");
        assert!(!cleaned.contains('<') && !cleaned.contains('>'));
    }

    #[test]
    fn plain_text_drops_control_characters() {
        assert_eq!(sanitize_plain_text("a\u{0}b\u{7f}c\u{1b}d", 100), "abcd");
    }

    #[test]
    fn plain_text_respects_max_length() {
        let inputs = [
            "x".repeat(500),
            format!("{}<i>{}</i>", "é".repeat(300), "y".repeat(300)),
            "word ".repeat(200),
        ];
        for input in &inputs {
            let cleaned = sanitize_plain_text(input, 120);
            assert!(cleaned.chars().count() <= 120);
            assert!(!cleaned.contains('<') && !cleaned.contains('>'));
        }
    }

    #[test]
    fn email_is_lowercased_or_rejected() {
        assert_eq!(
            sanitize_email("  Jane.Doe+crm@Example.COM "),
            Some("jane.doe+crm@example.com".to_string())
        );
        assert_eq!(sanitize_email("no-at-sign"), None);
        assert_eq!(sanitize_email("a b@example.com"), None);
        assert_eq!(sanitize_email("<x>@example.com"), None);
        assert_eq!(sanitize_email(""), None);

        let long_local = format!("{}@example.com", "a".repeat(320));
        assert_eq!(sanitize_email(&long_local), None);
    }

    #[test]
    fn phone_keeps_dialable_characters() {
        assert_eq!(sanitize_phone(" +1 (555)  123-4567 ext."), "+1 (555) 123-4567");
        assert_eq!(sanitize_phone("1234567890123456789012345"), "12345678901234567890");
        assert_eq!(sanitize_phone("call me"), "");
    }

    #[test]
    fn url_allows_only_safe_schemes() {
        assert_eq!(
            sanitize_url("https://example.com"),
            Some("https://example.com".to_string())
        );
        assert_eq!(
            sanitize_url("mailto:sales@example.com"),
            Some("mailto:sales@example.com".to_string())
        );
        assert_eq!(sanitize_url("javascript:alert(1)"), None);
        assert_eq!(sanitize_url("JavaScript:alert(1)"), None);
        assert_eq!(sanitize_url("data:text/html;base64,AAAA"), None);
        assert_eq!(sanitize_url("file:///etc/passwd"), None);
        assert_eq!(sanitize_url("ftp://example.com"), None);
        assert_eq!(sanitize_url("http://"), None);

        let long = format!("https://example.com/{}", "a".repeat(2048));
        assert_eq!(sanitize_url(&long), None);
    }

    #[test]
    fn tags_are_cleaned_truncated_and_unique() {
        let tags = vec![
            "  webinar ".to_string(),
            "".to_string(),
            "<b>webinar</b>".to_string(),
            "   ".to_string(),
            "q3-list".to_string(),
            "extra".to_string(),
        ];
        assert_eq!(sanitize_tags(&tags, 3, 100), vec!["webinar", "q3-list"]);
    }

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(sanitize_like_pattern(r"50%_off [x]\"), r"50\%\_off \[x\]\\");
        assert_eq!(sanitize_like_pattern("plain"), "plain");
    }

    #[test]
    fn lead_sanitization_requires_surviving_names() {
        let record = RawLeadRecord {
            email: "A@X.com".to_string(),
            first_name: "<b></b>".to_string(),
            last_name: "  Doe ".to_string(),
            phone: Some("(555) 123-4567".to_string()),
            company: Some("   ".to_string()),
            title: None,
        };
        assert_eq!(
            sanitize_lead(&record),
            Err(vec!["First Name is required".to_string()])
        );
    }
}
