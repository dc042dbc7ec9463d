//! Field-level validation for a single lead record.
//!
//! Validation only decides whether a row may be imported. It never rewrites
//! the record; normalization happens later in [`crate::import::sanitize`].

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use super::types::{InFileDuplicate, RawLeadRecord, ValidationOutcome};

/// Maximum length for names, company and title.
pub const MAX_FIELD_LENGTH: usize = 255;

const MIN_PHONE_DIGITS: usize = 10;
const MAX_PHONE_DIGITS: usize = 15;

pub const INVALID_EMAIL: &str = "Invalid or missing email";

static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();

fn email_regex() -> &'static Regex {
    EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid email validation regex")
    })
}

/// Conservative `local@domain.tld` check. Case is preserved.
pub fn is_valid_email(email: &str) -> bool {
    let trimmed = email.trim();
    !trimmed.is_empty() && email_regex().is_match(trimmed)
}

/// Error message for a missing or oversized required field, if any.
pub fn check_required_field(value: &str, field_name: &str) -> Option<String> {
    if value.trim().is_empty() {
        return Some(format!("{field_name} is required"));
    }
    check_length(value, field_name)
}

/// Error message for an oversized optional field, if any. Absent and blank
/// values are always accepted.
pub fn check_optional_field(value: Option<&str>, field_name: &str) -> Option<String> {
    match value {
        Some(value) if !value.trim().is_empty() => check_length(value, field_name),
        _ => None,
    }
}

fn check_length(value: &str, field_name: &str) -> Option<String> {
    if value.chars().count() > MAX_FIELD_LENGTH {
        Some(format!("{field_name} exceeds {MAX_FIELD_LENGTH} characters"))
    } else {
        None
    }
}

/// Warning for a phone number whose digit count is implausible.
///
/// Phone numbers are never a hard rejection reason.
pub fn check_phone(phone: &str) -> Option<String> {
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    if digits == 0 && phone.trim().is_empty() {
        return None;
    }
    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits) {
        Some(format!(
            "Phone has {digits} digits (expected {MIN_PHONE_DIGITS}-{MAX_PHONE_DIGITS})"
        ))
    } else {
        None
    }
}

/// Validate one record. `row_index` is the 1-based input position and is
/// only used for logging.
pub fn validate(record: &RawLeadRecord, row_index: usize) -> ValidationOutcome {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !is_valid_email(&record.email) {
        errors.push(INVALID_EMAIL.to_string());
    }

    errors.extend(check_required_field(&record.first_name, "First Name"));
    errors.extend(check_required_field(&record.last_name, "Last Name"));

    if let Some(phone) = record.phone.as_deref() {
        warnings.extend(check_phone(phone));
    }

    errors.extend(check_optional_field(record.company.as_deref(), "Company"));
    errors.extend(check_optional_field(record.title.as_deref(), "Title"));

    if !errors.is_empty() {
        log::debug!("row {}: {} validation error(s)", row_index, errors.len());
    }

    ValidationOutcome {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Rows whose email (case-insensitive) repeats an earlier row in the same file.
pub fn detect_duplicates_in_file(records: &[RawLeadRecord]) -> Vec<InFileDuplicate> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();

    for (idx, record) in records.iter().enumerate() {
        let email = record.email.trim().to_lowercase();
        if email.is_empty() {
            continue;
        }
        if !seen.insert(email.clone()) {
            duplicates.push(InFileDuplicate {
                row_index: idx + 1,
                email,
            });
        }
    }

    duplicates
}
