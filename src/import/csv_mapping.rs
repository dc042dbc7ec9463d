//! CSV intake: column auto-detection, row parsing and the downloadable
//! error report.

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use thiserror::Error;

use super::types::{RawLeadRecord, RowFailure};

#[derive(Debug, Error)]
pub enum CsvImportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<&'static str>),
    #[error("no column named '{0}' in the header row")]
    UnknownColumn(String),
    #[error("failed to encode csv: {0}")]
    Encode(String),
}

const EMAIL_ALIASES: &[&str] = &["email", "email address", "e-mail", "e mail"];
const FIRST_NAME_ALIASES: &[&str] = &["firstname", "first name", "first", "fname", "given name"];
const LAST_NAME_ALIASES: &[&str] = &["lastname", "last name", "last", "lname", "surname"];
const PHONE_ALIASES: &[&str] = &["phone", "phone number", "mobile", "cell", "telephone"];
const COMPANY_ALIASES: &[&str] = &["company", "organization", "organisation", "org", "employer"];
const TITLE_ALIASES: &[&str] = &["title", "job title", "position", "role"];

/// Column index of each lead field within a CSV header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMapping {
    pub email: usize,
    pub first_name: usize,
    pub last_name: usize,
    pub phone: Option<usize>,
    pub company: Option<usize>,
    pub title: Option<usize>,
}

fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .replace(['_', '.'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Header names chosen by the operator for files whose headers the alias
/// lists do not recognise. A set override wins over auto-detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnOverrides {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
}

impl ColumnOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|header| aliases.contains(&header.as_str()))
}

/// Resolve one field: the named override if given, else the first alias hit.
fn resolve_column(
    headers: &[String],
    chosen: Option<&str>,
    aliases: &[&str],
) -> Result<Option<usize>, CsvImportError> {
    let Some(chosen) = chosen.map(str::trim).filter(|name| !name.is_empty()) else {
        return Ok(find_column(headers, aliases));
    };
    let wanted = normalize_header(chosen);
    headers
        .iter()
        .position(|header| *header == wanted)
        .map(Some)
        .ok_or_else(|| CsvImportError::UnknownColumn(chosen.to_string()))
}

/// Match header names against the known aliases of each field, after
/// applying any operator overrides.
pub fn detect_column_mapping(
    headers: &[&str],
    overrides: &ColumnOverrides,
) -> Result<ColumnMapping, CsvImportError> {
    let headers: Vec<String> = headers.iter().copied().map(normalize_header).collect();

    let email = resolve_column(&headers, overrides.email.as_deref(), EMAIL_ALIASES)?;
    let first_name = resolve_column(&headers, overrides.first_name.as_deref(), FIRST_NAME_ALIASES)?;
    let last_name = resolve_column(&headers, overrides.last_name.as_deref(), LAST_NAME_ALIASES)?;

    match (email, first_name, last_name) {
        (Some(email), Some(first_name), Some(last_name)) => Ok(ColumnMapping {
            email,
            first_name,
            last_name,
            phone: resolve_column(&headers, overrides.phone.as_deref(), PHONE_ALIASES)?,
            company: resolve_column(&headers, overrides.company.as_deref(), COMPANY_ALIASES)?,
            title: resolve_column(&headers, overrides.title.as_deref(), TITLE_ALIASES)?,
        }),
        _ => {
            let mut missing = Vec::new();
            if email.is_none() {
                missing.push("email");
            }
            if first_name.is_none() {
                missing.push("first name");
            }
            if last_name.is_none() {
                missing.push("last name");
            }
            Err(CsvImportError::MissingColumns(missing))
        }
    }
}

fn field(record: &StringRecord, idx: usize) -> String {
    record.get(idx).unwrap_or_default().to_string()
}

fn optional_field(record: &StringRecord, idx: Option<usize>) -> Option<String> {
    idx.and_then(|idx| record.get(idx))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Parse a CSV document into raw lead records, in file order.
///
/// Rows whose cells are all blank are skipped. Short rows are tolerated and
/// read as empty cells so validation can report them per row.
pub fn parse_leads_csv(content: &str) -> Result<Vec<RawLeadRecord>, CsvImportError> {
    parse_leads_csv_with(content, &ColumnOverrides::default())
}

/// Parse with explicit column choices for headers auto-detection misses.
pub fn parse_leads_csv_with(
    content: &str,
    overrides: &ColumnOverrides,
) -> Result<Vec<RawLeadRecord>, CsvImportError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    let headers: Vec<&str> = headers.iter().collect();
    let mapping = detect_column_mapping(&headers, overrides)?;

    let mut records = Vec::new();
    for result in reader.records() {
        let row = result?;
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        records.push(RawLeadRecord {
            email: field(&row, mapping.email),
            first_name: field(&row, mapping.first_name),
            last_name: field(&row, mapping.last_name),
            phone: optional_field(&row, mapping.phone),
            company: optional_field(&row, mapping.company),
            title: optional_field(&row, mapping.title),
        });
    }

    Ok(records)
}

/// Render failed rows as a CSV an operator can fix and re-upload.
pub fn error_report_csv(failures: &[RowFailure]) -> Result<String, CsvImportError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(["Row", "Email", "First Name", "Last Name", "Error"])?;

    for failure in failures {
        let row = failure.row_index.to_string();
        writer.write_record([
            row.as_str(),
            failure.record.email.as_str(),
            failure.record.first_name.as_str(),
            failure.record.last_name.as_str(),
            failure.reason.as_str(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| CsvImportError::Encode(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| CsvImportError::Encode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_header_variants() {
        let mapping = detect_column_mapping(
            &["E-mail", "First_Name", "Surname", "Mobile", "Organization", "Job Title"],
            &ColumnOverrides::default(),
        )
        .expect("mapping");

        assert_eq!(
            mapping,
            ColumnMapping {
                email: 0,
                first_name: 1,
                last_name: 2,
                phone: Some(3),
                company: Some(4),
                title: Some(5),
            }
        );
    }

    #[test]
    fn reports_missing_required_columns() {
        let err = detect_column_mapping(&["email", "company"], &ColumnOverrides::default())
            .unwrap_err();
        assert!(matches!(err, CsvImportError::MissingColumns(missing) if missing == vec!["first name", "last name"]));
    }

    #[test]
    fn overrides_map_unrecognised_headers() {
        let overrides = ColumnOverrides {
            email: Some("Correo".to_string()),
            first_name: Some("nombre".to_string()),
            last_name: Some(" Apellido ".to_string()),
            ..ColumnOverrides::default()
        };
        let content = "Correo,Nombre,Apellido,Company\n\
                       ana@example.com,Ana,Ruiz,Acme\n";

        let records = parse_leads_csv_with(content, &overrides).expect("parse");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].email, "ana@example.com");
        assert_eq!(records[0].first_name, "Ana");
        assert_eq!(records[0].last_name, "Ruiz");
        assert_eq!(records[0].company.as_deref(), Some("Acme"));
    }

    #[test]
    fn override_wins_over_alias() {
        let overrides = ColumnOverrides {
            email: Some("work email".to_string()),
            ..ColumnOverrides::default()
        };
        let mapping = detect_column_mapping(
            &["Email", "Work_Email", "First Name", "Last Name"],
            &overrides,
        )
        .expect("mapping");
        assert_eq!(mapping.email, 1);
    }

    #[test]
    fn override_naming_absent_column_is_an_error() {
        let overrides = ColumnOverrides {
            last_name: Some("Family".to_string()),
            ..ColumnOverrides::default()
        };
        let err = parse_leads_csv_with("Email,First Name,Surname
a@x.com,A,B
", &overrides)
            .unwrap_err();
        assert_eq!(err.to_string(), "no column named 'Family' in the header row");
    }

    #[test]
    fn parses_rows_in_file_order() {
        let content = "\u{feff}Email,First Name,Last Name,Phone\n\
                       jane@example.com,Jane,Doe,555-123-4567\n\
                       ,,,\n\
                       john@example.com,John,\"Smith, Jr.\",\n\
                       short@example.com,Short\n";

        let records = parse_leads_csv(content).expect("parse");

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].email, "jane@example.com");
        assert_eq!(records[0].phone.as_deref(), Some("555-123-4567"));
        assert_eq!(records[1].last_name, "Smith, Jr.");
        assert_eq!(records[1].phone, None);
        assert_eq!(records[2].last_name, "");
    }

    #[test]
    fn rejects_file_without_required_columns() {
        let err = parse_leads_csv("name,company\nJane,Acme\n").unwrap_err();
        assert!(matches!(err, CsvImportError::MissingColumns(_)));
        assert_eq!(
            err.to_string(),
            "missing required column(s): email, first name, last name"
        );
    }

    #[test]
    fn error_report_quotes_embedded_commas() {
        let failures = vec![RowFailure {
            row_index: 4,
            record: RawLeadRecord {
                email: "bad".to_string(),
                first_name: "Ann".to_string(),
                last_name: "Lee, PhD".to_string(),
                ..Default::default()
            },
            reason: "Invalid or missing email".to_string(),
        }];

        let report = error_report_csv(&failures).expect("encode");
        assert_eq!(
            report,
            "Row,Email,First Name,Last Name,Error\n4,bad,Ann,\"Lee, PhD\",Invalid or missing email\n"
        );
    }
}
