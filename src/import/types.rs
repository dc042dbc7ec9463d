//! Value types flowing through the lead import pipeline.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A lead exactly as the operator supplied it (JSON body or CSV row).
///
/// Decoding never fails on a field's type: a missing, `null` or mistyped
/// required field decodes as an empty string, and an optional field accepts
/// numbers as text. The row then fails validation on its own instead of
/// rejecting the whole request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RawLeadRecord {
    #[serde(default, deserialize_with = "lenient::text")]
    pub email: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub first_name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub last_name: String,
    #[serde(
        default,
        deserialize_with = "lenient::optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub phone: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub company: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub title: Option<String>,
}

/// Per-field and per-row decoders that turn type mismatches into missing
/// values.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::RawLeadRecord;

    pub fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(value) => Ok(value),
            _ => Ok(String::new()),
        }
    }

    pub fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(value) => Ok(Some(value)),
            Value::Number(number) => Ok(Some(number.to_string())),
            _ => Ok(None),
        }
    }

    /// Rows that are not objects decode as empty records and keep their
    /// position in the list.
    pub fn records<'de, D>(deserializer: D) -> Result<Vec<RawLeadRecord>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let rows = match Value::deserialize(deserializer)? {
            Value::Array(rows) => rows,
            _ => return Ok(Vec::new()),
        };

        Ok(rows
            .into_iter()
            .map(|row| serde_json::from_value(row).unwrap_or_default())
            .collect())
    }
}

/// A lead after every string field has been through the sanitizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedLeadRecord {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Result of validating a single record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// A row that will not be imported, with the reason why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    /// 1-based position of the row in the submitted input.
    pub row_index: usize,
    pub record: RawLeadRecord,
    pub reason: String,
}

/// One forwardable record together with its original input position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub row_index: usize,
    pub record: SanitizedLeadRecord,
}

/// The sanitized records of one import request, sent to the backend in a
/// single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBatch {
    pub source_name: String,
    pub entries: Vec<BatchEntry>,
}

impl ImportBatch {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &SanitizedLeadRecord> {
        self.entries.iter().map(|entry| &entry.record)
    }
}

/// A record the backend already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateRecord {
    pub email: String,
    #[serde(
        rename = "existingRecordId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub existing_id: Option<String>,
}

/// A per-row rejection reported by the backend, already mapped back to the
/// original input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRowError {
    pub row_index: usize,
    pub reason: String,
}

/// Terminal result of a successful dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub success_count: usize,
    pub duplicates: Vec<DuplicateRecord>,
    pub remote_errors: Vec<RemoteRowError>,
}

/// Unified report returned to the caller and summarized into the audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub success_count: usize,
    pub errors: Vec<RowFailure>,
    pub duplicates: Vec<DuplicateRecord>,
    pub source_tag: String,
    pub summary_message: String,
}

/// Inbound request body for a bulk import.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    /// Label of the list the leads came from; becomes the source tag.
    #[serde(default, deserialize_with = "lenient::text")]
    pub source_name: String,
    /// Parsed rows, in file order.
    #[serde(default, deserialize_with = "lenient::records")]
    pub leads: Vec<RawLeadRecord>,
}

/// Who initiated an import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub email: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
        }
    }
}

/// Validation findings for one row in a dry-run preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RowIssue {
    pub row_index: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// A row whose email already appeared earlier in the same file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InFileDuplicate {
    pub row_index: usize,
    pub email: String,
}

/// Dry-run summary of what an import would do, without contacting the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreview {
    pub total: usize,
    pub valid: usize,
    pub invalid: Vec<RowIssue>,
    pub warnings: Vec<RowIssue>,
    pub duplicates_in_file: Vec<InFileDuplicate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mistyped_fields_decode_as_missing() {
        let record: RawLeadRecord = serde_json::from_value(json!({
            "email": null,
            "firstName": 7,
            "lastName": "Smith",
            "phone": 5551234567u64,
            "company": ["Acme"]
        }))
        .unwrap();

        assert_eq!(record.email, "");
        assert_eq!(record.first_name, "");
        assert_eq!(record.last_name, "Smith");
        assert_eq!(record.phone.as_deref(), Some("5551234567"));
        assert_eq!(record.company, None);
    }

    #[test]
    fn non_object_rows_keep_their_position() {
        let request: ImportRequest = serde_json::from_value(json!({
            "sourceName": "List",
            "leads": [
                {"email": "a@example.com", "firstName": "A", "lastName": "B"},
                "not a lead",
                null
            ]
        }))
        .unwrap();

        assert_eq!(request.leads.len(), 3);
        assert_eq!(request.leads[0].email, "a@example.com");
        assert_eq!(request.leads[1], RawLeadRecord::default());
        assert_eq!(request.leads[2], RawLeadRecord::default());
    }

    #[test]
    fn non_string_source_is_blank() {
        let request: ImportRequest =
            serde_json::from_value(json!({"sourceName": 12, "leads": []})).unwrap();
        assert!(request.source_name.is_empty());
    }
}
