//! Batch-level validation and sanitization.
//!
//! Splits a submitted batch into the records that may be forwarded to the
//! normalization backend and the rows rejected locally. Row indices are
//! assigned once, from input order, and never renumbered.

use super::error::ImportError;
use super::sanitize::sanitize_lead;
use super::types::{
    BatchEntry, ImportBatch, ImportPreview, RawLeadRecord, RowFailure, RowIssue,
};
use super::validation::{detect_duplicates_in_file, validate};

/// Output of [`preprocess`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preprocessed {
    pub batch: ImportBatch,
    pub rejections: Vec<RowFailure>,
    /// Non-fatal findings on forwarded rows.
    pub warnings: Vec<RowIssue>,
}

impl Preprocessed {
    /// Nothing survived validation; the backend must not be called.
    pub fn is_fully_rejected(&self) -> bool {
        self.batch.is_empty()
    }
}

fn check_batch_size(records: &[RawLeadRecord], max_batch_size: usize) -> Result<(), ImportError> {
    if records.is_empty() {
        return Err(ImportError::EmptyBatch);
    }
    if records.len() > max_batch_size {
        return Err(ImportError::BatchTooLarge {
            size: records.len(),
            max: max_batch_size,
        });
    }
    Ok(())
}

/// Validate and sanitize every record of a batch.
///
/// The size ceiling is checked before any per-record work: an oversized
/// batch is rejected as a whole.
pub fn preprocess(
    source_name: &str,
    records: &[RawLeadRecord],
    max_batch_size: usize,
) -> Result<Preprocessed, ImportError> {
    check_batch_size(records, max_batch_size)?;

    let mut batch = ImportBatch::new(source_name);
    let mut rejections = Vec::new();
    let mut warnings = Vec::new();

    for (idx, record) in records.iter().enumerate() {
        let row_index = idx + 1;
        let outcome = validate(record, row_index);

        if !outcome.is_valid {
            rejections.push(RowFailure {
                row_index,
                record: record.clone(),
                reason: outcome.errors.join("; "),
            });
            continue;
        }

        match sanitize_lead(record) {
            Ok(sanitized) => {
                if !outcome.warnings.is_empty() {
                    log::warn!(
                        "import '{}': row {}: {}",
                        source_name,
                        row_index,
                        outcome.warnings.join("; ")
                    );
                    warnings.push(RowIssue {
                        row_index,
                        errors: Vec::new(),
                        warnings: outcome.warnings,
                    });
                }
                batch.entries.push(BatchEntry {
                    row_index,
                    record: sanitized,
                });
            }
            Err(problems) => rejections.push(RowFailure {
                row_index,
                record: record.clone(),
                reason: problems.join("; "),
            }),
        }
    }

    log::debug!(
        "import '{}': {} forwardable, {} rejected locally",
        source_name,
        batch.len(),
        rejections.len()
    );

    Ok(Preprocessed {
        batch,
        rejections,
        warnings,
    })
}

/// Dry run of [`preprocess`] for the upload preview: reports what would be
/// rejected and which emails repeat within the file, without sanitizing or
/// dispatching anything.
pub fn preview(records: &[RawLeadRecord], max_batch_size: usize) -> Result<ImportPreview, ImportError> {
    check_batch_size(records, max_batch_size)?;

    let mut invalid = Vec::new();
    let mut warnings = Vec::new();

    for (idx, record) in records.iter().enumerate() {
        let outcome = validate(record, idx + 1);
        if !outcome.is_valid {
            invalid.push(RowIssue {
                row_index: idx + 1,
                errors: outcome.errors,
                warnings: outcome.warnings,
            });
        } else if !outcome.warnings.is_empty() {
            warnings.push(RowIssue {
                row_index: idx + 1,
                errors: Vec::new(),
                warnings: outcome.warnings,
            });
        }
    }

    Ok(ImportPreview {
        total: records.len(),
        valid: records.len() - invalid.len(),
        invalid,
        warnings,
        duplicates_in_file: detect_duplicates_in_file(records),
    })
}
