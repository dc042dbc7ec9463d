//! Merge local rejections with the backend's per-record outcome.

use super::types::{DispatchOutcome, ImportReport, RawLeadRecord, RowFailure};

pub fn summary_message(success_count: usize, error_count: usize) -> String {
    match (success_count, error_count) {
        (0, _) => "No leads were imported".to_string(),
        (n, 0) => format!("Successfully imported {n} lead(s)"),
        (n, m) => format!("Successfully imported {n} lead(s) ({m} failed)"),
    }
}

/// Build the caller-facing report.
///
/// Local rejections are listed first, followed by remote errors in the order
/// the backend returned them. Remote errors carry the raw input record of the
/// row they refer to, so every failure is reported against what the operator
/// actually submitted.
pub fn reconcile(
    source_tag: &str,
    local_rejections: Vec<RowFailure>,
    outcome: DispatchOutcome,
    inputs: &[RawLeadRecord],
) -> ImportReport {
    let mut errors = local_rejections;
    errors.reserve(outcome.remote_errors.len());

    for remote in outcome.remote_errors {
        let record = remote
            .row_index
            .checked_sub(1)
            .and_then(|idx| inputs.get(idx))
            .cloned()
            .unwrap_or_default();
        errors.push(RowFailure {
            row_index: remote.row_index,
            record,
            reason: remote.reason,
        });
    }

    ImportReport {
        success_count: outcome.success_count,
        summary_message: summary_message(outcome.success_count, errors.len()),
        errors,
        duplicates: outcome.duplicates,
        source_tag: source_tag.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::types::{DuplicateRecord, RemoteRowError};

    fn lead(email: &str) -> RawLeadRecord {
        RawLeadRecord {
            email: email.to_string(),
            first_name: "F".to_string(),
            last_name: "L".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn local_rejections_precede_remote_errors() {
        let inputs = vec![lead("a@x.com"), lead("bad"), lead("c@x.com"), lead("d@x.com")];
        let local = vec![RowFailure {
            row_index: 2,
            record: inputs[1].clone(),
            reason: "Invalid or missing email".to_string(),
        }];
        let outcome = DispatchOutcome {
            success_count: 1,
            duplicates: vec![DuplicateRecord {
                email: "d@x.com".to_string(),
                existing_id: Some("rec9".to_string()),
            }],
            remote_errors: vec![RemoteRowError {
                row_index: 3,
                reason: "Domain blocked".to_string(),
            }],
        };

        let report = reconcile("Webinar", local, outcome, &inputs);

        let rows: Vec<usize> = report.errors.iter().map(|e| e.row_index).collect();
        assert_eq!(rows, vec![2, 3]);
        assert_eq!(report.errors[1].record, inputs[2]);
        assert_eq!(report.errors[1].reason, "Domain blocked");
        assert_eq!(report.success_count, 1);
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.source_tag, "Webinar");
        assert_eq!(report.summary_message, "Successfully imported 1 lead(s) (2 failed)");
    }

    #[test]
    fn remote_errors_stay_after_later_local_rows() {
        let inputs = vec![lead("a@x.com"), lead("b@x.com"), lead("c@x.com"), lead("bad")];
        let local = vec![RowFailure {
            row_index: 4,
            record: inputs[3].clone(),
            reason: "Invalid or missing email".to_string(),
        }];
        let outcome = DispatchOutcome {
            success_count: 2,
            duplicates: Vec::new(),
            remote_errors: vec![RemoteRowError {
                row_index: 1,
                reason: "Domain blocked".to_string(),
            }],
        };

        let report = reconcile("Webinar", local, outcome, &inputs);

        let rows: Vec<usize> = report.errors.iter().map(|e| e.row_index).collect();
        assert_eq!(rows, vec![4, 1]);
        assert_eq!(report.errors[1].record, inputs[0]);
    }

    #[test]
    fn summary_wording() {
        assert_eq!(summary_message(3, 0), "Successfully imported 3 lead(s)");
        assert_eq!(summary_message(0, 4), "No leads were imported");
        assert_eq!(summary_message(0, 0), "No leads were imported");
    }
}
