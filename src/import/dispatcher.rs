//! Resilient delivery of a sanitized batch to the normalization backend.
//!
//! One call walks an explicit state machine:
//!
//! ```text
//! Pending -> Sending -> Succeeded
//!                    -> Retrying -> Sending ...
//!                    -> Failed
//! ```
//!
//! `Retrying` is only entered for transient failures (timeouts, connection
//! failures, 5xx) while attempts remain. Every attempt is bounded by the
//! per-request timeout, and the whole call by an overall deadline and the
//! caller's [`CancellationToken`]. When either fires, the in-flight future is
//! dropped, which aborts the HTTP request, and no further retry is scheduled.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_util::sync::CancellationToken;

use super::client::{BatchTransport, OutboundBatch, TransportError, TransportResponse};
use super::config::RetryPolicy;
use super::error::{DispatchError, DispatchErrorKind};
use super::types::{DispatchOutcome, DuplicateRecord, ImportBatch, RemoteRowError};

#[derive(Debug, Deserialize)]
struct NormalizerResponse {
    success: u64,
    #[serde(default)]
    errors: Vec<NormalizerRowError>,
    #[serde(default)]
    duplicates: Vec<DuplicateRecord>,
}

#[derive(Debug, Deserialize)]
struct NormalizerRowError {
    /// 1-based position within the dispatched batch.
    row: u64,
    error: String,
}

/// Failure of a single attempt, before retry policy is applied.
#[derive(Debug)]
struct AttemptFailure {
    kind: DispatchErrorKind,
    detail: String,
}

impl AttemptFailure {
    fn new(kind: DispatchErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

#[derive(Debug)]
enum DispatchState {
    Pending,
    Sending { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Succeeded(DispatchOutcome),
    Failed(DispatchError),
}

/// Sends batches through a [`BatchTransport`] under a [`RetryPolicy`].
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn BatchTransport>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn BatchTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver `batch` and decode the backend's per-record outcome.
    ///
    /// The batch is consumed: it is serialized once and the same bytes are
    /// re-sent on every retry.
    pub async fn dispatch(
        &self,
        batch: ImportBatch,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        let outbound = OutboundBatch::from_batch(&batch).map_err(|err| {
            DispatchError::new(
                DispatchErrorKind::InvalidResponse,
                0,
                format!("failed to encode batch: {err}"),
            )
        })?;

        let max_attempts = self.policy.max_attempts.max(1);
        let overall = self.policy.overall_timeout();
        let deadline = Instant::now() + overall;
        let mut state = DispatchState::Pending;

        loop {
            state = match state {
                DispatchState::Pending => {
                    log::debug!(
                        "dispatch '{}': sending {} record(s), key {}",
                        batch.source_name,
                        outbound.record_count,
                        outbound.idempotency_key
                    );
                    DispatchState::Sending { attempt: 1 }
                }
                DispatchState::Sending { attempt } => {
                    log::debug!(
                        "dispatch '{}': attempt {} of {}",
                        batch.source_name,
                        attempt,
                        max_attempts
                    );

                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(AttemptFailure::new(
                            DispatchErrorKind::Cancelled,
                            "dispatch cancelled by caller",
                        )),
                        _ = sleep_until(deadline) => Err(AttemptFailure::new(
                            DispatchErrorKind::Timeout,
                            format!("overall dispatch deadline of {overall:?} exceeded"),
                        )),
                        result = self.attempt(&outbound, &batch) => result,
                    };

                    match result {
                        Ok(outcome) => DispatchState::Succeeded(outcome),
                        Err(failure) if is_terminal_signal(&failure, cancel, deadline) => {
                            DispatchState::Failed(DispatchError::new(
                                failure.kind,
                                attempt,
                                failure.detail,
                            ))
                        }
                        Err(failure) if failure.kind.is_retryable() && attempt < max_attempts => {
                            log::warn!(
                                "dispatch '{}': attempt {} failed ({}): {}",
                                batch.source_name,
                                attempt,
                                failure.kind,
                                failure.detail
                            );
                            DispatchState::Retrying {
                                attempt,
                                delay: self.policy.delay_for(attempt),
                            }
                        }
                        Err(failure) => DispatchState::Failed(DispatchError::new(
                            failure.kind,
                            attempt,
                            failure.detail,
                        )),
                    }
                }
                DispatchState::Retrying { attempt, delay } => {
                    log::debug!(
                        "dispatch '{}': retrying after {:?} backoff (attempt {} of {})",
                        batch.source_name,
                        delay,
                        attempt + 1,
                        max_attempts
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => DispatchState::Failed(DispatchError::new(
                            DispatchErrorKind::Cancelled,
                            attempt,
                            "dispatch cancelled during backoff",
                        )),
                        _ = sleep_until(deadline) => DispatchState::Failed(DispatchError::new(
                            DispatchErrorKind::Timeout,
                            attempt,
                            format!("overall dispatch deadline of {overall:?} exceeded during backoff"),
                        )),
                        _ = sleep(delay) => DispatchState::Sending { attempt: attempt + 1 },
                    }
                }
                DispatchState::Succeeded(outcome) => {
                    log::info!(
                        "dispatch '{}': backend accepted {} of {} record(s)",
                        batch.source_name,
                        outcome.success_count,
                        outbound.record_count
                    );
                    return Ok(outcome);
                }
                DispatchState::Failed(err) => {
                    log::error!("dispatch '{}': {}", batch.source_name, err);
                    return Err(err);
                }
            };
        }
    }

    async fn attempt(
        &self,
        outbound: &OutboundBatch,
        batch: &ImportBatch,
    ) -> Result<DispatchOutcome, AttemptFailure> {
        let response = match timeout(self.policy.request_timeout, self.transport.send(outbound)).await {
            Ok(Ok(response)) => response,
            Ok(Err(TransportError::Timeout)) | Err(_) => {
                return Err(AttemptFailure::new(
                    DispatchErrorKind::Timeout,
                    format!("request timed out after {:?}", self.policy.request_timeout),
                ));
            }
            Ok(Err(err)) => {
                return Err(AttemptFailure::new(DispatchErrorKind::Network, err.to_string()));
            }
        };

        classify_response(response, batch)
    }
}

/// Cancellation and the overall deadline end the call regardless of how
/// retryable the interrupted attempt looked.
fn is_terminal_signal(failure: &AttemptFailure, cancel: &CancellationToken, deadline: Instant) -> bool {
    match failure.kind {
        DispatchErrorKind::Cancelled => true,
        DispatchErrorKind::Timeout => cancel.is_cancelled() || Instant::now() >= deadline,
        _ => false,
    }
}

fn classify_response(
    response: TransportResponse,
    batch: &ImportBatch,
) -> Result<DispatchOutcome, AttemptFailure> {
    let status = response.status;
    if status.is_server_error() {
        return Err(AttemptFailure::new(
            DispatchErrorKind::ServerError,
            format!("backend returned {status}: {}", body_excerpt(&response.body)),
        ));
    }
    if !status.is_success() {
        return Err(AttemptFailure::new(
            DispatchErrorKind::ClientError,
            format!("backend returned {status}: {}", body_excerpt(&response.body)),
        ));
    }

    let parsed: NormalizerResponse = serde_json::from_slice(&response.body).map_err(|err| {
        AttemptFailure::new(
            DispatchErrorKind::InvalidResponse,
            format!("malformed backend response: {err}"),
        )
    })?;

    into_outcome(parsed, batch)
}

fn into_outcome(
    parsed: NormalizerResponse,
    batch: &ImportBatch,
) -> Result<DispatchOutcome, AttemptFailure> {
    let success_count = usize::try_from(parsed.success).unwrap_or(usize::MAX);
    let reported = success_count
        .saturating_add(parsed.errors.len())
        .saturating_add(parsed.duplicates.len());
    if reported > batch.len() {
        return Err(AttemptFailure::new(
            DispatchErrorKind::InvalidResponse,
            format!(
                "backend reported {reported} outcomes for a batch of {} records",
                batch.len()
            ),
        ));
    }

    let mut remote_errors = Vec::with_capacity(parsed.errors.len());
    for row_error in parsed.errors {
        let entry = usize::try_from(row_error.row)
            .ok()
            .and_then(|row| row.checked_sub(1))
            .and_then(|position| batch.entries.get(position))
            .ok_or_else(|| {
                AttemptFailure::new(
                    DispatchErrorKind::InvalidResponse,
                    format!(
                        "backend reported row {} outside a batch of {} records",
                        row_error.row,
                        batch.len()
                    ),
                )
            })?;
        remote_errors.push(RemoteRowError {
            row_index: entry.row_index,
            reason: row_error.error,
        });
    }

    Ok(DispatchOutcome {
        success_count,
        duplicates: parsed.duplicates,
        remote_errors,
    })
}

fn body_excerpt(body: &[u8]) -> String {
    const MAX_EXCERPT: usize = 512;
    let text = String::from_utf8_lossy(body);
    text.chars().take(MAX_EXCERPT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::types::{BatchEntry, SanitizedLeadRecord};
    use crate::test_support::{ScriptedReply, ScriptedTransport};
    use reqwest::StatusCode;
    use std::time::Instant as StdInstant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(40),
            max_delay: Duration::from_millis(400),
            request_timeout: Duration::from_secs(2),
            overall_timeout: None,
        }
    }

    fn batch_with_rows(rows: &[usize]) -> ImportBatch {
        ImportBatch {
            source_name: "webinar".to_string(),
            entries: rows
                .iter()
                .map(|row| BatchEntry {
                    row_index: *row,
                    record: SanitizedLeadRecord {
                        email: format!("lead{row}@example.com"),
                        first_name: "Lead".to_string(),
                        last_name: format!("{row}"),
                        phone: None,
                        company: None,
                        title: None,
                    },
                })
                .collect(),
        }
    }

    fn dispatcher(transport: &Arc<ScriptedTransport>, policy: RetryPolicy) -> Dispatcher {
        Dispatcher::new(transport.clone(), policy)
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_after_two_server_errors() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedReply::status(StatusCode::INTERNAL_SERVER_ERROR),
            ScriptedReply::status(StatusCode::BAD_GATEWAY),
            ScriptedReply::json(StatusCode::OK, r#"{"success": 2}"#),
        ]));
        let policy = fast_policy();
        let initial = policy.initial_delay;

        let started = StdInstant::now();
        let outcome = dispatcher(&transport, policy)
            .dispatch(batch_with_rows(&[1, 2]), &CancellationToken::new())
            .await
            .expect("third attempt succeeds");

        assert_eq!(outcome.success_count, 2);
        assert!(outcome.duplicates.is_empty());
        assert!(outcome.remote_errors.is_empty());
        assert_eq!(transport.attempts(), 3);
        assert!(started.elapsed() >= initial + initial * 2);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedReply::json(StatusCode::NOT_FOUND, r#"{"message":"no webhook"}"#),
            ScriptedReply::json(StatusCode::OK, r#"{"success": 1}"#),
        ]));

        let err = dispatcher(&transport, fast_policy())
            .dispatch(batch_with_rows(&[1]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, DispatchErrorKind::ClientError);
        assert_eq!(err.attempts, 1);
        assert!(err.detail.contains("404"));
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn exhausted_server_errors_fail_after_max_attempts() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedReply::status(StatusCode::SERVICE_UNAVAILABLE),
            ScriptedReply::status(StatusCode::SERVICE_UNAVAILABLE),
            ScriptedReply::status(StatusCode::SERVICE_UNAVAILABLE),
            ScriptedReply::json(StatusCode::OK, r#"{"success": 1}"#),
        ]));

        let err = dispatcher(&transport, fast_policy())
            .dispatch(batch_with_rows(&[1]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, DispatchErrorKind::ServerError);
        assert_eq!(err.attempts, 3);
        assert_eq!(transport.attempts(), 3);
    }

    #[tokio::test]
    async fn slow_attempt_times_out_and_is_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedReply::json(StatusCode::OK, r#"{"success": 1}"#)
                .delayed(Duration::from_millis(500)),
            ScriptedReply::json(StatusCode::OK, r#"{"success": 1}"#),
        ]));
        let policy = RetryPolicy {
            request_timeout: Duration::from_millis(100),
            ..fast_policy()
        };

        let outcome = dispatcher(&transport, policy)
            .dispatch(batch_with_rows(&[1]), &CancellationToken::new())
            .await
            .expect("second attempt succeeds");

        assert_eq!(outcome.success_count, 1);
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test]
    async fn network_failures_are_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedReply::network("connection reset by peer"),
            ScriptedReply::json(StatusCode::OK, r#"{"success": 1}"#),
        ]));

        let outcome = dispatcher(&transport, fast_policy())
            .dispatch(batch_with_rows(&[1]), &CancellationToken::new())
            .await
            .expect("retry succeeds");
        assert_eq!(outcome.success_count, 1);
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test]
    async fn response_without_success_count_is_invalid() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedReply::json(StatusCode::OK, r#"{"ok": true}"#),
            ScriptedReply::json(StatusCode::OK, r#"{"success": 1}"#),
        ]));

        let err = dispatcher(&transport, fast_policy())
            .dispatch(batch_with_rows(&[1]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, DispatchErrorKind::InvalidResponse);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn fractional_success_count_is_invalid() {
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedReply::json(
            StatusCode::OK,
            r#"{"success": 1.5}"#,
        )]));

        let err = dispatcher(&transport, fast_policy())
            .dispatch(batch_with_rows(&[1, 2]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, DispatchErrorKind::InvalidResponse);
    }

    #[tokio::test]
    async fn remote_rows_map_back_to_input_rows() {
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedReply::json(
            StatusCode::OK,
            r#"{
                "success": 1,
                "errors": [{"row": 2, "lead": {"email": "lead5@example.com"}, "error": "Bad domain"}],
                "duplicates": [{"email": "lead7@example.com", "existingRecordId": "rec123"}]
            }"#,
        )]));

        let outcome = dispatcher(&transport, fast_policy())
            .dispatch(batch_with_rows(&[2, 5, 7]), &CancellationToken::new())
            .await
            .expect("dispatch");

        assert_eq!(
            outcome.remote_errors,
            vec![RemoteRowError {
                row_index: 5,
                reason: "Bad domain".to_string()
            }]
        );
        assert_eq!(outcome.duplicates[0].existing_id.as_deref(), Some("rec123"));
    }

    #[tokio::test]
    async fn out_of_range_remote_row_is_invalid() {
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedReply::json(
            StatusCode::OK,
            r#"{"success": 0, "errors": [{"row": 9, "error": "?"}]}"#,
        )]));

        let err = dispatcher(&transport, fast_policy())
            .dispatch(batch_with_rows(&[1, 2]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, DispatchErrorKind::InvalidResponse);
    }

    #[tokio::test]
    async fn overcounted_response_is_invalid() {
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedReply::json(
            StatusCode::OK,
            r#"{"success": 3}"#,
        )]));

        let err = dispatcher(&transport, fast_policy())
            .dispatch(batch_with_rows(&[1, 2]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, DispatchErrorKind::InvalidResponse);
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_attempt_without_retry() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedReply::json(StatusCode::OK, r#"{"success": 1}"#)
                .delayed(Duration::from_secs(5)),
            ScriptedReply::json(StatusCode::OK, r#"{"success": 1}"#),
        ]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = StdInstant::now();
        let err = dispatcher(&transport, fast_policy())
            .dispatch(batch_with_rows(&[1]), &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.kind, DispatchErrorKind::Cancelled);
        assert_eq!(transport.attempts(), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn overall_deadline_stops_retrying() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedReply::status(StatusCode::INTERNAL_SERVER_ERROR),
            ScriptedReply::status(StatusCode::INTERNAL_SERVER_ERROR),
            ScriptedReply::json(StatusCode::OK, r#"{"success": 1}"#),
        ]));
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(300),
            overall_timeout: Some(Duration::from_millis(100)),
            ..fast_policy()
        };

        let err = dispatcher(&transport, policy)
            .dispatch(batch_with_rows(&[1]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, DispatchErrorKind::Timeout);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn every_attempt_sends_the_same_idempotency_key() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedReply::status(StatusCode::INTERNAL_SERVER_ERROR),
            ScriptedReply::json(StatusCode::OK, r#"{"success": 1}"#),
        ]));

        dispatcher(&transport, fast_policy())
            .dispatch(batch_with_rows(&[1]), &CancellationToken::new())
            .await
            .expect("dispatch");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].idempotency_key, requests[1].idempotency_key);
        assert_eq!(requests[0].body, requests[1].body);
    }
}
