//! `LeadImporter` drives one import request end to end:
//! preprocess, dispatch, reconcile, record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::client::{HttpBatchTransport, TransportError, idempotency_key};
use super::config::ImportConfig;
use super::dispatcher::Dispatcher;
use super::error::ImportError;
use super::events::{EventRecorder, ImportEvent, ImportStats};
use super::preprocess::{preprocess, preview};
use super::reconcile::reconcile;
use super::sanitize::sanitize_plain_text;
use super::types::{Actor, DispatchOutcome, ImportPreview, ImportReport, ImportRequest, RawLeadRecord};
use super::validation::MAX_FIELD_LENGTH;

/// Longest an import waits on the event sink before moving on.
pub const DEFAULT_RECORD_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable, shareable import service. One instance lives in Rocket state
/// (or in the CLI) and serves any number of concurrent requests.
pub struct LeadImporter {
    max_batch_size: usize,
    dispatcher: Dispatcher,
    recorder: Arc<dyn EventRecorder>,
    event_source: &'static str,
    record_timeout: Duration,
    shutdown: CancellationToken,
}

impl LeadImporter {
    pub fn new(
        max_batch_size: usize,
        dispatcher: Dispatcher,
        recorder: Arc<dyn EventRecorder>,
        event_source: &'static str,
    ) -> Self {
        Self {
            max_batch_size,
            dispatcher,
            recorder,
            event_source,
            record_timeout: DEFAULT_RECORD_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_record_timeout(mut self, record_timeout: Duration) -> Self {
        self.record_timeout = record_timeout;
        self
    }

    /// Production wiring: HTTP transport to the configured backend.
    pub fn from_config(
        config: &ImportConfig,
        recorder: Arc<dyn EventRecorder>,
        event_source: &'static str,
    ) -> Result<Self, TransportError> {
        let transport = HttpBatchTransport::new(config)?;
        log::info!(
            "lead import: backend {}, max batch {}, {} attempt(s)",
            transport.url(),
            config.max_batch_size,
            config.retry.max_attempts
        );
        let dispatcher = Dispatcher::new(Arc::new(transport), config.retry.clone());
        Ok(Self::new(config.max_batch_size, dispatcher, recorder, event_source))
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Cancel every in-flight and future dispatch.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Validate without dispatching or recording anything.
    pub fn preview(&self, records: &[RawLeadRecord]) -> Result<ImportPreview, ImportError> {
        preview(records, self.max_batch_size)
    }

    pub async fn import_leads(
        &self,
        request: ImportRequest,
        actor: &Actor,
    ) -> Result<ImportReport, ImportError> {
        let started = Instant::now();
        let source_tag = source_tag(&request.source_name)?;
        let leads = request.leads;

        log::info!(
            "import '{}': {} lead(s) submitted by {}",
            source_tag,
            leads.len(),
            actor.id
        );

        let prepared = preprocess(&source_tag, &leads, self.max_batch_size)?;
        let mut stats = ImportStats {
            source_name: source_tag.clone(),
            total_leads: leads.len(),
            valid_leads: prepared.batch.len(),
            ..ImportStats::default()
        };

        if prepared.is_fully_rejected() {
            let report = reconcile(
                &source_tag,
                prepared.rejections,
                DispatchOutcome::default(),
                &leads,
            );
            stats.error_count = report.errors.len();
            stats.duration = started.elapsed();
            self.record(ImportEvent::failed(
                &stats,
                "validation_failed",
                self.event_source,
                actor,
            ))
            .await;
            log::info!("import '{}': every row failed validation", source_tag);
            return Err(ImportError::ValidationFailed {
                report: Box::new(report),
            });
        }

        stats.idempotency_key = Some(idempotency_key(&prepared.batch));
        let cancel = self.shutdown.child_token();

        match self.dispatcher.dispatch(prepared.batch, &cancel).await {
            Ok(outcome) => {
                let report = reconcile(&source_tag, prepared.rejections, outcome, &leads);
                stats.success_count = report.success_count;
                stats.error_count = report.errors.len();
                stats.duplicate_count = report.duplicates.len();
                stats.duration = started.elapsed();
                self.record(ImportEvent::succeeded(&stats, self.event_source, actor))
                    .await;
                log::info!("import '{}': {}", source_tag, report.summary_message);
                Ok(report)
            }
            Err(err) => {
                stats.error_count = prepared.rejections.len();
                stats.duration = started.elapsed();
                self.record(ImportEvent::failed(
                    &stats,
                    err.kind.as_str(),
                    self.event_source,
                    actor,
                ))
                .await;
                Err(ImportError::Dispatch(err))
            }
        }
    }

    /// Hand the event to the sink. Failures and slow sinks are logged; the
    /// import result never depends on them.
    async fn record(&self, event: ImportEvent) {
        match tokio::time::timeout(self.record_timeout, self.recorder.record(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::warn!("failed to record {} event: {}", event.kind.as_str(), err);
            }
            Err(_) => {
                log::warn!(
                    "gave up recording {} event {} after {:?}",
                    event.kind.as_str(),
                    event.id,
                    self.record_timeout
                );
            }
        }
    }
}

fn source_tag(source_name: &str) -> Result<String, ImportError> {
    let tag = sanitize_plain_text(source_name, MAX_FIELD_LENGTH);
    if tag.is_empty() {
        return Err(ImportError::MissingSource);
    }
    Ok(tag)
}
