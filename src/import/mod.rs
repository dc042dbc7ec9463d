//! Bulk lead import pipeline.
//!
//! A request flows through [`preprocess`] (validation and sanitization),
//! the [`Dispatcher`] (delivery to the normalization backend with bounded
//! retries) and [`reconcile`], and ends with one audit event handed to an
//! [`EventRecorder`]. [`LeadImporter`] ties the stages together.

pub mod client;
pub mod config;
pub mod csv_mapping;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod preprocess;
pub mod reconcile;
pub mod sanitize;
pub mod types;
pub mod validation;

pub use client::{BatchTransport, HttpBatchTransport, OutboundBatch, TransportError, TransportResponse};
pub use config::{ImportConfig, RetryPolicy};
pub use csv_mapping::{
    ColumnOverrides, CsvImportError, error_report_csv, parse_leads_csv, parse_leads_csv_with,
};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, DispatchErrorKind, ImportError};
pub use events::{
    CLI_EVENT_SOURCE, EventError, EventRecorder, ImportEvent, ImportHistoryEntry, LogEventRecorder,
    PgEventRecorder, UI_EVENT_SOURCE,
};
pub use pipeline::LeadImporter;
pub use preprocess::preprocess;
pub use reconcile::reconcile;
pub use types::{
    Actor, ImportPreview, ImportReport, ImportRequest, RawLeadRecord, RowFailure,
};
