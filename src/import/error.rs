use std::fmt;

use thiserror::Error;

use super::types::ImportReport;

/// Classification of a terminal dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchErrorKind {
    /// An attempt (or the whole call) ran past its deadline.
    Timeout,
    /// The backend answered 5xx.
    ServerError,
    /// The backend answered 4xx; the batch was rejected as a whole.
    ClientError,
    /// The backend answered 2xx with a body that breaks the response contract.
    InvalidResponse,
    /// The connection failed or was reset before a response arrived.
    Network,
    /// The caller or the service cancelled the import.
    Cancelled,
}

impl DispatchErrorKind {
    /// Transient failures are retried by the dispatcher; everything else is
    /// terminal on first sight.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            DispatchErrorKind::Timeout | DispatchErrorKind::ServerError | DispatchErrorKind::Network
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DispatchErrorKind::Timeout => "timeout",
            DispatchErrorKind::ServerError => "server_error",
            DispatchErrorKind::ClientError => "client_error",
            DispatchErrorKind::InvalidResponse => "invalid_response",
            DispatchErrorKind::Network => "network",
            DispatchErrorKind::Cancelled => "cancelled",
        }
    }

    /// Short operator-facing explanation.
    pub fn user_message(self) -> &'static str {
        match self {
            DispatchErrorKind::Timeout => {
                "The import timed out. It may still be processing; check the lead list before retrying."
            }
            DispatchErrorKind::ServerError => {
                "The lead processing service is temporarily unavailable. Please try again later."
            }
            DispatchErrorKind::ClientError => {
                "The lead processing service rejected this import."
            }
            DispatchErrorKind::InvalidResponse => {
                "The lead processing service returned an unexpected response. Please contact support."
            }
            DispatchErrorKind::Network => {
                "The lead processing service could not be reached. Please try again later."
            }
            DispatchErrorKind::Cancelled => "The import was cancelled before it completed.",
        }
    }
}

impl fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a dispatch call after all permitted attempts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("dispatch failed ({kind}) after {attempts} attempt(s): {detail}")]
pub struct DispatchError {
    pub kind: DispatchErrorKind,
    pub attempts: u32,
    /// Raw technical description for operator diagnostics.
    pub detail: String,
}

impl DispatchError {
    pub fn new(kind: DispatchErrorKind, attempts: u32, detail: impl Into<String>) -> Self {
        Self {
            kind,
            attempts,
            detail: detail.into(),
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

/// Request-level failures of the import pipeline. Per-row problems never
/// surface here unless they empty the whole batch.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("source name is required")]
    MissingSource,
    #[error("no leads supplied")]
    EmptyBatch,
    #[error("batch of {size} leads exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },
    #[error("all {} lead(s) failed validation", .report.errors.len())]
    ValidationFailed { report: Box<ImportReport> },
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ImportError {
    pub fn user_message(&self) -> String {
        match self {
            ImportError::MissingSource => "Source name is required".to_string(),
            ImportError::EmptyBatch => "Leads array is required and must not be empty".to_string(),
            ImportError::BatchTooLarge { max, .. } => {
                format!("Maximum {max} leads per import; split the file and try again")
            }
            ImportError::ValidationFailed { .. } => {
                "No leads were imported: every row failed validation".to_string()
            }
            ImportError::Dispatch(err) => err.user_message().to_string(),
        }
    }
}
