use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::response::OpenApiResponderInner;
use serde::Serialize;
use std::io::Cursor;

use crate::import::{CsvImportError, DispatchErrorKind, EventError, ImportError, ImportReport};

#[derive(Debug)]
pub enum ApiError {
    DatabaseError(sqlx::Error),
    BadRequest(String),
    /// Every submitted row failed local validation.
    ImportRejected {
        message: String,
        report: Box<ImportReport>,
    },
    /// The normalization backend could not complete the import.
    Upstream {
        status: Status,
        message: String,
        detail: String,
    },
    /// The body could not be decoded into the endpoint's request type.
    InvalidBody(String),
    /// Rocket refused the request before a handler ran (routing, guards,
    /// limits).
    Rejected { status: Status, message: String },
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<Box<ImportReport>>,
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let (status, error_type, message, detail, report) = match self {
            ApiError::DatabaseError(e) => {
                log::error!("database error: {}", e);
                (
                    Status::InternalServerError,
                    String::from("DatabaseError"),
                    "A database error occurred".to_string(),
                    Some(e.to_string()),
                    None,
                )
            }
            ApiError::BadRequest(msg) => {
                log::debug!("bad request: {}", msg);
                (Status::BadRequest, String::from("BadRequest"), msg, None, None)
            }
            ApiError::ImportRejected { message, report } => {
                log::debug!("import rejected: {} row(s) invalid", report.errors.len());
                (
                    Status::BadRequest,
                    String::from("ValidationFailed"),
                    message,
                    None,
                    Some(report),
                )
            }
            ApiError::Upstream {
                status,
                message,
                detail,
            } => {
                log::error!("upstream failure: {}", detail);
                (status, String::from("UpstreamError"), message, Some(detail), None)
            }
            ApiError::InvalidBody(detail) => {
                log::debug!("undecodable body: {}", detail);
                (
                    Status::BadRequest,
                    String::from("InvalidBody"),
                    "The request body is not valid JSON for this endpoint".to_string(),
                    Some(detail),
                    None,
                )
            }
            ApiError::Rejected { status, message } => {
                log::debug!("request rejected with {}: {}", status, message);
                (status, status_error_type(status), message, None, None)
            }
            ApiError::InternalError(msg) => {
                log::error!("internal error: {}", msg);
                (Status::InternalServerError, String::from("InternalError"), msg, None, None)
            }
        };

        respond_json(
            status,
            ErrorResponse {
                error: error_type,
                message,
                detail,
                report,
            },
        )
    }
}

fn respond_json(status: Status, body: ErrorResponse) -> response::Result<'static> {
    let json = serde_json::to_string(&body)
        .unwrap_or_else(|_| r#"{"error":"SerializationError","message":"Failed to serialize error"}"#.to_string());

    Response::build()
        .status(status)
        .header(rocket::http::ContentType::JSON)
        .sized_body(json.len(), Cursor::new(json))
        .ok()
}

/// `Unprocessable Entity` becomes `UnprocessableEntity`.
fn status_error_type(status: Status) -> String {
    status
        .reason()
        .unwrap_or("Error")
        .split_whitespace()
        .collect()
}

impl OpenApiResponderInner for ApiError {
    fn responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        for (code, description) in [
            ("400", "The request or every row in it was rejected."),
            ("401", "Missing or invalid bearer token."),
            ("403", "The caller's role may not import leads."),
            ("500", "Unexpected server error."),
            ("502", "The normalization backend rejected the batch."),
            ("503", "The normalization backend is unavailable or timed out."),
        ] {
            responses.responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<EventError> for ApiError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Database(err) => ApiError::DatabaseError(err),
            EventError::Encode(err) => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<CsvImportError> for ApiError {
    fn from(err: CsvImportError) -> Self {
        ApiError::BadRequest(format!("Could not read CSV upload: {err}"))
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        let message = err.user_message();
        match err {
            ImportError::MissingSource
            | ImportError::EmptyBatch
            | ImportError::BatchTooLarge { .. } => ApiError::BadRequest(message),
            ImportError::ValidationFailed { report } => ApiError::ImportRejected { message, report },
            ImportError::Dispatch(err) => {
                let status = match err.kind {
                    DispatchErrorKind::ClientError => Status::BadGateway,
                    DispatchErrorKind::Timeout
                    | DispatchErrorKind::ServerError
                    | DispatchErrorKind::InvalidResponse
                    | DispatchErrorKind::Network
                    | DispatchErrorKind::Cancelled => Status::ServiceUnavailable,
                };
                ApiError::Upstream {
                    status,
                    message,
                    detail: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::DispatchError;

    #[test]
    fn dispatch_failures_map_to_gateway_statuses() {
        let err = ApiError::from(ImportError::Dispatch(DispatchError::new(
            DispatchErrorKind::ClientError,
            1,
            "backend returned 404 Not Found",
        )));
        assert!(matches!(err, ApiError::Upstream { status, .. } if status == Status::BadGateway));

        let err = ApiError::from(ImportError::Dispatch(DispatchError::new(
            DispatchErrorKind::Timeout,
            3,
            "request timed out",
        )));
        let ApiError::Upstream { status, message, detail } = err else {
            panic!("expected upstream error");
        };
        assert_eq!(status, Status::ServiceUnavailable);
        assert!(message.contains("may still be processing"));
        assert!(detail.contains("after 3 attempt(s)"));
    }

    #[test]
    fn request_shape_errors_are_bad_requests() {
        let err = ApiError::from(ImportError::BatchTooLarge { size: 501, max: 500 });
        assert!(matches!(err, ApiError::BadRequest(msg) if msg.contains("500")));
    }

    #[test]
    fn rejected_statuses_name_their_reason() {
        assert_eq!(status_error_type(Status::UnprocessableEntity), "UnprocessableEntity");
        assert_eq!(status_error_type(Status::PayloadTooLarge), "PayloadTooLarge");
        assert_eq!(status_error_type(Status::Unauthorized), "Unauthorized");
        assert_eq!(status_error_type(Status::new(599)), "Error");
    }

    #[test]
    fn csv_errors_keep_the_column_name() {
        let err = ApiError::from(CsvImportError::UnknownColumn("Mail".to_string()));
        assert!(matches!(err, ApiError::BadRequest(msg) if msg.contains("'Mail'")));
    }
}
