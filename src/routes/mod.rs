//! HTTP route handlers grouped by resource domain.
//!
//! Handlers are annotated with `#[openapi]` so `rocket_okapi` can derive
//! the OpenAPI document served under `/api/docs`.

pub mod health;
pub mod leads;
