//! Bulk lead import endpoints.
//!
//! Every handler requires an [`ImportOperator`] bearer token. JSON and CSV
//! uploads go through the same [`LeadImporter`]; the preview endpoint only
//! validates.

use rocket::serde::json::{self, Json};
use rocket::{State, get, post};
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::openapi;

use crate::auth::ImportOperator;
use crate::error::ApiError;
use crate::import::events::recent_imports;
use crate::import::{
    ColumnOverrides, ImportError, ImportHistoryEntry, ImportPreview, ImportReport, ImportRequest,
    LeadImporter, parse_leads_csv_with,
};
use crate::models::DataResponse;
use crate::request_logger::RequestId;

const DEFAULT_HISTORY_LIMIT: i64 = 20;

/// Unwrap a JSON body, reporting decode failures in the API error shape.
fn decoded<T>(body: Result<Json<T>, json::Error<'_>>) -> Result<T, ApiError> {
    body.map(Json::into_inner)
        .map_err(|err| ApiError::InvalidBody(err.to_string()))
}

/// Import a batch of leads supplied as JSON.
///
/// Rows that fail validation are reported individually; the request only
/// fails when every row is rejected or the normalization backend cannot
/// complete the batch.
#[openapi(tag = "Leads")]
#[post("/leads/import", format = "json", data = "<request>")]
pub async fn import_leads(
    operator: ImportOperator,
    request_id: RequestId,
    importer: &State<LeadImporter>,
    request: Result<Json<ImportRequest>, json::Error<'_>>,
) -> Result<Json<ImportReport>, ApiError> {
    let request = decoded(request)?;
    log::debug!(
        "[{}] json import of {} lead(s) by {}",
        request_id.0,
        request.leads.len(),
        operator.0.id
    );

    let report = importer.import_leads(request, &operator.0.actor()).await?;
    Ok(Json(report))
}

/// Import leads from a CSV upload.
///
/// Columns are matched by header name (for example `Email`, `First Name`,
/// `Surname`, `Company`). `source` labels the list the rows came from. The
/// `*_col` parameters name the header to use for a field when the file's
/// headers are not recognised automatically.
#[openapi(tag = "Leads")]
#[post(
    "/leads/import/csv?<source>&<email_col>&<first_name_col>&<last_name_col>&<phone_col>&<company_col>&<title_col>",
    data = "<body>"
)]
#[allow(clippy::too_many_arguments)]
pub async fn import_leads_csv(
    operator: ImportOperator,
    request_id: RequestId,
    importer: &State<LeadImporter>,
    source: Option<String>,
    email_col: Option<String>,
    first_name_col: Option<String>,
    last_name_col: Option<String>,
    phone_col: Option<String>,
    company_col: Option<String>,
    title_col: Option<String>,
    body: String,
) -> Result<Json<ImportReport>, ApiError> {
    let source_name = source.unwrap_or_default();
    if source_name.trim().is_empty() {
        return Err(ImportError::MissingSource.into());
    }

    let overrides = ColumnOverrides {
        email: email_col,
        first_name: first_name_col,
        last_name: last_name_col,
        phone: phone_col,
        company: company_col,
        title: title_col,
    };
    if !overrides.is_empty() {
        log::debug!("[{}] csv column overrides: {:?}", request_id.0, overrides);
    }

    let leads = parse_leads_csv_with(&body, &overrides)?;
    log::debug!(
        "[{}] csv import of {} lead(s) by {}",
        request_id.0,
        leads.len(),
        operator.0.id
    );

    let report = importer
        .import_leads(ImportRequest { source_name, leads }, &operator.0.actor())
        .await?;
    Ok(Json(report))
}

/// Validate a batch without importing it.
#[openapi(tag = "Leads")]
#[post("/leads/import/preview", format = "json", data = "<request>")]
pub async fn preview_import(
    _operator: ImportOperator,
    importer: &State<LeadImporter>,
    request: Result<Json<ImportRequest>, json::Error<'_>>,
) -> Result<Json<ImportPreview>, ApiError> {
    let request = decoded(request)?;
    Ok(Json(importer.preview(&request.leads)?))
}

/// Recent bulk imports, newest first. `q` filters by description or source
/// name.
#[openapi(tag = "Leads")]
#[get("/leads/imports?<q>&<limit>")]
pub async fn import_history(
    _operator: ImportOperator,
    pool: &State<PgPool>,
    q: Option<String>,
    limit: Option<i64>,
) -> Result<Json<DataResponse<Vec<ImportHistoryEntry>>>, ApiError> {
    let entries = recent_imports(
        pool.inner(),
        q.as_deref(),
        limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
    )
    .await?;

    Ok(Json(DataResponse { data: entries }))
}
