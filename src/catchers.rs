//! JSON bodies for requests Rocket rejects before a handler runs, so every
//! error the API returns has the same `{error, message}` shape.

use rocket::http::Status;
use rocket::{Catcher, Request, catch, catchers};

use crate::auth::guards::AuthFailure;
use crate::error::ApiError;

#[catch(default)]
fn json_error(status: Status, request: &Request<'_>) -> ApiError {
    let message = match &request.local_cache(|| AuthFailure(None)).0 {
        Some(reason) => reason.clone(),
        None => default_message(status).to_string(),
    };
    ApiError::Rejected { status, message }
}

fn default_message(status: Status) -> &'static str {
    match status.code {
        400 => "The request could not be understood",
        401 => "A valid operator bearer token is required",
        403 => "Your role does not permit this action",
        404 => "No such endpoint",
        413 => "The upload exceeds the size limit",
        415 => "Unsupported content type",
        422 => "The request body does not match the expected shape",
        code if code >= 500 => "Unexpected server error",
        _ => "The request was rejected",
    }
}

pub fn catchers() -> Vec<Catcher> {
    catchers![json_error]
}
