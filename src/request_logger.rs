use rocket::fairing::{Fairing, Info, Kind};
use rocket::request::{FromRequest, Outcome};
use rocket::{Data, Request, Response};
use rocket_okapi::request::OpenApiFromRequest;
use std::convert::Infallible;
use std::time::Instant;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

struct RequestStart(Instant);

/// Correlation id of the current request: the caller's `X-Request-Id` when it
/// looks sane, otherwise a fresh UUID.
#[derive(Debug, Clone, PartialEq, Eq, OpenApiFromRequest)]
pub struct RequestId(pub String);

impl RequestId {
    fn from_header(value: Option<&str>) -> Self {
        value
            .map(str::trim)
            .filter(|value| {
                !value.is_empty()
                    && value.len() <= 128
                    && value
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            })
            .map(|value| RequestId(value.to_string()))
            .unwrap_or_else(|| RequestId(Uuid::new_v4().to_string()))
    }

    fn of(request: &Request<'_>) -> RequestId {
        request
            .local_cache(|| RequestId::from_header(request.headers().get_one(REQUEST_ID_HEADER)))
            .clone()
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestId {
    type Error = Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(RequestId::of(request))
    }
}

/// Fairing to log one line per HTTP request with timing and correlation id
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(|| RequestStart(Instant::now()));
        RequestId::of(request);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let start = request.local_cache(|| RequestStart(Instant::now()));
        let duration = start.0.elapsed();
        let request_id = RequestId::of(request);

        response.set_raw_header(REQUEST_ID_HEADER, request_id.0.clone());

        log::info!(
            "{} {} -> {} ({:.2}ms) [{}]",
            request.method(),
            request.uri(),
            response.status().code,
            duration.as_secs_f64() * 1000.0,
            request_id.0
        );
    }
}
