//! HTTP routes for Courier

pub mod bundle;
pub mod download;
pub mod health;
pub mod team;

pub use bundle::{handle_bundle, parse_file_details};
pub use download::handle_download;
pub use health::{health_check, HealthResponse};
pub use team::{handle_team_download, strip_team_prefix};

use bytes::Bytes;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Full};
use hyper::header;
use hyper::http::response::Builder;
use hyper::{Response, StatusCode};
use tracing::{error, warn};

use crate::types::CourierError;

/// Response body for every route. Unsync because blob streams are only `Send`.
pub type BoxBody = UnsyncBoxBody<Bytes, CourierError>;

/// Convert a Full<Bytes> body to BoxBody
pub fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed_unsync())
}

/// Finish `builder` with `body`, falling back to a bare 500 if a header was invalid
pub fn respond(builder: Builder, body: BoxBody) -> Response<BoxBody> {
    builder.body(body).unwrap_or_else(|e| {
        error!("Failed to build response: {}", e);
        let mut response = Response::new(empty());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

pub fn empty() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn full(bytes: impl Into<Bytes>) -> BoxBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Plain-text error response carrying the error's message
pub fn error_response(err: CourierError) -> Response<BoxBody> {
    let (status, message) = err.into_status_code_and_body();
    if status.is_server_error() {
        error!("{} {}", status.as_u16(), message);
    } else {
        warn!("{} {}", status.as_u16(), message);
    }
    text_response(status, message)
}

pub fn text_response(status: StatusCode, message: impl Into<String>) -> Response<BoxBody> {
    respond(
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8"),
        full(message.into()),
    )
}

/// All decoded `name=value` pairs of a query string, in order.
/// A query that does not parse yields no pairs.
pub fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    query
        .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
        .unwrap_or_default()
}

/// First value of `name` in the query string
pub fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query_pairs(query)
        .into_iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
}
