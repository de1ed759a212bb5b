//! `GET /api/downloadTeam?url=<object url>`
//!
//! Team uploads are addressed by their full bucket URL. The configured
//! prefix is stripped to get the storage key and the metadata store is not
//! consulted, so the size is unknown and the body goes out chunked.

use http_body_util::BodyExt;
use hyper::{Response, StatusCode};

use super::{error_response, query_param, text_response, BoxBody};
use crate::server::AppState;
use crate::types::CourierError;

const FETCH_FAILED: &str = "Error fetching the S3 object";

/// Storage key for an object URL. URLs without the prefix are used as-is.
pub fn strip_team_prefix<'a>(url: &'a str, prefix: &str) -> &'a str {
    url.strip_prefix(prefix).unwrap_or(url)
}

pub async fn handle_team_download(state: &AppState, query: Option<&str>) -> Response<BoxBody> {
    let Some(url) = query_param(query, "url").filter(|u| !u.trim().is_empty()) else {
        return error_response(CourierError::BadRequest("Invalid fileId".to_string()));
    };
    let key = strip_team_prefix(url.trim(), &state.args.team_url_prefix);

    match state.proxy().download_key(key).await {
        Ok(response) => response.map(|body| body.boxed_unsync()),
        Err(CourierError::Fetch(reason)) => {
            tracing::error!(key = %key, "Error fetching S3 object: {}", reason);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, FETCH_FAILED)
        }
        Err(e) => error_response(e),
    }
}
