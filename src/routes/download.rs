//! `GET /api/download?key=<base64 id>`
//!
//! Single stored object, framed with its declared size.

use http_body_util::BodyExt;
use hyper::Response;

use super::{error_response, query_param, BoxBody};
use crate::server::AppState;

pub async fn handle_download(state: &AppState, query: Option<&str>) -> Response<BoxBody> {
    let key = query_param(query, "key");

    match state.proxy().download(key.as_deref()).await {
        Ok(response) => response.map(|body| body.boxed_unsync()),
        Err(e) => error_response(e),
    }
}
