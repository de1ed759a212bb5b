//! `GET /api/download-multiple?fileDetails=...`
//!
//! Headers go out at once; the archive is written by a spawned task into a
//! bounded channel that backs the response body. When the client goes away
//! the channel closes and the task is dropped, cancelling every member.

use bytes::Bytes;
use futures::{stream, StreamExt};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::{Response, StatusCode};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{query_pairs, respond, BoxBody};
use crate::archive::ArchiveError;
use crate::proxy::headers;
use crate::server::AppState;
use crate::types::CourierError;

const PARAM: &str = "fileDetails";

/// Identifiers requested through `fileDetails`.
///
/// Accepts repeated keys, `fileDetails[]` and `fileDetails[N]` forms, and
/// comma-separated values. Blank items are dropped, order is kept.
pub fn parse_file_details(query: Option<&str>) -> Vec<String> {
    query_pairs(query)
        .into_iter()
        .filter(|(key, _)| is_file_details_key(key))
        .flat_map(|(_, value)| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn is_file_details_key(key: &str) -> bool {
    match key.strip_prefix(PARAM) {
        Some("") => true,
        Some(rest) => {
            rest.starts_with('[')
                && rest.ends_with(']')
                && rest[1..rest.len() - 1].chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

pub async fn handle_bundle(state: &AppState, query: Option<&str>) -> Response<BoxBody> {
    let identifiers = parse_file_details(query);
    debug!("Bundling {} identifier(s)", identifiers.len());

    let (tx, mut rx) = mpsc::channel::<Result<Bytes, CourierError>>(
        state.args.bundle_channel_capacity.max(1),
    );
    let aggregator = state.aggregator();

    tokio::spawn(async move {
        let watch = tx.clone();
        let outcome = tokio::select! {
            result = aggregator.build(identifiers, tx) => Some(result),
            _ = watch.closed() => None,
        };

        match outcome {
            Some(Ok(_)) => {}
            Some(Err(ArchiveError::ClientGone)) | None => {
                info!("Client disconnected, bundle abandoned");
            }
            Some(Err(e)) => {
                error!("Bundle failed after headers were sent: {}", e);
                // Best effort: an error frame makes hyper drop the connection.
                let _ = watch.send(Err(e.into())).await;
            }
        }
    });

    let frames = stream::poll_fn(move |cx| rx.poll_recv(cx)).map(|item| item.map(Frame::data));

    respond(
        headers::bundle_headers(Response::builder().status(StatusCode::OK)),
        StreamBody::new(frames).boxed_unsync(),
    )
}
