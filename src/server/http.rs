//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one task per connection. Shutdown stops the
//! accept loop and lets in-flight transfers finish within a grace period.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::routes::{self, to_boxed, BoxBody};
use crate::types::CourierError;

/// Bind the configured address and serve until `shutdown` resolves
pub async fn run<F>(state: Arc<AppState>, shutdown: F) -> Result<(), CourierError>
where
    F: Future<Output = ()>,
{
    let addr = state.args.listen_addr();
    let listener = TcpListener::bind(addr).await?;
    info!("Courier listening on {} as node {}", addr, state.args.node_id);
    serve(listener, state, shutdown).await
}

/// Serve connections from an already bound listener
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), CourierError>
where
    F: Future<Output = ()>,
{
    let graceful = GracefulShutdown::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let io = TokioIo::new(stream);
                    let conn_state = Arc::clone(&state);
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&conn_state);
                        async move { handle_request(state, addr, req).await }
                    });

                    let conn = http1::Builder::new().serve_connection(io, service);
                    let conn = graceful.watch(conn);
                    tokio::spawn(async move {
                        if let Err(err) = conn.await {
                            // Mostly clients hanging up mid-download
                            debug!("Connection from {} ended with error: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown requested, no longer accepting connections");
                break;
            }
        }
    }

    drop(listener);

    let grace = state.args.shutdown_grace();
    tokio::select! {
        _ = graceful.shutdown() => info!("All connections drained"),
        _ = tokio::time::sleep(grace) => {
            warn!("Connections still open after {:?}, closing them", grace);
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    info!("[{}] {} {}", addr, method, path);

    Ok(route(&state, &method, &path, query.as_deref()).await)
}

/// Dispatch one request. Every response allows any origin.
pub async fn route(
    state: &AppState,
    method: &Method,
    path: &str,
    query: Option<&str>,
) -> Response<BoxBody> {
    let mut response = match (method, path) {
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            to_boxed(routes::health_check(state))
        }

        (&Method::GET, "/api/download") => routes::handle_download(state, query).await,
        (&Method::GET, "/api/download-multiple") => routes::handle_bundle(state, query).await,
        (&Method::GET, "/api/downloadTeam") => routes::handle_team_download(state, query).await,

        // CORS preflight
        (&Method::OPTIONS, _) => to_boxed(preflight_response()),

        _ => to_boxed(not_found_response(path)),
    };

    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Disposition, Content-Length, Content-Range"),
    );
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
