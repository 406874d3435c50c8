//! Side channel for poking at a running fuzzer.
//!
//! Nothing in the engines depends on this listener. It serves the live
//! counters and can abort the process so a stuck run can be inspected.

use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{error, info};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{FuzzError, Result};
use crate::stats::ActionStats;

/// What the listener should do with a request.
#[derive(Debug, PartialEq)]
pub enum Reply {
    Json(StatusCode, String),
    Halt,
}

fn format_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

pub fn route(method: &Method, path: &str, stats: &ActionStats) -> Reply {
    match (method, path) {
        (&Method::GET, "/ping") => Reply::Json(StatusCode::OK, json!({ "message": "pong" }).to_string()),
        (&Method::GET, "/metrics") => match serde_json::to_string(&stats.snapshot()) {
            Ok(body) => Reply::Json(StatusCode::OK, body),
            Err(e) => Reply::Json(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": e.to_string() }).to_string(),
            ),
        },
        (&Method::POST, "/halt") => Reply::Halt,
        _ => Reply::Json(StatusCode::NOT_FOUND, json!({ "error": "Not Found" }).to_string()),
    }
}

async fn handler(
    req: Request<Incoming>,
    stats: Arc<ActionStats>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    match route(req.method(), req.uri().path(), &stats) {
        Reply::Json(status, body) => Ok(format_response(status, body)),
        Reply::Halt => {
            error!("Halt requested over diagnostics, aborting");
            log::logger().flush();
            std::process::abort();
        }
    }
}

pub async fn bind(address: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(FuzzError::Diagnostics)?;
    if let Ok(local) = listener.local_addr() {
        info!("Diagnostics listening on http://{}", local);
    }
    Ok(listener)
}

pub async fn serve(listener: TcpListener, stats: Arc<ActionStats>, cancel: CancellationToken) {
    loop {
        let tcp = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((tcp, _)) => tcp,
                Err(e) => {
                    error!("Failed to accept diagnostics connection: {}", e);
                    continue;
                }
            },
        };

        let io = TokioIo::new(tcp);
        let stats = stats.clone();
        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, service_fn(move |req| handler(req, stats.clone())))
                .await
            {
                error!("Error serving diagnostics connection: {:?}", err);
            }
        });
    }
}
