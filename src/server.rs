//! HTTP surface: `POST /pdf`.
//!
//! The handler decodes the request, then runs the pipeline on its own tokio
//! task. A client that disconnects drops the handler future but not that
//! task, so the engine session and temp files are still cleaned up by the
//! pipeline itself rather than abandoned halfway.

use crate::config::ServerConfig;
use crate::convert::Pipeline;
use crate::error::{Html2PdfError, COMPRESSION_FAILED_MESSAGE};
use crate::output::CompressedOutput;
use crate::pipeline::input::RenderRequest;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Number of pages in the returned PDF.
pub const PAGE_COUNT_HEADER: &str = "x-page-count";

/// Build the service router.
pub fn router(pipeline: Arc<Pipeline>, config: &ServerConfig) -> Router {
    Router::new()
        .route("/pdf", post(render_pdf))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(config.body_limit))
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

/// Bind `config.socket_addr()` and serve until the process receives Ctrl-C.
pub async fn serve(config: ServerConfig, pipeline: Arc<Pipeline>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.socket_addr()).await?;
    info!(
        "Listening on http://{} (body limit {} bytes)",
        listener.local_addr()?,
        config.body_limit
    );

    axum::serve(listener, router(pipeline, &config).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn render_pdf(
    State(pipeline): State<Arc<Pipeline>>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let pairs = query.iter().map(|(k, v)| (k.as_str(), v.as_str()));

    let request = match RenderRequest::from_http(content_type, &body, pairs) {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };

    let task = tokio::spawn(async move { pipeline.run(request).await });
    match task.await {
        Ok(Ok(output)) => pdf_response(output),
        Ok(Err(e)) => error_response(&e),
        Err(e) => error_response(&Html2PdfError::Internal(format!(
            "pipeline task failed: {}",
            e
        ))),
    }
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// `attachment` disposition for `filename`. Non-ASCII names get an ASCII
/// `filename` fallback plus an RFC 6266 `filename*` parameter.
fn content_disposition(filename: &str) -> HeaderValue {
    let value = if filename.is_ascii() {
        format!("attachment; filename=\"{}\"", filename)
    } else {
        let fallback: String = filename
            .chars()
            .map(|c| if c.is_ascii() { c } else { '?' })
            .collect();
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(filename)
        )
    };
    HeaderValue::from_str(&value)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"document.pdf\""))
}

fn pdf_response(output: CompressedOutput) -> Response {
    let disposition = content_disposition(&output.filename);

    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (CONTENT_DISPOSITION, disposition),
            (
                HeaderName::from_static(PAGE_COUNT_HEADER),
                HeaderValue::from(output.stats.pages),
            ),
        ],
        output.bytes,
    )
        .into_response()
}

/// Map a pipeline error onto a plain-text response.
pub fn error_response(err: &Html2PdfError) -> Response {
    match err {
        Html2PdfError::Compression { .. } => {
            error!("{}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, COMPRESSION_FAILED_MESSAGE).into_response()
        }
        e => {
            let report = e.report();
            if e.is_client_error() {
                warn!("Rejected request: {}", report);
            } else {
                error!("Request failed: {}", report);
            }
            (StatusCode::INTERNAL_SERVER_ERROR, report).into_response()
        }
    }
}
