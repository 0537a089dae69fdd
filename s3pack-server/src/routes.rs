//! The HTTP surface: `GET /download` and `GET /health`
use crate::progress::LogProgress;
use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use s3pack::{ArchiveResult, BundleJob, S3PackError};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Clone)]
struct AppState {
    job: Arc<BundleJob>,
}

/// Build the router serving `job`
pub(crate) fn router(job: BundleJob) -> Router {
    // Browsers call this from other origins, and there's nothing here that needs protecting from
    // that
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/download", get(download))
        .route("/health", get(health))
        .with_state(AppState { job: Arc::new(job) })
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn health() -> &'static str {
    "ok"
}

/// Bundle the bucket and respond with the archive
async fn download(State(state): State<AppState>) -> Response {
    let job = state.job.clone();

    // A run of its own so a panic anywhere in the pipeline fails just this request
    let result = tokio::spawn(async move {
        let progress = LogProgress::new();
        job.run(&progress).await
    })
    .await;

    match result {
        Ok(Ok(archive)) => archive_response(archive),
        Ok(Err(e)) => error_response(&e),
        Err(e) => {
            error!(err = %e, "Bundling task panicked");

            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error: the bundling task panicked",
            )
                .into_response()
        }
    }
}

fn archive_response(archive: ArchiveResult) -> Response {
    let disposition = format!("attachment; filename={}", archive.file_name);

    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (
                header::CONTENT_DISPOSITION,
                // The file name is one of a few fixed ASCII names
                HeaderValue::from_str(&disposition)
                    .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
            ),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        archive.data,
    )
        .into_response()
}

fn error_response(e: &S3PackError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("{}: {}", e.kind(), e.detail()),
    )
        .into_response()
}
