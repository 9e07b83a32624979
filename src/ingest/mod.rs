mod parse;

pub use parse::{parse_body, ParsedLine};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::metrics::INGEST_LINES_TOTAL;
use crate::normalize::normalize;
use crate::reconstruct::Reconstructor;
use crate::store::{insert_rows, StorageGateway};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use flate2::read::GzDecoder;
use serde::Serialize;
use std::io::Read;
use std::sync::Arc;

const MAX_REPORTED_ERRORS: usize = 100;

pub struct IngestState<G: StorageGateway> {
    pub store: Arc<G>,
    pub reconstructor: Arc<Reconstructor<G>>,
    pub ingest_token: String,
    pub max_body_bytes: usize,
}

impl<G: StorageGateway + 'static> IngestState<G> {
    pub fn new(store: Arc<G>, reconstructor: Arc<Reconstructor<G>>, config: &Config) -> Self {
        Self {
            store,
            reconstructor,
            ingest_token: config.ingest_token.clone(),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

pub fn build_router<G: StorageGateway + 'static>(state: Arc<IngestState<G>>) -> Router {
    Router::new()
        .route("/v1/ingest/logs", post(ingest_logs::<G>))
        .route("/health", get(health))
        .route("/health/live", get(health))
        .route("/health/ready", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

#[derive(Serialize)]
struct IngestResponse {
    accepted: usize,
    rejected: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<IngestLineError>,
}

#[derive(Serialize)]
struct IngestLineError {
    line: usize,
    reason: String,
}

async fn ingest_logs<G: StorageGateway + 'static>(
    State(state): State<Arc<IngestState<G>>>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<impl IntoResponse, AppError> {
    authenticate(&headers, &state.ingest_token)?;

    // A generous bound on the compressed wire size alone, well above
    // max_body_bytes, so an absurdly large upload is rejected before it is
    // even handed to the decompressor.
    if body.len() > state.max_body_bytes.saturating_mul(10) {
        return Err(AppError::Validation(format!(
            "compressed body of {} bytes is implausibly large",
            body.len()
        )));
    }

    let decompressed = decompress_if_needed(&headers, &body, state.max_body_bytes)?;
    let lines = parse_body(&decompressed)?;

    let now = Utc::now();
    let mut accepted_rows = Vec::new();
    let mut errors = Vec::new();
    let mut rejected = 0usize;

    for (idx, line) in lines.into_iter().enumerate() {
        match line {
            ParsedLine::Event { raw, event } => match normalize(&raw, event, now) {
                Ok(pair) => accepted_rows.push(pair),
                Err(reason) => {
                    rejected += 1;
                    if errors.len() < MAX_REPORTED_ERRORS {
                        errors.push(IngestLineError { line: idx, reason });
                    }
                }
            },
            ParsedLine::ParseError(reason) => {
                rejected += 1;
                if errors.len() < MAX_REPORTED_ERRORS {
                    errors.push(IngestLineError { line: idx, reason });
                }
            }
        }
    }

    if accepted_rows.is_empty() {
        INGEST_LINES_TOTAL.with_label_values(&["rejected"]).inc_by(rejected as f64);
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(IngestResponse {
                accepted: 0,
                rejected,
                errors,
            }),
        ));
    }

    let raw_rows: Vec<_> = accepted_rows.iter().map(|(row, _)| row.clone()).collect();
    insert_rows(state.store.as_ref(), "raw_logs", &raw_rows).await?;

    state.reconstructor.add(&accepted_rows);

    INGEST_LINES_TOTAL
        .with_label_values(&["accepted"])
        .inc_by(accepted_rows.len() as f64);
    INGEST_LINES_TOTAL.with_label_values(&["rejected"]).inc_by(rejected as f64);

    Ok((
        StatusCode::OK,
        Json(IngestResponse {
            accepted: accepted_rows.len(),
            rejected,
            errors,
        }),
    ))
}

fn authenticate(headers: &HeaderMap, expected_token: &str) -> Result<()> {
    if expected_token.is_empty() {
        return Ok(());
    }
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let token = provided
        .split_once(' ')
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token);

    match token {
        Some(t) if t == expected_token => Ok(()),
        _ => Err(AppError::Auth("missing or invalid bearer token".to_string())),
    }
}

/// Decompresses a gzip-encoded body if `Content-Encoding: gzip` is present,
/// enforcing `max_body_bytes` against the *decompressed* size as it streams
/// out rather than after the fact, so a gzip bomb can't balloon memory
/// before being rejected.
fn decompress_if_needed(headers: &HeaderMap, body: &[u8], max_body_bytes: usize) -> Result<Vec<u8>> {
    let is_gzip = headers
        .get(axum::http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);

    if !is_gzip {
        if body.len() > max_body_bytes {
            return Err(AppError::Validation(format!(
                "body of {} bytes exceeds the {} byte limit",
                body.len(),
                max_body_bytes
            )));
        }
        return Ok(body.to_vec());
    }

    let decoder = GzDecoder::new(body);
    let mut limited = decoder.take(max_body_bytes as u64 + 1);
    let mut out = Vec::new();
    limited
        .read_to_end(&mut out)
        .map_err(|e| AppError::Validation(format!("failed to decompress gzip body: {e}")))?;

    if out.len() as u64 > max_body_bytes as u64 {
        return Err(AppError::Validation(format!(
            "decompressed body exceeds the {max_body_bytes} byte limit"
        )));
    }
    Ok(out)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": crate::metrics::uptime_seconds(),
    }))
}

async fn metrics_handler() -> impl IntoResponse {
    (StatusCode::OK, crate::metrics::gather_metrics())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticate_allows_when_no_token_configured() {
        let headers = HeaderMap::new();
        assert!(authenticate(&headers, "").is_ok());
    }

    #[test]
    fn test_authenticate_rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(authenticate(&headers, "secret").is_err());
    }

    #[test]
    fn test_authenticate_accepts_matching_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        assert!(authenticate(&headers, "secret").is_ok());
    }

    #[test]
    fn test_authenticate_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Basic secret".parse().unwrap());
        assert!(authenticate(&headers, "secret").is_err());
    }

    #[test]
    fn test_decompress_passthrough_without_header() {
        let headers = HeaderMap::new();
        let body = b"hello".to_vec();
        assert_eq!(decompress_if_needed(&headers, &body, 1024).unwrap(), body);
    }

    #[test]
    fn test_decompress_passthrough_rejects_oversized_body() {
        let headers = HeaderMap::new();
        let body = vec![0u8; 10];
        assert!(decompress_if_needed(&headers, &body, 5).is_err());
    }

    #[test]
    fn test_decompress_gzip_rejects_output_over_limit() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&vec![b'a'; 1024]).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::CONTENT_ENCODING, "gzip".parse().unwrap());

        assert!(decompress_if_needed(&headers, &compressed, 100).is_err());
        assert!(decompress_if_needed(&headers, &compressed, 2048).is_ok());
    }
}
