//! Local content server.
//!
//! Answers three request shapes for a registered source: the synthesized
//! master playlist, rewritten per-quality playlists, and byte ranges of
//! quality media resources. Unknown sub-paths fall back to the static
//! runtime assets directory.

mod error;

pub use error::ServerError;

use std::io::SeekFrom;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::hls::{HlsSource, SourceRegistry};

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

#[derive(Clone)]
pub struct AppState {
    pub registry: SourceRegistry,
    pub assets_dir: Option<PathBuf>,
}

/// Build the content server router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/{source_id}/{*path}", get(serve_source_path))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn serve_source_path(
    State(state): State<AppState>,
    Path((source_id, path)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let Some(source) = state.registry.get(&source_id) else {
        return Err(ServerError::not_found(format!(
            "no source registered under `{source_id}`"
        )));
    };

    if path == "master.m3u8" {
        return Ok(playlist_response(source.master_playlist()));
    }

    if let Some(quality) = path
        .strip_prefix("hls_level_")
        .and_then(|rest| rest.strip_suffix(".m3u8"))
        .and_then(|digits| digits.parse::<u32>().ok())
    {
        return match source.quality_playlist(quality).await? {
            Some(playlist) => Ok(playlist_response(playlist)),
            None => Err(ServerError::not_found(format!(
                "quality {quality} not available"
            ))),
        };
    }

    if let Some(file_id) = path
        .strip_prefix("partfile")
        .and_then(|rest| rest.strip_suffix(".mp4"))
        .and_then(|digits| digits.parse::<u64>().ok())
    {
        return serve_part_file(&source, file_id, &headers).await;
    }

    serve_asset(state.assets_dir.as_deref(), &path).await
}

fn playlist_response(playlist: String) -> Response {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static(PLAYLIST_CONTENT_TYPE))],
        playlist,
    )
        .into_response()
}

async fn serve_part_file(
    source: &Arc<HlsSource>,
    file_id: u64,
    headers: &HeaderMap,
) -> Result<Response, ServerError> {
    let Some(context) = source.file_context(file_id)? else {
        return Err(ServerError::not_found(format!(
            "no media resource with file id {file_id}"
        )));
    };

    let total_size = context.total_size();
    let requested = parse_range_header(headers, total_size)?;
    let (range, partial) = match requested {
        Some(range) => (range, true),
        None => (0..total_size, false),
    };

    debug!(
        file_id,
        start = range.start,
        end = range.end,
        "serving part file range"
    );

    let progress = context.read(range).wait_complete().await?;
    let body = read_file_range(&progress.file, &progress.populated).await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if partial {
        let content_range = format!(
            "bytes {}-{}/{}",
            progress.populated.start,
            progress.populated.end.saturating_sub(1),
            total_size
        );
        let value = HeaderValue::from_str(&content_range)
            .map_err(|_| ServerError::internal("invalid content range"))?;
        response_headers.insert(header::CONTENT_RANGE, value);
        Ok((StatusCode::PARTIAL_CONTENT, response_headers, body).into_response())
    } else {
        Ok((StatusCode::OK, response_headers, body).into_response())
    }
}

/// Parse a `Range: bytes=a-b` header into a half-open range, clamped to
/// the resource size. `None` when no range was requested.
fn parse_range_header(
    headers: &HeaderMap,
    total_size: u64,
) -> Result<Option<Range<u64>>, ServerError> {
    let Some(value) = headers.get(header::RANGE) else {
        return Ok(None);
    };

    let raw = value
        .to_str()
        .map_err(|_| ServerError::bad_request("unreadable Range header"))?;
    let spec = raw
        .strip_prefix("bytes=")
        .ok_or_else(|| ServerError::bad_request("only byte ranges are supported"))?;

    let (start_raw, end_raw) = spec
        .split_once('-')
        .ok_or_else(|| ServerError::bad_request("malformed Range header"))?;

    let start: u64 = start_raw
        .parse()
        .map_err(|_| ServerError::bad_request("malformed Range header"))?;

    let end = if end_raw.is_empty() {
        total_size
    } else {
        let inclusive: u64 = end_raw
            .parse()
            .map_err(|_| ServerError::bad_request("malformed Range header"))?;
        inclusive
            .checked_add(1)
            .ok_or_else(|| ServerError::bad_request("malformed Range header"))?
            .min(total_size)
    };

    if start >= total_size {
        return Err(ServerError::range_not_satisfiable(format!(
            "range starts at {start} but resource has {total_size} bytes"
        )));
    }
    if start >= end {
        return Err(ServerError::bad_request("empty or inverted byte range"));
    }

    Ok(Some(start..end))
}

async fn read_file_range(path: &std::path::Path, range: &Range<u64>) -> Result<Vec<u8>, ServerError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ServerError::internal(format!("cannot open backing file: {e}")))?;
    file.seek(SeekFrom::Start(range.start))
        .await
        .map_err(|e| ServerError::internal(format!("cannot seek backing file: {e}")))?;

    let mut buf = vec![0u8; (range.end - range.start) as usize];
    file.read_exact(&mut buf)
        .await
        .map_err(|e| ServerError::internal(format!("cannot read backing file: {e}")))?;
    Ok(buf)
}

async fn serve_asset(assets_dir: Option<&std::path::Path>, path: &str) -> Result<Response, ServerError> {
    let Some(assets_dir) = assets_dir else {
        return Err(ServerError::not_found(format!("no handler for `{path}`")));
    };

    // Assets are served from a single flat directory.
    if path.contains("..") || path.contains('/') {
        return Err(ServerError::not_found(format!("no handler for `{path}`")));
    }

    let full = assets_dir.join(path);
    let data = match tokio::fs::read(&full).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ServerError::not_found(format!("asset `{path}` not found")));
        }
        Err(e) => return Err(ServerError::internal(format!("cannot read asset: {e}"))),
    };

    let content_type = match full.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html",
        Some("js") => "application/javascript",
        _ => "application/octet-stream",
    };

    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static(content_type))],
        data,
    )
        .into_response())
}
