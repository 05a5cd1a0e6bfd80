// Integration tests for the local content server: manifest synthesis,
// reference rewriting, and byte-range part serving.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use bytes::Bytes;
use tower::ServiceExt;

use rangefetch::{
    ChunkStream, FetchChunk, FetchError, FsBlobStore, ResourceClient, ResourceDescriptor,
};
use vodbridge::hls::{HlsSource, QualityVariant, SourceRegistry};
use vodbridge::server::{AppState, router};

/// Serves fixed per-resource contents, one chunk per interval, and
/// records which resources were fetched.
struct StaticClient {
    resources: HashMap<u64, Bytes>,
    fetched: parking_lot::Mutex<Vec<u64>>,
}

#[async_trait]
impl ResourceClient for StaticClient {
    async fn fetch(
        &self,
        resource: &ResourceDescriptor,
        intervals: &[Range<u64>],
    ) -> Result<ChunkStream, FetchError> {
        self.fetched.lock().push(resource.id);
        let Some(content) = self.resources.get(&resource.id) else {
            return Err(FetchError::store(format!(
                "unknown resource {}",
                resource.id
            )));
        };
        let chunks: Vec<Result<FetchChunk, FetchError>> = intervals
            .iter()
            .map(|interval| {
                Ok(FetchChunk {
                    offset: interval.start,
                    data: content.slice(interval.start as usize..interval.end as usize),
                })
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

const MEDIA_240_ID: u64 = 241;
const MEDIA_240_SIZE: u64 = 40_000;

fn media_content() -> Bytes {
    Bytes::from(
        (0..MEDIA_240_SIZE as usize)
            .map(|i| (i % 239) as u8)
            .collect::<Vec<u8>>(),
    )
}

fn quality_playlist_text() -> &'static str {
    "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-VERSION:7\n#EXTINF:6.0,\nmtproto:241\n#EXTINF:6.0,\nmtproto:242\n#EXT-X-ENDLIST\n"
}

fn make_variant(
    quality: u32,
    playlist_id: u64,
    playlist_len: u64,
    media_id: u64,
    media_size: u64,
    duration: f64,
) -> QualityVariant {
    QualityVariant {
        quality,
        width: Some(quality * 16 / 9),
        height: Some(quality),
        duration,
        playlist: ResourceDescriptor {
            id: playlist_id,
            size: playlist_len,
            location: format!("test://playlist/{playlist_id}"),
        },
        media: ResourceDescriptor {
            id: media_id,
            size: media_size,
            location: format!("test://media/{media_id}"),
        },
    }
}

fn test_state(assets_dir: Option<std::path::PathBuf>) -> (AppState, Arc<StaticClient>) {
    let playlist_text = quality_playlist_text();
    let mut resources = HashMap::new();
    resources.insert(2400, Bytes::from_static(playlist_text.as_bytes()));
    resources.insert(4800, Bytes::from_static(playlist_text.as_bytes()));
    resources.insert(7200, Bytes::from_static(playlist_text.as_bytes()));
    resources.insert(MEDIA_240_ID, media_content());

    let client = Arc::new(StaticClient {
        resources,
        fetched: parking_lot::Mutex::new(Vec::new()),
    });
    let store = Arc::new(FsBlobStore::in_temp_dir().expect("temp store"));

    let playlist_len = playlist_text.len() as u64;
    let variants = vec![
        make_variant(240, 2400, playlist_len, MEDIA_240_ID, MEDIA_240_SIZE, 10.0),
        make_variant(720, 7200, playlist_len, 721, 2_500_000, 10.0),
        make_variant(480, 4800, playlist_len, 481, 1_200_000, 0.0),
    ];

    let registry = SourceRegistry::new();
    registry.register(HlsSource::new("clip", variants, client.clone(), store));

    (
        AppState {
            registry,
            assets_dir,
        },
        client,
    )
}

async fn get(state: AppState, uri: &str) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let response = router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}

#[tokio::test]
async fn test_master_playlist_descending_and_parseable() {
    let (status, headers, body) = get(test_state(None).0, "/clip/master.m3u8").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).unwrap(),
        "application/vnd.apple.mpegurl"
    );

    let text = String::from_utf8(body.to_vec()).unwrap();
    let levels: Vec<&str> = text
        .lines()
        .filter(|line| line.starts_with("hls_level_"))
        .collect();
    assert_eq!(
        levels,
        vec!["hls_level_720.m3u8", "hls_level_480.m3u8", "hls_level_240.m3u8"]
    );

    // The synthesized playlist must be valid m3u8.
    let (_, playlist) = m3u8_rs::parse_master_playlist(body.as_ref()).expect("valid master");
    assert_eq!(playlist.variants.len(), 3);

    // 2.5 MB over 10 seconds: 250_000 bytes/sec * 8 bits.
    assert!(text.contains("BANDWIDTH=2000000"));
}

#[tokio::test]
async fn test_master_playlist_bandwidth_fallback() {
    let (_, _, body) = get(test_state(None).0, "/clip/master.m3u8").await;
    let text = String::from_utf8(body.to_vec()).unwrap();

    // The 480 variant has unknown duration and falls back to the fixed
    // bandwidth constant.
    let line_480 = text
        .lines()
        .zip(text.lines().skip(1))
        .find(|(_, next)| *next == "hls_level_480.m3u8")
        .map(|(info, _)| info)
        .expect("480 entry");
    assert!(line_480.contains("BANDWIDTH=1000000"), "line: {line_480}");
}

#[tokio::test]
async fn test_quality_playlist_rewrites_reference_tokens() {
    let (status, _, body) = get(test_state(None).0, "/clip/hls_level_240.m3u8").await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(body.to_vec()).unwrap();
    assert_eq!(
        text,
        "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-VERSION:7\n#EXTINF:6.0,\npartfile241.mp4\n#EXTINF:6.0,\npartfile242.mp4\n#EXT-X-ENDLIST\n"
    );
    assert!(!text.contains("mtproto:"));
}

#[tokio::test]
async fn test_part_file_range_request() {
    let (state, _) = test_state(None);
    let response = router(state)
        .oneshot(
            Request::builder()
                .uri("/clip/partfile241.mp4")
                .header(header::RANGE, "bytes=100-199")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        &format!("bytes 100-199/{MEDIA_240_SIZE}")
    );
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "video/mp4"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.as_ref(), &media_content()[100..200]);
}

#[tokio::test]
async fn test_part_file_without_range_serves_everything() {
    let (status, _, body) = get(test_state(None).0, "/clip/partfile241.mp4").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.len() as u64, MEDIA_240_SIZE);
    assert_eq!(body, media_content());
}

#[tokio::test]
async fn test_unknown_source_and_quality_are_not_found() {
    let (status, _, _) = get(test_state(None).0, "/nope/master.m3u8").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = get(test_state(None).0, "/clip/hls_level_1080.m3u8").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = get(test_state(None).0, "/clip/partfile999.mp4").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unsatisfiable_range_is_rejected() {
    let (state, _) = test_state(None);
    let response = router(state)
        .oneshot(
            Request::builder()
                .uri("/clip/partfile241.mp4")
                .header(header::RANGE, format!("bytes={MEDIA_240_SIZE}-"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn test_static_asset_fallback() {
    let assets = tempfile::tempdir().unwrap();
    std::fs::write(assets.path().join("index.html"), "<html></html>").unwrap();
    std::fs::write(assets.path().join("player.js"), "void 0;").unwrap();

    let (state, _) = test_state(Some(assets.path().to_path_buf()));
    let (status, headers, body) = get(state.clone(), "/clip/index.html").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/html");
    assert_eq!(body.as_ref(), b"<html></html>");

    let (status, headers, _) = get(state.clone(), "/clip/player.js").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).unwrap(),
        "application/javascript"
    );

    let (status, _, _) = get(state, "/clip/missing.js").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_quality_playlist_is_fetched_once() {
    let (state, client) = test_state(None);

    let (status, _, first) = get(state.clone(), "/clip/hls_level_240.m3u8").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, second) = get(state, "/clip/hls_level_240.m3u8").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);

    // The playlist resource went over the network exactly once; the
    // second request was served from coverage.
    let playlist_fetches = client
        .fetched
        .lock()
        .iter()
        .filter(|&&id| id == 2400)
        .count();
    assert_eq!(playlist_fetches, 1);
}
