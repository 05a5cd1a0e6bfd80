// Upstream byte source: the account/network client that serves raw
// resource bytes for requested intervals.

use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tracing::trace;

use crate::error::FetchError;

/// Opaque reference to one remote, range-fetchable resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    /// Stable identity; also the cache key.
    pub id: u64,
    /// Total size in bytes.
    pub size: u64,
    /// Provider-interpreted location (a URL for the HTTP client).
    pub location: String,
}

/// One contiguous piece of fetched data at an absolute resource offset.
#[derive(Debug, Clone)]
pub struct FetchChunk {
    pub offset: u64,
    pub data: Bytes,
}

pub type ChunkStream = BoxStream<'static, Result<FetchChunk, FetchError>>;

/// Fetches raw bytes for a set of byte intervals of one resource.
///
/// Implementations stream chunks back as they arrive so coverage can
/// grow incrementally; chunk boundaries carry absolute offsets.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn fetch(
        &self,
        resource: &ResourceDescriptor,
        intervals: &[Range<u64>],
    ) -> Result<ChunkStream, FetchError>;
}

/// `ResourceClient` over plain HTTP range requests.
#[derive(Debug, Clone)]
pub struct HttpResourceClient {
    http: reqwest::Client,
}

impl HttpResourceClient {
    pub fn new() -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .tcp_nodelay(true)
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    async fn fetch(
        &self,
        resource: &ResourceDescriptor,
        intervals: &[Range<u64>],
    ) -> Result<ChunkStream, FetchError> {
        for interval in intervals {
            if interval.start >= interval.end {
                return Err(FetchError::InvalidRange {
                    start: interval.start,
                    end: interval.end,
                });
            }
        }

        let target = url::Url::parse(&resource.location).map_err(|e| FetchError::InvalidUrl {
            input: resource.location.clone(),
            reason: e.to_string(),
        })?;

        let http = self.http.clone();
        let resource_id = resource.id;

        let stream = futures::stream::iter(intervals.to_vec())
            .then(move |interval| {
                let http = http.clone();
                let target = target.clone();
                async move {
                    trace!(
                        resource_id,
                        start = interval.start,
                        end = interval.end,
                        "requesting byte interval"
                    );

                    let range_header = format!("bytes={}-{}", interval.start, interval.end - 1);
                    let location = target.to_string();
                    let response = http
                        .get(target)
                        .header(reqwest::header::RANGE, range_header)
                        .send()
                        .await?;

                    let status = response.status();
                    if !status.is_success() {
                        return Err(FetchError::http_status(status, location));
                    }

                    let mut offset = interval.start;
                    let chunks = response.bytes_stream().map(move |item| {
                        item.map_err(FetchError::from).map(|data| {
                            let at = offset;
                            offset += data.len() as u64;
                            FetchChunk { offset: at, data }
                        })
                    });
                    Ok::<_, FetchError>(chunks)
                }
            })
            .try_flatten()
            .boxed();

        Ok(stream)
    }
}
