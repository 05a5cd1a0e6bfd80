// Ranged resource fetching: gap-deduplicated downloads over a shared,
// idempotent disk cache, with incremental reader notification.

mod client;
mod context;
mod error;
mod store;

pub use client::{ChunkStream, FetchChunk, HttpResourceClient, ResourceClient, ResourceDescriptor};
pub use context::{FetchContext, FetchStats, ReadEvent, ReadHandle, ReadProgress};
pub use error::FetchError;
pub use store::{BlobStore, FsBlobStore};
