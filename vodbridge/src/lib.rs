//! Local HLS delivery bridge for embedded playback runtimes.
//!
//! Serves segmented media to a playback runtime with no native adaptive
//! streaming support: synthesizes HLS manifests for registered sources,
//! proxies byte-range requests through a caching local content server,
//! and emulates the source-buffer append/seek/remove protocol over the
//! fetched fragments.

pub mod bridge;
pub mod config;
pub mod error;
pub mod hls;
pub mod logging;
pub mod player;
pub mod server;

pub use error::Error;
