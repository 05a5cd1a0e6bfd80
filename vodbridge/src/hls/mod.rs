// HLS source registration and on-demand manifest synthesis.

mod manifest;
mod source;

pub use manifest::{FALLBACK_BANDWIDTH, QualityVariant, master_playlist, rewrite_media_references};
pub use source::{HlsSource, SourceRegistry};
