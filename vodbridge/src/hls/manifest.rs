//! On-demand playlist synthesis.
//!
//! The master playlist is generated from registered quality variants;
//! per-quality playlists are the provider's stored text with embedded
//! media reference tokens rewritten to local partial-file paths.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::OnceLock;

use rangefetch::ResourceDescriptor;
use regex::Regex;

/// Bandwidth reported for a variant whose duration is zero or unknown.
pub const FALLBACK_BANDWIDTH: u64 = 1_000_000;

const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;

/// One bitrate/resolution rendition of a source.
#[derive(Debug, Clone)]
pub struct QualityVariant {
    pub quality: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Seconds; zero means unknown.
    pub duration: f64,
    pub playlist: ResourceDescriptor,
    pub media: ResourceDescriptor,
}

impl QualityVariant {
    /// Estimated bandwidth in bits per second, derived from media size
    /// over duration, with a fixed fallback for unknown durations.
    pub fn bandwidth(&self) -> u64 {
        if self.duration > 0.0 {
            (self.media.size as f64 / self.duration) as u64 * 8
        } else {
            FALLBACK_BANDWIDTH
        }
    }
}

/// Synthesize the master playlist: one entry per quality, strictly
/// descending by quality index.
pub fn master_playlist(variants: &BTreeMap<u32, QualityVariant>) -> String {
    let mut out = String::from("#EXTM3U\n");
    for (quality, variant) in variants.iter().rev() {
        let width = variant.width.unwrap_or(DEFAULT_WIDTH);
        let height = variant.height.unwrap_or(DEFAULT_HEIGHT);
        let _ = writeln!(
            out,
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}",
            variant.bandwidth(),
            width,
            height
        );
        let _ = writeln!(out, "hls_level_{quality}.m3u8");
    }
    out
}

fn media_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"mtproto:(\d+)").expect("valid reference pattern"))
}

/// Rewrite embedded media reference tokens (`mtproto:` marker plus
/// decimal digits) to local `partfile{id}.mp4` paths, leaving all other
/// text untouched.
pub fn rewrite_media_references(playlist: &str) -> String {
    media_reference_pattern()
        .replace_all(playlist, "partfile${1}.mp4")
        .into_owned()
}
