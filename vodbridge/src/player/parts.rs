//! Derivation of the playable-parts snapshot consumed by the native
//! playback pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use tempfile::NamedTempFile;

use super::buffer::FragmentBuffer;
use super::media_source::VirtualMediaSource;

/// One playable fragment: timeline position plus the temp file holding
/// its bytes.
#[derive(Debug, Clone)]
pub struct PlayerPart {
    pub start_time: f64,
    pub end_time: f64,
    pub file: Arc<NamedTempFile>,
}

/// The authoritative timeline for the native player: ordered parts plus
/// the source's declared duration.
#[derive(Debug, Clone, Default)]
pub struct PlayerPartsState {
    pub duration: Option<f64>,
    pub parts: Vec<PlayerPart>,
}

/// Derive the parts state for a media source.
///
/// The first attached buffer (lowest id) is the authoritative part
/// source; multi-buffer audio+video muxing is out of scope.
pub fn derive_parts_state(
    media_source: &VirtualMediaSource,
    buffers: &HashMap<u64, FragmentBuffer>,
) -> PlayerPartsState {
    let parts = media_source
        .source_buffer_ids()
        .iter()
        .copied()
        .filter(|id| buffers.contains_key(id))
        .min()
        .and_then(|id| buffers.get(&id))
        .map(|buffer| buffer.parts())
        .unwrap_or_default();

    PlayerPartsState {
        duration: media_source.duration(),
        parts,
    }
}
