//! Emulated SourceBuffer: appended payloads are persisted to temp files,
//! demuxed for timing, and tracked as playable fragments with a derived
//! time coverage set.

use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use fmp4::{FragmentTiming, read_fragment_timing};
use rangeset::RangeSet;
use tempfile::NamedTempFile;
use tracing::debug;

use super::parts::PlayerPart;

#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("could not extract fragment timing from appended payload")]
    Demux,

    #[error("append task failed: {reason}")]
    Task { reason: String },
}

/// One appended, demuxed unit of media.
#[derive(Debug)]
pub struct Fragment {
    file: Arc<NamedTempFile>,
    raw_data: Bytes,
    start_time: f64,
    end_time: f64,
    // Sub-range surviving partial removal. Removal currently drops only
    // fully-contained fragments, so these always equal the full range.
    clipped_start: f64,
    clipped_end: f64,
}

impl Fragment {
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn raw_data(&self) -> &Bytes {
        &self.raw_data
    }
}

/// Result of the off-main-context append work: the payload persisted to
/// a fresh temp file plus its extracted timing.
#[derive(Debug)]
pub struct PreparedAppend {
    file: Arc<NamedTempFile>,
    data: Bytes,
    timing: FragmentTiming,
}

/// What applying a completed append did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendApplied {
    /// The completion's operation id no longer matches; the result was
    /// discarded wholesale.
    Stale,
    /// Zero-duration payload stored as initialization data for all
    /// subsequent fragments.
    InitializationStored,
    FragmentAdded,
}

/// Append/remove/abort state machine over an ordered fragment list.
///
/// Coverage is always exactly the union of the fragments' ranges; every
/// mutation recomputes it before it becomes observable.
#[derive(Debug)]
pub struct FragmentBuffer {
    media_source_id: u64,
    mime_type: String,
    initialization_data: Option<Bytes>,
    fragments: Vec<Fragment>,
    ranges: RangeSet<f64>,
    operation_id: u64,
}

impl FragmentBuffer {
    pub fn new(media_source_id: u64, mime_type: impl Into<String>) -> Self {
        Self {
            media_source_id,
            mime_type: mime_type.into(),
            initialization_data: None,
            fragments: Vec::new(),
            ranges: RangeSet::new(),
            operation_id: 0,
        }
    }

    pub fn media_source_id(&self) -> u64 {
        self.media_source_id
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn ranges(&self) -> &RangeSet<f64> {
        &self.ranges
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn initialization_data(&self) -> Option<Bytes> {
        self.initialization_data.clone()
    }

    /// Start an append: bumps the operation id and returns the id the
    /// eventual completion must present.
    pub fn begin_operation(&mut self) -> u64 {
        self.operation_id += 1;
        self.operation_id
    }

    /// Invalidate any in-flight operation. Immediate for state; the
    /// in-flight work itself is not killed, only its result discarded.
    pub fn abort(&mut self) {
        self.operation_id += 1;
    }

    pub fn is_current_operation(&self, operation_id: u64) -> bool {
        self.operation_id == operation_id
    }

    /// CPU-bound half of an append, run off the main context: persist
    /// initialization bytes plus payload to a fresh temp file and
    /// extract fragment timing.
    pub fn prepare_append(
        initialization_data: Option<Bytes>,
        data: Bytes,
    ) -> Result<PreparedAppend, AppendError> {
        let mut file = NamedTempFile::new()?;
        if let Some(init) = &initialization_data {
            file.write_all(init)?;
        }
        file.write_all(&data)?;
        file.flush()?;

        let timing = if let Some(init) = &initialization_data {
            let mut combined = Vec::with_capacity(init.len() + data.len());
            combined.extend_from_slice(init);
            combined.extend_from_slice(&data);
            read_fragment_timing(&combined)
        } else {
            read_fragment_timing(&data)
        }
        .ok_or(AppendError::Demux)?;

        Ok(PreparedAppend {
            file: Arc::new(file),
            data,
            timing,
        })
    }

    /// Apply a completed append on the main context. A completion whose
    /// operation id is stale is discarded without touching any state.
    pub fn apply_append(&mut self, operation_id: u64, prepared: PreparedAppend) -> AppendApplied {
        if !self.is_current_operation(operation_id) {
            debug!(
                media_source_id = self.media_source_id,
                operation_id, "discarding stale append completion"
            );
            return AppendApplied::Stale;
        }

        if prepared.timing.is_initialization_only() {
            self.initialization_data = Some(prepared.data);
            return AppendApplied::InitializationStored;
        }

        self.fragments.push(Fragment {
            file: prepared.file,
            raw_data: prepared.data,
            start_time: prepared.timing.start_time,
            end_time: prepared.timing.end_time,
            clipped_start: prepared.timing.start_time,
            clipped_end: prepared.timing.end_time,
        });
        self.recompute_ranges();
        AppendApplied::FragmentAdded
    }

    /// Remove every fragment fully contained in `[start, end)`.
    ///
    /// Fragments only partially overlapping the range are left in place
    /// untouched rather than clipped.
    pub fn remove(&mut self, start: f64, end: f64) {
        self.fragments
            .retain(|fragment| !(fragment.start_time >= start && fragment.end_time <= end));
        self.recompute_ranges();
    }

    /// Ordered playable parts for the native pipeline.
    pub fn parts(&self) -> Vec<PlayerPart> {
        let mut parts: Vec<PlayerPart> = self
            .fragments
            .iter()
            .map(|fragment| PlayerPart {
                start_time: fragment.start_time,
                end_time: fragment.end_time,
                file: fragment.file.clone(),
            })
            .collect();
        parts.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        parts
    }

    fn recompute_ranges(&mut self) {
        self.ranges.clear();
        for fragment in &self.fragments {
            // Millisecond rounding keeps float jitter from opening
            // hairline gaps between adjacent fragments.
            let start = round_to_millis(fragment.clipped_start);
            let end = round_to_millis(fragment.clipped_end);
            self.ranges.union(start, end);
        }
    }
}

fn round_to_millis(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
