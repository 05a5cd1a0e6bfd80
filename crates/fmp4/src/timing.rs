//! Fragment timing extraction.
//!
//! Treats the container as an opaque byte buffer: given an appended
//! payload (initialization bytes plus one media fragment, concatenated),
//! report where the fragment sits on the playback timeline. A payload
//! that carries only initialization data (`moov` without `moof`/`sidx`)
//! reports a zero duration.

use tracing::trace;

use crate::boxes::{boxes, find_box, find_path, full_box, read_u32, read_u64};

/// Presentation interval `[start_time, end_time)` of one media fragment,
/// in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentTiming {
    pub start_time: f64,
    pub end_time: f64,
}

impl FragmentTiming {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Whether the payload contained no playable samples.
    pub fn is_initialization_only(&self) -> bool {
        self.duration() == 0.0
    }
}

/// Extract fragment timing from a byte buffer.
///
/// Prefers `sidx` when present (it carries its own timescale); otherwise
/// combines `moof/traf/tfdt` with `trun` sample durations against the
/// media timescale from the init `moov`. Returns `None` when the buffer
/// cannot be interpreted; the caller drops the append in that case.
pub fn read_fragment_timing(data: &[u8]) -> Option<FragmentTiming> {
    let mut moov = None;
    let mut sidx = None;
    let mut moof = None;

    for parsed in boxes(data) {
        match &parsed.kind {
            b"moov" if moov.is_none() => moov = Some(parsed.body),
            b"sidx" if sidx.is_none() => sidx = Some(parsed.body),
            b"moof" if moof.is_none() => moof = Some(parsed.body),
            _ => {}
        }
    }

    if let Some(body) = sidx {
        return timing_from_sidx(body);
    }

    if let Some(moof_body) = moof {
        let Some(moov_body) = moov else {
            trace!("media fragment without initialization data");
            return None;
        };
        return timing_from_moof(moof_body, moov_body);
    }

    if moov.is_some() {
        // Initialization-only payload.
        return Some(FragmentTiming {
            start_time: 0.0,
            end_time: 0.0,
        });
    }

    trace!("no moov, sidx or moof box in payload");
    None
}

fn timing_from_sidx(body: &[u8]) -> Option<FragmentTiming> {
    let (version, _, payload) = full_box(body)?;

    let timescale = read_u32(payload, 4)?;
    if timescale == 0 {
        return None;
    }

    let (earliest, refs_at) = if version == 0 {
        (read_u32(payload, 8)? as u64, 16)
    } else {
        (read_u64(payload, 8)?, 24)
    };

    let reference_count = u16::from_be_bytes([
        *payload.get(refs_at + 2)?,
        *payload.get(refs_at + 3)?,
    ]) as usize;

    let mut total: u64 = 0;
    let mut at = refs_at + 4;
    for _ in 0..reference_count {
        total += read_u32(payload, at + 4)? as u64;
        at += 12;
    }

    let start_time = earliest as f64 / timescale as f64;
    Some(FragmentTiming {
        start_time,
        end_time: start_time + total as f64 / timescale as f64,
    })
}

fn timing_from_moof(moof_body: &[u8], moov_body: &[u8]) -> Option<FragmentTiming> {
    let timescale = media_timescale(moov_body)?;

    // Single-track fragments: the first traf is authoritative.
    let traf = find_box(moof_body, b"traf")?;

    let base_time = {
        let tfdt = find_box(traf.body, b"tfdt")?;
        let (version, _, payload) = full_box(tfdt.body)?;
        if version == 1 {
            read_u64(payload, 0)?
        } else {
            read_u32(payload, 0)? as u64
        }
    };

    let default_duration =
        tfhd_default_sample_duration(traf.body).or_else(|| trex_default_sample_duration(moov_body));

    let mut total: u64 = 0;
    for child in boxes(traf.body) {
        if child.kind == *b"trun" {
            total += trun_duration(child.body, default_duration)?;
        }
    }

    let start_time = base_time as f64 / timescale as f64;
    Some(FragmentTiming {
        start_time,
        end_time: start_time + total as f64 / timescale as f64,
    })
}

fn media_timescale(moov_body: &[u8]) -> Option<u32> {
    let mdhd = find_path(moov_body, &[*b"trak", *b"mdia", *b"mdhd"])?;
    let (version, _, payload) = full_box(mdhd.body)?;
    let timescale = if version == 1 {
        read_u32(payload, 16)?
    } else {
        read_u32(payload, 8)?
    };
    (timescale != 0).then_some(timescale)
}

fn tfhd_default_sample_duration(traf_body: &[u8]) -> Option<u32> {
    let tfhd = find_box(traf_body, b"tfhd")?;
    let (_, flags, payload) = full_box(tfhd.body)?;

    if flags & 0x000008 == 0 {
        return None;
    }

    let mut at = 4;
    if flags & 0x000001 != 0 {
        at += 8;
    }
    if flags & 0x000002 != 0 {
        at += 4;
    }
    read_u32(payload, at)
}

fn trex_default_sample_duration(moov_body: &[u8]) -> Option<u32> {
    let trex = find_path(moov_body, &[*b"mvex", *b"trex"])?;
    let (_, _, payload) = full_box(trex.body)?;
    read_u32(payload, 8)
}

fn trun_duration(body: &[u8], default_duration: Option<u32>) -> Option<u64> {
    let (_, flags, payload) = full_box(body)?;
    let sample_count = read_u32(payload, 0)? as usize;

    let mut at = 4;
    if flags & 0x000001 != 0 {
        at += 4;
    }
    if flags & 0x000004 != 0 {
        at += 4;
    }

    let has_duration = flags & 0x000100 != 0;
    if !has_duration {
        return Some(sample_count as u64 * default_duration? as u64);
    }

    let mut per_sample = 0;
    if flags & 0x000200 != 0 {
        per_sample += 4;
    }
    if flags & 0x000400 != 0 {
        per_sample += 4;
    }
    if flags & 0x000800 != 0 {
        per_sample += 4;
    }

    let mut total: u64 = 0;
    for _ in 0..sample_count {
        total += read_u32(payload, at)? as u64;
        at += 4 + per_sample;
    }
    Some(total)
}
