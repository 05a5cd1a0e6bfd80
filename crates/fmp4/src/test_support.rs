//! Builders for synthetic ISOBMFF payloads used in tests.
//!
//! These produce just enough box structure for timing extraction; they
//! are not playable media.

/// Serialize one box with a 32-bit size header.
pub fn mp4_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&(8 + body.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

fn full_box_body(version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.push(version);
    out.extend_from_slice(&flags.to_be_bytes()[1..]);
    out.extend_from_slice(payload);
    out
}

#[derive(Debug, Clone)]
pub struct InitSegmentOptions {
    pub timescale: u32,
    pub trex_default_duration: Option<u32>,
}

impl InitSegmentOptions {
    pub fn new(timescale: u32) -> Self {
        Self {
            timescale,
            trex_default_duration: None,
        }
    }

    pub fn with_trex_default_duration(mut self, duration: u32) -> Self {
        self.trex_default_duration = Some(duration);
        self
    }
}

/// Build an initialization segment: `ftyp` plus a `moov` carrying one
/// track whose `mdhd` declares the given timescale.
pub fn make_init_segment(options: &InitSegmentOptions) -> Vec<u8> {
    let mut mdhd_payload = Vec::new();
    mdhd_payload.extend_from_slice(&0u32.to_be_bytes()); // creation
    mdhd_payload.extend_from_slice(&0u32.to_be_bytes()); // modification
    mdhd_payload.extend_from_slice(&options.timescale.to_be_bytes());
    mdhd_payload.extend_from_slice(&0u32.to_be_bytes()); // duration
    mdhd_payload.extend_from_slice(&[0x55, 0xC4, 0, 0]); // language + predefined
    let mdhd = mp4_box(b"mdhd", &full_box_body(0, 0, &mdhd_payload));

    let mdia = mp4_box(b"mdia", &mdhd);
    let trak = mp4_box(b"trak", &mdia);

    let mut moov_body = trak;
    if let Some(duration) = options.trex_default_duration {
        let mut trex_payload = Vec::new();
        trex_payload.extend_from_slice(&1u32.to_be_bytes()); // track_id
        trex_payload.extend_from_slice(&1u32.to_be_bytes()); // sample description index
        trex_payload.extend_from_slice(&duration.to_be_bytes());
        trex_payload.extend_from_slice(&0u32.to_be_bytes()); // sample size
        trex_payload.extend_from_slice(&0u32.to_be_bytes()); // sample flags
        let trex = mp4_box(b"trex", &full_box_body(0, 0, &trex_payload));
        moov_body.extend_from_slice(&mp4_box(b"mvex", &trex));
    }

    let mut out = mp4_box(b"ftyp", b"iso5\x00\x00\x00\x01iso5");
    out.extend_from_slice(&mp4_box(b"moov", &moov_body));
    out
}

fn make_tfdt(base_decode_time: u64) -> Vec<u8> {
    mp4_box(b"tfdt", &full_box_body(1, 0, &base_decode_time.to_be_bytes()))
}

/// Build a media fragment whose `trun` carries explicit per-sample
/// durations.
pub fn make_media_fragment(base_decode_time: u64, sample_durations: &[u32]) -> Vec<u8> {
    let tfhd = mp4_box(b"tfhd", &full_box_body(0, 0, &1u32.to_be_bytes()));

    let mut trun_payload = Vec::new();
    trun_payload.extend_from_slice(&(sample_durations.len() as u32).to_be_bytes());
    for duration in sample_durations {
        trun_payload.extend_from_slice(&duration.to_be_bytes());
    }
    let trun = mp4_box(b"trun", &full_box_body(0, 0x000100, &trun_payload));

    let mut traf_body = tfhd;
    traf_body.extend_from_slice(&make_tfdt(base_decode_time));
    traf_body.extend_from_slice(&trun);

    let moof = mp4_box(b"moof", &mp4_box(b"traf", &traf_body));
    let mut out = moof;
    out.extend_from_slice(&mp4_box(b"mdat", &[0u8; 16]));
    out
}

/// Build a media fragment whose sample duration comes from the `tfhd`
/// default rather than the `trun`.
pub fn make_media_fragment_with_default(
    base_decode_time: u64,
    sample_count: u32,
    default_duration: u32,
) -> Vec<u8> {
    let mut tfhd_payload = Vec::new();
    tfhd_payload.extend_from_slice(&1u32.to_be_bytes());
    tfhd_payload.extend_from_slice(&default_duration.to_be_bytes());
    let tfhd = mp4_box(b"tfhd", &full_box_body(0, 0x000008, &tfhd_payload));

    let trun = mp4_box(
        b"trun",
        &full_box_body(0, 0, &sample_count.to_be_bytes()),
    );

    let mut traf_body = tfhd;
    traf_body.extend_from_slice(&make_tfdt(base_decode_time));
    traf_body.extend_from_slice(&trun);

    let moof = mp4_box(b"moof", &mp4_box(b"traf", &traf_body));
    let mut out = moof;
    out.extend_from_slice(&mp4_box(b"mdat", &[0u8; 16]));
    out
}

/// Build a media fragment with no duration information of its own, so
/// extraction must fall back to the init segment's `trex` default.
pub fn make_media_fragment_without_durations(base_decode_time: u64, sample_count: u32) -> Vec<u8> {
    let tfhd = mp4_box(b"tfhd", &full_box_body(0, 0, &1u32.to_be_bytes()));
    let trun = mp4_box(
        b"trun",
        &full_box_body(0, 0, &sample_count.to_be_bytes()),
    );

    let mut traf_body = tfhd;
    traf_body.extend_from_slice(&make_tfdt(base_decode_time));
    traf_body.extend_from_slice(&trun);

    let moof = mp4_box(b"moof", &mp4_box(b"traf", &traf_body));
    let mut out = moof;
    out.extend_from_slice(&mp4_box(b"mdat", &[0u8; 16]));
    out
}

/// Build a standalone `sidx`-indexed fragment.
pub fn make_sidx_fragment(
    timescale: u32,
    earliest_presentation_time: u32,
    subsegment_durations: &[u32],
) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&1u32.to_be_bytes()); // reference_id
    payload.extend_from_slice(&timescale.to_be_bytes());
    payload.extend_from_slice(&earliest_presentation_time.to_be_bytes());
    payload.extend_from_slice(&0u32.to_be_bytes()); // first_offset
    payload.extend_from_slice(&0u16.to_be_bytes()); // reserved
    payload.extend_from_slice(&(subsegment_durations.len() as u16).to_be_bytes());
    for duration in subsegment_durations {
        payload.extend_from_slice(&0u32.to_be_bytes()); // reference type + size
        payload.extend_from_slice(&duration.to_be_bytes());
        payload.extend_from_slice(&0u32.to_be_bytes()); // SAP info
    }

    let mut out = mp4_box(b"sidx", &full_box_body(0, 0, &payload));
    out.extend_from_slice(&mp4_box(b"mdat", &[0u8; 16]));
    out
}
