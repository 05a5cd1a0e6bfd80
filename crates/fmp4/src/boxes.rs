/// A single ISOBMFF box sliced out of its parent byte range.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoxSlice<'a> {
    pub(crate) kind: [u8; 4],
    pub(crate) body: &'a [u8],
}

/// Parse the box starting at the head of `data`.
///
/// Returns the box and the remainder after it. Handles 32-bit sizes,
/// 64-bit extended sizes (`size == 1`) and box-extends-to-end
/// (`size == 0`).
pub(crate) fn parse_box(data: &[u8]) -> Option<(BoxSlice<'_>, &[u8])> {
    if data.len() < 8 {
        return None;
    }

    let declared = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
    let kind = [data[4], data[5], data[6], data[7]];

    let (total, header_len) = match declared {
        0 => (data.len(), 8),
        1 => {
            if data.len() < 16 {
                return None;
            }
            let ext = u64::from_be_bytes([
                data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
            ]);
            (usize::try_from(ext).ok()?, 16)
        }
        n => (usize::try_from(n).ok()?, 8),
    };

    if total < header_len || total > data.len() {
        return None;
    }

    let boxed = BoxSlice {
        kind,
        body: &data[header_len..total],
    };
    Some((boxed, &data[total..]))
}

/// Iterate the sibling boxes laid out back-to-back in `data`.
pub(crate) fn boxes(data: &[u8]) -> impl Iterator<Item = BoxSlice<'_>> {
    let mut rest = data;
    std::iter::from_fn(move || {
        let (parsed, tail) = parse_box(rest)?;
        rest = tail;
        Some(parsed)
    })
}

/// Find the first sibling box of the given kind in `data`.
pub(crate) fn find_box<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<BoxSlice<'a>> {
    boxes(data).find(|b| b.kind == *kind)
}

/// Descend through nested container boxes, one kind per level.
pub(crate) fn find_path<'a>(data: &'a [u8], path: &[[u8; 4]]) -> Option<BoxSlice<'a>> {
    let (first, rest) = path.split_first()?;
    let mut current = find_box(data, first)?;
    for kind in rest {
        current = find_box(current.body, kind)?;
    }
    Some(current)
}

/// Split a full-box body into `(version, flags, payload)`.
pub(crate) fn full_box(body: &[u8]) -> Option<(u8, u32, &[u8])> {
    if body.len() < 4 {
        return None;
    }
    let version = body[0];
    let flags = ((body[1] as u32) << 16) | ((body[2] as u32) << 8) | body[3] as u32;
    Some((version, flags, &body[4..]))
}

pub(crate) fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    let bytes = data.get(at..at + 8)?;
    Some(u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}
