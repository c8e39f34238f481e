//! Splitting encrypted tokens into exchange-sized packets.
//!
//! The exchange rejects uploads above a configured size, so an encrypted
//! response is bisected until every piece fits. Fragments carry no framing of
//! their own: concatenating them in order yields the original token.

/// Split `data` into ordered fragments of at most `max_bytes` bytes each.
///
/// Fragments are produced by repeated halving, so they are roughly equal in
/// size. Splits never fall inside a UTF-8 sequence; a single character wider
/// than `max_bytes` is emitted on its own. A `max_bytes` of zero is treated
/// as one.
pub fn chunk(data: &str, max_bytes: usize) -> Vec<&str> {
    let mut fragments = Vec::with_capacity(data.len() / max_bytes.max(1) + 1);
    bisect(data, max_bytes.max(1), &mut fragments);
    fragments
}

fn bisect<'a>(data: &'a str, max_bytes: usize, out: &mut Vec<&'a str>) {
    if data.len() <= max_bytes {
        out.push(data);
        return;
    }

    let mut mid = data.len() / 2;
    while mid > 0 && !data.is_char_boundary(mid) {
        mid -= 1;
    }
    if mid == 0 {
        out.push(data);
        return;
    }

    let (first, second) = data.split_at(mid);
    bisect(first, max_bytes, out);
    bisect(second, max_bytes, out);
}
