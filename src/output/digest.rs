use sha2::{Digest, Sha256};

const ROOT_TAG: &[u8] = b"<yml_catalog";
const DATE_ATTR: &[u8] = b" date=\"";

/// SHA-256 of a shard, ignoring the value of the root `date` attribute.
///
/// Two renderings of the same catalog made at different times hash the
/// same. Documents without a dated root are hashed whole.
pub fn stable_digest(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    match date_value_span(bytes) {
        Some((start, end)) => {
            hasher.update(&bytes[..start]);
            hasher.update(&bytes[end..]);
        }
        None => hasher.update(bytes),
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Byte range of the root element's `date` value, quotes excluded.
fn date_value_span(bytes: &[u8]) -> Option<(usize, usize)> {
    let root = find(bytes, ROOT_TAG)?;
    let tag_len = bytes[root..].iter().position(|&b| b == b'>')?;
    let tag = &bytes[root..root + tag_len];
    let start = find(tag, DATE_ATTR)? + DATE_ATTR.len();
    let len = tag[start..].iter().position(|&b| b == b'"')?;
    Some((root + start, root + start + len))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
