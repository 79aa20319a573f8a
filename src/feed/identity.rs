use sha2::{Digest, Sha256};

/// Bytes of the SHA-256 digest kept for content-derived ids (128 bits).
const CONTENT_ID_BYTES: usize = 16;

/// Derives the global id of an offer.
///
/// The base is the vendor code when present, else the feed-local id, else a
/// 128-bit content digest of the raw offer bytes. It is lower-cased and every
/// character outside `[a-z0-9_-]` becomes `_`. The feed prefix keeps two
/// feeds that reuse a vendor code from colliding; the same physical product
/// listed by two feeds therefore stays two entries.
///
/// ```
/// use ymlmerge::feed::resolve_id;
///
/// assert_eq!(resolve_id("f1", Some("X1"), "77", b"<offer/>"), "f1_x1");
/// assert_eq!(resolve_id("acme", None, "SKU 9/B", b"<offer/>"), "acme_sku_9_b");
/// ```
pub fn resolve_id(prefix: &str, vendor_code: Option<&str>, local_id: &str, raw: &[u8]) -> String {
    let base = match vendor_code.map(str::trim).filter(|v| !v.is_empty()) {
        Some(code) => normalize(code),
        None if !local_id.trim().is_empty() => normalize(local_id.trim()),
        None => content_id(raw),
    };
    format!("{prefix}_{base}")
}

fn normalize(base: &str) -> String {
    base.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

/// Hex digest of the offer bytes, already within the id alphabet.
fn content_id(raw: &[u8]) -> String {
    let digest = Sha256::digest(raw);
    digest[..CONTENT_ID_BYTES]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
