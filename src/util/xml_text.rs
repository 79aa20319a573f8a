//! Re-embedding of untrusted feed text as XML character data.
//!
//! Supplier feeds routinely ship bare ampersands, HTML entities that have no
//! meaning without a DTD, stray angle brackets and control bytes. Everything
//! the extractor copies into an output shard goes through [`sanitize_text`],
//! which is idempotent so already-clean text passes through untouched.

use std::borrow::Cow;

use serde::Deserialize;

/// What to do with `"` characters found in text content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotePolicy {
    /// Leave double quotes as they are.
    #[default]
    Keep,
    /// Replace every `"` with `'`.
    Normalize,
}

/// The five entities every XML parser understands without a DTD.
const XML_ENTITIES: [&str; 5] = ["amp", "lt", "gt", "quot", "apos"];

/// HTML entities common in supplier descriptions, mapped to code points.
const HTML_ENTITIES: [(&str, u32); 16] = [
    ("nbsp", 160),
    ("ndash", 8211),
    ("mdash", 8212),
    ("laquo", 171),
    ("raquo", 187),
    ("hellip", 8230),
    ("copy", 169),
    ("reg", 174),
    ("trade", 8482),
    ("deg", 176),
    ("times", 215),
    ("bull", 8226),
    ("lsquo", 8216),
    ("rsquo", 8217),
    ("ldquo", 8220),
    ("rdquo", 8221),
];

/// Longest entity body (between `&` and `;`) worth looking at.
const MAX_ENTITY_LEN: usize = 10;

enum EntityRef {
    /// A reference that is already valid XML; copy `len` bytes verbatim.
    Keep(usize),
    /// A known HTML entity of `len` bytes to rewrite as a numeric reference.
    Numeric(usize, u32),
    /// Not a usable reference; the `&` must be escaped.
    Bare,
}

/// Makes `text` safe to embed as XML character content.
///
/// Applied in order:
/// 1. characters that XML 1.0 forbids (C0 controls other than tab/LF/CR,
///    DEL, U+FFFE, U+FFFF) are removed
/// 2. `&` that does not start a recognized reference becomes `&amp;`;
///    predefined and numeric references are kept, common HTML named
///    entities are rewritten to numeric form
/// 3. `<` and `>` become `&lt;` and `&gt;`
/// 4. with [`QuotePolicy::Normalize`], `"` becomes `'`
///
/// Returns `Cow::Borrowed` when nothing needs changing.
///
/// # Examples
///
/// ```
/// use ymlmerge::util::{sanitize_text, QuotePolicy};
///
/// assert_eq!(sanitize_text("Tom & Jerry", QuotePolicy::Keep), "Tom &amp; Jerry");
/// assert_eq!(sanitize_text("a &amp; b", QuotePolicy::Keep), "a &amp; b");
/// assert_eq!(sanitize_text("1 < 2", QuotePolicy::Keep), "1 &lt; 2");
/// assert_eq!(sanitize_text("15&nbsp;kg", QuotePolicy::Keep), "15&#160;kg");
/// assert_eq!(sanitize_text("21\" TV", QuotePolicy::Normalize), "21' TV");
/// ```
pub fn sanitize_text(text: &str, quotes: QuotePolicy) -> Cow<'_, str> {
    let normalize_quotes = quotes == QuotePolicy::Normalize;

    // Fast path: most field values are plain words and numbers
    let needs_work = text.chars().any(|c| {
        matches!(c, '&' | '<' | '>') || is_illegal_xml_char(c) || (normalize_quotes && c == '"')
    });
    if !needs_work {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 16);
    let mut i = 0;

    while let Some(c) = text[i..].chars().next() {
        match c {
            '&' => match classify_entity(&text[i..]) {
                EntityRef::Keep(len) => {
                    out.push_str(&text[i..i + len]);
                    i += len;
                    continue;
                }
                EntityRef::Numeric(len, code) => {
                    out.push_str(&format!("&#{code};"));
                    i += len;
                    continue;
                }
                EntityRef::Bare => out.push_str("&amp;"),
            },
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if normalize_quotes => out.push('\''),
            c if is_illegal_xml_char(c) => {}
            c => out.push(c),
        }
        i += c.len_utf8();
    }

    Cow::Owned(out)
}

/// Sanitizes an attribute value for use inside double quotes.
pub fn sanitize_attr(value: &str, quotes: QuotePolicy) -> String {
    sanitize_text(value, quotes).replace('"', "&quot;")
}

/// Resolves references in sanitized text back to plain characters.
///
/// Used when a field value has to be compared or hashed rather than copied.
/// Text that fails to unescape is returned as-is.
pub fn unescape_text(text: &str) -> Cow<'_, str> {
    match quick_xml::escape::unescape(text) {
        Ok(plain) => plain,
        Err(_) => Cow::Borrowed(text),
    }
}

fn is_illegal_xml_char(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{7f}' | '\u{fffe}' | '\u{ffff}')
}

/// Classifies the reference starting at `s` (which begins with `&`).
fn classify_entity(s: &str) -> EntityRef {
    let body_end = match s
        .bytes()
        .take(MAX_ENTITY_LEN + 2)
        .skip(1)
        .position(|b| b == b';')
    {
        Some(pos) if pos > 0 => pos + 1,
        _ => return EntityRef::Bare,
    };
    let body = &s[1..body_end];
    let len = body_end + 1;

    if let Some(num) = body.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) if is_all(hex, |b| b.is_ascii_hexdigit()) => u32::from_str_radix(hex, 16),
            None if is_all(num, |b| b.is_ascii_digit()) => num.parse::<u32>(),
            _ => return EntityRef::Bare,
        };
        return match code.ok().and_then(char::from_u32) {
            Some(c) if !is_illegal_xml_char(c) => EntityRef::Keep(len),
            _ => EntityRef::Bare,
        };
    }

    if XML_ENTITIES.contains(&body) {
        return EntityRef::Keep(len);
    }
    match HTML_ENTITIES.iter().find(|(name, _)| *name == body) {
        Some((_, code)) => EntityRef::Numeric(len, *code),
        None => EntityRef::Bare,
    }
}

fn is_all(s: &str, pred: impl Fn(u8) -> bool) -> bool {
    !s.is_empty() && s.bytes().all(pred)
}
