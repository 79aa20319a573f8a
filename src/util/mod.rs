//! Utility functions shared by the extractor, the writer and the CLI.
//!
//! - **XML text**: sanitizing untrusted feed text for re-embedding
//! - **URL validation**: vetting feed list entries before fetching
//! - **Text width**: Unicode-aware column layout for the change table
//!
//! # Examples
//!
//! ```
//! use ymlmerge::util::{sanitize_text, validate_feed_url, QuotePolicy};
//!
//! let url = validate_feed_url("https://supplier.example.com/export.yml", false).unwrap();
//! let safe = sanitize_text("Salt & Pepper", QuotePolicy::Keep);
//! assert_eq!(safe, "Salt &amp; Pepper");
//! ```

mod text;
mod url_validator;
mod xml_text;

pub use text::{display_width, pad_to_width, truncate_to_width};
pub use url_validator::{validate_feed_url, UrlValidationError};
pub use xml_text::{sanitize_attr, sanitize_text, unescape_text, QuotePolicy};
