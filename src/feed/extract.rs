//! Incremental extraction of `<offer>` elements from a feed payload.
//!
//! The extractor never builds a document tree. It walks the payload with a
//! `quick_xml` pull reader, materializes one offer at a time and hands it out
//! as soon as its closing tag is seen. Broken fragments are dropped and the
//! scan resynchronizes on the next `<offer` tag, so a damaged feed still
//! yields every offer that can be read.

use std::collections::HashSet;
use std::io::{self, BufRead};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::catalog::{Category, Field, Node, Offer};
use crate::feed::identity::resolve_id;
use crate::feed::payload::Payload;
use crate::feed::FeedDescriptor;
use crate::util::{sanitize_attr, sanitize_text, QuotePolicy};

const OFFER_TAG: &[u8] = b"offer";
const CATEGORY_TAG: &[u8] = b"category";

/// Counters and diagnostics for one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    /// Offers handed out by the iterator.
    pub yielded: usize,
    /// Offers dropped for a blank or missing `name` or `price`.
    pub incomplete: usize,
    /// Offers dropped because their id was already yielded by this pass.
    pub duplicates: usize,
    /// Malformed fragments skipped by resynchronizing on the next offer.
    pub recovered: usize,
    /// Set when a parse error left nothing to resynchronize on, or the
    /// payload could not be read; the rest of it was abandoned.
    pub aborted: Option<String>,
    /// `<category>` definitions found outside offers, first occurrence wins.
    pub categories: Vec<Category>,
}

/// A complete offer element before validation and identity resolution.
struct RawOffer {
    attributes: Vec<(String, String)>,
    fields: Vec<Field>,
    start: u64,
    end: u64,
}

/// How reading a single offer element went wrong.
enum OfferError {
    /// Unrecoverable at this position; resync after the current read point.
    Malformed(String),
    /// A new top-level `<offer` began at this absolute offset before the
    /// current one closed; resync exactly there.
    Unterminated(u64),
}

/// Lazily yields sanitized, identified offers from a [`Payload`].
///
/// Single pass and not restartable: build a new extractor to scan again.
/// Only the offer being read is held in memory. Offer ids are unique within
/// one pass; later repeats are dropped with a warning. Progress and drop
/// counts are available from [`report`] at any point, and are final once
/// the iterator returns `None`.
///
/// [`report`]: OfferExtractor::report
pub struct OfferExtractor<P: Payload> {
    payload: P,
    reader: Option<Reader<P::Source>>,
    /// Absolute offset the current reader started at.
    base: u64,
    feed_index: usize,
    prefix: String,
    quotes: QuotePolicy,
    seen: HashSet<String>,
    category_ids: HashSet<String>,
    report: ExtractReport,
    finished: bool,
}

impl<P: Payload> OfferExtractor<P> {
    pub fn new(payload: P, feed: &FeedDescriptor, quotes: QuotePolicy) -> Self {
        let mut extractor = Self {
            payload,
            reader: None,
            base: 0,
            feed_index: feed.index,
            prefix: feed.prefix().into_owned(),
            quotes,
            seen: HashSet::new(),
            category_ids: HashSet::new(),
            report: ExtractReport::default(),
            finished: false,
        };
        extractor.restart_at(0);
        extractor
    }

    pub fn report(&self) -> &ExtractReport {
        &self.report
    }

    pub fn into_report(self) -> ExtractReport {
        self.report
    }

    /// Absolute offset of the current read point.
    fn offset(&self) -> u64 {
        self.base + self.reader.as_ref().map_or(0, |r| r.buffer_position())
    }

    fn next_event<'b>(&mut self, buf: &'b mut Vec<u8>) -> quick_xml::Result<Event<'b>> {
        buf.clear();
        match self.reader.as_mut() {
            Some(reader) => reader.read_event_into(buf),
            None => Ok(Event::Eof),
        }
    }

    /// Absolute offset of the `<` of a start tag that was just consumed.
    fn start_of(&self, tag: &BytesStart<'_>) -> u64 {
        self.offset().saturating_sub(tag.len() as u64 + 2)
    }

    /// Scans forward to the next complete top-level offer element.
    fn next_raw(&mut self) -> Option<RawOffer> {
        let mut buf = Vec::new();
        loop {
            match self.next_event(&mut buf) {
                Ok(Event::Start(e)) if e.name().as_ref() == OFFER_TAG => {
                    let start = self.start_of(&e);
                    match self.read_offer(&e, start) {
                        Ok(raw) => return Some(raw),
                        Err(OfferError::Malformed(msg)) => {
                            tracing::warn!(
                                feed = self.feed_index,
                                offset = start,
                                error = %msg,
                                "Dropping malformed offer"
                            );
                            let from = self.offset();
                            if !self.resync(from, &msg) {
                                return None;
                            }
                        }
                        Err(OfferError::Unterminated(at)) => {
                            tracing::warn!(
                                feed = self.feed_index,
                                offset = start,
                                "Dropping offer not terminated before the next one"
                            );
                            self.report.recovered += 1;
                            if !self.restart_at(at) {
                                return None;
                            }
                        }
                    }
                }
                Ok(Event::Empty(e)) if e.name().as_ref() == OFFER_TAG => {
                    // A self-closing offer has no name or price
                    self.report.incomplete += 1;
                }
                Ok(Event::Start(e)) if e.name().as_ref() == CATEGORY_TAG => {
                    if let Err(msg) = self.read_category(&e) {
                        let from = self.offset();
                        if !self.resync(from, &msg) {
                            return None;
                        }
                    }
                }
                Ok(Event::Eof) => {
                    self.finished = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    let msg = e.to_string();
                    let from = self.offset();
                    if !self.resync(from, &msg) {
                        return None;
                    }
                }
            }
        }
    }

    /// Reads the body of an offer whose start tag was just consumed.
    fn read_offer(&mut self, start_tag: &BytesStart<'_>, start: u64) -> Result<RawOffer, OfferError> {
        let attributes = self.attributes(start_tag).map_err(OfferError::Malformed)?;
        let mut fields: Vec<Field> = Vec::new();
        let mut open: Vec<Field> = Vec::new();
        let mut buf = Vec::new();

        loop {
            let event = self
                .next_event(&mut buf)
                .map_err(|e| OfferError::Malformed(e.to_string()))?;

            match event {
                Event::Start(e) if e.name().as_ref() == OFFER_TAG => {
                    return Err(OfferError::Unterminated(self.start_of(&e)));
                }
                Event::Start(e) => {
                    let mut field = Field::new(tag_name(&e));
                    field.attributes = self.attributes(&e).map_err(OfferError::Malformed)?;
                    open.push(field);
                }
                Event::Empty(e) => {
                    let mut field = Field::new(tag_name(&e));
                    field.attributes = self.attributes(&e).map_err(OfferError::Malformed)?;
                    attach(&mut open, &mut fields, Node::Element(field));
                }
                Event::Text(t) => self.push_text(&mut open, &t),
                Event::CData(c) => self.push_text(&mut open, &c),
                Event::End(e) => {
                    let name = e.name();
                    match open.pop() {
                        Some(field) if field.name.as_bytes() == name.as_ref() => {
                            attach(&mut open, &mut fields, Node::Element(field));
                        }
                        Some(field) => {
                            return Err(OfferError::Malformed(format!(
                                "expected </{}>, found </{}>",
                                field.name,
                                String::from_utf8_lossy(name.as_ref())
                            )));
                        }
                        None if name.as_ref() == OFFER_TAG => {
                            return Ok(RawOffer {
                                attributes,
                                fields,
                                start,
                                end: self.offset(),
                            });
                        }
                        None => {
                            return Err(OfferError::Malformed(format!(
                                "expected </offer>, found </{}>",
                                String::from_utf8_lossy(name.as_ref())
                            )));
                        }
                    }
                }
                Event::Eof => {
                    return Err(OfferError::Malformed("unexpected end of input inside offer".into()));
                }
                _ => {}
            }
        }
    }

    /// Records a `<category id="..">name</category>` definition.
    fn read_category(&mut self, start_tag: &BytesStart<'_>) -> Result<(), String> {
        let id = self
            .attributes(start_tag)?
            .into_iter()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v)
            .unwrap_or_default();
        let mut name = String::new();
        let mut buf = Vec::new();

        loop {
            match self.next_event(&mut buf).map_err(|e| e.to_string())? {
                Event::Text(t) => name.push_str(&self.clean(&t)),
                Event::CData(c) => name.push_str(&self.clean(&c)),
                Event::End(_) | Event::Eof => break,
                _ => {}
            }
        }

        if !id.is_empty() && self.category_ids.insert(id.clone()) {
            self.report.categories.push(Category { id, name });
        }
        Ok(())
    }

    fn attributes(&self, tag: &BytesStart<'_>) -> Result<Vec<(String, String)>, String> {
        tag.attributes()
            .map(|attr| {
                let attr = attr.map_err(|e| e.to_string())?;
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let value = sanitize_attr(&String::from_utf8_lossy(&attr.value), self.quotes);
                Ok((key, value))
            })
            .collect()
    }

    fn clean(&self, raw: &[u8]) -> String {
        sanitize_text(&String::from_utf8_lossy(raw), self.quotes).into_owned()
    }

    fn push_text(&self, open: &mut [Field], raw: &[u8]) {
        let text = self.clean(raw);
        if text.trim().is_empty() {
            return;
        }
        // Text directly under <offer> has nowhere to go in the field model
        if let Some(parent) = open.last_mut() {
            parent.children.push(Node::Text(text));
        }
    }

    /// Restarts scanning at the next `<offer` tag at or after `from`.
    ///
    /// Returns `false` (and marks the pass aborted) when there is none.
    fn resync(&mut self, from: u64, error: &str) -> bool {
        // Always move past the current reader start so a fragment that fails
        // at its first byte cannot be retried forever
        let from = from.max(self.base + 1);
        let found = self.payload.reader_at(from).and_then(find_offer_tag);
        match found {
            Ok(Some(rel)) => {
                self.report.recovered += 1;
                tracing::warn!(
                    feed = self.feed_index,
                    error = %error,
                    resume_at = from + rel,
                    "Resynchronizing on next offer"
                );
                self.restart_at(from + rel)
            }
            Ok(None) => {
                self.abort(error.to_string());
                false
            }
            Err(e) => {
                self.abort(format!("payload unreadable: {e}"));
                false
            }
        }
    }

    /// Points a fresh reader at `at`; aborts the pass if that fails.
    fn restart_at(&mut self, at: u64) -> bool {
        match self.payload.reader_at(at) {
            Ok(source) => {
                self.base = at;
                self.reader = Some(new_reader(source));
                true
            }
            Err(e) => {
                self.abort(format!("payload unreadable: {e}"));
                false
            }
        }
    }

    fn abort(&mut self, error: String) {
        self.report.aborted = Some(error);
        self.reader = None;
        self.finished = true;
    }

    /// Validates a raw offer and resolves its identity.
    fn finish(&mut self, raw: RawOffer) -> Option<Offer> {
        let mut offer = Offer {
            attributes: raw.attributes,
            fields: raw.fields,
            source_feed_index: self.feed_index,
            local_id: String::new(),
            vendor_code: None,
            resolved_id: String::new(),
        };

        if offer.name().is_empty() || offer.price().is_empty() {
            self.report.incomplete += 1;
            return None;
        }

        offer.local_id = offer.attribute("id").unwrap_or_default();
        let vendor_code = offer.field_text("vendorCode");
        offer.vendor_code = (!vendor_code.trim().is_empty()).then_some(vendor_code);

        // The raw element is only re-read when the content digest is the id
        let content = if offer.vendor_code.is_none() && offer.local_id.trim().is_empty() {
            match self.payload.span(raw.start, raw.end) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.abort(format!("payload unreadable: {e}"));
                    return None;
                }
            }
        } else {
            Vec::new()
        };
        offer.resolved_id = resolve_id(
            &self.prefix,
            offer.vendor_code.as_deref(),
            &offer.local_id,
            &content,
        );

        if !self.seen.insert(offer.resolved_id.clone()) {
            self.report.duplicates += 1;
            tracing::warn!(
                feed = self.feed_index,
                id = %offer.resolved_id,
                "Duplicate offer id within feed, dropping later occurrence"
            );
            return None;
        }

        self.report.yielded += 1;
        Some(offer)
    }
}

impl<P: Payload> Iterator for OfferExtractor<P> {
    type Item = Offer;

    fn next(&mut self) -> Option<Offer> {
        while !self.finished {
            let raw = self.next_raw()?;
            if let Some(offer) = self.finish(raw) {
                return Some(offer);
            }
        }
        None
    }
}

/// Runs a full extraction pass, collecting the offers.
pub fn extract_offers<P: Payload>(
    payload: P,
    feed: &FeedDescriptor,
    quotes: QuotePolicy,
) -> (Vec<Offer>, ExtractReport) {
    let mut extractor = OfferExtractor::new(payload, feed, quotes);
    let offers: Vec<Offer> = extractor.by_ref().collect();
    (offers, extractor.into_report())
}

fn new_reader<R: BufRead>(source: R) -> Reader<R> {
    let mut reader = Reader::from_reader(source);
    let config = reader.config_mut();
    config.trim_text(true);
    // End tags are matched by the extractor itself so that a mismatch only
    // costs the offer it occurs in
    config.check_end_names = false;
    // A reader restarted mid-document sees closing tags it never opened
    config.allow_unmatched_ends = true;
    reader
}

fn tag_name(tag: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(tag.name().as_ref()).into_owned()
}

fn attach(open: &mut [Field], fields: &mut Vec<Field>, node: Node) {
    match (open.last_mut(), node) {
        (Some(parent), node) => parent.children.push(node),
        (None, Node::Element(field)) => fields.push(field),
        (None, Node::Text(_)) => {}
    }
}

/// Offset of the next `<offer` start tag (`<offer>`, `<offer ` or `<offer/`).
fn find_offer_tag<R: BufRead>(mut source: R) -> io::Result<Option<u64>> {
    const NEEDLE: &[u8] = b"<offer";
    let mut window: Vec<u8> = Vec::new();
    // Absolute offset of window[0]
    let mut dropped = 0u64;

    loop {
        let chunk = source.fill_buf()?;
        if chunk.is_empty() {
            return Ok(None);
        }
        let read = chunk.len();
        window.extend_from_slice(chunk);
        source.consume(read);

        let hit = window.windows(NEEDLE.len() + 1).position(|w| {
            &w[..NEEDLE.len()] == NEEDLE
                && matches!(w[NEEDLE.len()], b'>' | b'/' | b' ' | b'\t' | b'\r' | b'\n')
        });
        if let Some(at) = hit {
            return Ok(Some(dropped + at as u64));
        }
        // Keep enough of the tail to match a tag split across chunks
        let drain = window.len().saturating_sub(NEEDLE.len());
        window.drain(..drain);
        dropped += drain as u64;
    }
}
