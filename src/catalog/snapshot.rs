use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::output::{manifest_path, shard_path, ManifestError, ShardManifest};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to read snapshot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot {path} is not valid XML: {message}")]
    Parse { path: String, message: String },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Price and stock of one offer as of the previous run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub price: String,
    pub quantity: String,
}

/// Offer state from a previous run's output, keyed by resolved id.
#[derive(Debug, Default)]
pub struct Snapshot {
    entries: HashMap<String, SnapshotEntry>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads previous output documents; missing files are skipped.
    ///
    /// Documents are streamed, so shard-sized files do not need to fit in
    /// memory. If an id appears in several documents the last one wins.
    pub fn load(paths: &[PathBuf]) -> Result<Self, SnapshotError> {
        let mut snapshot = Self::new();
        for path in paths {
            match File::open(path) {
                Ok(file) => {
                    let count = snapshot.read_document(path, BufReader::new(file))?;
                    tracing::debug!(path = %path.display(), offers = count, "Loaded snapshot document");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "Snapshot document missing, skipping");
                }
                Err(source) => {
                    return Err(SnapshotError::Io {
                        path: path.display().to_string(),
                        source,
                    })
                }
            }
        }
        Ok(snapshot)
    }

    /// Loads the shards a previous run left in `dir`.
    ///
    /// The shard manifest decides which files belong to that run, so stale
    /// higher-numbered shards from an even older run are not read. Without a
    /// manifest, `{stem}_1.yml`, `{stem}_2.yml`, ... are read up to the
    /// first gap.
    pub fn from_existing_shards(dir: &Path, stem: &str) -> Result<Self, SnapshotError> {
        let paths: Vec<PathBuf> = match ShardManifest::read(&manifest_path(dir, stem))? {
            Some(manifest) => manifest.paths(dir),
            None => (1..)
                .map(|n| shard_path(dir, stem, n))
                .take_while(|p| p.exists())
                .collect(),
        };
        Self::load(&paths)
    }

    pub fn insert(&mut self, id: impl Into<String>, entry: SnapshotEntry) {
        self.entries.insert(id.into(), entry);
    }

    pub fn get(&self, id: &str) -> Option<&SnapshotEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn read_document(&mut self, path: &Path, source: BufReader<File>) -> Result<usize, SnapshotError> {
        let parse_error = |message: String| SnapshotError::Parse {
            path: path.display().to_string(),
            message,
        };

        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut current: Option<(String, PendingEntry)> = None;
        let mut depth = 0usize;
        let mut capture: Option<Tracked> = None;
        let mut count = 0;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    if current.is_some() {
                        depth += 1;
                        capture = if depth == 1 {
                            Tracked::for_tag(e.name().as_ref())
                        } else {
                            None
                        };
                    } else if e.name().as_ref() == b"offer" {
                        let id = offer_id(&e, &reader).map_err(parse_error)?;
                        current = Some((id, PendingEntry::default()));
                        depth = 0;
                    }
                }
                Ok(Event::Text(t)) => {
                    if let (Some((_, pending)), Some(tracked)) = (current.as_mut(), capture) {
                        let text = t
                            .unescape()
                            .map(|c| c.into_owned())
                            .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                        pending.push(tracked, text.trim());
                    }
                }
                Ok(Event::End(_)) => {
                    if current.is_some() {
                        if depth == 0 {
                            if let Some((id, pending)) = current.take() {
                                if !id.is_empty() {
                                    self.entries.insert(id, pending.into_entry());
                                    count += 1;
                                }
                            }
                        } else {
                            depth -= 1;
                            capture = None;
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(parse_error(e.to_string())),
                _ => {}
            }
            buf.clear();
        }

        Ok(count)
    }
}

/// Fields of an offer the snapshot keeps track of.
#[derive(Debug, Clone, Copy)]
enum Tracked {
    Price,
    Quantity,
    StockQuantity,
}

impl Tracked {
    fn for_tag(name: &[u8]) -> Option<Self> {
        match name {
            b"price" => Some(Self::Price),
            b"quantity" => Some(Self::Quantity),
            b"stock_quantity" => Some(Self::StockQuantity),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct PendingEntry {
    price: String,
    quantity: String,
    stock_quantity: String,
}

impl PendingEntry {
    fn push(&mut self, field: Tracked, text: &str) {
        let slot = match field {
            Tracked::Price => &mut self.price,
            Tracked::Quantity => &mut self.quantity,
            Tracked::StockQuantity => &mut self.stock_quantity,
        };
        slot.push_str(text);
    }

    /// Same precedence as [`Offer::quantity`](crate::catalog::Offer::quantity).
    fn into_entry(self) -> SnapshotEntry {
        SnapshotEntry {
            price: self.price,
            quantity: if self.quantity.is_empty() {
                self.stock_quantity
            } else {
                self.quantity
            },
        }
    }
}

fn offer_id(tag: &BytesStart<'_>, reader: &Reader<BufReader<File>>) -> Result<String, String> {
    for attr in tag.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.as_ref() == b"id" {
            return attr
                .decode_and_unescape_value(reader.decoder())
                .map(|v| v.into_owned())
                .map_err(|e| e.to_string());
        }
    }
    Ok(String::new())
}
