use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::catalog::{MergedCatalog, Snapshot};
use crate::util::{display_width, pad_to_width, truncate_to_width};

/// Placeholder for the previous value of an offer the snapshot lacks.
pub const NEW_MARKER: &str = "NEW";

/// Widest the name column is allowed to get in the text table.
const MAX_NAME_WIDTH: usize = 48;

const HEADERS: [&str; 6] = ["id", "name", "oldPrice", "newPrice", "oldQuantity", "newQuantity"];

/// A price or stock change for one offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub id: String,
    pub name: String,
    pub old_price: String,
    pub new_price: String,
    pub old_quantity: String,
    pub new_quantity: String,
}

impl ChangeRecord {
    fn cells(&self) -> [&str; 6] {
        [
            &self.id,
            &self.name,
            &self.old_price,
            &self.new_price,
            &self.old_quantity,
            &self.new_quantity,
        ]
    }
}

/// Compares current prices and stock with the previous run.
///
/// Offers missing from the snapshot are reported with [`NEW_MARKER`] as
/// their old values. Offers that disappeared since the snapshot are not
/// reported. Records come out in catalog order.
pub fn detect_changes(catalog: &MergedCatalog, previous: &Snapshot) -> Vec<ChangeRecord> {
    catalog
        .iter()
        .filter_map(|offer| {
            let price = offer.price();
            let quantity = offer.quantity();
            let (old_price, old_quantity) = match previous.get(&offer.resolved_id) {
                Some(entry) => (entry.price.clone(), entry.quantity.clone()),
                None => (NEW_MARKER.to_string(), NEW_MARKER.to_string()),
            };

            if old_price == price && old_quantity == quantity {
                return None;
            }

            Some(ChangeRecord {
                id: offer.resolved_id.clone(),
                name: offer.name(),
                old_price,
                new_price: price,
                old_quantity,
                new_quantity: quantity,
            })
        })
        .collect()
}

/// Renders change records as an aligned text table.
///
/// Returns an empty string when there are no records.
pub fn render_change_table(records: &[ChangeRecord]) -> String {
    if records.is_empty() {
        return String::new();
    }

    let rows: Vec<[String; 6]> = records
        .iter()
        .map(|r| {
            let cells = r.cells();
            std::array::from_fn(|i| {
                let cell = cells[i];
                if i == 1 {
                    truncate_to_width(cell, MAX_NAME_WIDTH).into_owned()
                } else {
                    cell.to_string()
                }
            })
        })
        .collect();

    let mut widths = HEADERS.map(display_width);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(display_width(cell));
        }
    }

    let mut out = String::new();
    push_row(&mut out, &HEADERS[..], &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    push_row(&mut out, rule.as_slice(), &widths);
    for row in &rows {
        push_row(&mut out, &row[..], &widths);
    }
    out
}

fn push_row<S: AsRef<str>>(out: &mut String, cells: &[S], widths: &[usize; 6]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| pad_to_width(cell.as_ref(), *width))
        .collect();
    out.push_str(line.join("  ").trim_end());
    out.push('\n');
}

/// Writes change records as tab-separated values with a header row.
///
/// Tabs and newlines inside values are replaced by spaces.
pub fn write_change_table_tsv(path: &Path, records: &[ChangeRecord]) -> std::io::Result<()> {
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    writeln!(out, "{}", HEADERS.join("\t"))?;
    for record in records {
        let cells: Vec<String> = record
            .cells()
            .iter()
            .map(|c| c.replace(['\t', '\n', '\r'], " "))
            .collect();
        writeln!(out, "{}", cells.join("\t"))?;
    }
    out.flush()
}
