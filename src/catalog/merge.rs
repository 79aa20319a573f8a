use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::catalog::{Category, Offer};
use crate::feed::FeedResult;
use crate::util::{sanitize_text, QuotePolicy};

/// All retained offers keyed by resolved id, in first-insertion order.
#[derive(Debug, Default)]
pub struct MergedCatalog {
    offers: Vec<Offer>,
    index: HashMap<String, usize>,
    categories: Vec<Category>,
    category_index: HashMap<String, usize>,
}

impl MergedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an offer, replacing any offer with the same resolved id.
    ///
    /// A replaced offer keeps the position of the original. Returns `true`
    /// when an existing entry was overwritten.
    pub fn insert(&mut self, offer: Offer) -> bool {
        match self.index.get(&offer.resolved_id) {
            Some(&slot) => {
                self.offers[slot] = offer;
                true
            }
            None => {
                self.index.insert(offer.resolved_id.clone(), self.offers.len());
                self.offers.push(offer);
                false
            }
        }
    }

    /// Registers a category name; the first definition of an id wins.
    pub fn add_category(&mut self, category: Category) {
        if !self.category_index.contains_key(&category.id) {
            self.category_index
                .insert(category.id.clone(), self.categories.len());
            self.categories.push(category);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Offer> {
        self.index.get(id).map(|&slot| &self.offers[slot])
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Offer> {
        self.offers.iter()
    }

    /// Categories referenced by at least one offer, in order of first
    /// reference. Ids never defined by a feed use the id as their name.
    pub fn referenced_categories(&self) -> Vec<Category> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for offer in &self.offers {
            let id = offer.category_id();
            if id.is_empty() || !seen.insert(id.clone()) {
                continue;
            }
            let name = self
                .category_index
                .get(&id)
                .map(|&slot| self.categories[slot].name.clone())
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| sanitize_text(&id, QuotePolicy::Keep).into_owned());
            out.push(Category { id, name });
        }
        out
    }
}

/// Aggregate counters for one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub feeds_succeeded: usize,
    pub feeds_failed: usize,
    /// Offers handed to the merge, across all feeds.
    pub offers_considered: usize,
    /// Distinct ids left in the catalog.
    pub offers_retained: usize,
    /// Offers that replaced an earlier feed's offer with the same id.
    pub overwritten: usize,
}

/// Combines per-feed results into one catalog.
///
/// Results must be in feed-list order. On an id collision the later feed's
/// offer wins outright; fields are never merged.
pub fn merge(results: Vec<FeedResult>) -> (MergedCatalog, MergeStats) {
    let mut catalog = MergedCatalog::new();
    let mut stats = MergeStats::default();

    for result in results {
        if result.outcome.succeeded {
            stats.feeds_succeeded += 1;
        } else {
            stats.feeds_failed += 1;
        }

        for category in result.report.categories {
            catalog.add_category(category);
        }

        for offer in result.offers {
            stats.offers_considered += 1;
            let id = offer.resolved_id.clone();
            if catalog.insert(offer) {
                stats.overwritten += 1;
                tracing::debug!(id = %id, feed = %result.outcome.url, "Offer replaced by later feed");
            }
        }
    }

    stats.offers_retained = catalog.len();
    (catalog, stats)
}
