//! Dedup Filter.
//!
//! Reduces a candidate listing to the items that have never been handled:
//! not in the Item Store (by canonical URL) and not in the Skip Ledger (by
//! stable ID). Each store is read once for the whole list, so cost stays
//! linear in the number of candidates.

use anyhow::Result;

use crate::models::ItemRef;
use crate::store::Store;

/// Returns the candidates absent from both the Item Store and the Skip
/// Ledger, preserving listing order. Duplicate candidates (same URL) are
/// collapsed to their first occurrence.
///
/// With `source_id`, only that source's skip records are consulted.
pub async fn filter_new(
    store: &dyn Store,
    candidates: Vec<ItemRef>,
    source_id: Option<&str>,
) -> Result<Vec<ItemRef>> {
    if candidates.is_empty() {
        return Ok(candidates);
    }

    let urls: Vec<String> = candidates.iter().map(|c| c.url.clone()).collect();
    let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();

    let known_urls = store.existing_urls(&urls).await?;
    let skipped_ids = store.skipped_ids(source_id, &ids).await?;

    let before = candidates.len();
    let mut seen = std::collections::HashSet::new();
    let remaining: Vec<ItemRef> = candidates
        .into_iter()
        .filter(|c| !known_urls.contains(&c.url) && !skipped_ids.contains(&c.id))
        .filter(|c| seen.insert(c.url.clone()))
        .collect();

    tracing::debug!(
        candidates = before,
        known = known_urls.len(),
        skipped = skipped_ids.len(),
        remaining = remaining.len(),
        "dedup filter"
    );

    Ok(remaining)
}
