//! Source identity.
//!
//! A job is submitted with a source URL; items are filed under a source
//! ID. [`resolve_source_identity`] maps one to the other before any item
//! is processed:
//!
//! 1. an ID supplied by the caller wins;
//! 2. otherwise a SourceRecord already bound to this URL;
//! 3. otherwise an ID derived from the URL shape
//!    (`/@handle`, `/channel/<id>`, `/c/<name>`, `/user/<name>`,
//!    `?list=<playlist>`).
//!
//! If none applies the source stays unresolved: the job still runs,
//! items fall back to their owner name, and no SourceRecord is touched.
//!
//! [`bind_source`] is the second half of the contract. It records the
//! URL on the SourceRecord once the job has proved the source real by
//! ingesting an item from it.

use anyhow::Result;
use url::Url;

use crate::models::SourceRecord;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityOrigin {
    /// Supplied by the caller.
    Explicit,
    /// Found in the Source Registry by URL.
    Registered,
    /// Parsed out of the URL.
    Derived,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub source_id: String,
    pub origin: IdentityOrigin,
    /// Whether the registry already holds a URL for this source.
    pub url_bound: bool,
}

/// Resolves the source ID a job should file its items under.
///
/// Returns `Ok(None)` when the URL carries no recognizable identity.
pub async fn resolve_source_identity(
    store: &dyn Store,
    source_url: &str,
    explicit_id: Option<&str>,
) -> Result<Option<ResolvedSource>> {
    if let Some(id) = explicit_id.map(str::trim).filter(|id| !id.is_empty()) {
        let url_bound = store
            .get_source(id)
            .await?
            .map(|record| record.source_url.is_some())
            .unwrap_or(false);
        return Ok(Some(ResolvedSource {
            source_id: id.to_string(),
            origin: IdentityOrigin::Explicit,
            url_bound,
        }));
    }

    if let Some(record) = store.find_source_by_url(source_url).await? {
        return Ok(Some(ResolvedSource {
            source_id: record.source_id,
            origin: IdentityOrigin::Registered,
            url_bound: true,
        }));
    }

    match derive_source_id(source_url) {
        Some(id) => {
            let url_bound = store
                .get_source(&id)
                .await?
                .map(|record| record.source_url.is_some())
                .unwrap_or(false);
            Ok(Some(ResolvedSource {
                source_id: id,
                origin: IdentityOrigin::Derived,
                url_bound,
            }))
        }
        None => {
            tracing::warn!(%source_url, "could not resolve source identity");
            Ok(None)
        }
    }
}

/// Associates `source_url` with the resolved source if the registry has
/// no URL for it yet. Returns whether a binding was written.
pub async fn bind_source(
    store: &dyn Store,
    source: &ResolvedSource,
    source_url: &str,
    fetched_total: usize,
) -> Result<bool> {
    if source.url_bound {
        return Ok(false);
    }
    store
        .bind_source_url(&source.source_id, source_url, fetched_total as i64)
        .await?;
    tracing::info!(source_id = %source.source_id, %source_url, "bound source url");
    Ok(true)
}

/// Extracts a source ID from a channel or playlist URL.
pub fn derive_source_id(source_url: &str) -> Option<String> {
    let url = Url::parse(source_url.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    if let Some((_, list)) = url.query_pairs().find(|(k, _)| k == "list") {
        if !list.is_empty() {
            return Some(list.into_owned());
        }
    }

    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let first = segments.next()?;

    if first.starts_with('@') && first.len() > 1 {
        return Some(first.to_string());
    }

    match first {
        "channel" | "c" | "user" => segments.next().map(str::to_string),
        _ => None,
    }
}

/// Prints the Source Registry as a table.
pub async fn print_sources(store: &dyn Store) -> Result<()> {
    let sources: Vec<SourceRecord> = store.list_sources().await?;

    if sources.is_empty() {
        println!("No sources registered yet.");
        return Ok(());
    }

    println!(
        "{:<28} {:>8} {:>8} {:<12} {:<12} URL",
        "SOURCE", "KNOWN", "INGESTED", "NEWEST", "SCANNED"
    );
    for source in sources {
        let ingested = store.count_items_for_source(&source.source_id).await?;
        let newest = source
            .newest_known_publish_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        let scanned = source
            .last_scanned_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<28} {:>8} {:>8} {:<12} {:<12} {}",
            source.source_id,
            source.total_known_items,
            ingested,
            newest,
            scanned,
            source.source_url.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[test]
    fn derives_ids_from_url_shapes() {
        assert_eq!(
            derive_source_id("https://www.youtube.com/@rustlang/videos").as_deref(),
            Some("@rustlang")
        );
        assert_eq!(
            derive_source_id("https://www.youtube.com/channel/UC123abc").as_deref(),
            Some("UC123abc")
        );
        assert_eq!(
            derive_source_id("https://youtube.com/c/SomeName").as_deref(),
            Some("SomeName")
        );
        assert_eq!(
            derive_source_id("https://www.youtube.com/playlist?list=PLxyz").as_deref(),
            Some("PLxyz")
        );
        assert_eq!(derive_source_id("https://example.com/watch"), None);
        assert_eq!(derive_source_id("not a url"), None);
        assert_eq!(derive_source_id("ftp://example.com/@x"), None);
    }

    #[tokio::test]
    async fn explicit_id_wins() {
        let store = InMemoryStore::new();
        let resolved = resolve_source_identity(&store, "https://www.youtube.com/@a", Some("mine"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.source_id, "mine");
        assert_eq!(resolved.origin, IdentityOrigin::Explicit);
        assert!(!resolved.url_bound);
    }

    #[tokio::test]
    async fn registered_url_beats_derivation() {
        let store = InMemoryStore::new();
        store
            .bind_source_url("Rust Team", "https://www.youtube.com/@rustlang", 3)
            .await
            .unwrap();

        let resolved = resolve_source_identity(&store, "https://www.youtube.com/@rustlang", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.source_id, "Rust Team");
        assert_eq!(resolved.origin, IdentityOrigin::Registered);
        assert!(resolved.url_bound);
    }

    #[tokio::test]
    async fn unknown_url_shape_is_unresolved() {
        let store = InMemoryStore::new();
        let resolved = resolve_source_identity(&store, "https://example.com/feed", None)
            .await
            .unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn bind_only_writes_once() {
        let store = InMemoryStore::new();
        let url = "https://www.youtube.com/@a";
        let resolved = resolve_source_identity(&store, url, None)
            .await
            .unwrap()
            .unwrap();

        assert!(bind_source(&store, &resolved, url, 7).await.unwrap());
        let record = store.get_source("@a").await.unwrap().unwrap();
        assert_eq!(record.source_url.as_deref(), Some(url));
        assert_eq!(record.total_known_items, 7);

        let again = resolve_source_identity(&store, url, None)
            .await
            .unwrap()
            .unwrap();
        assert!(!bind_source(&store, &again, url, 9).await.unwrap());
    }
}
