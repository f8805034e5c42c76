//! Invocation-scoped working memory.
//!
//! A [`RunContext`] lives for exactly one phase invocation. It carries the
//! external-id lookup and the media de-dup table that the applier and the
//! asset reconciler share, so nothing is kept in ambient globals. Because an
//! invocation may be the first one after a process restart, the id map is
//! always built on demand rather than assumed to exist.

use crate::Result;
use core_library::ListingRepository;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// External id to local listing id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingIdMap {
    by_external: HashMap<i64, i64>,
}

impl ExistingIdMap {
    /// Build the map from every stored listing
    pub async fn load(listings: &dyn ListingRepository) -> Result<Self> {
        let by_external = listings.existing_ids().await?;
        debug!(entries = by_external.len(), "Built existing listing id map");
        Ok(Self { by_external })
    }

    pub fn get(&self, external_id: i64) -> Option<i64> {
        self.by_external.get(&external_id).copied()
    }

    pub fn insert(&mut self, external_id: i64, listing_id: i64) {
        self.by_external.insert(external_id, listing_id);
    }

    pub fn remove(&mut self, external_id: i64) -> Option<i64> {
        self.by_external.remove(&external_id)
    }

    pub fn len(&self) -> usize {
        self.by_external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_external.is_empty()
    }
}

/// Working memory of one phase invocation
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    existing: Option<ExistingIdMap>,
    processed_media: HashMap<String, i64>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            existing: None,
            processed_media: HashMap::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The existing-id map, built from the store the first time it is needed
    pub async fn existing_ids(
        &mut self,
        listings: &dyn ListingRepository,
    ) -> Result<&mut ExistingIdMap> {
        if self.existing.is_none() {
            self.existing = Some(ExistingIdMap::load(listings).await?);
        }
        Ok(self.existing.get_or_insert_with(ExistingIdMap::default))
    }

    /// Asset already stored for a remote media id during this invocation
    pub fn processed_media(&self, media_id: &str) -> Option<i64> {
        self.processed_media.get(media_id).copied()
    }

    pub fn remember_media(&mut self, media_id: &str, asset_id: i64) {
        self.processed_media.insert(media_id.to_string(), asset_id);
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::{create_test_pool, ListingDraft, SqliteListingRepository};

    fn draft(external_id: i64, title: &str) -> ListingDraft {
        ListingDraft {
            external_id,
            title: title.to_string(),
            slug: core_library::slugify(title),
            content: String::new(),
        }
    }

    #[tokio::test]
    async fn test_id_map_built_on_first_use() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteListingRepository::new(pool);
        let stored = repo.insert(&draft(501, "Space Needle"), 1).await.unwrap();

        let mut ctx = RunContext::new();
        let map = ctx.existing_ids(&repo).await.unwrap();
        assert_eq!(map.get(501), Some(stored.id));

        map.insert(502, 99);

        // Later inserts to the store are not re-read; the map is cached
        repo.insert(&draft(503, "Ferry Terminal"), 2).await.unwrap();
        let map = ctx.existing_ids(&repo).await.unwrap();
        assert_eq!(map.get(502), Some(99));
        assert_eq!(map.get(503), None);
    }

    #[test]
    fn test_media_dedup_table() {
        let mut ctx = RunContext::new();
        assert_eq!(ctx.processed_media("m-1"), None);
        ctx.remember_media("m-1", 7);
        assert_eq!(ctx.processed_media("m-1"), Some(7));
    }
}
