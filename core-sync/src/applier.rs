//! # Record Applier
//!
//! Turns one remote record into local state: the listing row, its key/value
//! meta, its classification terms and, through the [`AssetReconciler`], its
//! images.
//!
//! ## Field Mapping
//!
//! - Identity: `LISTINGID` is required; the title is `COMPANY`, falling back
//!   to `SORTCOMPANY`.
//! - Slug: slugified title plus a suffix derived from the listing type.
//! - Meta: the scalar fields in [`META_FIELDS`], then indexed social links,
//!   amenities and a comma-separated tag list.
//! - Terms: normalized listing type, category with sub-category as child,
//!   and region.
//!
//! Upserts are keyed by external id through the invocation's
//! [`ExistingIdMap`](crate::context::ExistingIdMap), so re-applying the same
//! record is idempotent.

use crate::assets::{AssetReconciler, ReconcileOutcome};
use crate::context::RunContext;
use crate::remote::RemoteRecord;
use crate::{Result, SyncError};
use bridge_traits::time::Clock;
use core_library::{
    slugify, LibraryError, ListingDraft, ListingRepository, Taxonomy, TermRepository,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Local meta key and the wire field it is copied from
pub const META_FIELDS: [(&str, &str); 31] = [
    ("listing_id", "LISTINGID"),
    ("type_id", "TYPEID"),
    ("type", "TYPENAME"),
    ("cat_id", "CATID"),
    ("category", "CATNAME"),
    ("sub_cat_id", "SUBCATID"),
    ("sub_cat", "SUBCATNAME"),
    ("region_id", "REGIONID"),
    ("region", "REGION"),
    ("acct_id", "ACCTID"),
    ("acct_status", "ACCTSTATUS"),
    ("sort_company", "SORTCOMPANY"),
    ("primary_contact_title", "PRIMARYCONTACTTITLE"),
    ("primary_contact_fullname", "PRIMARYCONTACTFULLNAME"),
    ("logo_file", "LOGOFILE"),
    ("photo_file", "PHOTOFILE"),
    ("phone", "PHONE"),
    ("alt_phone", "ALTPHONE"),
    ("toll_free", "TOLLFREE"),
    ("fax", "FAX"),
    ("email", "EMAIL"),
    ("web_url", "WEBURL"),
    ("addr1", "ADDR1"),
    ("addr2", "ADDR2"),
    ("addr3", "ADDR3"),
    ("city", "CITY"),
    ("state", "STATE"),
    ("zip", "ZIP"),
    ("latitude", "LATITUDE"),
    ("longitude", "LONGITUDE"),
    ("search_keywords", "LISTINGKEYWORDS"),
];

/// Media type id under which video channels are listed
const VIDEO_CHANNEL_TYPE_ID: &str = "10";

// ============================================================================
// Mapping
// ============================================================================

/// Publication a listing belongs to, derived from its free-text type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingType {
    MembershipDirectory,
    MeetingPlanners,
    TravelPlanners,
    VisitorsGuide,
}

impl ListingType {
    /// Classify a raw type name; anything unrecognized is the visitors guide
    pub fn from_type_name(type_name: &str) -> Self {
        let lower = type_name.to_lowercase();
        if lower.contains("membership") {
            ListingType::MembershipDirectory
        } else if lower.contains("meeting") {
            ListingType::MeetingPlanners
        } else if lower.contains("travel") {
            ListingType::TravelPlanners
        } else {
            ListingType::VisitorsGuide
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ListingType::MembershipDirectory => "Membership Directory",
            ListingType::MeetingPlanners => "Meeting Planners Guide",
            ListingType::TravelPlanners => "Travel Planners Guide",
            ListingType::VisitorsGuide => "Visitors Guide",
        }
    }

    /// Suffix appended to slugs so one company can appear in several guides
    pub fn slug_suffix(&self) -> &'static str {
        match self {
            ListingType::MembershipDirectory => "-pd",
            ListingType::MeetingPlanners => "-mp",
            ListingType::TravelPlanners => "-tpg",
            ListingType::VisitorsGuide => "",
        }
    }
}

fn type_name(record: &RemoteRecord) -> Option<String> {
    record.field_or("TYPENAME", "LISTINGTYPENAME")
}

/// Listing row values for `record`
///
/// # Errors
///
/// Returns [`SyncError::InvalidRecord`] when the record has no external id
/// or no usable display name.
pub fn listing_draft(record: &RemoteRecord) -> Result<ListingDraft> {
    let external_id = record
        .listing_id
        .ok_or_else(|| SyncError::InvalidRecord("record has no LISTINGID".to_string()))?;

    let title = record.field_or("COMPANY", "SORTCOMPANY").ok_or_else(|| {
        SyncError::InvalidRecord(format!(
            "listing {} has no COMPANY or SORTCOMPANY",
            external_id
        ))
    })?;

    let mut slug = slugify(&title);
    if let Some(type_name) = type_name(record) {
        slug.push_str(ListingType::from_type_name(&type_name).slug_suffix());
    }

    Ok(ListingDraft {
        external_id,
        title,
        slug,
        content: record.text("DESCRIPTION"),
    })
}

/// Every meta field written for `record`, in a stable order
pub fn meta_fields(record: &RemoteRecord) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = META_FIELDS
        .iter()
        .map(|(key, wire)| {
            let value = match *wire {
                "LISTINGID" => record.listing_id.map(|id| id.to_string()).unwrap_or_default(),
                "TYPEID" => record.field_or("TYPEID", "LISTINGTYPEID").unwrap_or_default(),
                "TYPENAME" => type_name(record).unwrap_or_default(),
                _ => record.text(wire),
            };
            (key.to_string(), value)
        })
        .collect();

    fields.extend(social_fields(record));
    fields.extend(amenity_fields(record));

    let tags: Vec<&str> = record
        .tags
        .iter()
        .filter_map(|tag| tag.source_name.as_deref())
        .collect();
    if !tags.is_empty() {
        fields.push(("tags".to_string(), tags.join(",")));
    }

    fields
}

fn social_fields(record: &RemoteRecord) -> Vec<(String, String)> {
    let links = record
        .social_media
        .iter()
        .filter(|item| {
            item.field_name.as_deref() == Some("URL") || item.service.as_deref() == Some("OpenTable")
        })
        .filter_map(|item| {
            let value = item.value.clone()?;
            Some((item.service.clone().unwrap_or_default(), value))
        });

    // Video channels are delivered inside the media list
    let channels = record
        .images
        .iter()
        .flatten()
        .filter(|media| media.type_id.as_deref() == Some(VIDEO_CHANNEL_TYPE_ID))
        .filter_map(|media| {
            let value = media.media_file.clone()?;
            Some((media.type_name.clone().unwrap_or_default(), value))
        });

    indexed_pairs(
        "social_media",
        "social_media_name",
        "social_media_value",
        links.chain(channels),
    )
}

fn amenity_fields(record: &RemoteRecord) -> Vec<(String, String)> {
    let amenities = record.amenities.iter().filter_map(|item| {
        let value = item.value.clone()?;
        Some((item.name.clone().unwrap_or_default(), value))
    });

    indexed_pairs("amenities", "amenity_name", "amenity_value", amenities)
}

/// Flatten `(name, value)` pairs into `<list>_<n>_<field>` keys plus a count
fn indexed_pairs(
    list: &str,
    name_field: &str,
    value_field: &str,
    pairs: impl Iterator<Item = (String, String)>,
) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let mut count = 0usize;

    for (name, value) in pairs {
        fields.push((format!("{}_{}_{}", list, count, name_field), name));
        fields.push((format!("{}_{}_{}", list, count, value_field), value));
        count += 1;
    }

    if count > 0 {
        fields.push((list.to_string(), count.to_string()));
    }
    fields
}

// ============================================================================
// Applier
// ============================================================================

/// Result of applying one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created { listing_id: i64 },
    Updated { listing_id: i64 },
}

impl ApplyOutcome {
    pub fn listing_id(&self) -> i64 {
        match self {
            ApplyOutcome::Created { listing_id } | ApplyOutcome::Updated { listing_id } => {
                *listing_id
            }
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ApplyOutcome::Created { .. })
    }
}

/// Writes remote records into the local store
pub struct RecordApplier {
    listings: Arc<dyn ListingRepository>,
    terms: Arc<dyn TermRepository>,
    reconciler: Arc<AssetReconciler>,
    clock: Arc<dyn Clock>,
}

impl RecordApplier {
    pub fn new(
        listings: Arc<dyn ListingRepository>,
        terms: Arc<dyn TermRepository>,
        reconciler: Arc<AssetReconciler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            listings,
            terms,
            reconciler,
            clock,
        }
    }

    /// Upsert `record` with its meta, terms and images
    ///
    /// Image problems are logged and never fail the record.
    #[instrument(skip(self, ctx, record), fields(external_id = ?record.listing_id))]
    pub async fn apply(&self, ctx: &mut RunContext, record: &RemoteRecord) -> Result<ApplyOutcome> {
        let draft = listing_draft(record)?;
        let outcome = self.upsert(ctx, &draft).await?;
        let listing_id = outcome.listing_id();

        self.listings
            .replace_meta(listing_id, &meta_fields(record))
            .await?;
        self.assign_terms(listing_id, record).await?;

        if let Some(images) = record.images.as_deref() {
            let primary = record.field("PHOTOFILE");
            if let Err(e) = self
                .reconciler
                .reconcile(ctx, listing_id, primary.as_deref(), images)
                .await
            {
                warn!(listing_id, error = %e, "Image reconciliation failed");
            }
        }

        debug!(listing_id, created = outcome.is_created(), "Applied record");
        Ok(outcome)
    }

    /// Reconcile only the images of an already stored listing
    ///
    /// Returns `None` when the listing is not stored locally.
    pub async fn apply_images(
        &self,
        ctx: &mut RunContext,
        record: &RemoteRecord,
    ) -> Result<Option<ReconcileOutcome>> {
        let external_id = record
            .listing_id
            .ok_or_else(|| SyncError::InvalidRecord("record has no LISTINGID".to_string()))?;

        let Some(listing_id) = ctx.existing_ids(self.listings.as_ref()).await?.get(external_id)
        else {
            debug!(external_id, "Listing not stored locally, skipping images");
            return Ok(None);
        };

        let images = record.images.as_deref().unwrap_or_default();
        let primary = record.field("PHOTOFILE");
        let outcome = self
            .reconciler
            .reconcile(ctx, listing_id, primary.as_deref(), images)
            .await?;
        Ok(Some(outcome))
    }

    async fn upsert(&self, ctx: &mut RunContext, draft: &ListingDraft) -> Result<ApplyOutcome> {
        let now = self.clock.unix_timestamp();
        let ids = ctx.existing_ids(self.listings.as_ref()).await?;

        if let Some(listing_id) = ids.get(draft.external_id) {
            match self.listings.update(listing_id, draft, now).await {
                Ok(()) => return Ok(ApplyOutcome::Updated { listing_id }),
                Err(LibraryError::NotFound { .. }) => {
                    debug!(listing_id, "Mapped listing vanished, inserting again");
                    ids.remove(draft.external_id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let listing = self.listings.insert(draft, now).await?;
        ids.insert(draft.external_id, listing.id);
        Ok(ApplyOutcome::Created {
            listing_id: listing.id,
        })
    }

    async fn assign_terms(&self, listing_id: i64, record: &RemoteRecord) -> Result<()> {
        let listing_type = ListingType::from_type_name(&type_name(record).unwrap_or_default());
        let type_term = self
            .terms
            .ensure(Taxonomy::ListingType, listing_type.label(), None)
            .await?;
        self.terms
            .assign(listing_id, Taxonomy::ListingType, &[type_term.id])
            .await?;

        let mut category_ids = Vec::new();
        if let Some(category) = self.ensure_term(Taxonomy::Category, record.field("CATNAME"), None).await? {
            category_ids.push(category);
            if let Some(sub) = self
                .ensure_term(Taxonomy::Category, record.field("SUBCATNAME"), Some(category))
                .await?
            {
                category_ids.push(sub);
            }
        }
        self.terms
            .assign(listing_id, Taxonomy::Category, &category_ids)
            .await?;

        let region_ids: Vec<i64> = self
            .ensure_term(Taxonomy::Region, record.field("REGION"), None)
            .await?
            .into_iter()
            .collect();
        self.terms
            .assign(listing_id, Taxonomy::Region, &region_ids)
            .await?;

        Ok(())
    }

    async fn ensure_term(
        &self,
        taxonomy: Taxonomy,
        name: Option<String>,
        parent_id: Option<i64>,
    ) -> Result<Option<i64>> {
        let Some(name) = name.filter(|n| !slugify(n).is_empty()) else {
            return Ok(None);
        };
        let term = self.terms.ensure(taxonomy, &name, parent_id).await?;
        Ok(Some(term.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::TokioFileSystem;
    use bridge_traits::time::SystemClock;
    use core_library::{create_test_pool, SqliteAssetRepository, SqliteListingRepository, SqliteTermRepository};
    use mockall::mock;
    use serde_json::json;
    use std::time::Duration;

    mock! {
        HttpClient {}

        #[async_trait::async_trait]
        impl bridge_traits::http::HttpClient for HttpClient {
            async fn execute(
                &self,
                request: bridge_traits::http::HttpRequest,
            ) -> bridge_traits::error::Result<bridge_traits::http::HttpResponse>;
        }
    }

    fn record(value: serde_json::Value) -> RemoteRecord {
        serde_json::from_value(value).unwrap()
    }

    async fn applier() -> (RecordApplier, Arc<SqliteListingRepository>, Arc<SqliteTermRepository>) {
        let pool = create_test_pool().await.unwrap();
        let listings = Arc::new(SqliteListingRepository::new(pool.clone()));
        let terms = Arc::new(SqliteTermRepository::new(pool.clone()));
        let reconciler = Arc::new(AssetReconciler::new(
            Arc::new(SqliteAssetRepository::new(pool)),
            Arc::new(MockHttpClient::new()),
            Arc::new(TokioFileSystem::with_data_directory(std::env::temp_dir())),
            Arc::new(SystemClock),
            std::env::temp_dir(),
            "https://img.example.com/",
            Duration::from_secs(1),
        ));
        let applier = RecordApplier::new(
            listings.clone(),
            terms.clone(),
            reconciler,
            Arc::new(SystemClock),
        );
        (applier, listings, terms)
    }

    #[test]
    fn test_listing_type_normalization() {
        let cases = [
            ("2024 Membership", "Membership Directory", "-pd"),
            ("meeting planner", "Meeting Planners Guide", "-mp"),
            ("Travel Trade", "Travel Planners Guide", "-tpg"),
            ("Dining", "Visitors Guide", ""),
        ];
        for (raw, label, suffix) in cases {
            let kind = ListingType::from_type_name(raw);
            assert_eq!(kind.label(), label);
            assert_eq!(kind.slug_suffix(), suffix);
        }
    }

    #[test]
    fn test_draft_identity_rules() {
        let fallback = record(json!({
            "LISTINGID": 3, "SORTCOMPANY": "Seattle Aquarium", "LISTINGTYPENAME": "Meeting"
        }));
        let draft = listing_draft(&fallback).unwrap();
        assert_eq!(draft.title, "Seattle Aquarium");
        assert_eq!(draft.slug, "seattle-aquarium-mp");
        assert_eq!(draft.content, "");

        let nameless = record(json!({ "LISTINGID": 4 }));
        assert!(matches!(listing_draft(&nameless), Err(SyncError::InvalidRecord(_))));

        let anonymous = record(json!({ "COMPANY": "Ghost" }));
        assert!(matches!(listing_draft(&anonymous), Err(SyncError::InvalidRecord(_))));
    }

    #[test]
    fn test_meta_mapping() {
        let r = record(json!({
            "LISTINGID": 12,
            "COMPANY": "Harbor Cafe",
            "LISTINGTYPEID": 7,
            "CITY": "Seattle",
            "FAX": {},
            "LISTINGKEYWORDS": ["coffee", "waterfront"],
            "SOCIALMEDIA": { "ITEM": [
                { "SERVICE": "Facebook", "FIELDNAME": "URL", "VALUE": "https://fb.example/harbor" },
                { "SERVICE": "Twitter", "FIELDNAME": "Handle", "VALUE": "@harbor" },
                { "SERVICE": "OpenTable", "FIELDNAME": "ID", "VALUE": "ot-1" },
                { "SERVICE": "Instagram", "FIELDNAME": "URL", "VALUE": "" }
            ]},
            "IMAGES": { "ITEM": [
                { "TYPEID": "10", "TYPE": "YouTube", "MEDIAFILE": "https://yt.example/harbor" },
                { "TYPEID": "2", "MEDIAFILE": "front.jpg" }
            ]},
            "AMENITIES": { "ITEM": [
                { "NAME": "Wifi", "VALUE": "Yes" },
                { "NAME": "Parking", "VALUE": "" }
            ]},
            "TAGS": { "ITEM": [ { "SOURCENAME": "Food" }, { "SOURCENAME": "Drink" } ] }
        }));

        let fields: std::collections::HashMap<String, String> =
            meta_fields(&r).into_iter().collect();

        assert_eq!(fields["listing_id"], "12");
        assert_eq!(fields["type_id"], "7");
        assert_eq!(fields["city"], "Seattle");
        assert_eq!(fields["fax"], "");
        assert_eq!(fields["search_keywords"], "coffee waterfront");

        assert_eq!(fields["social_media"], "3");
        assert_eq!(fields["social_media_0_social_media_name"], "Facebook");
        assert_eq!(fields["social_media_1_social_media_value"], "ot-1");
        assert_eq!(fields["social_media_2_social_media_name"], "YouTube");
        assert_eq!(fields["social_media_2_social_media_value"], "https://yt.example/harbor");

        assert_eq!(fields["amenities"], "1");
        assert_eq!(fields["amenities_0_amenity_name"], "Wifi");
        assert!(!fields.contains_key("amenities_1_amenity_name"));

        assert_eq!(fields["tags"], "Food,Drink");
    }

    #[tokio::test]
    async fn test_apply_is_idempotent_upsert() {
        let (applier, listings, terms) = applier().await;
        let r = record(json!({
            "LISTINGID": 900,
            "COMPANY": "Pike Place Market",
            "TYPENAME": "Visitors",
            "CATNAME": "Shopping",
            "SUBCATNAME": "Markets",
            "REGION": "Downtown",
            "DESCRIPTION": "Public market"
        }));

        let mut ctx = RunContext::new();
        let first = applier.apply(&mut ctx, &r).await.unwrap();
        assert!(first.is_created());

        let second = applier.apply(&mut ctx, &r).await.unwrap();
        assert_eq!(second, ApplyOutcome::Updated { listing_id: first.listing_id() });

        // A fresh invocation finds the listing through the store
        let mut ctx = RunContext::new();
        let third = applier.apply(&mut ctx, &r).await.unwrap();
        assert!(!third.is_created());
        assert_eq!(listings.count().await.unwrap(), 1);

        let stored = listings.find_by_id(first.listing_id()).await.unwrap().unwrap();
        assert_eq!(stored.slug, "pike-place-market");
        assert_eq!(stored.content, "Public market");

        let mut names: Vec<String> = terms
            .terms_for_listing(first.listing_id())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["Downtown", "Markets", "Shopping", "Visitors Guide"]);

        let meta = listings.meta(first.listing_id()).await.unwrap();
        assert_eq!(meta["region"], "Downtown");
    }

    #[tokio::test]
    async fn test_apply_images_skips_unknown_listing() {
        let (applier, _, _) = applier().await;
        let r = record(json!({
            "LISTINGID": 5,
            "IMAGES": { "ITEM": { "MEDIAFILE": "a.jpg" } }
        }));

        let mut ctx = RunContext::new();
        assert_eq!(applier.apply_images(&mut ctx, &r).await.unwrap(), None);
    }
}
