//! Wire types of the partner listing API.
//!
//! The source converts XML to JSON on its side, which leaves two quirks the
//! types absorb here: a nested collection holds a single object instead of
//! a one-element list when it has one item, and empty elements arrive as
//! empty objects or empty strings. Both are normalized at deserialization so
//! the rest of the crate only ever sees `Vec<T>` and `Option<String>`.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

// ============================================================================
// Envelope
// ============================================================================

/// Top-level response document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "REQUESTSTATUS", default)]
    pub request_status: RequestStatus,

    #[serde(rename = "LISTINGS", default, deserialize_with = "listing_list")]
    pub listings: Vec<RemoteRecord>,

    #[serde(rename = "CHANGEDLISTINGS", default, deserialize_with = "listing_list")]
    pub changed_listings: Vec<RemoteRecord>,

    #[serde(rename = "INVALIDLISTINGS", default, deserialize_with = "listing_list")]
    pub invalid_listings: Vec<RemoteRecord>,

    #[serde(rename = "LISTING", default, deserialize_with = "optional_record")]
    pub listing: Option<RemoteRecord>,
}

/// Request outcome block reported by the source
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestStatus {
    #[serde(rename = "HASERRORS", default, deserialize_with = "lenient_bool")]
    pub has_errors: bool,

    #[serde(rename = "RESULTS", default, deserialize_with = "lenient_u64")]
    pub results: u64,

    #[serde(rename = "ERRORS", default, deserialize_with = "item_list")]
    pub errors: Vec<SourceErrorItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SourceErrorItem {
    #[serde(rename = "MESSAGE", default, deserialize_with = "lenient_string")]
    pub message: Option<String>,

    #[serde(rename = "DETAIL", default, deserialize_with = "lenient_string")]
    pub detail: Option<String>,
}

impl SourceErrorItem {
    /// `message: detail`, skipping empty parts
    pub fn describe(&self) -> String {
        match (&self.message, &self.detail) {
            (Some(m), Some(d)) => format!("{}: {}", m, d),
            (Some(m), None) => m.clone(),
            (None, Some(d)) => d.clone(),
            (None, None) => "unspecified error".to_string(),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// One listing as returned by the source
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteRecord {
    #[serde(rename = "LISTINGID", default, deserialize_with = "lenient_i64")]
    pub listing_id: Option<i64>,

    /// `None` when the response omitted the media collection entirely
    #[serde(rename = "IMAGES", default, deserialize_with = "optional_item_list")]
    pub images: Option<Vec<MediaItem>>,

    #[serde(rename = "AMENITIES", default, deserialize_with = "item_list")]
    pub amenities: Vec<AmenityItem>,

    #[serde(rename = "SOCIALMEDIA", default, deserialize_with = "item_list")]
    pub social_media: Vec<SocialItem>,

    #[serde(rename = "TAGS", default, deserialize_with = "item_list")]
    pub tags: Vec<TagItem>,

    /// Every other scalar field, keyed by its upper-case wire name
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl RemoteRecord {
    /// Text value of a flat field
    ///
    /// Numbers are rendered as text, lists are joined with spaces, and empty
    /// strings or empty objects count as absent.
    pub fn field(&self, name: &str) -> Option<String> {
        self.fields.get(name).and_then(value_to_text)
    }

    /// Text value of a flat field, or `""`
    pub fn text(&self, name: &str) -> String {
        self.field(name).unwrap_or_default()
    }

    /// Value of `primary`, falling back to `fallback` when empty
    pub fn field_or(&self, primary: &str, fallback: &str) -> Option<String> {
        self.field(primary).or_else(|| self.field(fallback))
    }

    /// Whether the record names a primary photo but omits its media list
    ///
    /// Bulk queries return such partial records; the full listing has to be
    /// fetched before it can be applied.
    pub fn needs_hydration(&self) -> bool {
        self.images.is_none() && self.field("PHOTOFILE").is_some()
    }
}

/// One entry of a record's media list
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MediaItem {
    #[serde(rename = "MEDIAID", default, deserialize_with = "lenient_string")]
    pub media_id: Option<String>,

    #[serde(rename = "MEDIAFILE", default, deserialize_with = "lenient_string")]
    pub media_file: Option<String>,

    #[serde(rename = "MEDIANAME", default, deserialize_with = "lenient_string")]
    pub media_name: Option<String>,

    #[serde(rename = "TYPEID", default, deserialize_with = "lenient_string")]
    pub type_id: Option<String>,

    #[serde(rename = "TYPE", default, deserialize_with = "lenient_string")]
    pub type_name: Option<String>,

    #[serde(rename = "IMGPATH", default, deserialize_with = "lenient_string")]
    pub img_path: Option<String>,

    #[serde(rename = "SORTORDER", default, deserialize_with = "lenient_i64")]
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AmenityItem {
    #[serde(rename = "NAME", default, deserialize_with = "lenient_string")]
    pub name: Option<String>,

    #[serde(rename = "VALUE", default, deserialize_with = "lenient_string")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SocialItem {
    #[serde(rename = "SERVICE", default, deserialize_with = "lenient_string")]
    pub service: Option<String>,

    #[serde(rename = "FIELDNAME", default, deserialize_with = "lenient_string")]
    pub field_name: Option<String>,

    #[serde(rename = "VALUE", default, deserialize_with = "lenient_string")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TagItem {
    #[serde(rename = "SOURCENAME", default, deserialize_with = "lenient_string")]
    pub source_name: Option<String>,
}

// ============================================================================
// Shape normalization
// ============================================================================

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Array(items) => {
            let joined = items
                .iter()
                .filter_map(value_to_text)
                .collect::<Vec<_>>()
                .join(" ");
            (!joined.is_empty()).then_some(joined)
        }
        Value::Null | Value::Object(_) => None,
    }
}

/// Normalize a bare item or a list of items into a list
fn one_or_many<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, serde_json::Error> {
    match value {
        Value::Array(items) => items.into_iter().map(serde_json::from_value).collect(),
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        Value::Object(map) => Ok(vec![serde_json::from_value(Value::Object(map))?]),
        _ => Ok(Vec::new()),
    }
}

/// Unwrap `{ <wrapper>: item | [items] }`; anything else is an empty list
fn wrapped<T: DeserializeOwned>(
    value: Value,
    wrapper: &str,
) -> Result<Vec<T>, serde_json::Error> {
    match value {
        Value::Object(mut map) => match map.remove(wrapper) {
            Some(inner) => one_or_many(inner),
            None => Ok(Vec::new()),
        },
        _ => Ok(Vec::new()),
    }
}

fn item_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    wrapped(value, "ITEM").map_err(D::Error::custom)
}

fn optional_item_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    wrapped(value, "ITEM").map(Some).map_err(D::Error::custom)
}

fn listing_list<'de, D>(deserializer: D) -> Result<Vec<RemoteRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    wrapped(value, "LISTING").map_err(D::Error::custom)
}

fn optional_record<'de, D>(deserializer: D) -> Result<Option<RemoteRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Object(map) if !map.is_empty() => serde_json::from_value(Value::Object(map))
            .map(Some)
            .map_err(D::Error::custom),
        _ => Ok(None),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(_) | Value::Number(_) => value_to_text(&value),
        _ => None,
    })
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RemoteRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_single_item_normalized_to_list() {
        let single = record(json!({
            "LISTINGID": 10,
            "IMAGES": { "ITEM": { "MEDIAFILE": "a.jpg", "SORTORDER": "2" } }
        }));
        let many = record(json!({
            "LISTINGID": "10",
            "IMAGES": { "ITEM": [ { "MEDIAFILE": "a.jpg" }, { "MEDIAFILE": "b.jpg" } ] }
        }));

        let single_images = single.images.unwrap();
        assert_eq!(single_images.len(), 1);
        assert_eq!(single_images[0].sort_order, Some(2));
        assert_eq!(many.images.unwrap().len(), 2);
        assert_eq!(many.listing_id, Some(10));
    }

    #[test]
    fn test_missing_and_empty_collections() {
        let absent = record(json!({ "LISTINGID": 1 }));
        assert!(absent.images.is_none());
        assert!(!absent.needs_hydration());

        let partial = record(json!({ "LISTINGID": 1, "PHOTOFILE": "front.jpg" }));
        assert!(partial.needs_hydration());
        assert!(absent.amenities.is_empty());

        let empty = record(json!({ "LISTINGID": 1, "IMAGES": {}, "TAGS": "" }));
        assert_eq!(empty.images, Some(Vec::new()));
        assert!(empty.tags.is_empty());
    }

    #[test]
    fn test_flat_field_rendering() {
        let r = record(json!({
            "LISTINGID": 5,
            "COMPANY": "  Pike Place  ",
            "FAX": {},
            "ZIP": 98101,
            "LISTINGKEYWORDS": ["market", "fish"]
        }));

        assert_eq!(r.field("COMPANY").as_deref(), Some("Pike Place"));
        assert_eq!(r.field("FAX"), None);
        assert_eq!(r.text("FAX"), "");
        assert_eq!(r.text("ZIP"), "98101");
        assert_eq!(r.text("LISTINGKEYWORDS"), "market fish");
        assert!(!r.fields.contains_key("LISTINGID"));
    }

    #[test]
    fn test_non_string_media_file_is_absent() {
        let r = record(json!({
            "IMAGES": { "ITEM": [ { "MEDIAFILE": { "nested": true } }, { "MEDIAFILE": "" } ] }
        }));
        let images = r.images.unwrap();
        assert!(images.iter().all(|m| m.media_file.is_none()));
    }

    #[test]
    fn test_envelope_variants() {
        let envelope: ResponseEnvelope = serde_json::from_value(json!({
            "REQUESTSTATUS": {
                "HASERRORS": "1",
                "RESULTS": "0",
                "ERRORS": { "ITEM": { "MESSAGE": "Login failed", "DETAIL": "bad password" } }
            }
        }))
        .unwrap();

        assert!(envelope.request_status.has_errors);
        assert_eq!(envelope.request_status.results, 0);
        assert_eq!(
            envelope.request_status.errors[0].describe(),
            "Login failed: bad password"
        );
        assert!(envelope.listings.is_empty());
        assert!(envelope.listing.is_none());

        let changed: ResponseEnvelope = serde_json::from_value(json!({
            "REQUESTSTATUS": { "HASERRORS": 0, "RESULTS": 1 },
            "CHANGEDLISTINGS": { "LISTING": { "LISTINGID": 77 } }
        }))
        .unwrap();
        assert_eq!(changed.changed_listings[0].listing_id, Some(77));
    }
}
