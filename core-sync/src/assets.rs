//! # Asset Reconciler
//!
//! Maps a record's declared media list onto stored image assets without
//! storing the same file twice.
//!
//! ## Algorithm
//!
//! 1. Index the listing's current attachments by normalized file name.
//! 2. Skip declared items that are not displayable images.
//! 3. A declared item whose key is already attached keeps that asset; its
//!    content is refreshed in place only when the remote signature differs.
//! 4. Otherwise reuse an asset stored earlier in the invocation for the same
//!    media id, then any stored asset with the same file name, and only then
//!    download a new copy.
//! 5. Attach the results in sort order, cover first.
//! 6. Previously attached assets left unmatched are deleted, but only once no
//!    other listing references them.
//!
//! Attachments are always written before anything is removed so the
//! reference count seen in step 6 is current.
//!
//! ## Failure Policy
//!
//! Unreachable files and failed writes never abort a record: the affected
//! item is skipped or the existing copy is kept, and a warning is logged.
//! Only store errors propagate.

use crate::context::RunContext;
use crate::remote::MediaItem;
use crate::Result;
use bridge_traits::http::{HttpClient, HttpRequest};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use bytes::Bytes;
use core_library::{Asset, AssetRepository, NewAsset};
use core_runtime::logging::strip_path;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// File extensions accepted as displayable images
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "gif", "png"];

/// Media type id of a plain image; other ids are videos, documents, links
const IMAGE_TYPE_ID: &str = "2";

/// Sort order assigned to items that declare none, in declaration order
const DEFAULT_SORT_ORDER: i64 = 99;

// ============================================================================
// Keys
// ============================================================================

/// Normalized identity of a media file
///
/// The basename is lower-cased, every character outside `[a-z0-9._-]`
/// becomes `-`, and runs of `-` collapse to one.
pub fn media_key(file: &str) -> String {
    let basename = file.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(file);

    let mut key = String::with_capacity(basename.len());
    for c in basename.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '-'
        };
        if c == '-' && key.ends_with('-') {
            continue;
        }
        key.push(c);
    }

    key.trim_matches('-').to_string()
}

fn extension(file: &str) -> Option<String> {
    file.rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.contains('/'))
}

fn guess_content_type(file: &str) -> Option<String> {
    let mime = match extension(file)?.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "png" => "image/png",
        _ => return None,
    };
    Some(mime.to_string())
}

// ============================================================================
// Declared images
// ============================================================================

/// A declared media item that passed the displayability checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredImage {
    pub media_id: Option<String>,
    pub media_file: String,
    pub key: String,
    pub url: String,
    pub title: String,
    pub sort_order: i64,
}

/// Filter `media` down to displayable images, in declaration order
///
/// Items without a sort order receive 99, 100, ... so explicitly ordered
/// items sort ahead of them.
pub fn declared_images(media: &[MediaItem], image_base_url: &str) -> Vec<DeclaredImage> {
    let mut next_default = DEFAULT_SORT_ORDER;

    media
        .iter()
        .filter_map(|item| {
            let media_file = item.media_file.as_deref()?;
            if matches!(item.type_id.as_deref(), Some(id) if id != IMAGE_TYPE_ID) {
                return None;
            }
            let ext = extension(media_file)?;
            if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                debug!(media_file, "Skipping media with unsupported extension");
                return None;
            }

            let key = media_key(media_file);
            if key.is_empty() {
                return None;
            }

            let sort_order = item.sort_order.unwrap_or_else(|| {
                let order = next_default;
                next_default += 1;
                order
            });
            let base = item.img_path.as_deref().unwrap_or(image_base_url);

            Some(DeclaredImage {
                media_id: item.media_id.clone(),
                media_file: media_file.to_string(),
                url: format!("{}{}", base, media_file),
                title: item.media_name.clone().unwrap_or_else(|| key.clone()),
                key,
                sort_order,
            })
        })
        .collect()
}

// ============================================================================
// Reconciler
// ============================================================================

/// What one reconciliation did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Cover first, then secondary assets in order
    pub attached: Vec<i64>,
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Declared content of a remote copy, from a `HEAD` request
#[derive(Debug, Clone, PartialEq, Eq)]
struct ContentSignature {
    content_type: Option<String>,
    byte_length: Option<u64>,
}

struct Download {
    body: Bytes,
    content_type: Option<String>,
}

/// Keeps a listing's stored images in line with its declared media
pub struct AssetReconciler {
    assets: Arc<dyn AssetRepository>,
    http: Arc<dyn HttpClient>,
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    asset_dir: PathBuf,
    image_base_url: String,
    timeout: Duration,
}

impl AssetReconciler {
    pub fn new(
        assets: Arc<dyn AssetRepository>,
        http: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
        asset_dir: PathBuf,
        image_base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            assets,
            http,
            fs,
            clock,
            asset_dir,
            image_base_url: image_base_url.into(),
            timeout,
        }
    }

    /// Reconcile `listing_id`'s attachments against `media`
    ///
    /// `primary_file` names the declared file that should become the cover.
    /// An empty or entirely non-displayable media list leaves the listing's
    /// assets untouched.
    pub async fn reconcile(
        &self,
        ctx: &mut RunContext,
        listing_id: i64,
        primary_file: Option<&str>,
        media: &[MediaItem],
    ) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();

        let declared = declared_images(media, &self.image_base_url);
        if declared.is_empty() {
            debug!(listing_id, "No displayable media declared");
            return Ok(outcome);
        }

        let mut existing_by_key: HashMap<String, Asset> = self
            .assets
            .attachments_for_listing(listing_id)
            .await?
            .into_iter()
            .map(|attached| (attached.asset.file_name.clone(), attached.asset))
            .collect();
        let mut unmatched: HashSet<String> = existing_by_key.keys().cloned().collect();

        let mut placed: Vec<(DeclaredImage, i64)> = Vec::with_capacity(declared.len());

        for image in declared {
            let asset_id = if let Some(existing) = existing_by_key.get(&image.key) {
                unmatched.remove(&image.key);
                if self.refresh_if_changed(existing, &image).await? {
                    outcome.updated += 1;
                }
                Some(existing.id)
            } else {
                self.locate_or_store(ctx, listing_id, &image, &mut outcome)
                    .await?
            };

            let Some(asset_id) = asset_id else {
                continue;
            };
            if let Some(media_id) = image.media_id.as_deref() {
                ctx.remember_media(media_id, asset_id);
            }
            placed.push((image, asset_id));
        }

        placed.sort_by_key(|(image, _)| image.sort_order);

        let mut seen = HashSet::new();
        placed.retain(|(_, id)| seen.insert(*id));

        let cover_index = primary_file
            .and_then(|primary| placed.iter().position(|(image, _)| image.media_file == primary))
            .unwrap_or(0);

        let cover = placed.get(cover_index).map(|(_, id)| *id);
        let secondary: Vec<i64> = placed
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != cover_index)
            .map(|(_, (_, id))| *id)
            .collect();

        self.assets
            .set_attachments(listing_id, cover, &secondary)
            .await?;
        outcome.attached = cover.into_iter().chain(secondary).collect();

        for key in unmatched {
            let Some(asset) = existing_by_key.remove(&key) else {
                continue;
            };
            if outcome.attached.contains(&asset.id) {
                continue;
            }
            if self.remove_if_unused(&asset, listing_id).await? {
                outcome.removed += 1;
            }
        }

        info!(
            listing_id,
            attached = outcome.attached.len(),
            created = outcome.created,
            updated = outcome.updated,
            removed = outcome.removed,
            "Reconciled listing assets"
        );

        Ok(outcome)
    }

    /// Delete every asset attached to `listing_id` that no other listing uses
    ///
    /// Returns the number of assets deleted.
    pub async fn release_listing(&self, listing_id: i64) -> Result<u64> {
        let mut removed = 0;
        for attached in self.assets.attachments_for_listing(listing_id).await? {
            if self.remove_if_unused(&attached.asset, listing_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn locate_or_store(
        &self,
        ctx: &RunContext,
        listing_id: i64,
        image: &DeclaredImage,
        outcome: &mut ReconcileOutcome,
    ) -> Result<Option<i64>> {
        if let Some(asset_id) = image
            .media_id
            .as_deref()
            .and_then(|media_id| ctx.processed_media(media_id))
        {
            debug!(asset_id, key = %image.key, "Reusing asset stored earlier in this run");
            return Ok(Some(asset_id));
        }

        if let Some(stored) = self.assets.find_latest_by_file_name(&image.key).await? {
            debug!(asset_id = stored.id, key = %image.key, "Reusing stored asset");
            if self.refresh_if_changed(&stored, image).await? {
                outcome.updated += 1;
            }
            return Ok(Some(stored.id));
        }

        let created = self.store_new(listing_id, image).await?;
        if created.is_some() {
            outcome.created += 1;
        }
        Ok(created)
    }

    /// Re-download `existing` in place when the remote copy differs
    ///
    /// Returns whether the stored content changed.
    async fn refresh_if_changed(&self, existing: &Asset, image: &DeclaredImage) -> Result<bool> {
        let Some(remote) = self.remote_signature(&image.url).await else {
            debug!(asset_id = existing.id, url = %image.url, "Remote copy unavailable, keeping existing");
            return Ok(false);
        };

        if self.matches_stored(existing, &remote).await {
            return Ok(false);
        }

        let Some(download) = self.download(&image.url).await else {
            return Ok(false);
        };

        let path = PathBuf::from(&existing.file_path);
        if let Err(e) = self.fs.write_file(&path, download.body.clone()).await {
            warn!(
                asset_id = existing.id,
                file = %strip_path(&existing.file_path),
                error = %e,
                "Failed to overwrite asset file"
            );
            return Ok(false);
        }

        let content_type = download
            .content_type
            .or_else(|| guess_content_type(&image.media_file));
        self.assets
            .update_content(
                existing.id,
                content_type.as_deref(),
                Some(download.body.len() as i64),
                &image.url,
                self.clock.unix_timestamp(),
            )
            .await?;

        info!(asset_id = existing.id, key = %image.key, "Updated asset content in place");
        Ok(true)
    }

    async fn store_new(&self, listing_id: i64, image: &DeclaredImage) -> Result<Option<i64>> {
        let Some(download) = self.download(&image.url).await else {
            return Ok(None);
        };

        let path = self.asset_dir.join(&image.key);
        if let Err(e) = self.fs.write_file(&path, download.body.clone()).await {
            warn!(key = %image.key, error = %e, "Failed to write asset file");
            return Ok(None);
        }

        let content_type = download
            .content_type
            .or_else(|| guess_content_type(&image.media_file));
        let asset = self
            .assets
            .insert(
                &NewAsset {
                    parent_listing_id: Some(listing_id),
                    file_name: image.key.clone(),
                    file_path: path.to_string_lossy().to_string(),
                    title: image.title.clone(),
                    content_type,
                    byte_length: Some(download.body.len() as i64),
                    source_url: image.url.clone(),
                },
                self.clock.unix_timestamp(),
            )
            .await?;

        debug!(asset_id = asset.id, key = %image.key, "Stored new asset");
        Ok(Some(asset.id))
    }

    async fn remove_if_unused(&self, asset: &Asset, listing_id: i64) -> Result<bool> {
        let uses = self.assets.other_references(asset.id, listing_id).await?;
        if uses > 0 {
            debug!(asset_id = asset.id, uses, "Asset still referenced, keeping");
            return Ok(false);
        }

        if let Err(e) = self.fs.delete_file(Path::new(&asset.file_path)).await {
            warn!(
                asset_id = asset.id,
                file = %strip_path(&asset.file_path),
                error = %e,
                "Failed to delete asset file"
            );
        }

        Ok(self.assets.delete(asset.id).await?)
    }

    /// Whether the stored copy is usable and declares the same content
    async fn matches_stored(&self, existing: &Asset, remote: &ContentSignature) -> bool {
        let present = self
            .fs
            .exists(Path::new(&existing.file_path))
            .await
            .unwrap_or(false);
        if !present {
            return false;
        }

        let (Some(content_type), Some(byte_length)) = (&existing.content_type, existing.byte_length)
        else {
            return false;
        };

        remote.content_type.as_deref() == Some(content_type.as_str())
            && remote.byte_length == u64::try_from(byte_length).ok()
    }

    async fn remote_signature(&self, url: &str) -> Option<ContentSignature> {
        let request = HttpRequest::head(url).timeout(self.timeout);
        match self.http.execute(request).await {
            Ok(response) if response.status == 200 => Some(ContentSignature {
                content_type: response.content_type().map(str::to_string),
                byte_length: response.content_length(),
            }),
            Ok(response) => {
                debug!(url, status = response.status, "Remote image not available");
                None
            }
            Err(e) => {
                warn!(url, error = %e, "Remote image check failed");
                None
            }
        }
    }

    async fn download(&self, url: &str) -> Option<Download> {
        let request = HttpRequest::get(url).timeout(self.timeout);
        match self.http.execute(request).await {
            Ok(response) if response.is_success() && !response.body.is_empty() => Some(Download {
                content_type: response.content_type().map(str::to_string),
                body: response.body,
            }),
            Ok(response) => {
                warn!(url, status = response.status, "Image download returned no content");
                None
            }
            Err(e) => {
                warn!(url, error = %e, "Image download failed");
                None
            }
        }
    }
}
