//! # Action Catalogue
//!
//! Decodes an action name plus loose request parameters into a typed
//! [`SyncAction`] once, at the boundary. Everything downstream matches on the
//! enum exhaustively.

use crate::{Result, SyncError};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Action kinds
// ============================================================================

/// Name-level identity of an action, before its parameters are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    #[serde(rename = "import_new")]
    ImportChanged,
    ImportSingle,
    ImportAll,
    ImportImages,
    DeleteAll,
    DeleteStale,
    ResetAll,
    #[serde(rename = "create_cache")]
    BuildCache,
    DeleteCache,
}

impl ActionKind {
    pub const ALL: [ActionKind; 9] = [
        ActionKind::ImportChanged,
        ActionKind::ImportSingle,
        ActionKind::ImportAll,
        ActionKind::ImportImages,
        ActionKind::DeleteAll,
        ActionKind::DeleteStale,
        ActionKind::ResetAll,
        ActionKind::BuildCache,
        ActionKind::DeleteCache,
    ];

    /// Wire name of the action
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::ImportChanged => "import_new",
            ActionKind::ImportSingle => "import_single",
            ActionKind::ImportAll => "import_all",
            ActionKind::ImportImages => "import_images",
            ActionKind::DeleteAll => "delete_all",
            ActionKind::DeleteStale => "delete_stale",
            ActionKind::ResetAll => "reset_all",
            ActionKind::BuildCache => "create_cache",
            ActionKind::DeleteCache => "delete_cache",
        }
    }

    /// Whether progress is tracked as remote pages of `chunk_size` records
    pub fn is_page_windowed(&self) -> bool {
        matches!(
            self,
            ActionKind::ImportAll
                | ActionKind::ImportImages
                | ActionKind::DeleteAll
                | ActionKind::ResetAll
                | ActionKind::BuildCache
        )
    }

    /// Whether progress is tracked as an offset into one date-windowed result
    pub fn is_date_windowed(&self) -> bool {
        matches!(self, ActionKind::ImportChanged | ActionKind::DeleteStale)
    }
}

impl FromStr for ActionKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s.trim())
            .ok_or_else(|| SyncError::UnknownAction(s.to_string()))
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Request parameters
// ============================================================================

/// How counters are initialized when a phase starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitMode {
    /// Fresh run: every counter is reset
    Hard,
    /// Next phase of the same multi-phase action: added/deleted carry over
    Soft,
    /// Continue from the last-run snapshot
    #[default]
    Resume,
}

/// Loose parameters accompanying a phase request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseParams {
    #[serde(default)]
    pub init: InitMode,
    /// `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub listing_id: Option<i64>,
    /// Explicit page to process, overriding resume arithmetic
    #[serde(default)]
    pub page: Option<u32>,
}

impl PhaseParams {
    pub fn hard() -> Self {
        Self {
            init: InitMode::Hard,
            ..Self::default()
        }
    }

    pub fn soft() -> Self {
        Self {
            init: InitMode::Soft,
            ..Self::default()
        }
    }

    pub fn resume() -> Self {
        Self::default()
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_listing_id(mut self, listing_id: i64) -> Self {
        self.listing_id = Some(listing_id);
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Parsed `date`, if one was supplied
    pub fn parsed_date(&self) -> Result<Option<NaiveDate>> {
        self.date.as_deref().map(parse_date).transpose()
    }
}

/// Parse `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`, keeping the calendar day
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date())
        })
        .map_err(|_| SyncError::InvalidParameter {
            parameter: "date".to_string(),
            message: format!("'{}' is not YYYY-MM-DD or YYYY-MM-DD HH:MM:SS", value),
        })
}

// ============================================================================
// Resolved actions
// ============================================================================

/// Stage of the two-stage reset action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetStage {
    Delete,
    Import,
}

/// A fully resolved action carrying exactly the parameters it needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    ImportChanged { since: NaiveDate },
    ImportSingle { listing_id: i64 },
    ImportAll,
    ImportImages,
    DeleteAll,
    DeleteStale { since: NaiveDate },
    ResetAll { stage: ResetStage },
    BuildCache,
    DeleteCache,
}

impl SyncAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            SyncAction::ImportChanged { .. } => ActionKind::ImportChanged,
            SyncAction::ImportSingle { .. } => ActionKind::ImportSingle,
            SyncAction::ImportAll => ActionKind::ImportAll,
            SyncAction::ImportImages => ActionKind::ImportImages,
            SyncAction::DeleteAll => ActionKind::DeleteAll,
            SyncAction::DeleteStale { .. } => ActionKind::DeleteStale,
            SyncAction::ResetAll { .. } => ActionKind::ResetAll,
            SyncAction::BuildCache => ActionKind::BuildCache,
            SyncAction::DeleteCache => ActionKind::DeleteCache,
        }
    }

    /// Date window carried by the action, if any
    pub fn fetch_date(&self) -> Option<NaiveDate> {
        match self {
            SyncAction::ImportChanged { since } | SyncAction::DeleteStale { since } => Some(*since),
            _ => None,
        }
    }

    /// Listing id carried by the action, if any
    pub fn listing_id(&self) -> Option<i64> {
        match self {
            SyncAction::ImportSingle { listing_id } => Some(*listing_id),
            _ => None,
        }
    }

    /// Whether a finished invocation counts as a listing import
    pub fn imports_listings(&self) -> bool {
        matches!(
            self,
            SyncAction::ImportChanged { .. }
                | SyncAction::ImportSingle { .. }
                | SyncAction::ImportAll
                | SyncAction::ResetAll {
                    stage: ResetStage::Import
                }
        )
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::ImportChanged { since } | SyncAction::DeleteStale { since } => {
                write!(f, "{}({})", self.kind(), since)
            }
            SyncAction::ImportSingle { listing_id } => write!(f, "{}({})", self.kind(), listing_id),
            SyncAction::ResetAll { stage } => write!(f, "{}({:?})", self.kind(), stage),
            _ => write!(f, "{}", self.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names_round_trip() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.name().parse::<ActionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_action_rejected() {
        let err = "import_everything".parse::<ActionKind>().unwrap_err();
        assert!(matches!(err, SyncError::UnknownAction(name) if name == "import_everything"));
    }

    #[test]
    fn test_window_classification() {
        assert!(ActionKind::ImportAll.is_page_windowed());
        assert!(ActionKind::ResetAll.is_page_windowed());
        assert!(ActionKind::DeleteStale.is_date_windowed());
        assert!(!ActionKind::ImportSingle.is_page_windowed());
        assert!(!ActionKind::DeleteCache.is_date_windowed());
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(parse_date("2024-03-09").unwrap(), expected);
        assert_eq!(parse_date("2024-03-09 17:45:00").unwrap(), expected);
        assert!(parse_date("09/03/2024").is_err());
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let params: PhaseParams =
            serde_json::from_str(r#"{"init":"soft","page":3}"#).unwrap();
        assert_eq!(params.init, InitMode::Soft);
        assert_eq!(params.page, Some(3));
        assert!(params.date.is_none());

        let empty: PhaseParams = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.init, InitMode::Resume);
    }

    #[test]
    fn test_action_accessors() {
        let since = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let action = SyncAction::DeleteStale { since };
        assert_eq!(action.kind(), ActionKind::DeleteStale);
        assert_eq!(action.fetch_date(), Some(since));
        assert_eq!(action.to_string(), "delete_stale(2024-01-02)");
        assert_eq!(
            SyncAction::ImportSingle { listing_id: 9 }.listing_id(),
            Some(9)
        );
    }

    #[test]
    fn test_only_listing_imports_count_as_imports() {
        assert!(SyncAction::ImportAll.imports_listings());
        assert!(SyncAction::ResetAll { stage: ResetStage::Import }.imports_listings());
        assert!(!SyncAction::ResetAll { stage: ResetStage::Delete }.imports_listings());
        assert!(!SyncAction::ImportImages.imports_listings());
        assert!(!SyncAction::BuildCache.imports_listings());
        assert!(!SyncAction::DeleteCache.imports_listings());
    }
}
