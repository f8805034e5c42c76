//! # Run State
//!
//! The process-wide progress record of the sync engine and the last-run
//! snapshot used for resumption.
//!
//! ## State Machine
//!
//! ```text
//!            start                  complete
//!   Free ─────────────→ Running ─────────────→ Free
//!    ↑  ↖ retry           │  │
//!    │    Error ←── fail ─┘  │ cancel
//!    │                       ↓
//!    └──── resume ──── FreeCanceled
//! ```
//!
//! `Busy` marks a non-cancellable maintenance step and blocks preflight the
//! same way `Running` does.
//!
//! `RunState` is an immutable value: every transition consumes the old value
//! and returns a new one, which the engine then persists in a single write.

use crate::action::ActionKind;
use crate::{Result, SyncError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Status
// ============================================================================

/// Engine-wide run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RunStatus {
    #[default]
    #[serde(rename = "free")]
    Free,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "free:canceled")]
    FreeCanceled,
    #[serde(rename = "busy")]
    Busy,
    #[serde(rename = "error")]
    Error,
}

impl RunStatus {
    /// Get the string representation for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Free => "free",
            RunStatus::Running => "running",
            RunStatus::FreeCanceled => "free:canceled",
            RunStatus::Busy => "busy",
            RunStatus::Error => "error",
        }
    }

    /// Whether a new phase may start from this status
    pub fn accepts_new_run(&self) -> bool {
        matches!(
            self,
            RunStatus::Free | RunStatus::FreeCanceled | RunStatus::Error
        )
    }

    /// Whether a phase currently holds the engine
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Busy)
    }
}

impl FromStr for RunStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(RunStatus::Free),
            "running" => Ok(RunStatus::Running),
            "free:canceled" | "free:cancelled" => Ok(RunStatus::FreeCanceled),
            "busy" => Ok(RunStatus::Busy),
            "error" => Ok(RunStatus::Error),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Run state
// ============================================================================

/// Progress counters and status of the engine
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunState {
    pub status: RunStatus,
    /// Current phase label, e.g. `import/fetch`
    pub method: String,
    /// Unix timestamp of the last state change
    pub timestamp: i64,
    pub processed: u64,
    pub added: u64,
    pub deleted: u64,
    pub total: u64,
    /// Page handled by the latest invocation (1-based, 0 before the first)
    pub current_page: u32,
}

impl RunState {
    /// Counters all zero, status untouched
    pub fn reset_counters(self) -> Self {
        Self {
            processed: 0,
            added: 0,
            deleted: 0,
            total: 0,
            current_page: 0,
            ..self
        }
    }

    /// Start the next stage of a multi-stage action
    ///
    /// Added and deleted totals carry over; position counters restart.
    pub fn carry_over(self) -> Self {
        Self {
            processed: 0,
            total: 0,
            current_page: 0,
            ..self
        }
    }

    /// Restore counters from a last-run snapshot
    pub fn restore_from(self, snapshot: &LastRunRecord) -> Self {
        Self {
            processed: snapshot.processed,
            added: snapshot.added,
            deleted: snapshot.deleted,
            current_page: snapshot.page,
            ..self
        }
    }

    /// Enter `Running` with the given phase label
    ///
    /// # Errors
    ///
    /// Returns an error if another phase holds the engine
    pub fn start(self, method: &str, now: i64) -> Result<Self> {
        self.validate_transition(RunStatus::Running)?;
        Ok(Self {
            status: RunStatus::Running,
            method: method.to_string(),
            timestamp: now,
            ..self
        })
    }

    /// Enter `Busy` for a non-cancellable maintenance step
    pub fn occupy(self, method: &str, now: i64) -> Result<Self> {
        self.validate_transition(RunStatus::Busy)?;
        Ok(Self {
            status: RunStatus::Busy,
            method: method.to_string(),
            timestamp: now,
            ..self
        })
    }

    /// Relabel the current phase
    pub fn with_method(self, method: &str, now: i64) -> Self {
        Self {
            method: method.to_string(),
            timestamp: now,
            ..self
        }
    }

    pub fn with_total(self, total: u64) -> Self {
        Self { total, ..self }
    }

    pub fn with_page(self, current_page: u32) -> Self {
        Self {
            current_page,
            ..self
        }
    }

    /// Count one handled record, optionally as added and/or with deletions
    pub fn record(self, added: bool, deleted: u64, now: i64) -> Self {
        Self {
            processed: self.processed + 1,
            added: self.added + u64::from(added),
            deleted: self.deleted + deleted,
            timestamp: now,
            ..self
        }
    }

    /// Leave `Running`/`Busy` after a finished phase
    pub fn complete(self, now: i64) -> Result<Self> {
        self.validate_transition(RunStatus::Free)?;
        Ok(Self {
            status: RunStatus::Free,
            timestamp: now,
            ..self
        })
    }

    /// Stop at an observed cancellation request
    pub fn cancel(self, now: i64) -> Result<Self> {
        self.validate_transition(RunStatus::FreeCanceled)?;
        Ok(Self {
            status: RunStatus::FreeCanceled,
            timestamp: now,
            ..self
        })
    }

    /// Leave `Running`/`Busy` after a failure; counters stay as they were
    pub fn fail(self, now: i64) -> Result<Self> {
        self.validate_transition(RunStatus::Error)?;
        Ok(Self {
            status: RunStatus::Error,
            timestamp: now,
            ..self
        })
    }

    /// Whether every known record has been handled
    pub fn is_exhausted(&self) -> bool {
        self.processed >= self.total
    }

    fn validate_transition(&self, to: RunStatus) -> Result<()> {
        use RunStatus::*;

        let valid = match (self.status, to) {
            (Free | FreeCanceled | Error, Running | Busy) => true,
            (Running, Running) => true,
            (Running | Busy, Free) => true,
            (Running | Busy | Free, FreeCanceled) => true,
            (Running | Busy, Error) => true,
            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Last-run snapshot
// ============================================================================

/// Parameters and counters needed to resume an interrupted action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRunRecord {
    pub action: ActionKind,
    #[serde(default)]
    pub fetch_date: Option<NaiveDate>,
    #[serde(default)]
    pub listing_id: Option<i64>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub added: u64,
    #[serde(default)]
    pub deleted: u64,
}

impl LastRunRecord {
    /// Snapshot `state` for `action`
    pub fn capture(
        action: ActionKind,
        fetch_date: Option<NaiveDate>,
        listing_id: Option<i64>,
        state: &RunState,
    ) -> Self {
        Self {
            action,
            fetch_date,
            listing_id,
            page: state.current_page,
            processed: state.processed,
            added: state.added,
            deleted: state.deleted,
        }
    }
}

// ============================================================================
// Status report
// ============================================================================

/// The status object returned by every phase invocation and status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: RunStatus,
    pub method: String,
    pub timestamp: i64,
    pub processed: u64,
    pub added: u64,
    pub deleted: u64,
    pub page: u32,
    pub total: u64,
}

impl From<&RunState> for StatusReport {
    fn from(state: &RunState) -> Self {
        Self {
            status: state.status,
            method: state.method.clone(),
            timestamp: state.timestamp,
            processed: state.processed,
            added: state.added,
            deleted: state.deleted,
            page: state.current_page,
            total: state.total,
        }
    }
}
