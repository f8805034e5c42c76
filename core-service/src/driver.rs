//! Caller-side loop that invokes an action until it completes.
//!
//! The engine handles one chunk per invocation. Hosts that can afford to run
//! an action in one go (maintenance commands, scheduled jobs) use
//! [`ContinuationDriver`] instead of re-invoking by hand.

use crate::Result;
use core_sync::{continuation, ActionKind, Continuation, PhaseParams, StatusReport, SyncEngine};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a driven action ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Every record was handled
    Completed(StatusReport),
    /// The engine stopped short, e.g. after a cancellation
    Halted(StatusReport),
}

impl DriveOutcome {
    pub fn report(&self) -> &StatusReport {
        match self {
            DriveOutcome::Completed(report) | DriveOutcome::Halted(report) => report,
        }
    }

    pub fn into_report(self) -> StatusReport {
        match self {
            DriveOutcome::Completed(report) | DriveOutcome::Halted(report) => report,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, DriveOutcome::Completed(_))
    }
}

/// Re-invokes an action with continuation parameters until it is done
#[derive(Clone)]
pub struct ContinuationDriver {
    engine: Arc<SyncEngine>,
}

impl ContinuationDriver {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    /// Run `kind` starting with `params` until complete, canceled or failed
    ///
    /// An invocation that changes neither `processed` nor the page is treated
    /// as stalled and ends the loop.
    pub async fn drive(&self, kind: ActionKind, params: PhaseParams) -> Result<DriveOutcome> {
        let chunk_size = self.engine.chunk_size();
        let mut report = self.engine.run(kind, params).await?;
        let mut invocations = 1u32;

        loop {
            match continuation(kind, &report, chunk_size) {
                Continuation::Complete => {
                    info!(
                        action = kind.name(),
                        invocations,
                        processed = report.processed,
                        added = report.added,
                        deleted = report.deleted,
                        "Action complete"
                    );
                    return Ok(DriveOutcome::Completed(report));
                }
                Continuation::Halted(status) => {
                    info!(action = kind.name(), %status, invocations, "Action halted");
                    return Ok(DriveOutcome::Halted(report));
                }
                Continuation::Next(next) => {
                    debug!(action = kind.name(), page = ?next.page, "Continuing");
                    let previous = (report.processed, report.page);
                    report = self.engine.run(kind, next).await?;
                    invocations += 1;

                    if (report.processed, report.page) == previous {
                        warn!(action = kind.name(), invocations, "No progress made, stopping");
                        return Ok(DriveOutcome::Halted(report));
                    }
                }
            }
        }
    }
}
