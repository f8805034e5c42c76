//! Chunk arithmetic shared by the engine and its callers.
//!
//! Page-windowed actions track `current_page` (the page handled by the last
//! invocation) and `processed` (records handled so far across pages). A page
//! is finished once `processed >= page * chunk_size`; until then the same page
//! is requested again and applying resumes at the first unhandled record.

use crate::action::{ActionKind, InitMode, PhaseParams};
use crate::run_state::{RunStatus, StatusReport};

/// Page to fetch and the index of the first record to apply within it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page: u32,
    pub offset: usize,
}

/// Cursor following `current_page` given how many records were handled
pub fn next_cursor(current_page: u32, processed: u64, chunk_size: u32) -> PageCursor {
    if current_page == 0 {
        return cursor_for_page(1, processed, chunk_size);
    }

    let page_end = u64::from(current_page) * u64::from(chunk_size);
    let page = if processed >= page_end {
        current_page + 1
    } else {
        current_page
    };
    cursor_for_page(page, processed, chunk_size)
}

/// Cursor into an explicitly requested page
pub fn cursor_for_page(page: u32, processed: u64, chunk_size: u32) -> PageCursor {
    let page = page.max(1);
    let page_start = u64::from(page - 1) * u64::from(chunk_size);
    let offset = processed
        .saturating_sub(page_start)
        .min(u64::from(chunk_size));

    PageCursor {
        page,
        offset: offset as usize,
    }
}

/// Page number reported for an offset into a date-windowed result
pub fn page_of_offset(offset: u64, chunk_size: u32) -> u32 {
    (offset / u64::from(chunk_size.max(1))) as u32 + 1
}

/// What a caller should do after an invocation returned `report`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Invoke the same action again with these parameters
    Next(PhaseParams),
    /// Every record has been handled
    Complete,
    /// The run was canceled or is otherwise not free to continue
    Halted(RunStatus),
}

/// Decide the follow-up invocation for `kind` after `report`
pub fn continuation(kind: ActionKind, report: &StatusReport, chunk_size: u32) -> Continuation {
    if report.status != RunStatus::Free {
        return Continuation::Halted(report.status);
    }
    if report.processed >= report.total {
        return Continuation::Complete;
    }

    let params = PhaseParams {
        init: InitMode::Resume,
        ..PhaseParams::default()
    };

    match kind {
        // One cached page per invocation; counters are in pages
        ActionKind::BuildCache => Continuation::Next(params.with_page(report.page + 1)),
        kind if kind.is_page_windowed() => {
            let cursor = next_cursor(report.page, report.processed, chunk_size);
            Continuation::Next(params.with_page(cursor.page))
        }
        kind if kind.is_date_windowed() => Continuation::Next(params),
        _ => Continuation::Complete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(status: RunStatus, processed: u64, total: u64, page: u32) -> StatusReport {
        StatusReport {
            status,
            method: "import/update".to_string(),
            timestamp: 0,
            processed,
            added: processed,
            deleted: 0,
            page,
            total,
        }
    }

    #[test]
    fn test_fresh_run_starts_at_first_page() {
        assert_eq!(next_cursor(0, 0, 25), PageCursor { page: 1, offset: 0 });
    }

    #[test]
    fn test_finished_page_advances() {
        assert_eq!(next_cursor(1, 2, 2), PageCursor { page: 2, offset: 0 });
        assert_eq!(next_cursor(3, 75, 25), PageCursor { page: 4, offset: 0 });
    }

    #[test]
    fn test_partial_page_is_replayed_from_first_unhandled_record() {
        assert_eq!(next_cursor(2, 30, 25), PageCursor { page: 2, offset: 5 });
        assert_eq!(next_cursor(1, 0, 25), PageCursor { page: 1, offset: 0 });
    }

    #[test]
    fn test_explicit_page_offsets_are_clamped() {
        assert_eq!(cursor_for_page(2, 2, 2), PageCursor { page: 2, offset: 0 });
        assert_eq!(cursor_for_page(1, 10, 4), PageCursor { page: 1, offset: 4 });
        assert_eq!(cursor_for_page(0, 0, 4), PageCursor { page: 1, offset: 0 });
    }

    #[test]
    fn test_page_of_offset() {
        assert_eq!(page_of_offset(0, 25), 1);
        assert_eq!(page_of_offset(25, 25), 2);
        assert_eq!(page_of_offset(49, 25), 2);
    }

    #[test]
    fn test_continuation_rules() {
        let more = report(RunStatus::Free, 2, 3, 1);
        assert_eq!(
            continuation(ActionKind::ImportAll, &more, 2),
            Continuation::Next(PhaseParams::resume().with_page(2))
        );
        assert_eq!(
            continuation(ActionKind::ImportChanged, &more, 2),
            Continuation::Next(PhaseParams::resume())
        );
        assert_eq!(
            continuation(ActionKind::BuildCache, &report(RunStatus::Free, 1, 4, 1), 2),
            Continuation::Next(PhaseParams::resume().with_page(2))
        );

        let done = report(RunStatus::Free, 3, 3, 2);
        assert_eq!(continuation(ActionKind::ImportAll, &done, 2), Continuation::Complete);

        let canceled = report(RunStatus::FreeCanceled, 1, 3, 1);
        assert_eq!(
            continuation(ActionKind::ImportAll, &canceled, 2),
            Continuation::Halted(RunStatus::FreeCanceled)
        );
    }
}
