//! Mode-independent pieces of stack execution.
//!
//! The sync and async sessions each own their sequential loop (the
//! suspension discipline differs); the failure-semantics plumbing shared
//! by both lives here.
//!
//! Fail-fast: the first failure stops the loop, every unexecuted
//! operation yields a "skipped" result, the transaction rolls back, and
//! the results are returned to the caller for inspection.
//!
//! Collect-errors: every operation runs; if any failed, the transaction
//! rolls back and the aggregate error carrying all per-operation results
//! is raised.

use super::StackResult;
use crate::error::{Result, SqlSpecError, StackError};

/// Fill `results` with skipped entries for operations `from..total`, all
/// attributed to the failure at `failed_at`.
pub(crate) fn skip_tail(results: &mut Vec<StackResult>, total: usize, failed_at: usize) {
    for index in results.len()..total {
        results.push(StackResult::skipped(index, failed_at));
    }
    debug_assert_eq!(results.len(), total);
}

/// Finish a collect-errors run: raise the aggregate if anything failed.
pub(crate) fn finish_collect(results: Vec<StackResult>) -> Result<Vec<StackResult>> {
    if results.iter().any(|r| r.error.is_some()) {
        Err(SqlSpecError::Stack(StackError { results }))
    } else {
        Ok(results)
    }
}
