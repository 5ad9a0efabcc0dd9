use grafton_store::{Cursor, CursorState, Keyed};

use crate::error::ChainResult;

/// A store [`Cursor`] whose errors are already mapped into [`crate::ChainError`].
///
/// Rows rejected by the policy layer's per-row filter are skipped silently;
/// a rule that fails to evaluate aborts the walk with an internal error.
pub struct ChainCursor<'a, T> {
    inner: Cursor<'a, T>,
}

impl<'a, T: Keyed + 'a> ChainCursor<'a, T> {
    pub fn new(inner: Cursor<'a, T>) -> Self {
        Self { inner }
    }

    /// Advance to the next visible row. `Ok(false)` once exhausted.
    pub fn walk(&mut self) -> ChainResult<bool> {
        Ok(self.inner.walk()?)
    }

    pub fn get(&self) -> Option<&T> {
        self.inner.get()
    }

    pub fn take(&mut self) -> Option<T> {
        self.inner.take()
    }

    pub fn state(&self) -> CursorState {
        self.inner.state()
    }

    pub fn yielded(&self) -> usize {
        self.inner.yielded()
    }

    pub fn close(&mut self) {
        self.inner.close();
    }

    pub fn collect_rows(self) -> ChainResult<Vec<T>> {
        Ok(self.inner.collect_rows()?)
    }
}

impl<T> std::fmt::Debug for ChainCursor<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainCursor").finish_non_exhaustive()
    }
}
