//! Lazy forward-only row iteration.
//!
//! A [`Cursor`] pulls rows from a [`PageSource`] one page at a time, runs an
//! optional filter predicate on every row and stops after an optional number
//! of accepted rows. Rows the filter rejects do not count towards the limit.

use std::collections::VecDeque;

use tokio_util::sync::CancellationToken;

use crate::error::{FilterError, StoreError, StoreResult};

/// Per-row predicate. Returning an error aborts the walk.
pub type RowFilter<'a, T> = Box<dyn FnMut(&T) -> Result<bool, FilterError> + 'a>;

/// Rows that can be resumed after by key (keyset pagination).
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Supplies rows to a cursor in key order.
pub trait PageSource<T> {
    /// Fetch up to `limit` rows whose key sorts after `after`.
    fn fetch(&mut self, after: Option<&str>, limit: usize) -> StoreResult<Vec<T>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorState {
    Open,
    Exhausted,
    Closed,
}

/// Options accepted by list operations.
pub struct ListOptions<'a, T> {
    /// Maximum number of rows to yield.
    pub limit: Option<usize>,
    /// Resume after this key.
    pub after: Option<String>,
    /// Server-side condition on the stored content.
    pub condition: Option<crate::query::Condition>,
    /// Predicate applied to every decoded row.
    pub filter: Option<RowFilter<'a, T>>,
    /// Checked before every step.
    pub cancel: Option<CancellationToken>,
}

impl<T> Default for ListOptions<'_, T> {
    fn default() -> Self {
        Self {
            limit: None,
            after: None,
            condition: None,
            filter: None,
            cancel: None,
        }
    }
}

impl<'a, T> ListOptions<'a, T> {
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, key: impl Into<String>) -> Self {
        self.after = Some(key.into());
        self
    }

    pub fn condition(mut self, condition: crate::query::Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn filter(mut self, filter: impl FnMut(&T) -> Result<bool, FilterError> + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl<T> std::fmt::Debug for ListOptions<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListOptions")
            .field("limit", &self.limit)
            .field("after", &self.after)
            .field("condition", &self.condition)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// Lazy row iterator. See the module documentation.
pub struct Cursor<'a, T> {
    source: Option<Box<dyn PageSource<T> + 'a>>,
    source_done: bool,
    page_size: usize,
    buffer: VecDeque<T>,
    last_key: Option<String>,
    filter: Option<RowFilter<'a, T>>,
    limit: Option<usize>,
    yielded: usize,
    current: Option<T>,
    state: CursorState,
    cancel: Option<CancellationToken>,
}

impl<'a, T: Keyed + 'a> Cursor<'a, T> {
    /// Build a cursor over `source`, applying the filter, limit and
    /// cancellation token carried by `options`.
    pub fn new(
        source: impl PageSource<T> + 'a,
        page_size: usize,
        options: ListOptions<'a, T>,
    ) -> Self {
        Self {
            source: Some(Box::new(source)),
            source_done: false,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            last_key: options.after,
            filter: options.filter,
            limit: options.limit,
            yielded: 0,
            current: None,
            state: CursorState::Open,
            cancel: options.cancel,
        }
    }

    /// Cursor over rows already in memory.
    pub fn from_rows(rows: Vec<T>, options: ListOptions<'a, T>) -> Self {
        let mut cursor = Self::new(NoRows, 1, options);
        cursor.buffer = rows.into();
        cursor.source_done = true;
        cursor
    }

    pub fn empty() -> Self {
        Self::from_rows(Vec::new(), ListOptions::default())
    }

    /// Advance to the next accepted row.
    ///
    /// Returns `Ok(false)` once the rows run out or the limit is reached. A
    /// filter error or cancellation closes the cursor and is returned.
    pub fn walk(&mut self) -> StoreResult<bool> {
        if self.state != CursorState::Open {
            return Ok(false);
        }
        if self.limit.is_some_and(|limit| self.yielded >= limit) {
            self.finish();
            return Ok(false);
        }

        loop {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                self.close();
                return Err(StoreError::Cancelled);
            }

            let Some(row) = self.next_row()? else {
                self.finish();
                return Ok(false);
            };

            let accepted = match self.filter.as_mut() {
                Some(filter) => match filter(&row) {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        self.close();
                        return Err(StoreError::Filter(err));
                    }
                },
                None => true,
            };

            if accepted {
                self.current = Some(row);
                self.yielded += 1;
                return Ok(true);
            }
        }
    }

    /// The last row accepted by [`Self::walk`].
    pub fn get(&self) -> Option<&T> {
        self.current.as_ref()
    }

    /// Take ownership of the last accepted row.
    pub fn take(&mut self) -> Option<T> {
        self.current.take()
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Number of rows accepted so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    /// Release the page source and any buffered rows. Idempotent.
    pub fn close(&mut self) {
        self.release();
        self.state = CursorState::Closed;
    }

    /// Walk to the end, collecting every accepted row, then close.
    pub fn collect_rows(mut self) -> StoreResult<Vec<T>> {
        let mut rows = Vec::new();
        while self.walk()? {
            if let Some(row) = self.take() {
                rows.push(row);
            }
        }
        self.close();
        Ok(rows)
    }

    fn next_row(&mut self) -> StoreResult<Option<T>> {
        if self.buffer.is_empty() && !self.source_done {
            let Some(source) = self.source.as_mut() else {
                return Ok(None);
            };
            let page = match source.fetch(self.last_key.as_deref(), self.page_size) {
                Ok(page) => page,
                Err(err) => {
                    self.close();
                    return Err(err);
                }
            };
            if page.len() < self.page_size {
                self.source_done = true;
            }
            self.buffer.extend(page);
        }
        let row = self.buffer.pop_front();
        if let Some(row) = &row {
            self.last_key = Some(row.key().to_string());
        }
        Ok(row)
    }

    fn finish(&mut self) {
        self.release();
        self.state = CursorState::Exhausted;
    }

    fn release(&mut self) {
        self.source = None;
        self.source_done = true;
        self.buffer.clear();
    }
}

impl<T> Drop for Cursor<'_, T> {
    fn drop(&mut self) {
        self.source = None;
        self.buffer.clear();
    }
}

struct NoRows;

impl<T> PageSource<T> for NoRows {
    fn fetch(&mut self, _after: Option<&str>, _limit: usize) -> StoreResult<Vec<T>> {
        Ok(Vec::new())
    }
}

impl Keyed for grafton_types::Data {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for grafton_types::Graft {
    fn key(&self) -> &str {
        &self.id
    }
}
