//! Forward-only iteration over query results, optionally loaded in pages

use std::collections::VecDeque;

use datum_database::query::{SortDirection, select};
use datum_database_connection::ConnectionScope;

use crate::{Model, OrmError, QueryProxy, Record, query_proxy::load_records};

/// Yields the records matching a [`QueryProxy`].
///
/// Without a batch size everything is loaded by a single query. With one, each page is
/// fetched at an offset advanced by the number of records yielded so far, until a page comes
/// back empty or the proxy's limit is reached. Pages are ordered by the proxy's order, or by
/// primary key when it has none. Rows inserted or deleted while iterating shift the pages.
///
/// A failed query is yielded once as `Err` and ends the iteration.
pub struct RecordEnumerator<'a, M: Model> {
    scope: &'a mut ConnectionScope,
    proxy: QueryProxy<M>,
    cursor: u64,
    buffer: VecDeque<Record<M>>,
    done: bool,
}

impl<'a, M: Model> RecordEnumerator<'a, M> {
    pub(crate) const fn new(scope: &'a mut ConnectionScope, proxy: QueryProxy<M>) -> Self {
        Self {
            scope,
            proxy,
            cursor: 0,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Number of records yielded so far
    #[must_use]
    pub const fn cursor(&self) -> u64 {
        self.cursor
    }

    fn fetch_page(&mut self) -> Result<(), OrmError> {
        self.proxy.check()?;

        let mut query = select(M::table_name())
            .filter_if_some(self.proxy.filter_ref().cloned())
            .sorts(self.proxy.order().iter().cloned())
            .named(format!("{} Load", M::NAME));

        if let Some(batch_size) = self.proxy.batch_size() {
            let remaining = self
                .proxy
                .limit_value()
                .map(|limit| limit.saturating_sub(self.cursor));

            if remaining == Some(0) {
                self.done = true;
                return Ok(());
            }

            if query.sorts.is_empty() {
                query = query.sort(M::PRIMARY_KEY, SortDirection::Asc);
            }

            query = query
                .limit(remaining.map_or(batch_size, |x| x.min(batch_size)))
                .offset(self.proxy.skip_value().unwrap_or_default() + self.cursor);
        } else {
            self.done = true;

            if let Some(limit) = self.proxy.limit_value() {
                query = query.limit(limit);
            }
            if let Some(skip) = self.proxy.skip_value() {
                query = query.offset(skip);
            }
        }

        let records = load_records::<M>(self.scope.adapter_for(M::HIERARCHY)?, &query)?;

        log::trace!(
            "Loaded page of {} {} at cursor {}",
            records.len(),
            M::NAME,
            self.cursor
        );

        if records.is_empty() {
            self.done = true;
        }
        self.buffer.extend(records);

        Ok(())
    }
}

impl<M: Model> Iterator for RecordEnumerator<'_, M> {
    type Item = Result<Record<M>, OrmError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            if let Err(e) = self.fetch_page() {
                self.done = true;
                return Some(Err(e));
            }
        }

        let record = self.buffer.pop_front()?;
        self.cursor += 1;
        Some(Ok(record))
    }
}

impl<M: Model> std::fmt::Debug for RecordEnumerator<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordEnumerator")
            .field("proxy", &self.proxy)
            .field("cursor", &self.cursor)
            .field("buffered", &self.buffer.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
