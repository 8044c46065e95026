//! Client-side driver of the cursor protocol

use crate::record::{Record, TenantId};
use crate::store::{RecordStore, StoreError};
use futures::stream::{self, Stream, TryStreamExt};
use std::sync::Arc;
use tracing::debug;

/// Drives `scan_page` for one tenant until the store reports the end of the
/// dataset. Holds only the last cursor; dropping the pager between pages
/// needs no cleanup on the store side.
pub struct RecordPager<S: RecordStore> {
    store: Arc<S>,
    tenant_id: TenantId,
    page_size_hint: usize,
    cursor: Option<String>,
    exhausted: bool,
    pages_fetched: u64,
}

impl<S: RecordStore> RecordPager<S> {
    pub fn new(store: Arc<S>, tenant_id: TenantId, page_size_hint: usize) -> Self {
        debug_assert!(page_size_hint > 0, "Precondition: page size hint must be positive");
        RecordPager {
            store,
            tenant_id,
            page_size_hint,
            cursor: None,
            exhausted: false,
            pages_fetched: 0,
        }
    }

    /// Resume from a cursor handed out by an earlier enumeration
    pub fn resume_from(mut self, cursor: String) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetch the next page. Returns `Ok(None)` once the scan is complete.
    ///
    /// A failed call leaves the pager positioned where it was, so the same
    /// page can be requested again.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Record>>, StoreError> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .store
            .scan_page(&self.tenant_id, self.cursor.as_deref(), self.page_size_hint)
            .await?;
        self.pages_fetched += 1;

        debug!(
            tenant = %self.tenant_id,
            page = self.pages_fetched,
            items = page.items.len(),
            last = page.is_last(),
            "fetched scan page"
        );

        match page.next_cursor {
            Some(next) => self.cursor = Some(next),
            None => {
                self.cursor = None;
                self.exhausted = true;
            }
        }
        Ok(Some(page.items))
    }

    /// Drive the protocol to exhaustion and return every record seen
    pub async fn collect_all(mut self) -> Result<Vec<Record>, StoreError> {
        let mut all = Vec::new();
        while let Some(items) = self.next_page().await? {
            all.extend(items);
        }
        Ok(all)
    }

    /// Flatten the enumeration into a stream of records
    pub fn into_stream(self) -> impl Stream<Item = Result<Record, StoreError>> {
        stream::try_unfold(self, |mut pager| async move {
            let next = pager.next_page().await?;
            Ok::<_, StoreError>(next.map(|items| (items, pager)))
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok::<_, StoreError>)))
        .try_flatten()
    }
}
