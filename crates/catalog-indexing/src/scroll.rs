//! Paging through every document id of an index with a scroll cursor.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use catalog_search::{safe_call, SearchClient, SearchError, SearchRequest};

use crate::error::IndexingError;

/// Keep-alive of the first request, which may wait behind a cold index.
pub const FIRST_SCROLL_TTL: Duration = Duration::from_secs(120);

/// Keep-alive of every following page.
pub const NEXT_SCROLL_TTL: Duration = Duration::from_secs(30);

/// Ids of one index, `page_size` at a time, in index order without sources.
pub struct IdScroll<'a> {
    client: &'a dyn SearchClient,
    index: String,
    page_size: usize,
    scroll_id: Option<String>,
    started: bool,
    done: bool,
}

impl<'a> IdScroll<'a> {
    pub fn new(client: &'a dyn SearchClient, index: impl Into<String>, page_size: usize) -> Self {
        Self {
            client,
            index: index.into(),
            page_size: page_size.max(1),
            scroll_id: None,
            started: false,
            done: false,
        }
    }

    /// Next page of ids; `None` once the cursor is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<String>>, SearchError> {
        if self.done {
            return Ok(None);
        }
        let page = match (&self.scroll_id, self.started) {
            (_, false) => {
                self.started = true;
                let request = SearchRequest::new()
                    .with_query(json!({ "match_all": {} }))
                    .with_size(self.page_size)
                    .with_sort(json!(["_doc"]))
                    .without_source();
                self.client
                    .search(&self.index, &request, Some(FIRST_SCROLL_TTL))
                    .await?
            }
            (Some(id), true) => self.client.scroll(id, NEXT_SCROLL_TTL).await?,
            (None, true) => {
                self.done = true;
                return Ok(None);
            }
        };
        if page.scroll_id.is_some() {
            self.scroll_id = page.scroll_id.clone();
        }
        if page.hits.is_empty() {
            self.close().await?;
            return Ok(None);
        }
        Ok(Some(page.ids()))
    }

    /// Release the server-side cursor. Transport errors are only logged.
    pub async fn close(&mut self) -> Result<(), SearchError> {
        self.done = true;
        if let Some(id) = self.scroll_id.take() {
            safe_call("clear_scroll", self.client.clear_scroll(&id)).await?;
        }
        Ok(())
    }

    /// Drain the cursor into a set, stopping early when `cancel` fires.
    pub async fn collect(mut self, cancel: &CancellationToken) -> Result<HashSet<String>, IndexingError> {
        let mut ids = HashSet::new();
        while let Some(page) = self.next_page().await? {
            ids.extend(page);
            if cancel.is_cancelled() {
                self.close().await?;
                return Err(IndexingError::Cancelled);
            }
        }
        Ok(ids)
    }
}
