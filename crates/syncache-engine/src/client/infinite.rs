//! Paginated resources.
//!
//! Pages follow the `limit` / `offset` query convention: page `n` of size
//! `s` is the request with `limit=s&offset=n*s`. Every page is an ordinary
//! key with its own subscription, so pages share the cache, deduplication
//! and polling with any other consumer of the same request.

use syncache_core::{Method, RequestParams, Result, SyncError};
use tracing::debug;

use super::{ResourceHandle, ResourceOptions, ResourceState, SyncClient};

/// A growing list of page subscriptions. Dropping it unsubscribes every
/// page.
pub struct InfiniteHandle<V: Send + Sync + 'static> {
    client: SyncClient<V>,
    method: Method,
    template: String,
    params: RequestParams,
    page_size: usize,
    options: ResourceOptions,
    pages: Vec<ResourceHandle<V>>,
}

impl<V: Send + Sync + 'static> InfiniteHandle<V> {
    /// Subscribes to the first page.
    pub(crate) fn open(
        client: SyncClient<V>,
        method: Method,
        template: &str,
        params: RequestParams,
        page_size: usize,
        options: ResourceOptions,
    ) -> Result<Self> {
        if page_size == 0 {
            return Err(SyncError::invalid_shape(template, "page size must be positive"));
        }

        let mut handle = Self {
            client,
            method,
            template: template.to_string(),
            params,
            page_size,
            options,
            pages: Vec::new(),
        };
        handle.load_more()?;
        Ok(handle)
    }

    /// Subscribes to the next page. Returns its index.
    pub fn load_more(&mut self) -> Result<usize> {
        let index = self.pages.len();
        let params = self.page_params(index);
        let key = self.client.key(self.method, &self.template, &params)?;

        debug!(key = %key, page = index, "Loading page");
        let page = self.client.subscribe(key, self.options.clone());
        self.pages.push(page);
        Ok(index)
    }

    /// Grows or shrinks the list to `size` pages. Dropped pages are
    /// unsubscribed.
    pub fn set_size(&mut self, size: usize) -> Result<()> {
        self.pages.truncate(size);
        while self.pages.len() < size {
            self.load_more()?;
        }
        Ok(())
    }

    /// Returns the latest state of every page, in page order.
    pub fn pages(&mut self) -> Vec<ResourceState<V>> {
        self.pages.iter_mut().map(ResourceHandle::state).collect()
    }

    /// Returns the subscription of page `index`.
    pub fn page(&mut self, index: usize) -> Option<&mut ResourceHandle<V>> {
        self.pages.get_mut(index)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns true while the last page has no data yet.
    pub fn is_loading_more(&mut self) -> bool {
        self.pages.last_mut().is_some_and(|page| page.state().is_loading)
    }

    /// Returns true when the last page came back shorter than a full page.
    /// `len` counts the items of a page.
    pub fn is_exhausted(&mut self, len: impl Fn(&V) -> usize) -> bool {
        let page_size = self.page_size;
        self.pages
            .last_mut()
            .and_then(|page| page.state().data)
            .is_some_and(|data| len(data.as_ref()) < page_size)
    }

    fn page_params(&self, index: usize) -> RequestParams {
        let mut params = self.params.clone();
        params.set_query("limit", self.page_size);
        params.set_query("offset", index * self.page_size);
        params
    }
}
