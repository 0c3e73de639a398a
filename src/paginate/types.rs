//! Pagination engine types: the fetcher seam and the page-turn verdict.

use crate::error::Result;
use crate::types::{Checkpoint, PageInfo};
use async_trait::async_trait;
use reqwest::header::HeaderMap;

/// The walker's request for one page.
///
/// Strategies populate only the fields they drive; the fetcher reads
/// what it needs to build the remote call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageQuery {
    /// Cursor of the page to fetch (cursor strategies); `None` on the
    /// first page
    pub cursor: Option<String>,
    /// Requested page size
    pub page_size: u64,
    /// Item offset of the page to fetch (offset strategy)
    pub offset: u64,
    /// Incremental cutoff: the fetcher stops the walk when it observes
    /// an item not newer than this
    pub newer_than: Option<Checkpoint>,
}

/// What the fetcher decided after handling one page.
///
/// Every variant means a page was fetched and its records were handled;
/// the variant only determines whether the walk advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageTurn {
    /// Keep walking; the metadata tells the strategy how to advance
    Continue(PageInfo),
    /// An item at or before the incremental cutoff was observed; the
    /// rest of the result set is already exported
    ReachedCheckpoint,
    /// Nothing follows this page
    Exhausted,
}

/// One page fetch against the remote service.
///
/// Implementations own the service-specific query construction and
/// record handling; the walkers own ordering, advancement, and
/// cancellation. `fetch` takes `&mut self` so fetchers can accumulate
/// results or thread per-walk state without interior mutability.
#[async_trait]
pub trait PageFetcher: Send {
    /// Fetch and handle the page described by `query`
    async fn fetch(&mut self, query: &PageQuery) -> Result<PageTurn>;
}

/// One page fetch for link-header pagination.
///
/// The walker navigates by URL alone and needs the response headers to
/// find the next one; records are handled inside the fetcher as usual.
#[async_trait]
pub trait HeaderPageFetcher: Send {
    /// Fetch and handle the page at `url`, returning its headers
    async fn fetch(&mut self, url: &str) -> Result<HeaderMap>;
}
