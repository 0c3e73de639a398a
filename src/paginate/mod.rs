//! Pagination engine
//!
//! Four walk strategies over a caller-supplied [`PageFetcher`]:
//!
//! - [`walk_forward`]: cursor pagination from an empty cursor
//! - [`walk_newer_than`]: incremental cursor pagination with a
//!   checkpoint cutoff signalled by the fetcher
//! - [`walk_offset`]: running-offset pagination
//! - [`walk_link_header`]: RFC 5988 `Link: <...>; rel="next"` chains
//!
//! All strategies are strictly sequential (page N+1 is never requested
//! before page N is handled), propagate fetch errors immediately, check
//! the cancellation token before every fetch, and return the number of
//! pages fetched.

mod types;

pub use types::{HeaderPageFetcher, PageFetcher, PageQuery, PageTurn};

use crate::error::{Error, Result};
use crate::types::Checkpoint;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Safety cap on link-header chains. A well-formed chain ends when the
/// `rel="next"` segment disappears; a server echoing the same URL
/// forever would otherwise walk indefinitely.
const MAX_LINK_PAGES: u64 = 10_000;

/// Walk cursor pagination forward from the beginning.
///
/// Starts with an empty cursor and follows `end_cursor` while the
/// fetcher reports `has_next_page`.
pub async fn walk_forward(
    fetcher: &mut dyn PageFetcher,
    page_size: u64,
    cancel: &CancellationToken,
) -> Result<u64> {
    walk_cursor(fetcher, page_size, None, cancel).await
}

/// Walk cursor pagination for an incremental export.
///
/// Without a checkpoint this is a warm-up walk from the beginning,
/// ascending by update time so a partial run still moves the
/// checkpoint forward. With a checkpoint the query carries the cutoff
/// and the fetcher ends the walk by returning
/// [`PageTurn::ReachedCheckpoint`] the moment it observes an item not
/// newer than it.
pub async fn walk_newer_than(
    fetcher: &mut dyn PageFetcher,
    checkpoint: Option<Checkpoint>,
    page_size: u64,
    cancel: &CancellationToken,
) -> Result<u64> {
    walk_cursor(fetcher, page_size, checkpoint, cancel).await
}

async fn walk_cursor(
    fetcher: &mut dyn PageFetcher,
    page_size: u64,
    newer_than: Option<Checkpoint>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut query = PageQuery {
        cursor: None,
        page_size,
        offset: 0,
        newer_than,
    };
    let mut pages: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match fetcher.fetch(&query).await? {
            PageTurn::Continue(info) => {
                pages += 1;
                if !info.has_next_page {
                    break;
                }
                query.cursor = Some(info.end_cursor);
            }
            PageTurn::ReachedCheckpoint => {
                pages += 1;
                debug!(pages, "walk stopped at checkpoint cutoff");
                break;
            }
            PageTurn::Exhausted => {
                pages += 1;
                break;
            }
        }
    }

    debug!(pages, "cursor walk complete");
    Ok(pages)
}

/// Walk offset pagination with a running offset.
///
/// Advances `offset` by the page size each fetch reports. A page that
/// claims more data but delivered zero items would loop forever, so it
/// is a hard error rather than silent termination.
pub async fn walk_offset(
    fetcher: &mut dyn PageFetcher,
    page_size: u64,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut query = PageQuery {
        cursor: None,
        page_size,
        offset: 0,
        newer_than: None,
    };
    let mut pages: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match fetcher.fetch(&query).await? {
            PageTurn::Continue(info) => {
                pages += 1;
                if !info.has_more {
                    break;
                }
                if info.page_size == 0 {
                    return Err(Error::pagination(format!(
                        "page at offset {} reported more data but zero items",
                        query.offset
                    )));
                }
                query.offset += info.page_size;
            }
            PageTurn::ReachedCheckpoint | PageTurn::Exhausted => {
                pages += 1;
                break;
            }
        }
    }

    debug!(pages, "offset walk complete");
    Ok(pages)
}

/// Walk an RFC 5988 link-header chain starting from `first_url`.
///
/// Follows the `rel="next"` URL from each response's `Link` header
/// until it disappears, bounded by [`MAX_LINK_PAGES`].
pub async fn walk_link_header(
    fetcher: &mut dyn HeaderPageFetcher,
    first_url: &str,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut url = first_url.to_string();
    let mut pages: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if pages >= MAX_LINK_PAGES {
            return Err(Error::pagination(format!(
                "link-header chain exceeded {MAX_LINK_PAGES} pages starting from {first_url}"
            )));
        }

        let headers = fetcher.fetch(&url).await?;
        pages += 1;

        let next = headers
            .get("link")
            .and_then(|v| v.to_str().ok())
            .and_then(|h| parse_link_header(h, "next"));
        match next {
            Some(next_url) => url = next_url,
            None => break,
        }
    }

    debug!(pages, "link-header walk complete");
    Ok(pages)
}

/// Parse a `Link` header and extract the URL for the given rel.
///
/// Format: `<url>; rel="next", <url>; rel="prev"`
pub fn parse_link_header(header: &str, target_rel: &str) -> Option<String> {
    for part in header.split(',') {
        let part = part.trim();
        let mut url = None;
        let mut rel = None;

        for segment in part.split(';') {
            let segment = segment.trim();
            if segment.starts_with('<') && segment.ends_with('>') {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(stripped) = segment.strip_prefix("rel=") {
                rel = Some(stripped.trim_matches('"').trim_matches('\''));
            }
        }

        if let (Some(u), Some(r)) = (url, rel) {
            if r == target_rel {
                return Some(u.to_string());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests;
