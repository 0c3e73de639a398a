//! Tests for the pagination engine

use super::*;
use crate::error::Error;
use crate::types::PageInfo;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;

/// Replays a scripted sequence of page turns, recording every query.
struct ScriptedFetcher {
    script: Vec<PageTurn>,
    queries: Vec<PageQuery>,
}

impl ScriptedFetcher {
    fn new(script: Vec<PageTurn>) -> Self {
        Self {
            script,
            queries: Vec::new(),
        }
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&mut self, query: &PageQuery) -> crate::error::Result<PageTurn> {
        self.queries.push(query.clone());
        if self.queries.len() > self.script.len() {
            return Err(Error::pagination("fetched past end of script"));
        }
        Ok(self.script[self.queries.len() - 1].clone())
    }
}

#[tokio::test]
async fn test_walk_forward_threads_cursors() {
    let mut fetcher = ScriptedFetcher::new(vec![
        PageTurn::Continue(PageInfo::next_cursor("c1")),
        PageTurn::Continue(PageInfo::next_cursor("c2")),
        PageTurn::Continue(PageInfo::last()),
    ]);
    let cancel = CancellationToken::new();

    let pages = walk_forward(&mut fetcher, 50, &cancel).await.unwrap();

    assert_eq!(pages, 3);
    assert_eq!(fetcher.queries.len(), 3);
    assert_eq!(fetcher.queries[0].cursor, None);
    assert_eq!(fetcher.queries[1].cursor, Some("c1".to_string()));
    assert_eq!(fetcher.queries[2].cursor, Some("c2".to_string()));
    assert!(fetcher.queries.iter().all(|q| q.page_size == 50));
}

#[tokio::test]
async fn test_walk_forward_single_page() {
    let mut fetcher = ScriptedFetcher::new(vec![PageTurn::Continue(PageInfo::last())]);
    let cancel = CancellationToken::new();

    let pages = walk_forward(&mut fetcher, 10, &cancel).await.unwrap();
    assert_eq!(pages, 1);
}

#[tokio::test]
async fn test_walk_forward_fetch_error_propagates() {
    struct FailingFetcher;

    #[async_trait]
    impl PageFetcher for FailingFetcher {
        async fn fetch(&mut self, _query: &PageQuery) -> crate::error::Result<PageTurn> {
            Err(Error::http_status(500, "boom"))
        }
    }

    let cancel = CancellationToken::new();
    let err = walk_forward(&mut FailingFetcher, 10, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HttpStatus { status: 500, .. }));
}

#[tokio::test]
async fn test_walk_forward_cancelled_before_first_fetch() {
    let mut fetcher = ScriptedFetcher::new(vec![PageTurn::Continue(PageInfo::last())]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = walk_forward(&mut fetcher, 10, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(fetcher.queries.is_empty());
}

#[tokio::test]
async fn test_walk_newer_than_carries_cutoff_and_stops() {
    let mut fetcher = ScriptedFetcher::new(vec![
        PageTurn::Continue(PageInfo::next_cursor("c1")),
        PageTurn::ReachedCheckpoint,
        // Never reached: the cutoff ends the walk.
        PageTurn::Continue(PageInfo::next_cursor("c2")),
    ]);
    let cancel = CancellationToken::new();

    let pages = walk_newer_than(
        &mut fetcher,
        Some("2024-01-01T00:00:00Z".to_string()),
        25,
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(pages, 2);
    assert_eq!(fetcher.queries.len(), 2);
    assert_eq!(
        fetcher.queries[0].newer_than.as_deref(),
        Some("2024-01-01T00:00:00Z")
    );
    assert_eq!(
        fetcher.queries[1].newer_than.as_deref(),
        Some("2024-01-01T00:00:00Z")
    );
}

#[tokio::test]
async fn test_walk_newer_than_without_checkpoint_is_full_walk() {
    let mut fetcher = ScriptedFetcher::new(vec![
        PageTurn::Continue(PageInfo::next_cursor("c1")),
        PageTurn::Continue(PageInfo::last()),
    ]);
    let cancel = CancellationToken::new();

    let pages = walk_newer_than(&mut fetcher, None, 25, &cancel).await.unwrap();

    assert_eq!(pages, 2);
    assert!(fetcher.queries.iter().all(|q| q.newer_than.is_none()));
}

#[tokio::test]
async fn test_walk_offset_advances_by_reported_page_size() {
    let mut fetcher = ScriptedFetcher::new(vec![
        PageTurn::Continue(PageInfo::more(50)),
        PageTurn::Continue(PageInfo::more(50)),
        PageTurn::Continue(PageInfo::more(7)),
        PageTurn::Continue(PageInfo::last()),
    ]);
    let cancel = CancellationToken::new();

    let pages = walk_offset(&mut fetcher, 50, &cancel).await.unwrap();

    assert_eq!(pages, 4);
    let offsets: Vec<u64> = fetcher.queries.iter().map(|q| q.offset).collect();
    assert_eq!(offsets, vec![0, 50, 100, 107]);
}

#[tokio::test]
async fn test_walk_offset_zero_page_size_with_more_is_hard_error() {
    let mut fetcher = ScriptedFetcher::new(vec![PageTurn::Continue(PageInfo {
        has_more: true,
        page_size: 0,
        ..PageInfo::default()
    })]);
    let cancel = CancellationToken::new();

    let err = walk_offset(&mut fetcher, 50, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Pagination { .. }));
    assert_eq!(fetcher.queries.len(), 1);
}

#[tokio::test]
async fn test_walk_offset_exhausted_stops() {
    let mut fetcher = ScriptedFetcher::new(vec![
        PageTurn::Continue(PageInfo::more(10)),
        PageTurn::Exhausted,
    ]);
    let cancel = CancellationToken::new();

    let pages = walk_offset(&mut fetcher, 10, &cancel).await.unwrap();
    assert_eq!(pages, 2);
}

/// Serves a fixed chain of link headers, recording every URL visited.
struct LinkChainFetcher {
    /// url -> link header value for that response
    links: Vec<(String, Option<String>)>,
    visited: Vec<String>,
}

#[async_trait]
impl HeaderPageFetcher for LinkChainFetcher {
    async fn fetch(&mut self, url: &str) -> crate::error::Result<HeaderMap> {
        self.visited.push(url.to_string());
        let mut headers = HeaderMap::new();
        if let Some((_, Some(link))) = self.links.iter().find(|(u, _)| u == url) {
            headers.insert("link", link.parse().map_err(|_| Error::protocol("bad header"))?);
        }
        Ok(headers)
    }
}

#[tokio::test]
async fn test_walk_link_header_follows_next_rel() {
    let mut fetcher = LinkChainFetcher {
        links: vec![
            (
                "https://api.example.com/items?page=1".to_string(),
                Some(
                    r#"<https://api.example.com/items?page=2>; rel="next", <https://api.example.com/items?page=1>; rel="first""#
                        .to_string(),
                ),
            ),
            (
                "https://api.example.com/items?page=2".to_string(),
                Some(r#"<https://api.example.com/items?page=1>; rel="prev""#.to_string()),
            ),
        ],
        visited: Vec::new(),
    };
    let cancel = CancellationToken::new();

    let pages = walk_link_header(&mut fetcher, "https://api.example.com/items?page=1", &cancel)
        .await
        .unwrap();

    assert_eq!(pages, 2);
    assert_eq!(
        fetcher.visited,
        vec![
            "https://api.example.com/items?page=1",
            "https://api.example.com/items?page=2"
        ]
    );
}

#[tokio::test]
async fn test_walk_link_header_no_header_is_single_page() {
    let mut fetcher = LinkChainFetcher {
        links: vec![("https://api.example.com/items".to_string(), None)],
        visited: Vec::new(),
    };
    let cancel = CancellationToken::new();

    let pages = walk_link_header(&mut fetcher, "https://api.example.com/items", &cancel)
        .await
        .unwrap();
    assert_eq!(pages, 1);
}

#[tokio::test]
async fn test_walk_link_header_self_referencing_chain_hits_cap() {
    struct EchoFetcher;

    #[async_trait]
    impl HeaderPageFetcher for EchoFetcher {
        async fn fetch(&mut self, url: &str) -> crate::error::Result<HeaderMap> {
            let mut headers = HeaderMap::new();
            let value = format!(r#"<{url}>; rel="next""#);
            headers.insert(
                "link",
                value.parse().map_err(|_| Error::protocol("bad header"))?,
            );
            Ok(headers)
        }
    }

    let cancel = CancellationToken::new();
    let err = walk_link_header(&mut EchoFetcher, "https://api.example.com/loop", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Pagination { .. }));
}

#[test]
fn test_parse_link_header() {
    let header = r#"<https://api.github.com/repos?page=2>; rel="next", <https://api.github.com/repos?page=10>; rel="last""#;
    assert_eq!(
        parse_link_header(header, "next"),
        Some("https://api.github.com/repos?page=2".to_string())
    );
    assert_eq!(
        parse_link_header(header, "last"),
        Some("https://api.github.com/repos?page=10".to_string())
    );
    assert_eq!(parse_link_header(header, "prev"), None);
}

#[test]
fn test_parse_link_header_single_quotes_and_spacing() {
    let header = "<https://x.test/a?p=2> ;  rel='next'";
    assert_eq!(
        parse_link_header(header, "next"),
        Some("https://x.test/a?p=2".to_string())
    );
    assert_eq!(parse_link_header("", "next"), None);
    assert_eq!(parse_link_header("garbage", "next"), None);
}
