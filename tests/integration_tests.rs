//! End-to-end tests: dispatcher, pagination, sessions, and the RPC
//! transport composed the way a real crawler uses them.

use async_trait::async_trait;
use crawlkit::dispatch::{self, DispatchConfig};
use crawlkit::engine::ExportContext;
use crawlkit::error::Result;
use crawlkit::host::{InMemoryCollector, MemoryCheckpointStore};
use crawlkit::http::{HttpClientConfig, RateLimiterConfig};
use crawlkit::paginate::{self, PageFetcher, PageQuery, PageTurn};
use crawlkit::rpc::{HostServer, PluginConfig, PluginHandle, PluginServer};
use crawlkit::session::{HostApi, Session};
use crawlkit::types::{ExportRecord, JsonValue, PageInfo, WorkItem};
use crawlkit::Crawler;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const PAGES_PER_ITEM: u32 = 3;
const RECORDS_PER_PAGE: u64 = 10;

/// Serves a fixed number of pages into the session it borrows.
struct PagedItems<'a> {
    session: &'a mut Session,
    page: u32,
}

#[async_trait]
impl PageFetcher for PagedItems<'_> {
    async fn fetch(&mut self, query: &PageQuery) -> Result<PageTurn> {
        for n in 0..query.page_size {
            self.session
                .push(ExportRecord::from_value(serde_json::json!({
                    "page": self.page,
                    "n": n,
                })))
                .await?;
        }
        self.page += 1;
        if self.page < PAGES_PER_ITEM {
            Ok(PageTurn::Continue(PageInfo::next_cursor(format!(
                "c{}",
                self.page
            ))))
        } else {
            Ok(PageTurn::Continue(PageInfo::last()))
        }
    }
}

/// Crawls two targets concurrently, one session per target.
struct RepoCrawler;

#[async_trait]
impl Crawler for RepoCrawler {
    async fn export(&self, ctx: &ExportContext, _config: &JsonValue) -> Result<()> {
        let items = vec![WorkItem::new("org/alpha"), WorkItem::new("org/beta")];
        let report = dispatch::run(
            items,
            &DispatchConfig::new(2),
            |item| async move {
                let mut session = ctx.sessions().start(&item.id).await?;
                let mut fetcher = PagedItems {
                    session: &mut session,
                    page: 0,
                };
                let pages =
                    paginate::walk_forward(&mut fetcher, RECORDS_PER_PAGE, ctx.cancel()).await?;
                assert_eq!(pages, u64::from(PAGES_PER_ITEM));
                session.done("2024-06-01T00:00:00Z").await
            },
            ctx.cancel(),
        )
        .await;
        report.into_result()
    }

    async fn validate_config(&self, _config: &JsonValue) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

fn collector() -> Arc<InMemoryCollector> {
    Arc::new(InMemoryCollector::new(
        "acme",
        Arc::new(MemoryCheckpointStore::new()),
    ))
}

#[tokio::test]
async fn test_in_process_pipeline_delivers_every_record() {
    let host = collector();
    let ctx = ExportContext::new(
        host.clone(),
        HttpClientConfig::default(),
        &RateLimiterConfig::listing_calls(),
        CancellationToken::new(),
    )
    .with_flush_at(7);

    RepoCrawler
        .export(&ctx, &serde_json::json!({}))
        .await
        .unwrap();

    // 2 targets x 3 pages x 10 records.
    assert_eq!(host.record_count().await, 60);
    assert_eq!(host.records("org/alpha").await.len(), 30);
    assert_eq!(host.records("org/beta").await.len(), 30);
    assert_eq!(host.open_session_count().await, 0);
}

#[tokio::test]
async fn test_full_pipeline_over_rpc() {
    let plugin = PluginServer::bind(Arc::new(RepoCrawler), PluginConfig::default())
        .await
        .unwrap();
    let handshake = plugin.handshake().clone();
    tokio::spawn(plugin.serve());

    let host = collector();
    let host_server = HostServer::bind(host.clone(), handshake.magic.clone())
        .await
        .unwrap();
    let host_addr = host_server.addr();
    host_server.spawn();

    let handle = PluginHandle::connect(handshake);
    handle.init(host_addr).await.unwrap();
    handle.export(&serde_json::json!({})).await.unwrap();

    assert_eq!(host.record_count().await, 60);
    assert_eq!(host.open_session_count().await, 0);

    // Each target committed its checkpoint exactly once.
    for record_type in ["org/alpha", "org/beta"] {
        let started = host.export_started(record_type).await.unwrap();
        assert_eq!(
            started.last_checkpoint,
            Some("2024-06-01T00:00:00Z".to_string())
        );
        host.export_done(&started.session_id, &"2024-06-01T00:00:00Z".to_string())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_incremental_export_resumes_from_prior_checkpoint() {
    let host = collector();

    struct IncrementalCrawler;

    #[async_trait]
    impl Crawler for IncrementalCrawler {
        async fn export(&self, ctx: &ExportContext, _config: &JsonValue) -> Result<()> {
            let mut session = ctx.sessions().start("issues").await?;
            let cutoff = session.checkpoint_at_start().cloned();

            struct CutoffFetcher<'a> {
                session: &'a mut Session,
                saw_cutoff: bool,
            }

            #[async_trait]
            impl PageFetcher for CutoffFetcher<'_> {
                async fn fetch(&mut self, query: &PageQuery) -> Result<PageTurn> {
                    self.session
                        .push(ExportRecord::from_value(serde_json::json!({"page": 1})))
                        .await?;
                    if query.newer_than.is_some() {
                        self.saw_cutoff = true;
                        return Ok(PageTurn::ReachedCheckpoint);
                    }
                    Ok(PageTurn::Continue(PageInfo::last()))
                }
            }

            let mut fetcher = CutoffFetcher {
                session: &mut session,
                saw_cutoff: false,
            };
            paginate::walk_newer_than(&mut fetcher, cutoff, 10, ctx.cancel()).await?;
            session.done("2024-07-01T00:00:00Z").await
        }

        async fn validate_config(&self, _config: &JsonValue) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    let ctx = ExportContext::new(
        host.clone(),
        HttpClientConfig::default(),
        &RateLimiterConfig::listing_calls(),
        CancellationToken::new(),
    );

    // First run: no checkpoint, full walk.
    IncrementalCrawler
        .export(&ctx, &serde_json::json!({}))
        .await
        .unwrap();

    // Second run: the stored checkpoint reaches the fetcher as the cutoff.
    IncrementalCrawler
        .export(&ctx, &serde_json::json!({}))
        .await
        .unwrap();

    assert_eq!(host.records("issues").await.len(), 2);
}
