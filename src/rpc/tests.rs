//! Tests for the plugin transport

use super::protocol::{Handshake, RpcEnvelope, PROTOCOL_VERSION};
use super::*;
use crate::crawler::{Crawler, ObjectType};
use crate::engine::ExportContext;
use crate::error::{Error, Result};
use crate::host::{InMemoryCollector, MemoryCheckpointStore};
use crate::session::HostApi;
use crate::types::{ExportRecord, JsonValue, StringMap};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::Arc;

// ============================================================================
// Handshake and envelope
// ============================================================================

#[test]
fn test_handshake_roundtrip() {
    let addr = "127.0.0.1:49152".parse().unwrap();
    let handshake = Handshake::new("abc123", addr);
    let line = handshake.encode();
    assert_eq!(line, "CRAWLKIT|1|abc123|127.0.0.1:49152");

    let parsed = Handshake::parse(&line).unwrap();
    assert_eq!(parsed, handshake);
    parsed.ensure_version().unwrap();
}

#[test]
fn test_handshake_parse_rejects_malformed_lines() {
    for line in [
        "",
        "CRAWLKIT|1|abc",
        "CRAWLKIT|1|abc|127.0.0.1:1|extra",
        "OTHER|1|abc|127.0.0.1:1",
        "CRAWLKIT|one|abc|127.0.0.1:1",
        "CRAWLKIT|1||127.0.0.1:1",
        "CRAWLKIT|1|abc|not-an-addr",
    ] {
        let err = Handshake::parse(line).unwrap_err();
        assert!(matches!(err, Error::Handshake { .. }), "accepted {line:?}");
    }
}

#[test]
fn test_handshake_version_mismatch_fails_fast() {
    let line = format!("CRAWLKIT|{}|abc|127.0.0.1:1", PROTOCOL_VERSION + 1);
    let handshake = Handshake::parse(&line).unwrap();
    assert!(matches!(
        handshake.ensure_version().unwrap_err(),
        Error::Handshake { .. }
    ));
}

#[test]
fn test_generate_magic_is_unique_per_call() {
    assert_ne!(generate_magic(), generate_magic());
}

#[test]
fn test_envelope_rebuilds_errors() {
    let envelope = RpcEnvelope::<()>::err(&Error::not_supported("mutate"));
    let json = serde_json::to_string(&envelope).unwrap();
    let back: RpcEnvelope<()> = serde_json::from_str(&json).unwrap();
    assert!(matches!(
        back.into_result().unwrap_err(),
        Error::NotSupported { .. }
    ));

    let envelope = RpcEnvelope::<u32>::ok(7);
    assert_eq!(envelope.into_result().unwrap(), 7);
}

// ============================================================================
// Loopback pair
// ============================================================================

struct TestCrawler;

#[async_trait]
impl Crawler for TestCrawler {
    async fn export(&self, ctx: &ExportContext, _config: &JsonValue) -> Result<()> {
        let mut session = ctx.sessions().start("items").await?;
        for n in 0..5 {
            session
                .push(ExportRecord::from_value(serde_json::json!({"n": n})))
                .await?;
        }
        session.done("cp-1").await
    }

    async fn validate_config(&self, config: &JsonValue) -> Result<Vec<String>> {
        if config.get("token").is_none() {
            return Ok(vec!["missing token".to_string()]);
        }
        Ok(Vec::new())
    }

    async fn onboard_export(
        &self,
        _ctx: &ExportContext,
        object_type: ObjectType,
        _config: &JsonValue,
    ) -> Result<Vec<ExportRecord>> {
        Ok((0..2)
            .map(|n| {
                ExportRecord::from_value(serde_json::json!({
                    "object_type": object_type.to_string(),
                    "n": n,
                }))
            })
            .collect())
    }

    async fn webhook(
        &self,
        _headers: &StringMap,
        body: &JsonValue,
        _config: &JsonValue,
    ) -> Result<Vec<ExportRecord>> {
        Ok(vec![ExportRecord::from_value(serde_json::json!({
            "issue": body.get("issue").cloned().unwrap_or(JsonValue::Null),
            "state": "closed",
        }))])
    }
}

async fn start_pair() -> (Arc<InMemoryCollector>, PluginHandle) {
    let plugin = PluginServer::bind(Arc::new(TestCrawler), PluginConfig::default())
        .await
        .unwrap();
    let handshake = plugin.handshake().clone();
    tokio::spawn(plugin.serve());

    let collector = Arc::new(InMemoryCollector::new(
        "acme",
        Arc::new(MemoryCheckpointStore::new()),
    ));
    let host_server = HostServer::bind(collector.clone(), handshake.magic.clone())
        .await
        .unwrap();
    let host_addr = host_server.addr();
    host_server.spawn();

    let handle = PluginHandle::connect(handshake);
    handle.init(host_addr).await.unwrap();
    (collector, handle)
}

#[tokio::test]
async fn test_export_roundtrip_delivers_records() {
    let (collector, handle) = start_pair().await;

    handle.export(&serde_json::json!({})).await.unwrap();

    assert_eq!(collector.records("items").await.len(), 5);
    assert_eq!(collector.open_session_count().await, 0);

    // The second export sees the checkpoint the first one committed.
    let started = collector.export_started("items").await.unwrap();
    assert_eq!(started.last_checkpoint, Some("cp-1".to_string()));
}

#[tokio::test]
async fn test_validate_config_roundtrips_errors() {
    let (_collector, handle) = start_pair().await;

    let errors = handle.validate_config(&serde_json::json!({})).await.unwrap();
    assert_eq!(errors, vec!["missing token".to_string()]);

    let errors = handle
        .validate_config(&serde_json::json!({"token": "t"}))
        .await
        .unwrap();
    assert!(errors.is_empty());
}

#[tokio::test]
async fn test_unsupported_operation_crosses_the_boundary() {
    let (_collector, handle) = start_pair().await;

    let err = handle
        .mutate("close_issue", &serde_json::json!({}), &serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotSupported { .. }));
}

#[tokio::test]
async fn test_onboard_export_returns_the_onboarded_records() {
    let (_collector, handle) = start_pair().await;

    let records = handle
        .onboard_export(ObjectType::Repos, &serde_json::json!({}))
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(
        records[0].data.get("object_type"),
        Some(&serde_json::json!("repos"))
    );
}

#[tokio::test]
async fn test_webhook_returns_the_mutated_objects() {
    let (_collector, handle) = start_pair().await;

    let mutated = handle
        .webhook(
            &StringMap::new(),
            &serde_json::json!({"issue": 17, "action": "closed"}),
            &serde_json::json!({}),
        )
        .await
        .unwrap();

    assert_eq!(mutated.len(), 1);
    assert_eq!(mutated[0].data.get("issue"), Some(&serde_json::json!(17)));
    assert_eq!(
        mutated[0].data.get("state"),
        Some(&serde_json::json!("closed"))
    );
}

#[tokio::test]
async fn test_wrong_magic_is_rejected() {
    let plugin = PluginServer::bind(Arc::new(TestCrawler), PluginConfig::default())
        .await
        .unwrap();
    let addr = plugin.addr();
    tokio::spawn(plugin.serve());

    let imposter = PluginHandle::connect(Handshake::new("wrong-magic", addr));
    let err = imposter.export(&serde_json::json!({})).await.unwrap_err();
    assert!(matches!(err, Error::AuthFailure { .. }));
}

#[tokio::test]
async fn test_export_before_init_is_an_error() {
    let plugin = PluginServer::bind(Arc::new(TestCrawler), PluginConfig::default())
        .await
        .unwrap();
    let handshake = plugin.handshake().clone();
    tokio::spawn(plugin.serve());

    let handle = PluginHandle::connect(handshake);
    let err = handle.export(&serde_json::json!({})).await.unwrap_err();
    assert!(err.to_string().contains("before init"), "{err}");
}
