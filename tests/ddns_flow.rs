//! DDNS updater and provider behavior.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;

use common::spawn_server;
use gatewatch::config::PublicIpServiceConfig;
use gatewatch::ddns::{ChangeIpProvider, DdnsUpdater, DynuDnsProvider, Provider};
use gatewatch::error::DdnsError;
use gatewatch::gateway::Gateway;
use gatewatch::metrics::Metrics;

fn gateway(ip: &str, active: bool) -> Gateway {
    Gateway {
        ip: ip.parse().unwrap(),
        url: format!("http://{ip}:9999/"),
        is_active: active,
        consecutive_failures: 0,
        public_ip: None,
    }
}

fn service_config(hostname: &str, port: u16) -> PublicIpServiceConfig {
    PublicIpServiceConfig {
        hostname: hostname.into(),
        port,
        scheme: "http".into(),
        path: "/".into(),
        username: String::new(),
        password: String::new(),
    }
}

/// Provider that records every update it receives.
#[derive(Default)]
struct RecordingProvider {
    updates: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn update_records(&self, ips: &[String]) -> Result<(), DdnsError> {
        self.updates.lock().unwrap().push(ips.to_vec());
        Ok(())
    }
}

fn updater_with(
    provider: Option<Arc<dyn Provider>>,
    public_ip: PublicIpServiceConfig,
    metrics: Arc<Metrics>,
) -> Arc<DdnsUpdater> {
    Arc::new(
        DdnsUpdater::with_provider(
            provider,
            public_ip,
            None,
            Duration::from_millis(500),
            Duration::from_secs(5),
            metrics,
        )
        .unwrap(),
    )
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within deadline");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn schedule_coalesces_repeat_and_superseding_snapshots() {
    let provider: Arc<dyn Provider> = Arc::new(RecordingProvider::default());
    let updater = updater_with(
        Some(provider),
        service_config("127.0.0.1", 80),
        Arc::new(Metrics::new().unwrap()),
    );

    assert_eq!(updater.pending_signals(), 0);

    let active = [gateway("10.0.0.1", true)];
    updater.schedule(&active);
    assert_eq!(updater.pending_signals(), 1);

    // Same set again: a no-op, not a second wakeup.
    updater.schedule(&active);
    assert_eq!(updater.pending_signals(), 1);

    // A different set supersedes the queued snapshot without queuing more.
    updater.schedule(&[gateway("10.0.0.1", true), gateway("10.0.0.2", true)]);
    assert_eq!(updater.pending_signals(), 1);
}

#[tokio::test]
async fn schedule_without_a_provider_is_inert() {
    let updater = updater_with(
        None,
        service_config("127.0.0.1", 80),
        Arc::new(Metrics::new().unwrap()),
    );
    updater.schedule(&[gateway("10.0.0.1", true)]);
    assert_eq!(updater.pending_signals(), 0);
}

#[tokio::test]
async fn run_publishes_unique_ips_and_skips_unchanged_sets() {
    // Gateways query themselves (no service hostname configured); only
    // 127.0.0.1 answers, with a fixed public IP.
    let addr = spawn_server(Router::new().route("/", get(|| async { "198.51.100.7" }))).await;

    let provider = Arc::new(RecordingProvider::default());
    let provider_dyn: Arc<dyn Provider> = provider.clone();
    let metrics = Arc::new(Metrics::new().unwrap());
    let updater = updater_with(Some(provider_dyn), service_config("", addr.port()), metrics.clone());

    let cancel = CancellationToken::new();
    let task = {
        let updater = updater.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { updater.run(cancel).await })
    };

    // One reachable gateway, one unreachable, one inactive: the failures are
    // logged and skipped, the set still publishes.
    updater.schedule(&[
        gateway("127.0.0.1", true),
        gateway("127.0.0.2", true),
        gateway("127.0.0.3", false),
    ]);

    wait_for(|| !provider.updates.lock().unwrap().is_empty()).await;
    assert_eq!(
        *provider.updates.lock().unwrap(),
        vec![vec!["198.51.100.7".to_string()]]
    );

    // A different gateway set that resolves to the same public IPs is a
    // no-change skip, not another provider call.
    updater.schedule(&[gateway("127.0.0.1", true)]);
    wait_for(|| {
        metrics
            .encode()
            .unwrap()
            .contains(r#"ddns_updates_skipped_total{provider="fake",reason="no_change"} 1"#)
    })
    .await;
    assert_eq!(provider.updates.lock().unwrap().len(), 1);

    let text = metrics.encode().unwrap();
    assert!(text.contains(r#"ddns_updates_total{provider="fake",status="success"} 1"#));
    assert!(text.contains("unique_public_ips 1"));
    assert!(text.contains("public_ip_changes_total 1"));

    cancel.cancel();
    task.await.unwrap();
}

// --- DynuDNS provider -----------------------------------------------------

#[derive(Debug, Clone)]
struct DynuRecord {
    node_name: String,
    record_type: String,
    ipv4_address: String,
    ttl: u64,
    state: bool,
}

#[derive(Default)]
struct FakeDynu {
    records: Mutex<HashMap<i64, DynuRecord>>,
    next_id: Mutex<i64>,
    deleted: Mutex<Vec<i64>>,
}

impl FakeDynu {
    fn seed(&self, records: Vec<DynuRecord>) {
        let mut map = self.records.lock().unwrap();
        let mut next = self.next_id.lock().unwrap();
        for record in records {
            *next += 1;
            map.insert(*next, record);
        }
    }

    fn fleet_a_ips(&self) -> Vec<String> {
        let mut ips: Vec<String> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.node_name == "fleet" && r.record_type == "A")
            .map(|r| r.ipv4_address.clone())
            .collect();
        ips.sort();
        ips
    }
}

fn record(node: &str, record_type: &str, ip: &str) -> DynuRecord {
    DynuRecord {
        node_name: node.into(),
        record_type: record_type.into(),
        ipv4_address: ip.into(),
        ttl: 300,
        state: true,
    }
}

fn dynu_router(state: Arc<FakeDynu>) -> Router {
    Router::new()
        .route(
            "/dns/getroot/:hostname",
            get(|| async { Json(serde_json::json!({"id": 9001, "node": "fleet"})) }),
        )
        .route(
            "/dns/:domain/record",
            get(list_records).post(create_record),
        )
        .route("/dns/:domain/record/:record", axum::routing::delete(delete_record))
        .with_state(state)
}

async fn list_records(State(state): State<Arc<FakeDynu>>) -> Json<serde_json::Value> {
    let records: Vec<serde_json::Value> = state
        .records
        .lock()
        .unwrap()
        .iter()
        .map(|(id, r)| {
            serde_json::json!({
                "id": id,
                "nodeName": r.node_name,
                "recordType": r.record_type,
                "ipv4Address": r.ipv4_address,
            })
        })
        .collect();
    Json(serde_json::json!({"statusCode": 200, "dnsRecords": records}))
}

async fn create_record(
    State(state): State<Arc<FakeDynu>>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let record = DynuRecord {
        node_name: body["nodeName"].as_str().unwrap_or_default().to_string(),
        record_type: body["recordType"].as_str().unwrap_or_default().to_string(),
        ipv4_address: body["ipv4Address"].as_str().unwrap_or_default().to_string(),
        ttl: body["ttl"].as_u64().unwrap_or_default(),
        state: body["state"].as_bool().unwrap_or_default(),
    };
    let mut next = state.next_id.lock().unwrap();
    *next += 1;
    state.records.lock().unwrap().insert(*next, record);
    Json(serde_json::json!({"statusCode": 200}))
}

async fn delete_record(
    State(state): State<Arc<FakeDynu>>,
    Path((_domain, record_id)): Path<(i64, i64)>,
) -> Json<serde_json::Value> {
    state.records.lock().unwrap().remove(&record_id);
    state.deleted.lock().unwrap().push(record_id);
    Json(serde_json::json!({"statusCode": 200}))
}

async fn dynu_provider(state: Arc<FakeDynu>) -> DynuDnsProvider {
    let addr = spawn_server(dynu_router(state)).await;
    DynuDnsProvider::new(
        "api-key".into(),
        "fleet.example.net".into(),
        Duration::from_secs(1),
        Duration::from_secs(60),
    )
    .unwrap()
    .with_base_url(format!("http://{addr}"))
}

#[tokio::test]
async fn dynudns_applies_differential_record_updates() {
    let state = Arc::new(FakeDynu::default());
    state.seed(vec![
        record("fleet", "A", "198.51.100.1"),
        record("fleet", "A", "203.0.113.9"),
        record("other", "A", "192.0.2.5"),
        record("fleet", "TXT", ""),
    ]);
    let provider = dynu_provider(state.clone()).await;

    provider
        .update_records(&["198.51.100.1".into(), "198.51.100.2".into()])
        .await
        .unwrap();

    // 203.0.113.9 removed, 198.51.100.2 created, 198.51.100.1 left alone.
    assert_eq!(state.fleet_a_ips(), ["198.51.100.1", "198.51.100.2"]);
    assert_eq!(state.deleted.lock().unwrap().len(), 1);

    // Records under another node or of another type are untouched.
    let records = state.records.lock().unwrap();
    assert!(records
        .values()
        .any(|r| r.node_name == "other" && r.ipv4_address == "192.0.2.5"));
    assert!(records.values().any(|r| r.record_type == "TXT"));
}

#[tokio::test]
async fn dynudns_new_records_carry_ttl_and_enabled_state() {
    let state = Arc::new(FakeDynu::default());
    let provider = dynu_provider(state.clone()).await;

    provider.update_records(&["198.51.100.4".into()]).await.unwrap();

    let records = state.records.lock().unwrap();
    let created = records
        .values()
        .find(|r| r.ipv4_address == "198.51.100.4")
        .expect("record created");
    assert_eq!(created.ttl, 60);
    assert!(created.state);
    assert_eq!(created.node_name, "fleet");
}

#[tokio::test]
async fn dynudns_update_is_idempotent() {
    let state = Arc::new(FakeDynu::default());
    state.seed(vec![record("fleet", "A", "198.51.100.1")]);
    let provider = dynu_provider(state.clone()).await;

    let ips = vec!["198.51.100.1".to_string(), "198.51.100.2".to_string()];
    provider.update_records(&ips).await.unwrap();
    let after_first = state.fleet_a_ips();
    provider.update_records(&ips).await.unwrap();
    let after_second = state.fleet_a_ips();

    assert_eq!(after_first, after_second);
    // The second pass issued no deletions beyond the first pass's none.
    assert!(state.deleted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn dynudns_empty_set_deletes_every_record() {
    let state = Arc::new(FakeDynu::default());
    state.seed(vec![
        record("fleet", "A", "198.51.100.1"),
        record("fleet", "A", "198.51.100.2"),
    ]);
    let provider = dynu_provider(state.clone()).await;

    provider.update_records(&[]).await.unwrap();
    assert!(state.fleet_a_ips().is_empty());
}

#[tokio::test]
async fn dynudns_surfaces_api_exceptions() {
    let addr = spawn_server(Router::new().route(
        "/dns/getroot/:hostname",
        get(|| async {
            (
                axum::http::StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "exception": {"type": "Unauthorized", "message": "Invalid API key"}
                })),
            )
        }),
    ))
    .await;

    let provider = DynuDnsProvider::new(
        "bad-key".into(),
        "fleet.example.net".into(),
        Duration::from_secs(1),
        Duration::from_secs(60),
    )
    .unwrap()
    .with_base_url(format!("http://{addr}"));

    let err = provider.update_records(&["198.51.100.1".into()]).await.unwrap_err();
    assert!(err.to_string().contains("Invalid API key"));
}

// --- ChangeIP provider ----------------------------------------------------

#[tokio::test]
async fn changeip_sends_a_comma_joined_ip_list() {
    let seen: Arc<Mutex<Vec<(String, Option<String>)>>> = Arc::default();
    let addr = {
        let seen = seen.clone();
        spawn_server(Router::new().route(
            "/nic/update",
            get(
                move |axum::extract::RawQuery(query): axum::extract::RawQuery,
                      headers: axum::http::HeaderMap| {
                    let seen = seen.clone();
                    async move {
                        let auth = headers
                            .get("authorization")
                            .map(|v| v.to_str().unwrap_or_default().to_string());
                        seen.lock().unwrap().push((query.unwrap_or_default(), auth));
                        "successful update"
                    }
                },
            ),
        ))
        .await
    };

    let provider = ChangeIpProvider::new(
        "operator".into(),
        "secret".into(),
        "fleet.example.net".into(),
        Duration::from_secs(1),
    )
    .unwrap()
    .with_base_url(format!("http://{addr}/nic/update"));

    provider
        .update_records(&["198.51.100.1".into(), "198.51.100.2".into()])
        .await
        .unwrap();

    let requests = seen.lock().unwrap();
    let (query, auth) = &requests[0];
    assert!(query.contains("hostname=fleet.example.net"));
    // Comma-joined, not repeated parameters.
    assert!(query.contains("myip=198.51.100.1%2C198.51.100.2"));
    assert!(auth.as_deref().unwrap_or_default().starts_with("Basic "));
}

#[tokio::test]
async fn changeip_substitutes_a_sentinel_for_the_empty_set() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let addr = {
        let seen = seen.clone();
        spawn_server(Router::new().route(
            "/nic/update",
            get(
                move |axum::extract::RawQuery(query): axum::extract::RawQuery| {
                    let seen = seen.clone();
                    async move {
                        seen.lock().unwrap().push(query.unwrap_or_default());
                        "ok"
                    }
                },
            ),
        ))
        .await
    };

    let provider = ChangeIpProvider::new(
        "operator".into(),
        "secret".into(),
        "fleet.example.net".into(),
        Duration::from_secs(1),
    )
    .unwrap()
    .with_base_url(format!("http://{addr}/nic/update"));

    provider.update_records(&[]).await.unwrap();
    assert!(seen.lock().unwrap()[0].contains("myip=0.0.0.0"));
}

#[tokio::test]
async fn changeip_reports_upstream_failures() {
    let addr = spawn_server(Router::new().route(
        "/nic/update",
        get(|| async { (axum::http::StatusCode::UNAUTHORIZED, "badauth") }),
    ))
    .await;

    let provider = ChangeIpProvider::new(
        "operator".into(),
        "wrong".into(),
        "fleet.example.net".into(),
        Duration::from_secs(1),
    )
    .unwrap()
    .with_base_url(format!("http://{addr}/nic/update"));

    let err = provider.update_records(&["198.51.100.1".into()]).await.unwrap_err();
    assert!(err.to_string().contains("badauth"));
}
