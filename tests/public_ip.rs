//! Public IP fetcher behavior against live local endpoints.

mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use common::spawn_server;
use gatewatch::config::PublicIpServiceConfig;
use gatewatch::error::PublicIpError;
use gatewatch::gateway::{generate_gateways, Gateway, PublicIpClient};
use gatewatch::metrics::Metrics;

fn service_config(port: u16) -> PublicIpServiceConfig {
    PublicIpServiceConfig {
        hostname: "127.0.0.1".into(),
        port,
        scheme: "http".into(),
        path: "/".into(),
        username: String::new(),
        password: String::new(),
    }
}

fn active_gateway() -> Gateway {
    let mut gateways = generate_gateways(
        "192.0.2.1".parse().unwrap(),
        "192.0.2.1".parse().unwrap(),
        80,
        "/",
        "http",
    );
    gateways[0].is_active = true;
    gateways.remove(0)
}

async fn client_for_body(body: &'static str) -> PublicIpClient {
    let addr = spawn_server(Router::new().route("/", get(move || async move { body }))).await;
    PublicIpClient::new(
        service_config(addr.port()),
        Duration::from_millis(500),
        Arc::new(Metrics::new().unwrap()),
    )
    .unwrap()
}

#[tokio::test]
async fn json_bodies_use_the_first_string_valued_key() {
    // The numeric public_ip entry is skipped; the next key in preference
    // order wins.
    let client =
        client_for_body(r#"{"public_ip": 12345, "ip_address": "198.51.100.99"}"#).await;
    let ip = client.fetch(&active_gateway()).await.unwrap();
    assert_eq!(ip, "198.51.100.99".parse::<Ipv4Addr>().unwrap());
}

#[tokio::test]
async fn plain_text_bodies_are_trimmed() {
    let client = client_for_body("  192.0.2.100  \n").await;
    let ip = client.fetch(&active_gateway()).await.unwrap();
    assert_eq!(ip, "192.0.2.100".parse::<Ipv4Addr>().unwrap());
}

#[tokio::test]
async fn json_without_usable_keys_is_rejected() {
    let client = client_for_body(r#"{"public_ip": ""}"#).await;
    let err = client.fetch(&active_gateway()).await.unwrap_err();
    assert!(matches!(err, PublicIpError::NoIpField(_)));
}

#[tokio::test]
async fn alternate_keys_are_tried_in_order() {
    let client = client_for_body(r#"{"ip": "203.0.113.7"}"#).await;
    let ip = client.fetch(&active_gateway()).await.unwrap();
    assert_eq!(ip, "203.0.113.7".parse::<Ipv4Addr>().unwrap());
}

#[tokio::test]
async fn garbage_bodies_are_invalid() {
    let client = client_for_body("not an address").await;
    let err = client.fetch(&active_gateway()).await.unwrap_err();
    assert!(matches!(err, PublicIpError::InvalidIp(_)));
}

#[tokio::test]
async fn ipv6_results_are_rejected() {
    let client = client_for_body("::1").await;
    let err = client.fetch(&active_gateway()).await.unwrap_err();
    assert!(matches!(err, PublicIpError::NotIpv4(_)));
}

#[tokio::test]
async fn non_2xx_statuses_carry_the_body_in_the_error() {
    let addr = spawn_server(Router::new().route(
        "/",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance window") }),
    ))
    .await;
    let client = PublicIpClient::new(
        service_config(addr.port()),
        Duration::from_millis(500),
        Arc::new(Metrics::new().unwrap()),
    )
    .unwrap();

    let err = client.fetch(&active_gateway()).await.unwrap_err();
    match err {
        PublicIpError::UpstreamStatus { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance window");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn inactive_gateways_are_refused_without_a_request() {
    let client = client_for_body("192.0.2.100").await;
    let mut gateway = active_gateway();
    gateway.is_active = false;

    let err = client.fetch(&gateway).await.unwrap_err();
    assert!(matches!(err, PublicIpError::NotActive(_)));
}

#[tokio::test]
async fn fetch_metrics_track_success_and_failure() {
    let addr = spawn_server(Router::new().route("/", get(|| async { "192.0.2.100" }))).await;
    let metrics = Arc::new(Metrics::new().unwrap());
    let client = PublicIpClient::new(
        service_config(addr.port()),
        Duration::from_millis(500),
        metrics.clone(),
    )
    .unwrap();

    client.fetch(&active_gateway()).await.unwrap();
    let mut inactive = active_gateway();
    inactive.is_active = false;
    let _ = client.fetch(&inactive).await;

    let text = metrics.encode().unwrap();
    assert!(text.contains(r#"public_ip_fetch_total{gateway_ip="192.0.2.1",status="success"} 1"#));
    assert!(text.contains(r#"public_ip_fetch_total{gateway_ip="192.0.2.1",status="failure"} 1"#));
}
