//! HTTP client behaviour against a mock ticket service

use httpmock::prelude::*;
use serde_json::json;
use std::time::Duration;
use ticket_dashboard::domain::RemoteStatus;
use ticket_dashboard::io::{HttpTicketApi, NetworkError, TicketApi};
use ticket_dashboard::services::validate;

fn client(server: &MockServer) -> HttpTicketApi {
    HttpTicketApi::new(&server.base_url(), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_status_returns_raw_text() {
    let server = MockServer::start();
    let status = server.mock(|when, then| {
        when.method(GET).path("/api/ticket/status");
        then.status(200).body("System is currently running");
    });

    let body = client(&server).status().await.unwrap();
    assert_eq!(body, "System is currently running");
    assert_eq!(RemoteStatus::classify(&body), RemoteStatus::Running);
    status.assert_calls(1);
}

#[tokio::test]
async fn test_configure_posts_numeric_strings() {
    let server = MockServer::start();
    let configure = server.mock(|when, then| {
        when.method(POST).path("/api/ticket/configure").json_body(json!({
            "totalTickets": "1000",
            "ticketReleaseRate": "1500",
            "customerRetrievalRate": "2000",
            "maxTicketCapacity": "500"
        }));
        then.status(200).body("Configuration saved successfully");
    });

    let configuration = validate(["1000", "1500", "2000", "500"]).unwrap();
    let body = client(&server).configure(&configuration).await.unwrap();
    assert_eq!(body, "Configuration saved successfully");
    configure.assert_calls(1);
}

#[tokio::test]
async fn test_rejection_maps_to_status_error() {
    let server = MockServer::start();
    let start = server.mock(|when, then| {
        when.method(POST).path("/api/ticket/start");
        then.status(400).body("Configuration not set");
    });

    let err = client(&server).start().await.unwrap_err();
    match err {
        NetworkError::Status { path, status, body } => {
            assert_eq!(path, "/api/ticket/start");
            assert_eq!(status, 400);
            assert_eq!(body, "Configuration not set");
        }
        other => panic!("unexpected error: {other}"),
    }
    start.assert_calls(1);
}

#[tokio::test]
async fn test_stop_uses_post() {
    let server = MockServer::start();
    let stop = server.mock(|when, then| {
        when.method(POST).path("/api/ticket/stop");
        then.status(200).body("System stopped");
    });

    assert_eq!(client(&server).stop().await.unwrap(), "System stopped");
    stop.assert_calls(1);
}

#[tokio::test]
async fn test_unreachable_service_is_request_error() {
    // Nothing listens on port 9 locally
    let api = HttpTicketApi::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    let err = api.status().await.unwrap_err();
    assert!(matches!(err, NetworkError::Request { path: "/api/ticket/status", .. }));
}
