//! Scenario: Partner status client maps every accrual-service reply shape.
//!
//! # Invariants under test
//! - `200` decodes into a `PartnerOutcome` (accrual defaults to zero).
//! - `204` is `NotFound`.
//! - `429` surfaces `RateLimited` with the server's `Retry-After`, or the
//!   configured default when the header is missing.
//! - In-client retries absorb a `429`: the request is repeated exactly
//!   `retries + 1` times before giving up.
//! - Other statuses and malformed bodies are errors, never outcomes.

use std::time::Duration;

use httpmock::prelude::*;
use loyalty_partner::{HttpPartnerClient, PartnerClient, PartnerError};
use loyalty_schemas::{Decimal, PartnerStatus};
use serde_json::json;

fn client(server: &MockServer) -> HttpPartnerClient {
    HttpPartnerClient::new(server.base_url())
        .with_rate_limit_retries(0, Duration::ZERO)
        .with_default_retry_after(Duration::from_secs(60))
}

#[tokio::test]
async fn processed_reply_decodes_with_accrual() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/orders/4561261212345467")
                .header("accept", "application/json");
            then.status(200).json_body(json!({
                "order": "4561261212345467",
                "status": "PROCESSED",
                "accrual": 500
            }));
        })
        .await;

    let out = client(&server)
        .fetch_outcome("4561261212345467")
        .await
        .expect("outcome");

    assert_eq!(out.order, "4561261212345467");
    assert_eq!(out.status, PartnerStatus::Processed);
    assert_eq!(out.accrual, Decimal::from(500));
    m.assert_async().await;
}

#[tokio::test]
async fn registered_reply_without_accrual_is_zero() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/79927398713");
            then.status(200)
                .json_body(json!({"order": "79927398713", "status": "REGISTERED"}));
        })
        .await;

    let out = client(&server).fetch_outcome("79927398713").await.expect("outcome");
    assert_eq!(out.status, PartnerStatus::Registered);
    assert_eq!(out.accrual, Decimal::ZERO);
}

#[tokio::test]
async fn no_content_is_not_found() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/12345678903");
            then.status(204);
        })
        .await;

    let err = client(&server).fetch_outcome("12345678903").await.unwrap_err();
    assert!(
        matches!(err, PartnerError::NotFound { ref order } if order == "12345678903"),
        "got {err:?}"
    );
}

#[tokio::test]
async fn too_many_requests_carries_retry_after() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/2377225624");
            then.status(429)
                .header("Retry-After", "17")
                .body("No more than N requests per minute allowed");
        })
        .await;

    let err = client(&server).fetch_outcome("2377225624").await.unwrap_err();
    assert_eq!(err.retry_after(), Some(Duration::from_secs(17)));
}

#[tokio::test]
async fn too_many_requests_without_header_uses_default() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/2377225624");
            then.status(429);
        })
        .await;

    let err = client(&server).fetch_outcome("2377225624").await.unwrap_err();
    assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
}

#[tokio::test]
async fn in_client_retries_repeat_the_request_before_surfacing() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/9278923470");
            then.status(429).header("Retry-After", "5");
        })
        .await;

    let c = HttpPartnerClient::new(server.base_url())
        .with_rate_limit_retries(2, Duration::from_millis(10));
    let err = c.fetch_outcome("9278923470").await.unwrap_err();

    assert!(matches!(err, PartnerError::RateLimited { .. }));
    assert_eq!(m.hits_async().await, 3);
}

#[tokio::test]
async fn server_error_is_unexpected_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/346436439");
            then.status(500).body("boom");
        })
        .await;

    let err = client(&server).fetch_outcome("346436439").await.unwrap_err();
    assert!(
        matches!(err, PartnerError::UnexpectedStatus { status: 500, ref body } if body == "boom"),
        "got {err:?}"
    );
}

#[tokio::test]
async fn malformed_body_is_decode_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/346436439");
            then.status(200)
                .header("content-type", "application/json")
                .body("{not json");
        })
        .await;

    let err = client(&server).fetch_outcome("346436439").await.unwrap_err();
    assert!(matches!(err, PartnerError::Decode(_)), "got {err:?}");
}

#[tokio::test]
async fn mismatched_order_in_body_is_rejected() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/346436439");
            then.status(200)
                .json_body(json!({"order": "79927398713", "status": "PROCESSED", "accrual": 1}));
        })
        .await;

    let err = client(&server).fetch_outcome("346436439").await.unwrap_err();
    assert!(matches!(err, PartnerError::Decode(_)), "got {err:?}");
}
