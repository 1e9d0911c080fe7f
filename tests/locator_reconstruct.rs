//! Following continuation locators of a tabular result.

mod common;

use common::{bearer_headers, rows, status_response, tabular_body, CollectingProgress, FakeTransport};
use querytap::model::{CapturedResult, Protocol, RowTotal};
use querytap::reconstruct::{FetchError, Reconstructor, Termination};
use querytap::replay::{locator_replay, ReplayContext};
use reqwest::header::{HeaderMap, AUTHORIZATION};
use serde_json::json;
use std::sync::Arc;

const QUERY_URL: &str = "https://org.example.com/services/data/v58.0/query?q=SELECT+Id+FROM+Account";
const LOCATOR_2000: &str = "/services/data/v58.0/query/01gD0000002HU6KIAW-2000";
const LOCATOR_4000: &str = "/services/data/v58.0/query/01gD0000002HU6KIAW-4000";

fn captured(headers: &HeaderMap, total: u64) -> CapturedResult {
    let replay = locator_replay(QUERY_URL, headers, LOCATOR_2000).expect("locator replay");
    CapturedResult {
        query_id: None,
        protocol: Protocol::Tabular,
        rows: rows(0..2000),
        columns: vec![json!("Id"), json!("Name")],
        total_rows: RowTotal::Known(total),
        limited: true,
        replay: Some(ReplayContext::Locator(replay)),
    }
}

#[tokio::test]
async fn test_follows_locators_until_total() {
    let transport = Arc::new(FakeTransport::new());
    transport.push_json(tabular_body(5000, false, 2000..4000, Some(LOCATOR_4000)));
    transport.push_json(tabular_body(5000, true, 4000..5000, None));

    let progress = CollectingProgress::default();
    let outcome = Reconstructor::new(transport.clone(), 49_999)
        .fetch_all(&captured(&bearer_headers(), 5000), &progress)
        .await
        .unwrap();

    assert_eq!(outcome.pages, 2);
    assert_eq!(outcome.termination, Termination::TotalReached);
    assert_eq!(outcome.result.returned_rows(), 5000);
    assert!(!outcome.result.limited);
    assert_eq!(outcome.result.rows[4000]["Id"], "004000");

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, reqwest::Method::GET);
    assert_eq!(
        requests[0].url,
        format!("https://org.example.com{}", LOCATOR_2000)
    );
    assert_eq!(
        requests[1].url,
        format!("https://org.example.com{}", LOCATOR_4000)
    );
    assert_eq!(requests[1].headers.get(AUTHORIZATION).unwrap(), "Bearer token-1");

    let fetched: Vec<usize> = progress.pages().iter().map(|(p, _)| p.fetched_rows).collect();
    assert_eq!(fetched, vec![4000, 5000]);
}

#[tokio::test]
async fn test_server_done_ends_run_below_declared_total() {
    let transport = Arc::new(FakeTransport::new());
    transport.push_json(tabular_body(10_000, true, 2000..3000, None));

    let outcome = Reconstructor::new(transport.clone(), 49_999)
        .fetch_all(&captured(&bearer_headers(), 10_000), &CollectingProgress::default())
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::ServerDone);
    assert_eq!(outcome.result.returned_rows(), 3000);
    assert_eq!(outcome.result.total_rows, RowTotal::Known(10_000));
    assert!(!outcome.result.limited);
}

#[tokio::test]
async fn test_missing_next_locator_ends_run() {
    let transport = Arc::new(FakeTransport::new());
    transport.push_json(tabular_body(9000, false, 2000..3000, None));

    let outcome = Reconstructor::new(transport.clone(), 49_999)
        .fetch_all(&captured(&bearer_headers(), 9000), &CollectingProgress::default())
        .await
        .unwrap();

    assert_eq!(transport.request_count(), 1);
    assert_eq!(outcome.result.returned_rows(), 3000);
}

#[tokio::test]
async fn test_empty_page_ends_run() {
    let transport = Arc::new(FakeTransport::new());
    transport.push_json(tabular_body(9000, false, 0..0, Some(LOCATOR_4000)));

    let outcome = Reconstructor::new(transport.clone(), 49_999)
        .fetch_all(&captured(&bearer_headers(), 9000), &CollectingProgress::default())
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::EmptyPage);
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_missing_authorization_is_protocol_error() {
    let transport = Arc::new(FakeTransport::new());

    let err = Reconstructor::new(transport.clone(), 49_999)
        .fetch_all(&captured(&HeaderMap::new(), 5000), &CollectingProgress::default())
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Protocol(_)));
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn test_expired_session_is_auth_error() {
    let transport = Arc::new(FakeTransport::new());
    transport.push(status_response(401, r#"[{"errorCode":"INVALID_SESSION_ID"}]"#));

    let err = Reconstructor::new(transport.clone(), 49_999)
        .fetch_all(&captured(&bearer_headers(), 5000), &CollectingProgress::default())
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Auth { status: 401 }));
}

#[tokio::test]
async fn test_non_record_body_is_parse_error() {
    let transport = Arc::new(FakeTransport::new());
    transport.push_json(json!({"message": "maintenance"}));

    let err = Reconstructor::new(transport.clone(), 49_999)
        .fetch_all(&captured(&bearer_headers(), 5000), &CollectingProgress::default())
        .await
        .unwrap_err();

    assert_eq!(err.category(), "parse");
}
