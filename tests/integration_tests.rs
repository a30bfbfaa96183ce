//! End-to-end tests for the match broker
//!
//! These tests run the real HTTP/WebSocket server on a local port and drive
//! it with WebSocket clients, covering queueing, match forming, claim
//! outcomes and connection cleanup.

mod fixtures;

use fixtures::*;
use match_broker::claim::{AllocationRequestor, ClaimMode, DIAGNOSTIC_SESSION_ID};
use match_broker::types::ClientEvent;
use std::sync::Arc;
use std::time::Duration;

/// Create a broker whose claims are answered by a scripted platform
async fn create_test_broker(answers: Vec<ClaimAnswer>) -> (TestBroker, Arc<ScriptedClaimService>) {
    let service = Arc::new(ScriptedClaimService::new(answers));
    let config = test_config();
    let requestor = AllocationRequestor::new(
        ClaimMode::Remote(service.clone()),
        config.claim.port_name.clone(),
    );
    (TestBroker::start(config, requestor).await, service)
}

async fn registry_drains(broker: &TestBroker) -> bool {
    let registry = broker.state.registry();
    eventually(Duration::from_secs(3), || {
        let registry = registry.clone();
        async move { registry.is_empty().await }
    })
    .await
}

#[tokio::test]
async fn test_two_clients_are_matched_and_sent_the_claimed_server() {
    let (broker, service) = create_test_broker(vec![ClaimAnswer::Server {
        ip: "10.0.0.5".to_string(),
        port: 7777,
    }])
    .await;

    let mut first = broker.connect_client().await;
    assert!(matches!(first.next_event().await, Some(ClientEvent::OnQueued { .. })));
    let mut second = broker.connect_client().await;
    assert!(matches!(second.next_event().await, Some(ClientEvent::OnQueued { .. })));

    let mut match_ids = Vec::new();
    for client in [&mut first, &mut second] {
        match client.next_event().await {
            Some(ClientEvent::OnMatchFound { match_id, .. }) => match_ids.push(match_id),
            other => panic!("Expected OnMatchFound, got {:?}", other),
        }
        match client.next_event().await {
            Some(ClientEvent::OnServerClaimed { address, match_id }) => {
                assert_eq!(address, "10.0.0.5:7777");
                assert_eq!(match_id, match_ids[0]);
            }
            other => panic!("Expected OnServerClaimed, got {:?}", other),
        }
        // The broker closes the socket after the terminal event
        assert!(client.next_event().await.is_none());
    }
    assert_eq!(match_ids[0], match_ids[1]);

    let requests = service.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].session_id, match_ids[0].to_string());

    assert!(registry_drains(&broker).await);
    let stats = broker.state.matchmaker_stats();
    assert_eq!(stats.matches_formed, 1);
    assert_eq!(stats.matches_claimed, 1);

    broker.stop().await;
}

#[tokio::test]
async fn test_no_capacity_sends_match_error_and_closes() {
    let (broker, _service) = create_test_broker(vec![ClaimAnswer::NoCapacity]).await;

    let mut first = broker.connect_client().await;
    let mut second = broker.connect_client().await;

    for client in [&mut first, &mut second] {
        assert!(matches!(client.next_event().await, Some(ClientEvent::OnQueued { .. })));
        assert!(matches!(client.next_event().await, Some(ClientEvent::OnMatchFound { .. })));
        match client.next_event().await {
            Some(ClientEvent::OnMatchError { reason, .. }) => {
                assert_eq!(reason, "No server available");
            }
            other => panic!("Expected OnMatchError, got {:?}", other),
        }
        assert!(client.next_event().await.is_none());
    }

    assert!(registry_drains(&broker).await);
    assert_eq!(broker.state.matchmaker_stats().matches_failed, 1);

    broker.stop().await;
}

#[tokio::test]
async fn test_claim_failure_is_reported_as_match_error() {
    let (broker, _service) = create_test_broker(vec![ClaimAnswer::Failure]).await;

    let mut first = broker.connect_client().await;
    let mut second = broker.connect_client().await;

    for client in [&mut first, &mut second] {
        assert!(matches!(client.next_event().await, Some(ClientEvent::OnQueued { .. })));
        assert!(matches!(client.next_event().await, Some(ClientEvent::OnMatchFound { .. })));
        assert!(matches!(client.next_event().await, Some(ClientEvent::OnMatchError { .. })));
    }

    broker.stop().await;
}

#[tokio::test]
async fn test_lone_client_keeps_waiting() {
    let (broker, service) = create_test_broker(vec![]).await;

    let mut client = broker.connect_client().await;
    assert!(matches!(client.next_event().await, Some(ClientEvent::OnQueued { .. })));

    // Several matchmaking ticks pass without a partner
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(broker.state.registry().len().await, 1);
    assert!(service.requests().is_empty());
    assert_eq!(broker.state.matchmaker_stats().matches_formed, 0);

    broker.stop().await;
}

#[tokio::test]
async fn test_third_client_waits_for_next_match() {
    let (broker, _service) = create_test_broker(vec![ClaimAnswer::Server {
        ip: "10.0.0.5".to_string(),
        port: 7777,
    }])
    .await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut client = broker.connect_client().await;
        assert!(matches!(client.next_event().await, Some(ClientEvent::OnQueued { .. })));
        clients.push(client);
    }

    let matched = eventually(Duration::from_secs(3), || {
        let state = broker.state.clone();
        async move { state.matchmaker_stats().matches_formed >= 1 }
    })
    .await;
    assert!(matched);

    assert!(eventually(Duration::from_secs(3), || {
        let registry = broker.state.registry();
        async move { registry.len().await == 1 }
    })
    .await);
    assert_eq!(broker.state.matchmaker_stats().matches_formed, 1);

    broker.stop().await;
}

#[tokio::test]
async fn test_client_disconnect_leaves_the_pool() {
    let (broker, service) = create_test_broker(vec![]).await;

    let mut client = broker.connect_client().await;
    assert!(matches!(client.next_event().await, Some(ClientEvent::OnQueued { .. })));
    assert_eq!(broker.state.registry().len().await, 1);

    client.close().await;
    assert!(registry_drains(&broker).await);

    // A later arrival is not paired with the departed client
    let mut late = broker.connect_client().await;
    assert!(matches!(late.next_event().await, Some(ClientEvent::OnQueued { .. })));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(service.requests().is_empty());

    broker.stop().await;
}

#[tokio::test]
async fn test_override_address_skips_the_platform() {
    let requestor = AllocationRequestor::override_address("127.0.0.1:9000");
    let broker = TestBroker::start(test_config(), requestor).await;

    let mut first = broker.connect_client().await;
    let mut second = broker.connect_client().await;

    for client in [&mut first, &mut second] {
        assert!(matches!(client.next_event().await, Some(ClientEvent::OnQueued { .. })));
        assert!(matches!(client.next_event().await, Some(ClientEvent::OnMatchFound { .. })));
        match client.next_event().await {
            Some(ClientEvent::OnServerClaimed { address, .. }) => {
                assert_eq!(address, "127.0.0.1:9000")
            }
            other => panic!("Expected OnServerClaimed, got {:?}", other),
        }
    }

    broker.stop().await;
}

#[tokio::test]
async fn test_probe_endpoints() {
    let (broker, service) = create_test_broker(vec![
        ClaimAnswer::Server {
            ip: "10.0.0.9".to_string(),
            port: 7000,
        },
        ClaimAnswer::NoCapacity,
    ])
    .await;
    let http = reqwest::Client::new();

    let health = http.get(broker.http_url("/healthz")).send().await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "OK\n");

    let claimed = http.get(broker.http_url("/test-claim")).send().await.unwrap();
    assert_eq!(claimed.status(), 200);
    assert_eq!(
        claimed.text().await.unwrap(),
        "server available at: 10.0.0.9:7000\n"
    );

    let unavailable = http.get(broker.http_url("/test-claim")).send().await.unwrap();
    assert_eq!(unavailable.status(), 404);

    let requests = service.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.session_id == DIAGNOSTIC_SESSION_ID));

    let metrics = http.get(broker.http_url("/metrics")).send().await.unwrap();
    assert_eq!(metrics.status(), 200);
    assert!(metrics.text().await.unwrap().contains("match_broker_"));

    // Probes never join the matchmaking pool
    assert!(broker.state.registry().is_empty().await);

    broker.stop().await;
}

#[tokio::test]
async fn test_plain_http_on_client_path_is_rejected() {
    let (broker, _service) = create_test_broker(vec![]).await;

    let response = reqwest::get(broker.http_url("/")).await.unwrap();
    assert_eq!(response.status(), 426);
    assert!(broker.state.registry().is_empty().await);

    broker.stop().await;
}

#[tokio::test]
async fn test_shutdown_mid_claim_still_delivers_the_outcome() {
    let service = Arc::new(
        ScriptedClaimService::new(vec![ClaimAnswer::Server {
            ip: "10.0.0.5".to_string(),
            port: 7777,
        }])
        .with_latency(Duration::from_millis(400)),
    );
    let config = test_config();
    let requestor = AllocationRequestor::new(
        ClaimMode::Remote(service.clone()),
        config.claim.port_name.clone(),
    );
    let broker = TestBroker::start(config, requestor).await;

    let mut first = broker.connect_client().await;
    let mut second = broker.connect_client().await;
    for client in [&mut first, &mut second] {
        assert!(matches!(client.next_event().await, Some(ClientEvent::OnQueued { .. })));
        assert!(matches!(client.next_event().await, Some(ClientEvent::OnMatchFound { .. })));
    }

    // The claim is still outstanding when shutdown begins
    let stopping = {
        let state = broker.state.clone();
        tokio::spawn(async move { state.shutdown().await })
    };

    for client in [&mut first, &mut second] {
        match client.next_event().await {
            Some(ClientEvent::OnServerClaimed { address, .. }) => {
                assert_eq!(address, "10.0.0.5:7777")
            }
            other => panic!("Expected OnServerClaimed, got {:?}", other),
        }
        assert!(client.next_event().await.is_none());
    }

    stopping.await.unwrap();
    assert_eq!(broker.state.matchmaker_stats().matches_claimed, 1);
    assert!(registry_drains(&broker).await);
}

#[tokio::test]
async fn test_shutdown_closes_waiting_clients() {
    let (broker, _service) = create_test_broker(vec![]).await;

    let mut client = broker.connect_client().await;
    assert!(matches!(client.next_event().await, Some(ClientEvent::OnQueued { .. })));

    broker.stop().await;
    assert!(client.next_event().await.is_none());
    assert!(!broker.state.is_running());
    assert!(registry_drains(&broker).await);
}
