//! Periodic matchmaking loop
//!
//! On every tick the matchmaker takes a registry snapshot and keeps forming
//! matches until fewer than N waiting connections remain. Each match is
//! claimed and broadcast before the next one is formed. Cancellation is only
//! observed between matches, so an in-flight claim always completes.

use crate::claim::AllocationRequestor;
use crate::config::AppConfig;
use crate::error::Result;
use crate::matchmaking::broadcaster::MatchBroadcaster;
use crate::matchmaking::former::{Match, MatchFormer};
use crate::matchmaking::registry::ConnectionRegistry;
use crate::metrics::MetricsCollector;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters reported on `/stats`
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MatchmakerStats {
    pub matches_formed: u64,
    pub matches_claimed: u64,
    pub matches_failed: u64,
}

/// Forms matches from the registry and drives them to completion
pub struct Matchmaker {
    registry: Arc<ConnectionRegistry>,
    former: MatchFormer,
    requestor: AllocationRequestor,
    broadcaster: MatchBroadcaster,
    claim_keys: Vec<String>,
    regions: Vec<String>,
    interval: Duration,
    metrics: Option<Arc<MetricsCollector>>,
    matches_formed: AtomicU64,
    matches_claimed: AtomicU64,
    matches_failed: AtomicU64,
}

impl Matchmaker {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        requestor: AllocationRequestor,
        config: &AppConfig,
    ) -> Self {
        Self {
            registry,
            former: MatchFormer::new(config.matchmaking.match_size),
            requestor,
            broadcaster: MatchBroadcaster::new(config.close_delay()),
            claim_keys: config.claim.claim_keys.clone(),
            regions: config.claim.regions.clone(),
            interval: config.match_interval(),
            metrics: None,
            matches_formed: AtomicU64::new(0),
            matches_claimed: AtomicU64::new(0),
            matches_failed: AtomicU64::new(0),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn group_size(&self) -> usize {
        self.former.group_size()
    }

    pub fn stats(&self) -> MatchmakerStats {
        MatchmakerStats {
            matches_formed: self.matches_formed.load(Ordering::Relaxed),
            matches_claimed: self.matches_claimed.load(Ordering::Relaxed),
            matches_failed: self.matches_failed.load(Ordering::Relaxed),
        }
    }

    /// Run until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            group_size = self.group_size(),
            interval_ms = self.interval.as_millis() as u64,
            "Matchmaker started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            // Drain the backlog: one match per iteration until the pool is short
            while !cancel.is_cancelled() {
                match self.run_once().await {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Matchmaking iteration failed");
                        break;
                    }
                }
            }
        }

        info!("Matchmaker stopped");
    }

    /// Form at most one match and drive it to a terminal state
    pub async fn run_once(&self) -> Result<Option<Match>> {
        let snapshot = self.registry.snapshot().await;
        let Some(mut formed) = self.former.form(&snapshot) else {
            debug!(
                registered = snapshot.len(),
                group_size = self.group_size(),
                "Not enough waiting connections"
            );
            return Ok(None);
        };

        self.matches_formed.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_match_formed();
        }
        info!(
            match_id = %formed.id(),
            members = ?formed.member_ids(),
            "Match found"
        );

        self.broadcaster.notify(&formed, formed.found_event()).await;

        formed.begin_claim()?;
        let outcome = self
            .requestor
            .claim(&self.claim_keys, &self.regions, &formed.session_id())
            .await;
        let claimed = outcome.is_some();

        let event = formed.complete(outcome)?;
        let delivered = self.broadcaster.notify(&formed, event).await;

        if claimed {
            self.matches_claimed.fetch_add(1, Ordering::Relaxed);
            info!(match_id = %formed.id(), state = %formed.state(), delivered, "Match claimed");
        } else {
            self.matches_failed.fetch_add(1, Ordering::Relaxed);
            warn!(match_id = %formed.id(), delivered, "Match failed: no server available");
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_match_completed(claimed);
        }

        Ok(Some(formed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::service::MockClaimService;
    use crate::claim::ClaimMode;
    use crate::matchmaking::connection::{Connection, Outbound};
    use crate::types::{ClaimResponse, ClientEvent, MatchState};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn config(match_size: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.matchmaking.match_size = match_size;
        config.matchmaking.close_delay_ms = 0;
        config.matchmaking.match_interval_ms = 10;
        config
    }

    async fn join(registry: &ConnectionRegistry) -> (Arc<Connection>, UnboundedReceiver<Outbound>) {
        let (connection, rx) = Connection::channel();
        let connection = Arc::new(connection);
        registry.add(connection.clone()).await;
        (connection, rx)
    }

    async fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_claimed_match_notifies_and_closes_both() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut rx_a) = join(&registry).await;
        let (_b, mut rx_b) = join(&registry).await;

        let matchmaker = Matchmaker::new(
            registry.clone(),
            AllocationRequestor::override_address("10.0.0.5:7777"),
            &config(2),
        );

        let formed = matchmaker.run_once().await.unwrap().unwrap();
        assert_eq!(
            formed.state(),
            &MatchState::Claimed {
                address: "10.0.0.5:7777".to_string()
            }
        );

        for rx in [&mut rx_a, &mut rx_b] {
            let frames = drain(rx).await;
            assert_eq!(frames.len(), 3);
            assert!(matches!(
                frames[0],
                Outbound::Event(ClientEvent::OnMatchFound { .. })
            ));
            assert_eq!(
                frames[1],
                Outbound::Event(ClientEvent::OnServerClaimed {
                    match_id: formed.id(),
                    address: "10.0.0.5:7777".to_string()
                })
            );
            assert_eq!(frames[2], Outbound::Close);
        }
        assert_eq!(matchmaker.stats().matches_claimed, 1);
    }

    #[tokio::test]
    async fn test_absent_claim_sends_match_error() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut rx_a) = join(&registry).await;
        let (_b, _rx_b) = join(&registry).await;

        let mut service = MockClaimService::new();
        service
            .expect_claim()
            .times(1)
            .returning(|_| Ok(None::<ClaimResponse>));
        let requestor = AllocationRequestor::new(ClaimMode::Remote(Arc::new(service)), "default");

        let matchmaker = Matchmaker::new(registry.clone(), requestor, &config(2));
        let formed = matchmaker.run_once().await.unwrap().unwrap();

        assert!(matches!(formed.state(), MatchState::Failed { .. }));
        let frames = drain(&mut rx_a).await;
        assert!(matches!(
            frames[1],
            Outbound::Event(ClientEvent::OnMatchError { .. })
        ));
        assert_eq!(frames[2], Outbound::Close);
        assert_eq!(matchmaker.stats().matches_failed, 1);
    }

    #[tokio::test]
    async fn test_match_session_id_is_match_id() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, _rx_a) = join(&registry).await;
        let (_b, _rx_b) = join(&registry).await;

        let mut service = MockClaimService::new();
        service
            .expect_claim()
            .withf(|request| uuid::Uuid::parse_str(&request.session_id).is_ok())
            .times(1)
            .returning(|_| Ok(None));
        let requestor = AllocationRequestor::new(ClaimMode::Remote(Arc::new(service)), "default");

        let matchmaker = Matchmaker::new(registry, requestor, &config(2));
        let formed = matchmaker.run_once().await.unwrap().unwrap();
        assert_eq!(formed.session_id(), formed.id().to_string());
        assert!(a.is_assigned());
    }

    #[tokio::test]
    async fn test_not_enough_connections() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut rx_a) = join(&registry).await;

        let matchmaker = Matchmaker::new(
            registry,
            AllocationRequestor::override_address("10.0.0.5:7777"),
            &config(2),
        );

        assert!(matchmaker.run_once().await.unwrap().is_none());
        assert!(drain(&mut rx_a).await.is_empty());
    }

    #[tokio::test]
    async fn test_latecomer_waits_for_next_match() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, _rx_a) = join(&registry).await;
        let (b, _rx_b) = join(&registry).await;
        let (c, mut rx_c) = join(&registry).await;

        let matchmaker = Matchmaker::new(
            registry,
            AllocationRequestor::override_address("10.0.0.5:7777"),
            &config(2),
        );

        let formed = matchmaker.run_once().await.unwrap().unwrap();
        assert_eq!(formed.member_ids(), vec![a.id(), b.id()]);
        assert!(!c.is_assigned());
        assert!(drain(&mut rx_c).await.is_empty());
        assert!(matchmaker.run_once().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let registry = Arc::new(ConnectionRegistry::new());
        let matchmaker = Arc::new(Matchmaker::new(
            registry.clone(),
            AllocationRequestor::override_address("10.0.0.5:7777"),
            &config(2),
        ));
        let cancel = CancellationToken::new();

        let task = {
            let matchmaker = matchmaker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { matchmaker.run(cancel).await })
        };

        let (_a, _rx_a) = join(&registry).await;
        let (_b, _rx_b) = join(&registry).await;
        let (_c, _rx_c) = join(&registry).await;
        let (_d, _rx_d) = join(&registry).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(matchmaker.stats().matches_formed, 2);
    }
}
