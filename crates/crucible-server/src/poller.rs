// crates/crucible-server/src/poller.rs
// ============================================================================
// Module: CRS Status Poller
// Description: Periodic fan-out probe of every team's CRS endpoint.
// Purpose: Record CRS reachability in the audit log for scoring context.
// Dependencies: crucible-core, reqwest, tokio
// ============================================================================

//! ## Overview
//! On every tick the poller probes each configured CRS in parallel,
//! bounded by a join set, and audits the result. Probes use the team's
//! outbound credentials and a short timeout; a slow CRS never delays the
//! next tick beyond its own probe.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use crucible_core::AuditDetail;
use crucible_core::AuditEvent;
use crucible_core::AuditSink;
use crucible_core::TeamId;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::auth::basic_header;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Probe request timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// SECTION: Targets
// ============================================================================

/// One CRS endpoint to probe.
#[derive(Debug, Clone)]
pub struct CrsTarget {
    /// Team the endpoint belongs to.
    pub team_id: TeamId,
    /// Base URL of the CRS.
    pub url: String,
    /// Outbound credential id.
    pub api_key_id: String,
    /// Outbound credential token.
    pub api_key_token: String,
}

// ============================================================================
// SECTION: Poller
// ============================================================================

/// Periodic CRS status prober.
pub struct CrsStatusPoller {
    /// Probe targets.
    targets: Vec<CrsTarget>,
    /// Shared HTTP client.
    client: reqwest::Client,
    /// Tick interval.
    interval: Duration,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Round identifier stamped onto audit events.
    round_id: String,
}

impl CrsStatusPoller {
    /// Builds a poller.
    ///
    /// # Errors
    ///
    /// Returns the HTTP client construction error rendered as a string.
    pub fn new(
        targets: Vec<CrsTarget>,
        interval: Duration,
        audit: Arc<dyn AuditSink>,
        round_id: impl Into<String>,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|err| err.to_string())?;
        Ok(Self {
            targets,
            client,
            interval,
            audit,
            round_id: round_id.into(),
        })
    }

    /// Runs the poll loop until shutdown signals.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_once().await,
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Probes every target in parallel and audits each result.
    pub async fn poll_once(&self) {
        let mut probes = JoinSet::new();
        for target in self.targets.clone() {
            let client = self.client.clone();
            probes.spawn(async move {
                let url = format!("{}/status/", target.url.trim_end_matches('/'));
                let auth = basic_header(&target.api_key_id, &target.api_key_token);
                let result = client.get(url).header("authorization", auth).send().await;
                let (reachable, detail) = match result {
                    Ok(response) => (
                        response.status().is_success(),
                        format!("http {}", response.status().as_u16()),
                    ),
                    Err(err) => (false, err.to_string()),
                };
                (target.team_id, reachable, detail)
            });
        }
        while let Some(joined) = probes.join_next().await {
            let Ok((team_id, reachable, detail)) = joined else {
                continue;
            };
            self.audit.record(
                &AuditEvent::new(
                    "crs_status",
                    self.round_id.clone(),
                    AuditDetail::CrsStatus {
                        reachable,
                        detail,
                    },
                )
                .with_team(team_id),
            );
        }
    }
}
