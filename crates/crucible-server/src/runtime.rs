// crates/crucible-server/src/runtime.rs
// ============================================================================
// Module: Process Runtime
// Description: Boot wiring and graceful shutdown for the backbone process.
// Purpose: Start the API, consumer, controller, and poller; stop them cleanly.
// Dependencies: axum, crucible-*, tokio
// ============================================================================

//! ## Overview
//! Boot order: load config, open and migrate the store, reconcile
//! identities, then start the HTTP server and the three background loops.
//! Shutdown: a watch channel fans the signal out; the HTTP server drains
//! through axum's graceful shutdown and the loops observe the channel at
//! every suspension point. The process waits up to the configured budget
//! before returning.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crucible_config::CrucibleConfig;
use crucible_core::AuditSink;
use crucible_core::StderrAuditSink;
use crucible_core::Timestamp;
use crucible_orchestrator::Assignment;
use crucible_orchestrator::ControllerConfig;
use crucible_orchestrator::HttpOrchestrator;
use crucible_orchestrator::JobController;
use crucible_orchestrator::JobRenderer;
use crucible_orchestrator::RenderConfig;
use crucible_store_sqlite::SqliteLeaderElector;
use crucible_store_sqlite::SqliteResultQueue;
use crucible_store_sqlite::SqliteStore;
use crucible_store_sqlite::SqliteStoreConfig;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::archive::S3BlobStore;
use crate::archive::S3BlobStoreConfig;
use crate::consumer::ResultConsumer;
use crate::identity::reconcile_identities;
use crate::poller::CrsStatusPoller;
use crate::poller::CrsTarget;
use crate::server::ServerState;
use crate::server::api_router;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors preventing the process from booting.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Store open or migration failure.
    #[error("store: {0}")]
    Store(String),
    /// Identity reconciliation failure.
    #[error("identity: {0}")]
    Identity(String),
    /// Orchestrator client construction failure.
    #[error("orchestrator: {0}")]
    Orchestrator(String),
    /// Network binding failure.
    #[error("bind: {0}")]
    Bind(String),
    /// Poller construction failure.
    #[error("poller: {0}")]
    Poller(String),
}

// ============================================================================
// SECTION: Runtime
// ============================================================================

/// A booted backbone process.
pub struct Runtime {
    /// Loaded configuration.
    config: CrucibleConfig,
    /// Shared server state.
    state: Arc<ServerState>,
    /// Result consumer.
    consumer: Arc<ResultConsumer>,
    /// Job controller.
    controller: Arc<JobController>,
    /// CRS status poller.
    poller: Arc<CrsStatusPoller>,
}

impl Runtime {
    /// Wires every component from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when any backend fails to construct.
    pub async fn boot(config: CrucibleConfig) -> Result<Self, RuntimeError> {
        let audit: Arc<dyn AuditSink> = Arc::new(StderrAuditSink);

        let store = SqliteStore::open(&SqliteStoreConfig {
            path: config.store.path.clone(),
            busy_timeout_ms: config.store.busy_timeout_ms,
        })
        .map_err(|err| RuntimeError::Store(err.to_string()))?;
        reconcile_identities(&config, &store, audit.as_ref())
            .map_err(|err| RuntimeError::Identity(err.to_string()))?;

        let queue = SqliteResultQueue::new(&store);
        let elector = SqliteLeaderElector::new(&store);

        let token = std::fs::read_to_string(&config.orchestrator.token_path)
            .map(|token| token.trim().to_string())
            .map_err(|err| RuntimeError::Orchestrator(err.to_string()))?;
        let orchestrator = HttpOrchestrator::new(
            config.orchestrator.api_url.clone(),
            config.orchestrator.namespace.clone(),
            token,
        )
        .map_err(|err| RuntimeError::Orchestrator(err.to_string()))?;
        let orchestrator = Arc::new(orchestrator);

        let submissions = Arc::new(
            S3BlobStore::new(S3BlobStoreConfig {
                endpoint: config.blob.endpoint.clone(),
                region: config.blob.region.clone(),
                bucket: config.blob.submissions_bucket.clone(),
                prefix: config.blob.prefix.clone(),
                force_path_style: config.blob.force_path_style,
            })
            .await,
        );
        let worker_blobs = Arc::new(
            S3BlobStore::new(S3BlobStoreConfig {
                endpoint: config.blob.endpoint.clone(),
                region: config.blob.region.clone(),
                bucket: config.blob.artifacts_bucket.clone(),
                prefix: config.blob.prefix.clone(),
                force_path_style: config.blob.force_path_style,
            })
            .await,
        );
        let archive = Arc::new(
            S3BlobStore::new(S3BlobStoreConfig {
                endpoint: config.archive.endpoint.clone(),
                region: config.archive.region.clone(),
                bucket: config.archive.bucket.clone(),
                prefix: config.archive.prefix.clone(),
                force_path_style: config.archive.force_path_style,
            })
            .await,
        );

        let renderer = JobRenderer::new(RenderConfig {
            namespace: config.orchestrator.namespace.clone(),
            evaluator_image: config.orchestrator.evaluator_image.clone(),
            daemon_image: config.orchestrator.daemon_image.clone(),
            eval_assignment: Assignment {
                node_affinity_label: config.orchestrator.eval_node_assignment.node_affinity_label.clone(),
                toleration: config.orchestrator.eval_node_assignment.toleration.clone(),
            },
            broadcast_assignment: Assignment {
                node_affinity_label: config
                    .orchestrator
                    .broadcast_node_assignment
                    .node_affinity_label
                    .clone(),
                toleration: config.orchestrator.broadcast_node_assignment.toleration.clone(),
            },
            round_id: config.round_id.clone(),
            otel_env: std::env::vars()
                .filter(|(name, _)| name.starts_with("OTEL_") || name == "TRACEPARENT")
                .collect(),
        });

        let state = Arc::new(ServerState {
            store: Arc::new(store.clone()),
            submissions: submissions.clone(),
            archive: archive.clone(),
            orchestrator: orchestrator.clone(),
            renderer,
            audit: audit.clone(),
            round_id: config.round_id.clone(),
            started_at: Timestamp::now(),
        });

        let consumer = Arc::new(ResultConsumer::new(
            Arc::new(queue),
            Arc::new(store.clone()),
            worker_blobs,
            archive,
            audit.clone(),
            config.round_id.clone(),
            Duration::from_secs(config.queue.visibility_seconds),
            Duration::from_secs(config.queue.poll_wait_seconds),
        ));

        let holder = std::env::var("HOSTNAME")
            .unwrap_or_else(|_| format!("crucible-{}", std::process::id()));
        let controller = Arc::new(JobController::new(
            ControllerConfig::new(config.round_id.clone(), holder),
            Arc::new(elector),
            orchestrator,
            Arc::new(store),
            audit.clone(),
        ));

        let targets = config
            .teams
            .iter()
            .filter_map(|team| {
                let crs = team.crs.as_ref()?;
                let team_id = team.team_id().ok()?;
                Some(CrsTarget {
                    team_id,
                    url: crs.url.clone(),
                    api_key_id: crs.api_key_id.clone(),
                    api_key_token: crs.api_key_token.clone(),
                })
            })
            .collect();
        let poller = Arc::new(
            CrsStatusPoller::new(
                targets,
                Duration::from_secs(config.crs_status_poll_seconds),
                audit,
                config.round_id.clone(),
            )
            .map_err(RuntimeError::Poller)?,
        );

        Ok(Self {
            config,
            state,
            consumer,
            controller,
            poller,
        })
    }

    /// Serves until the process receives a shutdown signal, then drains
    /// within the configured budget.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Bind`] when the listener cannot bind.
    pub async fn serve(self, addr: SocketAddr) -> Result<(), RuntimeError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut background = JoinSet::new();
        {
            let consumer = Arc::clone(&self.consumer);
            let rx = shutdown_rx.clone();
            background.spawn(async move { consumer.run(rx).await });
        }
        {
            let controller = Arc::clone(&self.controller);
            let rx = shutdown_rx.clone();
            background.spawn(async move { controller.run(rx).await });
        }
        {
            let poller = Arc::clone(&self.poller);
            let rx = shutdown_rx.clone();
            background.spawn(async move { poller.run(rx).await });
        }

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|err| RuntimeError::Bind(err.to_string()))?;
        let router = api_router(Arc::clone(&self.state));
        let mut signal_rx = shutdown_rx.clone();
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = signal_rx.changed().await;
        });

        let serve_result = tokio::select! {
            result = server => result,
            () = wait_for_signal() => Ok(()),
        };
        let _ = shutdown_tx.send(true);

        let budget = Duration::from_secs(self.config.graceful_shutdown_seconds);
        let _ = tokio::time::timeout(budget, async {
            while background.join_next().await.is_some() {}
        })
        .await;

        serve_result.map_err(|err| RuntimeError::Bind(err.to_string()))
    }
}

/// Completes when the process receives SIGINT.
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
