// crates/crucible-orchestrator/src/controller.rs
// ============================================================================
// Module: Evaluation Job Controller
// Description: Leader-elected watcher over orchestrator Jobs.
// Purpose: Drive submission state forward exactly once on terminal Jobs.
// Dependencies: crucible-core, tokio
// ============================================================================

//! ## Overview
//! A single controller instance is active across replicas, selected by a
//! 15-second lease renewed every 10 seconds and re-contended every
//! 2 seconds by non-leaders. The leader polls the orchestrator for
//! terminal evaluation Jobs, feeds keys into a deduplicating workqueue,
//! and a worker pool processes them:
//!
//! - `Complete` — the worker owns the state transition via result
//!   messages, so the controller only deletes the Job.
//! - `Failed` — flip the linked row from `accepted` to `errored` with the
//!   store's single-UPDATE transition, audit, then delete the Job.
//!
//! Keys with malformed labels are discarded, never retried. Handler
//! failures requeue with rate-limited backoff. Deletes tolerate not-found.
//! The audit event is emitted before Job deletion; a delete retry may
//! re-emit it, and duplicate audits are accepted over lost ones.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use crucible_core::AuditDetail;
use crucible_core::AuditEvent;
use crucible_core::AuditSink;
use crucible_core::JobObservation;
use crucible_core::JobState;
use crucible_core::LeaderElector;
use crucible_core::Orchestrator;
use crucible_core::OrchestratorError;
use crucible_core::SubmissionEntity;
use crucible_core::SubmissionStatus;
use crucible_core::SubmissionStore;
use crucible_core::Timestamp;
use crucible_core::TransitionOutcome;
use crucible_core::Uuid128;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::render::LABEL_JOB_TYPE;
use crate::render::LABEL_OBJECT_ID;
use crate::workqueue::Workqueue;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Name of the controller lease.
const LEASE_NAME: &str = "crucible-job-controller";
/// Lease duration.
const LEASE_DURATION: Duration = Duration::from_secs(15);
/// Renew interval while leading.
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
/// Retry interval while contending.
const RETRY_INTERVAL: Duration = Duration::from_secs(2);
/// Poll interval for terminal Jobs while leading.
const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default worker pool size.
const DEFAULT_WORKERS: usize = 16;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Controller tuning knobs.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Round identifier stamped onto audit events.
    pub round_id: String,
    /// Unique holder identity for the lease (for example, the pod name).
    pub holder: String,
    /// Worker pool size.
    pub workers: usize,
}

impl ControllerConfig {
    /// Builds a config with the default worker count.
    #[must_use]
    pub fn new(round_id: impl Into<String>, holder: impl Into<String>) -> Self {
        Self {
            round_id: round_id.into(),
            holder: holder.into(),
            workers: DEFAULT_WORKERS,
        }
    }
}

// ============================================================================
// SECTION: Keys
// ============================================================================

/// One unit of controller work, derived from Job labels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct JobKey {
    /// Job object name.
    name: String,
    /// Linked entity kind.
    entity: SubmissionEntity,
    /// Linked submission id in canonical form.
    object_id: String,
    /// Terminal condition observed.
    failed: bool,
}

/// Derives a key from an observation; `None` discards the observation.
fn key_from_observation(observation: &JobObservation) -> Option<JobKey> {
    let entity = observation
        .labels
        .get(LABEL_JOB_TYPE)
        .and_then(|label| SubmissionEntity::parse(label))?;
    let raw_id = observation.labels.get(LABEL_OBJECT_ID)?;
    // Malformed ids are discarded here rather than retried forever.
    let object_id = Uuid128::parse(raw_id).ok()?.to_string();
    Some(JobKey {
        name: observation.name.clone(),
        entity,
        object_id,
        failed: matches!(observation.state, JobState::Failed),
    })
}

// ============================================================================
// SECTION: Controller
// ============================================================================

/// Leader-elected evaluation Job controller.
pub struct JobController {
    /// Tuning knobs.
    config: ControllerConfig,
    /// Lease backend.
    elector: Arc<dyn LeaderElector>,
    /// Orchestrator API.
    orchestrator: Arc<dyn Orchestrator>,
    /// Submission store.
    store: Arc<dyn SubmissionStore>,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
}

impl JobController {
    /// Builds a controller.
    #[must_use]
    pub fn new(
        config: ControllerConfig,
        elector: Arc<dyn LeaderElector>,
        orchestrator: Arc<dyn Orchestrator>,
        store: Arc<dyn SubmissionStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            elector,
            orchestrator,
            store,
            audit,
        }
    }

    /// Runs the contend/lead loop until shutdown signals.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            let acquired = self
                .elector
                .try_acquire(
                    LEASE_NAME,
                    &self.config.holder,
                    Timestamp::now(),
                    lease_millis(),
                )
                .unwrap_or(false);
            if acquired {
                self.clone().lead(&mut shutdown).await;
                let _ = self.elector.release(LEASE_NAME, &self.config.holder);
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(RETRY_INTERVAL) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Runs the leader loop: poll, renew, and drain until the lease is
    /// lost or shutdown signals.
    async fn lead(self: Arc<Self>, shutdown: &mut watch::Receiver<bool>) {
        let queue: Arc<Workqueue<JobKey>> = Workqueue::new();
        let mut workers = JoinSet::new();
        for _ in 0 .. self.config.workers.max(1) {
            let controller = Arc::clone(&self);
            let queue = Arc::clone(&queue);
            workers.spawn(async move {
                while let Some(key) = queue.get().await {
                    match controller.process(&key).await {
                        Ok(()) => queue.done(&key),
                        Err(_) => {
                            // Rate-limited requeue; the key stays tracked.
                            let delay = queue.backoff(&key);
                            let queue = Arc::clone(&queue);
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                queue.reinsert(key);
                            });
                        }
                    }
                }
            });
        }

        let mut poll = tokio::time::interval(POLL_INTERVAL);
        let mut renew = tokio::time::interval(RENEW_INTERVAL);
        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Ok(observations) = self.orchestrator.list_terminal_jobs().await {
                        for observation in &observations {
                            if let Some(key) = key_from_observation(observation) {
                                queue.add(key);
                            }
                        }
                    }
                }
                _ = renew.tick() => {
                    let renewed = self
                        .elector
                        .renew(
                            LEASE_NAME,
                            &self.config.holder,
                            Timestamp::now(),
                            lease_millis(),
                        )
                        .unwrap_or(false);
                    if !renewed {
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }
        queue.shutdown();
        workers.shutdown().await;
    }

    /// Processes one key to completion.
    async fn process(&self, key: &JobKey) -> Result<(), OrchestratorError> {
        if key.failed {
            self.mark_errored(key)?;
        }
        match self.orchestrator.delete_job(&key.name).await {
            Ok(()) | Err(OrchestratorError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Flips the linked row to `errored`, exactly once, and audits.
    fn mark_errored(&self, key: &JobKey) -> Result<(), OrchestratorError> {
        let outcome = match self.store.transition(
            key.entity,
            &key.object_id,
            SubmissionStatus::Errored,
            None,
        ) {
            Ok(outcome) => outcome,
            // A Job labeled with an id no row carries; nothing to transition.
            Err(crucible_core::StoreError::NotFound) => return Ok(()),
            Err(err) => return Err(OrchestratorError::Backend(err.to_string())),
        };
        let transitioned = matches!(outcome, TransitionOutcome::Transitioned);
        self.audit.record(
            &AuditEvent::new(
                "job_failed",
                self.config.round_id.clone(),
                AuditDetail::JobFailed {
                    transitioned,
                },
            )
            .with_submission(key.entity, key.object_id.clone()),
        );
        Ok(())
    }
}

/// Lease duration in milliseconds.
fn lease_millis() -> i64 {
    i64::try_from(LEASE_DURATION.as_millis()).unwrap_or(15_000)
}

#[cfg(test)]
mod tests;
