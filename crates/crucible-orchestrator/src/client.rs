// crates/crucible-orchestrator/src/client.rs
// ============================================================================
// Module: Orchestrator API Client
// Description: HTTP client behind the Orchestrator trait, plus a test double.
// Purpose: Create, delete, and observe batch Jobs over the cluster API.
// Dependencies: crucible-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! [`HttpOrchestrator`] speaks the cluster's batch/v1 REST surface with a
//! bearer token: create posts the rendered manifest, delete requests
//! background propagation, and the terminal listing filters by the
//! evaluation label selector. HTTP 409 maps to `AlreadyExists` and 404 to
//! `NotFound` so callers can treat both as benign.
//! [`InMemoryOrchestrator`] backs unit and end-to-end tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use crucible_core::JobObservation;
use crucible_core::JobState;
use crucible_core::Orchestrator;
use crucible_core::OrchestratorError;
use serde_json::Value;

use crate::render::LABEL_JOB_KIND;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Label selector for evaluation Jobs.
const EVAL_SELECTOR: &str = "job-kind=eval";
/// Connect timeout for orchestrator calls.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Request timeout for orchestrator calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// SECTION: HTTP Client
// ============================================================================

/// Cluster API client for batch Jobs.
pub struct HttpOrchestrator {
    /// Base URL of the cluster API.
    base_url: String,
    /// Namespace Jobs live in.
    namespace: String,
    /// Bearer token for API auth.
    token: String,
    /// Shared HTTP client.
    client: reqwest::Client,
}

impl HttpOrchestrator {
    /// Builds a client against the given API endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Backend`] when the HTTP client cannot
    /// be constructed.
    pub fn new(
        base_url: impl Into<String>,
        namespace: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, OrchestratorError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| OrchestratorError::Backend(err.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            namespace: namespace.into(),
            token: token.into(),
            client,
        })
    }

    /// Returns the Jobs collection URL.
    fn jobs_url(&self) -> String {
        format!("{}/apis/batch/v1/namespaces/{}/jobs", self.base_url, self.namespace)
    }
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    async fn create_job(&self, name: &str, manifest: Value) -> Result<(), OrchestratorError> {
        let response = self
            .client
            .post(self.jobs_url())
            .bearer_auth(&self.token)
            .json(&manifest)
            .send()
            .await
            .map_err(|err| OrchestratorError::Backend(err.to_string()))?;
        match response.status().as_u16() {
            200 | 201 | 202 => Ok(()),
            409 => Err(OrchestratorError::AlreadyExists(name.to_string())),
            status => Err(OrchestratorError::Backend(format!(
                "create {name} returned {status}"
            ))),
        }
    }

    async fn delete_job(&self, name: &str) -> Result<(), OrchestratorError> {
        let url = format!("{}/{}?propagationPolicy=Background", self.jobs_url(), name);
        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| OrchestratorError::Backend(err.to_string()))?;
        match response.status().as_u16() {
            200 | 202 => Ok(()),
            404 => Err(OrchestratorError::NotFound(name.to_string())),
            status => Err(OrchestratorError::Backend(format!(
                "delete {name} returned {status}"
            ))),
        }
    }

    async fn list_terminal_jobs(&self) -> Result<Vec<JobObservation>, OrchestratorError> {
        let url = format!("{}?labelSelector={EVAL_SELECTOR}", self.jobs_url());
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| OrchestratorError::Backend(err.to_string()))?;
        if !response.status().is_success() {
            return Err(OrchestratorError::Backend(format!(
                "list returned {}",
                response.status().as_u16()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|err| OrchestratorError::Backend(err.to_string()))?;
        let mut observations = Vec::new();
        for item in body["items"].as_array().into_iter().flatten() {
            let Some(observation) = observation_from_item(item) else {
                continue;
            };
            observations.push(observation);
        }
        Ok(observations)
    }
}

/// Extracts a terminal observation from a Job list item.
fn observation_from_item(item: &Value) -> Option<JobObservation> {
    let name = item["metadata"]["name"].as_str()?.to_string();
    let labels = item["metadata"]["labels"]
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(key, value)| {
                    value.as_str().map(|value| (key.clone(), value.to_string()))
                })
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();
    let conditions = item["status"]["conditions"].as_array()?;
    let state = conditions.iter().find_map(|condition| {
        let kind = condition["type"].as_str()?;
        let status = condition["status"].as_str()?;
        if status != "True" {
            return None;
        }
        match kind {
            "Complete" => Some(JobState::Complete),
            "Failed" => Some(JobState::Failed),
            _ => None,
        }
    })?;
    Some(JobObservation {
        name,
        labels,
        state,
    })
}

// ============================================================================
// SECTION: In-Memory Double
// ============================================================================

/// In-memory orchestrator for tests and local development.
#[derive(Default)]
pub struct InMemoryOrchestrator {
    /// Created Jobs keyed by name.
    jobs: Mutex<BTreeMap<String, Value>>,
    /// Terminal observations served by the next list call.
    terminal: Mutex<Vec<JobObservation>>,
}

impl InMemoryOrchestrator {
    /// Creates an empty double.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the names of currently stored Jobs.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned (test-only type).
    #[must_use]
    pub fn job_names(&self) -> Vec<String> {
        #[allow(clippy::unwrap_used, reason = "Test double; poisoning is a test bug.")]
        let jobs = self.jobs.lock().unwrap();
        jobs.keys().cloned().collect()
    }

    /// Returns the stored manifest for a Job.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned (test-only type).
    #[must_use]
    pub fn manifest(&self, name: &str) -> Option<Value> {
        #[allow(clippy::unwrap_used, reason = "Test double; poisoning is a test bug.")]
        let jobs = self.jobs.lock().unwrap();
        jobs.get(name).cloned()
    }

    /// Seeds a terminal observation for the next list call.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned (test-only type).
    pub fn push_terminal(&self, observation: JobObservation) {
        #[allow(clippy::unwrap_used, reason = "Test double; poisoning is a test bug.")]
        let mut terminal = self.terminal.lock().unwrap();
        terminal.push(observation);
    }

    /// Marks a stored Job as terminal using its own labels.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned (test-only type).
    pub fn finish_job(&self, name: &str, state: JobState) {
        #[allow(clippy::unwrap_used, reason = "Test double; poisoning is a test bug.")]
        let jobs = self.jobs.lock().unwrap();
        let labels = jobs
            .get(name)
            .and_then(|manifest| manifest["metadata"]["labels"].as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(key, value)| {
                        value.as_str().map(|value| (key.clone(), value.to_string()))
                    })
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();
        drop(jobs);
        self.push_terminal(JobObservation {
            name: name.to_string(),
            labels,
            state,
        });
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn create_job(&self, name: &str, manifest: Value) -> Result<(), OrchestratorError> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| OrchestratorError::Backend("lock poisoned".to_string()))?;
        if jobs.contains_key(name) {
            return Err(OrchestratorError::AlreadyExists(name.to_string()));
        }
        jobs.insert(name.to_string(), manifest);
        Ok(())
    }

    async fn delete_job(&self, name: &str) -> Result<(), OrchestratorError> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| OrchestratorError::Backend("lock poisoned".to_string()))?;
        if jobs.remove(name).is_none() {
            return Err(OrchestratorError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn list_terminal_jobs(&self) -> Result<Vec<JobObservation>, OrchestratorError> {
        let terminal = self
            .terminal
            .lock()
            .map_err(|_| OrchestratorError::Backend("lock poisoned".to_string()))?;
        Ok(terminal
            .iter()
            .filter(|observation| {
                observation.labels.get(LABEL_JOB_KIND).is_some_and(|kind| kind == "eval")
            })
            .cloned()
            .collect())
    }
}
