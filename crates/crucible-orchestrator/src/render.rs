// crates/crucible-orchestrator/src/render.rs
// ============================================================================
// Module: Orchestrator Job Rendering
// Description: Renders evaluation, broadcast, and cancel Job manifests.
// Purpose: Produce batch/v1 Job objects with correct scheduling and isolation.
// Dependencies: base64, crucible-core, serde_json
// ============================================================================

//! ## Overview
//! Job manifests are rendered as JSON values in the batch/v1 shape the
//! orchestrator consumes. Evaluation Jobs carry two containers: the
//! evaluator, locked down with `runAsNonRoot` and dropped capabilities,
//! and a privileged sandbox daemon sized from the task's budgets (sandbox
//! image loading requires the privilege). Names are deterministic
//! `<type>-<id>` so duplicate creates surface as already-exists and the
//! caller can ignore them.
//!
//! Invariants:
//! - Labels `job-kind`, `job-type`, `object-id` are the controller's source
//!   of truth; annotations are informational only.
//! - A team-owned Job carries a soft co-location preference and a matching
//!   toleration keyed by team id.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use crucible_core::SubmissionEntity;
use crucible_core::Task;
use crucible_core::TeamId;
use crucible_core::Timestamp;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Label carrying the job kind (`eval`, `broadcast`, `cancel`).
pub const LABEL_JOB_KIND: &str = "job-kind";
/// Label carrying the evaluated entity kind (`pov`, `patch`, `job`).
pub const LABEL_JOB_TYPE: &str = "job-type";
/// Label carrying the submission id the Job evaluates.
pub const LABEL_OBJECT_ID: &str = "object-id";
/// Label carrying the owning team id.
pub const LABEL_TEAM_ID: &str = "team-id";
/// Node label key used for pool assignment.
const NODE_POOL_LABEL: &str = "crucible.dev/node-pool";
/// Node label key used for team co-location.
const TEAM_NODE_LABEL: &str = "crucible.dev/team";
/// Shared mount path between evaluator and daemon.
const SHARED_MOUNT_PATH: &str = "/crucible/work";
/// Fixed evaluator memory request/limit.
const EVALUATOR_MEMORY: &str = "2Gi";
/// Fixed evaluator CPU request/limit.
const EVALUATOR_CPU: &str = "1";

// ============================================================================
// SECTION: Render Config
// ============================================================================

/// Scheduling class: node affinity label value plus tolerated taint key.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    /// Node pool label value for the required affinity.
    pub node_affinity_label: String,
    /// Taint key the Job tolerates.
    pub toleration: String,
}

/// Static inputs shared by every render.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Namespace Jobs are created in.
    pub namespace: String,
    /// Evaluator container image.
    pub evaluator_image: String,
    /// Sandbox daemon container image.
    pub daemon_image: String,
    /// Scheduling class for evaluation Jobs.
    pub eval_assignment: Assignment,
    /// Scheduling class for broadcast Jobs.
    pub broadcast_assignment: Assignment,
    /// Round identifier stamped onto annotations and env.
    pub round_id: String,
    /// OTEL context propagated into containers as env vars.
    pub otel_env: BTreeMap<String, String>,
}

// ============================================================================
// SECTION: Job Inputs
// ============================================================================

/// Inputs for one evaluation Job render.
#[derive(Debug, Clone)]
pub struct EvalJob {
    /// Entity kind under evaluation.
    pub entity: SubmissionEntity,
    /// Submission id in canonical form.
    pub object_id: String,
    /// Owning team.
    pub team_id: TeamId,
    /// Task under evaluation; budgets size the daemon.
    pub task: Task,
}

impl EvalJob {
    /// Returns the deterministic Job name.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}-{}", self.entity.label(), self.object_id)
    }
}

/// Inputs for one broadcast or cancel Job render.
#[derive(Debug, Clone)]
pub struct BroadcastJob {
    /// `broadcast` or `cancel`.
    pub kind: &'static str,
    /// Unique id of the action (names the Job).
    pub action_id: String,
    /// Target team.
    pub team_id: TeamId,
    /// CRS route the payload posts to.
    pub route: String,
    /// JSON payload delivered to the route.
    pub payload: Value,
    /// Delivery deadline.
    pub deadline: Timestamp,
    /// Outbound credential id for the team's CRS.
    pub api_key_id: String,
    /// Outbound credential token for the team's CRS.
    pub api_key_token: String,
}

impl BroadcastJob {
    /// Returns the deterministic Job name.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}-{}", self.kind, self.action_id)
    }
}

// ============================================================================
// SECTION: Renderer
// ============================================================================

/// Renders orchestrator Job manifests.
#[derive(Debug, Clone)]
pub struct JobRenderer {
    /// Static render inputs.
    config: RenderConfig,
}

impl JobRenderer {
    /// Builds a renderer.
    #[must_use]
    pub const fn new(config: RenderConfig) -> Self {
        Self {
            config,
        }
    }

    /// Renders an evaluation Job manifest.
    #[must_use]
    pub fn render_eval(&self, job: &EvalJob) -> Value {
        let name = job.name();
        let mut labels = BTreeMap::from([
            (LABEL_JOB_KIND.to_string(), "eval".to_string()),
            (LABEL_JOB_TYPE.to_string(), job.entity.label().to_string()),
            (LABEL_OBJECT_ID.to_string(), job.object_id.clone()),
            (LABEL_TEAM_ID.to_string(), job.team_id.to_string()),
        ]);
        let mut annotations = BTreeMap::from([
            ("crucible.dev/round-id".to_string(), self.config.round_id.clone()),
            ("crucible.dev/task-id".to_string(), job.task.id.to_string()),
            ("crucible.dev/team-id".to_string(), job.team_id.to_string()),
        ]);
        match job.entity {
            SubmissionEntity::Pov => {
                annotations.insert("crucible.dev/pov-id".to_string(), job.object_id.clone());
            }
            SubmissionEntity::Patch => {
                annotations.insert("crucible.dev/patch-id".to_string(), job.object_id.clone());
            }
            SubmissionEntity::Job => {}
        }
        labels.retain(|_, value| !value.is_empty());

        let env = self.common_env();
        let daemon_memory = format!("{}Gi", job.task.memory_gb);
        let daemon_cpu = job.task.cpus.to_string();

        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": name,
                "namespace": self.config.namespace,
                "labels": labels,
                "annotations": annotations,
            },
            "spec": {
                "backoffLimit": 0,
                "podFailurePolicy": {
                    "rules": [{
                        "action": "FailJob",
                        "onExitCodes": {"containerName": "evaluator", "operator": "In", "values": [1]}
                    }]
                },
                "template": {
                    "metadata": {"labels": labels},
                    "spec": {
                        "restartPolicy": "Never",
                        "affinity": self.eval_affinity(job.team_id),
                        "tolerations": self.eval_tolerations(job.team_id),
                        "volumes": [{"name": "work", "emptyDir": {}}],
                        "containers": [
                            {
                                "name": "evaluator",
                                "image": self.config.evaluator_image,
                                "command": ["worker", "eval", "--base-dir", SHARED_MOUNT_PATH],
                                "env": env,
                                "volumeMounts": [{"name": "work", "mountPath": SHARED_MOUNT_PATH}],
                                "resources": {
                                    "requests": {"memory": EVALUATOR_MEMORY, "cpu": EVALUATOR_CPU},
                                    "limits": {"memory": EVALUATOR_MEMORY, "cpu": EVALUATOR_CPU},
                                },
                                "securityContext": {
                                    "runAsNonRoot": true,
                                    "allowPrivilegeEscalation": false,
                                    "capabilities": {"drop": ["ALL"]},
                                    "readOnlyRootFilesystem": true,
                                },
                            },
                            {
                                "name": "daemon",
                                "image": self.config.daemon_image,
                                "env": env,
                                "volumeMounts": [{"name": "work", "mountPath": SHARED_MOUNT_PATH}],
                                "resources": {
                                    "requests": {"memory": daemon_memory, "cpu": daemon_cpu},
                                    "limits": {"memory": daemon_memory, "cpu": daemon_cpu},
                                },
                                // The daemon loads sandbox images; that requires privilege.
                                "securityContext": {"privileged": true},
                                "startupProbe": daemon_probe(30),
                                "readinessProbe": daemon_probe(5),
                                "livenessProbe": daemon_probe(10),
                            },
                        ],
                    },
                },
            },
        })
    }

    /// Renders a broadcast or cancel Job manifest.
    #[must_use]
    pub fn render_broadcast(&self, job: &BroadcastJob) -> Value {
        let name = job.name();
        let labels = BTreeMap::from([
            (LABEL_JOB_KIND.to_string(), job.kind.to_string()),
            (LABEL_TEAM_ID.to_string(), job.team_id.to_string()),
        ]);
        let credentials =
            BASE64.encode(format!("{}:{}", job.api_key_id, job.api_key_token).as_bytes());
        let mut env = self.common_env();
        env.extend([
            json!({"name": "CRUCIBLE_ROUTE", "value": job.route}),
            json!({"name": "CRUCIBLE_PAYLOAD", "value": job.payload.to_string()}),
            json!({"name": "CRUCIBLE_DEADLINE_MS", "value": job.deadline.as_unix_millis().to_string()}),
            json!({"name": "CRUCIBLE_TEAM_CREDENTIALS", "value": credentials}),
        ]);

        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": name,
                "namespace": self.config.namespace,
                "labels": labels,
                "annotations": {
                    "crucible.dev/round-id": self.config.round_id,
                    "crucible.dev/team-id": job.team_id.to_string(),
                },
            },
            "spec": {
                "backoffLimit": 3,
                "template": {
                    "metadata": {"labels": labels},
                    "spec": {
                        "restartPolicy": "Never",
                        "affinity": required_affinity(&self.config.broadcast_assignment),
                        "tolerations": base_tolerations(&self.config.broadcast_assignment),
                        "containers": [{
                            "name": "courier",
                            "image": self.config.evaluator_image,
                            "command": ["worker", "deliver"],
                            "env": env,
                            "securityContext": {
                                "runAsNonRoot": true,
                                "allowPrivilegeEscalation": false,
                                "capabilities": {"drop": ["ALL"]},
                            },
                        }],
                    },
                },
            },
        })
    }

    /// Environment shared by every rendered container.
    fn common_env(&self) -> Vec<Value> {
        let mut env = vec![json!({"name": "CRUCIBLE_ROUND_ID", "value": self.config.round_id})];
        for (name, value) in &self.config.otel_env {
            env.push(json!({"name": name, "value": value}));
        }
        env
    }

    /// Affinity for evaluation pods: required pool match plus a soft
    /// preference to co-locate a team's workload.
    fn eval_affinity(&self, team_id: TeamId) -> Value {
        let mut affinity = required_affinity(&self.config.eval_assignment);
        affinity["nodeAffinity"]["preferredDuringSchedulingIgnoredDuringExecution"] = json!([{
            "weight": 50,
            "preference": {
                "matchExpressions": [{
                    "key": TEAM_NODE_LABEL,
                    "operator": "In",
                    "values": [team_id.to_string()],
                }]
            }
        }]);
        affinity
    }

    /// Tolerations for evaluation pods, including the team taint.
    fn eval_tolerations(&self, team_id: TeamId) -> Vec<Value> {
        let mut tolerations = base_tolerations(&self.config.eval_assignment);
        tolerations.push(json!({
            "key": TEAM_NODE_LABEL,
            "operator": "Equal",
            "value": team_id.to_string(),
            "effect": "NoSchedule",
        }));
        tolerations
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Required node-pool affinity for a scheduling class.
fn required_affinity(assignment: &Assignment) -> Value {
    if assignment.node_affinity_label.is_empty() {
        return json!({});
    }
    json!({
        "nodeAffinity": {
            "requiredDuringSchedulingIgnoredDuringExecution": {
                "nodeSelectorTerms": [{
                    "matchExpressions": [{
                        "key": NODE_POOL_LABEL,
                        "operator": "In",
                        "values": [assignment.node_affinity_label],
                    }]
                }]
            }
        }
    })
}

/// Baseline tolerations for a scheduling class.
fn base_tolerations(assignment: &Assignment) -> Vec<Value> {
    if assignment.toleration.is_empty() {
        return Vec::new();
    }
    vec![json!({
        "key": assignment.toleration,
        "operator": "Exists",
        "effect": "NoSchedule",
    })]
}

/// TCP probe against the daemon control port.
fn daemon_probe(period_seconds: u32) -> Value {
    json!({
        "tcpSocket": {"port": 2375},
        "periodSeconds": period_seconds,
        "failureThreshold": 6,
    })
}
