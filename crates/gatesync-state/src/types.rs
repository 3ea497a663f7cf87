//! Domain types for the deployment store.
//!
//! `Deployment` and `Bundle` are the persisted records. `ReadyDeployment` is
//! the joined, client-facing view served by the long-poll API.

use serde::{Deserialize, Serialize};

/// Control-plane assigned deployment identifier.
pub type DeploymentId = String;

// ── Status ────────────────────────────────────────────────────────

/// Node-local lifecycle of a deployment (and, mirrored, of its bundles).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    /// Known to the node, bundles not yet verified.
    #[default]
    Unknown,
    /// Every bundle verified and cached; servable to clients.
    Ready,
    /// An agent reported a successful deployment.
    Success,
    /// Verification failed or an agent reported a failed deployment.
    Fail,
}

impl DeploymentStatus {
    /// Whether this status is an outcome that gets reported upstream.
    pub fn is_outcome(self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }
}

// ── Deployment ────────────────────────────────────────────────────

/// One unit of "what this node should be running".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub scope_id: String,
    /// Raw `bundle_config_json` text; its schema belongs to the control plane.
    pub bundle_config: String,
    /// Raw deployment-level `config_json` text, if any.
    pub config: Option<String>,
    pub status: DeploymentStatus,
    /// Unix timestamp (seconds) assigned upstream.
    pub created_at: u64,
    /// Unix timestamp (seconds) assigned upstream.
    pub updated_at: u64,
    /// Set only while `status` is `Fail`.
    pub error_code: Option<i64>,
    /// Set only while `status` is `Fail`.
    pub error_message: Option<String>,
    /// Whether the current outcome has been acknowledged upstream.
    pub status_reported: bool,
}

impl Deployment {
    /// A deployment as it arrives from upstream, before any node-local state.
    pub fn new(id: impl Into<String>, scope_id: impl Into<String>, bundle_config: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scope_id: scope_id.into(),
            bundle_config: bundle_config.into(),
            config: None,
            status: DeploymentStatus::Unknown,
            created_at: 0,
            updated_at: 0,
            error_code: None,
            error_message: None,
            status_reported: false,
        }
    }

    /// Whether the upstream-owned fields of `self` and `other` are equal.
    pub(crate) fn same_upstream_fields(&self, other: &Deployment) -> bool {
        self.id == other.id
            && self.scope_id == other.scope_id
            && self.bundle_config == other.bundle_config
            && self.config == other.config
            && self.created_at == other.created_at
            && self.updated_at == other.updated_at
    }

    /// Reset node-local state to what a freshly synced deployment carries.
    pub(crate) fn reset_local_state(&mut self) {
        self.status = DeploymentStatus::Unknown;
        self.error_code = None;
        self.error_message = None;
        self.status_reported = false;
    }

    /// Copy node-local state over from a previously stored record.
    pub(crate) fn carry_local_state(&mut self, prev: &Deployment) {
        self.status = prev.status;
        self.error_code = prev.error_code;
        self.error_message = prev.error_message.clone();
        self.status_reported = prev.status_reported;
    }

    /// The part of the current state that is reported upstream.
    pub fn outcome(&self) -> Outcome {
        Outcome {
            status: self.status,
            error_code: self.error_code,
            error_message: self.error_message.clone(),
        }
    }
}

/// A deployment outcome as delivered upstream. Acknowledgements only apply
/// while the stored outcome is still equal to the delivered one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: DeploymentStatus,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
}

// ── Bundle ────────────────────────────────────────────────────────

/// A deployable artifact owned by a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bundle {
    pub id: String,
    pub deployment_id: DeploymentId,
    pub name: Option<String>,
    /// Source location (http(s):// or file://).
    pub uri: String,
    /// `file://` location of the verified bytes; `None` until verified.
    pub local_uri: Option<String>,
    /// Checksum algorithm name as given upstream, e.g. `crc-32`.
    pub checksum_type: String,
    /// Expected digest, hex encoded.
    pub checksum: String,
    pub status: DeploymentStatus,
    pub error_code: Option<i64>,
    pub error_reason: Option<String>,
}

impl Bundle {
    /// A bundle as it arrives from upstream, not yet verified.
    pub fn new(
        deployment_id: impl Into<String>,
        id: impl Into<String>,
        uri: impl Into<String>,
        checksum_type: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            deployment_id: deployment_id.into(),
            name: None,
            uri: uri.into(),
            local_uri: None,
            checksum_type: checksum_type.into(),
            checksum: checksum.into(),
            status: DeploymentStatus::Unknown,
            error_code: None,
            error_reason: None,
        }
    }

    /// Build the composite key for the bundles table.
    pub fn table_key(&self) -> String {
        crate::tables::bundle_key(&self.deployment_id, &self.id)
    }

    /// Whether the bundle's bytes have passed verification.
    pub fn is_verified(&self) -> bool {
        self.local_uri.is_some()
    }

    /// Whether `other` describes the same artifact (ignores node-local state).
    pub fn same_content(&self, other: &Bundle) -> bool {
        self.id == other.id
            && self.deployment_id == other.deployment_id
            && self.name == other.name
            && self.uri == other.uri
            && self.checksum_type == other.checksum_type
            && self.checksum == other.checksum
    }

    pub(crate) fn reset_local_state(&mut self) {
        self.local_uri = None;
        self.status = DeploymentStatus::Unknown;
        self.error_code = None;
        self.error_reason = None;
    }
}

// ── Mutations ─────────────────────────────────────────────────────

/// Result of upserting a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Nothing upstream-visible changed; no write happened.
    Unchanged,
}

/// Per-bundle error detail attached to a status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleError {
    pub bundle_id: String,
    pub error_code: i64,
    pub reason: String,
}

/// An outcome to record against a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: DeploymentStatus,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
    pub bundle_errors: Vec<BundleError>,
}

impl StatusUpdate {
    pub fn success() -> Self {
        Self {
            status: DeploymentStatus::Success,
            error_code: None,
            error_message: None,
            bundle_errors: Vec::new(),
        }
    }

    pub fn fail(error_code: i64, message: impl Into<String>) -> Self {
        Self {
            status: DeploymentStatus::Fail,
            error_code: Some(error_code),
            error_message: Some(message.into()),
            bundle_errors: Vec::new(),
        }
    }
}

// ── Client view ───────────────────────────────────────────────────

/// A ready deployment joined with its bundles, as served to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadyDeployment {
    pub id: DeploymentId,
    pub scope_id: String,
    pub status: DeploymentStatus,
    pub created_at: u64,
    pub updated_at: u64,
    /// `bundle_config` embedded as JSON (a string if it does not parse).
    pub bundle_config: serde_json::Value,
    pub config: Option<serde_json::Value>,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
    pub bundles: Vec<ReadyBundle>,
}

/// Client-facing bundle entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadyBundle {
    pub id: String,
    pub name: Option<String>,
    pub uri: String,
    pub local_uri: String,
    pub checksum_type: String,
    pub checksum: String,
    pub status: DeploymentStatus,
}

impl ReadyDeployment {
    /// Join a deployment with its bundles. Returns `None` unless every
    /// bundle is verified (and there is at least one).
    pub fn from_parts(deployment: &Deployment, bundles: &[Bundle]) -> Option<Self> {
        if bundles.is_empty() {
            return None;
        }
        let ready_bundles = bundles
            .iter()
            .map(|b| {
                b.local_uri.as_ref().map(|local_uri| ReadyBundle {
                    id: b.id.clone(),
                    name: b.name.clone(),
                    uri: b.uri.clone(),
                    local_uri: local_uri.clone(),
                    checksum_type: b.checksum_type.clone(),
                    checksum: b.checksum.clone(),
                    status: b.status,
                })
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            id: deployment.id.clone(),
            scope_id: deployment.scope_id.clone(),
            status: deployment.status,
            created_at: deployment.created_at,
            updated_at: deployment.updated_at,
            bundle_config: embed_json(&deployment.bundle_config),
            config: deployment.config.as_deref().map(embed_json),
            error_code: deployment.error_code,
            error_message: deployment.error_message.clone(),
            bundles: ready_bundles,
        })
    }
}

fn embed_json(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
