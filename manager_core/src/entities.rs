use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Static per-host configuration. Never mutated at runtime; only the
/// circuit breaker's failure state (tracked separately, see [`crate::docker`])
/// is ephemeral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
  pub host_id: String,
  pub hostname: String,
  #[serde(default)]
  pub is_local: bool,
  #[serde(default)]
  pub docker_host: Option<String>,
  #[serde(default)]
  pub tls_ca: Option<String>,
  #[serde(default)]
  pub tls_cert: Option<String>,
  #[serde(default)]
  pub tls_key: Option<String>,
}

/// The composite identity of a registry entry. `occurrence_id` disambiguates
/// a second copy of the same logical agent (e.g. for database isolation);
/// most agents have none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentKey {
  pub agent_id: String,
  #[serde(default)]
  pub occurrence_id: Option<String>,
  pub host_id: String,
}

impl AgentKey {
  pub fn new(agent_id: impl Into<String>, host_id: impl Into<String>) -> Self {
    AgentKey {
      agent_id: agent_id.into(),
      occurrence_id: None,
      host_id: host_id.into(),
    }
  }

  /// Canonical on-disk string form: `agent_id[-occurrence_id]-host_id`.
  pub fn canonical(&self) -> String {
    match &self.occurrence_id {
      Some(occurrence_id) => {
        format!("{}-{}-{}", self.agent_id, occurrence_id, self.host_id)
      }
      None => format!("{}-{}", self.agent_id, self.host_id),
    }
  }

  /// Parses a legacy single-part key (no occurrence, no host suffix — the
  /// format written before multi-host support existed). Agent IDs may
  /// themselves contain dashes, so a bare key with no separators is treated
  /// as the whole agent_id with an empty host_id, to be resolved by the
  /// caller against the single configured host.
  pub fn from_legacy(key: &str, default_host_id: &str) -> Self {
    AgentKey {
      agent_id: key.to_string(),
      occurrence_id: None,
      host_id: default_host_id.to_string(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCounters {
  pub total: u32,
  pub updated: u32,
  pub deferred: u32,
  pub failed: u32,
  pub pending: u32,
}

/// A single entry in an agent's version history: an image that was current
/// at some point, and which deployment put it there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
  pub image: String,
  pub digest: Option<String>,
  pub deployment_id: String,
  pub timestamp_ms: i64,
}

/// The N / N-1 / N-2 image slots retained per agent for rollback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionSlots {
  pub current: Option<VersionEntry>,
  pub n1: Option<VersionEntry>,
  pub n2: Option<VersionEntry>,
}

impl VersionSlots {
  /// Rotates `current` into `n1` and `n1` into `n2`, then installs `new` as
  /// `current`. A single in-memory mutation — the registry persists the
  /// whole record atomically, so readers never observe a partial rotation.
  pub fn rotate_in(&mut self, new: VersionEntry) {
    self.n2 = self.n1.take();
    self.n1 = self.current.take();
    self.current = Some(new);
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
  pub key: AgentKey,
  pub name: String,
  pub template: String,
  pub port: u16,
  pub compose_path: String,
  /// AEAD ciphertext, base64, never the plaintext token.
  pub encrypted_service_token: String,
  pub encrypted_admin_password: String,
  #[serde(default)]
  pub deployment_group: Option<String>,
  #[serde(default)]
  pub do_not_autostart: bool,
  #[serde(default)]
  pub metadata: IndexMap<String, String>,
  #[serde(default)]
  pub versions: VersionSlots,
  #[serde(default)]
  pub version_history: Vec<VersionEntry>,
  pub created_at_ms: i64,
}

/// On-disk registry document: `{version, agents: {key -> AgentRecord}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryDocument {
  pub version: u32,
  pub agents: IndexMap<String, AgentRecord>,
}

impl Default for RegistryDocument {
  fn default() -> Self {
    RegistryDocument {
      version: 1,
      agents: IndexMap::new(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStrategy {
  Immediate,
  Canary,
  Manual,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateNotification {
  #[serde(default)]
  pub agent_image: Option<String>,
  #[serde(default)]
  pub gui_image: Option<String>,
  #[serde(default)]
  pub proxy_image: Option<String>,
  pub strategy: Option<DeploymentStrategy>,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub source: String,
  #[serde(default)]
  pub commit_sha: Option<String>,
  #[serde(default)]
  pub version: Option<String>,
  #[serde(default)]
  pub metadata: IndexMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
  Staged,
  Pending,
  InProgress,
  Completed,
  Failed,
  Cancelled,
  RolledBack,
  RollbackFailed,
}

impl DeploymentState {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      DeploymentState::Completed
        | DeploymentState::Failed
        | DeploymentState::Cancelled
        | DeploymentState::RolledBack
        | DeploymentState::RollbackFailed
    )
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackTargets {
  pub agents: Vec<String>,
  #[serde(default)]
  pub gui: bool,
  #[serde(default)]
  pub proxy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackProposal {
  pub deployment_id: String,
  pub reason: String,
  pub rollback_targets: RollbackTargets,
  pub previous_versions: IndexMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
  pub deployment_id: String,
  pub notification: UpdateNotification,
  pub state: DeploymentState,
  pub counters: VersionCounters,
  pub affected_agents: Vec<AgentKey>,
  /// Digest resolved once at stage time per affected agent; reused through
  /// launch/retry so a floating tag cannot drift mid-rollout.
  pub resolved_digests: IndexMap<String, String>,
  pub rollback_proposal: Option<RollbackProposal>,
  pub staged_at_ms: i64,
  pub started_at_ms: Option<i64>,
  pub updated_at_ms: i64,
  pub completed_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CognitiveState {
  Boot,
  Wakeup,
  Work,
  Play,
  Shutdown,
  #[serde(other)]
  Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
  pub cognitive_state: CognitiveState,
  pub version: Option<String>,
  pub codename: Option<String>,
  pub code_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateDecision {
  Accept,
  Defer,
  Reject,
}
