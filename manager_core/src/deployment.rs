//! Deployment Orchestrator (C8). Stages an [`UpdateNotification`], then
//! drives it through `staged -> pending -> in_progress -> terminal` via the
//! per-agent update protocol and (for canary rollouts) a health gate between
//! phases. At most one non-terminal deployment exists at a time.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::Mutex;

use crate::agent_client::AgentClient;
use crate::config::ManagerConfig;
use crate::docker::DockerFacade;
use crate::entities::{
  AgentKey, CognitiveState, Deployment, DeploymentState, DeploymentStrategy,
  RollbackProposal, RollbackTargets, UpdateDecision, UpdateNotification,
  VersionCounters, VersionEntry,
};
use crate::error::{Error, Result};
use crate::lifecycle::LifecycleCoordinator;
use crate::registry::Registry;
use crate::retention::ImageRetention;

/// Resolves a floating image tag to an immutable reference, captured once at
/// stage time and reused for the deployment's lifetime (§9, floating-tag
/// resolution) so a tag that moves mid-rollout cannot desync agents. Modeled
/// as a narrow trait, same reasoning as [`AgentClient`]: a fake keeps tests
/// off a real registry/daemon.
#[async_trait]
pub trait DigestResolver: Send + Sync {
  async fn resolve_digest(&self, host_id: &str, image: &str) -> Result<String>;
}

/// Uses the host's locally cached image list as the source of truth. Bollard
/// doesn't expose a registry-manifest digest through the facade's existing
/// surface, so the image ID (itself a stable content hash Docker assigns
/// locally) stands in for it here.
pub struct DockerDigestResolver {
  facade: Arc<DockerFacade>,
}

impl DockerDigestResolver {
  pub fn new(facade: Arc<DockerFacade>) -> Self {
    DockerDigestResolver { facade }
  }
}

#[async_trait]
impl DigestResolver for DockerDigestResolver {
  async fn resolve_digest(&self, host_id: &str, image: &str) -> Result<String> {
    let images = self.facade.list_images(host_id).await?;
    images
      .into_iter()
      .find(|summary| summary.repo_tags.iter().any(|tag| tag == image))
      .map(|summary| summary.id)
      .ok_or_else(|| {
        Error::Validation(format!("image {image} not found on host {host_id}"))
      })
  }
}

/// Single-writer JSON document at `{agents_dir}/deployments.json`, the same
/// write-temp-then-rename discipline as [`Registry`].
pub struct DeploymentStore {
  path: PathBuf,
  document: Mutex<IndexMap<String, Deployment>>,
}

impl DeploymentStore {
  pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
    let path = path.into();
    let document = if path.is_file() {
      let contents = tokio::fs::read_to_string(&path).await?;
      serde_json::from_str(&contents)
        .map_err(|e| Error::RegistryCorruption(e.to_string()))?
    } else {
      IndexMap::new()
    };
    Ok(DeploymentStore {
      path,
      document: Mutex::new(document),
    })
  }

  async fn persist(&self, document: &IndexMap<String, Deployment>) -> Result<()> {
    let serialized = serde_json::to_string_pretty(document)?;
    let parent = self
      .path
      .parent()
      .ok_or_else(|| Error::Validation("deployment store path has no parent".into()))?;
    tokio::fs::create_dir_all(parent).await?;
    let tmp_path = parent.join(format!(
      ".{}.tmp",
      self
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("deployments.json")
    ));
    tokio::fs::write(&tmp_path, serialized).await?;
    tokio::fs::rename(&tmp_path, &self.path).await?;
    Ok(())
  }

  pub async fn insert(&self, deployment: Deployment) -> Result<()> {
    let mut document = self.document.lock().await;
    document.insert(deployment.deployment_id.clone(), deployment);
    self.persist(&document).await
  }

  pub async fn get(&self, deployment_id: &str) -> Option<Deployment> {
    self.document.lock().await.get(deployment_id).cloned()
  }

  pub async fn list(&self) -> Vec<Deployment> {
    self.document.lock().await.values().cloned().collect()
  }

  pub async fn has_active(&self) -> bool {
    self
      .document
      .lock()
      .await
      .values()
      .any(|d| !d.state.is_terminal())
  }

  pub async fn update(
    &self,
    deployment_id: &str,
    updater: impl FnOnce(&mut Deployment),
  ) -> Result<()> {
    let mut document = self.document.lock().await;
    let deployment = document
      .get_mut(deployment_id)
      .ok_or_else(|| Error::NotFound(deployment_id.to_string()))?;
    updater(deployment);
    self.persist(&document).await
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentOutcome {
  Updated,
  Deferred,
  Failed,
  Skipped,
}

enum HealthGateOutcome {
  Passed,
  Failed(RollbackProposal),
}

pub struct DeploymentOrchestrator {
  config: Arc<ManagerConfig>,
  registry: Arc<Registry>,
  lifecycle: Arc<LifecycleCoordinator>,
  agent_client: Arc<dyn AgentClient>,
  digest_resolver: Arc<dyn DigestResolver>,
  retention: Arc<ImageRetention>,
  store: DeploymentStore,
  health_poll_interval: Duration,
}

impl DeploymentOrchestrator {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    config: Arc<ManagerConfig>,
    registry: Arc<Registry>,
    lifecycle: Arc<LifecycleCoordinator>,
    agent_client: Arc<dyn AgentClient>,
    digest_resolver: Arc<dyn DigestResolver>,
    retention: Arc<ImageRetention>,
    store: DeploymentStore,
    health_poll_interval: Duration,
  ) -> Self {
    DeploymentOrchestrator {
      config,
      registry,
      lifecycle,
      agent_client,
      digest_resolver,
      retention,
      store,
      health_poll_interval,
    }
  }

  pub async fn status(&self, deployment_id: &str) -> Option<Deployment> {
    self.store.get(deployment_id).await
  }

  pub async fn list(&self) -> Vec<Deployment> {
    self.store.list().await
  }

  pub async fn pending(&self) -> Vec<Deployment> {
    self
      .store
      .list()
      .await
      .into_iter()
      .filter(|d| !d.state.is_terminal())
      .collect()
  }

  /// §4.8 staging: resolves affected agents and their target digests, but
  /// never starts the rollout — every strategy (including `immediate`)
  /// requires an explicit [`Self::launch`].
  pub async fn stage(&self, notification: UpdateNotification) -> Result<Deployment> {
    if self.store.has_active().await {
      return Err(Error::Validation(
        "a deployment is already active".into(),
      ));
    }

    let agents = if notification.agent_image.is_some() {
      self.registry.list().await
    } else {
      Vec::new()
    };

    let mut resolved_digests = IndexMap::new();
    if let Some(image) = &notification.agent_image {
      for record in &agents {
        let digest = match self
          .digest_resolver
          .resolve_digest(&record.key.host_id, image)
          .await
        {
          Ok(digest) => digest,
          Err(e) => {
            tracing::warn!(
              "digest resolution failed for {}: {e:#}",
              record.key.canonical()
            );
            String::new()
          }
        };
        resolved_digests.insert(record.key.canonical(), digest);
      }
    }

    let deployment_id = uuid::Uuid::new_v4().to_string();
    let now = command::unix_timestamp_ms();
    let deployment = Deployment {
      deployment_id,
      affected_agents: agents.iter().map(|r| r.key.clone()).collect(),
      counters: VersionCounters {
        total: agents.len() as u32,
        ..Default::default()
      },
      notification,
      state: DeploymentState::Staged,
      resolved_digests,
      rollback_proposal: None,
      staged_at_ms: now,
      started_at_ms: None,
      updated_at_ms: now,
      completed_at_ms: None,
    };
    self.store.insert(deployment.clone()).await?;
    Ok(deployment)
  }

  /// Moves a staged/pending deployment to `in_progress` and spawns the
  /// background task that drives it to completion. Returns once the
  /// transition is persisted; does not wait for the rollout itself.
  pub async fn launch(self: &Arc<Self>, deployment_id: &str) -> Result<()> {
    let deployment = self
      .store
      .get(deployment_id)
      .await
      .ok_or_else(|| Error::NotFound(deployment_id.to_string()))?;
    if !matches!(
      deployment.state,
      DeploymentState::Staged | DeploymentState::Pending
    ) {
      return Err(Error::Validation(format!(
        "deployment {deployment_id} cannot be launched from state {:?}",
        deployment.state
      )));
    }

    self
      .store
      .update(deployment_id, |d| {
        d.state = DeploymentState::Pending;
        d.updated_at_ms = command::unix_timestamp_ms();
      })
      .await?;

    let this = self.clone();
    let id = deployment_id.to_string();
    tokio::spawn(async move { this.run(id).await });
    Ok(())
  }

  pub async fn cancel(&self, deployment_id: &str, reason: &str) -> Result<()> {
    let deployment = self
      .store
      .get(deployment_id)
      .await
      .ok_or_else(|| Error::NotFound(deployment_id.to_string()))?;
    if deployment.state.is_terminal() {
      return Err(Error::Validation(format!(
        "deployment {deployment_id} is already terminal"
      )));
    }
    let now = command::unix_timestamp_ms();
    let reason = reason.to_string();
    self
      .store
      .update(deployment_id, move |d| {
        d.state = DeploymentState::Cancelled;
        d.notification.message = format!("cancelled: {reason}");
        d.updated_at_ms = now;
        d.completed_at_ms = Some(now);
      })
      .await
  }

  /// Only valid before a rollout has actually started applying changes.
  pub async fn reject(&self, deployment_id: &str, reason: &str) -> Result<()> {
    let deployment = self
      .store
      .get(deployment_id)
      .await
      .ok_or_else(|| Error::NotFound(deployment_id.to_string()))?;
    if !matches!(
      deployment.state,
      DeploymentState::Staged | DeploymentState::Pending
    ) {
      return Err(Error::Validation(format!(
        "deployment {deployment_id} can only be rejected while staged or pending"
      )));
    }
    let now = command::unix_timestamp_ms();
    let reason = reason.to_string();
    self
      .store
      .update(deployment_id, move |d| {
        d.state = DeploymentState::Cancelled;
        d.notification.message = format!("rejected: {reason}");
        d.updated_at_ms = now;
        d.completed_at_ms = Some(now);
      })
      .await
  }

  /// Stages a fresh deployment from a terminal one's notification, reusing
  /// its already-resolved digests rather than re-resolving a floating tag.
  pub async fn retry(&self, deployment_id: &str) -> Result<Deployment> {
    let previous = self
      .store
      .get(deployment_id)
      .await
      .ok_or_else(|| Error::NotFound(deployment_id.to_string()))?;
    if !previous.state.is_terminal() {
      return Err(Error::Validation(
        "only a terminal deployment can be retried".into(),
      ));
    }
    if self.store.has_active().await {
      return Err(Error::Validation(
        "a deployment is already active".into(),
      ));
    }

    let now = command::unix_timestamp_ms();
    let deployment = Deployment {
      deployment_id: uuid::Uuid::new_v4().to_string(),
      notification: previous.notification.clone(),
      state: DeploymentState::Staged,
      counters: VersionCounters {
        total: previous.counters.total,
        ..Default::default()
      },
      affected_agents: previous.affected_agents.clone(),
      resolved_digests: previous.resolved_digests.clone(),
      rollback_proposal: None,
      staged_at_ms: now,
      started_at_ms: None,
      updated_at_ms: now,
      completed_at_ms: None,
    };
    self.store.insert(deployment.clone()).await?;
    Ok(deployment)
  }

  /// §4.8 rollback execution, given an operator confirmation of an
  /// already-surfaced [`RollbackProposal`].
  pub async fn confirm_rollback(&self, deployment_id: &str) -> Result<()> {
    let deployment = self
      .store
      .get(deployment_id)
      .await
      .ok_or_else(|| Error::NotFound(deployment_id.to_string()))?;
    let Some(proposal) = deployment.rollback_proposal.clone() else {
      return Err(Error::Validation(format!(
        "deployment {deployment_id} has no rollback proposal"
      )));
    };

    let mut any_failed = false;
    for agent_id in &proposal.rollback_targets.agents {
      for record in self.registry.list_by_agent_id(agent_id).await {
        let target = record.versions.n1.clone().or_else(|| record.versions.n2.clone());
        let Some(target) = target else {
          tracing::warn!("no rollback image available for {}", record.key.canonical());
          any_failed = true;
          continue;
        };
        if let Err(e) = self.lifecycle.update_image(&record.key, &target.image).await {
          tracing::warn!("rollback launch failed for {}: {e:#}", record.key.canonical());
          any_failed = true;
          continue;
        }
        let entry = VersionEntry {
          image: target.image.clone(),
          digest: target.digest.clone(),
          deployment_id: deployment_id.to_string(),
          timestamp_ms: command::unix_timestamp_ms(),
        };
        let _ = self
          .registry
          .update_metadata(&record.key, move |r| r.version_history.push(entry))
          .await;
      }
    }

    let now = command::unix_timestamp_ms();
    self
      .store
      .update(deployment_id, move |d| {
        d.state = if any_failed {
          DeploymentState::RollbackFailed
        } else {
          DeploymentState::RolledBack
        };
        d.updated_at_ms = now;
        d.completed_at_ms = Some(now);
      })
      .await
  }

  async fn is_cancelled(&self, deployment_id: &str) -> bool {
    matches!(
      self.store.get(deployment_id).await.map(|d| d.state),
      Some(DeploymentState::Cancelled)
    )
  }

  async fn run(self: Arc<Self>, deployment_id: String) {
    let now = command::unix_timestamp_ms();
    if self
      .store
      .update(&deployment_id, |d| {
        d.state = DeploymentState::InProgress;
        d.started_at_ms = Some(now);
        d.updated_at_ms = now;
      })
      .await
      .is_err()
    {
      return;
    }

    let Some(deployment) = self.store.get(&deployment_id).await else {
      return;
    };
    let is_canary = matches!(
      deployment.notification.strategy,
      Some(DeploymentStrategy::Canary)
    );
    let phases = self.build_phases(&deployment).await;
    let last_idx = phases.len().saturating_sub(1);

    for (idx, phase_agents) in phases.into_iter().enumerate() {
      if phase_agents.is_empty() {
        continue;
      }
      if self.is_cancelled(&deployment_id).await {
        return;
      }

      let accepted = self.apply_phase(&deployment_id, &phase_agents).await;

      if self.is_cancelled(&deployment_id).await {
        return;
      }

      if is_canary && idx != last_idx {
        match self.health_gate(&deployment_id, &phase_agents, &accepted).await {
          HealthGateOutcome::Passed => continue,
          HealthGateOutcome::Failed(proposal) => {
            let now = command::unix_timestamp_ms();
            let _ = self
              .store
              .update(&deployment_id, move |d| {
                d.state = DeploymentState::Failed;
                d.rollback_proposal = Some(proposal);
                d.updated_at_ms = now;
              })
              .await;
            return;
          }
        }
      }
    }

    let _ = self
      .store
      .update(&deployment_id, |d| {
        if !d.state.is_terminal() {
          let now = command::unix_timestamp_ms();
          d.state = DeploymentState::Completed;
          d.updated_at_ms = now;
          d.completed_at_ms = Some(now);
        }
      })
      .await;
  }

  /// `immediate` and `manual` run as a single phase; `canary` groups by each
  /// agent's current `deployment_group`, unassigned agents defaulting to
  /// `general`, in fixed order explorers -> early_adopters -> general.
  async fn build_phases(&self, deployment: &Deployment) -> Vec<Vec<AgentKey>> {
    if !matches!(deployment.notification.strategy, Some(DeploymentStrategy::Canary)) {
      return vec![deployment.affected_agents.clone()];
    }
    let mut tagged = Vec::with_capacity(deployment.affected_agents.len());
    for key in &deployment.affected_agents {
      let group = self
        .registry
        .lookup(key)
        .await
        .and_then(|r| r.deployment_group);
      tagged.push((key.clone(), group));
    }
    group_into_phases(&tagged)
  }

  async fn apply_phase(
    &self,
    deployment_id: &str,
    phase_agents: &[AgentKey],
  ) -> HashSet<String> {
    let outcomes = futures_util::future::join_all(
      phase_agents.iter().map(|key| self.apply_agent(deployment_id, key)),
    )
    .await;
    phase_agents
      .iter()
      .zip(outcomes)
      .filter_map(|(key, outcome)| {
        (outcome == AgentOutcome::Updated).then(|| key.canonical())
      })
      .collect()
  }

  /// §4.8 per-agent update protocol: negotiate, then (on accept) swap the
  /// container and rotate version slots.
  async fn apply_agent(&self, deployment_id: &str, key: &AgentKey) -> AgentOutcome {
    if self.is_cancelled(deployment_id).await {
      return AgentOutcome::Skipped;
    }
    let Some(deployment) = self.store.get(deployment_id).await else {
      return AgentOutcome::Skipped;
    };
    let Some(image) = deployment.notification.agent_image.clone() else {
      return AgentOutcome::Skipped;
    };
    let Some(record) = self.registry.lookup(key).await else {
      return AgentOutcome::Skipped;
    };
    let Some(host) = self.config.servers.iter().find(|h| h.host_id == key.host_id) else {
      return AgentOutcome::Skipped;
    };
    let digest = deployment
      .resolved_digests
      .get(&key.canonical())
      .cloned()
      .unwrap_or_default();
    let base_url = format!("http://{}:{}", host.hostname, record.port);

    let decision = match self
      .agent_client
      .request_update(&base_url, &image, &digest, deployment_id)
      .await
    {
      Ok(response) => response.decision,
      Err(e) => {
        tracing::warn!("update request to {} failed: {e}", key.canonical());
        self.bump_counter(deployment_id, |c| c.failed += 1).await;
        return AgentOutcome::Failed;
      }
    };

    match decision {
      UpdateDecision::Defer => {
        self.bump_counter(deployment_id, |c| c.deferred += 1).await;
        AgentOutcome::Deferred
      }
      UpdateDecision::Reject => {
        self.bump_counter(deployment_id, |c| c.failed += 1).await;
        AgentOutcome::Failed
      }
      UpdateDecision::Accept => {
        if let Err(e) = self.lifecycle.update_image(key, &image).await {
          tracing::warn!("container swap failed for {}: {e:#}", key.canonical());
          self.bump_counter(deployment_id, |c| c.failed += 1).await;
          return AgentOutcome::Failed;
        }
        let entry = VersionEntry {
          image: image.clone(),
          digest: Some(digest),
          deployment_id: deployment_id.to_string(),
          timestamp_ms: command::unix_timestamp_ms(),
        };
        let _ = self
          .registry
          .update_metadata(key, move |r| {
            r.versions.rotate_in(entry.clone());
            r.version_history.push(entry);
          })
          .await;
        self.bump_counter(deployment_id, |c| c.updated += 1).await;

        let retention = self.retention.clone();
        tokio::spawn(async move { retention.sweep().await });

        AgentOutcome::Updated
      }
    }
  }

  async fn bump_counter(&self, deployment_id: &str, f: impl FnOnce(&mut VersionCounters)) {
    let now = command::unix_timestamp_ms();
    let _ = self
      .store
      .update(deployment_id, move |d| {
        f(&mut d.counters);
        d.updated_at_ms = now;
      })
      .await;
  }

  /// §4.8 health gate. Only polls agents that actually completed a
  /// container swap this phase (`accepted`) — a phase where every agent
  /// deferred has nothing to gate and passes trivially, matching "deferrals
  /// alone never produce a rollback proposal".
  async fn health_gate(
    &self,
    deployment_id: &str,
    phase_agents: &[AgentKey],
    accepted: &HashSet<String>,
  ) -> HealthGateOutcome {
    let targets: Vec<&AgentKey> = phase_agents
      .iter()
      .filter(|k| accepted.contains(&k.canonical()))
      .collect();
    if targets.is_empty() {
      return HealthGateOutcome::Passed;
    }

    let stability = Duration::from_secs_f64(self.config.canary.stability_minutes.max(0.0) * 60.0);
    let budget = Duration::from_secs_f64(self.config.canary.wait_for_work_minutes.max(0.0) * 60.0);
    let deadline = Instant::now() + budget;

    let mut first_work_at: HashMap<String, Instant> = HashMap::new();
    let mut ever_worked: HashSet<String> = HashSet::new();

    loop {
      if self.is_cancelled(deployment_id).await {
        return HealthGateOutcome::Passed;
      }

      let mut all_stable = true;
      for key in &targets {
        let canonical = key.canonical();
        let stable = self
          .poll_one(key, &canonical, &mut first_work_at, &mut ever_worked, stability)
          .await;
        if !stable {
          all_stable = false;
        }
      }

      if all_stable {
        return HealthGateOutcome::Passed;
      }
      if Instant::now() >= deadline {
        break;
      }
      tokio::time::sleep(self.health_poll_interval).await;
    }

    if ever_worked.is_empty() {
      let mut previous_versions = IndexMap::new();
      for key in &targets {
        if let Some(record) = self.registry.lookup(key).await {
          if let Some(n1) = &record.versions.n1 {
            previous_versions.insert(key.agent_id.clone(), n1.image.clone());
          }
        }
      }
      HealthGateOutcome::Failed(RollbackProposal {
        deployment_id: deployment_id.to_string(),
        reason: format!(
          "no agent in this phase reached WORK within {} minute(s)",
          self.config.canary.wait_for_work_minutes
        ),
        rollback_targets: RollbackTargets {
          agents: targets.iter().map(|k| k.agent_id.clone()).collect(),
          gui: false,
          proxy: false,
        },
        previous_versions,
      })
    } else {
      HealthGateOutcome::Passed
    }
  }

  async fn poll_one(
    &self,
    key: &AgentKey,
    canonical: &str,
    first_work_at: &mut HashMap<String, Instant>,
    ever_worked: &mut HashSet<String>,
    stability: Duration,
  ) -> bool {
    let Some(record) = self.registry.lookup(key).await else {
      return false;
    };
    let Some(host) = self.config.servers.iter().find(|h| h.host_id == key.host_id) else {
      return false;
    };
    let base_url = format!("http://{}:{}", host.hostname, record.port);
    match self.agent_client.status(&base_url).await {
      Ok(status) if status.cognitive_state == CognitiveState::Work => {
        ever_worked.insert(canonical.to_string());
        let started = *first_work_at
          .entry(canonical.to_string())
          .or_insert_with(Instant::now);
        started.elapsed() >= stability
      }
      _ => {
        first_work_at.remove(canonical);
        false
      }
    }
  }
}

/// Pure grouping logic, factored out of [`DeploymentOrchestrator::build_phases`]
/// so canary phase assignment is testable without a registry.
fn group_into_phases(tagged: &[(AgentKey, Option<String>)]) -> Vec<Vec<AgentKey>> {
  let mut explorers = Vec::new();
  let mut early_adopters = Vec::new();
  let mut general = Vec::new();
  for (key, group) in tagged {
    match group.as_deref() {
      Some("explorers") => explorers.push(key.clone()),
      Some("early_adopters") => early_adopters.push(key.clone()),
      _ => general.push(key.clone()),
    }
  }
  vec![explorers, early_adopters, general]
}

#[cfg(test)]
pub mod fake {
  use super::*;
  use std::collections::HashMap as StdHashMap;
  use std::sync::Mutex as StdMutex;

  #[derive(Default)]
  pub struct FakeDigestResolver {
    pub digests: StdMutex<StdHashMap<String, String>>,
  }

  #[async_trait]
  impl DigestResolver for FakeDigestResolver {
    async fn resolve_digest(&self, _host_id: &str, image: &str) -> Result<String> {
      Ok(
        self
          .digests
          .lock()
          .unwrap()
          .get(image)
          .cloned()
          .unwrap_or_else(|| format!("sha256:fake-{image}")),
      )
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agent_client::fake::FakeAgentClient;
  use crate::config::CanaryConfig;
  use crate::crypto;
  use crate::docker::DockerFacade;
  use crate::entities::{HostConfig, VersionSlots};
  use crate::proxy::ProxyReconciler;
  use crate::ports::{PortAllocator, PortAllocatorConfig};

  fn key(agent_id: &str) -> AgentKey {
    AgentKey::new(agent_id, "main")
  }

  fn sample_record(agent_id: &str, port: u16) -> crate::entities::AgentRecord {
    crate::entities::AgentRecord {
      key: key(agent_id),
      name: agent_id.to_string(),
      template: "scout".to_string(),
      port,
      compose_path: String::new(),
      encrypted_service_token: String::new(),
      encrypted_admin_password: String::new(),
      deployment_group: None,
      do_not_autostart: false,
      metadata: IndexMap::new(),
      versions: VersionSlots::default(),
      version_history: Vec::new(),
      created_at_ms: 0,
    }
  }

  /// Builds a real `DeploymentOrchestrator` over a fake [`AgentClient`] and
  /// an empty (hostless) [`DockerFacade`] — suitable for exercising the
  /// negotiate/health-gate logic directly without a live Docker daemon.
  async fn test_orchestrator(
    dir: &std::path::Path,
    agent_client: Arc<FakeAgentClient>,
  ) -> (Arc<DeploymentOrchestrator>, Arc<Registry>) {
    let config = Arc::new(ManagerConfig {
      servers: vec![HostConfig {
        host_id: "main".to_string(),
        hostname: "127.0.0.1".to_string(),
        is_local: true,
        docker_host: None,
        tls_ca: None,
        tls_cert: None,
        tls_key: None,
      }],
      canary: CanaryConfig {
        stability_minutes: 0.0,
        wait_for_work_minutes: 0.0006, // ~36ms, enough for one poll tick
      },
      ..Default::default()
    });
    let registry = Arc::new(Registry::load(dir.join("metadata.json")).await.unwrap());
    let facade = Arc::new(DockerFacade::new(IndexMap::new()));
    let proxy = Arc::new(ProxyReconciler::new(
      facade.clone(),
      "ciris-proxy".to_string(),
      dir.join("nginx"),
      None,
    ));
    let ports = Arc::new(Mutex::new(PortAllocator::new(PortAllocatorConfig::default())));
    let vault = crate::crypto::Vault::from_base64_secret(&crypto::generate_install_secret()).unwrap();
    let agent_client: Arc<dyn AgentClient> = agent_client;
    let lifecycle = Arc::new(LifecycleCoordinator::new(
      config.clone(),
      registry.clone(),
      ports,
      facade.clone(),
      proxy,
      agent_client.clone(),
      vault,
    ));
    let retention = Arc::new(ImageRetention::new(config.clone(), facade.clone()));
    let digest_resolver: Arc<dyn DigestResolver> = Arc::new(fake::FakeDigestResolver::default());
    let store = DeploymentStore::load(dir.join("deployments.json")).await.unwrap();
    let orchestrator = Arc::new(DeploymentOrchestrator::new(
      config,
      registry.clone(),
      lifecycle,
      agent_client,
      digest_resolver,
      retention,
      store,
      Duration::from_millis(5),
    ));
    (orchestrator, registry)
  }

  /// S5: both agents in the phase never report WORK; the health gate must
  /// propose a rollback keyed by this phase's agents, with `previous_versions`
  /// read from each agent's recorded N-1 image.
  #[tokio::test]
  async fn health_gate_proposes_rollback_when_zero_agents_reach_work() {
    let dir = tempfile::tempdir().unwrap();
    let (orchestrator, registry) =
      test_orchestrator(dir.path(), Arc::new(FakeAgentClient::default())).await;

    for (agent_id, port) in [("a", 19101u16), ("b", 19102)] {
      let mut record = sample_record(agent_id, port);
      record.versions.n1 = Some(VersionEntry {
        image: format!("ghcr.io/cirisai/ciris-agent:{agent_id}-prev"),
        digest: None,
        deployment_id: "dep-0".to_string(),
        timestamp_ms: 0,
      });
      registry.register(record).await.unwrap();
    }

    let phase_agents = vec![key("a"), key("b")];
    let accepted: HashSet<String> =
      phase_agents.iter().map(|k| k.canonical()).collect();

    match orchestrator.health_gate("dep-5", &phase_agents, &accepted).await {
      HealthGateOutcome::Failed(proposal) => {
        assert_eq!(proposal.deployment_id, "dep-5");
        let mut agents = proposal.rollback_targets.agents.clone();
        agents.sort();
        assert_eq!(agents, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
          proposal.previous_versions.get("a").cloned(),
          Some("ghcr.io/cirisai/ciris-agent:a-prev".to_string())
        );
      }
      HealthGateOutcome::Passed => panic!("expected a rollback proposal"),
    }
  }

  /// S6: every agent in the phase defers. Deferred agents never enter
  /// `accepted`, so the health gate has nothing to poll and passes trivially
  /// — a deferral alone must never produce a rollback proposal.
  #[tokio::test]
  async fn deferring_phase_passes_health_gate_without_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let fake_client = Arc::new(FakeAgentClient::default());
    {
      let mut decisions = fake_client.decisions.lock().unwrap();
      decisions.insert("http://127.0.0.1:19201".to_string(), UpdateDecision::Defer);
      decisions.insert("http://127.0.0.1:19202".to_string(), UpdateDecision::Defer);
    }
    let (orchestrator, registry) = test_orchestrator(dir.path(), fake_client).await;

    registry.register(sample_record("c", 19201)).await.unwrap();
    registry.register(sample_record("d", 19202)).await.unwrap();

    let deployment = Deployment {
      deployment_id: "dep-6".to_string(),
      notification: UpdateNotification {
        agent_image: Some("ghcr.io/cirisai/ciris-agent:2.0.0".to_string()),
        strategy: Some(DeploymentStrategy::Canary),
        ..Default::default()
      },
      state: DeploymentState::InProgress,
      counters: VersionCounters {
        total: 2,
        ..Default::default()
      },
      affected_agents: vec![key("c"), key("d")],
      resolved_digests: IndexMap::new(),
      rollback_proposal: None,
      staged_at_ms: 0,
      started_at_ms: None,
      updated_at_ms: 0,
      completed_at_ms: None,
    };
    orchestrator.store.insert(deployment).await.unwrap();

    let phase_agents = vec![key("c"), key("d")];
    let accepted = orchestrator.apply_phase("dep-6", &phase_agents).await;
    assert!(accepted.is_empty());

    match orchestrator.health_gate("dep-6", &phase_agents, &accepted).await {
      HealthGateOutcome::Passed => {}
      HealthGateOutcome::Failed(_) => panic!("deferrals alone must never trigger a rollback"),
    }

    let status = orchestrator.status("dep-6").await.unwrap();
    assert_eq!(status.counters.deferred, 2);
    assert_eq!(status.counters.updated, 0);
    assert_eq!(status.counters.failed, 0);
  }

  #[test]
  fn group_into_phases_orders_explorers_before_early_adopters_before_general() {
    let tagged = vec![
      (key("a"), Some("general".to_string())),
      (key("b"), Some("explorers".to_string())),
      (key("c"), Some("early_adopters".to_string())),
      (key("d"), None),
    ];
    let phases = group_into_phases(&tagged);
    assert_eq!(phases[0], vec![key("b")]);
    assert_eq!(phases[1], vec![key("c")]);
    assert_eq!(phases[2], vec![key("a"), key("d")]);
  }

  #[tokio::test]
  async fn deployment_store_round_trips_through_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deployments.json");
    let store = DeploymentStore::load(&path).await.unwrap();
    let deployment = Deployment {
      deployment_id: "dep-1".to_string(),
      notification: UpdateNotification {
        agent_image: Some("ghcr.io/cirisai/ciris-agent:1.0.0".to_string()),
        strategy: Some(DeploymentStrategy::Immediate),
        ..Default::default()
      },
      state: DeploymentState::Staged,
      counters: VersionCounters::default(),
      affected_agents: vec![key("scout")],
      resolved_digests: IndexMap::new(),
      rollback_proposal: None,
      staged_at_ms: 0,
      started_at_ms: None,
      updated_at_ms: 0,
      completed_at_ms: None,
    };
    store.insert(deployment).await.unwrap();

    let reloaded = DeploymentStore::load(&path).await.unwrap();
    let fetched = reloaded.get("dep-1").await.unwrap();
    assert_eq!(fetched.state, DeploymentState::Staged);
    assert!(reloaded.has_active().await);
  }

  #[tokio::test]
  async fn has_active_is_false_once_every_deployment_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let store = DeploymentStore::load(dir.path().join("deployments.json")).await.unwrap();
    store
      .insert(Deployment {
        deployment_id: "dep-1".to_string(),
        notification: UpdateNotification::default(),
        state: DeploymentState::Completed,
        counters: VersionCounters::default(),
        affected_agents: vec![],
        resolved_digests: IndexMap::new(),
        rollback_proposal: None,
        staged_at_ms: 0,
        started_at_ms: None,
        updated_at_ms: 0,
        completed_at_ms: Some(0),
      })
      .await
      .unwrap();
    assert!(!store.has_active().await);
  }
}
