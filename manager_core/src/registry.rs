//! Agent Registry (C4). Single-writer JSON document at
//! `{agents_dir}/metadata.json`; every mutation is persisted
//! (write-temp-then-rename) before the call returns.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tokio::sync::Mutex;

use crate::entities::{AgentKey, AgentRecord, RegistryDocument};
use crate::error::{Error, Result};

pub struct Registry {
  path: PathBuf,
  document: Mutex<RegistryDocument>,
}

impl Registry {
  /// Loads `path` if it exists; an empty document otherwise. A JSON parse
  /// failure is fatal (`RegistryCorruption`) — unlike per-key scan issues
  /// encountered by the manager's directory cross-check (C10), a document
  /// that doesn't parse at all means the file itself cannot be trusted.
  pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
    let path = path.into();
    let document = if path.is_file() {
      let contents = tokio::fs::read_to_string(&path).await?;
      serde_json::from_str(&contents)
        .map_err(|e| Error::RegistryCorruption(e.to_string()))?
    } else {
      RegistryDocument::default()
    };
    Ok(Registry {
      path,
      document: Mutex::new(document),
    })
  }

  async fn persist(&self, document: &RegistryDocument) -> Result<()> {
    let serialized = serde_json::to_string_pretty(document)?;
    let parent = self
      .path
      .parent()
      .ok_or_else(|| Error::Validation("registry path has no parent".into()))?;
    tokio::fs::create_dir_all(parent).await?;
    let tmp_path = parent.join(format!(
      ".{}.tmp",
      self
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("metadata.json")
    ));
    tokio::fs::write(&tmp_path, serialized).await?;
    tokio::fs::rename(&tmp_path, &self.path).await?;
    Ok(())
  }

  pub async fn register(&self, record: AgentRecord) -> Result<()> {
    let mut document = self.document.lock().await;
    let canonical = record.key.canonical();
    if document.agents.contains_key(&canonical) {
      return Err(Error::Validation(format!(
        "agent key {canonical} already registered"
      )));
    }
    document.agents.insert(canonical, record);
    self.persist(&document).await
  }

  pub async fn lookup(&self, key: &AgentKey) -> Option<AgentRecord> {
    let document = self.document.lock().await;
    document.agents.get(&key.canonical()).cloned()
  }

  pub async fn list_by_agent_id(&self, agent_id: &str) -> Vec<AgentRecord> {
    let document = self.document.lock().await;
    document
      .agents
      .values()
      .filter(|record| record.key.agent_id == agent_id)
      .cloned()
      .collect()
  }

  pub async fn list(&self) -> Vec<AgentRecord> {
    let document = self.document.lock().await;
    document.agents.values().cloned().collect()
  }

  /// Idempotent: unregistering a key that doesn't exist is not an error.
  pub async fn unregister(&self, key: &AgentKey) -> Result<()> {
    let mut document = self.document.lock().await;
    document.agents.shift_remove(&key.canonical());
    self.persist(&document).await
  }

  pub async fn set_deployment_group(
    &self,
    key: &AgentKey,
    deployment_group: Option<String>,
  ) -> Result<()> {
    let mut document = self.document.lock().await;
    let record = document
      .agents
      .get_mut(&key.canonical())
      .ok_or_else(|| Error::NotFound(key.canonical()))?;
    record.deployment_group = deployment_group;
    self.persist(&document).await
  }

  /// Applies `updater` to the record in place (e.g. version-slot rotation)
  /// and persists the result as a single atomic write.
  pub async fn update_metadata(
    &self,
    key: &AgentKey,
    updater: impl FnOnce(&mut AgentRecord),
  ) -> Result<AgentRecord> {
    let mut document = self.document.lock().await;
    let record = document
      .agents
      .get_mut(&key.canonical())
      .ok_or_else(|| Error::NotFound(key.canonical()))?;
    updater(record);
    let updated = record.clone();
    self.persist(&document).await?;
    Ok(updated)
  }

  /// Current `agent_id -> port` map, for seeding the port allocator at
  /// startup — the allocator itself never persists.
  pub async fn port_allocations(&self) -> IndexMap<String, u16> {
    let document = self.document.lock().await;
    document
      .agents
      .values()
      .map(|record| (record.key.agent_id.clone(), record.port))
      .collect()
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entities::VersionSlots;

  fn sample_record(agent_id: &str, host_id: &str, port: u16) -> AgentRecord {
    AgentRecord {
      key: AgentKey::new(agent_id, host_id),
      name: agent_id.to_string(),
      template: "scout".to_string(),
      port,
      compose_path: format!("/opt/agents/{agent_id}/docker-compose.yml"),
      encrypted_service_token: "ciphertext-token".to_string(),
      encrypted_admin_password: "ciphertext-password".to_string(),
      deployment_group: None,
      do_not_autostart: false,
      metadata: IndexMap::new(),
      versions: VersionSlots::default(),
      version_history: Vec::new(),
      created_at_ms: 0,
    }
  }

  #[tokio::test]
  async fn register_then_reload_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metadata.json");
    let registry = Registry::load(&path).await.unwrap();
    let key = AgentKey::new("scout-ab23xy", "main");
    registry.register(sample_record("scout-ab23xy", "main", 8101)).await.unwrap();

    let reloaded = Registry::load(&path).await.unwrap();
    let record = reloaded.lookup(&key).await.unwrap();
    assert_eq!(record.port, 8101);
  }

  #[tokio::test]
  async fn register_rejects_duplicate_composite_key() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::load(dir.path().join("metadata.json")).await.unwrap();
    registry.register(sample_record("scout-ab23xy", "main", 8101)).await.unwrap();
    let err = registry
      .register(sample_record("scout-ab23xy", "main", 8102))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }

  #[tokio::test]
  async fn unregister_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::load(dir.path().join("metadata.json")).await.unwrap();
    let key = AgentKey::new("scout-ab23xy", "main");
    registry.register(sample_record("scout-ab23xy", "main", 8101)).await.unwrap();
    registry.unregister(&key).await.unwrap();
    registry.unregister(&key).await.unwrap();
    assert!(registry.lookup(&key).await.is_none());
  }

  #[tokio::test]
  async fn list_by_agent_id_returns_all_occurrences() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::load(dir.path().join("metadata.json")).await.unwrap();
    let mut first = sample_record("scout", "main", 8101);
    first.key.occurrence_id = Some("a".to_string());
    let mut second = sample_record("scout", "main", 8102);
    second.key.occurrence_id = Some("b".to_string());
    registry.register(first).await.unwrap();
    registry.register(second).await.unwrap();
    assert_eq!(registry.list_by_agent_id("scout").await.len(), 2);
  }
}
