//! Lifecycle Coordinator (C6). Create/delete/restart agents; dispatches to
//! the local compose CLI or the remote Docker API path depending on the
//! target host.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::agent_client::AgentClient;
use crate::compose::{self, RenderInput};
use crate::config::ManagerConfig;
use crate::crypto::{self, Vault};
use crate::docker::{DockerFacade, RemoteContainerSpec};
use crate::entities::{AgentKey, AgentRecord, VersionSlots};
use crate::error::{Error, Result};
use crate::manifest::TemplateManifest;
use crate::ports::PortAllocator;
use crate::proxy::ProxyReconciler;
use crate::registry::Registry;

const MAX_SUFFIX_ATTEMPTS: u32 = 10;

static TEMPLATE_NAME_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAgentRequest {
  pub name: String,
  pub template: String,
  pub host_id: Option<String>,
  pub occurrence_id: Option<String>,
  #[serde(default)]
  pub env_overrides: IndexMap<String, String>,
  pub deployment_group: Option<String>,
  pub wa_signature: Option<String>,
  #[serde(default)]
  pub do_not_autostart: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAgentResponse {
  pub agent_id: String,
  pub container_name: String,
  pub port: u16,
  pub endpoint: String,
  pub compose_path: String,
  pub status: String,
}

pub struct LifecycleCoordinator {
  config: Arc<ManagerConfig>,
  registry: Arc<Registry>,
  ports: Arc<Mutex<PortAllocator>>,
  facade: Arc<DockerFacade>,
  proxy: Arc<ProxyReconciler>,
  agent_client: Arc<dyn AgentClient>,
  vault: Vault,
}

impl LifecycleCoordinator {
  pub fn new(
    config: Arc<ManagerConfig>,
    registry: Arc<Registry>,
    ports: Arc<Mutex<PortAllocator>>,
    facade: Arc<DockerFacade>,
    proxy: Arc<ProxyReconciler>,
    agent_client: Arc<dyn AgentClient>,
    vault: Vault,
  ) -> Self {
    LifecycleCoordinator {
      config,
      registry,
      ports,
      facade,
      proxy,
      agent_client,
      vault,
    }
  }

  fn slugify(name: &str) -> String {
    name
      .to_lowercase()
      .chars()
      .map(|c| if c.is_alphanumeric() { c } else { '-' })
      .collect::<String>()
      .split('-')
      .filter(|s| !s.is_empty())
      .collect::<Vec<_>>()
      .join("-")
  }

  /// Mints a unique `agent_id`. For single-occurrence agents, retries up to
  /// [`MAX_SUFFIX_ATTEMPTS`] times on collision before surfacing
  /// `IdentityExhausted` (§4.6).
  async fn generate_agent_id(
    &self,
    name: &str,
    occurrence_id: Option<&str>,
  ) -> Result<String> {
    let base = Self::slugify(name);
    if occurrence_id.is_some() {
      return Ok(base);
    }
    for attempt in 0..MAX_SUFFIX_ATTEMPTS {
      let suffix = crypto::generate_agent_suffix();
      let candidate = format!("{base}-{suffix}");
      if self.registry.list_by_agent_id(&candidate).await.is_empty() {
        return Ok(candidate);
      }
      tracing::warn!(
        "agent id collision for {candidate} (attempt {}/{MAX_SUFFIX_ATTEMPTS}), retrying",
        attempt + 1
      );
    }
    Err(Error::IdentityExhausted {
      base,
      attempts: MAX_SUFFIX_ATTEMPTS,
    })
  }

  fn validate_template_name(template: &str) -> Result<()> {
    if !TEMPLATE_NAME_RE.is_match(template) {
      return Err(Error::Validation(format!(
        "template name \"{template}\" contains disallowed characters"
      )));
    }
    Ok(())
  }

  /// Resolves `template` under the templates directory, rejecting any path
  /// escape via canonicalization + prefix check.
  fn resolve_template_path(&self, template: &str) -> Result<PathBuf> {
    Self::validate_template_name(template)?;
    let candidate = self.config.templates_dir.join(format!("{template}.yaml"));
    let canonical_root = self
      .config
      .templates_dir
      .canonicalize()
      .map_err(|e| Error::Validation(format!("templates dir invalid: {e}")))?;
    let canonical_candidate = candidate
      .canonicalize()
      .map_err(|e| Error::Validation(format!("unknown template {template}: {e}")))?;
    if !canonical_candidate.starts_with(&canonical_root) {
      return Err(Error::Permission(format!(
        "template {template} escapes templates directory"
      )));
    }
    Ok(canonical_candidate)
  }

  async fn check_template_approval(
    &self,
    template: &str,
    wa_signature: Option<&str>,
  ) -> Result<()> {
    let manifest = TemplateManifest::load(&self.config.manifest_path)
      .await
      .map_err(Error::Other)?;
    if manifest.is_pre_approved(template) {
      return Ok(());
    }
    if wa_signature.is_none() {
      return Err(Error::Permission(format!(
        "template {template} is not pre-approved; a WA signature is required"
      )));
    }
    Ok(())
  }

  fn agent_dir(&self, agent_id: &str) -> PathBuf {
    self.config.agents_dir.join(agent_id)
  }

  async fn materialize_local_directories(&self, agent_dir: &Path) -> Result<()> {
    create_dir_with_mode(agent_dir, 0o755).await?;
    create_dir_with_mode(&agent_dir.join("data"), 0o755).await?;
    create_dir_with_mode(&agent_dir.join("data_archive"), 0o755).await?;
    create_dir_with_mode(&agent_dir.join("logs"), 0o755).await?;
    create_dir_with_mode(&agent_dir.join("config"), 0o755).await?;
    create_dir_with_mode(&agent_dir.join("audit_keys"), 0o700).await?;
    create_dir_with_mode(&agent_dir.join(".secrets"), 0o700).await?;
    Ok(())
  }

  async fn write_init_script(&self, agent_dir: &Path) -> Result<()> {
    let script = "#!/bin/sh\nset -e\nchown -R 1000:1000 /app/data /app/data_archive /app/logs /app/config\n";
    let path = agent_dir.join("init_permissions.sh");
    tokio::fs::write(&path, script).await?;
    set_mode(&path, 0o755).await?;
    Ok(())
  }

  /// §4.6 step 9: hand the data directories to the container runtime UID.
  /// This is a host-side step distinct from `write_init_script` — the init
  /// script is a redundant in-container safety net, not a substitute for it
  /// (the manager process itself is not uid 1000, so the directories must be
  /// re-owned before the container can write into its own volumes). The
  /// compose file is deliberately left out of this chown: it stays owned by
  /// the manager so a later `update_config` can rewrite it.
  async fn chown_data_directories(&self, agent_dir: &Path) -> Result<()> {
    let dirs = [
      agent_dir.join("data"),
      agent_dir.join("data_archive"),
      agent_dir.join("logs"),
      agent_dir.join("config"),
      agent_dir.join("audit_keys"),
      agent_dir.join(".secrets"),
    ];
    let targets = dirs
      .iter()
      .map(|d| format!("'{}'", d.to_string_lossy()))
      .collect::<Vec<_>>()
      .join(" ");
    let log = command::run_command(
      "Chown Data Directories",
      None,
      format!("sudo chown -R 1000:1000 {targets}"),
    )
    .await;
    if !log.success {
      tracing::warn!(
        "could not set data directory ownership to 1000:1000 under {}: {}",
        agent_dir.display(),
        log.stderr
      );
    }
    Ok(())
  }

  /// §4.6 Create (happy path).
  pub async fn create(&self, request: CreateAgentRequest) -> Result<CreateAgentResponse> {
    Self::validate_template_name(&request.template)?;
    self.resolve_template_path(&request.template)?;
    self
      .check_template_approval(&request.template, request.wa_signature.as_deref())
      .await?;

    let host_id = request.host_id.clone().unwrap_or_else(|| "main".to_string());
    let host = self
      .config
      .servers
      .iter()
      .find(|h| h.host_id == host_id)
      .ok_or_else(|| Error::Validation(format!("unknown host_id {host_id}")))?
      .clone();

    let agent_id = self
      .generate_agent_id(&request.name, request.occurrence_id.as_deref())
      .await?;

    let service_token = crypto::generate_service_token();
    let admin_password = crypto::generate_admin_password();
    let encrypted_service_token = self.vault.encrypt(&service_token).map_err(anyhow::Error::from)?;
    let encrypted_admin_password =
      self.vault.encrypt(&admin_password).map_err(anyhow::Error::from)?;

    let port = {
      let mut allocator = self.ports.lock().await;
      allocator.allocate(&agent_id)?
    };

    let agent_dir = self.agent_dir(&agent_id);
    if host.is_local {
      self.materialize_local_directories(&agent_dir).await?;
      self.write_init_script(&agent_dir).await?;
      self.chown_data_directories(&agent_dir).await?;
    }

    let render_input = RenderInput {
      agent_id: &agent_id,
      port,
      template: &request.template,
      container_prefix: &self.config.container_prefix,
      registry: &self.config.registry,
      image: &self.config.default_image,
      api_host: "0.0.0.0",
      api_port: 8080,
      oauth_callback_base_url: "",
      discord_bot_token_present: request.env_overrides.contains_key("DISCORD_BOT_TOKEN"),
      wizard_enabled_adapters: &[],
      env_overrides: &request.env_overrides,
      deployment_group: request.deployment_group.as_deref(),
      agent_dir: &agent_dir.to_string_lossy(),
      shared_oauth_dir: "/opt/ciris/shared/oauth",
      created_at_ms: command::unix_timestamp_ms(),
      billing_enabled: false,
    };
    let compose = compose::render(&render_input);
    let compose_yaml = compose::to_yaml(&compose).map_err(Error::Other)?;
    let compose_path = agent_dir.join("docker-compose.yml");

    if host.is_local {
      tokio::fs::create_dir_all(&agent_dir).await?;
      let tmp = agent_dir.join(".docker-compose.yml.tmp");
      tokio::fs::write(&tmp, &compose_yaml).await?;
      tokio::fs::rename(&tmp, &compose_path).await?;
    }

    let record = AgentRecord {
      key: AgentKey {
        agent_id: agent_id.clone(),
        occurrence_id: request.occurrence_id.clone(),
        host_id: host_id.clone(),
      },
      name: request.name.clone(),
      template: request.template.clone(),
      port,
      compose_path: compose_path.to_string_lossy().to_string(),
      encrypted_service_token,
      encrypted_admin_password,
      deployment_group: request.deployment_group.clone(),
      do_not_autostart: request.do_not_autostart,
      metadata: IndexMap::new(),
      versions: VersionSlots::default(),
      version_history: Vec::new(),
      created_at_ms: command::unix_timestamp_ms(),
    };

    // Registry write precedes container start (§5 ordering guarantee).
    if let Err(e) = self.registry.register(record.clone()).await {
      self.ports.lock().await.release(&agent_id);
      return Err(e);
    }

    if let Err(e) = self.start_dispatch(&record, &compose).await {
      // Unwind: failures after the registry write but we treat a start
      // failure as non-fatal (§4.6: "failures after step 11 leave the
      // partial state and surface a non-fatal warning").
      tracing::warn!("agent {agent_id} created but failed to start: {e:#}");
    } else {
      self.bootstrap_agent_credentials(&record, &admin_password).await;
    }

    if let Err(e) = self.proxy.reconcile(&self.registry.list().await).await {
      tracing::warn!("proxy reconcile after create({agent_id}) failed: {e:#}");
    }

    Ok(CreateAgentResponse {
      agent_id: agent_id.clone(),
      container_name: format!("{}-{}", self.config.container_prefix, agent_id),
      port,
      endpoint: format!("http://127.0.0.1:{port}"),
      compose_path: record.compose_path,
      status: "starting".to_string(),
    })
  }

  /// Step 12: log in with the default password and rotate to the generated
  /// one. A failure here is logged, not fatal — the agent stays reachable
  /// with the default and an operator is alerted out of band.
  async fn bootstrap_agent_credentials(&self, record: &AgentRecord, admin_password: &str) {
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    let base_url = format!("http://127.0.0.1:{}", record.port);
    let login = match self.agent_client.login(&base_url, "admin", "default").await {
      Ok(login) => login,
      Err(e) => {
        tracing::warn!(
          "initial login failed for {} ({e}); leaving default password in place",
          record.key.agent_id
        );
        return;
      }
    };
    if let Err(e) = self
      .agent_client
      .change_password(
        &base_url,
        &login.user_id,
        &login.access_token,
        "default",
        admin_password,
      )
      .await
    {
      tracing::warn!(
        "failed to rotate admin password for {}: {e}",
        record.key.agent_id
      );
    }
  }

  async fn start_dispatch(
    &self,
    record: &AgentRecord,
    compose: &compose::ComposeFile,
  ) -> Result<()> {
    let host = self
      .config
      .servers
      .iter()
      .find(|h| h.host_id == record.key.host_id)
      .ok_or_else(|| Error::Validation(format!("unknown host_id {}", record.key.host_id)))?;

    if host.is_local {
      let log = command::run_command(
        "Compose Up",
        Path::new(&record.compose_path).parent(),
        "docker compose up -d",
      )
      .await;
      if !log.success {
        return Err(Error::ContainerOp {
          host_id: host.host_id.clone(),
          container: record.key.agent_id.clone(),
          source: anyhow::anyhow!(log.stderr),
        });
      }
      Ok(())
    } else {
      self.start_remote(host.host_id.clone(), record, compose).await
    }
  }

  /// Remote start dispatch (§4.6): translates the rendered compose service
  /// into Docker API arguments against the remote host.
  async fn start_remote(
    &self,
    host_id: String,
    record: &AgentRecord,
    compose: &compose::ComposeFile,
  ) -> Result<()> {
    let service = compose
      .services
      .get(&record.key.agent_id)
      .ok_or_else(|| Error::Validation("compose document missing rendered service".into()))?;

    let remote_agent_dir = format!("/opt/ciris/agents/{}", record.key.agent_id);
    self
      .materialize_remote_directories(&host_id, &remote_agent_dir)
      .await?;
    let binds: Vec<(String, String, bool)> = service
      .volumes
      .iter()
      .filter_map(|volume| parse_bind(volume, &remote_agent_dir))
      .collect();

    let port_bindings: Vec<(u16, u16)> = service
      .ports
      .iter()
      .filter_map(|mapping| {
        let (host_port, container_port) = mapping.split_once(':')?;
        Some((host_port.parse().ok()?, container_port.parse().ok()?))
      })
      .collect();

    let labels: IndexMap<String, String> = service.labels.clone();

    self
      .facade
      .create_and_start_container(
        &host_id,
        RemoteContainerSpec {
          name: &service.container_name,
          image: &service.image,
          env: &service.environment,
          binds: &binds,
          port_bindings: &port_bindings,
          labels: &labels,
        },
      )
      .await
  }

  /// Mirrors `materialize_local_directories` on the remote host (§4.6 Start
  /// dispatch): execs into the reverse-proxy container (present on every
  /// host per §4.5) to create the per-agent subdirectories with their
  /// documented modes, falling back to a short-lived helper container if the
  /// proxy container isn't there yet.
  async fn materialize_remote_directories(&self, host_id: &str, remote_agent_dir: &str) -> Result<()> {
    let script = format!(
      "mkdir -p {remote_agent_dir}/data {remote_agent_dir}/data_archive {remote_agent_dir}/logs {remote_agent_dir}/config {remote_agent_dir}/audit_keys {remote_agent_dir}/.secrets && \
chmod 0755 {remote_agent_dir}/data {remote_agent_dir}/data_archive {remote_agent_dir}/logs {remote_agent_dir}/config && \
chmod 0700 {remote_agent_dir}/audit_keys {remote_agent_dir}/.secrets && \
chown -R 1000:1000 {remote_agent_dir}/data {remote_agent_dir}/data_archive {remote_agent_dir}/logs {remote_agent_dir}/config {remote_agent_dir}/audit_keys {remote_agent_dir}/.secrets"
    );
    let proxy_container = &self.config.reverse_proxy.container_name;
    match self.facade.exec_sh(host_id, proxy_container, &script).await {
      Ok((0, _)) => Ok(()),
      Ok((code, output)) => Err(Error::ContainerOp {
        host_id: host_id.to_string(),
        container: proxy_container.clone(),
        source: anyhow::anyhow!("remote directory setup exited {code}: {output}"),
      }),
      Err(_) => {
        // Proxy container absent: fall back to a short-lived helper
        // container bind-mounting the host root, same pattern as the
        // reconciler's shared-directory bootstrap.
        let env = IndexMap::new();
        let labels = IndexMap::new();
        self
          .facade
          .create_and_start_container(
            host_id,
            crate::docker::RemoteContainerSpec {
              name: "ciris-agent-dir-bootstrap",
              image: "alpine",
              env: &env,
              binds: &[("/".to_string(), "/hostroot".to_string(), false)],
              port_bindings: &[],
              labels: &labels,
            },
          )
          .await?;
        self
          .facade
          .stop_and_remove_container(host_id, "ciris-agent-dir-bootstrap", 1)
          .await
      }
    }
  }

  /// §4.6 Delete.
  pub async fn delete(&self, key: &AgentKey) -> Result<()> {
    let record = self
      .registry
      .lookup(key)
      .await
      .ok_or_else(|| Error::NotFound(key.canonical()))?;

    let host = self
      .config
      .servers
      .iter()
      .find(|h| h.host_id == key.host_id)
      .ok_or_else(|| Error::Validation(format!("unknown host_id {}", key.host_id)))?;

    let container_name = format!("{}-{}", self.config.container_prefix, key.agent_id);
    if host.is_local {
      let log = command::run_command(
        "Compose Down",
        Path::new(&record.compose_path).parent(),
        "docker compose down -v",
      )
      .await;
      if !log.success {
        tracing::warn!("compose down failed for {}: {}", key.agent_id, log.stderr);
      }
    } else if let Err(e) = self
      .facade
      .stop_and_remove_container(&host.host_id, &container_name, 10)
      .await
    {
      tracing::warn!("container stop/remove failed for {}: {e:#}", key.agent_id);
    }

    self.registry.unregister(key).await?;
    self.ports.lock().await.release(&key.agent_id);

    if let Err(e) = self.proxy.reconcile(&self.registry.list().await).await {
      tracing::warn!("proxy reconcile after delete({}) failed: {e:#}", key.agent_id);
    }

    // The compose file is removed; the data directory (and its audit
    // history) is retained.
    if host.is_local {
      let _ = tokio::fs::remove_file(&record.compose_path).await;
    }

    Ok(())
  }

  /// §4.6 Update config: merges new environment variables into the compose
  /// file and rewrites it. A value of `""` deletes the key.
  pub async fn update_config(
    &self,
    key: &AgentKey,
    overrides: IndexMap<String, String>,
  ) -> Result<()> {
    let record = self
      .registry
      .lookup(key)
      .await
      .ok_or_else(|| Error::NotFound(key.canonical()))?;

    let yaml = tokio::fs::read_to_string(&record.compose_path).await?;
    let mut compose = compose::from_yaml(&yaml).map_err(Error::Other)?;
    let service = compose
      .services
      .get_mut(&key.agent_id)
      .ok_or_else(|| Error::Validation("compose document missing service".into()))?;

    for (k, v) in overrides {
      if v.is_empty() {
        service.environment.shift_remove(&k);
      } else {
        service.environment.insert(k, v);
      }
    }

    let rendered = compose::to_yaml(&compose).map_err(Error::Other)?;
    let parent = Path::new(&record.compose_path)
      .parent()
      .ok_or_else(|| Error::Validation("compose path has no parent".into()))?;
    let tmp = parent.join(".docker-compose.yml.tmp");
    tokio::fs::write(&tmp, &rendered).await?;
    tokio::fs::rename(&tmp, &record.compose_path).await?;
    Ok(())
  }

  /// §4.7 crash-recovery restart: relaunches an existing agent via the same
  /// dispatch path as create, reusing its on-disk compose file unmodified.
  pub async fn restart(&self, key: &AgentKey) -> Result<()> {
    let record = self
      .registry
      .lookup(key)
      .await
      .ok_or_else(|| Error::NotFound(key.canonical()))?;
    let host = self
      .config
      .servers
      .iter()
      .find(|h| h.host_id == key.host_id)
      .ok_or_else(|| Error::Validation(format!("unknown host_id {}", key.host_id)))?;
    let compose = if host.is_local {
      // The local dispatch path shells out to `docker compose up -d` against
      // the on-disk file directly; it never inspects this value.
      compose::ComposeFile {
        services: IndexMap::new(),
      }
    } else {
      let yaml = tokio::fs::read_to_string(&record.compose_path).await?;
      compose::from_yaml(&yaml).map_err(Error::Other)?
    };
    self.start_dispatch(&record, &compose).await
  }

  /// §4.8 deployment container swap: rewrites the compose file's image,
  /// stops the running container (old and new images never run
  /// concurrently), then relaunches through the same dispatch path as
  /// create/restart.
  pub async fn update_image(&self, key: &AgentKey, image: &str) -> Result<()> {
    let record = self
      .registry
      .lookup(key)
      .await
      .ok_or_else(|| Error::NotFound(key.canonical()))?;
    let host = self
      .config
      .servers
      .iter()
      .find(|h| h.host_id == key.host_id)
      .ok_or_else(|| Error::Validation(format!("unknown host_id {}", key.host_id)))?
      .clone();

    let yaml = tokio::fs::read_to_string(&record.compose_path).await?;
    let mut compose = compose::from_yaml(&yaml).map_err(Error::Other)?;
    {
      let service = compose
        .services
        .get_mut(&key.agent_id)
        .ok_or_else(|| Error::Validation("compose document missing service".into()))?;
      service.image = image.to_string();
    }
    let rendered = compose::to_yaml(&compose).map_err(Error::Other)?;
    let parent = Path::new(&record.compose_path)
      .parent()
      .ok_or_else(|| Error::Validation("compose path has no parent".into()))?;
    let tmp = parent.join(".docker-compose.yml.tmp");
    tokio::fs::write(&tmp, &rendered).await?;
    tokio::fs::rename(&tmp, &record.compose_path).await?;

    let container_name = format!("{}-{}", self.config.container_prefix, key.agent_id);
    if host.is_local {
      let log = command::run_command(
        "Compose Down",
        Path::new(&record.compose_path).parent(),
        "docker compose down",
      )
      .await;
      if !log.success {
        tracing::warn!(
          "compose down before image swap failed for {}: {}",
          key.agent_id,
          log.stderr
        );
      }
    } else if let Err(e) = self
      .facade
      .stop_and_remove_container(&host.host_id, &container_name, 10)
      .await
    {
      tracing::warn!(
        "container stop before image swap failed for {}: {e:#}",
        key.agent_id
      );
    }

    self.start_dispatch(&record, &compose).await
  }
}

async fn create_dir_with_mode(path: &Path, mode: u32) -> Result<()> {
  tokio::fs::create_dir_all(path).await?;
  set_mode(path, mode).await
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
  use std::os::unix::fs::PermissionsExt;
  let permissions = std::fs::Permissions::from_mode(mode);
  tokio::fs::set_permissions(path, permissions).await?;
  Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
  Ok(())
}

fn parse_bind(volume: &str, remote_agent_dir: &str) -> Option<(String, String, bool)> {
  let read_only = volume.ends_with(":ro");
  let trimmed = volume.strip_suffix(":ro").unwrap_or(volume);
  let (source, target) = trimmed.split_once(':')?;
  let remote_source = if let Some(rest) = source.strip_prefix("/opt/ciris/agents/").or_else(|| {
    source.rsplit_once('/').map(|(_, last)| last)
  }) {
    format!("{remote_agent_dir}/{rest}")
  } else {
    source.to_string()
  };
  Some((remote_source, target.to_string(), read_only))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn slugify_lowercases_and_strips_punctuation() {
    assert_eq!(LifecycleCoordinator::slugify("Scout One!"), "scout-one");
  }

  #[test]
  fn template_name_rejects_path_escape_characters() {
    assert!(LifecycleCoordinator::validate_template_name("scout").is_ok());
    assert!(LifecycleCoordinator::validate_template_name("../etc").is_err());
    assert!(LifecycleCoordinator::validate_template_name("scout/one").is_err());
  }

  #[test]
  fn parse_bind_extracts_source_target_and_readonly() {
    let (source, target, ro) =
      parse_bind("/opt/ciris/agents/scout/data:/app/data", "/opt/ciris/agents/scout").unwrap();
    assert_eq!(source, "/opt/ciris/agents/scout/data");
    assert_eq!(target, "/app/data");
    assert!(!ro);

    let (_, _, ro) = parse_bind(
      "/opt/ciris/shared/oauth:/app/shared/oauth:ro",
      "/opt/ciris/agents/scout",
    )
    .unwrap();
    assert!(ro);
  }
}
