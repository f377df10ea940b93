//! Composition root state (C10). Every long-lived component is constructed
//! once in [`init`] and exposed through narrow accessor functions, the same
//! `OnceLock`-backed singleton pattern the configuration loader uses.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use manager_core::agent_client::{AgentClient, ReqwestAgentClient};
use manager_core::config::ManagerConfig;
use manager_core::crypto::{self, Vault};
use manager_core::deployment::{
  DeploymentOrchestrator, DeploymentStore, DigestResolver, DockerDigestResolver,
};
use manager_core::docker::DockerFacade;
use manager_core::lifecycle::LifecycleCoordinator;
use manager_core::ports::{PortAllocator, PortAllocatorConfig};
use manager_core::proxy::ProxyReconciler;
use manager_core::recovery::CrashRecoveryLoop;
use manager_core::registry::Registry;
use manager_core::retention::ImageRetention;
use tokio::sync::Mutex;

pub struct AppState {
  pub config: Arc<ManagerConfig>,
  pub registry: Arc<Registry>,
  pub ports: Arc<Mutex<PortAllocator>>,
  pub facade: Arc<DockerFacade>,
  pub proxy: Arc<ProxyReconciler>,
  pub lifecycle: Arc<LifecycleCoordinator>,
  pub recovery: Arc<CrashRecoveryLoop>,
  pub retention: Arc<ImageRetention>,
  pub deployments: Arc<DeploymentOrchestrator>,
}

static APP_STATE: OnceLock<Arc<AppState>> = OnceLock::new();

pub fn app_state() -> &'static Arc<AppState> {
  APP_STATE.get().expect("app state not initialized")
}

/// Reads `install_secret` from `config`, generating and persisting one back
/// to `config_path`'s directory on first run (the manager's install-time
/// state lives alongside its configuration file, not in the registry).
async fn load_or_generate_vault(
  config: &mut ManagerConfig,
  config_path: &std::path::Path,
) -> anyhow::Result<Vault> {
  if let Some(secret) = &config.install_secret {
    return Ok(Vault::from_base64_secret(secret)?);
  }
  let secret = crypto::generate_install_secret();
  let vault = Vault::from_base64_secret(&secret)?;
  config.install_secret = Some(secret);
  if let Some(parent) = config_path.parent() {
    let install_secret_path = parent.join("install_secret");
    tokio::fs::write(&install_secret_path, config.install_secret.as_ref().unwrap()).await?;
  }
  Ok(vault)
}

/// Builds every long-lived component and installs them as the process-wide
/// singleton. Must run exactly once, before the control-plane API starts
/// serving requests.
pub async fn init(config_path: &std::path::Path) -> anyhow::Result<()> {
  let mut config = ManagerConfig::load(config_path)?;
  let vault = load_or_generate_vault(&mut config, config_path).await?;
  let config = Arc::new(config);

  let registry_path = config.agents_dir.join("metadata.json");
  let registry = Arc::new(Registry::load(&registry_path).await?);

  let existing_ports = registry.port_allocations().await;
  let ports = Arc::new(Mutex::new(PortAllocator::from_existing(
    PortAllocatorConfig::from(config.ports.clone()),
    existing_ports,
  )));

  let facade = Arc::new(DockerFacade::new(config.hosts_by_id()));

  let proxy = Arc::new(ProxyReconciler::new(
    facade.clone(),
    config.reverse_proxy.container_name.clone(),
    config.reverse_proxy.config_dir.clone(),
    None,
  ));

  let agent_client: Arc<dyn AgentClient> = Arc::new(ReqwestAgentClient::default());

  let lifecycle = Arc::new(LifecycleCoordinator::new(
    config.clone(),
    registry.clone(),
    ports.clone(),
    facade.clone(),
    proxy.clone(),
    agent_client.clone(),
    vault,
  ));

  let recovery = Arc::new(CrashRecoveryLoop::new(
    config.clone(),
    registry.clone(),
    facade.clone(),
    lifecycle.clone(),
  ));

  let retention = Arc::new(ImageRetention::new(config.clone(), facade.clone()));

  let digest_resolver: Arc<dyn DigestResolver> =
    Arc::new(DockerDigestResolver::new(facade.clone()));

  let deployment_store =
    DeploymentStore::load(config.agents_dir.join("deployments.json")).await?;

  let deployments = Arc::new(DeploymentOrchestrator::new(
    config.clone(),
    registry.clone(),
    lifecycle.clone(),
    agent_client,
    digest_resolver,
    retention.clone(),
    deployment_store,
    Duration::from_secs(5),
  ));

  APP_STATE
    .set(Arc::new(AppState {
      config,
      registry,
      ports,
      facade,
      proxy,
      lifecycle,
      recovery,
      retention,
      deployments,
    }))
    .unwrap_or_else(|_| panic!("app state initialized twice"));

  Ok(())
}
