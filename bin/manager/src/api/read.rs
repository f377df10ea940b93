//! Side-effect-free queries: agent/host inventory, deployment status,
//! template listing.

use axum::{Json, Router, extract::Query, routing::get};
use indexmap::IndexMap;
use manager_core::entities::{AgentKey, AgentRecord, Deployment, HostConfig};
use serde::{Deserialize, Serialize};

use crate::state::app_state;

pub fn router() -> Router {
  Router::new()
    .route("/agents", get(list_agents))
    .route("/agent", get(get_agent))
    .route("/hosts", get(list_hosts))
    .route("/hosts/health", get(hosts_health))
    .route("/deployments", get(list_deployments))
    .route("/deployments/pending", get(pending_deployments))
    .route("/deployment", get(get_deployment))
    .route("/templates", get(list_templates))
}

/// An [`AgentRecord`] with its at-rest ciphertext fields stripped — nothing
/// outside the vault ever needs them, including operators browsing the API.
#[derive(Debug, Serialize)]
pub struct AgentSummary {
  pub key: AgentKey,
  pub name: String,
  pub template: String,
  pub port: u16,
  pub deployment_group: Option<String>,
  pub do_not_autostart: bool,
  pub metadata: IndexMap<String, String>,
  pub versions: manager_core::entities::VersionSlots,
  pub created_at_ms: i64,
}

impl From<AgentRecord> for AgentSummary {
  fn from(record: AgentRecord) -> Self {
    AgentSummary {
      key: record.key,
      name: record.name,
      template: record.template,
      port: record.port,
      deployment_group: record.deployment_group,
      do_not_autostart: record.do_not_autostart,
      metadata: record.metadata,
      versions: record.versions,
      created_at_ms: record.created_at_ms,
    }
  }
}

async fn list_agents() -> serror::Result<Json<Vec<AgentSummary>>> {
  let agents = app_state().registry.list().await;
  Ok(Json(agents.into_iter().map(AgentSummary::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct AgentQuery {
  pub agent_id: String,
  pub host_id: String,
  #[serde(default)]
  pub occurrence_id: Option<String>,
}

async fn get_agent(
  Query(query): Query<AgentQuery>,
) -> serror::Result<Json<Option<AgentSummary>>> {
  let key = AgentKey {
    agent_id: query.agent_id,
    occurrence_id: query.occurrence_id,
    host_id: query.host_id,
  };
  let record = app_state().registry.lookup(&key).await;
  Ok(Json(record.map(AgentSummary::from)))
}

async fn list_hosts() -> serror::Result<Json<Vec<HostConfig>>> {
  Ok(Json(app_state().config.servers.clone()))
}

#[derive(Debug, Serialize)]
pub struct HostHealth {
  pub host_id: String,
  pub available: bool,
  pub last_error: Option<String>,
}

async fn hosts_health() -> serror::Result<Json<Vec<HostHealth>>> {
  let state = app_state();
  let mut out = Vec::with_capacity(state.facade.hosts().len());
  for host_id in state.facade.hosts().keys() {
    out.push(HostHealth {
      host_id: host_id.clone(),
      available: state.facade.breaker().is_available(host_id).await,
      last_error: state.facade.breaker().last_error(host_id).await,
    });
  }
  Ok(Json(out))
}

async fn list_deployments() -> serror::Result<Json<Vec<Deployment>>> {
  Ok(Json(app_state().deployments.list().await))
}

async fn pending_deployments() -> serror::Result<Json<Vec<Deployment>>> {
  Ok(Json(app_state().deployments.pending().await))
}

#[derive(Debug, Deserialize)]
pub struct DeploymentQuery {
  pub deployment_id: String,
}

async fn get_deployment(
  Query(query): Query<DeploymentQuery>,
) -> serror::Result<Json<Option<Deployment>>> {
  Ok(Json(app_state().deployments.status(&query.deployment_id).await))
}

#[derive(Debug, Serialize)]
pub struct TemplateInfo {
  pub name: String,
  pub pre_approved: bool,
}

/// Lists every `*.yaml` file under the templates directory, annotated with
/// whether the pre-approval manifest covers it (§4.6 step 3 — a template
/// missing here still works, it just requires a WA signature on create).
async fn list_templates() -> serror::Result<Json<Vec<TemplateInfo>>> {
  let state = app_state();
  let manifest = manager_core::manifest::TemplateManifest::load(&state.config.manifest_path)
    .await
    .map_err(anyhow::Error::from)?;

  let mut out = Vec::new();
  let mut entries = tokio::fs::read_dir(&state.config.templates_dir)
    .await
    .map_err(anyhow::Error::from)?;
  while let Some(entry) = entries.next_entry().await.map_err(anyhow::Error::from)? {
    let path = entry.path();
    if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
      continue;
    }
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
      continue;
    };
    out.push(TemplateInfo {
      name: stem.to_string(),
      pre_approved: manifest.is_pre_approved(stem),
    });
  }
  Ok(Json(out))
}
