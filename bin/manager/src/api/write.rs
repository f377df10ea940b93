//! Registry-mutating CRUD: create, delete, and config updates.

use axum::{Json, Router, routing::post};
use indexmap::IndexMap;
use manager_core::entities::AgentKey;
use manager_core::lifecycle::{CreateAgentRequest, CreateAgentResponse};
use serde::Deserialize;

use crate::state::app_state;

pub fn router() -> Router {
  Router::new()
    .route("/agents", post(create_agent))
    .route("/agents/delete", post(delete_agent))
    .route("/agents/config", post(update_agent_config))
}

async fn create_agent(
  Json(request): Json<CreateAgentRequest>,
) -> serror::Result<Json<CreateAgentResponse>> {
  let response = app_state()
    .lifecycle
    .create(request)
    .await
    .map_err(anyhow::Error::from)?;
  Ok(Json(response))
}

async fn delete_agent(Json(key): Json<AgentKey>) -> serror::Result<Json<()>> {
  app_state().lifecycle.delete(&key).await.map_err(anyhow::Error::from)?;
  Ok(Json(()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateAgentConfigBody {
  pub key: AgentKey,
  pub overrides: IndexMap<String, String>,
}

async fn update_agent_config(
  Json(body): Json<UpdateAgentConfigBody>,
) -> serror::Result<Json<()>> {
  app_state()
    .lifecycle
    .update_config(&body.key, body.overrides)
    .await
    .map_err(anyhow::Error::from)?;
  Ok(Json(()))
}
