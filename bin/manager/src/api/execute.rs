//! Actions with external effects: restart, and the deployment lifecycle
//! (stage, launch, cancel, reject, retry, confirm-rollback).

use axum::{Json, Router, routing::post};
use manager_core::entities::{AgentKey, Deployment, UpdateNotification};
use serde::Deserialize;

use crate::state::app_state;

pub fn router() -> Router {
  Router::new()
    .route("/agents/restart", post(restart_agent))
    .route("/deployments/stage", post(stage_deployment))
    .route("/deployments/launch", post(launch_deployment))
    .route("/deployments/cancel", post(cancel_deployment))
    .route("/deployments/reject", post(reject_deployment))
    .route("/deployments/retry", post(retry_deployment))
    .route("/deployments/confirm-rollback", post(confirm_rollback))
}

async fn restart_agent(Json(key): Json<AgentKey>) -> serror::Result<Json<()>> {
  app_state().lifecycle.restart(&key).await.map_err(anyhow::Error::from)?;
  Ok(Json(()))
}

async fn stage_deployment(
  Json(notification): Json<UpdateNotification>,
) -> serror::Result<Json<Deployment>> {
  let deployment = app_state()
    .deployments
    .stage(notification)
    .await
    .map_err(anyhow::Error::from)?;
  Ok(Json(deployment))
}

#[derive(Debug, Deserialize)]
pub struct DeploymentIdBody {
  pub deployment_id: String,
}

async fn launch_deployment(
  Json(body): Json<DeploymentIdBody>,
) -> serror::Result<Json<()>> {
  app_state()
    .deployments
    .launch(&body.deployment_id)
    .await
    .map_err(anyhow::Error::from)?;
  Ok(Json(()))
}

#[derive(Debug, Deserialize)]
pub struct DeploymentReasonBody {
  pub deployment_id: String,
  #[serde(default)]
  pub reason: String,
}

async fn cancel_deployment(
  Json(body): Json<DeploymentReasonBody>,
) -> serror::Result<Json<()>> {
  app_state()
    .deployments
    .cancel(&body.deployment_id, &body.reason)
    .await
    .map_err(anyhow::Error::from)?;
  Ok(Json(()))
}

async fn reject_deployment(
  Json(body): Json<DeploymentReasonBody>,
) -> serror::Result<Json<()>> {
  app_state()
    .deployments
    .reject(&body.deployment_id, &body.reason)
    .await
    .map_err(anyhow::Error::from)?;
  Ok(Json(()))
}

async fn retry_deployment(
  Json(body): Json<DeploymentIdBody>,
) -> serror::Result<Json<Deployment>> {
  let deployment = app_state()
    .deployments
    .retry(&body.deployment_id)
    .await
    .map_err(anyhow::Error::from)?;
  Ok(Json(deployment))
}

async fn confirm_rollback(
  Json(body): Json<DeploymentIdBody>,
) -> serror::Result<Json<()>> {
  app_state()
    .deployments
    .confirm_rollback(&body.deployment_id)
    .await
    .map_err(anyhow::Error::from)?;
  Ok(Json(()))
}
