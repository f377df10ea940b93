//! Agent HTTP client (§4.6A). A narrow trait over the agent's control API so
//! C6 and C8 can be tested against a fake implementation instead of mocking
//! `reqwest` at the transport layer.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entities::{AgentStatus, UpdateDecision};

#[derive(Debug, thiserror::Error)]
pub enum AgentClientError {
  #[error("request to agent failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("agent returned unexpected response shape: {0}")]
  UnexpectedShape(String),
  #[error("request to agent timed out")]
  Timeout,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
  pub username: &'a str,
  pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
  pub access_token: String,
  pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ChangePasswordRequest<'a> {
  pub current_password: &'a str,
  pub new_password: &'a str,
}

/// Normative wire shape for the update-negotiation protocol (§9 open
/// question resolution): POSTed to `/v1/system/update`.
#[derive(Debug, Serialize)]
pub struct UpdateCheckRequest<'a> {
  pub image: &'a str,
  pub digest: &'a str,
  pub deployment_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCheckResponse {
  pub decision: UpdateDecision,
  #[serde(default)]
  pub reason: Option<String>,
}

/// The agent control-plane contract consumed by the Lifecycle Coordinator
/// (C6) and the Deployment Orchestrator (C8). Each method carries its own
/// deadline; implementors must not block past it.
#[async_trait]
pub trait AgentClient: Send + Sync {
  async fn login(
    &self,
    base_url: &str,
    username: &str,
    password: &str,
  ) -> Result<LoginResponse, AgentClientError>;

  async fn change_password(
    &self,
    base_url: &str,
    user_id: &str,
    access_token: &str,
    current_password: &str,
    new_password: &str,
  ) -> Result<(), AgentClientError>;

  async fn health(&self, base_url: &str) -> Result<bool, AgentClientError>;

  async fn status(&self, base_url: &str) -> Result<AgentStatus, AgentClientError>;

  async fn request_update(
    &self,
    base_url: &str,
    image: &str,
    digest: &str,
    deployment_id: &str,
  ) -> Result<UpdateCheckResponse, AgentClientError>;
}

pub struct ReqwestAgentClient {
  client: reqwest::Client,
}

impl ReqwestAgentClient {
  pub fn new(timeout: Duration) -> Self {
    ReqwestAgentClient {
      client: reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("failed to build agent http client"),
    }
  }
}

impl Default for ReqwestAgentClient {
  fn default() -> Self {
    ReqwestAgentClient::new(Duration::from_secs(10))
  }
}

#[async_trait]
impl AgentClient for ReqwestAgentClient {
  async fn login(
    &self,
    base_url: &str,
    username: &str,
    password: &str,
  ) -> Result<LoginResponse, AgentClientError> {
    let response = self
      .client
      .post(format!("{base_url}/v1/auth/login"))
      .json(&LoginRequest { username, password })
      .send()
      .await?
      .error_for_status()?;
    Ok(response.json().await?)
  }

  async fn change_password(
    &self,
    base_url: &str,
    user_id: &str,
    access_token: &str,
    current_password: &str,
    new_password: &str,
  ) -> Result<(), AgentClientError> {
    self
      .client
      .put(format!("{base_url}/v1/users/{user_id}/password"))
      .bearer_auth(access_token)
      .json(&ChangePasswordRequest {
        current_password,
        new_password,
      })
      .send()
      .await?
      .error_for_status()?;
    Ok(())
  }

  async fn health(&self, base_url: &str) -> Result<bool, AgentClientError> {
    let response = self
      .client
      .get(format!("{base_url}/v1/system/health"))
      .send()
      .await?;
    Ok(response.status().is_success())
  }

  async fn status(&self, base_url: &str) -> Result<AgentStatus, AgentClientError> {
    let response = self
      .client
      .get(format!("{base_url}/v1/system/status"))
      .send()
      .await?
      .error_for_status()?;
    Ok(response.json().await?)
  }

  async fn request_update(
    &self,
    base_url: &str,
    image: &str,
    digest: &str,
    deployment_id: &str,
  ) -> Result<UpdateCheckResponse, AgentClientError> {
    let response = self
      .client
      .post(format!("{base_url}/v1/system/update"))
      .json(&UpdateCheckRequest {
        image,
        digest,
        deployment_id,
      })
      .send()
      .await?
      .error_for_status()?;
    Ok(response.json().await?)
  }
}

#[cfg(test)]
pub mod fake {
  use super::*;
  use std::collections::HashMap;
  use std::sync::Mutex;

  /// Test double keyed by `base_url`, letting each test script exactly the
  /// decisions and statuses it needs per agent. The Rust-idiomatic
  /// substitute for `unittest.mock.patch("httpx.AsyncClient")`.
  #[derive(Default)]
  pub struct FakeAgentClient {
    pub decisions: Mutex<HashMap<String, UpdateDecision>>,
    pub statuses: Mutex<HashMap<String, AgentStatus>>,
    pub healthy: Mutex<HashMap<String, bool>>,
  }

  #[async_trait]
  impl AgentClient for FakeAgentClient {
    async fn login(
      &self,
      _base_url: &str,
      _username: &str,
      _password: &str,
    ) -> Result<LoginResponse, AgentClientError> {
      Ok(LoginResponse {
        access_token: "fake-token".to_string(),
        user_id: "fake-user".to_string(),
      })
    }

    async fn change_password(
      &self,
      _base_url: &str,
      _user_id: &str,
      _access_token: &str,
      _current_password: &str,
      _new_password: &str,
    ) -> Result<(), AgentClientError> {
      Ok(())
    }

    async fn health(&self, base_url: &str) -> Result<bool, AgentClientError> {
      Ok(*self.healthy.lock().unwrap().get(base_url).unwrap_or(&true))
    }

    async fn status(&self, base_url: &str) -> Result<AgentStatus, AgentClientError> {
      self
        .statuses
        .lock()
        .unwrap()
        .get(base_url)
        .cloned()
        .ok_or_else(|| AgentClientError::UnexpectedShape(format!("no status stubbed for {base_url}")))
    }

    async fn request_update(
      &self,
      base_url: &str,
      _image: &str,
      _digest: &str,
      _deployment_id: &str,
    ) -> Result<UpdateCheckResponse, AgentClientError> {
      let decision = *self
        .decisions
        .lock()
        .unwrap()
        .get(base_url)
        .unwrap_or(&UpdateDecision::Accept);
      Ok(UpdateCheckResponse {
        decision,
        reason: None,
      })
    }
  }
}
