//! Multi-Host Docker Facade (C3). One cached client per configured host,
//! local-socket or remote-TLS, guarded by a process-wide circuit breaker so a
//! dead remote host cannot block the crash-recovery loop or the reconciler.

mod circuit_breaker;

pub use circuit_breaker::CircuitBreaker;

use std::collections::HashMap;

use bollard::Docker;
use bollard::query_parameters::{
  CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
  ListImagesOptions, RemoveContainerOptions, RemoveImageOptions,
  StartContainerOptions, StopContainerOptions,
};
use bollard::secret::{
  ContainerCreateBody, HostConfig as BollardHostConfig, PortBinding,
  RestartPolicy, RestartPolicyNameEnum,
};
use indexmap::IndexMap;
use tokio::sync::Mutex;

use crate::entities::HostConfig;
use crate::error::{Error, Result};

const REMOTE_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const REMOTE_SHARED_DIR: &str = "/shared";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
  Running,
  Exited,
  Created,
  Paused,
  Restarting,
  Removing,
  Dead,
  Unknown,
}

impl ContainerState {
  fn parse(state: &str) -> Self {
    match state {
      "running" => ContainerState::Running,
      "exited" => ContainerState::Exited,
      "created" => ContainerState::Created,
      "paused" => ContainerState::Paused,
      "restarting" => ContainerState::Restarting,
      "removing" => ContainerState::Removing,
      "dead" => ContainerState::Dead,
      _ => ContainerState::Unknown,
    }
  }
}

#[derive(Debug, Clone)]
pub struct ContainerSummary {
  pub id: String,
  pub name: String,
  pub image: String,
  pub image_id: String,
  pub state: ContainerState,
  pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ContainerInspection {
  pub state: ContainerState,
  pub exit_code: Option<i64>,
  pub finished_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImageSummary {
  pub id: String,
  pub repo_tags: Vec<String>,
  pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct RemoteContainerSpec<'a> {
  pub name: &'a str,
  pub image: &'a str,
  pub env: &'a IndexMap<String, String>,
  /// `(host_path, container_path, read_only)`.
  pub binds: &'a [(String, String, bool)],
  /// `(host_port, container_port)`.
  pub port_bindings: &'a [(u16, u16)],
  pub labels: &'a IndexMap<String, String>,
}

/// Per-host Docker client cache plus circuit breaker.
pub struct DockerFacade {
  hosts: IndexMap<String, HostConfig>,
  clients: Mutex<HashMap<String, Docker>>,
  breaker: CircuitBreaker,
  bootstrapped_hosts: Mutex<std::collections::HashSet<String>>,
}

impl DockerFacade {
  pub fn new(hosts: IndexMap<String, HostConfig>) -> Self {
    DockerFacade {
      hosts,
      clients: Mutex::new(HashMap::new()),
      breaker: CircuitBreaker::default(),
      bootstrapped_hosts: Mutex::new(std::collections::HashSet::new()),
    }
  }

  pub fn hosts(&self) -> &IndexMap<String, HostConfig> {
    &self.hosts
  }

  pub fn breaker(&self) -> &CircuitBreaker {
    &self.breaker
  }

  /// True the first time this host's shared bootstrap runs this process
  /// lifetime (and records it) — callers use this to skip the §4.5A
  /// directory-bootstrap dance on every reconcile.
  pub async fn mark_bootstrapped_once(&self, host_id: &str) -> bool {
    let mut done = self.bootstrapped_hosts.lock().await;
    done.insert(host_id.to_string())
  }

  async fn connect(&self, host: &HostConfig) -> anyhow::Result<Docker> {
    if host.is_local {
      return Ok(Docker::connect_with_local_defaults()?);
    }
    let addr = host.docker_host.as_deref().ok_or_else(|| {
      anyhow::anyhow!("remote host {} has no docker_host set", host.host_id)
    })?;
    match (&host.tls_ca, &host.tls_cert, &host.tls_key) {
      (Some(ca), Some(cert), Some(key)) => Ok(Docker::connect_with_ssl(
        addr,
        std::path::Path::new(key),
        std::path::Path::new(cert),
        std::path::Path::new(ca),
        REMOTE_CONNECT_TIMEOUT_SECS,
        bollard::API_DEFAULT_VERSION,
      )?),
      _ => Ok(Docker::connect_with_http(
        addr,
        REMOTE_CONNECT_TIMEOUT_SECS,
        bollard::API_DEFAULT_VERSION,
      )?),
    }
  }

  /// Refuses to construct a client while the breaker for `host_id` is open.
  pub async fn get_client(&self, host_id: &str) -> Result<Docker> {
    if !self.breaker.is_available(host_id).await {
      let message = self
        .breaker
        .last_error(host_id)
        .await
        .unwrap_or_else(|| "circuit open".to_string());
      return Err(Error::HostUnreachable {
        host_id: host_id.to_string(),
        source: anyhow::anyhow!(message),
      });
    }
    {
      let clients = self.clients.lock().await;
      if let Some(client) = clients.get(host_id) {
        return Ok(client.clone());
      }
    }
    let host = self
      .hosts
      .get(host_id)
      .ok_or_else(|| Error::Validation(format!("unknown host_id {host_id}")))?;
    match self.connect(host).await {
      Ok(client) => {
        self
          .clients
          .lock()
          .await
          .insert(host_id.to_string(), client.clone());
        self.breaker.mark_healthy(host_id).await;
        Ok(client)
      }
      Err(e) => {
        self.breaker.mark_failed(host_id, e.to_string()).await;
        Err(Error::HostUnreachable {
          host_id: host_id.to_string(),
          source: e,
        })
      }
    }
  }

  /// Records a bollard-level failure against the breaker and wraps it as a
  /// facade error. Call sites `.await` this directly in their error arm
  /// rather than inside a synchronous `map_err`.
  async fn fail(&self, host_id: &str, e: impl std::fmt::Display) -> Error {
    self.breaker.mark_failed(host_id, e.to_string()).await;
    Error::HostUnreachable {
      host_id: host_id.to_string(),
      source: anyhow::anyhow!(e.to_string()),
    }
  }

  pub async fn ping(&self, host_id: &str) -> Result<()> {
    let client = self.get_client(host_id).await?;
    match client.ping().await {
      Ok(_) => {
        self.breaker.mark_healthy(host_id).await;
        Ok(())
      }
      Err(e) => Err(self.fail(host_id, e).await),
    }
  }

  pub async fn list_containers(
    &self,
    host_id: &str,
    label_filter: Option<(&str, &str)>,
  ) -> Result<Vec<ContainerSummary>> {
    let client = self.get_client(host_id).await?;
    let mut filters = HashMap::new();
    if let Some((key, value)) = label_filter {
      filters.insert("label".to_string(), vec![format!("{key}={value}")]);
    }
    let containers = match client
      .list_containers(Some(ListContainersOptions {
        all: true,
        filters: if filters.is_empty() { None } else { Some(filters) },
        ..Default::default()
      }))
      .await
    {
      Ok(containers) => containers,
      Err(e) => return Err(self.fail(host_id, e).await),
    };
    self.breaker.mark_healthy(host_id).await;
    Ok(
      containers
        .into_iter()
        .map(|c| ContainerSummary {
          id: c.id.unwrap_or_default(),
          name: c
            .names
            .unwrap_or_default()
            .into_iter()
            .next()
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
          image: c.image.unwrap_or_default(),
          image_id: c.image_id.unwrap_or_default(),
          state: c
            .state
            .map(|s| ContainerState::parse(&format!("{s:?}").to_lowercase()))
            .unwrap_or(ContainerState::Unknown),
          labels: c.labels.unwrap_or_default(),
        })
        .collect(),
    )
  }

  pub async fn inspect_container(
    &self,
    host_id: &str,
    container_name: &str,
  ) -> Result<Option<ContainerInspection>> {
    let client = self.get_client(host_id).await?;
    match client
      .inspect_container(container_name, None::<InspectContainerOptions>)
      .await
    {
      Ok(inspected) => {
        self.breaker.mark_healthy(host_id).await;
        let state = inspected.state.unwrap_or_default();
        Ok(Some(ContainerInspection {
          state: state
            .status
            .map(|s| ContainerState::parse(&format!("{s:?}").to_lowercase()))
            .unwrap_or(ContainerState::Unknown),
          exit_code: state.exit_code,
          finished_at: state.finished_at,
        }))
      }
      Err(bollard::errors::Error::DockerResponseServerError {
        status_code: 404,
        ..
      }) => Ok(None),
      Err(e) => Err(self.fail(host_id, e).await),
    }
  }

  pub async fn stop_and_remove_container(
    &self,
    host_id: &str,
    container_name: &str,
    timeout_secs: i32,
  ) -> Result<()> {
    let client = self.get_client(host_id).await?;
    let _ = client
      .stop_container(
        container_name,
        Some(StopContainerOptions {
          t: Some(timeout_secs),
          ..Default::default()
        }),
      )
      .await;
    if let Err(e) = client
      .remove_container(
        container_name,
        Some(RemoveContainerOptions {
          v: true,
          force: true,
          ..Default::default()
        }),
      )
      .await
    {
      return Err(self.fail(host_id, e).await);
    }
    self.breaker.mark_healthy(host_id).await;
    Ok(())
  }

  /// Remote start dispatch (§4.6): create + start a container from a parsed
  /// compose service's translated arguments.
  pub async fn create_and_start_container(
    &self,
    host_id: &str,
    spec: RemoteContainerSpec<'_>,
  ) -> Result<()> {
    let client = self.get_client(host_id).await?;

    let env: Vec<String> =
      spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

    let binds: Vec<String> = spec
      .binds
      .iter()
      .map(|(host, container, ro)| {
        if *ro {
          format!("{host}:{container}:ro")
        } else {
          format!("{host}:{container}")
        }
      })
      .collect();

    let mut port_bindings = HashMap::new();
    let mut exposed_ports = HashMap::new();
    for (host_port, container_port) in spec.port_bindings {
      let key = format!("{container_port}/tcp");
      port_bindings.insert(
        key.clone(),
        Some(vec![PortBinding {
          host_ip: None,
          host_port: Some(host_port.to_string()),
        }]),
      );
      exposed_ports.insert(key, HashMap::new());
    }

    let host_config = BollardHostConfig {
      binds: Some(binds),
      port_bindings: Some(port_bindings),
      restart_policy: Some(RestartPolicy {
        name: Some(RestartPolicyNameEnum::NO),
        maximum_retry_count: None,
      }),
      ..Default::default()
    };

    let body = ContainerCreateBody {
      image: Some(spec.image.to_string()),
      env: Some(env),
      labels: Some(
        spec.labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
      ),
      exposed_ports: Some(exposed_ports),
      host_config: Some(host_config),
      ..Default::default()
    };

    if let Err(e) = client
      .create_container(
        Some(CreateContainerOptions {
          name: Some(spec.name.to_string()),
          ..Default::default()
        }),
        body,
      )
      .await
    {
      return Err(self.fail(host_id, e).await);
    }

    if let Err(e) = client
      .start_container(spec.name, None::<StartContainerOptions>)
      .await
    {
      return Err(self.fail(host_id, e).await);
    }

    self.breaker.mark_healthy(host_id).await;
    Ok(())
  }

  /// Execs `sh -c script` inside a running container on `host_id` — used by
  /// the reverse-proxy reconciler's remote install path and the §4.5A shared
  /// bootstrap.
  pub async fn exec_sh(
    &self,
    host_id: &str,
    container_name: &str,
    script: &str,
  ) -> Result<(i64, String)> {
    use bollard::exec::{CreateExecOptions, StartExecResults};
    use futures_util::StreamExt;

    let client = self.get_client(host_id).await?;
    let exec = match client
      .create_exec(
        container_name,
        CreateExecOptions {
          cmd: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
          ]),
          attach_stdout: Some(true),
          attach_stderr: Some(true),
          ..Default::default()
        },
      )
      .await
    {
      Ok(exec) => exec,
      Err(e) => return Err(self.fail(host_id, e).await),
    };

    let mut output = String::new();
    match client.start_exec(&exec.id, None).await {
      Ok(StartExecResults::Attached { mut output: stream, .. }) => {
        while let Some(Ok(chunk)) = stream.next().await {
          output.push_str(&chunk.to_string());
        }
      }
      Ok(StartExecResults::Detached) => {}
      Err(e) => return Err(self.fail(host_id, e).await),
    }

    let inspected = match client.inspect_exec(&exec.id).await {
      Ok(inspected) => inspected,
      Err(e) => return Err(self.fail(host_id, e).await),
    };
    self.breaker.mark_healthy(host_id).await;
    Ok((inspected.exit_code.unwrap_or(-1), output))
  }

  pub async fn list_images(&self, host_id: &str) -> Result<Vec<ImageSummary>> {
    let client = self.get_client(host_id).await?;
    let images = match client
      .list_images(Some(ListImagesOptions {
        all: false,
        ..Default::default()
      }))
      .await
    {
      Ok(images) => images,
      Err(e) => return Err(self.fail(host_id, e).await),
    };
    self.breaker.mark_healthy(host_id).await;
    Ok(
      images
        .into_iter()
        .map(|i| ImageSummary {
          id: i.id,
          repo_tags: i.repo_tags,
          created_at: i.created,
        })
        .collect(),
    )
  }

  pub async fn remove_image(&self, host_id: &str, image_id: &str) -> Result<()> {
    let client = self.get_client(host_id).await?;
    if let Err(e) = client
      .remove_image(image_id, None::<RemoveImageOptions>, None)
      .await
    {
      return Err(self.fail(host_id, e).await);
    }
    self.breaker.mark_healthy(host_id).await;
    Ok(())
  }

  pub async fn prune_images(&self, host_id: &str) -> Result<()> {
    let client = self.get_client(host_id).await?;
    if let Err(e) = client.prune_images(None).await {
      return Err(self.fail(host_id, e).await);
    }
    self.breaker.mark_healthy(host_id).await;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn container_state_parses_known_strings() {
    assert_eq!(ContainerState::parse("running"), ContainerState::Running);
    assert_eq!(ContainerState::parse("exited"), ContainerState::Exited);
    assert_eq!(ContainerState::parse("bogus"), ContainerState::Unknown);
  }
}
