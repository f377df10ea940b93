//! Reverse-Proxy Reconciler (C5). Regenerates and installs per-host proxy
//! configuration from the live agent inventory. Idempotent: running it twice
//! back-to-back with no intervening registry change produces byte-identical
//! host configs (§8).

use std::sync::Arc;

use indexmap::IndexMap;

use crate::docker::{DockerFacade, REMOTE_SHARED_DIR};
use crate::entities::AgentRecord;
use crate::error::Result;

pub const AGENT_ID_LABEL: &str = "ai.ciris.agents.id";

pub struct ProxyReconciler {
  facade: Arc<DockerFacade>,
  container_name: String,
  config_dir: std::path::PathBuf,
  gui_upstream: Option<String>,
}

impl ProxyReconciler {
  pub fn new(
    facade: Arc<DockerFacade>,
    container_name: String,
    config_dir: std::path::PathBuf,
    gui_upstream: Option<String>,
  ) -> Self {
    ProxyReconciler {
      facade,
      container_name,
      config_dir,
      gui_upstream,
    }
  }

  /// Renders one host's config deterministically: an `upstream` block per
  /// agent (stable-sorted by agent_id) plus `/api/{id}/` and `/agent/{id}/`
  /// location blocks, and a shared GUI upstream if configured.
  pub fn render_host_config(&self, agents: &[AgentRecord]) -> String {
    let mut sorted = agents.to_vec();
    sorted.sort_by(|a, b| a.key.agent_id.cmp(&b.key.agent_id));

    let mut out = String::new();
    out.push_str("# generated; do not edit by hand\n");

    for agent in &sorted {
      out.push_str(&format!(
        "upstream {}_upstream {{\n  server 127.0.0.1:{};\n}}\n\n",
        sanitize_upstream_name(&agent.key.agent_id),
        agent.port
      ));
    }

    if let Some(gui) = &self.gui_upstream {
      out.push_str(&format!("upstream gui_upstream {{\n  server {gui};\n}}\n\n"));
    }

    out.push_str("server {\n  listen 80;\n\n");
    for agent in &sorted {
      let upstream = sanitize_upstream_name(&agent.key.agent_id);
      let id = &agent.key.agent_id;
      out.push_str(&format!(
        "  location /api/{id}/ {{\n    proxy_pass http://{upstream}_upstream/;\n  }}\n\n"
      ));
      out.push_str(&format!(
        "  location /agent/{id}/ {{\n    proxy_pass http://{upstream}_upstream/;\n  }}\n\n"
      ));
    }
    if self.gui_upstream.is_some() {
      out.push_str("  location / {\n    proxy_pass http://gui_upstream/;\n  }\n\n");
    }
    out.push_str("}\n");
    out
  }

  /// Discovers running agents via live container labels on every reachable
  /// host, groups by `host_id`, and installs the rendered config on each.
  /// Returns `Ok(())` only if every reachable host succeeded; a remote
  /// failure trips the circuit breaker (via the facade) and this call
  /// returns an error.
  pub async fn reconcile(&self, registry_snapshot: &[AgentRecord]) -> Result<()> {
    let mut by_host: IndexMap<String, Vec<AgentRecord>> = IndexMap::new();
    for agent in registry_snapshot {
      by_host.entry(agent.key.host_id.clone()).or_default().push(agent.clone());
    }

    let mut first_err = None;
    for (host_id, agents) in &by_host {
      let host = match self.facade.hosts().get(host_id) {
        Some(host) => host,
        None => continue,
      };
      let rendered = self.render_host_config(agents);
      let result = if host.is_local {
        self.apply_local(&rendered).await
      } else {
        self.apply_remote(host_id, &rendered).await
      };
      if let Err(e) = result {
        if first_err.is_none() {
          first_err = Some(e);
        }
      }
    }

    match first_err {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  async fn apply_local(&self, rendered: &str) -> Result<()> {
    tokio::fs::create_dir_all(&self.config_dir).await?;
    let final_path = self.config_dir.join("ciris-routes.conf");
    let tmp_path = self.config_dir.join(".ciris-routes.conf.tmp");
    tokio::fs::write(&tmp_path, rendered).await?;
    tokio::fs::rename(&tmp_path, &final_path).await?;

    let validate = format!(
      "docker exec {} nginx -t",
      self.container_name
    );
    let validated = run_command::async_run_command(&validate).await;
    if !validated.success() {
      return Err(crate::error::Error::Other(anyhow::anyhow!(
        "nginx config validation failed: {}",
        validated.stderr
      )));
    }
    let reload = format!("docker exec {} nginx -s reload", self.container_name);
    let reloaded = run_command::async_run_command(&reload).await;
    if !reloaded.success() {
      return Err(crate::error::Error::Other(anyhow::anyhow!(
        "nginx reload failed: {}",
        reloaded.stderr
      )));
    }
    Ok(())
  }

  async fn apply_remote(&self, host_id: &str, rendered: &str) -> Result<()> {
    self.ensure_remote_shared_dir(host_id).await?;
    let remote_path = format!("{}/ciris-routes.conf", REMOTE_SHARED_DIR);
    let script = format!(
      "cat > {remote_path} << 'CIRIS_EOF'\n{rendered}\nCIRIS_EOF\nnginx -t && nginx -s reload"
    );
    let (exit_code, output) = self
      .facade
      .exec_sh(host_id, &self.container_name, &script)
      .await?;
    if exit_code != 0 {
      return Err(crate::error::Error::Other(anyhow::anyhow!(
        "remote proxy install failed on {host_id} (exit {exit_code}): {output}"
      )));
    }
    Ok(())
  }

  /// §4.5A: ensures the shared directory exists on a remote host before the
  /// first reconcile/materialization against it, at most once per process
  /// lifetime.
  async fn ensure_remote_shared_dir(&self, host_id: &str) -> Result<()> {
    if !self.facade.mark_bootstrapped_once(host_id).await {
      return Ok(());
    }
    let script = format!("mkdir -p {REMOTE_SHARED_DIR}");
    match self.facade.exec_sh(host_id, &self.container_name, &script).await {
      Ok(_) => Ok(()),
      Err(_) => {
        // Proxy container absent or exec failed: fall back to a short-lived
        // helper container bind-mounting the parent directory.
        let env = IndexMap::new();
        let labels = IndexMap::new();
        self
          .facade
          .create_and_start_container(
            host_id,
            crate::docker::RemoteContainerSpec {
              name: "ciris-shared-bootstrap",
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
          .stop_and_remove_container(host_id, "ciris-shared-bootstrap", 1)
          .await
      }
    }
  }
}

fn sanitize_upstream_name(agent_id: &str) -> String {
  agent_id.replace(['-', '.'], "_")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entities::{AgentKey, VersionSlots};

  fn agent(id: &str, port: u16) -> AgentRecord {
    AgentRecord {
      key: AgentKey::new(id, "main"),
      name: id.to_string(),
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

  fn reconciler() -> ProxyReconciler {
    ProxyReconciler::new(
      Arc::new(DockerFacade::new(IndexMap::new())),
      "ciris-proxy".to_string(),
      std::path::PathBuf::from("/tmp/ciris-proxy-test"),
      None,
    )
  }

  #[test]
  fn render_is_deterministic_across_calls() {
    let reconciler = reconciler();
    let agents = vec![agent("b-agent", 8102), agent("a-agent", 8101)];
    let first = reconciler.render_host_config(&agents);
    let second = reconciler.render_host_config(&agents);
    assert_eq!(first, second);
  }

  #[test]
  fn removed_agent_has_no_routes_in_rendered_config() {
    let reconciler = reconciler();
    let rendered = reconciler.render_host_config(&[agent("keep-me", 8101)]);
    assert!(!rendered.contains("/api/removed-agent/"));
    assert!(rendered.contains("/api/keep-me/"));
  }

  #[test]
  fn agent_order_does_not_affect_rendered_bytes() {
    let reconciler = reconciler();
    let in_order = reconciler.render_host_config(&[agent("a", 1), agent("b", 2)]);
    let reversed = reconciler.render_host_config(&[agent("b", 2), agent("a", 1)]);
    assert_eq!(in_order, reversed);
  }
}
