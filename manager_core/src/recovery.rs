//! Crash-Recovery Loop (C7). Restarts agents whose container exited
//! unexpectedly, leaving consensual shutdowns, maintenance-mode agents, and
//! containers still inside their deployment window alone.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::docker::{ContainerState, DockerFacade};
use crate::entities::AgentRecord;
use crate::error::Result;
use crate::lifecycle::LifecycleCoordinator;
use crate::registry::Registry;

pub struct CrashRecoveryLoop {
  config: Arc<ManagerConfig>,
  registry: Arc<Registry>,
  facade: Arc<DockerFacade>,
  lifecycle: Arc<LifecycleCoordinator>,
}

impl CrashRecoveryLoop {
  pub fn new(
    config: Arc<ManagerConfig>,
    registry: Arc<Registry>,
    facade: Arc<DockerFacade>,
    lifecycle: Arc<LifecycleCoordinator>,
  ) -> Self {
    CrashRecoveryLoop {
      config,
      registry,
      facade,
      lifecycle,
    }
  }

  pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(Duration::from_secs(
        self.config.crash_recovery.check_interval_secs,
      ));
      loop {
        tokio::select! {
          _ = shutdown.cancelled() => {
            tracing::info!("crash-recovery loop shutting down");
            break;
          }
          _ = interval.tick() => {
            self.sweep().await;
          }
        }
      }
    })
  }

  /// One full pass over every configured host. Per-agent failures are
  /// logged, never propagated — a single bad container must not stall the
  /// sweep of the rest of the fleet.
  pub async fn sweep(&self) {
    for host_id in self.facade.hosts().keys() {
      if !self.facade.breaker().is_available(host_id).await {
        tracing::debug!("skipping crash-recovery sweep of {host_id}: circuit open");
        continue;
      }
      let agents: Vec<AgentRecord> = self
        .registry
        .list()
        .await
        .into_iter()
        .filter(|record| &record.key.host_id == host_id)
        .collect();
      for record in agents {
        if let Err(e) = self.check_agent(&record).await {
          tracing::warn!(
            "crash-recovery check failed for {}: {e:#}",
            record.key.canonical()
          );
        }
      }
    }
  }

  async fn check_agent(&self, record: &AgentRecord) -> Result<()> {
    if record.do_not_autostart {
      return Ok(());
    }
    let container_name = format!("{}-{}", self.config.container_prefix, record.key.agent_id);
    let inspection = self
      .facade
      .inspect_container(&record.key.host_id, &container_name)
      .await?;
    let Some(inspection) = inspection else {
      // Missing: newly created or already deleted. Nothing to recover.
      return Ok(());
    };
    if inspection.state != ContainerState::Exited {
      return Ok(());
    }
    if inspection.exit_code == Some(0) {
      // Consensual shutdown: the agent asked to stop and we honor it.
      return Ok(());
    }
    if let Some(finished_at) = &inspection.finished_at {
      if within_deployment_window(
        finished_at,
        self.config.crash_recovery.deployment_window_secs,
      ) {
        return Ok(());
      }
    }
    tracing::info!("restarting crashed agent {}", record.key.canonical());
    self.lifecycle.restart(&record.key).await
  }
}

/// True if `finished_at` (an RFC3339 timestamp as reported by Docker) is
/// within `window_secs` of now — i.e. recent enough to plausibly be a
/// deployment-driven stop rather than a genuine crash.
fn within_deployment_window(finished_at: &str, window_secs: u64) -> bool {
  let Ok(finished) = DateTime::parse_from_rfc3339(finished_at) else {
    return false;
  };
  let elapsed = Utc::now().signed_duration_since(finished.with_timezone(&Utc));
  elapsed.num_seconds() >= 0 && (elapsed.num_seconds() as u64) < window_secs
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn recent_stop_is_within_window() {
    let now = Utc::now();
    let ts = now.to_rfc3339();
    assert!(within_deployment_window(&ts, 300));
  }

  #[test]
  fn old_stop_is_outside_window() {
    let old = Utc::now() - chrono::Duration::seconds(600);
    assert!(!within_deployment_window(&old.to_rfc3339(), 300));
  }

  #[test]
  fn unparseable_timestamp_is_not_treated_as_in_window() {
    assert!(!within_deployment_window("not-a-timestamp", 300));
  }
}
