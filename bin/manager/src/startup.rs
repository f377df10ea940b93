//! One-time startup sequence (§4.10 steps 2-4): probe every configured host,
//! cross-check the on-disk agent directories against the registry, and
//! reconcile the reverse-proxy before the control-plane API starts serving.

use crate::state::AppState;

/// Pings every configured host. A failure is logged and otherwise ignored —
/// an unreachable host at boot is not fatal, it simply starts with its
/// circuit breaker already tripped.
pub async fn probe_hosts(state: &AppState) {
  for host_id in state.facade.hosts().keys() {
    match state.facade.ping(host_id).await {
      Ok(()) => tracing::info!("host {host_id} reachable"),
      Err(e) => tracing::warn!("host {host_id} unreachable at startup: {e:#}"),
    }
  }
}

/// Scans `{agents_dir}/*` and reports any subdirectory with no corresponding
/// registry entry. These are left untouched rather than auto-registered —
/// resurrecting a deleted agent's data directory as if it were still current
/// would silently undo a delete.
pub async fn scan_orphaned_directories(state: &AppState) {
  let mut entries = match tokio::fs::read_dir(&state.config.agents_dir).await {
    Ok(entries) => entries,
    Err(e) => {
      tracing::warn!(
        "failed to scan agents directory {}: {e}",
        state.config.agents_dir.display()
      );
      return;
    }
  };

  let known: std::collections::HashSet<String> = state
    .registry
    .list()
    .await
    .into_iter()
    .map(|record| record.key.agent_id)
    .collect();

  loop {
    let entry = match entries.next_entry().await {
      Ok(Some(entry)) => entry,
      Ok(None) => break,
      Err(e) => {
        tracing::warn!("error walking agents directory: {e}");
        break;
      }
    };
    if !entry.path().is_dir() {
      continue;
    }
    let name = entry.file_name().to_string_lossy().to_string();
    if !known.contains(&name) {
      tracing::warn!(
        "agent directory {name} has no registry entry; leaving it untouched"
      );
    }
  }
}

/// Runs the full startup sequence: host probing, the orphan-directory scan,
/// then one reverse-proxy reconcile against the freshly loaded registry (this
/// is also what lazily bootstraps each remote host's shared directory, via
/// the reconciler's own first-touch guard).
pub async fn run(state: &AppState) {
  probe_hosts(state).await;
  scan_orphaned_directories(state).await;

  let snapshot = state.registry.list().await;
  if let Err(e) = state.proxy.reconcile(&snapshot).await {
    tracing::warn!("initial reverse-proxy reconcile failed: {e:#}");
  }
}
