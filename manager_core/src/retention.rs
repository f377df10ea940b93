//! Image Retention (C9). Periodic sweep that prunes superseded images on
//! each host while never removing one referenced by a running container.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::docker::{ContainerState, DockerFacade, ImageSummary};
use crate::error::Result;

pub struct ImageRetention {
  config: Arc<ManagerConfig>,
  facade: Arc<DockerFacade>,
}

impl ImageRetention {
  pub fn new(config: Arc<ManagerConfig>, facade: Arc<DockerFacade>) -> Self {
    ImageRetention { config, facade }
  }

  pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(Duration::from_secs(
        self.config.retention.interval_hours * 3600,
      ));
      loop {
        tokio::select! {
          _ = shutdown.cancelled() => {
            tracing::info!("image-retention loop shutting down");
            break;
          }
          _ = interval.tick() => {
            self.sweep().await;
          }
        }
      }
    })
  }

  /// Default target repositories when `retention.target_repos` is empty,
  /// grounded on the reference cleanup job's hardcoded agent/GUI pair — made
  /// configurable here since this manager serves arbitrary templates, not a
  /// single fixed agent image.
  fn target_repos(&self) -> HashSet<String> {
    if !self.config.retention.target_repos.is_empty() {
      return self.config.retention.target_repos.iter().cloned().collect();
    }
    [
      format!("{}/{}", self.config.registry, strip_tag(&self.config.default_image)),
      format!("{}/ciris-gui", self.config.registry),
    ]
    .into_iter()
    .collect()
  }

  pub async fn sweep(&self) {
    let targets = self.target_repos();
    for host_id in self.facade.hosts().keys() {
      if !self.facade.breaker().is_available(host_id).await {
        tracing::debug!("skipping image retention on {host_id}: circuit open");
        continue;
      }
      if let Err(e) = self.sweep_host(host_id, &targets).await {
        tracing::warn!("image retention failed for host {host_id}: {e:#}");
      }
    }
  }

  async fn sweep_host(&self, host_id: &str, targets: &HashSet<String>) -> Result<()> {
    let referenced = self.referenced_images(host_id).await?;
    let images = self.facade.list_images(host_id).await?;

    let mut by_repo: HashMap<String, Vec<ImageSummary>> = HashMap::new();
    for image in images {
      let Some(repo) = repo_for_image(&image) else {
        continue;
      };
      if !targets.contains(&repo) {
        continue;
      }
      by_repo.entry(repo).or_default().push(image);
    }

    let keep_n = self.config.retention.versions_to_keep as usize;
    for (repo, mut images) in by_repo {
      images.sort_by(|a, b| b.created_at.cmp(&a.created_at));
      for (idx, image) in images.iter().enumerate() {
        let in_use = referenced.contains(&image.id)
          || image.repo_tags.iter().any(|tag| referenced.contains(tag));
        if in_use || idx < keep_n {
          continue;
        }
        if let Err(e) = self.facade.remove_image(host_id, &image.id).await {
          tracing::warn!(
            "failed to remove image {} ({repo}) on {host_id}: {e:#}",
            image.id
          );
        }
      }
    }

    if let Err(e) = self.facade.prune_images(host_id).await {
      tracing::warn!("failed to prune dangling images on {host_id}: {e:#}");
    }
    Ok(())
  }

  async fn referenced_images(&self, host_id: &str) -> Result<HashSet<String>> {
    let containers = self.facade.list_containers(host_id, None).await?;
    Ok(
      containers
        .into_iter()
        .filter(|c| c.state == ContainerState::Running)
        .flat_map(|c| [c.image_id, c.image])
        .collect(),
    )
  }
}

fn repo_for_image(image: &ImageSummary) -> Option<String> {
  image.repo_tags.iter().find_map(|tag| {
    if tag == "<none>:<none>" {
      return None;
    }
    tag.rsplit_once(':').map(|(repo, _)| repo.to_string())
  })
}

fn strip_tag(image: &str) -> String {
  image
    .rsplit_once(':')
    .map(|(repo, _)| repo.to_string())
    .unwrap_or_else(|| image.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn image(id: &str, tag: &str, created_at: i64) -> ImageSummary {
    ImageSummary {
      id: id.to_string(),
      repo_tags: vec![tag.to_string()],
      created_at,
    }
  }

  #[test]
  fn repo_for_image_strips_tag() {
    let img = image("sha256:abc", "ghcr.io/cirisai/ciris-agent:1.2.3", 0);
    assert_eq!(
      repo_for_image(&img),
      Some("ghcr.io/cirisai/ciris-agent".to_string())
    );
  }

  #[test]
  fn repo_for_image_ignores_dangling_tag() {
    let img = image("sha256:abc", "<none>:<none>", 0);
    assert_eq!(repo_for_image(&img), None);
  }

  #[test]
  fn strip_tag_handles_bare_repo() {
    assert_eq!(strip_tag("ciris-agent"), "ciris-agent");
    assert_eq!(strip_tag("ciris-agent:latest"), "ciris-agent");
  }

  /// Mirrors testable property #7: within a repo, only images beyond the
  /// top `versions_to_keep` and not currently referenced are dropped.
  #[test]
  fn retention_window_logic_matches_index_and_reference_rule() {
    let images = vec![
      image("sha256:a", "repo:v3", 300),
      image("sha256:b", "repo:v2", 200),
      image("sha256:c", "repo:v1", 100),
      image("sha256:d", "repo:v0", 0),
    ];
    let referenced: HashSet<String> = ["sha256:d".to_string()].into_iter().collect();
    let keep_n = 2usize;
    let kept: Vec<&str> = images
      .iter()
      .enumerate()
      .filter(|(idx, image)| {
        *idx < keep_n || referenced.contains(&image.id)
      })
      .map(|(_, image)| image.id.as_str())
      .collect();
    assert_eq!(kept, vec!["sha256:a", "sha256:b", "sha256:d"]);
  }
}
