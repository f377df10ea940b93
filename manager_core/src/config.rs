//! Manager configuration (§6 "Configuration file"). A single YAML file
//! loaded through [`config::load`], env-overlaid with the `CIRIS_MANAGER_`
//! prefix.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use logger::LogConfig;
use serde::{Deserialize, Serialize};

use crate::entities::HostConfig;
use crate::ports::PortAllocatorConfig;

fn default_agents_dir() -> PathBuf {
  PathBuf::from("/opt/ciris/agents")
}
fn default_templates_dir() -> PathBuf {
  PathBuf::from("/opt/ciris/templates")
}
fn default_manifest_path() -> PathBuf {
  PathBuf::from("/opt/ciris/templates/manifest.json")
}
fn default_registry() -> String {
  "ghcr.io/cirisai".to_string()
}
fn default_image() -> String {
  "ciris-agent:latest".to_string()
}
fn default_port_start() -> u16 {
  8080
}
fn default_port_end() -> u16 {
  8200
}
fn default_reserved_ports() -> HashSet<u16> {
  [80u16, 443, 3000, 8888].into_iter().collect()
}
fn default_crash_check_interval_secs() -> u64 {
  30
}
fn default_deployment_window_secs() -> u64 {
  300
}
fn default_retention_interval_hours() -> u64 {
  24
}
fn default_versions_to_keep() -> u32 {
  3
}
fn default_bind_ip() -> String {
  "0.0.0.0".to_string()
}
fn default_control_plane_port() -> u16 {
  8888
}
fn default_container_prefix() -> String {
  "ciris-agent".to_string()
}
fn default_proxy_container_name() -> String {
  "ciris-proxy".to_string()
}
fn default_proxy_config_dir() -> PathBuf {
  PathBuf::from("/etc/nginx/conf.d")
}
fn default_stability_minutes() -> f64 {
  5.0
}
fn default_wait_for_work_minutes() -> f64 {
  20.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRangeConfig {
  #[serde(rename = "start")]
  pub start: u16,
  pub end: u16,
  pub reserved: HashSet<u16>,
}

impl Default for PortRangeConfig {
  fn default() -> Self {
    PortRangeConfig {
      start: default_port_start(),
      end: default_port_end(),
      reserved: default_reserved_ports(),
    }
  }
}

impl From<PortRangeConfig> for PortAllocatorConfig {
  fn from(config: PortRangeConfig) -> Self {
    PortAllocatorConfig {
      start: config.start,
      end: config.end,
      reserved: config.reserved,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverseProxyConfig {
  pub enabled: bool,
  pub config_dir: PathBuf,
  pub container_name: String,
}

impl Default for ReverseProxyConfig {
  fn default() -> Self {
    ReverseProxyConfig {
      enabled: true,
      config_dir: default_proxy_config_dir(),
      container_name: default_proxy_container_name(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
  pub versions_to_keep: u32,
  pub interval_hours: u64,
  pub target_repos: Vec<String>,
}

impl Default for RetentionConfig {
  fn default() -> Self {
    RetentionConfig {
      versions_to_keep: default_versions_to_keep(),
      interval_hours: default_retention_interval_hours(),
      target_repos: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashRecoveryConfig {
  pub check_interval_secs: u64,
  pub deployment_window_secs: u64,
}

impl Default for CrashRecoveryConfig {
  fn default() -> Self {
    CrashRecoveryConfig {
      check_interval_secs: default_crash_check_interval_secs(),
      deployment_window_secs: default_deployment_window_secs(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
  pub bind_ip: String,
  pub port: u16,
}

impl Default for ControlPlaneConfig {
  fn default() -> Self {
    ControlPlaneConfig {
      bind_ip: default_bind_ip(),
      port: default_control_plane_port(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryConfig {
  pub stability_minutes: f64,
  pub wait_for_work_minutes: f64,
}

impl Default for CanaryConfig {
  fn default() -> Self {
    CanaryConfig {
      stability_minutes: default_stability_minutes(),
      wait_for_work_minutes: default_wait_for_work_minutes(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
  pub agents_dir: PathBuf,
  pub templates_dir: PathBuf,
  pub manifest_path: PathBuf,
  pub ports: PortRangeConfig,
  pub registry: String,
  pub default_image: String,
  pub container_prefix: String,
  pub reverse_proxy: ReverseProxyConfig,
  pub retention: RetentionConfig,
  pub crash_recovery: CrashRecoveryConfig,
  pub canary: CanaryConfig,
  pub logging: LogConfig,
  pub control_plane: ControlPlaneConfig,
  /// Base64-encoded 32-byte key used to derive the token-at-rest AEAD key
  /// (C12). Generated once at first startup if absent and persisted back to
  /// this file's directory as `install_secret`, treating the config
  /// directory as the source of install-time state.
  pub install_secret: Option<String>,
  pub servers: Vec<HostConfig>,
}

impl Default for ManagerConfig {
  fn default() -> Self {
    ManagerConfig {
      agents_dir: default_agents_dir(),
      templates_dir: default_templates_dir(),
      manifest_path: default_manifest_path(),
      ports: PortRangeConfig::default(),
      registry: default_registry(),
      default_image: default_image(),
      container_prefix: default_container_prefix(),
      reverse_proxy: ReverseProxyConfig::default(),
      retention: RetentionConfig::default(),
      crash_recovery: CrashRecoveryConfig::default(),
      canary: CanaryConfig::default(),
      logging: LogConfig::default(),
      control_plane: ControlPlaneConfig::default(),
      install_secret: None,
      servers: Vec::new(),
    }
  }
}

impl ManagerConfig {
  pub fn load(path: &Path) -> config::Result<Self> {
    config::load(path, "CIRIS_MANAGER_")
  }

  pub fn hosts_by_id(&self) -> IndexMap<String, HostConfig> {
    self
      .servers
      .iter()
      .cloned()
      .map(|host| (host.host_id.clone(), host))
      .collect()
  }

  pub fn local_host_id(&self) -> Option<&str> {
    self
      .servers
      .iter()
      .find(|host| host.is_local)
      .map(|host| host.host_id.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_port_range_matches_reference_defaults() {
    let config = ManagerConfig::default();
    assert_eq!(config.ports.start, 8080);
    assert_eq!(config.ports.end, 8200);
    assert!(config.ports.reserved.contains(&8888));
  }
}
