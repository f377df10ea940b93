//! Compose Renderer (C2). Pure function: given an agent's identity, port,
//! template, and overrides, produces a canonical single-service compose
//! document. `IndexMap` keeps every map deterministically ordered so
//! render -> parse -> re-render is byte-identical (§8 testable property).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

const CONTAINER_PORT: u16 = 8080;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Healthcheck {
  pub test: Vec<String>,
  pub interval: String,
  pub timeout: String,
  pub retries: u32,
  pub start_period: String,
}

impl Default for Healthcheck {
  fn default() -> Self {
    Healthcheck {
      test: vec![
        "CMD".into(),
        "curl".into(),
        "-f".into(),
        format!("http://localhost:{CONTAINER_PORT}/v1/system/health"),
      ],
      interval: "30s".into(),
      timeout: "10s".into(),
      retries: 3,
      start_period: "40s".into(),
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
  pub driver: String,
  pub options: IndexMap<String, String>,
}

impl LoggingConfig {
  fn json_file_bounded() -> Self {
    LoggingConfig {
      driver: "json-file".into(),
      options: IndexMap::from([
        ("max-size".to_string(), "10m".to_string()),
        ("max-file".to_string(), "3".to_string()),
      ]),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeService {
  pub container_name: String,
  pub image: String,
  pub ports: Vec<String>,
  pub environment: IndexMap<String, String>,
  pub volumes: Vec<String>,
  pub healthcheck: Healthcheck,
  pub labels: IndexMap<String, String>,
  pub restart: String,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeFile {
  pub services: IndexMap<String, ComposeService>,
}

/// Inputs to a single rendered service. `container_prefix` and `registry`
/// come from the manager config; everything else is per-agent.
#[derive(Debug, Clone)]
pub struct RenderInput<'a> {
  pub agent_id: &'a str,
  pub port: u16,
  pub template: &'a str,
  pub container_prefix: &'a str,
  pub registry: &'a str,
  pub image: &'a str,
  pub api_host: &'a str,
  pub api_port: u16,
  pub oauth_callback_base_url: &'a str,
  pub discord_bot_token_present: bool,
  pub wizard_enabled_adapters: &'a [String],
  pub env_overrides: &'a IndexMap<String, String>,
  pub deployment_group: Option<&'a str>,
  pub agent_dir: &'a str,
  pub shared_oauth_dir: &'a str,
  pub created_at_ms: i64,
  pub billing_enabled: bool,
}

pub fn adapter_channels(input: &RenderInput<'_>) -> Vec<String> {
  let mut channels = vec!["api".to_string()];
  if input.discord_bot_token_present {
    channels.push("discord".to_string());
  }
  for adapter in input.wizard_enabled_adapters {
    if !channels.contains(adapter) {
      channels.push(adapter.clone());
    }
  }
  channels
}

pub fn render(input: &RenderInput<'_>) -> ComposeFile {
  let container_name = format!("{}-{}", input.container_prefix, input.agent_id);

  let mut environment = IndexMap::new();
  environment.insert("AGENT_ID".to_string(), input.agent_id.to_string());
  environment.insert("TEMPLATE".to_string(), input.template.to_string());
  environment.insert("API_HOST".to_string(), input.api_host.to_string());
  environment.insert("API_PORT".to_string(), input.api_port.to_string());
  environment.insert(
    "OAUTH_CALLBACK_BASE_URL".to_string(),
    input.oauth_callback_base_url.to_string(),
  );
  environment.insert(
    "ADAPTER_CHANNELS".to_string(),
    adapter_channels(input).join(","),
  );
  environment.insert(
    "BILLING_ENABLED".to_string(),
    input.billing_enabled.to_string(),
  );
  for (key, value) in input.env_overrides {
    environment.insert(key.clone(), value.clone());
  }

  let volumes = vec![
    format!("{}/data:/app/data", input.agent_dir),
    format!("{}/data_archive:/app/data_archive", input.agent_dir),
    format!("{}/logs:/app/logs", input.agent_dir),
    format!("{}/config:/app/config", input.agent_dir),
    format!("{}/audit_keys:/app/audit_keys", input.agent_dir),
    format!("{}/.secrets:/app/.secrets", input.agent_dir),
    format!("{}:/app/shared/oauth:ro", input.shared_oauth_dir),
    format!(
      "{}/init_permissions.sh:/docker-entrypoint-init.d/init_permissions.sh:ro",
      input.agent_dir
    ),
  ];

  let mut labels = IndexMap::new();
  labels.insert("ai.ciris.agents.id".to_string(), input.agent_id.to_string());
  labels.insert(
    "ai.ciris.agents.template".to_string(),
    input.template.to_string(),
  );
  labels.insert(
    "ai.ciris.agents.created".to_string(),
    input.created_at_ms.to_string(),
  );
  labels.insert(
    "ai.ciris.agents.deployment_group".to_string(),
    input.deployment_group.unwrap_or("general").to_string(),
  );

  let service = ComposeService {
    container_name,
    image: format!("{}/{}", input.registry, input.image),
    ports: vec![format!("{}:{}", input.port, CONTAINER_PORT)],
    environment,
    volumes,
    healthcheck: Healthcheck::default(),
    labels,
    restart: "no".to_string(),
    logging: LoggingConfig::json_file_bounded(),
  };

  let mut services = IndexMap::new();
  services.insert(input.agent_id.to_string(), service);
  ComposeFile { services }
}

pub fn to_yaml(compose: &ComposeFile) -> anyhow::Result<String> {
  Ok(serde_yaml_ng::to_string(compose)?)
}

pub fn from_yaml(yaml: &str) -> anyhow::Result<ComposeFile> {
  Ok(serde_yaml_ng::from_str(yaml)?)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_input() -> RenderInput<'static> {
    RenderInput {
      agent_id: "scout-ab23xy",
      port: 8101,
      template: "scout",
      container_prefix: "ciris-agent",
      registry: "ghcr.io/cirisai",
      image: "ciris-agent:latest",
      api_host: "0.0.0.0",
      api_port: 8080,
      oauth_callback_base_url: "https://agents.ciris.ai",
      discord_bot_token_present: false,
      wizard_enabled_adapters: &[],
      env_overrides: Box::leak(Box::new(IndexMap::new())),
      deployment_group: None,
      agent_dir: "/opt/ciris/agents/scout-ab23xy",
      shared_oauth_dir: "/opt/ciris/shared/oauth",
      created_at_ms: 0,
      billing_enabled: false,
    }
  }

  #[test]
  fn render_parse_render_is_byte_identical() {
    let compose = render(&sample_input());
    let first = to_yaml(&compose).unwrap();
    let parsed = from_yaml(&first).unwrap();
    let second = to_yaml(&parsed).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn discord_channel_included_only_with_token() {
    let mut input = sample_input();
    assert_eq!(adapter_channels(&input), vec!["api"]);
    input.discord_bot_token_present = true;
    assert_eq!(adapter_channels(&input), vec!["api", "discord"]);
  }

  #[test]
  fn unassigned_deployment_group_defaults_to_general() {
    let compose = render(&sample_input());
    let service = &compose.services["scout-ab23xy"];
    assert_eq!(
      service.labels["ai.ciris.agents.deployment_group"],
      "general"
    );
  }

  #[test]
  fn logging_driver_bounds_log_growth() {
    let compose = render(&sample_input());
    let service = &compose.services["scout-ab23xy"];
    assert_eq!(service.logging.driver, "json-file");
    assert_eq!(service.logging.options["max-file"], "3");
  }
}
