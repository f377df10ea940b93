use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Registry, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioLogMode {
  #[default]
  Standard,
  Json,
  None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
  Error,
  Warn,
  #[default]
  Info,
  Debug,
  Trace,
}

impl From<LogLevel> for tracing::Level {
  fn from(level: LogLevel) -> Self {
    match level {
      LogLevel::Error => tracing::Level::ERROR,
      LogLevel::Warn => tracing::Level::WARN,
      LogLevel::Info => tracing::Level::INFO,
      LogLevel::Debug => tracing::Level::DEBUG,
      LogLevel::Trace => tracing::Level::TRACE,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  pub level: LogLevel,
  pub stdio: StdioLogMode,
  pub pretty: bool,
}

impl Default for LogConfig {
  fn default() -> Self {
    LogConfig {
      level: LogLevel::Info,
      stdio: StdioLogMode::Standard,
      pretty: false,
    }
  }
}

/// Initializes the global `tracing` subscriber. A second call in the same
/// process (e.g. across tests) is logged and ignored rather than treated
/// as fatal.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
  let log_level: tracing::Level = config.level.into();
  let registry = Registry::default().with(LevelFilter::from(log_level));

  let result = match (config.stdio, config.pretty) {
    (StdioLogMode::Standard, true) => registry
      .with(
        tracing_subscriber::fmt::layer()
          .pretty()
          .with_file(false)
          .with_line_number(false),
      )
      .try_init(),
    (StdioLogMode::Standard, false) => registry
      .with(
        tracing_subscriber::fmt::layer()
          .with_file(false)
          .with_line_number(false),
      )
      .try_init(),
    (StdioLogMode::Json, _) => {
      registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    }
    (StdioLogMode::None, _) => Ok(()),
  };

  match result {
    Ok(()) => Ok(()),
    Err(e) => {
      eprintln!("logger already initialized: {e}");
      Ok(())
    }
  }
  .context("failed to init logger")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_is_standard_stdio() {
    let config = LogConfig::default();
    assert_eq!(config.stdio, StdioLogMode::Standard);
    assert!(!config.pretty);
  }

  #[test]
  fn init_does_not_panic_on_repeated_calls() {
    let config = LogConfig {
      stdio: StdioLogMode::Json,
      ..Default::default()
    };
    init(&config).unwrap();
    init(&config).unwrap();
  }
}
