/// Error taxonomy for the manager core. Background loops (crash-recovery,
/// retention) log and swallow per-item errors rather than propagating these;
/// synchronous API calls surface the first hard error to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("permission denied: {0}")]
  Permission(String),

  #[error("host {host_id} unreachable: {source:#}")]
  HostUnreachable {
    host_id: String,
    #[source]
    source: anyhow::Error,
  },

  #[error("container operation failed on {host_id}/{container}: {source:#}")]
  ContainerOp {
    host_id: String,
    container: String,
    #[source]
    source: anyhow::Error,
  },

  #[error("agent {agent_id} protocol failure: {reason}")]
  AgentProtocol { agent_id: String, reason: String },

  #[error("registry corrupted: {0}")]
  RegistryCorruption(String),

  #[error(
    "exhausted {attempts} attempts generating a unique agent id for \"{base}\""
  )]
  IdentityExhausted { base: String, attempts: u32 },

  #[error("agent {0} not found")]
  NotFound(String),

  #[error("port range exhausted ({start}-{end})")]
  PortsExhausted { start: u16, end: u16 },

  #[error(transparent)]
  Other(#[from] anyhow::Error),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Json(#[from] serde_json::Error),
}

pub type Result<T> = ::core::result::Result<T, Error>;
