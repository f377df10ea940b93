//! # Manager Config
//!
//! Loads the manager's single YAML configuration file, interpolating `${VAR}`
//! references against the process environment and overlaying any environment
//! variables with a matching prefix on top of the file (env wins).
//!
//! This is a narrowed form of the directory-merging config loader used elsewhere
//! in the reference stack: this system has exactly one config file, not a tree of
//! fragments to be merged by priority, so the directory walk / `.include` file /
//! wildcard-matching machinery is not needed here.

use std::path::Path;

use serde::de::DeserializeOwned;

mod error;
mod load;
mod merge;

pub use error::Error;
pub use load::load_with_env_overrides;
pub use merge::merge_objects;

pub type Result<T> = ::core::result::Result<T, Error>;

/// Load `T` from the YAML file at `path`, overlaying environment variables
/// prefixed with `env_prefix` (e.g. `CIRIS_MANAGER_`).
pub fn load<T: DeserializeOwned>(path: &Path, env_prefix: &str) -> Result<T> {
  load_with_env_overrides(path, env_prefix)
}
