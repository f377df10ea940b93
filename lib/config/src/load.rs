use std::path::Path;

use serde::de::DeserializeOwned;

use crate::{Error, Result, merge::merge_objects};

/// Reads and parses a single YAML config file, interpolating `${VAR}` references
/// against the process environment before parsing.
pub fn load_yaml_file(path: &Path) -> Result<serde_json::Map<String, serde_json::Value>> {
  if !path.is_file() {
    return Err(Error::NotFound {
      path: path.to_path_buf(),
    });
  }
  let contents = std::fs::read_to_string(path).map_err(|e| Error::ReadFileContents {
    e,
    path: path.to_path_buf(),
  })?;
  let contents = interpolate_env(&contents);
  let value: serde_json::Value =
    serde_yaml_ng::from_str(&contents).map_err(|e| Error::ParseYaml {
      e,
      path: path.to_path_buf(),
    })?;
  match value {
    serde_json::Value::Object(map) => Ok(map),
    serde_json::Value::Null => Ok(serde_json::Map::new()),
    _ => Err(Error::NotFound {
      path: path.to_path_buf(),
    }),
  }
}

/// Only supports `${VAR}` syntax, run twice so a variable expanding to
/// another `${VAR}` reference is also resolved.
fn interpolate_env(input: &str) -> String {
  let re = regex::Regex::new(r"\$\{([A-Za-z0-9_]+)\}").unwrap();
  let first_pass = re
    .replace_all(input, |caps: &regex::Captures| {
      std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned();
  re.replace_all(&first_pass, |caps: &regex::Captures| {
    std::env::var(&caps[1]).unwrap_or_default()
  })
  .into_owned()
}

/// Loads a YAML config file, merges in any environment variable overrides matching
/// `prefix` (via `envy`), and parses the result into `T`.
pub fn load_with_env_overrides<T: DeserializeOwned>(path: &Path, env_prefix: &str) -> Result<T> {
  let base = load_yaml_file(path)?;

  let overrides: serde_json::Map<String, serde_json::Value> = envy::prefixed(env_prefix)
    .from_env::<serde_json::Map<String, serde_json::Value>>()
    .unwrap_or_default();

  let merged = merge_objects(base, overrides)?;
  serde_json::from_value(serde_json::Value::Object(merged))
    .map_err(|e| Error::ParseFinalJson { e })
}
