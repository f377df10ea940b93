use crate::{Error, Result};

/// Recursively merges `source` into `target`, with `source` taking priority.
/// Objects are merged key-by-key; every other value type (including arrays)
/// is replaced wholesale by the source's value.
pub fn merge_objects(
  mut target: serde_json::Map<String, serde_json::Value>,
  source: serde_json::Map<String, serde_json::Value>,
) -> Result<serde_json::Map<String, serde_json::Value>> {
  for (key, value) in source {
    let Some(curr) = target.remove(&key) else {
      target.insert(key, value);
      continue;
    };
    match curr {
      serde_json::Value::Object(target_obj) => match value {
        serde_json::Value::Object(source_obj) => {
          target.insert(
            key,
            serde_json::Value::Object(merge_objects(target_obj, source_obj)?),
          );
        }
        _ => {
          return Err(Error::ObjectFieldTypeMismatch { key, value });
        }
      },
      _ => {
        target.insert(key, value);
      }
    }
  }
  Ok(target)
}
