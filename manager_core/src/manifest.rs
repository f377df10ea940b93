//! Template pre-approval manifest (§4.6 step 3). The signing authority that
//! produces this file is out of scope; this module only reads and checks it.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateManifest {
  pub pre_approved: HashSet<String>,
}

impl TemplateManifest {
  pub async fn load(path: &Path) -> anyhow::Result<Self> {
    if !path.is_file() {
      return Ok(TemplateManifest::default());
    }
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&contents)?)
  }

  pub fn is_pre_approved(&self, template: &str) -> bool {
    self.pre_approved.contains(template)
  }
}
