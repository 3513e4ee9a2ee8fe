use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{model::error::StorageError, util};

/// Plugin options as the host passes them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    pub key_file_name: PathBuf,
    pub public_bucket: String,
    pub private_bucket: String,
}

impl StorageConfig {
    pub fn from_file(path: &Path) -> Result<Self, StorageError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            StorageError::config(format!("failed to read config at: {}, {}", path.display(), err))
        })?;

        let config: StorageConfig = serde_json::from_str(&raw).map_err(|err| {
            StorageError::config(format!("failed to parse config at: {}, {}", path.display(), err))
        })?;

        config.validate()
    }

    /// Normalizes `gs://` bucket URIs to bare names.
    pub fn validate(self) -> Result<Self, StorageError> {
        if self.key_file_name.as_os_str().is_empty() {
            return Err(StorageError::config("keyFileName is empty"));
        }

        let public_bucket = util::object::parse_bucket_name(&self.public_bucket)?.to_string();
        let private_bucket = util::object::parse_bucket_name(&self.private_bucket)?.to_string();

        Ok(Self {
            key_file_name: self.key_file_name,
            public_bucket,
            private_bucket,
        })
    }
}
