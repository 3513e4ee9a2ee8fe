use std::sync::Arc;

use tracing::{info, span, Instrument, Level};

use crate::{
    adapters::{self, ObjectBackend},
    bucket::Bucket,
    config::StorageConfig,
    model::{error::StorageError, file::Visibility},
};

/// File service backed by a public and a private bucket. Both handles are
/// fixed at construction and shared by every call.
#[derive(Clone)]
pub struct GcsFileService {
    public_bucket: Bucket,
    private_bucket: Bucket,
}

impl GcsFileService {
    pub fn new(backend: Arc<dyn ObjectBackend>, public_bucket: &str, private_bucket: &str) -> Self {
        Self {
            public_bucket: Bucket::new(backend.clone(), public_bucket),
            private_bucket: Bucket::new(backend, private_bucket),
        }
    }

    /// Validates `config` first, so `gs://` bucket names are reduced to bare names.
    pub fn from_config(
        backend: Arc<dyn ObjectBackend>,
        config: &StorageConfig,
    ) -> Result<Self, StorageError> {
        let config = config.clone().validate()?;

        Ok(Self::new(backend, &config.public_bucket, &config.private_bucket))
    }

    /// Validates the config, reads the key file and opens both buckets. Bucket
    /// existence, access and the OAuth exchange are left to the first call.
    pub async fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        let span = span!(Level::INFO, "connect", context = "connect");
        async move {
            info!(
                key_file_name=%config.key_file_name.display(),
                public_bucket=%config.public_bucket,
                private_bucket=%config.private_bucket,
                "called"
            );

            let config = config.clone().validate()?;
            let client = adapters::gcs::connect(&config.key_file_name).await?;

            Self::from_config(Arc::new(client), &config)
        }
        .instrument(span)
        .await
    }

    pub fn public_bucket(&self) -> &Bucket {
        &self.public_bucket
    }

    pub fn private_bucket(&self) -> &Bucket {
        &self.private_bucket
    }

    pub fn bucket(&self, visibility: Visibility) -> &Bucket {
        match visibility {
            Visibility::Public => &self.public_bucket,
            Visibility::Private => &self.private_bucket,
        }
    }
}
