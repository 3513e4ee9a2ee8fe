use std::path::Path;

use async_trait::async_trait;

use crate::{
    model::{
        error::StorageError,
        file::{ByteStream, RemoteObject, SignOptions, WriteOptions},
    },
    stream::UploadBody,
};

pub mod gcs;
pub mod mock;

/// Object storage calls the file service delegates to. Every method is a
/// single attempt; errors come back as `StorageError::Backend` with the
/// backend's own error as source.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn upload_file(
        &self,
        bucket: &str,
        path: &Path,
        destination: &str,
    ) -> Result<RemoteObject, StorageError>;

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// Consumes `body` and finalizes the object only if it ends cleanly. A body
    /// error must leave no object behind.
    async fn write_stream(
        &self,
        bucket: &str,
        key: &str,
        body: UploadBody,
        options: WriteOptions,
    ) -> Result<RemoteObject, StorageError>;

    async fn read_stream(&self, bucket: &str, key: &str) -> Result<ByteStream, StorageError>;

    async fn sign_url(
        &self,
        bucket: &str,
        key: &str,
        options: SignOptions,
    ) -> Result<String, StorageError>;

    fn public_url(&self, bucket: &str, key: &str) -> String;
}
