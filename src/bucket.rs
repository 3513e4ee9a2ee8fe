use std::{path::Path, sync::Arc};

use tokio::sync::oneshot;
use tracing::{error, Instrument, Span};

use crate::{
    adapters::ObjectBackend,
    model::{
        error::StorageError,
        file::{ByteStream, RemoteObject, SignOptions, UploadResult, WriteOptions},
    },
    stream::{UploadCompletion, UploadWriter},
};

/// A named bucket bound to a backend. Cheap to clone, never mutated.
#[derive(Clone)]
pub struct Bucket {
    backend: Arc<dyn ObjectBackend>,
    name: String,
}

impl Bucket {
    pub fn new(backend: Arc<dyn ObjectBackend>, name: &str) -> Self {
        Self {
            backend,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn upload(&self, path: &Path, destination: &str) -> Result<RemoteObject, StorageError> {
        self.backend.upload_file(&self.name, path, destination).await
    }

    pub fn file(&self, key: &str) -> ObjectHandle {
        ObjectHandle {
            backend: self.backend.clone(),
            bucket: self.name.clone(),
            key: key.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ObjectHandle {
    backend: Arc<dyn ObjectBackend>,
    bucket: String,
    key: String,
}

impl ObjectHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn public_url(&self) -> String {
        self.backend.public_url(&self.bucket, &self.key)
    }

    pub async fn delete(&self) -> Result<(), StorageError> {
        self.backend.remove_object(&self.bucket, &self.key).await
    }

    pub async fn create_read_stream(&self) -> Result<ByteStream, StorageError> {
        self.backend.read_stream(&self.bucket, &self.key).await
    }

    pub async fn signed_url(&self, options: SignOptions) -> Result<String, StorageError> {
        self.backend.sign_url(&self.bucket, &self.key, options).await
    }

    /// Starts the backend upload on a task and hands back its sink and completion.
    /// The task runs in the caller's span. Must be called within a tokio runtime.
    pub fn create_write_stream(&self, options: WriteOptions) -> (UploadWriter, UploadCompletion) {
        let (writer, body) = UploadWriter::channel(&self.key);
        let (done_tx, done_rx) = oneshot::channel();

        let object = self.clone();
        let task = async move {
            let res = object
                .backend
                .write_stream(&object.bucket, &object.key, body, options)
                .await
                .map(|_| UploadResult {
                    url: object.public_url(),
                    key: object.key.clone(),
                });

            if let Err(err) = &res {
                error!(error_message=%err, error_group="write_stream", key=%object.key);
            }

            let _ = done_tx.send(res);
        };
        tokio::spawn(task.instrument(Span::current()));

        (writer, UploadCompletion::new(self.key.clone(), done_rx))
    }
}
