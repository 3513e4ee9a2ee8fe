use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};

use crate::{
    adapters::ObjectBackend,
    model::{
        error::{Operation, StorageError},
        file::{ByteStream, RemoteObject, SignOptions, WriteOptions},
    },
    stream::UploadBody,
    util,
};

pub const MOCK_ENDPOINT: &str = "https://storage.example.com";

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    UploadFile {
        bucket: String,
        path: PathBuf,
        destination: String,
    },
    RemoveObject {
        bucket: String,
        key: String,
    },
    WriteStream {
        bucket: String,
        key: String,
        options: WriteOptions,
    },
    ReadStream {
        bucket: String,
        key: String,
    },
    SignUrl {
        bucket: String,
        key: String,
        options: SignOptions,
    },
}

/// In-memory backend that records every call. Local files are never read;
/// `upload_file` stores an empty object.
#[derive(Default)]
pub struct MockClient {
    calls: Mutex<Vec<Call>>,
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    failures: Mutex<HashMap<Operation, String>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `operation` fail with `message`.
    pub fn fail_next(&self, operation: Operation, message: &str) {
        self.failures
            .lock()
            .expect("failed to acquire `failures` guard")
            .insert(operation, message.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .expect("failed to acquire `calls` guard")
            .clone()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .expect("failed to acquire `objects` guard")
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn insert_object(&self, bucket: &str, key: &str, body: &[u8]) {
        self.objects
            .lock()
            .expect("failed to acquire `objects` guard")
            .insert((bucket.to_string(), key.to_string()), body.to_vec());
    }

    fn record(&self, call: Call) {
        self.calls
            .lock()
            .expect("failed to acquire `calls` guard")
            .push(call);
    }

    fn take_failure(&self, operation: Operation, key: &str) -> Result<(), StorageError> {
        match self
            .failures
            .lock()
            .expect("failed to acquire `failures` guard")
            .remove(&operation)
        {
            Some(message) => Err(StorageError::backend(operation, key, message)),
            None => Ok(()),
        }
    }

    fn not_found(&self, operation: Operation, bucket: &str, key: &str) -> StorageError {
        StorageError::backend(
            operation,
            key,
            format!("No such object: {}/{}", bucket, key),
        )
    }
}

#[async_trait]
impl ObjectBackend for MockClient {
    async fn upload_file(
        &self,
        bucket: &str,
        path: &Path,
        destination: &str,
    ) -> Result<RemoteObject, StorageError> {
        self.record(Call::UploadFile {
            bucket: bucket.to_string(),
            path: path.to_path_buf(),
            destination: destination.to_string(),
        });
        self.take_failure(Operation::Upload, destination)?;

        self.insert_object(bucket, destination, &[]);

        Ok(RemoteObject {
            name: destination.to_string(),
            url: self.public_url(bucket, destination),
        })
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.record(Call::RemoveObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self.take_failure(Operation::Delete, key)?;

        self.objects
            .lock()
            .expect("failed to acquire `objects` guard")
            .remove(&(bucket.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| self.not_found(Operation::Delete, bucket, key))
    }

    async fn write_stream(
        &self,
        bucket: &str,
        key: &str,
        mut body: UploadBody,
        options: WriteOptions,
    ) -> Result<RemoteObject, StorageError> {
        self.record(Call::WriteStream {
            bucket: bucket.to_string(),
            key: key.to_string(),
            options,
        });

        let mut content = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| StorageError::backend(Operation::Write, key, err))?;
            content.extend_from_slice(&chunk);
        }

        // a transport failure is only reported once the caller is done writing
        self.take_failure(Operation::Write, key)?;

        self.insert_object(bucket, key, &content);

        Ok(RemoteObject {
            name: key.to_string(),
            url: self.public_url(bucket, key),
        })
    }

    async fn read_stream(&self, bucket: &str, key: &str) -> Result<ByteStream, StorageError> {
        self.record(Call::ReadStream {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self.take_failure(Operation::Read, key)?;

        let body = self
            .object(bucket, key)
            .ok_or_else(|| self.not_found(Operation::Read, bucket, key))?;

        Ok(Box::pin(stream::iter(vec![Ok::<Bytes, StorageError>(
            Bytes::from(body),
        )])))
    }

    async fn sign_url(
        &self,
        bucket: &str,
        key: &str,
        options: SignOptions,
    ) -> Result<String, StorageError> {
        self.record(Call::SignUrl {
            bucket: bucket.to_string(),
            key: key.to_string(),
            options,
        });
        self.take_failure(Operation::Sign, key)?;

        Ok(format!(
            "{}?X-Goog-Algorithm=GOOG4-RSA-SHA256&X-Goog-Expires={}",
            self.public_url(bucket, key),
            options.expires.unix_timestamp()
        ))
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        util::object::public_url(MOCK_ENDPOINT, bucket, key)
    }
}
