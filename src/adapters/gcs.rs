use std::{fmt, path::Path, sync::Arc};

use async_trait::async_trait;
use futures::StreamExt;
use google_cloud_storage::{
    client::{
        google_cloud_auth::{credentials::CredentialsFile, project, token::DefaultTokenSourceProvider},
        Client, ClientConfig,
    },
    http::{
        objects::{
            delete::DeleteObjectRequest,
            download::Range,
            get::GetObjectRequest,
            upload::{Media, UploadObjectRequest, UploadType},
            Object,
        },
        storage_client::SCOPES,
    },
    sign::{SignBy, SignedURLMethod, SignedURLOptions},
};
use google_cloud_token::{TokenSource, TokenSourceProvider};
use time::OffsetDateTime;
use tokio::{fs::File, sync::OnceCell};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::{
    adapters::ObjectBackend,
    model::{
        error::{BoxError, Operation, StorageError},
        file::{ByteStream, RemoteObject, SignAction, SignOptions, WriteOptions},
    },
    stream::UploadBody,
    util,
};

/// Builds a client for the service account key at `key_file_name`. Only the
/// key file is read here; the OAuth token is fetched by the first call that
/// needs one, and buckets are not checked.
pub async fn connect(key_file_name: &Path) -> Result<Client, StorageError> {
    let credentials = CredentialsFile::new_from_file(key_file_name.to_string_lossy().to_string())
        .await
        .map_err(|err| {
            StorageError::config(format!(
                "failed to read credentials at: {}, {}",
                key_file_name.display(),
                err
            ))
        })?;

    let config = ClientConfig {
        project_id: credentials.project_id.clone(),
        default_google_access_id: credentials.client_email.clone(),
        default_sign_by: credentials
            .private_key
            .clone()
            .map(|key| SignBy::PrivateKey(key.into_bytes())),
        token_source_provider: Some(Box::new(LazyTokenSourceProvider {
            source: Arc::new(LazyTokenSource {
                credentials,
                inner: OnceCell::new(),
            }),
        })),
        ..Default::default()
    };

    Ok(Client::new(config))
}

struct LazyTokenSourceProvider {
    source: Arc<LazyTokenSource>,
}

impl fmt::Debug for LazyTokenSourceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyTokenSourceProvider").finish_non_exhaustive()
    }
}

impl TokenSourceProvider for LazyTokenSourceProvider {
    fn token_source(&self) -> Arc<dyn TokenSource> {
        self.source.clone()
    }
}

/// Exchanges the credentials for a token source on first use and reuses it after.
/// A failed exchange is retried by the next call.
struct LazyTokenSource {
    credentials: CredentialsFile,
    inner: OnceCell<Arc<dyn TokenSource>>,
}

impl fmt::Debug for LazyTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyTokenSource")
            .field("client_email", &self.credentials.client_email)
            .field("initialized", &self.inner.initialized())
            .finish()
    }
}

#[async_trait]
impl TokenSource for LazyTokenSource {
    async fn token(&self) -> Result<String, BoxError> {
        let source = self
            .inner
            .get_or_try_init(|| async {
                info!(client_email = ?self.credentials.client_email, "fetching access token");

                let provider = DefaultTokenSourceProvider::new_with_credentials(
                    project::Config::default().with_scopes(&SCOPES),
                    Box::new(self.credentials.clone()),
                )
                .await?;

                Ok::<_, BoxError>(provider.token_source())
            })
            .await?;

        source.token().await
    }
}

/// Seconds from `now` until `expires`, rounded up so a full week stays a full week.
pub fn expires_in(
    expires: OffsetDateTime,
    now: OffsetDateTime,
) -> Result<std::time::Duration, time::error::ConversionRange> {
    let remaining = expires - now;
    let secs = if remaining.subsec_nanoseconds() > 0 {
        remaining.whole_seconds() + 1
    } else {
        remaining.whole_seconds()
    };

    std::time::Duration::try_from(time::Duration::seconds(secs))
}

/// Streamed writes go out as one request. Gzip needs the object metadata, so it
/// is sent as multipart.
pub fn upload_type(key: &str, options: WriteOptions) -> UploadType {
    if options.resumable {
        warn!(key = key, "resumable uploads are not supported, sending a single request");
    }

    if options.gzip {
        UploadType::Multipart(Box::new(Object {
            name: key.to_string(),
            content_encoding: Some("gzip".to_string()),
            ..Default::default()
        }))
    } else {
        UploadType::Simple(Media::new(key.to_string()))
    }
}

async fn file_body(path: &Path) -> std::io::Result<(ReaderStream<File>, u64)> {
    let file = File::open(path).await?;
    let len = file.metadata().await?.len();

    Ok((ReaderStream::new(file), len))
}

#[async_trait]
impl ObjectBackend for Client {
    async fn upload_file(
        &self,
        bucket: &str,
        path: &Path,
        destination: &str,
    ) -> Result<RemoteObject, StorageError> {
        let (body, len) = file_body(path)
            .await
            .map_err(|err| StorageError::backend(Operation::Upload, destination, err))?;

        let req = UploadObjectRequest {
            bucket: bucket.to_string(),
            ..Default::default()
        };
        let mut media = Media::new(destination.to_string());
        media.content_length = Some(len);

        let obj = self
            .upload_streamed_object(&req, body, &UploadType::Simple(media))
            .await
            .map_err(|err| StorageError::backend(Operation::Upload, destination, err))?;

        Ok(RemoteObject {
            url: ObjectBackend::public_url(self, bucket, &obj.name),
            name: obj.name,
        })
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let req = DeleteObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            ..Default::default()
        };

        self.delete_object(&req)
            .await
            .map_err(|err| StorageError::backend(Operation::Delete, key, err))
    }

    async fn write_stream(
        &self,
        bucket: &str,
        key: &str,
        body: UploadBody,
        options: WriteOptions,
    ) -> Result<RemoteObject, StorageError> {
        let req = UploadObjectRequest {
            bucket: bucket.to_string(),
            ..Default::default()
        };
        let upload_type = upload_type(key, options);

        // a body error aborts the request, so no object is created
        let res = if options.gzip {
            self.upload_streamed_object(&req, util::gzip::GzipStream::new(body), &upload_type)
                .await
        } else {
            self.upload_streamed_object(&req, body, &upload_type).await
        };

        let obj = res.map_err(|err| StorageError::backend(Operation::Write, key, err))?;

        Ok(RemoteObject {
            url: ObjectBackend::public_url(self, bucket, &obj.name),
            name: obj.name,
        })
    }

    async fn read_stream(&self, bucket: &str, key: &str) -> Result<ByteStream, StorageError> {
        let req = GetObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            ..Default::default()
        };

        let stream = self
            .download_streamed_object(&req, &Range::default())
            .await
            .map_err(|err| StorageError::backend(Operation::Read, key, err))?;

        let key = key.to_string();
        Ok(Box::pin(stream.map(move |chunk| {
            chunk.map_err(|err| StorageError::backend(Operation::Read, &key, err))
        })))
    }

    async fn sign_url(
        &self,
        bucket: &str,
        key: &str,
        options: SignOptions,
    ) -> Result<String, StorageError> {
        let expires = expires_in(options.expires, OffsetDateTime::now_utc())
            .map_err(|err| StorageError::backend(Operation::Sign, key, err))?;

        // v4 is the only scheme the client signs with
        let method = match options.action {
            SignAction::Read => SignedURLMethod::GET,
        };

        let opts = SignedURLOptions {
            method,
            expires,
            ..Default::default()
        };

        self.signed_url(bucket, key, None, None, opts)
            .await
            .map_err(|err| StorageError::backend(Operation::Sign, key, err))
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        util::object::public_url(util::object::GCS_PUBLIC_ENDPOINT, bucket, key)
    }
}
