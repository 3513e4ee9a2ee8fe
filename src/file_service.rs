use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{error, info, span, Instrument, Level};

use crate::{
    model::{
        error::StorageError,
        file::{
            ByteStream, DeleteRequest, GetFileRequest, SignOptions, UploadInput, UploadResult,
            UploadStreamRequest, WriteOptions,
        },
    },
    service::GcsFileService,
    stream::UploadStreamDescriptor,
};

/// Streamed uploads go out in one request, gzip-compressed.
pub const STREAM_WRITE_OPTIONS: WriteOptions = WriteOptions {
    resumable: false,
    gzip: true,
};

/// The file lifecycle operations the host platform calls into.
///
/// Operations that take `is_private` target the private bucket when it is left out.
#[async_trait]
pub trait FileService: Send + Sync {
    /// Stores a local file in the public bucket under its original name.
    async fn upload(&self, file: &UploadInput) -> Result<UploadResult, StorageError>;

    /// Stores a local file in the private bucket under its original name.
    async fn upload_protected(&self, file: &UploadInput) -> Result<UploadResult, StorageError>;

    /// Removes an object from the public bucket. A missing object is an error.
    async fn delete(&self, req: &DeleteRequest) -> Result<(), StorageError>;

    /// Opens a streamed upload to `name.ext`. Returns as soon as the sink is
    /// ready; errors during the transfer surface on the descriptor's completion.
    async fn get_upload_stream_descriptor(
        &self,
        req: &UploadStreamRequest,
    ) -> Result<UploadStreamDescriptor, StorageError>;

    async fn get_download_stream(&self, req: &GetFileRequest) -> Result<ByteStream, StorageError>;

    /// Signed read URL, valid for seven days.
    async fn get_presigned_download_url(&self, req: &GetFileRequest)
        -> Result<String, StorageError>;
}

#[async_trait]
impl FileService for GcsFileService {
    async fn upload(&self, file: &UploadInput) -> Result<UploadResult, StorageError> {
        let span = span!(Level::INFO, "upload", context = "upload");
        async move {
            info!(path=%file.path.display(), key=%file.original_name, "called");

            let obj = self
                .public_bucket()
                .upload(&file.path, &file.original_name)
                .await
                .inspect_err(|err| error!(error_message=%err, error_group="upload"))?;

            Ok::<_, StorageError>(UploadResult {
                url: obj.url,
                key: obj.name,
            })
        }
        .instrument(span)
        .await
    }

    async fn upload_protected(&self, file: &UploadInput) -> Result<UploadResult, StorageError> {
        let span = span!(Level::INFO, "upload_protected", context = "upload_protected");
        async move {
            info!(path=%file.path.display(), key=%file.original_name, "called");

            let obj = self
                .private_bucket()
                .upload(&file.path, &file.original_name)
                .await
                .inspect_err(|err| error!(error_message=%err, error_group="upload_protected"))?;

            Ok::<_, StorageError>(UploadResult {
                url: obj.url,
                key: obj.name,
            })
        }
        .instrument(span)
        .await
    }

    async fn delete(&self, req: &DeleteRequest) -> Result<(), StorageError> {
        let span = span!(Level::INFO, "delete", context = "delete");
        async move {
            info!(key=%req.file_key, "called");

            self.public_bucket()
                .file(&req.file_key)
                .delete()
                .await
                .inspect_err(|err| error!(error_message=%err, error_group="delete"))
        }
        .instrument(span)
        .await
    }

    async fn get_upload_stream_descriptor(
        &self,
        req: &UploadStreamRequest,
    ) -> Result<UploadStreamDescriptor, StorageError> {
        let span = span!(
            Level::INFO,
            "get_upload_stream_descriptor",
            context = "get_upload_stream_descriptor"
        );
        async move {
            let file_key = req.file_key();
            let bucket = self.bucket(req.visibility());
            info!(bucket=%bucket.name(), key=%file_key, "called");

            let object = bucket.file(&file_key);
            let (write_stream, completion) = object.create_write_stream(STREAM_WRITE_OPTIONS);

            Ok::<_, StorageError>(UploadStreamDescriptor {
                write_stream,
                completion,
                url: object.public_url(),
                file_key,
            })
        }
        .instrument(span)
        .await
    }

    async fn get_download_stream(&self, req: &GetFileRequest) -> Result<ByteStream, StorageError> {
        let span = span!(Level::INFO, "get_download_stream", context = "get_download_stream");
        async move {
            let bucket = self.bucket(req.visibility());
            info!(bucket=%bucket.name(), key=%req.file_key, "called");

            bucket
                .file(&req.file_key)
                .create_read_stream()
                .await
                .inspect_err(|err| error!(error_message=%err, error_group="get_download_stream"))
        }
        .instrument(span)
        .await
    }

    async fn get_presigned_download_url(
        &self,
        req: &GetFileRequest,
    ) -> Result<String, StorageError> {
        let span = span!(
            Level::INFO,
            "get_presigned_download_url",
            context = "get_presigned_download_url"
        );
        async move {
            let bucket = self.bucket(req.visibility());
            info!(bucket=%bucket.name(), key=%req.file_key, "called");

            bucket
                .file(&req.file_key)
                .signed_url(SignOptions::read_from(OffsetDateTime::now_utc()))
                .await
                .inspect_err(|err| {
                    error!(error_message=%err, error_group="get_presigned_download_url")
                })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        error::Error,
        io,
        path::PathBuf,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use futures::{FutureExt, StreamExt};

    use super::*;
    use crate::{
        adapters::mock::{Call, MockClient},
        model::{error::Operation, file::SignAction, file::SignVersion},
    };

    const PUBLIC: &str = "public-bucket";
    const PRIVATE: &str = "private-bucket";

    fn setup() -> (Arc<MockClient>, GcsFileService) {
        let client = Arc::new(MockClient::new());
        let fs = GcsFileService::new(client.clone(), PUBLIC, PRIVATE);
        (client, fs)
    }

    fn file_data() -> UploadInput {
        UploadInput {
            path: PathBuf::from("/path/to/file"),
            original_name: "file.txt".to_string(),
        }
    }

    fn get_file(is_private: Option<bool>) -> GetFileRequest {
        GetFileRequest {
            file_key: "file.txt".to_string(),
            is_private,
        }
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        stream
            .map(|chunk| chunk.unwrap().to_vec())
            .concat()
            .await
    }

    #[tokio::test]
    async fn test_upload() {
        let (client, fs) = setup();

        let res = fs.upload(&file_data()).await.unwrap();

        assert_eq!(
            res,
            UploadResult {
                url: "https://storage.example.com/public-bucket/file.txt".to_string(),
                key: "file.txt".to_string(),
            }
        );
        assert_eq!(
            client.calls(),
            vec![Call::UploadFile {
                bucket: PUBLIC.to_string(),
                path: PathBuf::from("/path/to/file"),
                destination: "file.txt".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_upload_failure_passes_through() {
        let (client, fs) = setup();
        client.fail_next(Operation::Upload, "Upload failed");

        let err = fs.upload(&file_data()).await.unwrap_err();

        assert_eq!(err.operation(), Some(Operation::Upload));
        assert_eq!(err.source().unwrap().to_string(), "Upload failed");
    }

    #[tokio::test]
    async fn test_upload_protected() {
        let (client, fs) = setup();

        let res = fs.upload_protected(&file_data()).await.unwrap();

        assert_eq!(
            res,
            UploadResult {
                url: "https://storage.example.com/private-bucket/file.txt".to_string(),
                key: "file.txt".to_string(),
            }
        );
        assert_eq!(
            client.calls(),
            vec![Call::UploadFile {
                bucket: PRIVATE.to_string(),
                path: PathBuf::from("/path/to/file"),
                destination: "file.txt".to_string(),
            }]
        );
        assert!(client.object(PUBLIC, "file.txt").is_none());
    }

    #[tokio::test]
    async fn test_upload_protected_failure_passes_through() {
        let (client, fs) = setup();
        client.fail_next(Operation::Upload, "Upload failed");

        let err = fs.upload_protected(&file_data()).await.unwrap_err();

        assert_eq!(err.source().unwrap().to_string(), "Upload failed");
    }

    #[tokio::test]
    async fn test_delete() {
        let (client, fs) = setup();
        client.insert_object(PUBLIC, "file.txt", b"abc");
        client.insert_object(PRIVATE, "file.txt", b"abc");

        fs.delete(&DeleteRequest {
            file_key: "file.txt".to_string(),
        })
        .await
        .unwrap();

        assert_eq!(
            client.calls(),
            vec![Call::RemoveObject {
                bucket: PUBLIC.to_string(),
                key: "file.txt".to_string(),
            }]
        );
        assert!(client.object(PUBLIC, "file.txt").is_none());
        assert!(client.object(PRIVATE, "file.txt").is_some());
    }

    #[tokio::test]
    async fn test_delete_failure_passes_through() {
        let (client, fs) = setup();
        client.insert_object(PUBLIC, "file.txt", b"abc");
        client.fail_next(Operation::Delete, "Delete failed");

        let err = fs
            .delete(&DeleteRequest {
                file_key: "file.txt".to_string(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.operation(), Some(Operation::Delete));
        assert_eq!(err.source().unwrap().to_string(), "Delete failed");
    }

    #[tokio::test]
    async fn test_delete_missing_object_is_an_error() {
        let (_client, fs) = setup();

        let res = fs
            .delete(&DeleteRequest {
                file_key: "missing.txt".to_string(),
            })
            .await;

        assert!(matches!(res, Err(StorageError::Backend { .. })));
    }

    #[tokio::test]
    async fn test_get_upload_stream_descriptor() {
        let (client, fs) = setup();

        let descriptor = fs
            .get_upload_stream_descriptor(&UploadStreamRequest {
                name: "file".to_string(),
                ext: "txt".to_string(),
                is_private: Some(true),
            })
            .await
            .unwrap();

        assert_eq!(descriptor.file_key, "file.txt");
        assert_eq!(
            descriptor.url,
            "https://storage.example.com/private-bucket/file.txt"
        );
        assert_eq!(descriptor.write_stream.key(), "file.txt");

        let mut completion = descriptor.completion;
        descriptor.write_stream.write("hello ").await.unwrap();
        descriptor.write_stream.write("world").await.unwrap();

        // still open, nothing settled yet
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!((&mut completion).now_or_never().is_none());

        descriptor.write_stream.finish();

        let res = completion.await.unwrap();
        assert_eq!(
            res,
            UploadResult {
                url: "https://storage.example.com/private-bucket/file.txt".to_string(),
                key: "file.txt".to_string(),
            }
        );
        assert_eq!(
            client.calls(),
            vec![Call::WriteStream {
                bucket: PRIVATE.to_string(),
                key: "file.txt".to_string(),
                options: WriteOptions {
                    resumable: false,
                    gzip: true,
                },
            }]
        );
        assert_eq!(client.object(PRIVATE, "file.txt").unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_get_upload_stream_descriptor_public() {
        let (client, fs) = setup();

        let descriptor = fs
            .get_upload_stream_descriptor(&UploadStreamRequest {
                name: "image".to_string(),
                ext: "png".to_string(),
                is_private: Some(false),
            })
            .await
            .unwrap();

        descriptor.write_stream.finish();
        let res = descriptor.completion.await.unwrap();

        assert_eq!(res.url, "https://storage.example.com/public-bucket/image.png");
        assert_eq!(client.object(PUBLIC, "image.png").unwrap(), b"");
    }

    #[tokio::test]
    async fn test_get_upload_stream_descriptor_failure_on_completion() {
        let (client, fs) = setup();
        client.fail_next(Operation::Write, "Get upload stream descriptor failed");

        let descriptor = fs
            .get_upload_stream_descriptor(&UploadStreamRequest {
                name: "file".to_string(),
                ext: "txt".to_string(),
                is_private: None,
            })
            .await
            .unwrap();

        descriptor.write_stream.write("abc").await.unwrap();
        descriptor.write_stream.finish();

        let err = descriptor.completion.await.unwrap_err();
        assert_eq!(err.operation(), Some(Operation::Write));
        assert_eq!(
            err.source().unwrap().to_string(),
            "Get upload stream descriptor failed"
        );
        assert!(client.object(PRIVATE, "file.txt").is_none());
    }

    #[tokio::test]
    async fn test_get_upload_stream_descriptor_dropped_without_finish() {
        let (client, fs) = setup();

        let descriptor = fs
            .get_upload_stream_descriptor(&UploadStreamRequest {
                name: "file".to_string(),
                ext: "txt".to_string(),
                is_private: Some(true),
            })
            .await
            .unwrap();

        descriptor.write_stream.write("partial").await.unwrap();
        drop(descriptor.write_stream);

        let err = descriptor.completion.await.unwrap_err();
        assert_eq!(err.operation(), Some(Operation::Write));
        assert!(client.object(PRIVATE, "file.txt").is_none());
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_upload_task_logs_within_caller_span() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (client, fs) = setup();
        client.fail_next(Operation::Write, "Write failed");

        let descriptor = fs
            .get_upload_stream_descriptor(&UploadStreamRequest {
                name: "file".to_string(),
                ext: "txt".to_string(),
                is_private: None,
            })
            .await
            .unwrap();
        descriptor.write_stream.finish();
        descriptor.completion.await.unwrap_err();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let line = output
            .lines()
            .find(|line| line.contains("error_group=\"write_stream\""))
            .unwrap();

        assert!(line.contains("get_upload_stream_descriptor"));
        assert!(line.contains("Write failed"));
    }

    #[tokio::test]
    async fn test_get_download_stream() {
        let (client, fs) = setup();
        client.insert_object(PRIVATE, "file.txt", b"private bytes");
        client.insert_object(PUBLIC, "file.txt", b"public bytes");

        let stream = fs.get_download_stream(&get_file(Some(true))).await.unwrap();

        assert_eq!(collect(stream).await, b"private bytes");
        assert_eq!(
            client.calls(),
            vec![Call::ReadStream {
                bucket: PRIVATE.to_string(),
                key: "file.txt".to_string(),
            }]
        );

        let stream = fs.get_download_stream(&get_file(Some(false))).await.unwrap();
        assert_eq!(collect(stream).await, b"public bytes");
    }

    #[tokio::test]
    async fn test_get_download_stream_failure_passes_through() {
        let (client, fs) = setup();
        client.fail_next(Operation::Read, "Get download stream failed");

        let res = fs.get_download_stream(&get_file(Some(true))).await;

        match res {
            Err(err) => assert_eq!(err.source().unwrap().to_string(), "Get download stream failed"),
            Ok(_) => panic!("expected download to fail"),
        }
    }

    #[tokio::test]
    async fn test_get_presigned_download_url() {
        let (client, fs) = setup();

        let before = OffsetDateTime::now_utc();
        let url = fs
            .get_presigned_download_url(&get_file(Some(true)))
            .await
            .unwrap();
        let after = OffsetDateTime::now_utc();

        let options = match client.calls().as_slice() {
            [Call::SignUrl {
                bucket,
                key,
                options,
            }] => {
                assert_eq!(bucket, PRIVATE);
                assert_eq!(key, "file.txt");
                *options
            }
            calls => panic!("unexpected calls: {:?}", calls),
        };

        assert_eq!(options.action, SignAction::Read);
        assert_eq!(options.version, SignVersion::V4);

        let ttl = time::Duration::milliseconds(7 * 24 * 60 * 60 * 1000);
        assert!(options.expires >= before + ttl);
        assert!(options.expires <= after + ttl);

        assert_eq!(
            url,
            format!(
                "https://storage.example.com/private-bucket/file.txt?X-Goog-Algorithm=GOOG4-RSA-SHA256&X-Goog-Expires={}",
                options.expires.unix_timestamp()
            )
        );
    }

    #[tokio::test]
    async fn test_get_presigned_download_url_failure_passes_through() {
        let (client, fs) = setup();
        client.fail_next(Operation::Sign, "Get presigned download URL failed");

        let err = fs
            .get_presigned_download_url(&get_file(Some(true)))
            .await
            .unwrap_err();

        assert_eq!(err.operation(), Some(Operation::Sign));
        assert_eq!(
            err.source().unwrap().to_string(),
            "Get presigned download URL failed"
        );
    }

    #[tokio::test]
    async fn test_omitted_flag_targets_private_bucket() {
        let (client, fs) = setup();
        client.insert_object(PRIVATE, "file.txt", b"abc");

        let descriptor = fs
            .get_upload_stream_descriptor(&UploadStreamRequest {
                name: "other".to_string(),
                ext: "bin".to_string(),
                is_private: None,
            })
            .await
            .unwrap();
        descriptor.write_stream.finish();
        descriptor.completion.await.unwrap();

        let _stream = fs.get_download_stream(&get_file(None)).await.unwrap();
        fs.get_presigned_download_url(&get_file(None)).await.unwrap();

        let buckets: Vec<String> = client
            .calls()
            .into_iter()
            .map(|call| match call {
                Call::WriteStream { bucket, .. }
                | Call::ReadStream { bucket, .. }
                | Call::SignUrl { bucket, .. } => bucket,
                other => panic!("unexpected call: {:?}", other),
            })
            .collect();

        assert_eq!(buckets, vec![PRIVATE; 3]);
    }

    #[tokio::test]
    async fn test_returned_keys_round_trip() {
        let (client, fs) = setup();

        let uploaded = fs.upload(&file_data()).await.unwrap();
        fs.delete(&DeleteRequest {
            file_key: uploaded.key.clone(),
        })
        .await
        .unwrap();
        assert!(client.object(PUBLIC, &uploaded.key).is_none());

        let protected = fs.upload_protected(&file_data()).await.unwrap();
        fs.get_presigned_download_url(&GetFileRequest {
            file_key: protected.key.clone(),
            is_private: Some(true),
        })
        .await
        .unwrap();

        let descriptor = fs
            .get_upload_stream_descriptor(&UploadStreamRequest {
                name: "report".to_string(),
                ext: "pdf".to_string(),
                is_private: Some(true),
            })
            .await
            .unwrap();
        descriptor.write_stream.write("%PDF").await.unwrap();
        descriptor.write_stream.finish();
        let streamed = descriptor.completion.await.unwrap();
        assert_eq!(streamed.key, descriptor.file_key);

        let stream = fs
            .get_download_stream(&GetFileRequest {
                file_key: streamed.key,
                is_private: Some(true),
            })
            .await
            .unwrap();
        assert_eq!(collect(stream).await, b"%PDF");
    }
}
