use std::{
    future::Future,
    io,
    pin::Pin,
    task::{ready, Context, Poll},
};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::model::{error::StorageError, file::UploadResult};

/// Chunks buffered between the writer and the backend upload before `write` waits.
pub const UPLOAD_CHANNEL_CAPACITY: usize = 16;

/// Sink side of a streamed upload. Only `finish` commits the object; dropping
/// the writer without it aborts the upload.
#[derive(Debug)]
pub struct UploadWriter {
    key: String,
    tx: mpsc::Sender<Bytes>,
    commit: oneshot::Sender<()>,
}

impl UploadWriter {
    /// Creates a writer and the body stream the backend consumes.
    pub fn channel(key: &str) -> (UploadWriter, UploadBody) {
        let (tx, rx) = mpsc::channel(UPLOAD_CHANNEL_CAPACITY);
        let (commit_tx, commit_rx) = oneshot::channel();

        (
            UploadWriter {
                key: key.to_string(),
                tx,
                commit: commit_tx,
            },
            UploadBody {
                key: key.to_string(),
                chunks: rx,
                commit: commit_rx,
                done: false,
            },
        )
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fails with `StreamClosed` once the upload is over; await the completion for the cause.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<(), StorageError> {
        self.tx
            .send(chunk.into())
            .await
            .map_err(|_| StorageError::StreamClosed {
                key: self.key.clone(),
            })
    }

    /// Ends the object with what was written so far.
    pub fn finish(self) {
        let UploadWriter { tx, commit, .. } = self;

        // commit before the chunk channel closes, the body checks it on close
        let _ = commit.send(());
        drop(tx);
    }
}

/// Chunks written into an `UploadWriter`. Ends cleanly after `finish`, and
/// yields an error instead if the writer was dropped unfinished.
#[derive(Debug)]
pub struct UploadBody {
    key: String,
    chunks: mpsc::Receiver<Bytes>,
    commit: oneshot::Receiver<()>,
    done: bool,
}

impl Stream for UploadBody {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match ready!(this.chunks.poll_recv(cx)) {
            Some(chunk) => Poll::Ready(Some(Ok(chunk))),
            None => {
                this.done = true;
                match this.commit.try_recv() {
                    Ok(()) => Poll::Ready(None),
                    Err(_) => Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("upload stream for `{}` dropped before finish", this.key),
                    )))),
                }
            }
        }
    }
}

/// Resolves once with the upload's outcome.
#[derive(Debug)]
pub struct UploadCompletion {
    key: String,
    rx: oneshot::Receiver<Result<UploadResult, StorageError>>,
}

impl UploadCompletion {
    pub(crate) fn new(key: String, rx: oneshot::Receiver<Result<UploadResult, StorageError>>) -> Self {
        Self { key, rx }
    }
}

impl Future for UploadCompletion {
    type Output = Result<UploadResult, StorageError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            // the upload task went away without reporting
            Poll::Ready(Err(_)) => Poll::Ready(Err(StorageError::StreamClosed {
                key: self.key.clone(),
            })),
        }
    }
}

/// An upload in progress: feed `write_stream`, call `finish`, then await `completion`.
#[derive(Debug)]
pub struct UploadStreamDescriptor {
    pub write_stream: UploadWriter,
    pub completion: UploadCompletion,
    pub url: String,
    pub file_key: String,
}
