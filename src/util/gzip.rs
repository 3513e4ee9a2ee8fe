use std::{
    io::{self, Write},
    pin::Pin,
    task::{ready, Context, Poll},
};

use bytes::Bytes;
use flate2::{write::GzEncoder, Compression};
use futures::Stream;

/// Gzip-compresses a chunk stream on the fly. The gzip trailer is emitted once
/// the inner stream ends; an inner error is passed through and ends the stream
/// without a trailer.
pub struct GzipStream<S> {
    inner: S,
    encoder: Option<GzEncoder<Vec<u8>>>,
}

impl<S> GzipStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            encoder: Some(GzEncoder::new(Vec::new(), Compression::default())),
        }
    }
}

impl<S> Stream for GzipStream<S>
where
    S: Stream<Item = Result<Bytes, io::Error>> + Unpin,
{
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            let encoder = match this.encoder.as_mut() {
                None => return Poll::Ready(None),
                Some(encoder) => encoder,
            };

            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Err(err)) => {
                    this.encoder = None;
                    return Poll::Ready(Some(Err(err)));
                }
                Some(Ok(chunk)) => {
                    if let Err(err) = encoder.write_all(&chunk) {
                        this.encoder = None;
                        return Poll::Ready(Some(Err(err)));
                    }

                    // the encoder only appends, so draining what it wrote so far is safe
                    let compressed = std::mem::take(encoder.get_mut());
                    if !compressed.is_empty() {
                        return Poll::Ready(Some(Ok(Bytes::from(compressed))));
                    }
                }
                None => {
                    let encoder = match this.encoder.take() {
                        None => return Poll::Ready(None),
                        Some(encoder) => encoder,
                    };

                    return Poll::Ready(Some(encoder.finish().map(Bytes::from)));
                }
            }
        }
    }
}
