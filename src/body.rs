//! The cache-writing body: a response body that tees bytes into the store
//! as the caller consumes them.
//!
//! Unlike a plain streaming body, this one has three independent ways to
//! stop: the upstream source can end normally, it can error, or the
//! consumer can drop the body before reaching either. Each must leave the
//! store in exactly one of `{Committed, Aborted}`, never half-open — the
//! `finished` flag below is the one-shot guard that makes the three paths
//! mutually exclusive.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http_body::{Body, Frame};
use tokio::sync::mpsc;

use crate::error::CacheError;

/// How long a cache-writing body will wait, after the consumer drops it
/// early, for the remaining upstream bytes to drain before giving up and
/// aborting the store write.
const DISCARD_TIMEOUT: Duration = Duration::from_millis(100);

/// A sink the store hands back from `put`, to which the tee writes bytes
/// as they are read. Mirrors the `CacheRequest`/`Sink` pair from the store
/// contract: `write` appends a chunk, `commit` finalizes the entry, and
/// `abort` discards a partial one.
pub trait CacheWriter: Send + 'static {
    /// Appends a chunk of bytes read from the upstream body.
    fn write(
        &mut self,
        chunk: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), CacheError>> + Send + '_>>;

    /// Finalizes the entry; called once the upstream body reaches EOF (or,
    /// on early consumer close, once the bounded drain succeeds).
    fn commit(
        self: Box<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<(), CacheError>> + Send>>;

    /// Discards whatever has been written so far; called on an upstream
    /// read error or a drain that didn't finish within the discard timeout.
    fn abort(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

enum SinkMessage {
    Chunk(Bytes),
    Commit,
    Abort,
}

/// A body that, as it is polled, forwards frames to the caller and sends
/// the same bytes to a background task driving a [`CacheWriter`].
///
/// The writer task is fed over an unbounded channel so that writing to the
/// store never blocks delivery to the caller; it runs independently and is
/// told how to finish (commit or abort) by whichever of the three closing
/// paths fires first.
pub struct CacheWritingBody<B>
where
    B: Body<Data = Bytes> + Send + Unpin + 'static,
{
    inner: Option<B>,
    tx: Option<mpsc::UnboundedSender<SinkMessage>>,
    finished: bool,
}

impl<B> CacheWritingBody<B>
where
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: Send,
{
    /// Wraps `inner`, spawning a background task that drives `writer`.
    pub fn new(inner: B, writer: Box<dyn CacheWriter>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(writer, rx));
        Self { inner: Some(inner), tx: Some(tx), finished: false }
    }

    /// Passes `inner` through untouched — used when the store declined to
    /// begin a write (`store.put` returned `None`).
    pub fn passthrough(inner: B) -> Self {
        Self { inner: Some(inner), tx: None, finished: true }
    }

    fn send(&self, msg: SinkMessage) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(msg);
        }
    }
}

async fn run_writer(
    mut writer: Box<dyn CacheWriter>,
    mut rx: mpsc::UnboundedReceiver<SinkMessage>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            SinkMessage::Chunk(bytes) => {
                if let Err(err) = writer.write(bytes).await {
                    log::warn!("cache-writing body aborting store write after read error: {err}");
                    writer.abort().await;
                    return;
                }
            }
            SinkMessage::Commit => {
                if let Err(err) = writer.commit().await {
                    log::warn!("cache-writing body commit failed: {err}");
                }
                return;
            }
            SinkMessage::Abort => {
                writer.abort().await;
                return;
            }
        }
    }
    // Channel closed without a terminal message reaching us: the body was
    // dropped early and the discard-then-abort path below already decided
    // the outcome before the sender went away, or the sender was dropped
    // without ever sending one (defensive: treat as abort).
}

impl<B> Body for CacheWritingBody<B>
where
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: Send,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match Pin::new(inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.send(SinkMessage::Chunk(data.clone()));
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(err))) => {
                if !this.finished {
                    this.finished = true;
                    this.send(SinkMessage::Abort);
                }
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                if !this.finished {
                    this.finished = true;
                    this.send(SinkMessage::Commit);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.is_end_stream(),
            None => true,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        self.inner.as_ref().map(Body::size_hint).unwrap_or_default()
    }
}

impl<B> Drop for CacheWritingBody<B>
where
    B: Body<Data = Bytes> + Send + Unpin + 'static,
{
    /// Handles the early-consumer-close path: the body is being dropped
    /// without having reached EOF or an error. Takes ownership of whatever
    /// of the upstream body remains and tries to drain it within
    /// [`DISCARD_TIMEOUT`]; if that succeeds, the store entry commits as
    /// normal, otherwise the write is aborted. The upstream source is
    /// closed (dropped) either way once the spawned task returns.
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let (Some(mut inner), Some(tx)) = (self.inner.take(), self.tx.take())
        else {
            return;
        };
        tokio::spawn(async move {
            let drain = std::future::poll_fn(|cx| loop {
                match Pin::new(&mut inner).poll_frame(cx) {
                    Poll::Ready(Some(Ok(frame))) => {
                        if let Some(data) = frame.data_ref() {
                            let _ = tx.send(SinkMessage::Chunk(data.clone()));
                        }
                    }
                    Poll::Ready(Some(Err(_))) | Poll::Ready(None) => {
                        return Poll::Ready(());
                    }
                    Poll::Pending => return Poll::Pending,
                }
            });
            if tokio::time::timeout(DISCARD_TIMEOUT, drain).await.is_ok() {
                let _ = tx.send(SinkMessage::Commit);
            } else {
                let _ = tx.send(SinkMessage::Abort);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{BodyExt, Full};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingWriter {
        chunks: Arc<Mutex<Vec<Bytes>>>,
        committed: Arc<Mutex<bool>>,
        aborted: Arc<Mutex<bool>>,
    }

    impl CacheWriter for RecordingWriter {
        fn write(
            &mut self,
            chunk: Bytes,
        ) -> Pin<Box<dyn Future<Output = Result<(), CacheError>> + Send + '_>>
        {
            self.chunks.lock().unwrap().push(chunk);
            Box::pin(async { Ok(()) })
        }

        fn commit(
            self: Box<Self>,
        ) -> Pin<Box<dyn Future<Output = Result<(), CacheError>> + Send>> {
            let committed = self.committed.clone();
            Box::pin(async move {
                *committed.lock().unwrap() = true;
                Ok(())
            })
        }

        fn abort(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
            let aborted = self.aborted.clone();
            Box::pin(async move {
                *aborted.lock().unwrap() = true;
            })
        }
    }

    #[tokio::test]
    async fn bytes_delivered_equal_bytes_written_on_success() {
        let body = Full::new(Bytes::from_static(b"hello world"));
        let committed = Arc::new(Mutex::new(false));
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let writer = RecordingWriter {
            chunks: chunks.clone(),
            committed: committed.clone(),
            aborted: Arc::default(),
        };

        let tee = CacheWritingBody::new(body, Box::new(writer));
        let collected = tee.collect().await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"hello world"));

        // Give the background writer task a chance to drain the channel.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let written: Vec<u8> =
            chunks.lock().unwrap().iter().flat_map(|b| b.to_vec()).collect();
        assert_eq!(written, b"hello world");
        assert!(*committed.lock().unwrap());
    }

    #[tokio::test]
    async fn store_decline_passes_body_through_unchanged() {
        let body = Full::new(Bytes::from_static(b"untouched"));
        let tee = CacheWritingBody::passthrough(body);
        let collected = tee.collect().await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"untouched"));
    }
}
