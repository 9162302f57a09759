//! Per-connection timeouts for the listening side.
//!
//! Hyper enforces the header read timeout itself. Write and idle timeouts are
//! enforced here: [`TimeoutStream`] fails a connection whose writes make no
//! progress, and [`ConnectionActivity`] lets the connection task close
//! keep-alive connections that sit idle.

use parking_lot::Mutex;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

/// Tracks in-flight requests and the last moment the connection did anything.
#[derive(Debug)]
pub struct ConnectionActivity {
    in_flight: AtomicUsize,
    last_activity: Mutex<Instant>,
}

impl ConnectionActivity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicUsize::new(0),
            last_activity: Mutex::new(Instant::now()),
        })
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Mark a request as in flight until the returned guard is dropped.
    pub fn begin_request(self: &Arc<Self>) -> RequestGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.touch();
        RequestGuard {
            activity: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// When the connection becomes idle if nothing else happens.
    pub fn idle_deadline(&self, idle_timeout: Duration) -> Instant {
        *self.last_activity.lock() + idle_timeout
    }

    pub fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.in_flight() == 0 && Instant::now() >= self.idle_deadline(idle_timeout)
    }
}

pub struct RequestGuard {
    activity: Arc<ConnectionActivity>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.activity.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.activity.touch();
    }
}

/// IO wrapper that fails writes which make no progress within `write_timeout`.
pub struct TimeoutStream<S> {
    inner: S,
    write_timeout: Duration,
    write_deadline: Option<Pin<Box<Sleep>>>,
    activity: Arc<ConnectionActivity>,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, write_timeout: Duration, activity: Arc<ConnectionActivity>) -> Self {
        Self {
            inner,
            write_timeout,
            write_deadline: None,
            activity,
        }
    }

    fn poll_stalled<T>(
        &mut self,
        cx: &mut Context<'_>,
        poll: Poll<io::Result<T>>,
    ) -> Poll<io::Result<T>> {
        match poll {
            Poll::Ready(result) => {
                self.write_deadline = None;
                if result.is_ok() {
                    self.activity.touch();
                }
                Poll::Ready(result)
            }
            Poll::Pending => {
                let timeout = self.write_timeout;
                let deadline = self
                    .write_deadline
                    .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
                if deadline.as_mut().poll(cx).is_ready() {
                    self.write_deadline = None;
                    Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("write stalled for {timeout:?}"),
                    )))
                } else {
                    Poll::Pending
                }
            }
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TimeoutStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.activity.touch();
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TimeoutStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        this.poll_stalled(cx, poll)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        this.poll_stalled(cx, poll)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_stalled_write_times_out() {
        // 64-byte pipe that nobody reads from.
        let (client, _server) = tokio::io::duplex(64);
        let activity = ConnectionActivity::new();
        let mut stream = TimeoutStream::new(client, Duration::from_millis(50), activity);

        let payload = vec![0u8; 4096];
        let err = stream.write_all(&payload).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_writes_with_progress_succeed() {
        let (client, mut server) = tokio::io::duplex(64);
        let activity = ConnectionActivity::new();
        let mut stream = TimeoutStream::new(client, Duration::from_millis(200), activity);

        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            server.read_to_end(&mut received).await.unwrap();
            received.len()
        });

        stream.write_all(&vec![1u8; 4096]).await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);
        assert_eq!(reader.await.unwrap(), 4096);
    }

    #[tokio::test]
    async fn test_idle_only_without_in_flight_requests() {
        let activity = ConnectionActivity::new();
        let idle = Duration::from_millis(20);

        let guard = activity.begin_request();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!activity.is_idle(idle));

        drop(guard);
        assert_eq!(activity.in_flight(), 0);
        assert!(!activity.is_idle(idle));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(activity.is_idle(idle));
    }
}
