//! Client-side timeout enforcement.
//!
//! hyper does not expose per-connection read/write/idle deadlines, so
//! they are enforced at the transport seam instead: [`TimedStream`]
//! wraps the TLS stream and fails any read or write that makes no
//! progress within its window, and [`DeadlineBody`] bounds how long the
//! inbound request body may take in total. The request-header phase is
//! covered separately by hyper's own `header_read_timeout`.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use hyper::body::{Body, Frame};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

/// Boxed error type used for body plumbing.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An I/O stream with progress watchdogs.
///
/// A read that stays pending longer than `read_timeout` fails with
/// `TimedOut`; likewise writes and `write_timeout`. Each completed
/// operation rearms the corresponding watchdog, so the read window is
/// effectively an idle timeout between requests and body chunks. A zero
/// duration disables the respective watchdog.
#[derive(Debug)]
pub struct TimedStream<S> {
    inner: S,
    read_timeout: Duration,
    write_timeout: Duration,
    read_deadline: Option<Pin<Box<Sleep>>>,
    write_deadline: Option<Pin<Box<Sleep>>>,
}

impl<S> TimedStream<S> {
    /// Wraps `inner` with the given watchdog windows.
    pub fn new(inner: S, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            inner,
            read_timeout,
            write_timeout,
            read_deadline: None,
            write_deadline: None,
        }
    }
}

fn poll_watchdog(
    deadline: &mut Option<Pin<Box<Sleep>>>,
    window: Duration,
    what: &'static str,
    cx: &mut Context<'_>,
) -> Poll<io::Result<()>> {
    if window.is_zero() {
        return Poll::Pending;
    }

    let sleep = deadline.get_or_insert_with(|| Box::pin(tokio::time::sleep(window)));
    match sleep.as_mut().poll(cx) {
        Poll::Ready(()) => {
            *deadline = None;
            Poll::Ready(Err(io::Error::new(io::ErrorKind::TimedOut, what)))
        }
        Poll::Pending => Poll::Pending,
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TimedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.read_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_watchdog(
                &mut this.read_deadline,
                this.read_timeout,
                "connection idle timeout",
                cx,
            ),
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TimedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => {
                match poll_watchdog(
                    &mut this.write_deadline,
                    this.write_timeout,
                    "response write timeout",
                    cx,
                ) {
                    Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                    _ => Poll::Pending,
                }
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// A request body with an overall streaming deadline.
///
/// The deadline starts when the body is wrapped (request arrival) and is
/// not reset by progress: a client must deliver its whole body within
/// the window. A zero duration disables the deadline.
#[derive(Debug)]
pub struct DeadlineBody<B> {
    inner: B,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl<B> DeadlineBody<B> {
    /// Wraps `inner` with an overall read deadline of `timeout`.
    pub fn new(inner: B, timeout: Duration) -> Self {
        let deadline = (!timeout.is_zero()).then(|| Box::pin(tokio::time::sleep(timeout)));
        Self { inner, deadline }
    }
}

impl<B> Body for DeadlineBody<B>
where
    B: Body + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = B::Data;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if let Some(deadline) = this.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                return Poll::Ready(Some(Err("request body read timeout".into())));
            }
        }

        Pin::new(&mut this.inner)
            .poll_frame(cx)
            .map(|frame| frame.map(|result| result.map_err(Into::into)))
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> hyper::body::SizeHint {
        self.inner.size_hint()
    }
}
