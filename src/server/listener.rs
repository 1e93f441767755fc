use std::{
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
};

use axum::serve::Listener;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::{TcpListener, TcpStream},
    sync::watch,
};
use tracing::debug;

type Abandoned = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Accepts connections whose IO fails once the abandon flag is raised, so hyper drops them
/// even while they sit half-read.
pub(super) struct AbandonableListener {
    inner: TcpListener,
    abandon: watch::Receiver<bool>,
}

impl AbandonableListener {
    pub(super) fn new(inner: TcpListener, abandon: watch::Receiver<bool>) -> Self {
        Self { inner, abandon }
    }
}

impl Listener for AbandonableListener {
    type Io = AbandonableStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        let (stream, addr) = Listener::accept(&mut self.inner).await;
        let mut abandon = self.abandon.clone();
        let abandoned: Abandoned = Box::pin(async move {
            let _ = abandon.wait_for(|abandoned| *abandoned).await;
        });
        (
            AbandonableStream {
                stream,
                abandoned: Some(abandoned),
            },
            addr,
        )
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

pub(super) struct AbandonableStream {
    stream: TcpStream,
    // None once the flag has been observed
    abandoned: Option<Abandoned>,
}

impl AbandonableStream {
    fn check(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        let Some(abandoned) = self.abandoned.as_mut() else {
            return Err(aborted());
        };
        if abandoned.as_mut().poll(cx).is_ready() {
            self.abandoned = None;
            debug!("dropping connection at shutdown deadline");
            return Err(aborted());
        }
        Ok(())
    }
}

fn aborted() -> io::Error {
    io::Error::new(
        io::ErrorKind::ConnectionAborted,
        "connection abandoned at shutdown deadline",
    )
}

impl AsyncRead for AbandonableStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Err(err) = self.check(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for AbandonableStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Err(err) = self.check(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        if let Err(err) = self.check(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Err(err) = self.check(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
