//! Line transport contract.
//!
//! The engine only ever sees a [`Transport`]: one [`LineSink`] (owned by the
//! scheduler, the only writer) and one [`LineSource`] (owned by the filter, the
//! only reader). Anything that frames lines can be plugged in; sockets and
//! in-memory pipes get an adapter through [`Transport::from_stream`].

use std::{fmt, future::Future, pin::Pin, time::Duration};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{
    client::Endpoint,
    error::{Error, Result},
};

/// Boxed `Send` future used by the transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Write half of a line transport.
pub trait LineSink: Send + 'static {
    /// Write one line. The implementation adds the line terminator.
    fn send_line<'a>(&'a mut self, line: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Release the link. Must be safe to call more than once.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Read half of a line transport.
pub trait LineSource: Send + 'static {
    /// Next raw line without its terminator, or `None` once disconnected.
    fn next_line(&mut self) -> BoxFuture<'_, Result<Option<String>>>;
}

/// Byte streams [`Transport::from_stream`] accepts.
pub trait AsyncLineStream: AsyncRead + AsyncWrite + Send + 'static {}
impl<T> AsyncLineStream for T where T: AsyncRead + AsyncWrite + Send + 'static {}

/// A connected, line-framed link.
pub struct Transport {
    sink: Box<dyn LineSink>,
    source: Box<dyn LineSource>,
    echo_lines: usize,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("echo_lines", &self.echo_lines)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Build a transport from its two halves.
    #[must_use]
    pub fn new(sink: impl LineSink, source: impl LineSource) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
            echo_lines: 0,
        }
    }

    /// Adapt a byte stream: lines are read up to `\n` and written with a `\n`
    /// terminator. Stray `\r` at either end of a line is dropped, since the
    /// server terminates its lines with `\n\r`.
    #[must_use]
    pub fn from_stream<S: AsyncLineStream>(stream: S) -> Self {
        let (r, w) = tokio::io::split(stream);
        Self::new(
            StreamSink { w, closed: false },
            StreamSource {
                r: BufReader::new(r),
                buf: Vec::with_capacity(4096),
            },
        )
    }

    /// Dial a TCP endpoint (the raw ServerQuery interface).
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp { host, port } => {
                let dial = tokio::net::TcpStream::connect((host.as_str(), *port));
                let stream = tokio::time::timeout(timeout, dial)
                    .await
                    .map_err(|_| {
                        Error::connect(format!("connecting to {host}:{port} timed out"))
                    })?
                    .map_err(Error::from)?;
                // Best effort: commands are tiny, do not wait on Nagle.
                let _ = stream.set_nodelay(true);
                Ok(Self::from_stream(stream))
            }
        }
    }

    /// Declare how many raw lines the peer prints to echo each input line.
    ///
    /// Raw sockets do not echo (0, the default); terminal-style links such as
    /// an SSH shell channel echo once.
    #[must_use]
    pub fn with_echo_lines(mut self, lines: usize) -> Self {
        self.echo_lines = lines;
        self
    }

    /// See [`Transport::with_echo_lines`].
    #[must_use]
    pub fn echo_lines(&self) -> usize {
        self.echo_lines
    }

    pub(crate) fn into_parts(self) -> (Box<dyn LineSink>, Box<dyn LineSource>) {
        (self.sink, self.source)
    }
}

struct StreamSink<W> {
    w: W,
    closed: bool,
}

impl<W> LineSink for StreamSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn send_line<'a>(&'a mut self, line: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.closed {
                return Err(Error::Disconnected);
            }
            self.w.write_all(line.as_bytes()).await?;
            self.w.write_all(b"\n").await?;
            self.w.flush().await?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if std::mem::replace(&mut self.closed, true) {
                return Ok(());
            }
            self.w.shutdown().await.map_err(Error::from)
        })
    }
}

struct StreamSource<R> {
    r: BufReader<R>,
    buf: Vec<u8>,
}

impl<R> LineSource for StreamSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn next_line(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            self.buf.clear();
            let n = self.r.read_until(b'\n', &mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            let line = String::from_utf8_lossy(&self.buf);
            Ok(Some(line.trim_matches(['\r', '\n']).to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_adapter_frames_lines() -> Result<()> {
        let (ours, theirs) = tokio::io::duplex(256);
        let (mut sink, mut source) = Transport::from_stream(ours).into_parts();
        let (their_r, mut their_w) = tokio::io::split(theirs);

        their_w.write_all(b"TS3\n\rsecond line\n\rthird\r\n").await?;

        assert_eq!(source.next_line().await?.as_deref(), Some("TS3"));
        assert_eq!(source.next_line().await?.as_deref(), Some("second line"));
        assert_eq!(source.next_line().await?.as_deref(), Some("third"));

        sink.send_line("version").await?;
        sink.close().await?;
        sink.close().await?;
        let late = sink.send_line("late").await.unwrap_err();
        assert_eq!(late.kind(), crate::error::ErrorKind::Disconnected);

        drop(their_w);
        let mut written = String::new();
        let mut their_r = BufReader::new(their_r);
        their_r.read_line(&mut written).await?;
        assert_eq!(written, "version\n");
        Ok(())
    }
}
