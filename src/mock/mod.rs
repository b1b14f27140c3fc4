//! Mock server and transcript replay helpers.
//!
//! This module is intended for:
//! - unit/integration tests
//! - regression tests against recorded ServerQuery conversations
//! - exercising the keep-alive and echo handling without a real server
//!
//! It is gated behind `cfg(test)` or the `mock` Cargo feature.

use std::{
    collections::HashMap,
    future::Future,
    path::Path,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
    sync::{mpsc, oneshot},
};

use crate::{
    classifier::BANNER,
    client::Endpoint,
    decode::escape,
    error::{Error, Result},
    transport::Transport,
};

/// How a command should be answered by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockReply {
    /// Body lines, sent verbatim.
    pub lines: Vec<String>,
    /// Status id for the closing `error` line.
    pub id: i64,
    /// Status text (escaped on the wire).
    pub msg: String,
    /// Hold the reply back this long after the command arrives.
    pub delay: Option<Duration>,
}

impl MockReply {
    /// Successful reply with the given body lines.
    #[must_use]
    pub fn ok<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            id: 0,
            msg: "ok".to_string(),
            delay: None,
        }
    }

    /// Failed reply without a body.
    #[must_use]
    pub fn error(id: i64, msg: impl Into<String>) -> Self {
        Self {
            lines: Vec::new(),
            id,
            msg: msg.into(),
            delay: None,
        }
    }

    /// Delay this reply.
    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn render(&self) -> impl Iterator<Item = String> + '_ {
        let status = format!("error id={} msg={}", self.id, escape(&self.msg));
        self.lines.iter().cloned().chain(std::iter::once(status))
    }
}

/// A simple mock script.
#[derive(Debug, Clone)]
pub struct MockScript {
    /// First line sent on connect.
    pub banner: String,

    /// Second line sent on connect.
    pub welcome: String,

    /// Replies by full command line, or by the command's first token.
    pub replies: HashMap<String, MockReply>,

    /// Notify lines sent after the first command arrives, before its reply.
    pub post_command_notifies: Vec<String>,

    /// When set, every received command is echoed the way a terminal would
    /// redraw it after this prompt.
    pub terminal_echo: Option<String>,
}

impl MockScript {
    /// Reply of the `version` command (also the default keep-alive probe).
    pub const VERSION_LINE: &'static str = "version=3.13.7 build=1655727713 platform=Linux";

    /// Create a script with the standard banner and a `version` reply.
    #[must_use]
    pub fn new() -> Self {
        let mut replies = HashMap::new();
        replies.insert("version".to_string(), MockReply::ok([Self::VERSION_LINE]));
        Self {
            banner: BANNER.to_string(),
            welcome: "Welcome to the TeamSpeak 3 ServerQuery interface, type \"help\" for a list of commands and \"help <command>\" for information on a specific command.".to_string(),
            replies,
            post_command_notifies: Vec::new(),
            terminal_echo: None,
        }
    }

    /// Replace the banner line.
    #[must_use]
    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    /// Add a reply.
    #[must_use]
    pub fn reply(mut self, command: impl Into<String>, reply: MockReply) -> Self {
        self.replies.insert(command.into(), reply);
        self
    }

    /// Add a successful reply.
    #[must_use]
    pub fn reply_ok<I, S>(self, command: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reply(command, MockReply::ok(lines))
    }

    /// Add an error reply.
    #[must_use]
    pub fn reply_error(self, command: impl Into<String>, id: i64, msg: impl Into<String>) -> Self {
        self.reply(command, MockReply::error(id, msg))
    }

    /// Add a notify line to be sent after the first command.
    #[must_use]
    pub fn post_notify(mut self, line: impl Into<String>) -> Self {
        self.post_command_notifies.push(line.into());
        self
    }

    /// Echo commands like an SSH shell channel does.
    #[must_use]
    pub fn terminal_echo(mut self, prompt: impl Into<String>) -> Self {
        self.terminal_echo = Some(prompt.into());
        self
    }

    fn reply_for(&self, command: &str) -> MockReply {
        let keyword = command.split(' ').next().unwrap_or_default();
        self.replies
            .get(command)
            .or_else(|| self.replies.get(keyword))
            .cloned()
            .unwrap_or_else(|| MockReply::error(256, "command not found"))
    }
}

impl Default for MockScript {
    fn default() -> Self {
        Self::new()
    }
}

/// A running mock server.
///
/// It serves a single connection. Dropping the server (or calling
/// [`MockServer::shutdown`]) closes that connection.
#[derive(Debug, Clone)]
pub struct MockServer {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    endpoint: Option<Endpoint>,
    shutdown_tx: mpsc::Sender<()>,
    done_rx: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
    push_tx: mpsc::Sender<String>,
    received: Arc<StdMutex<Vec<String>>>,
}

impl MockServer {
    /// Start a TCP mock server on 127.0.0.1:0 (ephemeral port).
    pub async fn start_tcp(script: MockScript) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(Error::from)?;
        let addr = listener.local_addr().map_err(Error::from)?;
        let endpoint = Endpoint::tcp(addr.ip().to_string(), addr.port());

        let (push_tx, push_rx) = mpsc::channel(64);
        let received = Arc::new(StdMutex::new(Vec::new()));
        let log = received.clone();

        let (shutdown_tx, done_rx) = spawn_session(async move {
            if let Ok((stream, _peer)) = listener.accept().await {
                let _ = serve(stream, script, push_rx, log).await;
            }
        });

        Ok(Self {
            inner: Arc::new(Inner {
                endpoint: Some(endpoint),
                shutdown_tx,
                done_rx: tokio::sync::Mutex::new(Some(done_rx)),
                push_tx,
                received,
            }),
        })
    }

    /// Start an in-memory mock server and return the client side of the link.
    ///
    /// With [`MockScript::terminal_echo`] the transport advertises one echo
    /// line per command.
    #[must_use]
    pub fn duplex(script: MockScript) -> (Self, Transport) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let echo_lines = usize::from(script.terminal_echo.is_some());

        let (push_tx, push_rx) = mpsc::channel(64);
        let received = Arc::new(StdMutex::new(Vec::new()));
        let log = received.clone();

        let (shutdown_tx, done_rx) = spawn_session(async move {
            let _ = serve(theirs, script, push_rx, log).await;
        });

        let server = Self {
            inner: Arc::new(Inner {
                endpoint: None,
                shutdown_tx,
                done_rx: tokio::sync::Mutex::new(Some(done_rx)),
                push_tx,
                received,
            }),
        };
        (server, Transport::from_stream(ours).with_echo_lines(echo_lines))
    }

    /// Endpoint clients should connect to (`None` for [`MockServer::duplex`]).
    #[must_use]
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.inner.endpoint.clone()
    }

    /// Send an unsolicited line (typically a notify) to the client.
    pub async fn push(&self, line: impl Into<String>) -> Result<()> {
        self.inner
            .push_tx
            .send(line.into())
            .await
            .map_err(|_| Error::Disconnected)
    }

    /// Every command line received so far, in order.
    #[must_use]
    pub fn received(&self) -> Vec<String> {
        self.inner
            .received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Shut down the server and wait for completion.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(()).await;
        let mut rx = self.inner.done_rx.lock().await;
        if let Some(done) = rx.take() {
            let _ = done.await;
        }
    }
}

fn spawn_session<F>(session: F) -> (mpsc::Sender<()>, oneshot::Receiver<()>)
where
    F: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(async move {
        tokio::select! {
            _ = session => {}
            _ = shutdown_rx.recv() => {}
        }

        let _ = done_tx.send(());
    });

    (shutdown_tx, done_rx)
}

async fn serve<S>(
    stream: S,
    script: MockScript,
    mut push: mpsc::Receiver<String>,
    received: Arc<StdMutex<Vec<String>>>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (r, mut w) = tokio::io::split(stream);
    let mut commands = BufReader::new(r).lines();

    send_line(&mut w, &script.banner).await?;
    send_line(&mut w, &script.welcome).await?;

    let mut pending_notifies = script.post_command_notifies.clone();

    loop {
        tokio::select! {
            command = commands.next_line() => {
                let Some(command) = command.map_err(Error::from)? else {
                    return Ok(());
                };
                received
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(command.clone());

                if let Some(prompt) = &script.terminal_echo {
                    let redraw = format!(
                        "\x1b[1G{prompt}{command}\x1b[{}D{command}",
                        command.len()
                    );
                    send_line(&mut w, &redraw).await?;
                }

                for line in pending_notifies.drain(..) {
                    send_line(&mut w, &line).await?;
                }

                let reply = script.reply_for(&command);
                if let Some(delay) = reply.delay {
                    tokio::time::sleep(delay).await;
                }
                for line in reply.render() {
                    send_line(&mut w, &line).await?;
                }
            }
            Some(line) = push.recv() => send_line(&mut w, &line).await?,
        }
    }
}

async fn send_line<W: AsyncWrite + Unpin>(w: &mut W, line: &str) -> Result<()> {
    w.write_all(line.as_bytes()).await.map_err(Error::from)?;
    w.write_all(b"\n\r").await.map_err(Error::from)?;
    w.flush().await.map_err(Error::from)?;
    Ok(())
}

/// A transcript step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "dir", rename_all = "lowercase")]
pub enum TranscriptStep {
    /// A line sent by the server.
    Server {
        /// Raw line.
        line: String,
    },
    /// A line expected from the client.
    Client {
        /// Raw line.
        line: String,
    },
}

/// A JSONL transcript, suitable for replay.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    /// Ordered transcript steps.
    pub steps: Vec<TranscriptStep>,
}

impl Transcript {
    /// Parse from JSON Lines content.
    pub fn from_jsonl_str(s: &str) -> Result<Self> {
        let mut steps = Vec::new();
        for (idx, line) in s.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let step: TranscriptStep = serde_json::from_str(line).map_err(|e| {
                Error::decode(format!("invalid jsonl at line {}: {}", idx + 1, e))
            })?;
            steps.push(step);
        }

        Ok(Self { steps })
    }

    /// Load a transcript from a JSONL file.
    pub fn from_jsonl_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(Error::from)?;
        Self::from_jsonl_str(&data)
    }
}

/// Replay a transcript by acting as a ServerQuery server.
///
/// The server sends/receives lines exactly as specified.
#[derive(Debug)]
pub struct ReplayServer {
    endpoint: Endpoint,
    shutdown_tx: mpsc::Sender<()>,
    done_rx: tokio::sync::Mutex<Option<oneshot::Receiver<Result<()>>>>,
}

impl ReplayServer {
    /// Start a replay server on TCP.
    pub async fn start_tcp(transcript: Transcript) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(Error::from)?;
        let addr = listener.local_addr().map_err(Error::from)?;
        let endpoint = Endpoint::tcp(addr.ip().to_string(), addr.port());

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                outcome = async {
                    let (stream, _peer) = listener.accept().await.map_err(Error::from)?;
                    replay_connection(stream, transcript).await
                } => outcome,
                _ = shutdown_rx.recv() => Ok(()),
            };

            let _ = done_tx.send(outcome);
        });

        Ok(Self {
            endpoint,
            shutdown_tx,
            done_rx: tokio::sync::Mutex::new(Some(done_rx)),
        })
    }

    /// Endpoint clients should connect to.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// Wait until the transcript has been replayed completely.
    ///
    /// Returns the first mismatch, if any.
    pub async fn finished(&self) -> Result<()> {
        let mut rx = self.done_rx.lock().await;
        match rx.take() {
            Some(done) => done.await.unwrap_or(Err(Error::Disconnected)),
            None => Ok(()),
        }
    }

    /// Shut down the server.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.finished().await;
    }
}

async fn replay_connection<S>(stream: S, transcript: Transcript) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (r, mut w) = tokio::io::split(stream);
    let mut lines = BufReader::new(r).lines();

    for step in transcript.steps {
        match step {
            TranscriptStep::Server { line } => {
                send_line(&mut w, &line).await?;
            }
            TranscriptStep::Client { line: expected } => {
                let got = lines
                    .next_line()
                    .await
                    .map_err(Error::from)?
                    .ok_or(Error::Disconnected)?;

                if got != expected {
                    return Err(Error::protocol(format!(
                        "transcript mismatch: expected {expected:?}, got {got:?}"
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_lookup_falls_back_to_keyword() {
        let script = MockScript::new()
            .reply_ok("clientinfo clid=1", ["client_nickname=alice"])
            .reply_error("clientinfo", 512, "invalid clientID");

        assert_eq!(script.reply_for("clientinfo clid=1").id, 0);
        assert_eq!(script.reply_for("clientinfo clid=9").id, 512);
        assert_eq!(script.reply_for("nope").id, 256);
    }

    #[test]
    fn reply_renders_escaped_status() {
        let lines: Vec<String> = MockReply::error(512, "invalid clientID").render().collect();
        assert_eq!(lines, ["error id=512 msg=invalid\\sclientID"]);
    }

    #[test]
    fn transcript_rejects_bad_lines() {
        let err = Transcript::from_jsonl_str("{\"dir\":\"server\",\"line\":\"TS3\"}\nnot json")
            .unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }
}
