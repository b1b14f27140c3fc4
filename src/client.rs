//! Asynchronous ServerQuery client.

use std::{
    fmt,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use tokio::{
    sync::{Mutex, broadcast, mpsc},
    task::JoinHandle,
};

use crate::{
    cancel::CancelToken,
    classifier::{self, Reply},
    decode::escape,
    engine::{self, EngineQueues, KeepAlive, LinkFailure, QueryEngine},
    error::{Error, Result},
    event_stream::NotifyStream,
    transport::Transport,
    types::{Notify, Response},
};

/// Default port of the raw ServerQuery interface.
pub const DEFAULT_PORT: u16 = 10011;

/// ServerQuery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Endpoint {
    /// Raw ServerQuery over TCP.
    Tcp {
        /// Hostname or IP.
        host: String,
        /// Port.
        port: u16,
    },
}

impl Endpoint {
    /// Create a TCP endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }
}

/// Login name and password for the `login` command.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Query login name.
    pub username: String,
    /// Query password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Options controlling how the connection is established and run.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Keep-alive probe and resynchronization settings.
    pub keep_alive: KeepAlive,

    /// Log in right after the handshake.
    pub credentials: Option<Credentials>,

    /// Select a virtual server (`use sid=..`) after login.
    pub virtual_server: Option<u32>,

    /// Capacity of the request queue feeding the scheduler.
    pub request_queue: usize,

    /// Capacity of the raw and logical line queues.
    pub line_queue: usize,

    /// Capacity of the reply queue between classifier and callers.
    pub reply_queue: usize,

    /// Size of the notification broadcast buffer.
    ///
    /// Subscribers that lag further behind drop events and observe
    /// [`Error::EventLagged`].
    pub event_buffer: usize,

    /// Bound for dialing plus banner handshake.
    pub connect_timeout: Duration,

    /// Default timeout for command calls. `None` waits indefinitely.
    ///
    /// Individual calls can override this via [`CallOptions`].
    pub default_timeout: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            keep_alive: KeepAlive::default(),
            credentials: None,
            virtual_server: None,
            request_queue: 10,
            line_queue: 20,
            reply_queue: 10,
            event_buffer: 1024,
            connect_timeout: Duration::from_secs(10),
            default_timeout: None,
        }
    }
}

/// Options for a single command call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Override the default timeout.
    pub timeout: Option<Duration>,

    /// A cancellation token.
    pub cancel: Option<CancelToken>,
}

/// Client builder.
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    options: ConnectOptions,
}

impl ClientBuilder {
    /// Log in with these credentials after the handshake.
    #[must_use]
    pub fn login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.options.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Select a virtual server after login.
    #[must_use]
    pub fn virtual_server(mut self, sid: u32) -> Self {
        self.options.virtual_server = Some(sid);
        self
    }

    /// Replace the keep-alive settings.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.options.keep_alive = keep_alive;
        self
    }

    /// Set only the keep-alive interval.
    #[must_use]
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.options.keep_alive.interval = interval;
        self
    }

    /// Set the request, line and reply queue capacities.
    #[must_use]
    pub fn queue_capacity(mut self, requests: usize, lines: usize, replies: usize) -> Self {
        self.options.request_queue = requests;
        self.options.line_queue = lines;
        self.options.reply_queue = replies;
        self
    }

    /// Set the notification buffer size.
    #[must_use]
    pub fn event_buffer(mut self, size: usize) -> Self {
        self.options.event_buffer = size;
        self
    }

    /// Set the connect + handshake timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Set default command timeout.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.default_timeout = timeout;
        self
    }

    /// The options built so far.
    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Dial `endpoint` and perform the handshake.
    pub async fn connect(self, endpoint: Endpoint) -> Result<Client> {
        Client::connect_with_options(endpoint, self.options).await
    }

    /// Run over an already connected transport.
    pub async fn connect_transport(self, transport: Transport) -> Result<Client> {
        Client::with_transport(transport, self.options).await
    }
}

/// An async ServerQuery client.
///
/// Cheap to clone; clones share one connection. Commands from concurrent
/// callers are serialized: only one request is ever in flight.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    requests: mpsc::Sender<String>,
    replies: Mutex<ReplyQueue>,
    /// Never read; only resubscribed. The classifier owns the sender, so
    /// every stream ends once it stops.
    events: StdMutex<broadcast::Receiver<Notify>>,
    stop: CancelToken,
    failure: LinkFailure,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    default_timeout: Option<Duration>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Reply side of the FIFO pairing.
#[derive(Debug)]
struct ReplyQueue {
    rx: mpsc::Receiver<Reply>,
    /// Replies still owed to calls that gave up waiting.
    orphaned: usize,
}

impl ReplyQueue {
    async fn next(&mut self) -> Result<Response> {
        while self.orphaned > 0 {
            let _stale = self.rx.recv().await.ok_or(Error::Disconnected)?;
            self.orphaned -= 1;
        }
        self.rx.recv().await.ok_or(Error::Disconnected)?
    }
}

impl Client {
    /// Create a builder with default options.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Connect to an endpoint with default options.
    pub async fn connect(endpoint: Endpoint) -> Result<Client> {
        Self::connect_with_options(endpoint, ConnectOptions::default()).await
    }

    /// Dial `endpoint`, then behave like [`Client::with_transport`].
    pub async fn connect_with_options(
        endpoint: Endpoint,
        options: ConnectOptions,
    ) -> Result<Client> {
        let transport = Transport::connect(&endpoint, options.connect_timeout).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = ?endpoint, "ServerQuery link established");

        Self::with_transport(transport, options).await
    }

    /// Start the engine over `transport`, check the banner, and log in when
    /// credentials are configured.
    ///
    /// On any failure every started task is stopped and the transport is
    /// released before the error is returned.
    pub async fn with_transport(transport: Transport, options: ConnectOptions) -> Result<Client> {
        let stop = CancelToken::new();
        let queues = EngineQueues {
            requests: options.request_queue,
            lines: options.line_queue,
        };
        let (engine, mut lines) =
            QueryEngine::start(transport, &options.keep_alive, queues, stop.clone());

        let handshake =
            tokio::time::timeout(options.connect_timeout, classifier::handshake(&mut lines))
                .await
                .unwrap_or_else(|_| Err(Error::connect("timed out waiting for the banner")));

        if let Err(e) = handshake {
            stop.cancel();
            join_all(engine.into_tasks()).await;
            return Err(e);
        }

        let (replies_tx, replies_rx) = mpsc::channel(options.reply_queue.max(1));
        let (events_tx, events_rx) = broadcast::channel(options.event_buffer.max(1));

        let requests = engine.requests();
        let failure = engine.failure();
        let mut tasks = engine.into_tasks();
        tasks.push(tokio::spawn(classifier::run(
            lines,
            replies_tx,
            events_tx,
            stop.clone(),
        )));

        let client = Client {
            inner: Arc::new(Inner {
                requests,
                replies: Mutex::new(ReplyQueue {
                    rx: replies_rx,
                    orphaned: 0,
                }),
                events: StdMutex::new(events_rx),
                stop,
                failure,
                tasks: StdMutex::new(tasks),
                default_timeout: options.default_timeout,
            }),
        };

        if let Err(e) = client.authenticate(&options).await {
            let _ = client.close().await;
            return Err(e);
        }

        Ok(client)
    }

    async fn authenticate(&self, options: &ConnectOptions) -> Result<()> {
        if let Some(creds) = &options.credentials {
            let line = format!(
                "login {} {}",
                escape(&creds.username),
                escape(&creds.password)
            );
            let resp = self.command_bounded(&line, options.connect_timeout).await?;
            if !resp.is_ok() {
                return Err(Error::connect(format!(
                    "login as {:?} failed: error id={}: {}",
                    creds.username, resp.error.id, resp.error.msg
                )));
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(username = %creds.username, "ServerQuery login succeeded");
        }

        if let Some(sid) = options.virtual_server {
            let resp = self
                .command_bounded(&format!("use sid={sid}"), options.connect_timeout)
                .await?;
            if !resp.is_ok() {
                return Err(Error::connect(format!(
                    "selecting virtual server {sid} failed: error id={}: {}",
                    resp.error.id, resp.error.msg
                )));
            }
        }

        Ok(())
    }

    async fn command_bounded(&self, line: &str, timeout: Duration) -> Result<Response> {
        let options = CallOptions {
            timeout: Some(timeout),
            cancel: None,
        };
        self.command_with_options(line, options)
            .await
            .map_err(|e| match e {
                Error::Timeout { .. } => Error::connect(format!("no reply within {timeout:?}")),
                other => other,
            })
    }

    /// Subscribe to server notifications.
    ///
    /// Events are only delivered to subscriptions that exist when they
    /// arrive; register with the server (`servernotifyregister ..`) after
    /// subscribing. The stream ends with [`Error::Disconnected`] once the
    /// client is closed or the link is lost.
    #[must_use]
    pub fn notifications(&self) -> NotifyStream {
        let events = self
            .inner
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        NotifyStream::new(events.resubscribe())
    }

    /// Run one command and wait for its response group.
    ///
    /// A non-zero error id is returned as data in [`Response::error`]; call
    /// [`Response::check`] to treat it as an error.
    pub async fn command(&self, text: &str) -> Result<Response> {
        self.command_with_options(text, CallOptions::default())
            .await
    }

    /// Run one command with per-call options.
    ///
    /// If the call times out or is cancelled, its reply is still consumed
    /// (and discarded) before the next command's reply is read.
    pub async fn command_with_options(
        &self,
        text: &str,
        options: CallOptions,
    ) -> Result<Response> {
        let mut queue = self.inner.replies.lock().await;

        if self.inner.stop.is_cancelled() {
            return Err(self.inner.failure.error());
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(command = %text, "sending ServerQuery command");

        engine::submit(&self.inner.requests, text)
            .await
            .map_err(|e| self.link_lost(e))?;

        let timeout = options.timeout.or(self.inner.default_timeout);
        let limit = timeout.unwrap_or_default();
        let cancellable = options.cancel.is_some();
        let cancel = options.cancel.unwrap_or_default();

        let outcome = tokio::select! {
            biased;
            reply = queue.next() => reply,
            _ = tokio::time::sleep(limit), if timeout.is_some() => {
                Err(Error::Timeout { timeout: limit })
            }
            _ = cancel.cancelled(), if cancellable => Err(Error::Cancelled),
        };
        let outcome = outcome.map_err(|e| self.link_lost(e));

        if matches!(outcome, Err(Error::Timeout { .. } | Error::Cancelled)) {
            queue.orphaned += 1;
        }

        #[cfg(feature = "tracing")]
        match &outcome {
            Ok(resp) => tracing::trace!(command = %text, id = resp.error.id, "received response"),
            Err(e) => tracing::debug!(command = %text, error = %e, "command failed"),
        }

        outcome
    }

    /// A lost link reports the recorded I/O failure, if there was one.
    fn link_lost(&self, error: Error) -> Error {
        match error {
            Error::Disconnected => self.inner.failure.error(),
            other => other,
        }
    }

    /// `true` once the client was closed or the link went away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.stop.is_cancelled()
    }

    /// Stop all tasks and release the transport. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.inner.stop.cancel();
        let tasks = {
            let mut guard = self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        join_all(tasks).await;
        Ok(())
    }
}

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(_e) = task.await {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_e, "ServerQuery task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials {
            username: "serveradmin".into(),
            password: "hunter2".into(),
        };
        let shown = format!("{creds:?}");
        assert!(shown.contains("serveradmin"));
        assert!(!shown.contains("hunter2"));
    }

    async fn handshake_over(transport: Transport, stub: &crate::transport::stub::Stub) -> Client {
        stub.server.send("TS3".into()).unwrap();
        stub.server.send("Welcome".into()).unwrap();
        Client::builder().connect_transport(transport).await.unwrap()
    }

    #[tokio::test]
    async fn reply_sent_right_before_hangup_is_delivered() {
        let (transport, stub) = crate::transport::stub::stub(0);
        let client = handshake_over(transport, &stub).await;

        let crate::transport::stub::Stub {
            mut written,
            server,
        } = stub;
        let peer = tokio::spawn(async move {
            assert_eq!(written.recv().await.as_deref(), Some("quit"));
            server.send("error id=0 msg=ok".into()).unwrap();
            drop(server);
            written
        });

        let resp = client.command("quit").await.unwrap();
        assert!(resp.is_ok());
        let _written = peer.await.unwrap();

        let err = client.command("version").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Disconnected);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn write_failure_surfaces_as_transport_error() {
        let (transport, stub) = crate::transport::stub::broken_writes();
        let client = handshake_over(transport, &stub).await;

        let err = client.command("version").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
        assert!(client.is_closed());

        let err = client.command("version").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
        client.close().await.unwrap();
    }

    #[test]
    fn builder_collects_options() {
        let b = Client::builder()
            .login("serveradmin", "secret")
            .virtual_server(1)
            .keep_alive_interval(Duration::from_secs(1))
            .queue_capacity(1, 2, 3)
            .default_timeout(Some(Duration::from_secs(3)));

        let o = b.options();
        assert_eq!(o.virtual_server, Some(1));
        assert_eq!(o.keep_alive.effective_interval(), Duration::from_secs(5));
        assert_eq!((o.request_queue, o.line_queue, o.reply_queue), (1, 2, 3));
        assert_eq!(o.default_timeout, Some(Duration::from_secs(3)));
    }
}
