//! Query engine: the only writer and the only reader of the link.
//!
//! Three tasks share one [`CancelToken`]:
//!
//! - the **reader** pumps raw lines from the [`LineSource`] into a bounded queue;
//! - the **scheduler** writes one line per wake-up: the next request, or the
//!   keep-alive probe once the link has been quiet for the configured interval;
//! - the **filter** turns raw lines into logical response lines through
//!   [`Resync`].
//!
//! The scheduler publishes the text it is about to write on a `watch` channel
//! before writing it; the filter only ever reads that value.
//!
//! End of stream flows downstream: the reader returns, the filter forwards
//! what is still queued and closes the logical stream, and its consumer fires
//! the token. A write failure fires the token directly. Read and write
//! failures are kept in a [`LinkFailure`] for callers.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, OnceLock},
    time::Duration,
};

use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    cancel::CancelToken,
    error::{Error, Result},
    resync::Resync,
    transport::{LineSink, LineSource, Transport},
};

/// Lower bound for the keep-alive interval.
pub const MIN_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Keep-alive and resynchronization settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAlive {
    /// Idle time before a probe is sent. Clamped to
    /// [`MIN_KEEP_ALIVE_INTERVAL`].
    pub interval: Duration,

    /// Probe command. Must be harmless and have a fixed-size reply.
    pub probe: String,

    /// Raw lines the probe's reply occupies, status line included.
    pub response_lines: usize,

    /// Raw lines the link prints to echo the probe.
    ///
    /// `None` takes the transport's own hint ([`Transport::echo_lines`]),
    /// which is 0 for raw sockets and for [`Transport::new`].
    pub echo_lines: Option<usize>,

    /// Prompt marker preceding a terminal's redraw of the last command.
    pub prompt: String,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(200),
            probe: "version".to_string(),
            response_lines: 2,
            echo_lines: None,
            prompt: "> ".to_string(),
        }
    }
}

impl KeepAlive {
    /// The interval actually used.
    #[must_use]
    pub fn effective_interval(&self) -> Duration {
        self.interval.max(MIN_KEEP_ALIVE_INTERVAL)
    }
}

/// Queue sizes for the engine's internal channels.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EngineQueues {
    pub(crate) requests: usize,
    pub(crate) lines: usize,
}

/// First I/O failure seen on the link.
#[derive(Debug, Clone, Default)]
pub(crate) struct LinkFailure(Arc<OnceLock<String>>);

impl LinkFailure {
    fn record(&self, what: &str, error: &Error) {
        let _ = self.0.set(format!("{what}: {error}"));
    }

    /// The error a caller sees once the link is gone.
    pub(crate) fn error(&self) -> Error {
        match self.0.get() {
            Some(message) => Error::transport(message.clone()),
            None => Error::Disconnected,
        }
    }
}

/// Handle to the running engine.
#[derive(Debug)]
pub(crate) struct QueryEngine {
    requests: mpsc::Sender<String>,
    failure: LinkFailure,
    tasks: Vec<JoinHandle<()>>,
}

impl QueryEngine {
    /// Spawn the engine. Returns it together with the logical line stream.
    pub(crate) fn start(
        transport: Transport,
        keep_alive: &KeepAlive,
        queues: EngineQueues,
        stop: CancelToken,
    ) -> (Self, mpsc::Receiver<String>) {
        let echo_lines = keep_alive.echo_lines.unwrap_or(transport.echo_lines());
        let (sink, source) = transport.into_parts();
        let failure = LinkFailure::default();

        let (request_tx, request_rx) = mpsc::channel(queues.requests.max(1));
        let (raw_tx, raw_rx) = mpsc::channel(queues.lines.max(1));
        let (logical_tx, logical_rx) = mpsc::channel(queues.lines.max(1));
        let (probe_tx, probe_rx) = mpsc::channel(1);
        let (last_tx, last_rx) = watch::channel(String::new());

        let scheduler = Scheduler {
            sink,
            requests: request_rx,
            probes: probe_tx,
            last_sent: last_tx,
            interval: keep_alive.effective_interval(),
            probe: keep_alive.probe.clone(),
            failure: failure.clone(),
            stop: stop.clone(),
        };
        let filter = Filter {
            raw: raw_rx,
            probes: probe_rx,
            last_sent: last_rx,
            resync: Resync::new(
                keep_alive.response_lines,
                echo_lines,
                keep_alive.prompt.clone(),
            ),
            out: logical_tx,
            stop: stop.clone(),
        };

        let tasks = vec![
            tokio::spawn(read_lines(source, raw_tx, failure.clone(), stop)),
            tokio::spawn(scheduler.run()),
            tokio::spawn(filter.run()),
        ];

        (
            Self {
                requests: request_tx,
                failure,
                tasks,
            },
            logical_rx,
        )
    }

    /// Sender side of the request queue.
    pub(crate) fn requests(&self) -> mpsc::Sender<String> {
        self.requests.clone()
    }

    pub(crate) fn failure(&self) -> LinkFailure {
        self.failure.clone()
    }

    pub(crate) fn into_tasks(self) -> Vec<JoinHandle<()>> {
        self.tasks
    }
}

/// Queue one request line.
pub(crate) async fn submit(requests: &mpsc::Sender<String>, line: &str) -> Result<()> {
    if line.contains(['\n', '\r']) {
        return Err(Error::protocol("a command must be a single line"));
    }
    requests
        .send(line.to_string())
        .await
        .map_err(|_| Error::Disconnected)
}

async fn read_lines(
    mut source: Box<dyn LineSource>,
    raw: mpsc::Sender<String>,
    failure: LinkFailure,
    stop: CancelToken,
) {
    let stopped = stop.cancelled();
    tokio::pin!(stopped);

    loop {
        let next = tokio::select! {
            biased;
            _ = &mut stopped => break,
            next = source.next_line() => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("ServerQuery link closed by peer");
                break;
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "ServerQuery read failed");
                failure.record("read failed", &e);
                break;
            }
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(line = %line, "raw line");

        tokio::select! {
            biased;
            _ = &mut stopped => break,
            sent = raw.send(line) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

/// Sent to the filter before a probe is written; answered once the filter
/// has accounted for it.
type ProbeAck = oneshot::Sender<()>;

struct Scheduler {
    sink: Box<dyn LineSink>,
    requests: mpsc::Receiver<String>,
    probes: mpsc::Sender<ProbeAck>,
    last_sent: watch::Sender<String>,
    interval: Duration,
    probe: String,
    failure: LinkFailure,
    stop: CancelToken,
}

impl Scheduler {
    async fn run(mut self) {
        let stopped = self.stop.cancelled();
        tokio::pin!(stopped);

        loop {
            // A fresh sleep per iteration: the probe fires after `interval`
            // without any write.
            let request = tokio::select! {
                biased;
                _ = &mut stopped => break,
                request = self.requests.recv() => match request {
                    Some(request) => Some(request),
                    None => break,
                },
                _ = tokio::time::sleep(self.interval) => None,
            };

            let line = match request {
                Some(line) => line,
                None => {
                    if !self.announce_probe(&mut stopped).await {
                        break;
                    }
                    #[cfg(feature = "tracing")]
                    tracing::trace!(probe = %self.probe, "sending keep-alive probe");
                    self.probe.clone()
                }
            };

            self.last_sent.send_replace(line.clone());

            if let Err(e) = self.sink.send_line(&line).await {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "ServerQuery write failed");
                self.failure.record("write failed", &e);
                self.stop.cancel();
                break;
            }
        }

        if let Err(_e) = self.sink.close().await {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %_e, "closing ServerQuery link failed");
        }
    }

    /// Wait until the filter has armed its skip count. `false` once the
    /// engine is shutting down.
    async fn announce_probe<F>(&mut self, stopped: &mut Pin<&mut F>) -> bool
    where
        F: Future<Output = ()>,
    {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.probes.send(ack_tx).await.is_err() {
            return false;
        }
        tokio::select! {
            biased;
            _ = stopped.as_mut() => false,
            ack = ack_rx => ack.is_ok(),
        }
    }
}

struct Filter {
    raw: mpsc::Receiver<String>,
    probes: mpsc::Receiver<ProbeAck>,
    last_sent: watch::Receiver<String>,
    resync: Resync,
    out: mpsc::Sender<String>,
    stop: CancelToken,
}

impl Filter {
    async fn run(mut self) {
        let stopped = self.stop.cancelled();
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                biased;
                _ = &mut stopped => break,
                Some(ack) = self.probes.recv() => {
                    if !self.absorb_probe(ack, &mut stopped).await {
                        return;
                    }
                }
                line = self.raw.recv() => match line {
                    Some(line) => {
                        if !self.forward(&line, &mut stopped).await {
                            return;
                        }
                    }
                    // Dropping `out` tells the consumer.
                    None => break,
                },
            }
        }
    }

    /// Lines queued now were read before the probe went out and belong to
    /// earlier traffic.
    async fn absorb_probe<F>(&mut self, ack: ProbeAck, stopped: &mut Pin<&mut F>) -> bool
    where
        F: Future<Output = ()>,
    {
        while let Ok(line) = self.raw.try_recv() {
            if !self.forward(&line, stopped).await {
                return false;
            }
        }
        self.resync.probe_sent();
        let _ = ack.send(());
        true
    }

    /// Returns `false` once the engine is shutting down.
    async fn forward<F>(&mut self, raw: &str, stopped: &mut Pin<&mut F>) -> bool
    where
        F: Future<Output = ()>,
    {
        let logical = self.resync.accept(raw, &self.last_sent.borrow());
        let Some(line) = logical else {
            #[cfg(feature = "tracing")]
            tracing::trace!(line = %raw, "absorbed");
            return true;
        };

        tokio::select! {
            biased;
            _ = stopped.as_mut() => false,
            sent = self.out.send(line) => sent.is_ok(),
        }
    }
}
