//! Response classifier.
//!
//! Single sequential consumer of the logical line stream. It rebuilds
//! response groups (body lines closed by an `error` line), publishes one reply
//! per group in arrival order, and fans notify lines out to subscribers.

use tokio::sync::{broadcast, mpsc};

use crate::{
    cancel::CancelToken,
    error::{Error, Result},
    types::{Message, Notify, QueryError, Response},
};

/// First line every ServerQuery interface sends.
pub const BANNER: &str = "TS3";

/// One published reply. A group whose status line fails to decode is
/// published as `Err(Error::Decode)` so the FIFO pairing stays aligned.
pub(crate) type Reply = Result<Response>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Status,
    Notify,
    Body,
}

fn classify(line: &str) -> LineKind {
    let keyword = line.split(' ').next().unwrap_or_default();
    if keyword == QueryError::KEYWORD {
        LineKind::Status
    } else if Notify::is_notify_line(keyword) {
        LineKind::Notify
    } else {
        LineKind::Body
    }
}

/// Read the banner and the welcome line.
pub(crate) async fn handshake(lines: &mut mpsc::Receiver<String>) -> Result<()> {
    let banner = lines
        .recv()
        .await
        .ok_or_else(|| Error::connect("link closed before the banner"))?;
    if banner.trim() != BANNER {
        return Err(Error::protocol(format!(
            "unexpected banner {banner:?}, expected {BANNER:?}"
        )));
    }

    let _welcome = lines
        .recv()
        .await
        .ok_or_else(|| Error::connect("link closed during the welcome message"))?;

    #[cfg(feature = "tracing")]
    tracing::debug!(welcome = %_welcome, "ServerQuery handshake complete");

    Ok(())
}

/// Steady-state loop. Exits on `stop`, when the logical stream ends, or when
/// the reply receiver is gone.
///
/// The logical stream only ends after every line read before end of stream
/// was delivered, so the last reply before the peer hangs up is still
/// published. The loop then fires `stop` for the rest of the engine.
pub(crate) async fn run(
    mut lines: mpsc::Receiver<String>,
    replies: mpsc::Sender<Reply>,
    events: broadcast::Sender<Notify>,
    stop: CancelToken,
) {
    let stopped = stop.cancelled();
    tokio::pin!(stopped);

    let mut body: Vec<String> = Vec::new();

    loop {
        let line = tokio::select! {
            biased;
            _ = &mut stopped => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => {
                    stop.cancel();
                    break;
                }
            },
        };

        if line.trim().is_empty() {
            continue;
        }

        match classify(&line) {
            LineKind::Body => body.push(line),
            LineKind::Notify => dispatch(&line, &events),
            LineKind::Status => {
                let reply = complete(std::mem::take(&mut body), &line);
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    sent = replies.send(reply) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(pending_body = body.len(), "classifier stopped");
}

fn complete(body: Vec<String>, status: &str) -> Reply {
    match QueryError::from_line(status) {
        Ok(error) => {
            #[cfg(feature = "tracing")]
            tracing::trace!(id = error.id, lines = body.len(), "response group complete");
            Ok(Response {
                message: Message::from_lines(body),
                error,
            })
        }
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, lines = body.len(), "dropping undecodable response group");
            Err(e)
        }
    }
}

fn dispatch(line: &str, events: &broadcast::Sender<Notify>) {
    match Notify::from_line(line) {
        Ok(event) => {
            #[cfg(feature = "tracing")]
            tracing::trace!(event = %event.event(), "notify");
            // No subscribers is not an error.
            let _ = events.send(event);
        }
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_e, "dropping undecodable notify line");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    struct Harness {
        lines: mpsc::Sender<String>,
        replies: mpsc::Receiver<Reply>,
        events: broadcast::Receiver<Notify>,
        stop: CancelToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn harness() -> Harness {
        let (lines, lines_rx) = mpsc::channel(16);
        let (replies_tx, replies) = mpsc::channel(16);
        let (events_tx, events) = broadcast::channel(16);
        let stop = CancelToken::new();
        let task = tokio::spawn(run(lines_rx, replies_tx, events_tx, stop.clone()));
        Harness {
            lines,
            replies,
            events,
            stop,
            task,
        }
    }

    async fn feed(h: &Harness, lines: &[&str]) {
        for line in lines {
            h.lines.send((*line).to_string()).await.unwrap();
        }
    }

    #[test]
    fn classification_uses_the_first_token() {
        assert_eq!(classify("error id=0 msg=ok"), LineKind::Status);
        assert_eq!(classify("error"), LineKind::Status);
        assert_eq!(classify("error_count=3"), LineKind::Body);
        assert_eq!(classify("notifyclientleftview clid=1"), LineKind::Notify);
        assert_eq!(classify("virtualserver_notifyregister=1"), LineKind::Body);
    }

    #[tokio::test]
    async fn body_lines_aggregate_into_one_message() {
        let mut h = harness();
        feed(&h, &["a=1", "a=2", "error id=0 msg=ok"]).await;

        let resp = h.replies.recv().await.unwrap().unwrap();
        assert_eq!(resp.message.records().len(), 2);
        assert_eq!(resp.message.records()[1].int("a"), Some(2));
        assert_eq!(resp.error.id, 0);
        assert_eq!(resp.error.msg, "ok");
        assert!(h.replies.try_recv().is_err());
    }

    #[tokio::test]
    async fn bare_status_line_gives_empty_message() {
        let mut h = harness();
        feed(&h, &["error id=0 msg=ok"]).await;

        let resp = h.replies.recv().await.unwrap().unwrap();
        assert!(resp.message.is_empty());
    }

    #[tokio::test]
    async fn notify_inside_a_group_does_not_split_it() {
        let mut h = harness();
        feed(
            &h,
            &[
                "clid=1",
                "notifyclientleftview cfid=1 ctid=0 reasonid=8 clid=4 extra=1",
                "clid=2",
                "error id=0 msg=ok",
            ],
        )
        .await;

        let resp = h.replies.recv().await.unwrap().unwrap();
        assert_eq!(resp.message.lines(), ["clid=1", "clid=2"]);

        let event = h.events.recv().await.unwrap();
        assert_eq!(event.event(), "notifyclientleftview");
    }

    #[tokio::test]
    async fn undecodable_lines_do_not_stop_the_loop() {
        let mut h = harness();
        feed(
            &h,
            &[
                "notifyclientleftview clid=abc",
                "orphan=1",
                "error msg=missing\\sid",
                "error id=0 msg=ok",
            ],
        )
        .await;

        let first = h.replies.recv().await.unwrap();
        assert_eq!(first.unwrap_err().kind(), ErrorKind::Decode);

        let second = h.replies.recv().await.unwrap().unwrap();
        assert!(second.message.is_empty(), "failed group's body must not leak");
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn groups_are_published_in_order() {
        let mut h = harness();
        feed(
            &h,
            &[
                "n=1",
                "error id=0 msg=ok",
                "error id=1024 msg=invalid\\sserverID",
                "n=3",
                "error id=0 msg=ok",
            ],
        )
        .await;

        let r1 = h.replies.recv().await.unwrap().unwrap();
        let r2 = h.replies.recv().await.unwrap().unwrap();
        let r3 = h.replies.recv().await.unwrap().unwrap();
        assert_eq!(r1.message.first().and_then(|r| r.int("n")), Some(1));
        assert_eq!(r2.error.id, 1024);
        assert_eq!(r2.error.msg, "invalid serverID");
        assert_eq!(r3.message.first().and_then(|r| r.int("n")), Some(3));
    }

    #[tokio::test]
    async fn end_of_stream_publishes_pending_replies_then_stops() {
        let Harness {
            lines,
            mut replies,
            stop,
            task,
            ..
        } = harness();
        lines.send("error id=0 msg=ok".to_string()).await.unwrap();
        drop(lines);

        let resp = replies.recv().await.unwrap().unwrap();
        assert!(resp.is_ok());
        assert!(replies.recv().await.is_none());
        task.await.unwrap();
        assert!(stop.is_cancelled());
    }

    #[tokio::test]
    async fn stop_ends_the_loop_while_idle() {
        let h = harness();
        h.stop.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_checks_banner() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send("TS3".to_string()).await.unwrap();
        tx.send("Welcome to the TeamSpeak 3 ServerQuery interface".to_string())
            .await
            .unwrap();
        handshake(&mut rx).await.unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        tx.send("SSH-2.0-OpenSSH".to_string()).await.unwrap();
        let err = handshake(&mut rx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);

        let (tx, mut rx) = mpsc::channel::<String>(4);
        drop(tx);
        let err = handshake(&mut rx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connect);
    }
}
