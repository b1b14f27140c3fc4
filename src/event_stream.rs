//! Notification stream wrapper.

use futures_core::Stream;
use std::{
    pin::Pin,
    task::{Context, Poll},
};

use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use crate::{
    error::{Error, Result},
    types::Notify,
};

/// A subscription to server notifications.
///
/// Each stream sees every event published after it was created. The
/// classifier never waits for subscribers: a stream that falls more than the
/// configured buffer behind loses the oldest events and yields
/// [`Error::EventLagged`] once before resuming.
#[derive(Debug)]
pub struct NotifyStream {
    inner: BroadcastStream<Notify>,
}

fn clamp_missed(missed: u64) -> usize {
    usize::try_from(missed).unwrap_or(usize::MAX)
}

fn map_item(item: std::result::Result<Notify, BroadcastStreamRecvError>) -> Result<Notify> {
    match item {
        Ok(event) => Ok(event),
        Err(BroadcastStreamRecvError::Lagged(missed)) => Err(Error::EventLagged {
            missed: clamp_missed(missed),
        }),
    }
}

impl NotifyStream {
    pub(crate) fn new(rx: tokio::sync::broadcast::Receiver<Notify>) -> Self {
        Self {
            inner: BroadcastStream::new(rx),
        }
    }

    /// Receive the next event. [`Error::Disconnected`] once the client is
    /// closed and every buffered event has been delivered.
    pub async fn recv(&mut self) -> Result<Notify> {
        use tokio_stream::StreamExt;

        match self.inner.next().await {
            Some(item) => map_item(item),
            None => Err(Error::Disconnected),
        }
    }
}

impl Stream for NotifyStream {
    type Item = Result<Notify>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map(|item| item.map(map_item))
    }
}
