//! Live event stream over one mailbox.
//!
//! The stream is infinite: each step waits up to the heartbeat interval for
//! an event and yields a keep-alive when none arrived. It ends only when the
//! consumer drops it, which abandons the pending wait and leaves unread
//! events queued for the next consumer.

use crate::mailbox::Mailbox;
use futures_util::stream::{self, Stream};
use parley_protocol::Frame;
use std::sync::Arc;
use std::time::Duration;

/// Default idle interval between keep-alives.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(5);

/// Adapts a mailbox into a stream of frames for a single consumer.
#[derive(Debug, Clone)]
pub struct EventStreamer {
    mailbox: Arc<Mailbox>,
    heartbeat: Duration,
}

impl EventStreamer {
    /// Create a streamer with the default heartbeat.
    #[must_use]
    pub fn new(mailbox: Arc<Mailbox>) -> Self {
        Self::with_heartbeat(mailbox, DEFAULT_HEARTBEAT)
    }

    /// Create a streamer with a custom heartbeat.
    #[must_use]
    pub fn with_heartbeat(mailbox: Arc<Mailbox>, heartbeat: Duration) -> Self {
        Self { mailbox, heartbeat }
    }

    /// Wait for the next frame.
    pub async fn next_frame(&self) -> Frame {
        match self.mailbox.take(self.heartbeat).await {
            Some(event) => Frame::Event(event),
            None => Frame::KeepAlive,
        }
    }

    /// Turn the streamer into an endless stream of frames.
    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send + 'static {
        stream::unfold(self, |streamer| async move {
            let frame = streamer.next_frame().await;
            Some((frame, streamer))
        })
    }
}
