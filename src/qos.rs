//! Request/reply mode.
//!
//! [`QosLink`] tags each command with a fresh message id and waits until the
//! board replies with the same id, the board reports an error, or the
//! deadline passes. A link has at most one request in flight; a second
//! request while waiting fails with [`Error::Busy`] instead of queueing.
//!
//! ```text
//! Idle ──send──▶ AwaitingReply ──reply(id)──▶ Idle
//!                      │
//!                      └──deadline──▶ Idle (Error::Timeout)
//! ```
//!
//! Replies with any other id (including late replies to requests that
//! already timed out) are logged and dropped.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::DEFAULT_REPLY_TIMEOUT;
use crate::error::{Error, Result};
use crate::event::{ConnectionEvent, EventDispatcher, ListenerResult};
use crate::link::{Link, next_message_id};
use crate::protocol::Command;
use crate::types::{KeyPress, Pin, Reply, Tone};

/// Request state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosState {
    /// No request in flight.
    Idle,
    /// Waiting for the reply to the given message id.
    AwaitingReply(u64),
}

struct Pending {
    id: u64,
    reply_tx: oneshot::Sender<Reply>,
}

/// Single-slot rendezvous between a waiting caller and the reader.
pub(crate) struct Correlator {
    pending: Mutex<Option<Pending>>,
}

impl Correlator {
    /// Creates a correlator fed by the dispatcher's replies.
    pub(crate) fn attach(dispatcher: &EventDispatcher) -> Arc<Self> {
        let correlator = Arc::new(Self {
            pending: Mutex::new(None),
        });

        let on_reply = Arc::clone(&correlator);
        dispatcher.add_reply_listener(move |reply: &Reply| -> ListenerResult {
            on_reply.complete(reply);
            Ok(())
        });

        let on_lost = Arc::clone(&correlator);
        dispatcher.add_connection_listener(move |event: &ConnectionEvent| -> ListenerResult {
            if let ConnectionEvent::Lost { .. } = event {
                on_lost.abort();
            }
            Ok(())
        });

        correlator
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> QosState {
        self.lock()
            .as_ref()
            .map_or(QosState::Idle, |p| QosState::AwaitingReply(p.id))
    }

    /// Allocates the next id and marks it as awaited.
    fn arm(&self) -> Result<(u64, oneshot::Receiver<Reply>)> {
        let mut pending = self.lock();
        if let Some(p) = pending.as_ref() {
            return Err(Error::Busy { awaiting: p.id });
        }
        let id = next_message_id();
        let (reply_tx, reply_rx) = oneshot::channel();
        *pending = Some(Pending { id, reply_tx });
        Ok((id, reply_rx))
    }

    /// Returns to idle if `id` is still awaited.
    fn disarm(&self, id: u64) {
        let mut pending = self.lock();
        if pending.as_ref().is_some_and(|p| p.id == id) {
            *pending = None;
        }
    }

    /// Wakes the waiter if the reply carries the awaited id.
    fn complete(&self, reply: &Reply) {
        let matched = self.lock().take_if(|p| p.id == reply.id);
        match matched {
            Some(p) => {
                // Receiver gone means the caller already gave up
                let _ = p.reply_tx.send(reply.clone());
            }
            None => tracing::warn!(id = reply.id, "ignoring unexpected reply"),
        }
    }

    /// Fails the waiter, if any.
    pub(crate) fn abort(&self) {
        if let Some(p) = self.lock().take() {
            tracing::debug!(id = p.id, "connection lost while awaiting reply");
        }
    }
}

/// Disarms the correlator when a request ends, however it ends.
struct Armed<'a> {
    correlator: &'a Correlator,
    id: u64,
}

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        self.correlator.disarm(self.id);
    }
}

/// A link in request/reply mode.
#[derive(Clone)]
pub struct QosLink {
    link: Arc<Link>,
    timeout: Duration,
}

impl QosLink {
    /// Wraps a link. All `QosLink`s over the same link share its one
    /// in-flight slot.
    #[must_use]
    pub fn new(link: Arc<Link>) -> Self {
        link.correlator();
        Self {
            link,
            timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    /// Sets the default reply deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the reply deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the wrapped link.
    #[must_use]
    pub const fn link(&self) -> &Arc<Link> {
        &self.link
    }

    /// Returns the current request state.
    #[must_use]
    pub fn state(&self) -> QosState {
        self.link.correlator().state()
    }

    /// Sends a command and waits for its reply.
    pub async fn send(&self, command: &Command) -> Result<Reply> {
        self.send_with_timeout(command, self.timeout).await
    }

    /// Sends a command and waits for its reply with a custom deadline.
    ///
    /// # Errors
    ///
    /// - [`Error::Busy`] if another request is in flight on this link
    /// - [`Error::Timeout`] if the command is not written and answered in time
    /// - [`Error::DeviceError`] if the board answers `ko`
    /// - [`Error::Closed`] if the link is closed or lost while waiting
    pub async fn send_with_timeout(&self, command: &Command, timeout: Duration) -> Result<Reply> {
        let correlator = self.link.correlator();
        let (id, reply_rx) = correlator.arm()?;
        let _armed = Armed { correlator, id };

        let started = Instant::now();
        // One deadline for both the write and the reply
        let exchange = async {
            self.link.send_tagged(command, id).await?;
            reply_rx.await.map_err(|_| Error::Closed)
        };

        match tokio::time::timeout_at(started + timeout, exchange).await {
            Ok(Ok(reply)) if reply.ok => Ok(reply),
            Ok(Ok(reply)) => {
                tracing::warn!(id, "device reported error");
                Err(Error::DeviceError {
                    id,
                    params: reply.params,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let elapsed = started.elapsed();
                tracing::warn!(id, "no reply within {:?}", elapsed);
                Err(Error::Timeout {
                    id,
                    elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Switches a digital pin and waits for the reply.
    pub async fn switch_digital_pin(&self, pin: u32, value: bool) -> Result<Reply> {
        self.send(&Command::SwitchDigital { pin, value }).await
    }

    /// Sets an analog pin's output value and waits for the reply.
    pub async fn switch_analog_pin(&self, pin: u32, value: u32) -> Result<Reply> {
        self.send(&Command::SwitchAnalog { pin, value }).await
    }

    /// Starts listening on a pin and waits for the reply.
    pub async fn start_listening(&self, pin: Pin) -> Result<Reply> {
        self.send(&Command::StartListening(pin)).await
    }

    /// Stops listening on a pin and waits for the reply.
    pub async fn stop_listening(&self, pin: Pin) -> Result<Reply> {
        self.send(&Command::StopListening(pin)).await
    }

    /// Plays a tone and waits for the reply.
    pub async fn send_tone(&self, tone: Tone) -> Result<Reply> {
        self.send(&Command::Tone(tone)).await
    }

    /// Stops a tone and waits for the reply.
    pub async fn send_no_tone(&self, pin: u32) -> Result<Reply> {
        self.send(&Command::NoTone { pin }).await
    }

    /// Forwards a key press and waits for the reply.
    pub async fn send_key_press(&self, key: KeyPress) -> Result<Reply> {
        self.send(&Command::KeyPress(key)).await
    }

    /// Sends custom messages and waits for the reply.
    pub async fn send_custom_messages<I, S>(&self, messages: I) -> Result<Reply>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let messages = messages.into_iter().map(Into::into).collect();
        self.send(&Command::CustomMessages(messages)).await
    }
}
