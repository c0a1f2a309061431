//! The [`Link`] to a board.
//!
//! A link owns the byte output, the background frame reader over the byte
//! input, and the event dispatcher listeners register with. Every command
//! gets a fresh message id from a process-wide counter.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use crate::event::EventDispatcher;
use crate::protocol::{
    Command, FrameDecoder, check_encodable, encode, encode_frame, encode_with_id,
};
use crate::qos::Correlator;
use crate::reader::run_read_loop;
use crate::types::{KeyPress, Pin, Tone};

/// How long `close` waits for the reader task before aborting it.
const READER_STOP_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Returns the next message id.
///
/// Ids start at 1, are shared by all links in the process and are never
/// reused.
pub fn next_message_id() -> u64 {
    NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection to one board.
pub struct Link {
    writer: tokio::sync::Mutex<Writer>,
    dispatcher: EventDispatcher,
    config: ProtocolConfig,
    cancel: CancellationToken,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    correlator: OnceLock<Arc<Correlator>>,
    closed: AtomicBool,
}

impl Link {
    /// Creates a link over a byte input and output and starts its reader.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, config: ProtocolConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let dispatcher = EventDispatcher::default();
        let cancel = CancellationToken::new();

        let decoder = FrameDecoder::new(config.divider);
        let reader_dispatcher = dispatcher.clone();
        let reader_cancel = cancel.clone();
        let reader_task = tokio::spawn(async move {
            if let Err(e) = run_read_loop(
                reader,
                decoder,
                config.read_buffer,
                reader_dispatcher,
                reader_cancel,
            )
            .await
            {
                tracing::debug!("read loop ended: {}", e);
            }
        });

        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            dispatcher,
            config,
            cancel,
            reader_task: Mutex::new(Some(reader_task)),
            correlator: OnceLock::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the dispatcher to register listeners with.
    #[must_use]
    pub const fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Returns the protocol configuration.
    #[must_use]
    pub const fn config(&self) -> ProtocolConfig {
        self.config
    }

    /// Returns true once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the link's reply correlator, creating it on first use.
    pub(crate) fn correlator(&self) -> &Arc<Correlator> {
        self.correlator
            .get_or_init(|| Correlator::attach(&self.dispatcher))
    }

    /// Sends a command and returns its message id.
    pub async fn send(&self, command: &Command) -> Result<u64> {
        check_encodable(command, self.config.divider)?;
        let id = next_message_id();
        tracing::debug!(id, key = command.key().as_str(), "sending command");
        self.write(encode(command)).await?;
        Ok(id)
    }

    /// Sends a command tagged with `id` so the board replies.
    pub(crate) async fn send_tagged(&self, command: &Command, id: u64) -> Result<()> {
        check_encodable(command, self.config.divider)?;
        tracing::debug!(id, key = command.key().as_str(), "sending command, reply requested");
        self.write(encode_with_id(command, id)).await
    }

    async fn write(&self, payload: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let frame = encode_frame(&payload, self.config.divider);
        tracing::trace!("sending frame: {} bytes", frame.len());

        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Switches a digital pin.
    pub async fn switch_digital_pin(&self, pin: u32, value: bool) -> Result<u64> {
        self.send(&Command::SwitchDigital { pin, value }).await
    }

    /// Sets an analog pin's output value.
    ///
    /// The value is sent as given; clamp it to the board's range first.
    pub async fn switch_analog_pin(&self, pin: u32, value: u32) -> Result<u64> {
        self.send(&Command::SwitchAnalog { pin, value }).await
    }

    /// Asks the board to report changes of `pin`.
    pub async fn start_listening(&self, pin: Pin) -> Result<u64> {
        self.send(&Command::StartListening(pin)).await
    }

    /// Asks the board to stop reporting changes of `pin`.
    pub async fn stop_listening(&self, pin: Pin) -> Result<u64> {
        self.send(&Command::StopListening(pin)).await
    }

    /// Plays a tone.
    pub async fn send_tone(&self, tone: Tone) -> Result<u64> {
        self.send(&Command::Tone(tone)).await
    }

    /// Stops a tone.
    pub async fn send_no_tone(&self, pin: u32) -> Result<u64> {
        self.send(&Command::NoTone { pin }).await
    }

    /// Forwards a key press.
    pub async fn send_key_press(&self, key: KeyPress) -> Result<u64> {
        self.send(&Command::KeyPress(key)).await
    }

    /// Sends custom messages.
    pub async fn send_custom_messages<I, S>(&self, messages: I) -> Result<u64>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let messages = messages.into_iter().map(Into::into).collect();
        self.send(&Command::CustomMessages(messages)).await
    }

    /// Stops the reader and shuts the output down.
    ///
    /// A request still awaiting its reply fails with [`Error::Closed`].
    /// Idempotent; later sends fail with [`Error::Closed`] too.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!("closing link");

        if let Some(correlator) = self.correlator.get() {
            correlator.abort();
        }
        self.cancel.cancel();
        let task = self
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(READER_STOP_TIMEOUT, task).await.is_err() {
                tracing::warn!("reader did not stop in time, aborting");
                abort.abort();
            }
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("output shutdown failed: {}", e);
        }
        Ok(())
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[test]
    fn test_message_ids_increase() {
        let a = next_message_id();
        let b = next_message_id();
        assert!(a >= 1);
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_commands_are_framed() {
        let (host, mut board) = tokio::io::duplex(256);
        let (reader, writer) = tokio::io::split(host);
        let link = Link::new(reader, writer, ProtocolConfig::new().divider(b'\n'));

        let first = link.switch_digital_pin(13, true).await.unwrap();
        let second = link.send_custom_messages(["a", "b"]).await.unwrap();
        assert!(second > first);

        let expected = b"alp://ppsw/13/1\nalp://cust/a/b\n";
        let mut buf = vec![0u8; expected.len()];
        board.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, expected);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_sends() {
        let (host, _board) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(host);
        let link = Link::new(reader, writer, ProtocolConfig::default());

        link.close().await.unwrap();
        link.close().await.unwrap();
        assert!(link.is_closed());
        assert!(matches!(
            link.send_no_tone(3).await,
            Err(Error::Closed)
        ));
    }

    #[tokio::test]
    async fn test_frame_breaking_custom_message_is_rejected() {
        let (host, mut board) = tokio::io::duplex(256);
        let (reader, writer) = tokio::io::split(host);
        let link = Link::new(reader, writer, ProtocolConfig::new().divider(b'\n'));

        assert!(matches!(
            link.send_custom_messages(["on", "alp://ppsw/13/1\nx"]).await,
            Err(Error::InvalidCommand { .. })
        ));

        link.send_custom_messages(["on"]).await.unwrap();
        let expected = b"alp://cust/on\n";
        let mut buf = vec![0u8; expected.len()];
        board.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, expected);
    }
}
