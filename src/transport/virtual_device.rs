//! In-process simulated board.
//!
//! [`connect`] returns a [`Link`] wired to a [`VirtualDevice`] through an
//! in-memory pipe. The device decodes every command the link sends, answers
//! id-tagged commands according to its [`ReplyMode`], and can push pin
//! changes and custom messages to the host.
//!
//! Dropping the device handle keeps the simulated board running until the
//! link closes; only [`VirtualDevice::disconnect`] ends it early.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc, watch};

use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use crate::link::Link;
use crate::protocol::{Command, FrameDecoder, decode_command, encode_frame, encode_message};
use crate::types::{IncomingMessage, Reply};

/// Capacity of the in-memory pipe in each direction.
const PIPE_CAPACITY: usize = 4096;

/// How the simulated board answers id-tagged commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyMode {
    /// Reply `ok`.
    #[default]
    Ok,
    /// Reply `ko`.
    Error,
    /// Never reply.
    Silent,
}

/// A command as received by the simulated board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    pub command: Command,
    /// Reply id, if the host asked for one.
    pub id: Option<u64>,
}

type BoardWriter = Arc<Mutex<Option<WriteHalf<DuplexStream>>>>;

/// Board side of a virtual link.
pub struct VirtualDevice {
    writer: BoardWriter,
    commands: mpsc::UnboundedReceiver<DeviceCommand>,
    reply_mode: watch::Sender<ReplyMode>,
    divider: u8,
}

/// Creates a link to a new simulated board.
///
/// Must be called from within a Tokio runtime.
#[must_use]
pub fn connect(protocol: ProtocolConfig) -> (Link, VirtualDevice) {
    let (host, board) = tokio::io::duplex(PIPE_CAPACITY);
    let (host_reader, host_writer) = tokio::io::split(host);
    let (board_reader, board_writer) = tokio::io::split(board);

    let writer: BoardWriter = Arc::new(Mutex::new(Some(board_writer)));
    let (command_tx, commands) = mpsc::unbounded_channel();
    let (reply_mode, mode_rx) = watch::channel(ReplyMode::default());

    tokio::spawn(run_board(
        board_reader,
        FrameDecoder::new(protocol.divider),
        Arc::clone(&writer),
        command_tx,
        mode_rx,
    ));

    let link = Link::new(host_reader, host_writer, protocol);
    let device = VirtualDevice {
        writer,
        commands,
        reply_mode,
        divider: protocol.divider,
    };
    (link, device)
}

impl VirtualDevice {
    /// Changes how later id-tagged commands are answered.
    pub fn set_reply_mode(&self, mode: ReplyMode) {
        self.reply_mode.send_replace(mode);
    }

    /// Returns the current reply mode.
    #[must_use]
    pub fn reply_mode(&self) -> ReplyMode {
        *self.reply_mode.borrow()
    }

    /// Sends a message to the host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`disconnect`](Self::disconnect), or
    /// an I/O error if the host side is gone.
    pub async fn emit(&self, message: &IncomingMessage) -> Result<()> {
        write_message(&self.writer, message, self.divider).await
    }

    /// Waits for the next command sent by the host.
    ///
    /// Returns `None` once the link is closed and every command was taken.
    pub async fn next_command(&mut self) -> Option<DeviceCommand> {
        self.commands.recv().await
    }

    /// Returns a command if one is already queued.
    pub fn try_next_command(&mut self) -> Option<DeviceCommand> {
        self.commands.try_recv().ok()
    }

    /// Hangs up, so the host sees end-of-stream.
    pub async fn disconnect(&self) -> Result<()> {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            tracing::debug!("virtual device disconnecting");
            writer.shutdown().await?;
        }
        Ok(())
    }
}

async fn write_message(writer: &BoardWriter, message: &IncomingMessage, divider: u8) -> Result<()> {
    let frame = encode_frame(&encode_message(message), divider);
    let mut guard = writer.lock().await;
    let writer = guard.as_mut().ok_or(Error::Closed)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Board loop: decodes commands, queues them and answers tagged ones.
async fn run_board(
    mut reader: ReadHalf<DuplexStream>,
    mut decoder: FrameDecoder,
    writer: BoardWriter,
    commands: mpsc::UnboundedSender<DeviceCommand>,
    reply_mode: watch::Receiver<ReplyMode>,
) {
    let divider = decoder.divider();
    let mut buf = [0u8; 256];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("virtual device: host closed the link");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("virtual device read error: {}", e);
                return;
            }
        };
        decoder.feed(&buf[..n]);

        loop {
            let frame = match decoder.decode() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("virtual device frame error: {}", e);
                    continue;
                }
            };

            let (command, id) = match decode_command(&frame) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!("virtual device dropping command: {}", e);
                    continue;
                }
            };
            tracing::trace!(key = command.key().as_str(), ?id, "virtual device received command");

            if let Some(id) = id {
                let mode = *reply_mode.borrow();
                let reply = match mode {
                    ReplyMode::Ok => Some(Reply::new(id, true)),
                    ReplyMode::Error => Some(Reply::new(id, false)),
                    ReplyMode::Silent => None,
                };
                if let Some(reply) = reply {
                    let message = IncomingMessage::Reply(reply);
                    if let Err(e) = write_message(&writer, &message, divider).await {
                        tracing::debug!("virtual device could not reply: {}", e);
                    }
                }
            }

            // Nobody listening is fine; the board keeps answering
            let _ = commands.send(DeviceCommand { command, id });
        }
    }
}
