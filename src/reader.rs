//! Background frame reader.
//!
//! One reader task runs per link. It accumulates bytes until the divider,
//! decodes each frame and dispatches the result, so dispatch order always
//! matches wire order.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::event::{ConnectionEvent, EventDispatcher};
use crate::protocol::{FrameDecoder, decode};

/// Runs the read loop until the source ends, fails, or `cancel` fires.
///
/// Emits [`ConnectionEvent::Established`] on start and exactly one
/// [`ConnectionEvent::Lost`] if the source ends or fails. Malformed frames
/// are logged and skipped.
///
/// # Errors
///
/// Returns an error if the source reaches end-of-stream or fails; returns
/// `Ok(())` when cancelled.
pub async fn run_read_loop<R>(
    mut reader: R,
    mut decoder: FrameDecoder,
    read_buffer: usize,
    dispatcher: EventDispatcher,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; read_buffer.max(1)];
    dispatcher.dispatch_connection(ConnectionEvent::Established);

    loop {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("frame reader stopped");
                return Ok(());
            }
            read = reader.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                tracing::info!("byte source closed");
                dispatcher.dispatch_connection(ConnectionEvent::Lost {
                    reason: "end of stream".into(),
                });
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "byte source closed",
                )));
            }
            Ok(n) => n,
            Err(e) => {
                tracing::info!("read error: {}", e);
                dispatcher.dispatch_connection(ConnectionEvent::Lost {
                    reason: e.to_string(),
                });
                return Err(Error::Io(e));
            }
        };

        tracing::trace!("received {} bytes", n);
        decoder.feed(&buf[..n]);

        // Process all complete frames
        loop {
            match decoder.decode() {
                Ok(Some(frame)) => handle_frame(&frame, &dispatcher),
                Ok(None) => break,
                Err(e) => tracing::warn!("frame error: {}", e),
            }
        }
    }
}

fn handle_frame(frame: &[u8], dispatcher: &EventDispatcher) {
    match decode(frame) {
        Ok(message) => {
            tracing::trace!("dispatching {:?}", message);
            dispatcher.dispatch(message);
        }
        Err(e) => match std::str::from_utf8(frame) {
            Ok(text) => tracing::warn!("dropping frame {:?}: {}", text, e),
            Err(_) => tracing::warn!("dropping frame 0x{}: {}", hex::encode(frame), e),
        },
    }
}
