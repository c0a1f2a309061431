//! # pinlink
//!
//! An async host-side link to microcontroller boards speaking the `alp://`
//! text protocol.
//!
//! The host sends commands (pin switches, tones, key presses, custom
//! messages) and receives pin changes, custom messages and replies over any
//! byte stream: a serial port, a TCP proxy, or an in-process simulated board.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Divider-terminated framing with a configurable divider byte
//! - Listener registry with per-pin filtering and failure isolation
//! - Request/reply mode that correlates replies by message id
//! - A reference-counted cache sharing one connection per configuration
//!
//! ## Quick Start
//!
//! ```no_run
//! use pinlink::{DefaultLinkFactory, LinkCache, LinkUri, Pin, PinEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pinlink::Error> {
//!     let cache = LinkCache::new(DefaultLinkFactory);
//!     let uri: LinkUri = "ardulink://serial?port=/dev/ttyACM0&qos=true".parse()?;
//!     let link = cache.get_link(&uri).await?;
//!
//!     let on_change = |e: &PinEvent| -> pinlink::ListenerResult {
//!         println!("pin changed: {e:?}");
//!         Ok(())
//!     };
//!     link.dispatcher().add_pin_listener(Some(Pin::Digital(2)), on_change);
//!
//!     // Wait for the board to confirm
//!     if let Some(qos) = link.qos()? {
//!         qos.start_listening(Pin::Digital(2)).await?;
//!         qos.switch_digital_pin(13, true).await?;
//!     }
//!
//!     link.close().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Framing and the `alp://` codec
//! - [`types`] - Pins, messages and command payloads
//! - [`event`] - Listener registry and dispatch
//! - [`reader`] - Background frame reader
//! - [`link`] - The [`Link`] façade
//! - [`qos`] - Request/reply correlation
//! - [`cache`] - Shared links keyed by configuration
//! - [`transport`] - Serial, TCP and simulated transports

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod link;
pub mod protocol;
pub mod qos;
pub mod reader;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use cache::{LinkCache, LinkFactory, SharedLink};
pub use config::{CacheKey, LinkUri, ProtocolConfig};
pub use error::{DecodeError, Error, Result};
pub use event::{ConnectionEvent, Event, EventDispatcher, ListenerId, ListenerResult, Subscription};
pub use link::{Link, next_message_id};
pub use protocol::{Command, MessageKey};
pub use qos::{QosLink, QosState};
pub use transport::{DefaultLinkFactory, ReplyMode, VirtualDevice, list_ports};
pub use types::{IncomingMessage, KeyPress, Pin, PinEvent, Reply, Tone};
