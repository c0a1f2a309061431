//! Transports that carry the byte stream to a board.
//!
//! Each transport only opens a byte source and sink and wraps them in a
//! [`Link`]; framing and dispatch are shared. [`DefaultLinkFactory`] picks
//! the transport from a URI's transport name:
//!
//! | name      | attributes                         |
//! |-----------|------------------------------------|
//! | `serial`  | `port` (required), `baudrate`      |
//! | `tcp`     | `host`, `port`                     |
//! | `virtual` | none                               |

pub mod serial;
pub mod tcp;
pub mod virtual_device;

use futures::future::BoxFuture;

use crate::cache::LinkFactory;
use crate::config::{ATTR_DIVIDER, ATTR_QOS, CacheKey, LinkUri};
use crate::error::{Error, Result};
use crate::link::Link;

pub use serial::{SerialConfig, list_ports};
pub use tcp::TcpConfig;
pub use virtual_device::{DeviceCommand, ReplyMode, VirtualDevice};

/// Transport name of the serial transport.
pub const SERIAL: &str = "serial";

/// Transport name of the TCP transport.
pub const TCP: &str = "tcp";

/// Transport name of the simulated board.
pub const VIRTUAL: &str = "virtual";

/// Opens links over the built-in transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLinkFactory;

impl DefaultLinkFactory {
    /// Returns the default attributes of a transport.
    fn defaults(transport: &str) -> Result<Vec<(&'static str, String)>> {
        let mut defaults = vec![
            (ATTR_DIVIDER, crate::protocol::DEFAULT_DIVIDER.to_string()),
            (ATTR_QOS, false.to_string()),
        ];
        match transport {
            SERIAL => defaults.push((serial::ATTR_BAUDRATE, serial::DEFAULT_BAUD_RATE.to_string())),
            TCP => {
                defaults.push((tcp::ATTR_HOST, tcp::DEFAULT_HOST.to_owned()));
                defaults.push((tcp::ATTR_PORT, tcp::DEFAULT_PORT.to_string()));
            }
            VIRTUAL => {}
            other => {
                return Err(Error::UnknownTransport {
                    name: other.to_owned(),
                });
            }
        }
        Ok(defaults)
    }
}

impl LinkFactory for DefaultLinkFactory {
    fn resolve(&self, uri: &LinkUri) -> Result<CacheKey> {
        let defaults = Self::defaults(uri.transport())?;
        let defaults: Vec<(&str, &str)> = defaults.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let key = uri.resolve(&defaults);

        if key.transport() == SERIAL {
            key.require(serial::ATTR_PORT)?;
        }
        // Reject bad values before anything is opened
        key.protocol_config()?;
        key.qos_timeout()?;
        Ok(key)
    }

    fn create<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Link>> {
        Box::pin(async move {
            let protocol = key.protocol_config()?;
            match key.transport() {
                SERIAL => serial::connect(&SerialConfig::from_key(key)?, protocol).await,
                TCP => tcp::connect(&TcpConfig::from_key(key)?, protocol).await,
                VIRTUAL => {
                    let (link, _device) = virtual_device::connect(protocol);
                    Ok(link)
                }
                other => Err(Error::UnknownTransport {
                    name: other.to_owned(),
                }),
            }
        })
    }
}
