//! Serial/USB transport.
//!
//! Opens the board's serial port, lets it settle, drains whatever the board
//! printed while resetting and hands both halves to a [`Link`].

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::config::{CacheKey, ProtocolConfig};
use crate::error::{Error, Result};
use crate::link::Link;

/// Default baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default delay between opening the port and the first command.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(300);

/// Attribute naming the serial port.
pub const ATTR_PORT: &str = "port";

/// Attribute selecting the baud rate.
pub const ATTR_BAUDRATE: &str = "baudrate";

/// How long stale bytes are drained after the settle delay.
const DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// Configuration for the serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after opening before the link is handed out.
    pub connection_delay: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
        }
    }

    /// Reads `port` and `baudrate` from a resolved key.
    pub fn from_key(key: &CacheKey) -> Result<Self> {
        let config = Self::new(key.require(ATTR_PORT)?);
        Ok(match key.parse(ATTR_BAUDRATE)? {
            Some(rate) => config.baud_rate(rate),
            None => config,
        })
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }
}

/// Opens the serial port and starts a link over it.
///
/// # Errors
///
/// Returns an error if the port cannot be opened.
pub async fn connect(config: &SerialConfig, protocol: ProtocolConfig) -> Result<Link> {
    tracing::info!(port = %config.port, baud = config.baud_rate, "opening serial port");

    let mut stream = tokio_serial::new(&config.port, config.baud_rate)
        .open_native_async()
        .map_err(Error::Serial)?;

    // Many boards reset when RTS toggles
    if let Err(e) = tokio_serial::SerialPort::write_request_to_send(&mut stream, false) {
        tracing::warn!("failed to set RTS: {}", e);
    }

    tokio::time::sleep(config.connection_delay).await;
    drain(&mut stream).await;

    let (reader, writer) = tokio::io::split(stream);
    tracing::info!(port = %config.port, "serial link ready");
    Ok(Link::new(reader, writer, protocol))
}

/// Discards boot output so the reader starts on a frame boundary.
async fn drain(stream: &mut SerialStream) {
    let mut buf = [0u8; 1024];
    let mut total_drained = 0usize;

    let deadline = tokio::time::Instant::now() + DRAIN_WINDOW;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => total_drained += n,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }

    if total_drained > 0 {
        tracing::debug!("drained {} stale bytes from buffer", total_drained);
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0");
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.connection_delay, DEFAULT_CONNECTION_DELAY);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0")
            .baud_rate(9600)
            .connection_delay(Duration::from_secs(1));
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.connection_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_serial_config_from_key() {
        let key = CacheKey::new("serial", [("port", "COM3"), ("baudrate", "9600")]);
        let config = SerialConfig::from_key(&key).unwrap();
        assert_eq!(config.port, "COM3");
        assert_eq!(config.baud_rate, 9600);

        let key = CacheKey::new("serial", [("baudrate", "9600")]);
        assert!(matches!(
            SerialConfig::from_key(&key),
            Err(Error::MissingAttribute { .. })
        ));

        let key = CacheKey::new("serial", [("port", "COM3"), ("baudrate", "fast")]);
        assert!(matches!(
            SerialConfig::from_key(&key),
            Err(Error::InvalidAttribute { .. })
        ));
    }

    #[test]
    #[ignore = "Requires /sys/class/tty - not available in sandboxed builds"]
    fn test_list_ports() {
        // Just verify it doesn't panic
        let _ = list_ports();
    }
}
