//! TCP transport, for boards reached through a network proxy.

use tokio::net::TcpStream;

use crate::config::{CacheKey, ProtocolConfig};
use crate::error::Result;
use crate::link::Link;

/// Default proxy host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default proxy port.
pub const DEFAULT_PORT: u16 = 4478;

/// Attribute naming the proxy host.
pub const ATTR_HOST: &str = "host";

/// Attribute naming the proxy port.
pub const ATTR_PORT: &str = "port";

/// Configuration for the TCP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
        }
    }
}

impl TcpConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Reads `host` and `port` from a resolved key, defaulting missing ones.
    pub fn from_key(key: &CacheKey) -> Result<Self> {
        Ok(Self {
            host: key.get(ATTR_HOST).unwrap_or(DEFAULT_HOST).to_owned(),
            port: key.parse(ATTR_PORT)?.unwrap_or(DEFAULT_PORT),
        })
    }
}

/// Connects to the proxy and starts a link over the socket.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn connect(config: &TcpConfig, protocol: ProtocolConfig) -> Result<Link> {
    tracing::info!(host = %config.host, port = config.port, "connecting to proxy");
    let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("failed to set TCP_NODELAY: {}", e);
    }
    let (reader, writer) = stream.into_split();
    Ok(Link::new(reader, writer, protocol))
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::error::Error;
    use crate::event::Event;
    use crate::types::IncomingMessage;

    #[test]
    fn test_tcp_config_from_key() {
        let key = CacheKey::new("tcp", [("host", "board.local"), ("port", "7000")]);
        assert_eq!(TcpConfig::from_key(&key).unwrap(), TcpConfig::new("board.local", 7000));

        let key = CacheKey::new("tcp", std::iter::empty::<(&str, &str)>());
        assert_eq!(TcpConfig::from_key(&key).unwrap(), TcpConfig::default());

        let key = CacheKey::new("tcp", [("port", "99999")]);
        assert!(matches!(
            TcpConfig::from_key(&key),
            Err(Error::InvalidAttribute { .. })
        ));
    }

    #[tokio::test]
    async fn test_link_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = TcpConfig::new("127.0.0.1", port);
        let protocol = ProtocolConfig::new().divider(b'\n');
        let (link, accepted) = tokio::join!(connect(&config, protocol), listener.accept());
        let link = link.unwrap();
        let (mut board, _) = accepted.unwrap();

        let mut sub = link.dispatcher().subscribe();
        board.write_all(b"alp://cust/hello\n").await.unwrap();
        let message = loop {
            match sub.recv().await {
                Some(Event::Message(m)) => break m,
                Some(Event::Connection(_)) => {}
                None => panic!("dispatcher dropped"),
            }
        };
        assert_eq!(message, IncomingMessage::Custom("hello".into()));

        link.send_no_tone(5).await.unwrap();
        let mut buf = [0u8; 13];
        board.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"alp://notn/5\n");
    }
}
