//! Link configuration.
//!
//! Links are described by URIs of the form
//! `scheme://<transport>?attr1=v1&attr2=v2`. A factory resolves a [`LinkUri`]
//! against its defaults into a [`CacheKey`]; equal keys share one connection.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::DEFAULT_DIVIDER;

/// Default read buffer size of the frame reader.
pub const DEFAULT_READ_BUFFER: usize = 1024;

/// Default deadline for a reply to an id-tagged command.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Attribute selecting the divider byte.
pub const ATTR_DIVIDER: &str = "divider";

/// Attribute enabling request/reply mode.
pub const ATTR_QOS: &str = "qos";

/// Attribute overriding the reply deadline.
pub const ATTR_TIMEOUT: &str = "timeout";

/// Framing and buffering settings of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Byte terminating every frame.
    pub divider: u8,
    /// Bytes read from the source per call.
    pub read_buffer: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolConfig {
    /// Creates the default configuration (divider 255).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            divider: DEFAULT_DIVIDER,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }

    /// Sets the divider byte.
    #[must_use]
    pub const fn divider(mut self, divider: u8) -> Self {
        self.divider = divider;
        self
    }

    /// Sets the read buffer size.
    #[must_use]
    pub const fn read_buffer(mut self, size: usize) -> Self {
        self.read_buffer = size;
        self
    }
}

/// A parsed link URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkUri {
    scheme: String,
    transport: String,
    attributes: BTreeMap<String, String>,
}

impl LinkUri {
    /// Parses `scheme://<transport>?a=b&c=d`.
    ///
    /// Attribute values may be percent-encoded. Duplicate attributes are
    /// rejected.
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidUri {
            uri: uri.to_owned(),
            reason: reason.to_owned(),
        };

        let (scheme, rest) = uri.split_once("://").ok_or_else(|| invalid("missing ://"))?;
        if scheme.is_empty() {
            return Err(invalid("empty scheme"));
        }

        let (transport, query) = rest.split_once('?').unwrap_or((rest, ""));
        if transport.is_empty() {
            return Err(invalid("empty transport name"));
        }

        let mut attributes = BTreeMap::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid("attribute without value"))?;
            if name.is_empty() {
                return Err(invalid("empty attribute name"));
            }
            let value = percent_decode(value).ok_or_else(|| invalid("bad percent escape"))?;
            if attributes.insert(name.to_owned(), value).is_some() {
                return Err(invalid("duplicate attribute"));
            }
        }

        Ok(Self {
            scheme: scheme.to_owned(),
            transport: transport.to_owned(),
            attributes,
        })
    }

    /// Returns the scheme.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the transport name.
    #[must_use]
    pub fn transport(&self) -> &str {
        &self.transport
    }

    /// Looks up an attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Resolves against defaults; explicit attributes win.
    #[must_use]
    pub fn resolve(&self, defaults: &[(&str, &str)]) -> CacheKey {
        let mut attributes: BTreeMap<String, String> = defaults
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        attributes.extend(self.attributes.clone());
        CacheKey {
            transport: self.transport.clone(),
            attributes,
        }
    }
}

impl FromStr for LinkUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn percent_decode(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = value.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Canonical, fully resolved link configuration.
///
/// Attribute order never matters; two keys are equal iff the transport and
/// every attribute value are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    transport: String,
    attributes: BTreeMap<String, String>,
}

impl CacheKey {
    /// Creates a key from explicit attributes.
    #[must_use]
    pub fn new<K, V>(transport: impl Into<String>, attributes: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            transport: transport.into(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Returns the transport name.
    #[must_use]
    pub fn transport(&self) -> &str {
        &self.transport
    }

    /// Looks up an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Looks up a required attribute.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name).ok_or_else(|| Error::MissingAttribute {
            name: name.to_owned(),
        })
    }

    /// Parses an optional attribute.
    pub fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        self.get(name)
            .map(|value| {
                value.parse().map_err(|_| Error::InvalidAttribute {
                    name: name.to_owned(),
                    value: value.to_owned(),
                })
            })
            .transpose()
    }

    /// Framing settings from the `divider` attribute.
    pub fn protocol_config(&self) -> Result<ProtocolConfig> {
        let divider = self.parse(ATTR_DIVIDER)?.unwrap_or(DEFAULT_DIVIDER);
        Ok(ProtocolConfig::new().divider(divider))
    }

    /// Reply deadline if the `qos` attribute is `true`.
    ///
    /// `timeout` accepts `250ms`, `5s` or a bare number of seconds.
    pub fn qos_timeout(&self) -> Result<Option<Duration>> {
        if !self.parse::<bool>(ATTR_QOS)?.unwrap_or(false) {
            return Ok(None);
        }
        match self.get(ATTR_TIMEOUT) {
            None => Ok(Some(DEFAULT_REPLY_TIMEOUT)),
            Some(value) => parse_duration(value).map(Some).ok_or_else(|| {
                Error::InvalidAttribute {
                    name: ATTR_TIMEOUT.to_owned(),
                    value: value.to_owned(),
                }
            }),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.transport)?;
        for (i, (name, value)) in self.attributes.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{name}={value}")?;
        }
        Ok(())
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    if let Some(ms) = value.strip_suffix("ms") {
        ms.parse().ok().map(Duration::from_millis)
    } else {
        let secs = value.strip_suffix('s').unwrap_or(value);
        secs.parse().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_config_builder() {
        let config = ProtocolConfig::new().divider(b'\n').read_buffer(64);
        assert_eq!(config.divider, b'\n');
        assert_eq!(config.read_buffer, 64);
        assert_eq!(ProtocolConfig::default().divider, 255);
    }

    #[test]
    fn test_parse_uri() {
        let uri = LinkUri::parse("ardulink://serial?port=%2Fdev%2FttyUSB0&baudrate=9600").unwrap();
        assert_eq!(uri.scheme(), "ardulink");
        assert_eq!(uri.transport(), "serial");
        assert_eq!(uri.attribute("port"), Some("/dev/ttyUSB0"));
        assert_eq!(uri.attribute("baudrate"), Some("9600"));
    }

    #[test]
    fn test_parse_uri_errors() {
        assert!(LinkUri::parse("serial").is_err());
        assert!(LinkUri::parse("://serial").is_err());
        assert!(LinkUri::parse("ardulink://?a=b").is_err());
        assert!(LinkUri::parse("ardulink://serial?a").is_err());
        assert!(LinkUri::parse("ardulink://serial?a=1&a=2").is_err());
        assert!(LinkUri::parse("ardulink://serial?a=%zz").is_err());
    }

    #[test]
    fn test_key_ignores_attribute_order() {
        let a: LinkUri = "x://tcp?host=h&port=1".parse().unwrap();
        let b: LinkUri = "y://tcp?port=1&host=h".parse().unwrap();
        assert_eq!(a.resolve(&[]), b.resolve(&[]));
    }

    #[test]
    fn test_resolve_fills_defaults() {
        let explicit: LinkUri = "x://serial?port=p&baudrate=115200".parse().unwrap();
        let implicit: LinkUri = "x://serial?port=p".parse().unwrap();
        let defaults = [("baudrate", "115200")];
        assert_eq!(explicit.resolve(&defaults), implicit.resolve(&defaults));

        let other: LinkUri = "x://serial?port=p&baudrate=9600".parse().unwrap();
        assert_ne!(other.resolve(&defaults), implicit.resolve(&defaults));
    }

    #[test]
    fn test_key_display_is_canonical() {
        let key = CacheKey::new("tcp", [("port", "1"), ("host", "h")]);
        assert_eq!(key.to_string(), "tcp?host=h&port=1");
    }

    #[test]
    fn test_qos_timeout() {
        let key = CacheKey::new("virtual", [("qos", "true"), ("timeout", "200ms")]);
        assert_eq!(key.qos_timeout().unwrap(), Some(Duration::from_millis(200)));

        let key = CacheKey::new("virtual", [("qos", "true")]);
        assert_eq!(key.qos_timeout().unwrap(), Some(DEFAULT_REPLY_TIMEOUT));

        let key = CacheKey::new("virtual", [("qos", "false"), ("timeout", "3")]);
        assert_eq!(key.qos_timeout().unwrap(), None);

        let key = CacheKey::new("virtual", [("qos", "yes")]);
        assert!(matches!(
            key.qos_timeout(),
            Err(Error::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn test_protocol_config_from_key() {
        let key = CacheKey::new("virtual", [("divider", "10")]);
        assert_eq!(key.protocol_config().unwrap().divider, b'\n');

        let key = CacheKey::new("virtual", [("divider", "300")]);
        assert!(key.protocol_config().is_err());
    }
}
