//! Text codec for the `alp://` protocol.
//!
//! Host side: [`encode`] / [`encode_with_id`] turn commands into payloads,
//! [`decode`] turns board payloads into [`IncomingMessage`]s.
//! Board side: [`decode_command`] and [`encode_message`] do the reverse, for
//! simulated boards and proxies.
//!
//! Payloads never include the divider; see [`crate::protocol::frame`].

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{DecodeError, Error};
use crate::protocol::command::{Command, MessageKey};
use crate::types::{IncomingMessage, KeyPress, Pin, PinEvent, Reply, Tone};

/// Scheme prefix of every message.
pub const SCHEME: &str = "alp://";

/// Query marker that asks the board for a reply.
const ID_MARKER: &str = "?id=";

/// Wire value for "play until stopped".
const NO_DURATION: i64 = -1;

/// Encodes a command without asking for a reply.
#[must_use]
pub fn encode(command: &Command) -> Bytes {
    Bytes::from(command_text(command))
}

/// Encodes a command tagged with a message id.
///
/// The board echoes the id back in its `rply` message.
#[must_use]
pub fn encode_with_id(command: &Command, id: u64) -> Bytes {
    let mut text = command_text(command);
    let _ = write!(text, "{ID_MARKER}{id}");
    Bytes::from(text)
}

fn command_text(command: &Command) -> String {
    let key = command.key().as_str();
    match command {
        Command::SwitchDigital { pin, value } => {
            format!("{SCHEME}{key}/{pin}/{}", u8::from(*value))
        }
        Command::SwitchAnalog { pin, value } => format!("{SCHEME}{key}/{pin}/{value}"),
        Command::StartListening(pin) | Command::StopListening(pin) => {
            format!("{SCHEME}{key}/{}", pin.number())
        }
        Command::Tone(tone) => {
            let duration = tone
                .duration
                .map_or_else(|| NO_DURATION.to_string(), |d| d.as_millis().to_string());
            format!("{SCHEME}{key}/{}/{}/{duration}", tone.pin, tone.hertz)
        }
        Command::NoTone { pin } => format!("{SCHEME}{key}/{pin}"),
        Command::KeyPress(k) => format!(
            "{SCHEME}{key}/chr{}cod{}loc{}mod{}mex{}",
            k.key_char, k.key_code, k.key_location, k.modifiers, k.modifiers_ex
        ),
        Command::CustomMessages(messages) => format!("{SCHEME}{key}/{}", messages.join("/")),
    }
}

/// Checks that a command encodes to exactly one well-formed frame.
///
/// # Errors
///
/// Returns [`Error::InvalidCommand`] if a custom message contains the
/// divider byte or the reply id marker.
pub fn check_encodable(command: &Command, divider: u8) -> Result<(), Error> {
    let Command::CustomMessages(messages) = command else {
        return Ok(());
    };
    for message in messages {
        if message.as_bytes().contains(&divider) {
            return Err(Error::InvalidCommand {
                reason: format!("custom message {message:?} contains the divider byte"),
            });
        }
        if message.contains(ID_MARKER) {
            return Err(Error::InvalidCommand {
                reason: format!("custom message {message:?} contains {ID_MARKER:?}"),
            });
        }
    }
    Ok(())
}

/// Decodes a payload received from the board.
///
/// # Errors
///
/// Returns a [`DecodeError`] for anything that is not a well-formed
/// host-bound message.
pub fn decode(frame: &[u8]) -> Result<IncomingMessage, DecodeError> {
    let (key, body) = split_message(frame)?;

    match key {
        MessageKey::DigitalRead => {
            let (pin, value) = pin_and_value::<u32>(body)?;
            Ok(IncomingMessage::PinValueChanged(PinEvent::Digital {
                pin,
                value: value != 0,
            }))
        }
        MessageKey::AnalogRead => {
            let (pin, value) = pin_and_value(body)?;
            Ok(IncomingMessage::PinValueChanged(PinEvent::Analog {
                pin,
                value,
            }))
        }
        MessageKey::Custom => Ok(IncomingMessage::Custom(body.to_owned())),
        MessageKey::Reply => parse_reply(body).map(IncomingMessage::Reply),
        other => Err(DecodeError::UnknownKey(other.as_str().to_owned())),
    }
}

/// Encodes a message as the board would send it.
#[must_use]
pub fn encode_message(message: &IncomingMessage) -> Bytes {
    let text = match message {
        IncomingMessage::PinValueChanged(PinEvent::Digital { pin, value }) => format!(
            "{SCHEME}{}/{pin}/{}",
            MessageKey::DigitalRead.as_str(),
            u8::from(*value)
        ),
        IncomingMessage::PinValueChanged(PinEvent::Analog { pin, value }) => {
            format!("{SCHEME}{}/{pin}/{value}", MessageKey::AnalogRead.as_str())
        }
        IncomingMessage::Custom(payload) => {
            format!("{SCHEME}{}/{payload}", MessageKey::Custom.as_str())
        }
        IncomingMessage::Reply(reply) => {
            let status = if reply.ok { "ok" } else { "ko" };
            let mut text = format!(
                "{SCHEME}{}/{status}{ID_MARKER}{}",
                MessageKey::Reply.as_str(),
                reply.id
            );
            for (name, value) in &reply.params {
                let _ = write!(text, "&{name}={value}");
            }
            text
        }
    };
    Bytes::from(text)
}

/// Decodes a payload sent to the board, returning the command and its
/// reply id if one was requested.
///
/// # Errors
///
/// Returns a [`DecodeError`] for anything that is not a well-formed
/// board-bound command.
pub fn decode_command(frame: &[u8]) -> Result<(Command, Option<u64>), DecodeError> {
    let (key, body) = split_message(frame)?;
    let (body, id) = split_id(body)?;

    let command = match key {
        MessageKey::PowerPinSwitch => {
            let (pin, value) = pin_and_value::<u32>(body)?;
            Command::SwitchDigital {
                pin,
                value: value != 0,
            }
        }
        MessageKey::PowerPinIntensity => {
            let (pin, value) = pin_and_value(body)?;
            Command::SwitchAnalog { pin, value }
        }
        MessageKey::StartListeningDigital => {
            Command::StartListening(Pin::Digital(number("pin", body)?))
        }
        MessageKey::StartListeningAnalog => {
            Command::StartListening(Pin::Analog(number("pin", body)?))
        }
        MessageKey::StopListeningDigital => {
            Command::StopListening(Pin::Digital(number("pin", body)?))
        }
        MessageKey::StopListeningAnalog => {
            Command::StopListening(Pin::Analog(number("pin", body)?))
        }
        MessageKey::Tone => Command::Tone(parse_tone(body)?),
        MessageKey::NoTone => Command::NoTone {
            pin: number("pin", body)?,
        },
        MessageKey::KeyPress => Command::KeyPress(parse_key_press(body)?),
        MessageKey::Custom => {
            let messages = if body.is_empty() {
                Vec::new()
            } else {
                body.split('/').map(str::to_owned).collect()
            };
            Command::CustomMessages(messages)
        }
        other => return Err(DecodeError::UnknownKey(other.as_str().to_owned())),
    };

    Ok((command, id))
}

/// Splits `alp://<key>/<body>` into key and body.
fn split_message(frame: &[u8]) -> Result<(MessageKey, &str), DecodeError> {
    let text = std::str::from_utf8(frame).map_err(|_| DecodeError::NotText)?;
    // Line-oriented boards may terminate with CRLF.
    let text = text.trim_end_matches('\r');
    let rest = text.strip_prefix(SCHEME).ok_or(DecodeError::MissingPrefix)?;

    let key_len = rest.find(['/', '?']).unwrap_or(rest.len());
    let (key, body) = rest.split_at(key_len);
    let key =
        MessageKey::from_key(key).ok_or_else(|| DecodeError::UnknownKey(key.to_owned()))?;
    let body = body.strip_prefix('/').unwrap_or(body);

    Ok((key, body))
}

/// Strips a trailing `?id=<n>` from a command body.
fn split_id(body: &str) -> Result<(&str, Option<u64>), DecodeError> {
    match body.rfind(ID_MARKER) {
        Some(pos) => {
            let id = number("id", &body[pos + ID_MARKER.len()..])?;
            Ok((&body[..pos], Some(id)))
        }
        None => Ok((body, None)),
    }
}

fn number<T: FromStr>(field: &'static str, value: &str) -> Result<T, DecodeError> {
    value.parse().map_err(|_| DecodeError::InvalidNumber {
        field,
        value: value.to_owned(),
    })
}

fn pin_and_value<T: FromStr>(body: &str) -> Result<(u32, T), DecodeError> {
    let (pin, value) = body
        .split_once('/')
        .ok_or(DecodeError::MissingField("value"))?;
    Ok((number("pin", pin)?, number("value", value)?))
}

/// Parses `ok?id=3&name=value` or `ko?id=3`.
fn parse_reply(body: &str) -> Result<Reply, DecodeError> {
    let (status, query) = body.split_once('?').unwrap_or((body, ""));
    let ok = match status {
        "ok" => true,
        "ko" => false,
        other => {
            return Err(DecodeError::InvalidValue {
                field: "status",
                value: other.to_owned(),
            });
        }
    };

    let mut id = None;
    let mut params = BTreeMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        if name == "id" {
            id = Some(number("id", value)?);
        } else {
            params.insert(name.to_owned(), value.to_owned());
        }
    }

    Ok(Reply {
        id: id.ok_or(DecodeError::MissingReplyId)?,
        ok,
        params,
    })
}

/// Parses `<pin>/<hertz>/<millis|-1>`.
fn parse_tone(body: &str) -> Result<Tone, DecodeError> {
    let mut parts = body.split('/');
    let pin = number("pin", parts.next().ok_or(DecodeError::MissingField("pin"))?)?;
    let hertz = number(
        "hertz",
        parts.next().ok_or(DecodeError::MissingField("hertz"))?,
    )?;
    let millis: i64 = number(
        "duration",
        parts.next().ok_or(DecodeError::MissingField("duration"))?,
    )?;

    Ok(Tone {
        pin,
        hertz,
        duration: u64::try_from(millis).ok().map(Duration::from_millis),
    })
}

/// Parses `chr<c>cod<n>loc<n>mod<n>mex<n>`.
fn parse_key_press(body: &str) -> Result<KeyPress, DecodeError> {
    let rest = body
        .strip_prefix("chr")
        .ok_or(DecodeError::MissingField("chr"))?;
    let mut chars = rest.chars();
    let key_char = chars.next().ok_or(DecodeError::MissingField("chr"))?;
    let rest = chars
        .as_str()
        .strip_prefix("cod")
        .ok_or(DecodeError::MissingField("cod"))?;
    let (code, rest) = rest
        .split_once("loc")
        .ok_or(DecodeError::MissingField("loc"))?;
    let (location, rest) = rest
        .split_once("mod")
        .ok_or(DecodeError::MissingField("mod"))?;
    let (modifiers, modifiers_ex) = rest
        .split_once("mex")
        .ok_or(DecodeError::MissingField("mex"))?;

    Ok(KeyPress {
        key_char,
        key_code: number("cod", code)?,
        key_location: number("loc", location)?,
        modifiers: number("mod", modifiers)?,
        modifiers_ex: number("mex", modifiers_ex)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_DIVIDER;

    #[test]
    fn test_encode_pin_switches() {
        let cmd = Command::SwitchDigital {
            pin: 13,
            value: true,
        };
        assert_eq!(encode(&cmd), Bytes::from_static(b"alp://ppsw/13/1"));

        let cmd = Command::SwitchAnalog { pin: 9, value: 255 };
        assert_eq!(encode(&cmd), Bytes::from_static(b"alp://ppin/9/255"));
    }

    #[test]
    fn test_encode_with_id() {
        let cmd = Command::StartListening(Pin::Analog(2));
        assert_eq!(
            encode_with_id(&cmd, 42),
            Bytes::from_static(b"alp://srla/2?id=42")
        );
    }

    #[test]
    fn test_encode_tone() {
        let cmd = Command::Tone(Tone::new(3, 440));
        assert_eq!(encode(&cmd), Bytes::from_static(b"alp://tone/3/440/-1"));

        let cmd = Command::Tone(Tone::new(3, 440).duration(Duration::from_millis(250)));
        assert_eq!(encode(&cmd), Bytes::from_static(b"alp://tone/3/440/250"));
    }

    #[test]
    fn test_encode_key_press() {
        let cmd = Command::KeyPress(KeyPress {
            key_char: 'a',
            key_code: 65,
            key_location: 1,
            modifiers: 0,
            modifiers_ex: 64,
        });
        assert_eq!(
            encode(&cmd),
            Bytes::from_static(b"alp://kprs/chracod65loc1mod0mex64")
        );
    }

    #[test]
    fn test_decode_pin_events() {
        assert_eq!(
            decode(b"alp://dred/7/1").unwrap(),
            IncomingMessage::PinValueChanged(PinEvent::Digital {
                pin: 7,
                value: true
            })
        );
        assert_eq!(
            decode(b"alp://ared/0/1023").unwrap(),
            IncomingMessage::PinValueChanged(PinEvent::Analog {
                pin: 0,
                value: 1023
            })
        );
    }

    #[test]
    fn test_decode_reply() {
        let msg = decode(b"alp://rply/ok?id=17&temp=21&unit=C").unwrap();
        let IncomingMessage::Reply(reply) = msg else {
            panic!("expected reply");
        };
        assert_eq!(reply.id, 17);
        assert!(reply.ok);
        assert_eq!(reply.param("temp"), Some("21"));
        assert_eq!(reply.param("unit"), Some("C"));
        assert_eq!(reply.param("id"), None);

        let msg = decode(b"alp://rply/ko?id=18").unwrap();
        assert_eq!(msg, IncomingMessage::Reply(Reply::new(18, false)));
    }

    #[test]
    fn test_decode_tolerates_crlf() {
        assert_eq!(
            decode(b"alp://cust/hello\r").unwrap(),
            IncomingMessage::Custom("hello".into())
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode(&[0xC3, 0x28]), Err(DecodeError::NotText));
        assert_eq!(decode(b"http://x"), Err(DecodeError::MissingPrefix));
        assert_eq!(
            decode(b"alp://zzzz/1"),
            Err(DecodeError::UnknownKey("zzzz".into()))
        );
        assert_eq!(
            decode(b"alp://ppsw/1/1"),
            Err(DecodeError::UnknownKey("ppsw".into()))
        );
        assert_eq!(
            decode(b"alp://ared/3"),
            Err(DecodeError::MissingField("value"))
        );
        assert!(matches!(
            decode(b"alp://ared/x/3"),
            Err(DecodeError::InvalidNumber { field: "pin", .. })
        ));
        assert_eq!(decode(b"alp://rply/ok"), Err(DecodeError::MissingReplyId));
        assert!(matches!(
            decode(b"alp://rply/maybe?id=1"),
            Err(DecodeError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_custom_messages_round_trip() {
        let cmd = Command::CustomMessages(vec!["led".into(), "blink".into()]);
        assert_eq!(
            decode(&encode(&cmd)).unwrap(),
            IncomingMessage::Custom("led/blink".into())
        );
    }

    #[test]
    fn test_encode_message_matches_decode() {
        let reply = Reply::new(5, true).with_param("a", "1");
        let msg = IncomingMessage::Reply(reply);
        assert_eq!(
            encode_message(&msg),
            Bytes::from_static(b"alp://rply/ok?id=5&a=1")
        );
        assert_eq!(decode(&encode_message(&msg)).unwrap(), msg);

        let msg = IncomingMessage::PinValueChanged(PinEvent::Digital {
            pin: 4,
            value: false,
        });
        assert_eq!(decode(&encode_message(&msg)).unwrap(), msg);
    }

    #[test]
    fn test_decode_command_reads_id() {
        let cmd = Command::Tone(Tone::new(5, 880).duration(Duration::from_secs(1)));
        let (decoded, id) = decode_command(&encode_with_id(&cmd, 9)).unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(id, Some(9));

        let cmd = Command::KeyPress(KeyPress::new('7', 55));
        let (decoded, id) = decode_command(&encode(&cmd)).unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(id, None);
    }

    #[test]
    fn test_decode_command_rejects_host_bound() {
        assert_eq!(
            decode_command(b"alp://dred/1/1"),
            Err(DecodeError::UnknownKey("dred".into()))
        );
    }

    #[test]
    fn test_check_encodable_rejects_frame_breaking_messages() {
        let ok = Command::CustomMessages(vec!["led".into(), "a/b".into()]);
        assert!(check_encodable(&ok, b'\n').is_ok());
        assert!(check_encodable(&Command::NoTone { pin: 3 }, b'\n').is_ok());

        let divider = Command::CustomMessages(vec!["one\ntwo".into()]);
        assert!(matches!(
            check_encodable(&divider, b'\n'),
            Err(Error::InvalidCommand { .. })
        ));
        assert!(check_encodable(&divider, DEFAULT_DIVIDER).is_ok());

        let marker = Command::CustomMessages(vec!["x?id=7".into()]);
        assert!(matches!(
            check_encodable(&marker, DEFAULT_DIVIDER),
            Err(Error::InvalidCommand { .. })
        ));
    }
}
