//! Engine.IO v4 / Socket.IO v5 text framing over a WebSocket.
//!
//! Only the default namespace and text packets are handled; the backend never
//! sends binary attachments.

use std::time::Duration;

use bss_types::{protocol::OutboundMessage, BssError, Result};
use serde::Deserialize;
use serde_json::{json, Value};

pub const ENGINE_IO_PATH: &str = "/socket.io/";
pub const PONG: &str = "3";
pub const DISCONNECT: &str = "41";

/// Payload of the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

impl Handshake {
    /// How long the server may stay silent before the link counts as dead.
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    Connect(Value),
    Disconnect,
    Event { name: String, data: Value },
    ConnectError(String),
}

/// Endpoint for the WebSocket transport. A base URL such as
/// `ws://host:5000` gains the Engine.IO path and query; a full
/// `/socket.io/` URL is used as given.
pub fn endpoint(base: &str) -> String {
    if base.contains(ENGINE_IO_PATH) {
        return base.to_string();
    }
    format!(
        "{}{ENGINE_IO_PATH}?EIO=4&transport=websocket",
        base.trim_end_matches('/')
    )
}

/// Socket.IO `connect` packet for the default namespace, carrying the token as auth.
pub fn connect_packet(token: &str) -> String {
    format!("40{}", json!({ "token": token }))
}

pub fn encode(message: &OutboundMessage) -> Result<String> {
    let (name, data) = message.to_event()?;
    Ok(format!("42{}", json!([name, data])))
}

pub fn decode(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let engine = chars
        .next()
        .ok_or_else(|| protocol_error("empty packet"))?;
    let rest = chars.as_str();
    match engine {
        '0' => serde_json::from_str(rest)
            .map(Packet::Open)
            .map_err(|err| protocol_error(format!("bad open packet: {err}"))),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '6' => Ok(Packet::Noop),
        '4' => decode_socket(rest),
        other => Err(protocol_error(format!("unknown engine packet type {other:?}"))),
    }
}

fn decode_socket(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| protocol_error("empty socket packet"))?;
    let body = strip_namespace(chars.as_str());
    match kind {
        '0' => Ok(Packet::Connect(parse_optional(body)?)),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(body.trim_start_matches(|c: char| c.is_ascii_digit())),
        '4' => {
            let reason = match parse_optional(body)? {
                Value::Object(map) => {
                    let message = map.get("message").and_then(Value::as_str).map(str::to_string);
                    message.unwrap_or_else(|| Value::Object(map).to_string())
                }
                Value::String(reason) => reason,
                other => other.to_string(),
            };
            Ok(Packet::ConnectError(reason))
        }
        other => Err(protocol_error(format!("unsupported socket packet type {other:?}"))),
    }
}

fn decode_event(body: &str) -> Result<Packet> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| protocol_error(format!("bad event packet: {err}")))?;
    let Value::Array(mut items) = value else {
        return Err(protocol_error("event packet is not an array"));
    };
    if items.is_empty() {
        return Err(protocol_error("event packet has no name"));
    }
    let name = match items.remove(0) {
        Value::String(name) => name,
        other => return Err(protocol_error(format!("event name is not a string: {other}"))),
    };
    let data = if items.is_empty() {
        json!({})
    } else {
        items.remove(0)
    };
    Ok(Packet::Event { name, data })
}

fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        body.split_once(',').map_or("", |(_, rest)| rest)
    } else {
        body
    }
}

fn parse_optional(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|err| protocol_error(format!("bad packet payload: {err}")))
}

fn protocol_error(message: impl Into<String>) -> BssError {
    BssError::Protocol(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bss_types::{
        camera::CameraId,
        protocol::{InboundMessage, ServerMessage, StopStream},
    };

    #[test]
    fn base_url_gains_engine_io_path() {
        assert_eq!(
            endpoint("ws://localhost:5000/"),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
        let full = "wss://bss.example/socket.io/?EIO=4&transport=websocket";
        assert_eq!(endpoint(full), full);
    }

    #[test]
    fn decodes_open_handshake() {
        let packet =
            decode(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":5000}"#)
                .unwrap();
        let Packet::Open(handshake) = packet else {
            panic!("expected open packet");
        };
        assert_eq!(handshake.sid, "abc");
        assert_eq!(handshake.liveness_window(), Duration::from_secs(30));
    }

    #[test]
    fn outbound_commands_are_socket_io_events() {
        let text = encode(&OutboundMessage::StopStream(StopStream {
            camera_id: CameraId(2),
        }))
        .unwrap();
        assert_eq!(text, r#"42["stop_stream",{"camera_id":2}]"#);
    }

    #[test]
    fn event_with_namespace_and_ack_id_is_decoded() {
        let packet = decode(r#"42/,7["response",{"message":"ok"}]"#).unwrap();
        let Packet::Event { name, data } = packet else {
            panic!("expected event packet");
        };
        assert_eq!(
            InboundMessage::from_event(&name, data).unwrap(),
            InboundMessage::Response(ServerMessage {
                message: "ok".into()
            })
        );
    }

    #[test]
    fn control_packets_are_recognised() {
        assert_eq!(decode("2").unwrap(), Packet::Ping);
        assert_eq!(decode("1").unwrap(), Packet::Close);
        assert_eq!(decode("41").unwrap(), Packet::Disconnect);
        assert_eq!(
            decode(r#"40{"sid":"xyz"}"#).unwrap(),
            Packet::Connect(json!({"sid": "xyz"}))
        );
        assert_eq!(
            decode(r#"44{"message":"unauthorized"}"#).unwrap(),
            Packet::ConnectError("unauthorized".into())
        );
    }

    #[test]
    fn malformed_packets_are_protocol_errors() {
        assert!(matches!(decode(""), Err(BssError::Protocol(_))));
        assert!(matches!(decode("42{}"), Err(BssError::Protocol(_))));
        assert!(matches!(decode("9"), Err(BssError::Protocol(_))));
    }
}
