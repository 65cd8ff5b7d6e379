//! Voice control websocket messages.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    pub server_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectProtocolData {
    pub address: String,
    pub port: u16,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectProtocol {
    pub protocol: String,
    pub data: SelectProtocolData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub modes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub mode: String,
    pub secret_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaking {
    /// Bit flags; 1 is regular microphone audio.
    pub speaking: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    pub server_id: String,
    pub session_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    /// Milliseconds; sent as a float.
    pub heartbeat_interval: f64,
}

/// One frame on the voice control socket.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceMessage {
    Identify(Identify),
    SelectProtocol(SelectProtocol),
    Ready(Ready),
    Heartbeat(u64),
    SessionDescription(SessionDescription),
    Speaking(Speaking),
    HeartbeatAck(u64),
    Resume(Resume),
    Hello(Hello),
    Resumed,
    /// Client connect/disconnect notices (12, 13), not acted upon.
    Ignored(u8),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    op: u8,
    #[serde(default)]
    d: Value,
}

impl VoiceMessage {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Identify(_) => 0,
            Self::SelectProtocol(_) => 1,
            Self::Ready(_) => 2,
            Self::Heartbeat(_) => 3,
            Self::SessionDescription(_) => 4,
            Self::Speaking(_) => 5,
            Self::HeartbeatAck(_) => 6,
            Self::Resume(_) => 7,
            Self::Hello(_) => 8,
            Self::Resumed => 9,
            Self::Ignored(op) => *op,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let Envelope { op, d } = serde_json::from_str(text)?;
        Ok(match op {
            0 => Self::Identify(payload(op, d)?),
            1 => Self::SelectProtocol(payload(op, d)?),
            2 => Self::Ready(payload(op, d)?),
            3 => Self::Heartbeat(payload(op, d)?),
            4 => Self::SessionDescription(payload(op, d)?),
            5 => Self::Speaking(payload(op, d)?),
            6 => Self::HeartbeatAck(payload(op, d)?),
            7 => Self::Resume(payload(op, d)?),
            8 => Self::Hello(payload(op, d)?),
            9 => Self::Resumed,
            12 | 13 => Self::Ignored(op),
            other => return Err(ProtocolError::UnknownOpcode(other)),
        })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let d = match self {
            Self::Identify(v) => serde_json::to_value(v)?,
            Self::SelectProtocol(v) => serde_json::to_value(v)?,
            Self::Ready(v) => serde_json::to_value(v)?,
            Self::Heartbeat(nonce) | Self::HeartbeatAck(nonce) => Value::from(*nonce),
            Self::SessionDescription(v) => serde_json::to_value(v)?,
            Self::Speaking(v) => serde_json::to_value(v)?,
            Self::Resume(v) => serde_json::to_value(v)?,
            Self::Hello(v) => serde_json::to_value(v)?,
            Self::Resumed | Self::Ignored(_) => Value::Null,
        };
        Ok(serde_json::to_string(&Envelope { op: self.opcode(), d })?)
    }
}

fn payload<T: DeserializeOwned>(op: u8, d: Value) -> Result<T, ProtocolError> {
    if d.is_null() {
        return Err(ProtocolError::MissingPayload { op });
    }
    Ok(serde_json::from_value(d)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_description_key() {
        let text = r#"{"op":4,"d":{"mode":"xsalsa20_poly1305","secret_key":[1,2,3]}}"#;
        let msg = VoiceMessage::from_json(text).unwrap();
        assert_eq!(
            msg,
            VoiceMessage::SessionDescription(SessionDescription {
                mode: "xsalsa20_poly1305".into(),
                secret_key: vec![1, 2, 3],
            })
        );
    }

    #[test]
    fn speaking_omits_absent_fields() {
        let msg = VoiceMessage::Speaking(Speaking { speaking: 1, delay: Some(0), ssrc: Some(9), user_id: None });
        let json: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"op": 5, "d": {"speaking": 1, "delay": 0, "ssrc": 9}}));
    }

    #[test]
    fn hello_interval_is_fractional() {
        let msg = VoiceMessage::from_json(r#"{"op":8,"d":{"heartbeat_interval":13750.5}}"#).unwrap();
        assert_eq!(msg, VoiceMessage::Hello(Hello { heartbeat_interval: 13750.5 }));
    }

    #[test]
    fn client_notices_are_ignored() {
        let msg = VoiceMessage::from_json(r#"{"op":13,"d":{"user_id":"1"}}"#).unwrap();
        assert_eq!(msg, VoiceMessage::Ignored(13));
        assert!(matches!(
            VoiceMessage::from_json(r#"{"op":42,"d":null}"#),
            Err(ProtocolError::UnknownOpcode(42))
        ));
    }

    #[test]
    fn heartbeat_round_trip() {
        let text = VoiceMessage::Heartbeat(1234).to_json().unwrap();
        assert_eq!(text, r#"{"op":3,"d":1234}"#);
        assert_eq!(VoiceMessage::from_json(&text).unwrap(), VoiceMessage::Heartbeat(1234));
    }

    #[test]
    fn resumed_has_no_payload() {
        assert_eq!(VoiceMessage::from_json(r#"{"op":9,"d":null}"#).unwrap(), VoiceMessage::Resumed);
    }
}
