use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ClientProperties;
use crate::error::ProtocolError;

/// Gateway opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    PresenceUpdate = 3,
    VoiceStateUpdate = 4,
    Resume = 6,
    Reconnect = 7,
    RequestGuildMembers = 8,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl OpCode {
    pub fn from_u8(op: u8) -> Option<Self> {
        Some(match op {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            4 => Self::VoiceStateUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            8 => Self::RequestGuildMembers,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Wire envelope `{op, d, s?, t?}`. `s` and `t` only appear on dispatches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    pub fn new(op: OpCode, d: Value) -> Self {
        Self { op: op.code(), d, s: None, t: None }
    }

    pub fn dispatch(sequence: u64, name: impl Into<String>, data: Value) -> Self {
        Self { op: OpCode::Dispatch.code(), d: data, s: Some(sequence), t: Some(name.into()) }
    }

    pub fn hello(heartbeat_interval_ms: u64) -> Self {
        Self::new(OpCode::Hello, serde_json::json!({ "heartbeat_interval": heartbeat_interval_ms }))
    }

    /// Heartbeat carrying the last sequence seen, or null before any dispatch.
    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self::new(OpCode::Heartbeat, sequence.map_or(Value::Null, Value::from))
    }

    pub fn identify(identify: &Identify) -> Result<Self, ProtocolError> {
        Ok(Self::new(OpCode::Identify, serde_json::to_value(identify)?))
    }

    pub fn resume(resume: &Resume) -> Result<Self, ProtocolError> {
        Ok(Self::new(OpCode::Resume, serde_json::to_value(resume)?))
    }

    pub fn voice_state_update(update: &VoiceStateUpdate) -> Result<Self, ProtocolError> {
        Ok(Self::new(OpCode::VoiceStateUpdate, serde_json::to_value(update)?))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn opcode(&self) -> Result<OpCode, ProtocolError> {
        OpCode::from_u8(self.op).ok_or(ProtocolError::UnknownOpcode(self.op))
    }

    /// Deserialize `d` into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        if self.d.is_null() {
            return Err(ProtocolError::MissingPayload { op: self.op });
        }
        Ok(T::deserialize(&self.d)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Milliseconds.
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl From<&ClientProperties> for IdentifyProperties {
    fn from(props: &ClientProperties) -> Self {
        Self { os: props.os.clone(), browser: props.browser.clone(), device: props.device.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    pub token: String,
    pub intents: u64,
    pub properties: IdentifyProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: Option<u64>,
}

/// The parts of READY the connection itself needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// Join, move between, or leave voice channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStateUpdate {
    pub guild_id: String,
    pub channel_id: Option<String>,
    pub self_mute: bool,
    pub self_deaf: bool,
}
