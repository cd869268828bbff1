//! JSON control messages carried on the transport's text channel.
//!
//! Every message is an object tagged by `"type"`. The browser sends
//! [`ClientMessage`]s; the bridge answers with [`ServerMessage`]s.
//!
//! ```json
//! {"type":"connect","host":"vm1.example.com","username":"u","password":"p"}
//! {"type":"disconnected","reason":"Connection closed"}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WireError;

// ── Inbound ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Connect(ConnectRequest),
    Disconnect,
    Ping,
    Mouse(MouseInput),
    Key(KeyInput),
    Keycombo { combo: String },
    Resize {
        #[serde(default = "default_width")]
        width: u32,
        #[serde(default = "default_height")]
        height: u32,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Connect(_) => "connect",
            ClientMessage::Disconnect => "disconnect",
            ClientMessage::Ping => "ping",
            ClientMessage::Mouse(_) => "mouse",
            ClientMessage::Key(_) => "key",
            ClientMessage::Keycombo { .. } => "keycombo",
            ClientMessage::Resize { .. } => "resize",
        }
    }
}

/// Parameters for opening a remote session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_color_depth")]
    pub color_depth: u32,
}

// Keep the password out of logs.
impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("color_depth", &self.color_depth)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MouseInput {
    pub action: String,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub button: u8,
    #[serde(default)]
    pub delta_x: i32,
    #[serde(default)]
    pub delta_y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInput {
    pub action: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub key_code: u32,
    #[serde(default)]
    pub ctrl_key: bool,
    #[serde(default)]
    pub shift_key: bool,
    #[serde(default)]
    pub alt_key: bool,
    #[serde(default)]
    pub meta_key: bool,
}

fn default_port() -> u16 {
    3389
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_color_depth() -> u32 {
    32
}

// ── Outbound ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Connected {
        width: u32,
        height: u32,
    },
    Disconnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error {
        message: String,
    },
    Pong,
    Resize {
        width: u32,
        height: u32,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        ServerMessage::Disconnected {
            reason: Some(reason.into()),
        }
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_with_defaults() {
        let msg = ClientMessage::parse(
            r#"{"type":"connect","host":"vm1.example.com","username":"alice","password":"pw"}"#,
        )
        .unwrap();
        let ClientMessage::Connect(req) = msg else {
            panic!("expected connect, got {msg:?}");
        };
        assert_eq!(req.port, 3389);
        assert_eq!((req.width, req.height), (1280, 720));
        assert_eq!(req.color_depth, 32);
        assert_eq!(req.domain, None);
    }

    #[test]
    fn camel_case_fields() {
        let msg = ClientMessage::parse(
            r#"{"type":"key","action":"down","key":"a","keyCode":65,"ctrlKey":true}"#,
        )
        .unwrap();
        let ClientMessage::Key(key) = msg else {
            panic!("expected key, got {msg:?}");
        };
        assert_eq!(key.key_code, 65);
        assert!(key.ctrl_key);
        assert!(!key.shift_key);

        let msg = ClientMessage::parse(r#"{"type":"connect","host":"h","username":"u","password":"p","colorDepth":16}"#)
            .unwrap();
        assert!(matches!(msg, ClientMessage::Connect(ConnectRequest { color_depth: 16, .. })));
    }

    #[test]
    fn unknown_type_and_bad_json_are_errors() {
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"teleport"}"#),
            Err(WireError::Encoding(_))
        ));
        assert!(ClientMessage::parse("not json").is_err());
        assert!(ClientMessage::parse(r#"{"type":"connect","host":"h"}"#).is_err());
    }

    #[test]
    fn server_messages_serialize_tagged() {
        assert_eq!(ServerMessage::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
        assert_eq!(
            ServerMessage::disconnected("Connection closed").to_json().unwrap(),
            r#"{"type":"disconnected","reason":"Connection closed"}"#
        );
        assert_eq!(
            ServerMessage::Disconnected { reason: None }.to_json().unwrap(),
            r#"{"type":"disconnected"}"#
        );
        assert_eq!(
            ServerMessage::Connected { width: 800, height: 600 }.to_json().unwrap(),
            r#"{"type":"connected","width":800,"height":600}"#
        );
    }

    #[test]
    fn password_is_redacted_in_debug() {
        let req = ConnectRequest {
            host: "h".into(),
            port: 3389,
            username: "u".into(),
            password: "hunter2".into(),
            domain: None,
            width: 1,
            height: 1,
            color_depth: 32,
        };
        let dbg = format!("{req:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
    }
}
