use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::transport::WireMessage;

/// Which CLI the backend runs inside a session's PTY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Generic,
    Claude,
    Gemini,
    Codex,
}

impl ToolKind {
    /// Forgiving parse used at the CRUD boundary and the CLI: anything
    /// unrecognized falls back to a plain shell, same as the backend.
    pub fn parse(value: &str) -> ToolKind {
        match value.trim().to_ascii_lowercase().as_str() {
            "claude" => ToolKind::Claude,
            "gemini" => ToolKind::Gemini,
            "codex" => ToolKind::Codex,
            _ => ToolKind::Generic,
        }
    }

    pub fn default_command(self) -> &'static str {
        match self {
            ToolKind::Generic => "bash -l",
            ToolKind::Claude => "claude code",
            ToolKind::Gemini => "gemini",
            ToolKind::Codex => "codex",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ToolKind::Generic => "generic",
            ToolKind::Claude => "claude",
            ToolKind::Gemini => "gemini",
            ToolKind::Codex => "codex",
        };
        f.write_str(label)
    }
}

/// Structured messages multiplexed with raw output bytes on a terminal
/// channel. `Resize` is outbound only; `Running`/`Exited` are pushed by the
/// backend when the PTY child changes run state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Resize {
        cols: u16,
        rows: u16,
    },
    Running {
        tool: ToolKind,
    },
    Exited {
        tool: ToolKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Binary(Vec<u8>),
    Control(ControlFrame),
    RawText(String),
}

/// Classify one inbound terminal-channel message. The channel carries two
/// logically different streams with no framing header, so this must never
/// fail: anything that is not a recognized control shape degrades to
/// `RawText` and gets displayed.
pub fn classify_terminal(message: WireMessage) -> TransportFrame {
    match message {
        WireMessage::Binary(bytes) => TransportFrame::Binary(bytes),
        WireMessage::Text(text) => match serde_json::from_str::<ControlFrame>(&text) {
            Ok(frame) => TransportFrame::Control(frame),
            Err(_) => TransportFrame::RawText(text),
        },
    }
}

pub fn encode_control(frame: &ControlFrame) -> Option<String> {
    serde_json::to_string(frame).ok()
}

/// Inbound chat-channel events after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Text(String),
    Progress(String),
    Error(String),
    Done,
    Job { job_id: String, preview: String },
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatFrame {
    Event(ChatEvent),
    RawText(String),
}

impl ChatFrame {
    /// Legacy raw-text frames behave exactly like a `{text}` append.
    pub fn into_event(self) -> ChatEvent {
        match self {
            ChatFrame::Event(event) => event,
            ChatFrame::RawText(text) => ChatEvent::Text(text),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawChatEvent {
    Text {
        text: String,
    },
    Progress {
        progress: String,
    },
    Error {
        error: String,
    },
    Done {
        done: bool,
    },
    Job {
        job_id: String,
        #[serde(default)]
        preview: String,
    },
}

/// Classify one inbound chat-channel message. JSON objects with an unknown
/// shape are accepted and ignored (forward compatibility); everything that
/// is not a JSON object is the legacy raw-text path.
pub fn classify_chat(message: WireMessage) -> ChatFrame {
    let text = match message {
        WireMessage::Text(text) => text,
        WireMessage::Binary(bytes) => {
            return ChatFrame::RawText(String::from_utf8_lossy(&bytes).into_owned());
        }
    };
    let value: Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(_) => return ChatFrame::RawText(text),
    };
    if !value.is_object() {
        return ChatFrame::RawText(text);
    }
    let event = match serde_json::from_value::<RawChatEvent>(value) {
        Ok(RawChatEvent::Text { text }) => ChatEvent::Text(text),
        Ok(RawChatEvent::Progress { progress }) => ChatEvent::Progress(progress),
        Ok(RawChatEvent::Error { error }) => ChatEvent::Error(error),
        Ok(RawChatEvent::Done { done: true }) => ChatEvent::Done,
        Ok(RawChatEvent::Done { done: false }) => ChatEvent::Other,
        Ok(RawChatEvent::Job { job_id, preview }) => ChatEvent::Job { job_id, preview },
        Err(_) => ChatEvent::Other,
    };
    ChatFrame::Event(event)
}
