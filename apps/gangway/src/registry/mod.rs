use crossterm::style::Color;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::{ControlFrame, ToolKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Idle,
    Stopped,
    Error,
}

impl SessionStatus {
    /// The one place run-state frames turn into a UI status. `exited` with a
    /// zero code is a clean stop; a nonzero or missing code is an error.
    pub fn from_run_state(frame: &ControlFrame) -> Option<(ToolKind, SessionStatus)> {
        match frame {
            ControlFrame::Running { tool } => Some((*tool, SessionStatus::Running)),
            ControlFrame::Exited { tool, exit_code } => {
                let status = match exit_code {
                    Some(0) => SessionStatus::Stopped,
                    _ => SessionStatus::Error,
                };
                Some((*tool, status))
            }
            ControlFrame::Resize { .. } => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Running => "running",
            SessionStatus::Idle => "idle",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub tool: ToolKind,
    pub status: SessionStatus,
    pub command: String,
    pub cwd: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Tabs,
    Grid,
}

#[derive(Debug, Clone)]
pub enum Action {
    SessionsLoaded(Vec<Session>),
    SessionCreated(Session),
    SessionClosed(String),
    SessionStateChanged {
        id: String,
        tool: ToolKind,
        status: SessionStatus,
    },
    ActiveSelected(String),
    MaximizedToggled(String),
    ViewModeChanged(ViewMode),
}

/// Process-wide session state, mutated only through `apply`. No other
/// component writes session fields directly.
#[derive(Debug, Default, Clone)]
pub struct SessionRegistry {
    sessions: Vec<Session>,
    active: Option<String>,
    maximized: Option<String>,
    view_mode: ViewMode,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|session| session.id == id)
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn maximized(&self) -> Option<&str> {
        self.maximized.as_deref()
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn apply(&mut self, action: Action) {
        match action {
            Action::SessionsLoaded(sessions) => {
                self.sessions = sessions;
                self.retain_selection();
            }
            Action::SessionCreated(session) => {
                let id = session.id.clone();
                self.sessions.push(session);
                self.active = Some(id);
            }
            Action::SessionClosed(id) => {
                self.sessions.retain(|session| session.id != id);
                if self.maximized.as_deref() == Some(id.as_str()) {
                    self.maximized = None;
                }
                if self.active.as_deref() == Some(id.as_str()) {
                    self.active = None;
                }
                if self.active.is_none() {
                    self.active = self.sessions.first().map(|session| session.id.clone());
                }
            }
            Action::SessionStateChanged { id, tool, status } => {
                // Identity, command and cwd never change after creation.
                if let Some(session) = self.sessions.iter_mut().find(|session| session.id == id) {
                    session.tool = tool;
                    session.status = status;
                }
            }
            Action::ActiveSelected(id) => {
                if self.get(&id).is_some() {
                    self.active = Some(id);
                }
            }
            Action::MaximizedToggled(id) => {
                if self.maximized.as_deref() == Some(id.as_str()) {
                    self.maximized = None;
                } else if self.get(&id).is_some() {
                    self.maximized = Some(id);
                }
            }
            Action::ViewModeChanged(mode) => {
                self.view_mode = mode;
            }
        }
    }

    fn retain_selection(&mut self) {
        let known = |selection: &Option<String>| {
            selection
                .as_deref()
                .map(|id| self.sessions.iter().any(|session| session.id == id))
                .unwrap_or(false)
        };
        if !known(&self.active) {
            self.active = self.sessions.first().map(|session| session.id.clone());
        }
        if !known(&self.maximized) {
            self.maximized = None;
        }
    }
}

/// Presentation colors per tool kind. Looked up by value, never stored on a
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolTheme {
    pub accent: Color,
    pub dim: Color,
}

impl ToolTheme {
    pub fn for_tool(tool: ToolKind) -> ToolTheme {
        match tool {
            ToolKind::Generic => ToolTheme {
                accent: Color::Rgb {
                    r: 148,
                    g: 163,
                    b: 184,
                },
                dim: Color::DarkGrey,
            },
            ToolKind::Claude => ToolTheme {
                accent: Color::Rgb {
                    r: 217,
                    g: 119,
                    b: 87,
                },
                dim: Color::DarkYellow,
            },
            ToolKind::Gemini => ToolTheme {
                accent: Color::Rgb {
                    r: 66,
                    g: 133,
                    b: 244,
                },
                dim: Color::DarkBlue,
            },
            ToolKind::Codex => ToolTheme {
                accent: Color::Rgb {
                    r: 16,
                    g: 163,
                    b: 127,
                },
                dim: Color::DarkGreen,
            },
        }
    }
}
