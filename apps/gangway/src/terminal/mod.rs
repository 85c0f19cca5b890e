use tracing::{Level, debug, trace};

use crate::protocol::{self, ControlFrame, ToolKind, TransportFrame, classify_terminal};
use crate::registry::SessionStatus;
use crate::telemetry::logging::hexdump;
use crate::transport::{ChannelEvent, ChannelHandle, WireMessage};

pub mod geometry;

use geometry::Geometry;

/// Where decoded terminal output goes. Rendering is downstream of this
/// layer; the client only needs reset/append/notice.
pub trait TerminalSurface: Send {
    fn reset(&mut self);
    fn write_bytes(&mut self, bytes: &[u8]);
    fn notice(&mut self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    AwaitingDump,
    Live,
    Closed,
    Errored,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Closed | StreamState::Errored)
    }
}

/// A run-state report for the session registry. Emitting this is the only
/// way session status changes after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTransition {
    pub session_id: String,
    pub tool: ToolKind,
    pub status: SessionStatus,
}

/// Client side of one terminal channel: applies the dump/live replay rule,
/// forwards keystrokes, and reports run-state transitions upward.
///
/// The first output frame after (re)connect is the full scrollback dump;
/// the surface is reset exactly once, before that frame and no other.
pub struct TerminalStreamClient<S: TerminalSurface> {
    session_id: String,
    surface: S,
    handle: ChannelHandle,
    state: StreamState,
    has_received_initial_dump: bool,
    geometry: Geometry,
}

impl<S: TerminalSurface> TerminalStreamClient<S> {
    pub fn new(
        session_id: impl Into<String>,
        surface: S,
        handle: ChannelHandle,
        geometry: Geometry,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            surface,
            handle,
            state: StreamState::Connecting,
            has_received_initial_dump: false,
            geometry,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Called by the geometry coordinator so the next reconnect handshake
    /// advertises current geometry.
    pub fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = geometry;
    }

    /// Forward raw input bytes to the backend PTY. Fire and forget: while
    /// the channel is closed nothing is buffered or queued.
    pub fn send_input(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if tracing::enabled!(Level::TRACE) {
            trace!(
                target: "terminal::outgoing",
                session = %self.session_id,
                bytes = bytes.len(),
                dump = %hexdump(bytes),
                "input forwarded"
            );
        }
        self.handle.send_bytes(bytes);
    }

    pub fn handle_event(&mut self, event: ChannelEvent) -> Option<SessionTransition> {
        match event {
            ChannelEvent::Opened => {
                self.send_resize();
                self.state = StreamState::AwaitingDump;
                debug!(
                    target: "terminal::stream",
                    session = %self.session_id,
                    "channel open, awaiting history dump"
                );
                None
            }
            ChannelEvent::Message(message) => self.handle_frame(classify_terminal(message)),
            ChannelEvent::Closed => {
                if !self.state.is_terminal() {
                    self.surface.notice("connection closed");
                }
                self.state = StreamState::Closed;
                None
            }
            ChannelEvent::Errored(err) => {
                if !self.state.is_terminal() {
                    self.surface.notice(&format!("connection error: {err}"));
                }
                self.state = StreamState::Errored;
                None
            }
        }
    }

    fn handle_frame(&mut self, frame: TransportFrame) -> Option<SessionTransition> {
        match frame {
            TransportFrame::Binary(bytes) => {
                self.apply_output(&bytes);
                None
            }
            TransportFrame::RawText(text) => {
                // Legacy text-only backends never send a binary dump; their
                // first text frame takes the one-time reset instead.
                self.apply_output(text.as_bytes());
                None
            }
            TransportFrame::Control(frame) => {
                let (tool, status) = SessionStatus::from_run_state(&frame)?;
                debug!(
                    target: "terminal::stream",
                    session = %self.session_id,
                    tool = %tool,
                    status = %status,
                    "run state changed"
                );
                Some(SessionTransition {
                    session_id: self.session_id.clone(),
                    tool,
                    status,
                })
            }
        }
    }

    fn apply_output(&mut self, bytes: &[u8]) {
        if self.state.is_terminal() {
            return;
        }
        if !self.has_received_initial_dump {
            self.surface.reset();
            self.has_received_initial_dump = true;
            self.state = StreamState::Live;
        }
        self.surface.write_bytes(bytes);
    }

    fn send_resize(&self) {
        let frame = ControlFrame::Resize {
            cols: self.geometry.cols,
            rows: self.geometry.rows,
        };
        if let Some(encoded) = protocol::encode_control(&frame) {
            self.handle.send_text(encoded);
        }
    }

    /// Tear down: closes the channel and hands the surface back so the
    /// caller can release it. Safe to call after the channel already died.
    pub fn shutdown(mut self) -> S {
        self.handle.close();
        self.state = StreamState::Closed;
        self.surface
    }
}

/// Append-only surface used by tests and headless embedding.
#[derive(Debug, Default)]
pub struct MemorySurface {
    content: Vec<u8>,
    resets: usize,
    notices: Vec<String>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    pub fn reset_count(&self) -> usize {
        self.resets
    }

    pub fn notices(&self) -> &[String] {
        &self.notices
    }
}

impl TerminalSurface for MemorySurface {
    fn reset(&mut self) {
        self.content.clear();
        self.resets += 1;
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.content.extend_from_slice(bytes);
    }

    fn notice(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }
}
