use tracing::{debug, trace};

use crate::protocol::{ChatEvent, classify_chat};
use crate::transport::{ChannelHandle, WireMessage};

/// How many prior turns get replayed ahead of a new prompt. The backend
/// runs every prompt as an independent, stateless tool invocation and
/// relies on the client for conversational continuity.
pub const CONTEXT_WINDOW_TURNS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One unit of the transcript. Only the trailing turn is mutable while a
/// stream is active; everything before it is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub progress: Option<String>,
}

impl Turn {
    fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            progress: None,
        }
    }

    fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            progress: None,
        }
    }
}

/// Client side of the chat channel: accumulates streamed deltas into
/// transcript turns and tracks the progress indicator.
pub struct ChatStreamClient {
    handle: ChannelHandle,
    turns: Vec<Turn>,
    streaming: bool,
}

impl ChatStreamClient {
    pub fn new(handle: ChannelHandle) -> Self {
        Self {
            handle,
            turns: Vec::new(),
            streaming: false,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Send a prompt. Returns false without touching the transcript or the
    /// channel when the channel is not open or the trimmed text is empty.
    pub fn send(&mut self, prompt: &str) -> bool {
        let trimmed = prompt.trim();
        if trimmed.is_empty() || !self.handle.is_open() {
            trace!(target: "chat::outgoing", "prompt rejected");
            return false;
        }
        let payload = compose_prompt(&self.turns, trimmed);
        self.handle.send_text(payload);
        self.turns.push(Turn::user(trimmed));
        // The empty assistant turn is the streaming target for inbound
        // frames until `done`.
        self.turns.push(Turn::assistant(""));
        self.streaming = true;
        debug!(target: "chat::outgoing", turns = self.turns.len(), "prompt sent");
        true
    }

    pub fn handle_message(&mut self, message: WireMessage) {
        self.apply(classify_chat(message).into_event());
    }

    pub fn apply(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::Text(delta) => self.append_text(&delta),
            ChatEvent::Progress(label) => {
                if let Some(turn) = self.last_assistant_mut() {
                    turn.progress = Some(label);
                }
            }
            ChatEvent::Error(message) => self.append_error(&message),
            ChatEvent::Done => {
                self.streaming = false;
                if let Some(turn) = self.last_assistant_mut() {
                    turn.progress = None;
                }
            }
            ChatEvent::Job { job_id, preview } => {
                // Informational for now; kept for forward compatibility.
                debug!(target: "chat::incoming", job_id = %job_id, preview = %preview, "job event");
            }
            ChatEvent::Other => {}
        }
    }

    fn append_text(&mut self, delta: &str) {
        match self.turns.last_mut() {
            Some(turn) if turn.role == Role::Assistant => {
                turn.content.push_str(delta);
                turn.progress = None;
            }
            _ => self.turns.push(Turn::assistant(delta)),
        }
    }

    fn append_error(&mut self, message: &str) {
        let line = format!("Error: {message}");
        match self.turns.last_mut() {
            Some(turn) if turn.role == Role::Assistant => {
                if !turn.content.is_empty() {
                    turn.content.push_str("\n\n");
                }
                turn.content.push_str(&line);
                turn.progress = None;
            }
            _ => self.turns.push(Turn::assistant(line)),
        }
        self.streaming = false;
    }

    fn last_assistant_mut(&mut self) -> Option<&mut Turn> {
        self.turns
            .iter_mut()
            .rev()
            .find(|turn| turn.role == Role::Assistant)
    }
}

/// Prefix a new prompt with the bounded context window: the last
/// `CONTEXT_WINDOW_TURNS` prior turns as role-labelled lines. With no prior
/// turns the raw message goes out verbatim.
pub fn compose_prompt(turns: &[Turn], message: &str) -> String {
    if turns.is_empty() {
        return message.to_string();
    }
    let start = turns.len().saturating_sub(CONTEXT_WINDOW_TURNS);
    let mut prompt = String::new();
    for turn in &turns[start..] {
        prompt.push_str(turn.role.label());
        prompt.push_str(": ");
        prompt.push_str(&turn.content);
        prompt.push('\n');
    }
    prompt.push_str(Role::User.label());
    prompt.push_str(": ");
    prompt.push_str(message);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::pair;

    #[test]
    fn first_prompt_goes_out_verbatim() {
        let (handle, mut sent) = pair();
        let mut chat = ChatStreamClient::new(handle);
        assert!(chat.send("hello"));
        assert_eq!(sent.try_recv().unwrap(), WireMessage::Text("hello".into()));
        assert_eq!(chat.turns().len(), 2);
        assert_eq!(chat.turns()[0].content, "hello");
        assert!(chat.turns()[1].content.is_empty());
        assert!(chat.is_streaming());
    }

    #[test]
    fn blank_or_closed_sends_are_rejected() {
        let (handle, mut sent) = pair();
        let mut chat = ChatStreamClient::new(handle);
        assert!(!chat.send("   \n"));
        assert!(chat.turns().is_empty());
        assert!(sent.try_recv().is_err());

        let (handle, mut sent) = pair();
        handle.close();
        let mut chat = ChatStreamClient::new(handle);
        assert!(!chat.send("hello"));
        assert!(chat.turns().is_empty());
        assert!(!chat.is_streaming());
        assert!(sent.try_recv().is_err());
    }

    #[test]
    fn context_window_replays_exactly_the_last_twenty_turns() {
        let mut turns = Vec::new();
        for i in 0..13 {
            turns.push(Turn::user(format!("q{i}")));
            turns.push(Turn::assistant(format!("a{i}")));
        }
        let prompt = compose_prompt(&turns, "next");
        let lines: Vec<&str> = prompt.lines().collect();
        assert_eq!(lines.len(), CONTEXT_WINDOW_TURNS + 1);
        // 26 prior turns; the window starts at turn index 6.
        assert_eq!(lines[0], "User: q3");
        assert_eq!(lines[1], "Assistant: a3");
        assert_eq!(lines[CONTEXT_WINDOW_TURNS], "User: next");
    }

    #[test]
    fn streamed_fragments_concatenate_in_order() {
        let (handle, _sent) = pair();
        let mut chat = ChatStreamClient::new(handle);
        chat.send("hi");
        for delta in ["one ", "two ", "three"] {
            chat.apply(ChatEvent::Text(delta.into()));
        }
        assert_eq!(chat.turns().last().unwrap().content, "one two three");
    }

    #[test]
    fn progress_never_touches_content_and_is_cleared_by_text_and_done() {
        let (handle, _sent) = pair();
        let mut chat = ChatStreamClient::new(handle);
        chat.send("hi");
        chat.apply(ChatEvent::Progress("Thinking...".into()));
        let last = chat.turns().last().unwrap();
        assert_eq!(last.content, "");
        assert_eq!(last.progress.as_deref(), Some("Thinking..."));

        chat.apply(ChatEvent::Text("Hi".into()));
        assert_eq!(chat.turns().last().unwrap().progress, None);

        chat.apply(ChatEvent::Progress("Using tool: Write...".into()));
        chat.apply(ChatEvent::Done);
        let last = chat.turns().last().unwrap();
        assert_eq!(last.content, "Hi");
        assert_eq!(last.progress, None);
        assert!(!chat.is_streaming());
    }

    #[test]
    fn progress_without_an_assistant_turn_is_dropped() {
        let (handle, _sent) = pair();
        let mut chat = ChatStreamClient::new(handle);
        chat.apply(ChatEvent::Progress("Thinking...".into()));
        assert!(chat.turns().is_empty());
    }

    #[test]
    fn error_fills_an_empty_placeholder_and_ends_the_stream() {
        let (handle, _sent) = pair();
        let mut chat = ChatStreamClient::new(handle);
        chat.send("hi");
        chat.apply(ChatEvent::Error("timeout".into()));
        let last = chat.turns().last().unwrap();
        assert_eq!(last.content, "Error: timeout");
        assert_eq!(last.progress, None);
        assert!(!chat.is_streaming());
    }

    #[test]
    fn error_after_content_is_separated_by_a_blank_line() {
        let (handle, _sent) = pair();
        let mut chat = ChatStreamClient::new(handle);
        chat.send("hi");
        chat.apply(ChatEvent::Text("partial answer".into()));
        chat.apply(ChatEvent::Error("tool crashed".into()));
        assert_eq!(
            chat.turns().last().unwrap().content,
            "partial answer\n\nError: tool crashed"
        );
    }

    #[test]
    fn raw_text_frames_behave_like_text_appends() {
        let (handle, _sent) = pair();
        let mut chat = ChatStreamClient::new(handle);
        chat.send("hi");
        chat.handle_message(WireMessage::Text("legacy output".into()));
        assert_eq!(chat.turns().last().unwrap().content, "legacy output");
    }

    #[test]
    fn job_metadata_is_accepted_and_ignored() {
        let (handle, _sent) = pair();
        let mut chat = ChatStreamClient::new(handle);
        chat.send("build a page");
        chat.handle_message(WireMessage::Text(
            r#"{"job_id":"j1","preview":"/preview/j1"}"#.into(),
        ));
        assert!(chat.turns().last().unwrap().content.is_empty());
        assert!(chat.is_streaming());
    }
}
