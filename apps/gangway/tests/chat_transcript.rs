use gangway::chat::{CONTEXT_WINDOW_TURNS, ChatStreamClient, Role};
use gangway::transport::{WireMessage, pair};

fn inbound(client: &mut ChatStreamClient, raw: &str) {
    client.handle_message(WireMessage::Text(raw.into()));
}

#[test]
fn streamed_answer_lands_in_one_assistant_turn() {
    let (handle, mut sent) = pair();
    let mut chat = ChatStreamClient::new(handle);

    assert!(chat.send("add a health endpoint"));
    assert_eq!(
        sent.try_recv().unwrap(),
        WireMessage::Text("add a health endpoint".into())
    );

    inbound(&mut chat, r#"{"progress":"Thinking..."}"#);
    inbound(&mut chat, r#"{"text":"Sure. "}"#);
    inbound(&mut chat, r#"{"progress":"Using tool: Write..."}"#);
    inbound(&mut chat, r#"{"text":"Added /health."}"#);
    inbound(&mut chat, r#"{"done":true}"#);

    assert!(!chat.is_streaming());
    let turns = chat.turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].content, "Sure. Added /health.");
    assert_eq!(turns[1].progress, None);
}

#[test]
fn error_mid_stream_keeps_partial_output_and_ends_the_turn() {
    let (handle, _sent) = pair();
    let mut chat = ChatStreamClient::new(handle);
    chat.send("deploy it");

    inbound(&mut chat, r#"{"text":"Starting deploy"}"#);
    inbound(&mut chat, r#"{"error":"agent timed out"}"#);

    assert!(!chat.is_streaming());
    assert_eq!(
        chat.turns().last().unwrap().content,
        "Starting deploy\n\nError: agent timed out"
    );
}

#[test]
fn second_prompt_carries_the_prior_exchange_as_context() {
    let (handle, mut sent) = pair();
    let mut chat = ChatStreamClient::new(handle);

    chat.send("what is this repo?");
    inbound(&mut chat, r#"{"text":"A web app."}"#);
    inbound(&mut chat, r#"{"done":true}"#);
    let _ = sent.try_recv();

    chat.send("add tests");
    let WireMessage::Text(payload) = sent.try_recv().unwrap() else {
        panic!("prompt must be a text frame");
    };
    assert_eq!(
        payload,
        "User: what is this repo?\nAssistant: A web app.\nUser: add tests"
    );
}

#[test]
fn context_never_exceeds_the_window() {
    let (handle, mut sent) = pair();
    let mut chat = ChatStreamClient::new(handle);

    for i in 0..30 {
        chat.send(&format!("q{i}"));
        let _ = sent.try_recv();
        inbound(&mut chat, &format!(r#"{{"text":"a{i}"}}"#));
        inbound(&mut chat, r#"{"done":true}"#);
    }

    chat.send("final");
    let WireMessage::Text(payload) = sent.try_recv().unwrap() else {
        panic!("prompt must be a text frame");
    };
    let lines: Vec<&str> = payload.lines().collect();
    assert_eq!(lines.len(), CONTEXT_WINDOW_TURNS + 1);
    assert_eq!(lines[CONTEXT_WINDOW_TURNS], "User: final");
    // The oldest surviving line is a user turn from ten exchanges back.
    assert_eq!(lines[0], "User: q20");
}

#[test]
fn legacy_plain_text_replies_still_stream() {
    let (handle, _sent) = pair();
    let mut chat = ChatStreamClient::new(handle);
    chat.send("hello");

    inbound(&mut chat, "plain ");
    inbound(&mut chat, "reply");
    assert_eq!(chat.turns().last().unwrap().content, "plain reply");
}

#[test]
fn job_and_unknown_frames_never_disturb_the_transcript() {
    let (handle, _sent) = pair();
    let mut chat = ChatStreamClient::new(handle);
    chat.send("build a landing page");

    inbound(&mut chat, r#"{"job_id":"j42","preview":"/preview/j42"}"#);
    inbound(&mut chat, r#"{"metrics":{"tokens":812}}"#);
    assert!(chat.turns().last().unwrap().content.is_empty());
    assert!(chat.is_streaming());

    inbound(&mut chat, r#"{"text":"Done."}"#);
    inbound(&mut chat, r#"{"done":true}"#);
    assert_eq!(chat.turns().last().unwrap().content, "Done.");
}
