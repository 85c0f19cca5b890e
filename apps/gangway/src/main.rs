use clap::{Args, Parser, Subcommand};
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType, disable_raw_mode, enable_raw_mode};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use gangway::api::{ApiConfig, ApiError, CreateSessionRequest, SessionApi};
use gangway::chat::ChatStreamClient;
use gangway::protocol::{ChatEvent, ToolKind, classify_chat};
use gangway::registry::{Action, SessionRegistry, ToolTheme};
use gangway::telemetry::logging::{self as logctl, LogConfig, LogLevel};
use gangway::terminal::geometry::{
    CellMetric, GeometryCoordinator, GeometryTrigger, SurfaceBox, fit,
};
use gangway::terminal::{TerminalStreamClient, TerminalSurface};
use gangway::transport::{ChannelEvent, TransportError, websocket};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    let config = ApiConfig::new(&cli.server)?;
    match cli.command {
        Command::Sessions { command } => handle_sessions(config, command).await,
        Command::Attach(args) => handle_attach(config, args).await,
        Command::Chat => handle_chat(config).await,
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "gangway",
    about = "Attach to remote agent terminal sessions and chat with the build agent",
    author,
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "GANGWAY_SERVER",
        default_value = "http://127.0.0.1:5182",
        help = "Base URL of the session backend"
    )]
    server: String,

    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "GANGWAY_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "GANGWAY_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage sessions on the backend
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },
    /// Attach this terminal to a running session
    Attach(AttachArgs),
    /// Open an interactive chat with the build agent
    Chat,
}

#[derive(Subcommand, Debug)]
enum SessionsCommand {
    /// List sessions known to the backend
    List,
    /// Create a session and print its id
    Create {
        #[arg(long, default_value = "generic", help = "Tool to run (generic, claude, gemini, codex)")]
        tool: String,
        #[arg(long, value_name = "PATH", help = "Project directory the tool starts in")]
        project: Option<String>,
    },
    /// Delete a session, terminating its process
    Delete {
        #[arg(value_name = "SESSION_ID")]
        id: String,
    },
}

#[derive(Args, Debug)]
struct AttachArgs {
    #[arg(value_name = "SESSION_ID")]
    session_id: String,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error("invalid session id '{0}' (expected a uuid)")]
    InvalidSessionId(String),
}

async fn handle_sessions(config: ApiConfig, command: SessionsCommand) -> Result<(), CliError> {
    let api = SessionApi::new(config)?;
    match command {
        SessionsCommand::List => {
            let summaries = api.list().await?;
            let mut registry = SessionRegistry::new();
            registry.apply(Action::SessionsLoaded(
                summaries.into_iter().map(|summary| summary.into_session()).collect(),
            ));
            if registry.sessions().is_empty() {
                println!("no sessions");
                return Ok(());
            }
            for session in registry.sessions() {
                let theme = ToolTheme::for_tool(session.tool);
                let created = format_timestamp(session.created_at);
                println!(
                    "{}  {}  {}  {}  {}",
                    session.id.as_str().with(theme.dim),
                    format!("{:<18}", session.name).with(theme.accent),
                    format!("{:<7}", session.status),
                    created,
                    session.cwd.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
        SessionsCommand::Create { tool, project } => {
            let created = api
                .create(CreateSessionRequest {
                    tool: ToolKind::parse(&tool),
                    project_path: project,
                })
                .await?;
            let session = created.into_session();
            let theme = ToolTheme::for_tool(session.tool);
            println!("{}  {}", session.id, session.name.as_str().with(theme.accent));
            Ok(())
        }
        SessionsCommand::Delete { id } => {
            api.delete(&id).await?;
            println!("deleted {id}");
            Ok(())
        }
    }
}

/// Writes the remote PTY stream straight through to the local terminal.
struct StdoutSurface {
    stdout: io::Stdout,
}

impl StdoutSurface {
    fn new() -> Self {
        Self {
            stdout: io::stdout(),
        }
    }
}

impl TerminalSurface for StdoutSurface {
    fn reset(&mut self) {
        let _ = execute!(self.stdout, Clear(ClearType::All), MoveTo(0, 0));
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        let mut handle = self.stdout.lock();
        let _ = handle.write_all(bytes);
        let _ = handle.flush();
    }

    fn notice(&mut self, message: &str) {
        let mut handle = self.stdout.lock();
        let _ = write!(handle, "\r\n{}\r\n", format!("⚠️  {message}").dark_grey());
        let _ = handle.flush();
    }
}

enum AttachInput {
    Bytes(Vec<u8>),
    Resize(u16, u16),
    Detach,
}

async fn handle_attach(config: ApiConfig, args: AttachArgs) -> Result<(), CliError> {
    Uuid::parse_str(&args.session_id)
        .map_err(|_| CliError::InvalidSessionId(args.session_id.clone()))?;

    let url = config.terminal_ws_url(&args.session_id)?;
    let (handle, mut events) = websocket::connect(&url).await?;

    let cell = CellMetric::default();
    let (cols, rows) = crossterm::terminal::size()?;
    let surface_box = SurfaceBox::from_cells(cols, rows, cell);
    let initial_geometry = fit(surface_box, cell);

    let coordinator = GeometryCoordinator::spawn(handle.clone(), cell, surface_box);
    let mut client = TerminalStreamClient::new(
        &args.session_id,
        StdoutSurface::new(),
        handle.clone(),
        initial_geometry,
    );

    enable_raw_mode()?;
    let (input_tx, mut input_rx) = mpsc::unbounded_channel();
    let stop = Arc::new(AtomicBool::new(false));
    let input_thread = spawn_input_thread(input_tx, stop.clone());

    let result = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break Ok(()) };
                let terminal = matches!(event, ChannelEvent::Closed | ChannelEvent::Errored(_));
                if let Some(transition) = client.handle_event(event) {
                    debug!(
                        session = %transition.session_id,
                        tool = %transition.tool,
                        status = %transition.status,
                        "session state changed"
                    );
                }
                if terminal {
                    break Ok(());
                }
            }
            input = input_rx.recv() => {
                match input {
                    Some(AttachInput::Bytes(bytes)) => client.send_input(&bytes),
                    Some(AttachInput::Resize(cols, rows)) => {
                        let surface = SurfaceBox::from_cells(cols, rows, cell);
                        client.set_geometry(fit(surface, cell));
                        coordinator.notify(GeometryTrigger::ViewportResized(surface));
                    }
                    Some(AttachInput::Detach) | None => break Ok(()),
                }
            }
        }
    };

    stop.store(true, Ordering::SeqCst);
    disable_raw_mode()?;
    coordinator.shutdown();
    let mut surface = client.shutdown();
    surface.notice("detached (session keeps running)");
    // The reader thread wakes from poll within its timeout and exits.
    let _ = input_thread.join();
    result
}

fn spawn_input_thread(
    tx: mpsc::UnboundedSender<AttachInput>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            match event::poll(Duration::from_millis(50)) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(err) => {
                    warn!(error = %err, "input poll failed");
                    break;
                }
            }
            match event::read() {
                Ok(Event::Key(key)) => {
                    if is_detach_key(&key) {
                        let _ = tx.send(AttachInput::Detach);
                        break;
                    }
                    if let Some(bytes) = encode_key_event(key) {
                        if tx.send(AttachInput::Bytes(bytes)).is_err() {
                            break;
                        }
                    }
                }
                Ok(Event::Paste(data)) => {
                    let _ = tx.send(AttachInput::Bytes(data.into_bytes()));
                }
                Ok(Event::Resize(cols, rows)) => {
                    let _ = tx.send(AttachInput::Resize(cols, rows));
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "input read failed");
                    break;
                }
            }
        }
    })
}

fn is_detach_key(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char(c) if c.eq_ignore_ascii_case(&'q'))
}

fn encode_key_event(key: KeyEvent) -> Option<Vec<u8>> {
    match key.code {
        KeyCode::Char(c) => {
            let mut bytes = Vec::new();
            if key.modifiers.contains(KeyModifiers::ALT) {
                bytes.push(0x1b);
            }
            if key.modifiers.contains(KeyModifiers::CONTROL) {
                let lower = c.to_ascii_lowercase();
                if lower.is_ascii_lowercase() {
                    bytes.push((lower as u8 - b'a') + 1);
                } else {
                    return None;
                }
            } else {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            Some(bytes)
        }
        KeyCode::Enter => Some(vec![b'\r']),
        KeyCode::Tab => Some(vec![b'\t']),
        KeyCode::Backspace => Some(vec![0x7f]),
        KeyCode::Esc => Some(vec![0x1b]),
        KeyCode::Up => Some(b"\x1b[A".to_vec()),
        KeyCode::Down => Some(b"\x1b[B".to_vec()),
        KeyCode::Right => Some(b"\x1b[C".to_vec()),
        KeyCode::Left => Some(b"\x1b[D".to_vec()),
        KeyCode::Home => Some(b"\x1b[H".to_vec()),
        KeyCode::End => Some(b"\x1b[F".to_vec()),
        KeyCode::PageUp => Some(b"\x1b[5~".to_vec()),
        KeyCode::PageDown => Some(b"\x1b[6~".to_vec()),
        KeyCode::Delete => Some(b"\x1b[3~".to_vec()),
        KeyCode::Insert => Some(b"\x1b[2~".to_vec()),
        _ => None,
    }
}

async fn handle_chat(config: ApiConfig) -> Result<(), CliError> {
    let url = config.chat_ws_url()?;
    let (handle, mut events) = websocket::connect(&url).await?;
    let mut chat = ChatStreamClient::new(handle);

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut progress_width = 0usize;
    prompt()?;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ChannelEvent::Opened => {}
                    ChannelEvent::Message(message) => {
                        let was_streaming = chat.is_streaming();
                        let chat_event = classify_chat(message).into_event();
                        {
                            let mut stdout = io::stdout();
                            render_chat_event(&mut stdout, &chat_event, &mut progress_width)?;
                            stdout.flush()?;
                        }
                        chat.apply(chat_event);
                        if was_streaming && !chat.is_streaming() {
                            println!();
                            prompt()?;
                        }
                    }
                    ChannelEvent::Closed => {
                        println!();
                        println!("connection closed");
                        break;
                    }
                    ChannelEvent::Errored(err) => {
                        println!();
                        println!("connection error: {err}");
                        break;
                    }
                }
            }
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                if chat.is_streaming() {
                    println!("{}", "(still answering, hold on)".dark_grey());
                    continue;
                }
                if !chat.send(&line) {
                    prompt()?;
                }
            }
        }
    }
    Ok(())
}

/// Progress labels are transient: the current one sits at the end of the
/// line and is rubbed out (backspace-blank-backspace, so earlier output on
/// the line survives) before anything else is printed. `progress_width`
/// tracks the visible width of the label currently on screen, 0 for none.
fn render_chat_event(
    out: &mut impl Write,
    event: &ChatEvent,
    progress_width: &mut usize,
) -> Result<(), io::Error> {
    match event {
        ChatEvent::Text(delta) => {
            erase_progress(out, progress_width)?;
            write!(out, "{delta}")?;
        }
        ChatEvent::Progress(label) => {
            erase_progress(out, progress_width)?;
            write!(out, "{}", label.as_str().dark_grey())?;
            *progress_width = label.chars().count();
        }
        ChatEvent::Error(message) => {
            erase_progress(out, progress_width)?;
            writeln!(out, "{}", format!("Error: {message}").red())?;
        }
        ChatEvent::Done => {
            erase_progress(out, progress_width)?;
        }
        ChatEvent::Job { .. } | ChatEvent::Other => {}
    }
    Ok(())
}

fn erase_progress(out: &mut impl Write, progress_width: &mut usize) -> Result<(), io::Error> {
    for _ in 0..*progress_width {
        write!(out, "\u{8} \u{8}")?;
    }
    *progress_width = 0;
    Ok(())
}

fn prompt() -> Result<(), io::Error> {
    let mut stdout = io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}

fn format_timestamp(seconds: u64) -> String {
    OffsetDateTime::from_unix_timestamp(seconds as i64)
        .ok()
        .and_then(|timestamp| timestamp.format(&Rfc3339).ok())
        .unwrap_or_else(|| seconds.to_string())
}
