use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use snafu::{ResultExt, Snafu};

use hearth::config::{AppConfig, ConfigError};
use hearth::context::{ContextError, load_data_context};
use hearth::controller::{SessionActivity, SessionController};
use hearth::error::ChatError;
use hearth::presenter::Presenter;
use hearth::stream::{StreamCoordinator, StreamFailure};
use hearth_llm::{BackendKind, create_backend};
use hearth_storage::{MessageAuthor, MessageRecord, MessageStatus, SessionId, SqliteStorage};

const MAX_PERSIST_ATTEMPTS: u32 = 5;

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("configuration error: {source}"))]
    Config { source: ConfigError },
    #[snafu(display("backend selection error: {source}"))]
    BackendChoice { source: hearth_llm::BackendError },
    #[snafu(display("storage error: {source}"))]
    Storage {
        source: hearth_storage::StorageError,
    },
    #[snafu(display("data context error: {source}"))]
    Context { source: ContextError },
    #[snafu(display("chat error: {source}"))]
    Chat { source: ChatError },
    #[snafu(display("failed to initialize async runtime"))]
    RuntimeInit { source: std::io::Error },
    #[snafu(display("failed to read from stdin"))]
    Stdin { source: std::io::Error },
}

type CliResult<T> = Result<T, CliError>;

/// Prints streamed fragments to stdout as they arrive.
#[derive(Default)]
struct TerminalPresenter {
    printed: usize,
}

impl Presenter for TerminalPresenter {
    fn stream_text_changed(&mut self, _session_id: SessionId, text: &str) {
        if text.len() <= self.printed {
            return;
        }

        if self.printed == 0 {
            print!("assistant: ");
        }
        print!("{}", &text[self.printed..]);
        let _ = io::stdout().flush();
        self.printed = text.len();
    }

    fn stream_completed(&mut self, _session_id: SessionId, _message: &MessageRecord) {
        self.printed = 0;
        println!();
    }

    fn stream_failed(
        &mut self,
        _session_id: SessionId,
        failure: &StreamFailure,
        message: &MessageRecord,
    ) {
        if self.printed == 0 && message.content.is_empty() {
            println!("[no response: {failure}]");
        } else {
            println!("\n[response incomplete: {failure}]");
        }
        self.printed = 0;
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    // .env traditionally carries GOOGLE_API_KEY for the cloud backend.
    let _ = dotenvy::dotenv();

    if let Err(error) = run() {
        eprintln!("hearth: {error}");
        std::process::exit(1);
    }
}

fn run() -> CliResult<()> {
    let config = AppConfig::load().context(ConfigSnafu)?;
    let backend_kind = config.backend_kind().context(BackendChoiceSnafu)?;

    let runtime = tokio::runtime::Runtime::new().context(RuntimeInitSnafu)?;
    let database_location = config.database_path.display().to_string();
    let storage = runtime
        .block_on(SqliteStorage::open(&database_location))
        .context(StorageSnafu)?;
    let data_context = load_data_context(&config.data_dir).context(ContextSnafu)?;

    let backend =
        create_backend(backend_kind, &config.backend_settings()).context(BackendChoiceSnafu)?;
    let mut controller = SessionController::new(
        Arc::new(storage),
        StreamCoordinator::new(runtime.handle().clone()),
        backend,
        config.backend_settings(),
        data_context,
        Box::new(TerminalPresenter::default()),
    );

    let mut active_session = bootstrap_session(&mut controller)?;
    println!(
        "hearth: real estate chat assistant ({} backend)",
        controller.backend_label()
    );
    println!("type a question, or /help for commands");
    print_transcript(&controller, active_session)?;

    let poll_interval = Duration::from_millis(config.poll_interval_ms.max(1));
    let stdin = io::stdin();
    prompt_marker();
    for line in stdin.lock().lines() {
        let line = line.context(StdinSnafu)?;
        match line.trim() {
            "" => {}
            "/quit" | "/exit" => break,
            "/help" => print_help(),
            "/new" => {
                active_session = controller
                    .create_session_with_welcome("")
                    .context(ChatSnafu)?
                    .id;
                print_transcript(&controller, active_session)?;
            }
            "/sessions" => print_sessions(&controller, active_session)?,
            "/retry" => drain_stream(&mut controller, active_session, poll_interval)?,
            "/cancel" => {
                if controller.cancel(active_session) {
                    drain_stream(&mut controller, active_session, poll_interval)?;
                } else {
                    println!("no active stream to cancel");
                }
            }
            command if command.starts_with("/switch ") => {
                if let Some(session_id) = resolve_switch(&controller, command)? {
                    active_session = session_id;
                    print_transcript(&controller, active_session)?;
                }
            }
            command if command.starts_with("/backend ") => {
                switch_backend(&mut controller, command);
            }
            command if command.starts_with('/') => {
                println!("unknown command {command}; try /help");
            }
            prompt_text => match controller.submit(active_session, prompt_text) {
                Ok(()) => drain_stream(&mut controller, active_session, poll_interval)?,
                Err(error) => println!("cannot send: {error}"),
            },
        }
        prompt_marker();
    }

    Ok(())
}

fn bootstrap_session(controller: &mut SessionController) -> CliResult<SessionId> {
    let sessions = controller.list_sessions().context(ChatSnafu)?;
    match sessions.first() {
        Some(session) => Ok(session.id),
        None => Ok(controller
            .create_session_with_welcome("")
            .context(ChatSnafu)?
            .id),
    }
}

/// Re-polls the controller on a periodic tick until the active stream settles.
fn drain_stream(
    controller: &mut SessionController,
    session_id: SessionId,
    poll_interval: Duration,
) -> CliResult<()> {
    let mut persist_attempts = 0_u32;
    loop {
        match controller.poll(session_id) {
            Ok(SessionActivity::Idle) => return Ok(()),
            Ok(SessionActivity::Streaming) => std::thread::sleep(poll_interval),
            Err(error) => {
                persist_attempts += 1;
                if persist_attempts >= MAX_PERSIST_ATTEMPTS {
                    println!("could not save the response: {error}; use /retry to try again");
                    return Ok(());
                }
                tracing::warn!(error = %error, "saving the response failed; retrying");
                std::thread::sleep(poll_interval);
            }
        }
    }
}

fn print_transcript(controller: &SessionController, session_id: SessionId) -> CliResult<()> {
    for message in controller.list_messages(session_id).context(ChatSnafu)? {
        let speaker = match message.author {
            MessageAuthor::User => "you",
            MessageAuthor::Assistant => "assistant",
        };
        let marker = match message.status {
            MessageStatus::Complete => "",
            MessageStatus::Failed => " [failed]",
            MessageStatus::Cancelled => " [cancelled]",
        };
        println!("{speaker}: {}{marker}", message.content);
    }
    Ok(())
}

fn print_sessions(controller: &SessionController, active_session: SessionId) -> CliResult<()> {
    for (index, session) in controller
        .list_sessions()
        .context(ChatSnafu)?
        .iter()
        .enumerate()
    {
        let marker = if session.id == active_session { "*" } else { " " };
        println!("{marker} {} {}", index + 1, session.name);
    }
    Ok(())
}

fn resolve_switch(controller: &SessionController, command: &str) -> CliResult<Option<SessionId>> {
    let raw_index = command.strip_prefix("/switch ").unwrap_or("").trim();
    let sessions = controller.list_sessions().context(ChatSnafu)?;

    match raw_index.parse::<usize>() {
        Ok(index) if (1..=sessions.len()).contains(&index) => Ok(Some(sessions[index - 1].id)),
        _ => {
            println!("usage: /switch <n> (see /sessions)");
            Ok(None)
        }
    }
}

fn switch_backend(controller: &mut SessionController, command: &str) {
    let raw_kind = command.strip_prefix("/backend ").unwrap_or("").trim();
    match raw_kind.parse::<BackendKind>() {
        Ok(kind) => match controller.set_backend(kind) {
            Ok(()) => println!("backend switched to {}", controller.backend_label()),
            Err(error) => println!("cannot switch backend: {error}"),
        },
        Err(error) => println!("{error}; choices are gemini or ollama"),
    }
}

fn print_help() {
    println!("/new            start a new chat session");
    println!("/sessions       list sessions, most recent first");
    println!("/switch <n>     switch to session n from /sessions");
    println!("/backend <name> use the gemini or ollama backend");
    println!("/cancel         cancel the active stream");
    println!("/retry          retry saving a response that failed to persist");
    println!("/quit           exit");
}

fn prompt_marker() {
    print!("> ");
    let _ = io::stdout().flush();
}
