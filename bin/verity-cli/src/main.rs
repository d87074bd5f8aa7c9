//! Verity CLI composition root
//!
//! Loads `verity.toml`, wires adapters into the assistant runtime and runs a
//! stdin/stdout REPL. With `--stream` every wire event is printed as an SSE
//! frame, exactly as an HTTP front-end would forward it.

mod bootstrap;
mod config;

use std::sync::Arc;

use clap::Parser;
use eyre::WrapErr;
use futures_util::StreamExt;
use verity_runtime::{
    AssistantRuntime,
    core::types::{QueryMode, QueryRequest, QueryResponse, SessionId, StreamEvent},
    to_sse_frame,
};

/// Verity: a grounded assistant that answers from evidence or says it does not know.
#[derive(Parser, Debug)]
#[command(name = "verity", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "verity.toml")]
    config: String,

    /// User identity owning the conversation.
    #[arg(short, long, default_value = "cli-user")]
    user: String,

    /// Session to continue. Defaults to the user's most recent session.
    #[arg(short, long)]
    session: Option<String>,

    /// Print the raw event stream as SSE frames.
    #[arg(long)]
    stream: bool,
}

struct ReplState {
    user: String,
    session: Option<SessionId>,
    mode: QueryMode,
    stream: bool,
}

impl ReplState {
    /// Pin the REPL to a newly minted session id.
    fn start_new_session(&mut self) -> &str {
        self.session.insert(uuid::Uuid::new_v4().to_string())
    }
}

/// Run the interactive REPL loop.
#[expect(clippy::print_stderr, reason = "CLI REPL prompts and diagnostics go to stderr")]
async fn repl(runtime: Arc<dyn AssistantRuntime>, mut state: ReplState, model: &str) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    let health = runtime.health().await;
    eprintln!(
        "Verity ready  (model: {model}, tools: {}, calibration: {})",
        health.tools_registered,
        if health.calibration_ready { "on" } else { "off" }
    );
    eprintln!("Type a question and press Enter. /calibrate or /react switch mode, /quit exits.\n");

    loop {
        eprint!("> ");
        let _ = tokio::io::AsyncWriteExt::flush(&mut tokio::io::stderr()).await;

        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                eprintln!("stdin error: {e}");
                break;
            }
        };

        let input = line.trim().to_string();
        if input.is_empty() {
            continue;
        }
        match input.to_ascii_lowercase().as_str() {
            "/quit" | "/exit" => break,
            "/calibrate" => {
                state.mode = QueryMode::Calibrated;
                eprintln!("mode: calibrated");
                continue;
            }
            "/react" => {
                state.mode = QueryMode::React;
                eprintln!("mode: react");
                continue;
            }
            "/new" => {
                let session = state.start_new_session();
                eprintln!("started a new session ({session})");
                continue;
            }
            _ => {}
        }

        let mut req = QueryRequest::new(input, state.user.clone()).with_mode(state.mode);
        if let Some(session) = &state.session {
            req = req.with_session(session.clone());
        }

        let session = if state.stream {
            stream_query(runtime.as_ref(), req).await
        } else {
            match runtime.query(req).await {
                Ok(resp) => {
                    print_response(&resp);
                    Some(resp.session_id)
                }
                Err(e) => {
                    eprintln!("Error: {}", e.user_message());
                    tracing::debug!(error = %e, "query failed");
                    None
                }
            }
        };
        if session.is_some() {
            state.session = session;
        }
    }

    eprintln!("\nGoodbye!");
}

#[expect(clippy::print_stdout, reason = "renders the answer for the REPL")]
fn print_response(resp: &QueryResponse) {
    println!("{}", resp.answer);
    if !resp.sources.is_empty() {
        let refs: Vec<&str> = resp.sources.iter().map(|s| s.reference.as_str()).collect();
        println!("  sources: {}", refs.join(", "));
    }
    println!(
        "  [{:?} via {:?}, score {:.2}, {} ms]",
        resp.decision, resp.route, resp.score, resp.execution_time_ms
    );
}

/// Print each event as an SSE frame; returns the session id from `done`.
#[expect(
    clippy::print_stdout,
    clippy::print_stderr,
    reason = "renders the event stream for the REPL"
)]
async fn stream_query(runtime: &dyn AssistantRuntime, req: QueryRequest) -> Option<SessionId> {
    let mut events = match runtime.query_stream(req).await {
        Ok(events) => events,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            return None;
        }
    };

    let mut session = None;
    while let Some(event) = events.next().await {
        match to_sse_frame(&event) {
            Ok(frame) => print!("{frame}"),
            Err(e) => eprintln!("failed to encode event: {e}"),
        }
        if let StreamEvent::Done { session_id, .. } = event {
            session = Some(session_id);
        }
    }
    session
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)
        .wrap_err_with(|| format!("failed to load config from '{}'", cli.config))?;

    let runtime = bootstrap::build_runtime(&cfg, &cli.config)?;

    let state = ReplState { user: cli.user, session: cli.session, mode: QueryMode::React, stream: cli.stream };
    repl(runtime, state, &cfg.runtime.default_model).await;

    Ok(())
}
