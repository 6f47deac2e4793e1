use std::io::BufRead;
use std::process::ExitCode;
use std::sync::Arc;

use colored::*;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use contest_proctor::config::Config;
use contest_proctor::error::Result;
use contest_proctor::media::{ReplayCamera, SinkDirectory};
use contest_proctor::presenter;
use contest_proctor::proctoring::{HttpEvaluator, ProctoringSession, SessionEvent};
use contest_proctor::registry::{
    ChannelNavigator, FileStore, MemoryStore, NavigationGuard, PageEvent, PersistenceChannel,
    StreamRegistry,
};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_tracing();

    let config = Config::from_env();
    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Proctoring client failed");
            eprintln!("{} {}", "✗".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config: Config) -> Result<ExitCode> {
    let sinks = SinkDirectory::new();
    let platform = Arc::new(ReplayCamera::new(&config.camera.frames_dir));
    let persistence = PersistenceChannel::new(
        Arc::new(MemoryStore::new()),
        Arc::new(FileStore::new(&config.registry.state_dir)?),
    );
    let registry = StreamRegistry::new(
        platform.clone(),
        sinks.clone(),
        persistence,
        config.registry.clone(),
    );

    let (navigator, mut intents) = ChannelNavigator::new();
    let guard = Arc::new(NavigationGuard::new(registry.clone(), Arc::new(navigator)));

    let evaluator = Arc::new(HttpEvaluator::new(
        config.server_url(),
        config.server.request_timeout,
    )?);

    if registry.restore() {
        tracing::info!("Resumed camera stream from previous page");
    }

    let session = ProctoringSession::builder(
        config.server.contest_id.clone(),
        config.server.csrf_token.clone(),
        config.monitor.clone(),
        evaluator,
        platform,
        sinks,
    )
    .registry(registry.clone())
    .navigation(guard.clone())
    .build()?;

    tracing::info!(
        contest_id = %session.contest_id(),
        server = %config.server_url(),
        frames_dir = %config.camera.frames_dir.display(),
        "Proctoring client starting"
    );

    let printer = tokio::spawn(print_events(session.subscribe()));

    if !session.start().await {
        if let Some(message) = session.last_error() {
            tracing::error!(message = %message, "Proctoring did not start");
        }
        printer.abort();
        return Ok(ExitCode::FAILURE);
    }

    println!(
        "{} Type {} and press Enter after your final submission. Ctrl+C leaves the page.",
        "ℹ".cyan(),
        "submit".bold()
    );
    let mut commands = spawn_command_reader();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down proctoring");
                guard.on_page_event(PageEvent::BeforeUnload);
                session.stop();
                break;
            }
            intent = intents.recv() => {
                if let Some(intent) = intent {
                    tracing::info!(url = %intent.url(), "Leaving contest page");
                }
                break;
            }
            command = commands.recv(), if stdin_open => match command {
                Some(line) if line.trim().eq_ignore_ascii_case("submit") => {
                    session.finish_contest();
                    println!("{} Contest submitted, camera released", "✓".green());
                    break;
                }
                Some(line) => {
                    tracing::debug!(input = %line.trim(), "Ignoring unknown command");
                }
                None => stdin_open = false,
            },
        }
    }

    // Let the printer flush the final events.
    tokio::task::yield_now().await;
    printer.abort();

    Ok(if session.is_contest_terminated() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

/// Reads stdin lines on a plain thread so a pending read never holds up
/// runtime shutdown.
fn spawn_command_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Stopped reading commands from stdin");
                    break;
                }
            }
        }
    });
    rx
}

async fn print_events(mut rx: broadcast::Receiver<SessionEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(text) = presenter::render(&event) {
                    println!("{}", text);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
