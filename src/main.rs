//! Clayo widget command line
//!
//! `chat` drives the real widget pipeline from a terminal, `render` prints the
//! widget markup, `serve` runs the development backend.

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::default_trait_access)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use clayo_widget::config::{AppConfig, Command, RenderState};
use clayo_widget::devserver::{DevState, router};
use clayo_widget::render::{UiState, render_widget};
use clayo_widget::transport::ChatTransport;
use clayo_widget::{HostPage, HttpTransport, TerminalSurface, WidgetConfig, WidgetError, load};

#[tokio::main]
async fn main() {
    // Load .env (if present) before clap reads env aliases
    let _ = dotenv();

    // Initialize tracing (M-LOG-STRUCTURED)
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (cli, config) = match AppConfig::load() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command.clone().unwrap_or(Command::Chat) {
        Command::Chat => run_chat(&config).await,
        Command::Render { state } => run_render(&config, state),
        Command::Serve { .. } => run_serve(&config).await,
    };

    if let Err(e) = result {
        error!(name: "cli.failed", error = %e, "Command failed");
        std::process::exit(1);
    }
}

async fn run_chat(config: &AppConfig) -> anyhow::Result<()> {
    let mut globals = config.host_globals()?;
    globals
        .entry("utcOffsetMinutes")
        .or_insert_with(|| Local::now().offset().local_minus_utc().div_euclid(60).into());
    let preview = WidgetConfig::default().merge(&globals)?;

    let surface = Arc::new(TerminalSurface::new(preview.agent_name.clone()));
    let page = HostPage::new(globals, "cli://clayo-widget", surface);
    let transport: Arc<dyn ChatTransport> = Arc::new(HttpTransport::new());

    let widget = load(&page, transport)
        .await
        .context("widget failed to load, see the log for the reason")?;
    if let Err(e) = widget.open().await {
        warn!(name: "chat.session.deferred", error = %e, "No session yet, will retry on send");
    }

    let welcome = widget.config();
    println!("{}: {}", welcome.agent_name, welcome.welcome_message);
    println!("(/reset starts over, /quit exits, Ctrl-C stops a reply)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match line.trim() {
            "/quit" | "/exit" => break,
            "/reset" => {
                widget.reset_chat();
                println!("Conversation cleared.");
                continue;
            }
            _ => {}
        }

        let send = widget.send_message(&line);
        tokio::pin!(send);
        let outcome = tokio::select! {
            outcome = &mut send => outcome,
            _ = tokio::signal::ctrl_c() => {
                widget.close();
                send.await
            }
        };
        match outcome {
            Ok(()) | Err(WidgetError::EmptyMessage | WidgetError::Cancelled) => {}
            Err(e) => warn!(name: "chat.send.failed", error = %e, "Message not answered"),
        }
    }

    page.unload();
    Ok(())
}

fn run_render(config: &AppConfig, state: RenderState) -> anyhow::Result<()> {
    let widget = WidgetConfig::default().merge(&config.host_globals()?)?;
    widget.validate()?;

    let ui = UiState {
        is_open: state != RenderState::Closed,
        is_minimized: state == RenderState::Minimized,
        ..UiState::closed()
    };
    println!("{}", render_widget(&widget, &ui, &[]));
    Ok(())
}

async fn run_serve(config: &AppConfig) -> anyhow::Result<()> {
    let demo = WidgetConfig::default().merge(&config.host_globals()?)?;
    let app = router(DevState::new(demo));

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    info!(
        name: "server.started",
        address = %format!("http://{address}"),
        "Dev backend started"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
