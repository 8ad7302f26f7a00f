//! termshare — share one local terminal with browsers over WebSocket.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;

use server::auth::{AuthConfig, AuthMode};
use server::http::{self, AppState};
use server::session::{Session, SessionConfig};
use server::tokens;

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Share a local terminal with browser viewers over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "termshare", version, about)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Command to run in the PTY
    #[arg(long, default_value = "bash")]
    cmd: String,

    /// Authentication mode
    #[arg(long, value_enum, default_value = "password")]
    auth: AuthMode,

    /// Username for password auth
    #[arg(long, default_value = "term")]
    user: String,

    /// Password for password auth (auto-generated if empty)
    #[arg(long, default_value = "")]
    password: String,

    /// Access token for token auth (auto-generated if empty)
    #[arg(long, default_value = "")]
    token: String,

    /// Allow all connected clients to type input
    #[arg(long)]
    shared_input: bool,

    /// Seconds of inactivity before the session shuts down (0 disables)
    #[arg(long, default_value_t = 1800)]
    idle_timeout: u64,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Allowed WebSocket origins, comma-separated (default: same host)
    #[arg(long)]
    allow_origin: Option<String>,

    /// Mark session cookies Secure (use behind a TLS-terminating proxy)
    #[arg(long)]
    secure_cookies: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if cfg!(windows) {
        anyhow::bail!("termshare requires PTY support and does not run on Windows; use Linux or macOS");
    }

    let cli = Cli::parse();

    let level = cli.log_level.to_lowercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        anyhow::bail!(
            "invalid log level {:?}; use one of: trace, debug, info, warn, error",
            cli.log_level
        );
    }
    tracing_subscriber::fmt()
        .with_env_filter(level.as_str())
        .with_writer(std::io::stderr)
        .init();

    let mut password = cli.password.clone();
    let mut token = cli.token.clone();
    let password_enabled = matches!(cli.auth, AuthMode::Password | AuthMode::PasswordToken);
    let token_enabled = matches!(cli.auth, AuthMode::Token | AuthMode::PasswordToken);
    if password_enabled && password.is_empty() {
        password = tokens::generate_password(18);
    }
    if token_enabled && token.is_empty() {
        token = tokens::generate_token();
    }

    let auth = AuthConfig {
        mode: cli.auth,
        username: cli.user.clone(),
        password: password.clone(),
        token: token.clone(),
        secure_cookies: cli.secure_cookies,
    };

    // The session's close hook starts the HTTP drain, so the process
    // winds down whichever side goes first: child exit, idle timeout,
    // or a signal.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let session = Session::spawn(SessionConfig {
        command: cli.cmd.clone(),
        shared_input: cli.shared_input,
        idle_timeout: Duration::from_secs(cli.idle_timeout),
        on_close: Some(Box::new(move || {
            tracing::info!("PTY session ended, shutting down server");
            let _ = shutdown_tx.send(true);
        })),
    })
    .context("start session")?;

    print_banner(&cli, &password, &token);

    let state = AppState::new(Arc::clone(&session), auth, cli.allow_origin.clone());
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("bind {}", cli.listen))?;
    tracing::info!(addr = %cli.listen, "starting HTTP server");

    let signal_session = Arc::clone(&session);
    tokio::spawn(async move {
        shutdown_signal().await;
        eprintln!("\nShutting down...");
        signal_session.close().await;
    });

    http::serve(listener, router, shutdown_rx)
        .await
        .context("server error")?;

    // Normal shutdown paths have already closed the session; this only
    // matters if the listener failed independently.
    session.close().await;
    eprintln!("Goodbye.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn print_banner(cli: &Cli, password: &str, token: &str) {
    let password_enabled = matches!(cli.auth, AuthMode::Password | AuthMode::PasswordToken);
    let token_enabled = matches!(cli.auth, AuthMode::Token | AuthMode::PasswordToken);
    let base_url = format!("http://{}", cli.listen);

    eprintln!();
    eprintln!("  ┌─────────────────────────────────────────────┐");
    eprintln!("  │          termshare — terminal sharing       │");
    eprintln!("  └─────────────────────────────────────────────┘");
    eprintln!();
    let mode = match cli.auth {
        AuthMode::Password => "password",
        AuthMode::Token => "token",
        AuthMode::PasswordToken => "password+token",
    };
    eprintln!("  Auth mode    : {mode}");
    if password_enabled {
        eprintln!("  Username     : {}", cli.user);
        eprintln!("  Password     : {password}");
    }
    eprintln!("  URL          : {base_url}");
    if token_enabled {
        eprintln!("  Token URL    : {base_url}/t/{token}/");
    }
    eprintln!("  Command      : {}", cli.cmd);
    if cli.idle_timeout == 0 {
        eprintln!("  Idle timeout : disabled");
    } else {
        eprintln!("  Idle timeout : {}s", cli.idle_timeout);
    }
    if cli.shared_input {
        eprintln!("  Input        : shared (all clients can type)");
    } else {
        eprintln!("  Input        : single controller");
    }
    eprintln!();
    eprintln!("  Press Ctrl+C to stop.");
    eprintln!();
}
