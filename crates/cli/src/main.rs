use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use histwatch_format::Dialect;
use histwatch_server::{AuthToken, ServerState, AUTH_TOKEN_ENV};
use histwatch_store::HistoryStore;
use histwatch_tailer::{tail, TailConfig};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "histwatch")]
#[command(
    about = "Mirror a shell history file as a deduplicated, newest-first HTTP stream",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// History file to follow (default: ~/.bash_history)
    #[arg(long)]
    history_file: Option<PathBuf>,

    /// History file dialect: plain|extended
    #[arg(long, default_value = "plain")]
    dialect: String,

    /// Bind host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bind port
    #[arg(long, default_value_t = 14444)]
    port: u16,

    /// Durable store directory (omit to run without persistence)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Bearer token clients must present (falls back to HISTWATCH_AUTH_TOKEN)
    #[arg(long)]
    auth_token: Option<String>,

    /// Poll for file changes instead of relying on OS notifications
    #[arg(long)]
    poll: bool,

    /// Stop following once the history file is rotated or truncated
    #[arg(long)]
    no_reopen: bool,

    /// Allow binding to a non-loopback address
    #[arg(long)]
    public: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(err) = run(cli).await {
        log::error!("{err:#}");
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();
}

async fn run(cli: Cli) -> Result<()> {
    let dialect: Dialect = cli.dialect.parse()?;

    let auth_token_raw = cli
        .auth_token
        .clone()
        .or_else(|| std::env::var(AUTH_TOKEN_ENV).ok());
    let auth_token = AuthToken::parse(auth_token_raw.as_deref())?;

    let bind = format!("{}:{}", cli.host, cli.port);
    histwatch_server::resolve_guarded_bind_addrs(&bind, cli.public).await?;
    if cli.public && auth_token.is_none() {
        anyhow::bail!(
            "--public requires an auth token: set --auth-token or export {AUTH_TOKEN_ENV}"
        );
    }

    let history_file = match cli.history_file.clone() {
        Some(path) => path,
        None => dirs::home_dir()
            .context("cannot determine the home directory; pass --history-file")?
            .join(".bash_history"),
    };

    // Persistence is best effort: a store that will not open downgrades to
    // an in-memory run instead of refusing to start.
    let store = cli.db_path.as_deref().and_then(|path| {
        match HistoryStore::open(path) {
            Ok(store) => Some(store),
            Err(err) => {
                log::warn!(
                    "cannot open store at {}, running without persistence: {err}",
                    path.display()
                );
                None
            }
        }
    });

    let index = histwatch_index::shared();

    log::info!(
        "bind_address={bind}, history_file={}, dialect={}, db_path={}, token_authentication_enabled={}, polling={}",
        history_file.display(),
        dialect.as_str(),
        cli.db_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string()),
        auth_token.is_some(),
        cli.poll,
    );

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    let state = Arc::new(ServerState {
        index: index.clone(),
        auth_token,
    });
    let (server_err_tx, server_err_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        // The listener never stops on its own; either way the ingestion loop
        // hears about it and takes the whole process down.
        let err = match histwatch_server::serve(listener, state).await {
            Ok(()) => std::io::Error::new(std::io::ErrorKind::Other, "http listener stopped"),
            Err(err) => err,
        };
        let _ = server_err_tx.send(err).await;
    });

    let mut tail_config = TailConfig::new(history_file);
    tail_config.reopen = !cli.no_reopen;
    tail_config.poll = cli.poll;
    let lines = tail(tail_config)?;

    histwatch_ingest::run(index, store, dialect, lines, server_err_rx).await?;
    Ok(())
}
