use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use league_chat::auth::refresh::HttpTokenRefresher;
use league_chat::auth::store::{ACCESS_KEY, CredentialStore, FileStore, REFRESH_KEY, StoreError, USERNAME_KEY};
use league_chat::auth::{CredentialError, CredentialGate};
use league_chat::config::{ChatConfig, ConfigError};
use league_chat::transport::TungsteniteConnector;
use league_chat::{ChatController, ChatError, ChatHandle, SendOutcome, SessionNotice, SessionOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("stdin read failed: {0}")]
    Stdin(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "league-chat", about = "Terminal client for the league chat room")]
struct Cli {
    /// REST base used for token refresh.
    #[arg(long)]
    api_url: Option<String>,

    /// WebSocket base of the chat endpoint.
    #[arg(long)]
    ws_url: Option<String>,

    /// JSON file holding `access`, `refresh` and `username`.
    #[arg(long, env = "CHAT_STORE", default_value = "chat-credentials.json")]
    store: PathBuf,

    /// Store these values before connecting.
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    access: Option<String>,
    #[arg(long)]
    refresh: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), MainError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ChatConfig::from_lookup(|key| match key {
        "CHAT_API_URL" if cli.api_url.is_some() => cli.api_url.clone(),
        "CHAT_WS_URL" if cli.ws_url.is_some() => cli.ws_url.clone(),
        _ => std::env::var(key).ok(),
    })?;

    let store = Arc::new(FileStore::new(&cli.store));
    for (key, value) in [(USERNAME_KEY, &cli.username), (ACCESS_KEY, &cli.access), (REFRESH_KEY, &cli.refresh)] {
        if let Some(value) = value {
            store.set(key, value)?;
        }
    }

    let refresher = Arc::new(HttpTokenRefresher::new(&config.api_url, config.refresh_timeouts)?);
    let gate = Arc::new(CredentialGate::new(store.clone(), refresher));
    let controller = ChatController::new(SessionOptions::from_config(&config), gate, Arc::new(TungsteniteConnector));

    tracing::info!(
        ws_url = %config.ws_url,
        store = %cli.store.display(),
        user = %store.username(),
        "league chat starting"
    );

    let printer = tokio::spawn(print_notices(controller.subscribe()));
    let handle = controller.mount();

    let result = read_input(&handle).await;
    handle.teardown().await;
    drop(handle);
    let _ = printer.await;
    result
}

/// Forward stdin lines to the session until EOF or Ctrl-C.
async fn read_input(handle: &ChatHandle) -> Result<(), MainError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            return Ok(());
        };

        if line.trim() == "/reconnect" {
            if handle.connect().await.is_err() {
                return Ok(());
            }
            continue;
        }

        match handle.edit_draft(line).await {
            Ok(()) => {}
            Err(ChatError::SessionClosed) => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "message not sent");
                continue;
            }
        }
        match handle.submit().await {
            Ok(SendOutcome::Sent) => {}
            Ok(SendOutcome::Skipped(reason)) => tracing::info!(?reason, "message not sent"),
            Err(ChatError::SessionClosed) => return Ok(()),
            Err(e) => tracing::warn!(error = %e, "message not sent; type it again to retry"),
        }
    }
}

async fn print_notices(mut notices: broadcast::Receiver<SessionNotice>) {
    loop {
        match notices.recv().await {
            Ok(SessionNotice::Message(m)) => println!("[{}] ({}) {}: {}", m.time, m.initial(), m.user, m.text),
            Ok(SessionNotice::CredentialUnavailable(reason)) => {
                eprintln!("not signed in ({reason}); update the credential store and type /reconnect");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => tracing::warn!(skipped, "notice printer lagged"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
