mod replay;

use std::fs::File;
use std::io::{BufReader, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::info;

use convo_session::{
    ChannelTransport, HttpBackend, Session, SessionConfig, SessionEvent, SessionHandle,
    viewer_from_token,
};
use convo_store::{ConversationStore, LoadState};
use convo_types::{ConversationId, UserId};

use crate::replay::Replay;

const USAGE: &str = "usage:
  convo replay <events.jsonl> [viewer-id]   replay an event log and print the resulting state
  convo list                                 print the conversation sidebar from the backend
  convo history <conversation-id>            print the first history page of a conversation";

/// How long `history` waits for the backend before giving up.
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convo=debug,convo_store=debug,convo_session=debug".into()),
        )
        .init();

    let config = SessionConfig::from_env()?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("replay") => {
            let path = args.get(1).context(USAGE)?;
            let viewer = match args.get(2) {
                Some(id) => UserId::from(id.as_str()),
                None => viewer_from_config(&config)?,
            };
            run_replay(path, viewer, config)
        }
        Some("list") => run_list(config).await,
        Some("history") => {
            let conversation_id = args.get(1).context(USAGE)?;
            run_history(ConversationId::from(conversation_id.as_str()), config).await
        }
        _ => bail!(USAGE),
    }
}

fn viewer_from_config(config: &SessionConfig) -> anyhow::Result<UserId> {
    let token = config
        .access_token
        .as_deref()
        .context("no viewer id given and CONVO_ACCESS_TOKEN is not set")?;
    Ok(viewer_from_token(token)?)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn run_replay(path: &str, viewer: UserId, config: SessionConfig) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path))?;
    info!(%path, %viewer, "Replaying event log");

    let mut replay = Replay::new(ConversationStore::new(viewer, config.store));
    replay.run(BufReader::new(file))?;
    print_json(&replay.report())
}

fn connect(config: SessionConfig) -> anyhow::Result<(Session<ChannelTransport, HttpBackend>, SessionHandle)> {
    let (url, token) = config.http_credentials()?;
    let viewer = viewer_from_token(token)?;
    let backend = HttpBackend::new(url, token);
    let store = ConversationStore::new(viewer, config.store);

    // No socket is wired up here; live traffic never arrives on this transport.
    Ok(Session::new(store, Arc::new(ChannelTransport::new()), Arc::new(backend)))
}

async fn run_list(config: SessionConfig) -> anyhow::Result<()> {
    let (mut session, handle) = connect(config)?;

    let count = session.bootstrap().await?;
    info!(count, "Fetched conversations");
    let task = session.spawn();
    let summaries = handle.summaries().await?;
    handle.shutdown()?;
    task.await?;
    print_json(&summaries)
}

async fn run_history(conversation_id: ConversationId, config: SessionConfig) -> anyhow::Result<()> {
    let (session, handle) = connect(config)?;
    let viewer = session.viewer().clone();
    let mut events = handle.subscribe();
    let task = session.spawn();

    handle.open(conversation_id.clone())?;
    let settled = tokio::time::timeout(FETCH_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::LoadStateChanged(id, state))
                    if id == conversation_id && state != LoadState::Loading =>
                {
                    return Ok(state);
                }
                Ok(_) => continue,
                Err(err) => return Err(err),
            }
        }
    })
    .await
    .context("timed out waiting for history")??;

    if settled == LoadState::Failed {
        bail!("history fetch for {} failed", conversation_id);
    }
    let messages = handle.snapshot(conversation_id).await?;
    info!(%viewer, count = messages.len(), "History loaded");
    handle.shutdown()?;
    task.await?;
    print_json(&messages)
}
