use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use convo_store::{
    ConversationStore, Draft, HistoryOutcome, HistoryRequest, HistoryTicket, LoadState,
    NetworkError, SeenOutcome, summary_from_record,
};
use convo_types::events::{InboundChannel, OutboundIntent};
use convo_types::{ConversationId, ConversationSummary, Message, UserId};

use crate::backend::Backend;
use crate::error::{BackendError, SessionError};
use crate::transport::{Subscription, Transport};

/// Change notifications for whoever renders the store.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    MessagesChanged(ConversationId),
    SummariesChanged,
    LoadStateChanged(ConversationId, LoadState),
}

enum Command {
    Open(ConversationId),
    Close,
    LoadOlder(ConversationId),
    Scrolled {
        conversation_id: ConversationId,
        proximity_to_top: f64,
    },
    Send {
        conversation_id: ConversationId,
        draft: Draft,
        reply: oneshot::Sender<Result<Uuid, SessionError>>,
    },
    Snapshot {
        conversation_id: ConversationId,
        reply: oneshot::Sender<Vec<Message>>,
    },
    Summaries {
        reply: oneshot::Sender<Vec<ConversationSummary>>,
    },
    QueryLoadState {
        conversation_id: ConversationId,
        reply: oneshot::Sender<LoadState>,
    },
    Shutdown,
}

type HistoryResult = (HistoryTicket, Result<Vec<Value>, NetworkError>);

/// Cheap, cloneable access to a running [`Session`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn open(&self, conversation_id: ConversationId) -> Result<(), SessionError> {
        self.send(Command::Open(conversation_id))
    }

    pub fn close(&self) -> Result<(), SessionError> {
        self.send(Command::Close)
    }

    pub fn load_older(&self, conversation_id: ConversationId) -> Result<(), SessionError> {
        self.send(Command::LoadOlder(conversation_id))
    }

    /// Report how far the viewport is from the top of the loaded history.
    pub fn scrolled(&self, conversation_id: ConversationId, proximity_to_top: f64) -> Result<(), SessionError> {
        self.send(Command::Scrolled {
            conversation_id,
            proximity_to_top,
        })
    }

    /// Queue a message. Returns the local handle of the optimistic send.
    pub async fn send_message(&self, conversation_id: ConversationId, draft: Draft) -> Result<Uuid, SessionError> {
        self.ask(|reply| Command::Send {
            conversation_id,
            draft,
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self, conversation_id: ConversationId) -> Result<Vec<Message>, SessionError> {
        self.ask(|reply| Command::Snapshot {
            conversation_id,
            reply,
        })
        .await
    }

    pub async fn summaries(&self) -> Result<Vec<ConversationSummary>, SessionError> {
        self.ask(|reply| Command::Summaries { reply }).await
    }

    pub async fn load_state(&self, conversation_id: ConversationId) -> Result<LoadState, SessionError> {
        self.ask(|reply| Command::QueryLoadState {
            conversation_id,
            reply,
        })
        .await
    }

    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(Command::Shutdown)
    }
}

/// Owns the store and runs every mutation on one task: commands from the
/// UI, inbound transport events and history fetch completions are handled
/// one at a time in arrival order.
pub struct Session<T: Transport, B: Backend> {
    store: ConversationStore,
    transport: Arc<T>,
    backend: Arc<B>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<SessionEvent>,
    history_tx: mpsc::UnboundedSender<HistoryResult>,
    history_rx: mpsc::UnboundedReceiver<HistoryResult>,
}

impl<T: Transport, B: Backend> Session<T, B> {
    pub fn new(store: ConversationStore, transport: Arc<T>, backend: Arc<B>) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        let (history_tx, history_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            commands: commands_tx,
            events: events.clone(),
        };
        let session = Self {
            store,
            transport,
            backend,
            commands,
            events,
            history_tx,
            history_rx,
        };
        (session, handle)
    }

    pub fn viewer(&self) -> &UserId {
        self.store.viewer()
    }

    /// Load the conversation list and seed the sidebar. Peer profiles for
    /// direct conversations are fetched concurrently; a failed lookup falls
    /// back to the record's own name.
    pub async fn bootstrap(&mut self) -> Result<usize, BackendError> {
        let records = self.backend.fetch_conversations().await?;
        let viewer = self.store.viewer().as_str();
        let backend = &self.backend;

        let lookups = records.iter().map(|record| async move {
            if record.is_group {
                return None;
            }
            let member = record.other_member(viewer)?;
            match backend.fetch_profile(&UserId::from(member.user_id.as_str())).await {
                Ok(profile) => Some(profile),
                Err(err) => {
                    warn!(conversation_id = %record.id, error = %err, "Peer profile lookup failed");
                    None
                }
            }
        });
        let peers = join_all(lookups).await;

        let config = self.store.config();
        let summaries: Vec<ConversationSummary> = records
            .iter()
            .zip(peers.iter())
            .map(|(record, peer)| summary_from_record(record, peer.as_ref(), config))
            .collect();
        let count = summaries.len();
        self.store.seed_summaries(summaries);
        info!(count, "Conversation list loaded");
        self.notify(SessionEvent::SummariesChanged);
        Ok(count)
    }

    /// Run the session on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        self.transport.connect();
        let mut live = self.transport.on(InboundChannel::LiveMessage);
        let mut seen: Option<Subscription> = None;

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if !self.handle_command(command, &mut seen) {
                        break;
                    }
                }
                payload = live.events.recv() => {
                    match payload {
                        Some(payload) => self.on_live_message(payload),
                        None => {
                            warn!("Live message subscription closed");
                            break;
                        }
                    }
                }
                payload = next_event(&mut seen) => {
                    match payload {
                        Some(payload) => self.on_seen_receipt(payload),
                        None => {
                            debug!("Seen receipt subscription closed by transport");
                            seen = None;
                        }
                    }
                }
                Some((ticket, result)) = self.history_rx.recv() => {
                    self.on_history(ticket, result);
                }
            }
        }

        if let Some(subscription) = seen.take() {
            self.transport.off(subscription);
        }
        self.transport.off(live);
        self.transport.disconnect();
        info!("Session stopped");
    }

    fn notify(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_all(&self, intents: Vec<OutboundIntent>) {
        for intent in &intents {
            debug!(channel = intent.channel(), conversation_id = %intent.conversation_id(), "Emitting intent");
            self.transport.emit(intent);
        }
    }

    /// Returns false when the loop should stop.
    fn handle_command(&mut self, command: Command, seen: &mut Option<Subscription>) -> bool {
        match command {
            Command::Open(conversation_id) => {
                // Receipts handler is scoped to the open conversation.
                if let Some(subscription) = seen.take() {
                    self.transport.off(subscription);
                }
                *seen = Some(self.transport.on(InboundChannel::SeenReceipt));

                let opened = self.store.open_conversation(conversation_id.clone());
                self.emit_all(opened.intents);
                if let Some(ticket) = opened.initial_request {
                    self.spawn_fetch(ticket);
                }
                self.notify(SessionEvent::SummariesChanged);
                self.notify(SessionEvent::LoadStateChanged(
                    conversation_id.clone(),
                    self.store.load_state(&conversation_id),
                ));
            }
            Command::Close => {
                if let Some(subscription) = seen.take() {
                    self.transport.off(subscription);
                }
                self.store.close_conversation();
            }
            Command::LoadOlder(conversation_id) => self.load_older(conversation_id),
            Command::Scrolled {
                conversation_id,
                proximity_to_top,
            } => {
                if self.store.should_load_more(&conversation_id, proximity_to_top) {
                    self.load_older(conversation_id);
                }
            }
            Command::Send {
                conversation_id,
                draft,
                reply,
            } => {
                let result = match self.store.send_message(&conversation_id, draft) {
                    Ok((pending, intent)) => {
                        self.transport.emit(&intent);
                        Ok(pending.local_id)
                    }
                    Err(err) => {
                        debug!(conversation_id = %conversation_id, error = %err, "Send refused");
                        Err(SessionError::from(err))
                    }
                };
                let _ = reply.send(result);
            }
            Command::Snapshot {
                conversation_id,
                reply,
            } => {
                let _ = reply.send(self.store.snapshot(&conversation_id));
            }
            Command::Summaries { reply } => {
                let _ = reply.send(self.store.summaries());
            }
            Command::QueryLoadState {
                conversation_id,
                reply,
            } => {
                let _ = reply.send(self.store.load_state(&conversation_id));
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn load_older(&mut self, conversation_id: ConversationId) {
        match self.store.request_older_messages(&conversation_id) {
            HistoryRequest::Started(ticket) => {
                self.spawn_fetch(ticket);
                self.notify(SessionEvent::LoadStateChanged(conversation_id, LoadState::Loading));
            }
            HistoryRequest::AlreadyInFlight => {
                debug!(conversation_id = %conversation_id, "History request already in flight");
            }
            HistoryRequest::NoMore => {
                debug!(conversation_id = %conversation_id, "No older history");
            }
        }
    }

    fn spawn_fetch(&self, ticket: HistoryTicket) {
        let backend = self.backend.clone();
        let tx = self.history_tx.clone();
        tokio::spawn(async move {
            let result = backend
                .fetch_history(&ticket.conversation_id, ticket.request.skip, ticket.request.limit)
                .await
                .map_err(NetworkError::from);
            let _ = tx.send((ticket, result));
        });
    }

    fn on_history(&mut self, ticket: HistoryTicket, result: Result<Vec<Value>, NetworkError>) {
        let conversation_id = ticket.conversation_id.clone();
        match self.store.apply_history_page(&ticket, result) {
            HistoryOutcome::Stale => return,
            HistoryOutcome::Applied { intents, .. } => {
                self.emit_all(intents);
                self.notify(SessionEvent::MessagesChanged(conversation_id.clone()));
            }
            HistoryOutcome::Exhausted | HistoryOutcome::Failed => {}
        }
        let state = self.store.load_state(&conversation_id);
        self.notify(SessionEvent::LoadStateChanged(conversation_id, state));
    }

    fn on_live_message(&mut self, payload: Value) {
        match self.store.handle_live_message(payload) {
            Ok(applied) => {
                let messages_changed = applied.messages_changed();
                let summary_changed = applied.summary_changed();
                self.emit_all(applied.intents);
                if messages_changed {
                    self.notify(SessionEvent::MessagesChanged(applied.conversation_id));
                }
                if summary_changed {
                    self.notify(SessionEvent::SummariesChanged);
                }
            }
            Err(err) => warn!(error = %err, "Dropping malformed live message"),
        }
    }

    fn on_seen_receipt(&mut self, payload: Value) {
        match self.store.handle_seen_receipt(payload) {
            Ok(SeenOutcome::Applied) => {
                if let Some(open) = self.store.open_conversation_id().cloned() {
                    self.notify(SessionEvent::MessagesChanged(open));
                }
            }
            Ok(outcome) => debug!(?outcome, "Seen receipt not applied"),
            Err(err) => warn!(error = %err, "Dropping malformed seen receipt"),
        }
    }
}

async fn next_event(subscription: &mut Option<Subscription>) -> Option<Value> {
    match subscription {
        Some(subscription) => subscription.events.recv().await,
        None => std::future::pending().await,
    }
}
