use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use convo_store::{ConversationStore, Draft, HistoryRequest, HistoryTicket, NetworkError, summary_from_record};
use convo_types::api::ConversationRecord;
use convo_types::events::OutboundIntent;
use convo_types::{ConversationId, ConversationSummary, Message};

/// One line of an event log.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LogEntry {
    /// Conversation list as returned by the backend. No profile lookups are
    /// made; direct conversations keep the record's name.
    Seed { conversations: Vec<ConversationRecord> },
    #[serde(rename_all = "camelCase")]
    Open { conversation_id: ConversationId },
    Close,
    /// Response to the outstanding history request for a conversation. A
    /// request is started first if none is in flight.
    #[serde(rename_all = "camelCase")]
    History {
        conversation_id: ConversationId,
        #[serde(default)]
        items: Vec<Value>,
        error: Option<String>,
    },
    Live { payload: Value },
    Seen { payload: Value },
    #[serde(rename_all = "camelCase")]
    Send {
        conversation_id: ConversationId,
        text: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct Emitted {
    pub channel: &'static str,
    pub payload: Value,
}

impl From<&OutboundIntent> for Emitted {
    fn from(intent: &OutboundIntent) -> Self {
        Self {
            channel: intent.channel(),
            payload: intent.payload(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub viewer: String,
    pub open: Option<ConversationId>,
    pub conversations: BTreeMap<ConversationId, Vec<Message>>,
    pub summaries: Vec<ConversationSummary>,
    pub emitted: Vec<Emitted>,
    pub rejected_lines: usize,
}

pub struct Replay {
    store: ConversationStore,
    tickets: HashMap<ConversationId, HistoryTicket>,
    emitted: Vec<OutboundIntent>,
    rejected: usize,
}

impl Replay {
    pub fn new(store: ConversationStore) -> Self {
        Self {
            store,
            tickets: HashMap::new(),
            emitted: Vec::new(),
            rejected: 0,
        }
    }

    /// Feed every line of `input`. Lines that do not parse, or events the
    /// store refuses, are counted and skipped.
    pub fn run(&mut self, input: impl BufRead) -> anyhow::Result<()> {
        for (index, line) in input.lines().enumerate() {
            let line = line.with_context(|| format!("reading line {}", index + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: LogEntry = match serde_json::from_str(&line) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(line = index + 1, error = %err, "Skipping unreadable log line");
                    self.rejected += 1;
                    continue;
                }
            };
            if let Err(err) = self.apply(entry) {
                warn!(line = index + 1, error = %err, "Event refused");
                self.rejected += 1;
            }
        }
        Ok(())
    }

    pub fn apply(&mut self, entry: LogEntry) -> anyhow::Result<()> {
        debug!(?entry, "Replaying");
        match entry {
            LogEntry::Seed { conversations } => {
                let config = self.store.config().clone();
                let summaries = conversations
                    .iter()
                    .map(|record| summary_from_record(record, None, &config));
                self.store.seed_summaries(summaries);
            }
            LogEntry::Open { conversation_id } => {
                let opened = self.store.open_conversation(conversation_id.clone());
                self.emitted.extend(opened.intents);
                if let Some(ticket) = opened.initial_request {
                    self.tickets.insert(conversation_id, ticket);
                }
            }
            LogEntry::Close => {
                self.store.close_conversation();
            }
            LogEntry::History {
                conversation_id,
                items,
                error,
            } => {
                let ticket = match self.tickets.remove(&conversation_id) {
                    Some(ticket) => ticket,
                    None => match self.store.request_older_messages(&conversation_id) {
                        HistoryRequest::Started(ticket) => ticket,
                        other => bail!("no history request possible for {}: {:?}", conversation_id, other),
                    },
                };
                let response = match error {
                    Some(message) => Err(NetworkError(message)),
                    None => Ok(items),
                };
                let outcome = self.store.apply_history_page(&ticket, response);
                debug!(?outcome, "History applied");
                if let convo_store::HistoryOutcome::Applied { intents, .. } = outcome {
                    self.emitted.extend(intents);
                }
            }
            LogEntry::Live { payload } => {
                let applied = self.store.handle_live_message(payload)?;
                self.emitted.extend(applied.intents);
            }
            LogEntry::Seen { payload } => {
                self.store.handle_seen_receipt(payload)?;
            }
            LogEntry::Send {
                conversation_id,
                text,
            } => {
                let draft = Draft {
                    text,
                    attachment: None,
                };
                let (_, intent) = self.store.send_message(&conversation_id, draft)?;
                self.emitted.push(intent);
            }
        }
        Ok(())
    }

    pub fn report(&self) -> Report {
        let mut ids: Vec<ConversationId> = self
            .store
            .summaries()
            .into_iter()
            .map(|s| s.conversation_id)
            .collect();
        ids.extend(self.store.open_conversation_id().cloned());

        let conversations = ids
            .into_iter()
            .filter_map(|id| {
                let snapshot = self.store.snapshot(&id);
                (!snapshot.is_empty()).then_some((id, snapshot))
            })
            .collect();

        Report {
            viewer: self.store.viewer().to_string(),
            open: self.store.open_conversation_id().cloned(),
            conversations,
            summaries: self.store.summaries(),
            emitted: self.emitted.iter().map(Emitted::from).collect(),
            rejected_lines: self.rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convo_store::StoreConfig;

    const LOG: &str = r#"
{"event":"open","conversationId":"c1"}
{"event":"history","conversationId":"c1","items":[{"_id":"m2","senderId":"u2","content":"b","createdAt":"2024-05-01T10:01:00Z"},{"_id":"m1","senderId":"u2","content":"a","createdAt":"2024-05-01T10:00:00Z"}]}
{"event":"live","payload":{"id":"m3","conversationId":"c1","sender":"me","message":"c","createdAt":"2024-05-01T10:02:00Z"}}
{"event":"seen","payload":{"messageId":"m1","userId":"u2"}}
{"event":"live","payload":{"conversationId":"c1"}}
not json
"#;

    #[test]
    fn replays_a_log() {
        let mut replay = Replay::new(ConversationStore::new("me".into(), StoreConfig::default()));
        replay.run(LOG.as_bytes()).unwrap();
        let report = replay.report();

        let messages = &report.conversations[&ConversationId::from("c1")];
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert!(messages[0].is_seen_by(&"u2".into()));

        // join-room, then one mark-seen per unseen message from u2
        let channels: Vec<&str> = report.emitted.iter().map(|e| e.channel).collect();
        assert_eq!(channels, vec!["join-room", "message-seen", "message-seen"]);
        assert_eq!(report.rejected_lines, 2);
    }

    #[test]
    fn history_without_request_starts_one() {
        let mut replay = Replay::new(ConversationStore::new("me".into(), StoreConfig::default()));
        replay
            .apply(LogEntry::History {
                conversation_id: "c9".into(),
                items: vec![],
                error: Some("offline".into()),
            })
            .unwrap();
        assert_eq!(
            replay.store.load_state(&"c9".into()),
            convo_store::LoadState::Failed
        );
    }
}
