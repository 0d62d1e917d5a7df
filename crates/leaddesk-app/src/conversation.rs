// Live conversation merging.
//
// A conversation with one counterpart is backed by two independent
// subscriptions (inbound and outbound). Every snapshot from either stream
// replaces that stream's half; the merged view is rebuilt from both halves
// on each update.
//
// Each pair of subscriptions is tagged with a generation. Closing or
// switching counterparts bumps the generation before anything else, so a
// snapshot that was already in flight from the old pair is recognised and
// dropped instead of repopulating the new view.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use leaddesk_core::config::MessagesConfig;
use leaddesk_core::subscription::CancelHandle;
use leaddesk_core::{Collection, CoreError, DocPath, DocumentStore, Record, Snapshot};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// From the client.
    Inbound,
    /// From the company.
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub path: DocPath,
    pub direction: Direction,
    pub text: String,
    pub sent: DateTime<Utc>,
    pub read: bool,
}

impl Message {
    /// `None` when the record has no usable `sent` timestamp.
    pub fn from_record(record: &Record, direction: Direction) -> Option<Self> {
        let sent = record.timestamp("sent")?;
        Some(Message {
            path: record.path.clone(),
            direction,
            text: record
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            sent,
            read: record.get("read").and_then(|v| v.as_bool()).unwrap_or(false),
        })
    }
}

fn messages_from_snapshot(snapshot: &Snapshot, direction: Direction) -> Vec<Message> {
    snapshot
        .iter()
        .filter_map(|record| {
            let message = Message::from_record(record, direction);
            if message.is_none() {
                warn!(path = %record.path, "skipping message without a valid `sent` timestamp");
            }
            message
        })
        .collect()
}

/// Concatenate both halves and order by `(sent, path)` ascending, keeping
/// the first occurrence of any path.
pub fn merge(inbound: &[Message], outbound: &[Message]) -> Vec<Message> {
    let mut merged: Vec<Message> = inbound.iter().chain(outbound).cloned().collect();
    merged.sort_by(|a, b| a.sent.cmp(&b.sent).then_with(|| a.path.cmp(&b.path)));
    let mut seen = HashSet::new();
    merged.retain(|m| seen.insert(m.path.clone()));
    merged
}

// ---------------------------------------------------------------------------
// View and merger state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConversationView {
    /// No counterpart selected.
    Closed,
    /// Subscriptions opened, nothing received yet.
    Loading,
    /// Both halves are known to be empty.
    Empty,
    Thread(Vec<Message>),
}

impl ConversationView {
    pub const NO_USER_SELECTED: &'static str = "No user selected";
    pub const NO_CONVERSATION: &'static str = "No conversations were found.";

    /// Placeholder text for views without messages.
    pub fn placeholder(&self) -> Option<&'static str> {
        match self {
            ConversationView::Closed => Some(Self::NO_USER_SELECTED),
            ConversationView::Empty => Some(Self::NO_CONVERSATION),
            ConversationView::Loading | ConversationView::Thread(_) => None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        match self {
            ConversationView::Thread(messages) => messages,
            _ => &[],
        }
    }
}

/// A snapshot (or stream error) tagged with the subscription pair it came
/// from.
#[derive(Debug, Clone)]
pub struct StreamUpdate {
    pub generation: u64,
    pub direction: Direction,
    pub payload: Result<Snapshot, CoreError>,
}

#[derive(Debug)]
enum MergerState {
    Idle,
    Subscribed {
        counterpart: String,
        inbound: Option<Vec<Message>>,
        outbound: Option<Vec<Message>>,
    },
}

/// Holds the two halves for the current counterpart and the merged view.
#[derive(Debug)]
pub struct ConversationMerger {
    generation: u64,
    state: MergerState,
    view: ConversationView,
}

impl Default for ConversationMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationMerger {
    pub fn new() -> Self {
        ConversationMerger {
            generation: 0,
            state: MergerState::Idle,
            view: ConversationView::Closed,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn counterpart(&self) -> Option<&str> {
        match &self.state {
            MergerState::Idle => None,
            MergerState::Subscribed { counterpart, .. } => Some(counterpart),
        }
    }

    pub fn view(&self) -> &ConversationView {
        &self.view
    }

    /// Start a new conversation and return the generation its updates must
    /// carry. Any previous conversation's updates become stale.
    pub fn open(&mut self, counterpart: impl Into<String>) -> u64 {
        self.generation += 1;
        self.state = MergerState::Subscribed {
            counterpart: counterpart.into(),
            inbound: None,
            outbound: None,
        };
        self.view = ConversationView::Loading;
        self.generation
    }

    /// Return to idle. Updates still in flight become stale.
    pub fn close(&mut self) {
        self.generation += 1;
        self.state = MergerState::Idle;
        self.view = ConversationView::Closed;
    }

    /// Apply one stream update.
    ///
    /// Returns `Ok(None)` for a stale update (wrong generation, or idle),
    /// `Ok(Some(view))` after re-rendering, and `Err` for a stream error,
    /// in which case the previous view is kept.
    pub fn apply(&mut self, update: StreamUpdate) -> Result<Option<&ConversationView>, CoreError> {
        if update.generation != self.generation {
            debug!(
                "Discarding stale conversation update (update gen: {}, current gen: {})",
                update.generation, self.generation
            );
            return Ok(None);
        }
        let MergerState::Subscribed {
            counterpart,
            inbound,
            outbound,
        } = &mut self.state
        else {
            debug!("Conversation update with no open conversation, discarding");
            return Ok(None);
        };

        let snapshot = match update.payload {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    counterpart = counterpart.as_str(),
                    direction = ?update.direction,
                    "conversation stream failed, keeping previous view: {}",
                    e
                );
                return Err(e);
            }
        };

        let half = messages_from_snapshot(&snapshot, update.direction);
        match update.direction {
            Direction::Inbound => *inbound = Some(half),
            Direction::Outbound => *outbound = Some(half),
        }

        let merged = merge(
            inbound.as_deref().unwrap_or_default(),
            outbound.as_deref().unwrap_or_default(),
        );
        self.view = if !merged.is_empty() {
            ConversationView::Thread(merged)
        } else if inbound.is_some() && outbound.is_some() {
            ConversationView::Empty
        } else {
            ConversationView::Loading
        };
        Ok(Some(&self.view))
    }
}

// ---------------------------------------------------------------------------
// Live feed
// ---------------------------------------------------------------------------

struct Forwarder {
    cancel: CancelHandle,
    task: JoinHandle<()>,
}

impl Forwarder {
    fn stop(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// The pair of subscriptions behind an open conversation, each forwarded
/// into the app's update channel by its own task.
pub struct ConversationFeed {
    generation: u64,
    forwarders: Vec<Forwarder>,
}

impl ConversationFeed {
    /// Subscribe to both message collections of `user_id` and forward their
    /// snapshots, tagged with `generation`, into `tx`.
    pub fn open(
        store: &dyn DocumentStore,
        messages: &MessagesConfig,
        user_id: &str,
        generation: u64,
        tx: mpsc::UnboundedSender<StreamUpdate>,
    ) -> Result<Self, CoreError> {
        if user_id.is_empty() || user_id.contains('/') {
            return Err(CoreError::invalid(format!("`{user_id}` is not a user id")));
        }
        let base = format!("{}/{}", messages.users_collection, user_id);
        let streams = [
            (Direction::Inbound, &messages.inbound_collection),
            (Direction::Outbound, &messages.outbound_collection),
        ];

        let mut feed = ConversationFeed {
            generation,
            forwarders: Vec::with_capacity(streams.len()),
        };
        for (direction, collection_id) in streams {
            let collection = Collection::path(format!("{base}/{collection_id}"));
            // On failure `feed` drops here and cancels what was opened.
            let mut subscription = store.subscribe(&collection)?;
            let cancel = subscription.cancel_handle();
            let tx = tx.clone();
            let task = tokio::spawn(async move {
                while let Some(payload) = subscription.next().await {
                    let update = StreamUpdate {
                        generation,
                        direction,
                        payload,
                    };
                    if tx.send(update).is_err() {
                        break;
                    }
                }
            });
            feed.forwarders.push(Forwarder { cancel, task });
        }

        info!(user_id, generation, "Conversation subscriptions opened");
        Ok(feed)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancel both subscriptions and stop forwarding.
    pub fn cancel(self) {
        // Drop does the work.
    }
}

impl Drop for ConversationFeed {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.stop();
        }
        debug!(generation = self.generation, "Conversation subscriptions cancelled");
    }
}
