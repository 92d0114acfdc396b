//! Decrypting change events from the real-time feed.
//!
//! Events that arrive before the workspace keys are loaded are held in a
//! bounded queue and replayed, in arrival order, as soon as the context
//! reports usable keys. When the queue is full, further encrypted events are
//! surfaced straight away with the locked placeholder.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use taskvault_shared::api::message::Message;
use taskvault_shared::api::realtime::{ChangeEvent, ChangeEventType};
use taskvault_shared::ids::{ConversationId, MessageId};
use tokio::sync::mpsc;

use crate::config::CryptoConfig;
use crate::context::WorkspaceKeyContext;
use crate::hybrid::{MessageContent, LOCKED_PLACEHOLDER};

/// What the UI should apply for one change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncUpdate {
    /// A new or edited message with its displayable text.
    Message {
        event_type: ChangeEventType,
        record: Message,
        text: String,
    },
    Deleted {
        message_id: MessageId,
        conversation_id: ConversationId,
    },
}

impl SyncUpdate {
    pub fn message_id(&self) -> MessageId {
        match self {
            SyncUpdate::Message { record, .. } => record.id,
            SyncUpdate::Deleted { message_id, .. } => *message_id,
        }
    }
}

pub struct MessageSync {
    ctx: Arc<WorkspaceKeyContext>,
    conversation_id: Option<ConversationId>,
    pending: VecDeque<ChangeEvent>,
    capacity: usize,
}

impl MessageSync {
    pub fn new(ctx: Arc<WorkspaceKeyContext>, capacity: usize) -> Self {
        Self {
            ctx,
            conversation_id: None,
            pending: VecDeque::new(),
            capacity,
        }
    }

    /// Buffer sized by `pending_event_capacity`.
    pub fn from_config(ctx: Arc<WorkspaceKeyContext>, config: &CryptoConfig) -> Self {
        Self::new(ctx, config.pending_event_capacity)
    }

    /// Ignore events for every conversation except `conversation_id`.
    pub fn for_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn keys_loaded(&self) -> bool {
        self.ctx.keys().is_some()
    }

    /// Process one event. Returns the updates to apply now, which include
    /// any buffered events that became decryptable, in arrival order.
    ///
    /// Events for one message never overtake each other: a delete discards
    /// whatever is still buffered for that message, and any other event for
    /// a buffered message queues behind it.
    pub fn handle_event(&mut self, event: ChangeEvent) -> Vec<SyncUpdate> {
        let mut updates = self.replay_pending();

        if let Some(wanted) = self.conversation_id {
            if event.record.conversation_id != wanted {
                return updates;
            }
        }

        let message_id = event.record.id;
        if event.event_type == ChangeEventType::Delete {
            let before = self.pending.len();
            self.pending.retain(|p| p.record.id != message_id);
            if self.pending.len() != before {
                tracing::debug!(message_id = %message_id, "dropping buffered events for deleted message");
            }
            updates.push(SyncUpdate::Deleted {
                message_id,
                conversation_id: event.record.conversation_id,
            });
            return updates;
        }

        let behind_buffered = self.pending.iter().any(|p| p.record.id == message_id);
        let encrypted = MessageContent::parse(&event.record.content).is_encrypted();
        if !behind_buffered && (!encrypted || self.keys_loaded()) {
            updates.push(self.decrypt(event));
        } else if self.pending.len() < self.capacity {
            tracing::debug!(
                message_id = %message_id,
                pending = self.pending.len() + 1,
                "keys not loaded, buffering change event"
            );
            self.pending.push_back(event);
        } else {
            tracing::warn!(
                message_id = %message_id,
                capacity = self.capacity,
                "change event buffer full, showing locked placeholder"
            );
            if behind_buffered {
                updates.extend(self.take_locked(message_id));
            }
            if encrypted {
                updates.push(locked(event));
            } else {
                updates.push(self.decrypt(event));
            }
        }
        updates
    }

    /// Remove the buffered events for one message, surfaced as locked.
    fn take_locked(&mut self, message_id: MessageId) -> Vec<SyncUpdate> {
        let (taken, kept): (VecDeque<_>, VecDeque<_>) = self
            .pending
            .drain(..)
            .partition(|p| p.record.id == message_id);
        self.pending = kept;
        taken.into_iter().map(locked).collect()
    }

    /// Decrypt every buffered event if keys are now available. Returns
    /// nothing while keys are still missing.
    pub fn replay_pending(&mut self) -> Vec<SyncUpdate> {
        if self.pending.is_empty() || !self.keys_loaded() {
            return Vec::new();
        }
        tracing::debug!(count = self.pending.len(), "replaying buffered change events");
        let events: Vec<_> = self.pending.drain(..).collect();
        events.into_iter().map(|event| self.decrypt(event)).collect()
    }

    /// Surface everything still buffered with the locked placeholder.
    fn flush_locked(&mut self) -> Vec<SyncUpdate> {
        self.pending.drain(..).map(locked).collect()
    }

    fn decrypt(&self, event: ChangeEvent) -> SyncUpdate {
        let text = self.ctx.display(&event.record.content);
        SyncUpdate::Message {
            event_type: event.event_type,
            record: event.record,
            text,
        }
    }

    /// Drive the sync until `events` ends or the receiver of `updates` is
    /// dropped. Buffered events are replayed on every key state change; any
    /// still buffered when the feed ends are sent as locked.
    pub async fn run<S>(mut self, events: S, updates: mpsc::Sender<SyncUpdate>)
    where
        S: Stream<Item = ChangeEvent>,
    {
        let mut state = self.ctx.subscribe();
        let mut state_open = true;
        tokio::pin!(events);

        loop {
            let batch = tokio::select! {
                event = events.next() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                changed = state.changed(), if state_open => match changed {
                    Ok(()) => self.replay_pending(),
                    Err(_) => {
                        state_open = false;
                        Vec::new()
                    }
                },
            };
            if !deliver(&updates, batch).await {
                return;
            }
        }

        let mut rest = self.replay_pending();
        rest.extend(self.flush_locked());
        deliver(&updates, rest).await;
    }
}

fn locked(event: ChangeEvent) -> SyncUpdate {
    SyncUpdate::Message {
        event_type: event.event_type,
        record: event.record,
        text: LOCKED_PLACEHOLDER.to_string(),
    }
}

/// Returns false once the receiver is gone.
async fn deliver(updates: &mpsc::Sender<SyncUpdate>, batch: Vec<SyncUpdate>) -> bool {
    for update in batch {
        if updates.send(update).await.is_err() {
            tracing::debug!("sync update receiver dropped, stopping");
            return false;
        }
    }
    true
}
