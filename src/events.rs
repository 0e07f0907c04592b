//! Realtime Broadcast Channel
//!
//! Fans lifecycle events out to every connected WebSocket client as JSON
//! text frames. Delivery is best-effort: the channel is bounded, lagging
//! receivers skip ahead, and there is no replay for late subscribers.
//! Events are published only after the store write-back completes.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::quest::model::Quest;

/// Lifecycle event pushed to connected clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum QuestEvent {
    #[serde(rename = "QUEST_CREATED")]
    Created(Quest),
    #[serde(rename = "QUEST_UPDATED")]
    Updated(Quest),
    #[serde(rename = "QUEST_DELETED")]
    Deleted { id: u64 },
}

pub fn encode_event(event: &QuestEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<QuestEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QuestEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget publish. A send error just means nobody is listening.
    pub fn publish(&self, event: QuestEvent) {
        let _ = self.tx.send(event);
    }
}
