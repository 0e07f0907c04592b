//! Quest Records
//!
//! The marketplace quest document: a posted micro-task with a reward,
//! limited participant slots, and a completion key gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a quest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestStatus {
    /// Accepting participants
    Open,
    /// All slots taken, awaiting completion
    Full,
    /// Terminal: reward paid out
    Completed,
}

/// Review bookkeeping flags on a completed quest
///
/// Wire names stay snake_case; the web client reads them as-is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFlags {
    #[serde(default)]
    pub creator_reviewed: bool,
    #[serde(default)]
    pub completer_reviewed: bool,
}

/// A posted quest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quest {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub category: String,
    /// Reward in currency units, credited to the completer
    pub reward: u64,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub location: String,
    /// Creator display name (denormalized for rendering)
    pub creator: String,
    #[serde(rename = "creatorId")]
    pub creator_id: u64,
    #[serde(rename = "creatorPhone", skip_serializing_if = "Option::is_none")]
    pub creator_phone: Option<String>,
    /// Uploaded image path under /uploads, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Acceptance capacity, always >= 1
    pub slots: usize,
    /// User ids that accepted, in acceptance order. Never exceeds `slots`,
    /// never contains `creator_id`.
    #[serde(default)]
    pub accepted: Vec<u64>,
    pub status: QuestStatus,
    /// Shared code gating the next completion; regenerated on every accept,
    /// cleared once the quest completes.
    #[serde(rename = "completionKey", skip_serializing_if = "Option::is_none")]
    pub completion_key: Option<String>,
    #[serde(rename = "completedBy", skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<u64>,
    #[serde(default)]
    pub reviews: ReviewFlags,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Quest {
    pub fn is_accepted_by(&self, user_id: u64) -> bool {
        self.accepted.contains(&user_id)
    }

    pub fn at_capacity(&self) -> bool {
        self.accepted.len() >= self.slots
    }
}

/// Validated input for quest creation (parsed from the multipart form)
#[derive(Debug, Clone, Default)]
pub struct QuestInput {
    pub title: String,
    pub description: String,
    pub category: String,
    pub reward: u64,
    pub duration: String,
    pub location: String,
    pub creator_phone: Option<String>,
    pub slots: usize,
    pub image: Option<String>,
}
