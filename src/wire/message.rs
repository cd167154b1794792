use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::quizrelay::types::LeaderboardSnapshot;

/// Server-to-viewer message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    LeaderboardUpdate,
}

/// Push message sent to every viewer of a topic after a recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardUpdate {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub leaderboard: LeaderboardSnapshot,
    pub updated_at: DateTime<Utc>,
}

impl LeaderboardUpdate {
    pub fn new(leaderboard: LeaderboardSnapshot) -> Self {
        Self::at(leaderboard, Utc::now())
    }

    pub fn at(leaderboard: LeaderboardSnapshot, updated_at: DateTime<Utc>) -> Self {
        Self {
            kind: MessageType::LeaderboardUpdate,
            leaderboard,
            updated_at,
        }
    }

    /// Serializes once; the resulting buffer is shared by every subscriber
    /// queue, so all viewers receive the same bytes.
    pub fn encode(&self) -> Result<Bytes> {
        let raw = serde_json::to_vec(self)?;
        debug!("📦 Encoded leaderboard update: {} entries, {} bytes", self.leaderboard.len(), raw.len());
        Ok(Bytes::from(raw))
    }
}
