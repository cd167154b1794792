use std::cmp::Ordering;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::quizrelay::types::{LeaderboardEntry, LeaderboardSnapshot, ParticipantScore};

/// Order among participants with equal scores. Ranks stay positional
/// whatever the policy: equal scores never share a rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Keep the order the rows arrived in
    #[default]
    StoreOrder,
    Username,
    UserId,
}

impl TieBreak {
    fn compare(&self, a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
        match self {
            Self::StoreOrder => Ordering::Equal,
            Self::Username => a.username.cmp(&b.username),
            Self::UserId => a.user_id.cmp(&b.user_id),
        }
    }
}

/// Builds ranked snapshots from aggregated scores.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeaderboardAssembler {
    tie_break: TieBreak,
}

impl LeaderboardAssembler {
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    pub fn assemble(&self, rows: Vec<ParticipantScore>) -> LeaderboardSnapshot {
        let entries = rows
            .into_iter()
            .map(|row| LeaderboardEntry {
                user_id: row.user_id,
                username: row.username,
                score: row.score,
                rank: 0,
            })
            .collect();
        self.rank(entries)
    }

    /// Sorts by score descending, then by the tie policy, and numbers the
    /// result 1..=N. The sort is stable, so `StoreOrder` keeps input order.
    pub fn rank(&self, mut entries: Vec<LeaderboardEntry>) -> LeaderboardSnapshot {
        entries.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| self.tie_break.compare(a, b)));
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.rank = i + 1;
        }
        debug!("Ranked {} leaderboard entries ({:?} tie break)", entries.len(), self.tie_break);
        entries
    }
}
