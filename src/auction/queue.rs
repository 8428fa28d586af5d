// Auction sequence: primary queue plus the unsold-retry second-chance list.

use std::collections::VecDeque;

use super::{Player, PlayerStatus};

/// Ordered sequence of pending player ids for an auto-auction run.
///
/// Players who receive no bids are parked on a secondary retry list; when
/// the primary queue empties, the retry list becomes the new primary (the
/// "second-chance round"). The sequence ends when both are empty.
#[derive(Debug, Default)]
pub struct AuctionQueue {
    primary: VecDeque<String>,
    retry: VecDeque<String>,
}

impl AuctionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the initial sequence from the player pool: AVAILABLE, unowned
    /// players ordered by base price descending, then name for a stable
    /// order between equally priced players.
    pub fn build(players: &[Player]) -> Self {
        let mut pending: Vec<&Player> = players
            .iter()
            .filter(|p| p.status == PlayerStatus::Available && p.owner_team_id.is_none())
            .collect();
        pending.sort_by(|a, b| {
            b.base_price
                .cmp(&a.base_price)
                .then_with(|| a.name.cmp(&b.name))
        });

        AuctionQueue {
            primary: pending.into_iter().map(|p| p.id.clone()).collect(),
            retry: VecDeque::new(),
        }
    }

    /// Build from an admin-provided explicit order.
    pub fn from_order(ids: impl IntoIterator<Item = String>) -> Self {
        AuctionQueue {
            primary: ids.into_iter().collect(),
            retry: VecDeque::new(),
        }
    }

    /// Dequeue the next player to put on the block.
    ///
    /// Each candidate is re-validated through `is_available`: a player may
    /// have been sold manually (or otherwise left AVAILABLE) while waiting
    /// in the sequence, and such entries are skipped and dropped. When the
    /// primary queue is exhausted the retry list is promoted and processing
    /// continues. Returns `None` when the whole sequence is finished.
    pub fn next(&mut self, mut is_available: impl FnMut(&str) -> bool) -> Option<String> {
        loop {
            if self.primary.is_empty() && !self.retry.is_empty() {
                std::mem::swap(&mut self.primary, &mut self.retry);
            }
            let candidate = self.primary.pop_front()?;
            if is_available(&candidate) {
                return Some(candidate);
            }
        }
    }

    /// Park a no-bid player at the back of the retry list.
    pub fn push_retry(&mut self, player_id: String) {
        self.retry.push_back(player_id);
    }

    /// Drop a player from both lists (e.g. after a manual sale).
    pub fn remove(&mut self, player_id: &str) {
        self.primary.retain(|id| id != player_id);
        self.retry.retain(|id| id != player_id);
    }

    /// Players still waiting in the primary queue.
    pub fn remaining(&self) -> usize {
        self.primary.len()
    }

    /// Players parked for a second-chance round.
    pub fn retry_count(&self) -> usize {
        self.retry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.retry.is_empty()
    }

    pub fn clear(&mut self) {
        self.primary.clear();
        self.retry.clear();
    }
}
