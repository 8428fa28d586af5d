// Round resolution: sale, unsold-retry, and the compensating undo.

use std::collections::VecDeque;

use chrono::Utc;

use super::round::ActiveRound;
use super::{AuctionError, PlayerStatus, SaleRecord};
use crate::db::Database;

/// How many completed sales the in-memory ticker retains.
const RECENT_SALES_CAPACITY: usize = 10;

/// Bounded newest-first buffer of completed sales, shown in snapshots.
#[derive(Debug, Default)]
pub struct RecentSales {
    records: VecDeque<SaleRecord>,
}

impl RecentSales {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: SaleRecord) {
        self.records.push_front(record);
        self.records.truncate(RECENT_SALES_CAPACITY);
    }

    /// Drop a sale after it has been undone.
    pub fn remove(&mut self, player_id: &str) {
        self.records.retain(|r| r.player_id != player_id);
    }

    pub fn iter(&self) -> impl Iterator<Item = &SaleRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Result of resolving an expired round.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Sold { team_id: String, amount: u32 },
    /// No bids landed. `requeued` is false once the player has exhausted
    /// their attempts and is terminally unsold.
    Unsold { requeued: bool, attempts: u32 },
}

/// Settle an expired round against storage.
///
/// With at least one bid the round becomes a sale committed in a single
/// transaction (debit, roster, SOLD, round cleared) and the sale enters the
/// recent-sales buffer. With no bids the attempt count is bumped and the
/// player either returns to AVAILABLE for the caller to requeue or is
/// marked terminally UNSOLD.
pub fn resolve(
    db: &Database,
    round: &ActiveRound,
    max_attempts: u32,
    sales: &mut RecentSales,
) -> Result<Outcome, AuctionError> {
    if let Some(team_id) = round.high.team_id.clone() {
        let amount = round.high.amount;
        let sold_at = Utc::now();
        db.commit_sale(&round.player_id, &team_id, amount, &sold_at)?;
        sales.push(SaleRecord {
            player_id: round.player_id.clone(),
            player_name: round.player_name.clone(),
            team_id: team_id.clone(),
            amount,
            sold_at,
        });
        return Ok(Outcome::Sold { team_id, amount });
    }

    let player = db
        .get_player(&round.player_id)?
        .ok_or_else(|| AuctionError::UnknownPlayer(round.player_id.clone()))?;
    let exhausted = player.attempt_count + 1 >= max_attempts;
    let attempts = db.commit_unsold(&round.player_id, exhausted)?;
    Ok(Outcome::Unsold {
        requeued: !exhausted,
        attempts,
    })
}

/// Receipt for an undone sale, used to notify clients of restored state.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoReceipt {
    pub player_id: String,
    pub team_id: String,
    pub amount: u32,
}

/// Reverse a completed sale: credit the points back, shrink the roster,
/// return the player to AVAILABLE and erase that player's ledger entries.
/// Fails without touching anything unless the player is currently SOLD.
pub fn undo(
    db: &Database,
    player_id: &str,
    sales: &mut RecentSales,
) -> Result<UndoReceipt, AuctionError> {
    let player = db
        .get_player(player_id)?
        .ok_or_else(|| AuctionError::UnknownPlayer(player_id.to_string()))?;
    if player.status != PlayerStatus::Sold {
        return Err(AuctionError::NotSold {
            id: player_id.to_string(),
        });
    }

    let (team_id, amount) = db.commit_undo(player_id)?;
    sales.remove(player_id);
    Ok(UndoReceipt {
        player_id: player_id.to_string(),
        team_id,
        amount,
    })
}
