// Auction domain: round state machine, bid admission, queue, timer,
// settlement. Shared entity types and the domain error live here.

pub mod bid;
pub mod queue;
pub mod round;
pub mod settlement;
pub mod timer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Lifecycle status of a player. Exactly one at a time; `sold_price` is set
/// iff the status is `Sold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerStatus {
    Available,
    InRound,
    Sold,
    Unsold,
}

impl PlayerStatus {
    /// Database representation (TEXT column).
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerStatus::Available => "AVAILABLE",
            PlayerStatus::InRound => "IN_ROUND",
            PlayerStatus::Sold => "SOLD",
            PlayerStatus::Unsold => "UNSOLD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AVAILABLE" => Some(PlayerStatus::Available),
            "IN_ROUND" => Some(PlayerStatus::InRound),
            "SOLD" => Some(PlayerStatus::Sold),
            "UNSOLD" => Some(PlayerStatus::Unsold),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    /// Free-form role label (e.g. "Batsman", "All-Rounder"). Display only.
    pub category: String,
    pub base_price: u32,
    pub status: PlayerStatus,
    pub owner_team_id: Option<String>,
    pub sold_price: Option<u32>,
    pub sold_at: Option<DateTime<Utc>>,
    /// Times this player has cycled through a round without a winning bid.
    pub attempt_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub captain_name: String,
    pub remaining_points: u32,
    pub roster_count: u32,
}

/// The currently winning {amount, team} for the active round. `team_id` is
/// `None` until the first bid lands; `amount` then holds the base price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighBid {
    pub amount: u32,
    pub team_id: Option<String>,
}

/// One row of the append-only bid ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidEntry {
    pub player_id: String,
    pub team_id: String,
    pub amount: u32,
    pub placed_at: String,
}

/// A completed sale, kept in the bounded recent-sales buffer and surfaced in
/// snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub player_id: String,
    pub player_name: String,
    pub team_id: String,
    pub amount: u32,
    pub sold_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Domain-rule and infrastructure failures surfaced to command requesters.
///
/// Domain variants leave all state untouched. `Internal` wraps storage
/// failures; the operation that produced one has been fully rolled back.
#[derive(Debug, Error)]
pub enum AuctionError {
    #[error("no active round")]
    NotActive,

    #[error("player {id} is not available (status {status})")]
    NotAvailable { id: String, status: PlayerStatus },

    #[error("bid must be at least {minimum}")]
    BidTooLow { minimum: u32 },

    #[error("maximum allowed bid is {max_allowed}")]
    ExceedsMaxAllowedBid { max_allowed: u32 },

    #[error("insufficient points: {remaining} remaining")]
    ExceedsBudget { remaining: u32 },

    /// The caller's bid lost a race: another bid replaced the high-bid value
    /// it validated against. Carries the real current high bid so losing
    /// bidders see the actual price.
    #[error("outbid: current high bid is {amount}")]
    ConcurrencyConflict {
        amount: u32,
        team_id: Option<String>,
    },

    #[error("player {id} is not sold")]
    NotSold { id: String },

    #[error("a round is already in progress")]
    RoundInProgress,

    #[error("round is not paused")]
    NotPaused,

    #[error("unknown player {0}")]
    UnknownPlayer(String),

    #[error("unknown team {0}")]
    UnknownTeam(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuctionError {
    /// Stable machine-readable code used in wire-level error replies.
    pub fn code(&self) -> &'static str {
        match self {
            AuctionError::NotActive => "NotActive",
            AuctionError::NotAvailable { .. } => "NotAvailable",
            AuctionError::BidTooLow { .. } => "BidTooLow",
            AuctionError::ExceedsMaxAllowedBid { .. } => "ExceedsMaxAllowedBid",
            AuctionError::ExceedsBudget { .. } => "ExceedsBudget",
            AuctionError::ConcurrencyConflict { .. } => "ConcurrencyConflict",
            AuctionError::NotSold { .. } => "NotSold",
            AuctionError::RoundInProgress => "RoundInProgress",
            AuctionError::NotPaused => "NotPaused",
            AuctionError::UnknownPlayer(_) => "UnknownPlayer",
            AuctionError::UnknownTeam(_) => "UnknownTeam",
            AuctionError::Internal(_) => "Internal",
        }
    }
}
