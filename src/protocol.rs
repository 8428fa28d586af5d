// Wire protocol: the commands clients send, the events the engine
// broadcasts, and the per-requester replies. Everything crossing the
// WebSocket boundary is one of these closed, tagged enums; unknown command
// types fail deserialization instead of being dispatched by string.

use serde::{Deserialize, Serialize};

use crate::auction::round::{ActiveRound, RoundPhase};
use crate::auction::{AuctionError, BidEntry, HighBid, Player, SaleRecord, Team};
use crate::db::StatusCounts;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Every operation a client may request. Tagged with `"type"` on the wire,
/// e.g. `{"type": "placeBid", "teamId": "T1", "amount": 15}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    #[serde(rename_all = "camelCase")]
    StartRound { player_id: String },
    Pause,
    Resume,
    #[serde(rename_all = "camelCase")]
    PlaceBid { team_id: String, amount: u32 },
    #[serde(rename_all = "camelCase")]
    UndoSale { player_id: String },
    StartAutoSequence,
    StopAutoSequence,
    GetState,
    #[serde(rename_all = "camelCase")]
    GetBids { player_id: String },
    ResetAuction,
}

// ---------------------------------------------------------------------------
// Broadcast events
// ---------------------------------------------------------------------------

/// Fan-out notifications emitted after a state mutation has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuctionEvent {
    #[serde(rename_all = "camelCase")]
    RoundStarted {
        player: PlayerInfo,
        base_price: u32,
        deadline_secs: u32,
    },
    #[serde(rename_all = "camelCase")]
    BidAccepted { team_id: String, amount: u32 },
    #[serde(rename_all = "camelCase")]
    TimerTick { remaining: u32 },
    #[serde(rename_all = "camelCase")]
    TimerReset { remaining: u32 },
    #[serde(rename_all = "camelCase")]
    RoundResolved {
        outcome: RoundOutcome,
        player_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        team_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        amount: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    QueueUpdated { remaining: usize, retry_count: usize },
    AutoAuctionCompleted,
    #[serde(rename_all = "camelCase")]
    SaleUndone {
        player_id: String,
        team_id: String,
        amount: u32,
    },
    #[serde(rename_all = "camelCase")]
    TeamsUpdated { teams: Vec<TeamSummary> },
    AuctionReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoundOutcome {
    Sold,
    Unsold,
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Per-requester command outcome, delivered over the oneshot reply channel
/// and forwarded only to the client that issued the command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Reply {
    Ack,
    State {
        snapshot: AuctionSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    Bids {
        player_id: String,
        bids: Vec<BidInfo>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl Reply {
    pub fn error(err: &AuctionError) -> Self {
        Reply::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: String,
    pub name: String,
    pub category: String,
    pub base_price: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_team_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sold_price: Option<u32>,
    pub attempt_count: u32,
}

impl From<&Player> for PlayerInfo {
    fn from(p: &Player) -> Self {
        PlayerInfo {
            id: p.id.clone(),
            name: p.name.clone(),
            category: p.category.clone(),
            base_price: p.base_price,
            status: p.status.to_string(),
            owner_team_id: p.owner_team_id.clone(),
            sold_price: p.sold_price,
            attempt_count: p.attempt_count,
        }
    }
}

/// Team state plus the derived bidding ceiling, so clients never have to
/// re-implement the reserve rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSummary {
    pub id: String,
    pub name: String,
    pub captain_name: String,
    pub remaining_points: u32,
    pub roster_count: u32,
    pub max_allowed_bid: u32,
}

impl TeamSummary {
    pub fn build(team: &Team, capacity: u32, reserve_per_slot: u32) -> Self {
        TeamSummary {
            id: team.id.clone(),
            name: team.name.clone(),
            captain_name: team.captain_name.clone(),
            remaining_points: team.remaining_points,
            roster_count: team.roster_count,
            max_allowed_bid: crate::auction::bid::max_allowed_bid(team, capacity, reserve_per_slot),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighBidInfo {
    pub amount: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl From<&HighBid> for HighBidInfo {
    fn from(h: &HighBid) -> Self {
        HighBidInfo {
            amount: h.amount,
            team_id: h.team_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidInfo {
    pub player_id: String,
    pub team_id: String,
    pub amount: u32,
    pub placed_at: String,
}

impl From<&BidEntry> for BidInfo {
    fn from(b: &BidEntry) -> Self {
        BidInfo {
            player_id: b.player_id.clone(),
            team_id: b.team_id.clone(),
            amount: b.amount,
            placed_at: b.placed_at.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleInfo {
    pub player_id: String,
    pub player_name: String,
    pub team_id: String,
    pub amount: u32,
    pub sold_at: String,
}

impl From<&SaleRecord> for SaleInfo {
    fn from(s: &SaleRecord) -> Self {
        SaleInfo {
            player_id: s.player_id.clone(),
            player_name: s.player_name.clone(),
            team_id: s.team_id.clone(),
            amount: s.amount,
            sold_at: s.sold_at.to_rfc3339(),
        }
    }
}

/// The round portion of a snapshot. Present unless the engine is idle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundInfo {
    pub player: PlayerInfo,
    pub high_bid: HighBidInfo,
    pub remaining_secs: u32,
    pub paused: bool,
}

impl RoundInfo {
    pub fn build(round: &ActiveRound, phase: RoundPhase, remaining_secs: u32) -> Self {
        RoundInfo {
            player: PlayerInfo {
                id: round.player_id.clone(),
                name: round.player_name.clone(),
                category: round.player_category.clone(),
                base_price: round.base_price,
                status: "IN_ROUND".to_string(),
                owner_team_id: None,
                sold_price: None,
                attempt_count: 0,
            },
            high_bid: HighBidInfo::from(&round.high),
            remaining_secs,
            paused: phase == RoundPhase::Paused,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    pub remaining: usize,
    pub retry_count: usize,
    pub auto_running: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionStats {
    pub total_players: usize,
    pub sold: usize,
    pub unsold: usize,
    pub available: usize,
    pub total_bids: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_sale: Option<SaleInfo>,
}

impl AuctionStats {
    pub fn build(counts: StatusCounts, total_bids: usize, highest: Option<&SaleRecord>) -> Self {
        AuctionStats {
            total_players: counts.total,
            sold: counts.sold,
            unsold: counts.unsold,
            available: counts.available,
            total_bids,
            highest_sale: highest.map(SaleInfo::from),
        }
    }
}

/// Full auction state, sent to every client on connect and on `getState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<RoundInfo>,
    pub teams: Vec<TeamSummary>,
    pub queue: QueueInfo,
    pub recent_sales: Vec<SaleInfo>,
    pub stats: AuctionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_tagged_json() {
        let cmd: Command =
            serde_json::from_str(r#"{"type": "placeBid", "teamId": "T1", "amount": 15}"#).unwrap();
        assert_eq!(
            cmd,
            Command::PlaceBid {
                team_id: "T1".to_string(),
                amount: 15
            }
        );

        let cmd: Command = serde_json::from_str(r#"{"type": "pause"}"#).unwrap();
        assert_eq!(cmd, Command::Pause);

        let cmd: Command =
            serde_json::from_str(r#"{"type": "startRound", "playerId": "P1"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::StartRound {
                player_id: "P1".to_string()
            }
        );
    }

    #[test]
    fn unknown_command_type_is_rejected() {
        let result: Result<Command, _> =
            serde_json::from_str(r#"{"type": "dropAllTables"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_fields_are_rejected() {
        let result: Result<Command, _> = serde_json::from_str(r#"{"type": "placeBid"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn events_serialize_with_camel_case_tags() {
        let event = AuctionEvent::BidAccepted {
            team_id: "T1".to_string(),
            amount: 15,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "bidAccepted");
        assert_eq!(json["teamId"], "T1");
        assert_eq!(json["amount"], 15);

        let event = AuctionEvent::RoundResolved {
            outcome: RoundOutcome::Unsold,
            player_id: "P1".to_string(),
            team_id: None,
            amount: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "roundResolved");
        assert_eq!(json["outcome"], "unsold");
        // Absent fields are omitted, not null.
        assert!(json.get("teamId").is_none());
    }

    #[test]
    fn error_reply_carries_stable_code() {
        let reply = Reply::error(&AuctionError::BidTooLow { minimum: 16 });
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "BidTooLow");
        assert_eq!(json["message"], "bid must be at least 16");
    }

    #[test]
    fn team_summary_includes_derived_ceiling() {
        let team = Team {
            id: "T1".to_string(),
            name: "Thunder".to_string(),
            captain_name: "Asha".to_string(),
            remaining_points: 40,
            roster_count: 8,
        };
        let summary = TeamSummary::build(&team, 11, 5);
        assert_eq!(summary.max_allowed_bid, 30);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["maxAllowedBid"], 30);
        assert_eq!(json["remainingPoints"], 40);
    }
}
