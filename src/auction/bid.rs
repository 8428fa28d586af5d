// Bid admission: validation order and the budget/reserve safety rule.
//
// The atomic commit itself is a durable compare-and-swap performed by the
// registry (db::Database::cas_high_bid); this module owns the preconditions
// checked against the snapshot the caller observed.

use super::round::ActiveRound;
use super::{AuctionError, Team};

/// Roster slots a team still has to fill.
pub fn open_slots(team: &Team, capacity: u32) -> u32 {
    capacity.saturating_sub(team.roster_count)
}

/// The safety rule: a team may never bid so much that it cannot afford the
/// reserve price for each of its other open slots.
///
/// `max_allowed = remaining_points - (open_slots - 1) * reserve_per_slot`,
/// and 0 when the roster is already full.
pub fn max_allowed_bid(team: &Team, capacity: u32, reserve_per_slot: u32) -> u32 {
    let open = open_slots(team, capacity);
    if open == 0 {
        return 0;
    }
    team.remaining_points
        .saturating_sub((open - 1) * reserve_per_slot)
}

/// Validate a proposed bid against the high-bid snapshot the caller
/// observed. Checks run in a fixed order and the first failure wins:
///
/// 1. (caller) round is Active and not paused -> NotActive
/// 2. amount clears the base price (no bids yet) or strictly exceeds the
///    current high bid -> BidTooLow
/// 3. amount within the reserve safety rule -> ExceedsMaxAllowedBid
/// 4. amount within the team's remaining points -> ExceedsBudget
///
/// Step 1 is enforced by the round controller before this function is
/// reached; a paused or idle round never produces a snapshot to bid against.
pub fn validate(
    round: &ActiveRound,
    team: &Team,
    amount: u32,
    capacity: u32,
    reserve_per_slot: u32,
) -> Result<(), AuctionError> {
    if round.has_bids() {
        if amount <= round.high.amount {
            return Err(AuctionError::BidTooLow {
                minimum: round.high.amount + 1,
            });
        }
    } else if amount < round.base_price {
        return Err(AuctionError::BidTooLow {
            minimum: round.base_price,
        });
    }

    let max_allowed = max_allowed_bid(team, capacity, reserve_per_slot);
    if amount > max_allowed {
        return Err(AuctionError::ExceedsMaxAllowedBid { max_allowed });
    }

    if amount > team.remaining_points {
        return Err(AuctionError::ExceedsBudget {
            remaining: team.remaining_points,
        });
    }

    Ok(())
}
