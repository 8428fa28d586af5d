// Round state machine: Idle -> Active -> {Paused <-> Active} -> Resolving -> Idle.

use chrono::{DateTime, Utc};

use super::{AuctionError, HighBid, Player};

/// Phase of the single system-wide round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Idle,
    Active,
    Paused,
    Resolving,
}

/// The round currently on the block. Exists only while the phase is
/// Active, Paused or Resolving.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveRound {
    pub player_id: String,
    pub player_name: String,
    pub player_category: String,
    pub base_price: u32,
    pub high: HighBid,
    pub started_at: DateTime<Utc>,
}

impl ActiveRound {
    /// Whether any bid has landed yet. Before the first bid the high-bid
    /// amount holds the base price with no team attached.
    pub fn has_bids(&self) -> bool {
        self.high.team_id.is_some()
    }
}

/// Owner of the round phase and the current round, enforcing legal
/// transitions. All mutations go through the engine's single writer task,
/// so no locking happens here.
#[derive(Debug)]
pub struct RoundController {
    phase: RoundPhase,
    round: Option<ActiveRound>,
}

impl RoundController {
    pub fn new() -> Self {
        RoundController {
            phase: RoundPhase::Idle,
            round: None,
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// The current round regardless of phase (present unless Idle).
    pub fn current(&self) -> Option<&ActiveRound> {
        self.round.as_ref()
    }

    /// The current round only while bids are admissible.
    pub fn biddable(&self) -> Option<&ActiveRound> {
        match self.phase {
            RoundPhase::Active => self.round.as_ref(),
            _ => None,
        }
    }

    /// Put a player on the block. Valid only from Idle; the caller has
    /// already verified the player is AVAILABLE and durably marked it
    /// IN_ROUND.
    pub fn begin(&mut self, player: &Player, started_at: DateTime<Utc>) -> Result<(), AuctionError> {
        if self.phase != RoundPhase::Idle {
            return Err(AuctionError::RoundInProgress);
        }
        self.round = Some(ActiveRound {
            player_id: player.id.clone(),
            player_name: player.name.clone(),
            player_category: player.category.clone(),
            base_price: player.base_price,
            high: HighBid {
                amount: player.base_price,
                team_id: None,
            },
            started_at,
        });
        self.phase = RoundPhase::Active;
        Ok(())
    }

    /// Active -> Paused. The caller must stop the timer before invoking this
    /// so no expiry can fire concurrently with the transition.
    pub fn pause(&mut self) -> Result<(), AuctionError> {
        if self.phase != RoundPhase::Active {
            return Err(AuctionError::NotActive);
        }
        self.phase = RoundPhase::Paused;
        Ok(())
    }

    /// Paused -> Active.
    pub fn resume(&mut self) -> Result<(), AuctionError> {
        if self.phase != RoundPhase::Paused {
            return Err(AuctionError::NotPaused);
        }
        self.phase = RoundPhase::Active;
        Ok(())
    }

    /// Replace the in-memory high bid after a successful durable CAS.
    pub fn record_high(&mut self, amount: u32, team_id: String) {
        if let Some(round) = self.round.as_mut() {
            round.high = HighBid {
                amount,
                team_id: Some(team_id),
            };
        }
    }

    /// Overwrite the in-memory high bid with the durable value. Used after a
    /// lost CAS so the snapshot clients see matches storage.
    pub fn sync_high(&mut self, high: HighBid) {
        if let Some(round) = self.round.as_mut() {
            round.high = high;
        }
    }

    /// Active -> Resolving, handing the round to settlement. The timer must
    /// already be stopped.
    pub fn begin_resolving(&mut self) -> Result<ActiveRound, AuctionError> {
        if self.phase != RoundPhase::Active {
            return Err(AuctionError::NotActive);
        }
        self.phase = RoundPhase::Resolving;
        // Round stays present until finish() so snapshots taken during
        // resolution still show the player.
        Ok(self.round.clone().expect("Active phase implies a round"))
    }

    /// Resolving -> Idle, clearing the round.
    pub fn finish(&mut self) {
        self.phase = RoundPhase::Idle;
        self.round = None;
    }
}

impl Default for RoundController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::PlayerStatus;

    fn player(id: &str, base_price: u32) -> Player {
        Player {
            id: id.to_string(),
            name: format!("Player {id}"),
            category: "Batsman".to_string(),
            base_price,
            status: PlayerStatus::Available,
            owner_team_id: None,
            sold_price: None,
            sold_at: None,
            attempt_count: 0,
        }
    }

    #[test]
    fn begin_sets_high_bid_to_base_price_with_no_team() {
        let mut ctl = RoundController::new();
        ctl.begin(&player("P1", 10), Utc::now()).unwrap();

        assert_eq!(ctl.phase(), RoundPhase::Active);
        let round = ctl.current().unwrap();
        assert_eq!(round.high.amount, 10);
        assert!(round.high.team_id.is_none());
        assert!(!round.has_bids());
    }

    #[test]
    fn begin_rejected_unless_idle() {
        let mut ctl = RoundController::new();
        ctl.begin(&player("P1", 10), Utc::now()).unwrap();

        let err = ctl.begin(&player("P2", 10), Utc::now()).unwrap_err();
        assert!(matches!(err, AuctionError::RoundInProgress));

        ctl.pause().unwrap();
        let err = ctl.begin(&player("P2", 10), Utc::now()).unwrap_err();
        assert!(matches!(err, AuctionError::RoundInProgress));
    }

    #[test]
    fn pause_resume_cycle() {
        let mut ctl = RoundController::new();
        ctl.begin(&player("P1", 10), Utc::now()).unwrap();

        ctl.pause().unwrap();
        assert_eq!(ctl.phase(), RoundPhase::Paused);
        assert!(ctl.biddable().is_none());

        ctl.resume().unwrap();
        assert_eq!(ctl.phase(), RoundPhase::Active);
        assert!(ctl.biddable().is_some());
    }

    #[test]
    fn pause_requires_active_resume_requires_paused() {
        let mut ctl = RoundController::new();
        assert!(matches!(ctl.pause(), Err(AuctionError::NotActive)));
        assert!(matches!(ctl.resume(), Err(AuctionError::NotPaused)));

        ctl.begin(&player("P1", 10), Utc::now()).unwrap();
        assert!(matches!(ctl.resume(), Err(AuctionError::NotPaused)));
        ctl.pause().unwrap();
        assert!(matches!(ctl.pause(), Err(AuctionError::NotActive)));
    }

    #[test]
    fn resolving_keeps_round_until_finish() {
        let mut ctl = RoundController::new();
        ctl.begin(&player("P1", 10), Utc::now()).unwrap();
        ctl.record_high(15, "T1".to_string());

        let round = ctl.begin_resolving().unwrap();
        assert_eq!(round.high.amount, 15);
        assert_eq!(ctl.phase(), RoundPhase::Resolving);
        assert!(ctl.current().is_some());
        assert!(ctl.biddable().is_none());

        ctl.finish();
        assert_eq!(ctl.phase(), RoundPhase::Idle);
        assert!(ctl.current().is_none());
    }

    #[test]
    fn resolving_rejected_while_paused() {
        let mut ctl = RoundController::new();
        ctl.begin(&player("P1", 10), Utc::now()).unwrap();
        ctl.pause().unwrap();
        assert!(matches!(
            ctl.begin_resolving(),
            Err(AuctionError::NotActive)
        ));
    }

    #[test]
    fn record_high_attaches_team() {
        let mut ctl = RoundController::new();
        ctl.begin(&player("P1", 10), Utc::now()).unwrap();
        ctl.record_high(12, "T1".to_string());

        let round = ctl.current().unwrap();
        assert_eq!(round.high.amount, 12);
        assert_eq!(round.high.team_id.as_deref(), Some("T1"));
        assert!(round.has_bids());
    }
}
