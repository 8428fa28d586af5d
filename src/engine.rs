// The auction engine: a single task owning all mutable state.
//
// Every mutation (commands, ticks, expiry) funnels through this task's
// channel, so round transitions, bid admission and settlement are serialized
// without locks. Events go out on a broadcast channel only after the
// corresponding state change has committed to storage.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::auction::queue::AuctionQueue;
use crate::auction::round::{RoundController, RoundPhase};
use crate::auction::settlement::{self, Outcome, RecentSales};
use crate::auction::timer::{Countdown, TimerMsg};
use crate::auction::{bid, AuctionError, PlayerStatus};
use crate::config::Config;
use crate::db::{CasOutcome, Database};
use crate::protocol::{
    AuctionEvent, AuctionSnapshot, AuctionStats, BidInfo, Command, PlayerInfo, QueueInfo, Reply,
    RoundInfo, RoundOutcome, SaleInfo, TeamSummary,
};

/// A command paired with its requester's reply channel.
pub struct CommandEnvelope {
    pub command: Command,
    pub reply: oneshot::Sender<Reply>,
}

/// Cheap handle for submitting commands and subscribing to events, cloned
/// into every WebSocket client task.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<CommandEnvelope>,
    events: broadcast::Sender<AuctionEvent>,
}

impl EngineHandle {
    pub fn new(
        commands: mpsc::Sender<CommandEnvelope>,
        events: broadcast::Sender<AuctionEvent>,
    ) -> Self {
        EngineHandle { commands, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuctionEvent> {
        self.events.subscribe()
    }

    /// Submit a command and wait for the engine's reply. An unreachable
    /// engine (shutdown in progress) surfaces as an internal error reply.
    pub async fn request(&self, command: Command) -> Reply {
        let (tx, rx) = oneshot::channel();
        let envelope = CommandEnvelope {
            command,
            reply: tx,
        };
        if self.commands.send(envelope).await.is_err() {
            return Reply::Error {
                code: "Internal".to_string(),
                message: "engine is not running".to_string(),
            };
        }
        rx.await.unwrap_or(Reply::Error {
            code: "Internal".to_string(),
            message: "engine dropped the request".to_string(),
        })
    }
}

pub struct Engine {
    config: Config,
    db: Arc<Database>,
    controller: RoundController,
    queue: AuctionQueue,
    countdown: Countdown,
    recent_sales: RecentSales,
    auto_running: bool,
    events: broadcast::Sender<AuctionEvent>,
}

impl Engine {
    pub fn new(
        config: Config,
        db: Arc<Database>,
        events: broadcast::Sender<AuctionEvent>,
        timer_tx: mpsc::Sender<TimerMsg>,
    ) -> Self {
        Engine {
            config,
            db,
            controller: RoundController::new(),
            queue: AuctionQueue::new(),
            countdown: Countdown::new(timer_tx),
            recent_sales: RecentSales::new(),
            auto_running: false,
            events,
        }
    }

    // ------------------------------------------------------------------
    // Command handling
    // ------------------------------------------------------------------

    pub fn handle_command(&mut self, command: Command) -> Reply {
        match self.dispatch(command) {
            Ok(reply) => reply,
            Err(err) => {
                debug!(code = err.code(), error = %err, "command rejected");
                Reply::error(&err)
            }
        }
    }

    fn dispatch(&mut self, command: Command) -> Result<Reply, AuctionError> {
        match command {
            Command::StartRound { player_id } => {
                self.begin_player_round(&player_id)?;
                self.queue.remove(&player_id);
                self.emit_queue_updated();
                Ok(Reply::Ack)
            }
            Command::Pause => {
                self.controller.pause()?;
                self.countdown.stop();
                info!(remaining = self.countdown.remaining(), "round paused");
                Ok(Reply::Ack)
            }
            Command::Resume => {
                self.controller.resume()?;
                let remaining = self.countdown.remaining();
                self.countdown.start(remaining);
                info!(remaining, "round resumed");
                self.emit(AuctionEvent::TimerReset { remaining });
                Ok(Reply::Ack)
            }
            Command::PlaceBid { team_id, amount } => self.place_bid(&team_id, amount),
            Command::UndoSale { player_id } => {
                let receipt =
                    settlement::undo(&self.db, &player_id, &mut self.recent_sales)?;
                info!(
                    player = %receipt.player_id,
                    team = %receipt.team_id,
                    amount = receipt.amount,
                    "sale undone"
                );
                self.emit(AuctionEvent::SaleUndone {
                    player_id: receipt.player_id,
                    team_id: receipt.team_id,
                    amount: receipt.amount,
                });
                self.emit_teams_updated()?;
                Ok(Reply::Ack)
            }
            Command::StartAutoSequence => {
                if self.controller.phase() != RoundPhase::Idle {
                    return Err(AuctionError::RoundInProgress);
                }
                let players = self.db.list_players()?;
                self.queue = AuctionQueue::build(&players);
                self.auto_running = true;
                info!(pending = self.queue.remaining(), "auto sequence started");
                self.emit_queue_updated();
                self.advance_queue();
                Ok(Reply::Ack)
            }
            Command::StopAutoSequence => {
                self.auto_running = false;
                info!("auto sequence stopped");
                self.emit_queue_updated();
                Ok(Reply::Ack)
            }
            Command::GetState => Ok(Reply::State {
                snapshot: self.build_snapshot()?,
            }),
            Command::GetBids { player_id } => {
                let bids = self
                    .db
                    .bids_for_player(&player_id)?
                    .iter()
                    .map(BidInfo::from)
                    .collect();
                Ok(Reply::Bids { player_id, bids })
            }
            Command::ResetAuction => {
                self.countdown.stop();
                self.controller.finish();
                self.auto_running = false;
                self.queue.clear();
                self.recent_sales.clear();
                self.db.reset_auction(self.config.auction.initial_budget)?;
                info!("auction reset to pre-event state");
                self.emit(AuctionEvent::AuctionReset);
                self.emit_teams_updated()?;
                self.emit_queue_updated();
                Ok(Reply::Ack)
            }
        }
    }

    /// Put a player on the block: durable IN_ROUND mark, in-memory round,
    /// fresh countdown, broadcast. Shared by manual starts and the auto
    /// sequence.
    fn begin_player_round(&mut self, player_id: &str) -> Result<(), AuctionError> {
        if self.controller.phase() != RoundPhase::Idle {
            return Err(AuctionError::RoundInProgress);
        }
        let mut player = self
            .db
            .get_player(player_id)?
            .ok_or_else(|| AuctionError::UnknownPlayer(player_id.to_string()))?;
        if player.status != PlayerStatus::Available {
            return Err(AuctionError::NotAvailable {
                id: player.id,
                status: player.status,
            });
        }
        if player.base_price == 0 {
            player.base_price = self.config.auction.default_base_price;
        }

        let started_at = Utc::now();
        self.db
            .begin_round(&player.id, player.base_price, &started_at.to_rfc3339())?;
        self.controller.begin(&player, started_at)?;

        let duration = self.config.auction.timer_secs;
        self.countdown.start(duration);

        info!(
            player = %player.id,
            base_price = player.base_price,
            duration,
            "round started"
        );
        self.emit(AuctionEvent::RoundStarted {
            player: PlayerInfo::from(&player),
            base_price: player.base_price,
            deadline_secs: duration,
        });
        Ok(())
    }

    fn place_bid(&mut self, team_id: &str, amount: u32) -> Result<Reply, AuctionError> {
        let round = self.controller.biddable().ok_or(AuctionError::NotActive)?;
        let player_id = round.player_id.clone();
        let snapshot = round.high.clone();

        let team = self
            .db
            .get_team(team_id)?
            .ok_or_else(|| AuctionError::UnknownTeam(team_id.to_string()))?;

        bid::validate(
            round,
            &team,
            amount,
            self.config.auction.roster_capacity,
            self.config.auction.reserve_per_slot,
        )?;

        match self.db.cas_high_bid(&player_id, &snapshot, amount, team_id)? {
            CasOutcome::Applied => {
                self.controller.record_high(amount, team_id.to_string());
                let remaining = self.countdown.floor_reset(self.config.auction.bid_floor_secs);
                info!(player = %player_id, team = %team_id, amount, "bid accepted");
                self.emit(AuctionEvent::BidAccepted {
                    team_id: team_id.to_string(),
                    amount,
                });
                self.emit(AuctionEvent::TimerReset { remaining });
                Ok(Reply::Ack)
            }
            CasOutcome::Conflict(current) => {
                // Bring the in-memory snapshot back in line with storage so
                // the next bidder validates against the real price.
                self.controller.sync_high(current.clone());
                Err(AuctionError::ConcurrencyConflict {
                    amount: current.amount,
                    team_id: current.team_id,
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Timer handling
    // ------------------------------------------------------------------

    pub fn handle_timer(&mut self, msg: TimerMsg) {
        if !self.countdown.observe(&msg) {
            return; // stale generation
        }
        match msg {
            TimerMsg::Tick { remaining, .. } => {
                if self.controller.phase() == RoundPhase::Active {
                    self.emit(AuctionEvent::TimerTick { remaining });
                }
            }
            TimerMsg::Expired { .. } => self.resolve_expiry(),
        }
    }

    fn resolve_expiry(&mut self) {
        let round = match self.controller.begin_resolving() {
            Ok(round) => round,
            Err(err) => {
                warn!(error = %err, "expiry arrived outside an active round");
                return;
            }
        };

        let outcome = match settlement::resolve(
            &self.db,
            &round,
            self.config.auction.max_attempts,
            &mut self.recent_sales,
        ) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(player = %round.player_id, error = %err, "settlement failed");
                self.controller.finish();
                return;
            }
        };

        match &outcome {
            Outcome::Sold { team_id, amount } => {
                info!(
                    player = %round.player_id,
                    team = %team_id,
                    amount,
                    "player sold"
                );
                self.emit(AuctionEvent::RoundResolved {
                    outcome: RoundOutcome::Sold,
                    player_id: round.player_id.clone(),
                    team_id: Some(team_id.clone()),
                    amount: Some(*amount),
                });
                if let Err(err) = self.emit_teams_updated() {
                    error!(error = %err, "failed to broadcast team state");
                }
            }
            Outcome::Unsold { requeued, attempts } => {
                info!(
                    player = %round.player_id,
                    attempts,
                    requeued,
                    "round ended without bids"
                );
                if *requeued && self.auto_running {
                    self.queue.push_retry(round.player_id.clone());
                    self.emit_queue_updated();
                }
                self.emit(AuctionEvent::RoundResolved {
                    outcome: RoundOutcome::Unsold,
                    player_id: round.player_id.clone(),
                    team_id: None,
                    amount: None,
                });
            }
        }

        self.controller.finish();
        if self.auto_running {
            self.advance_queue();
        }
    }

    /// Dequeue and start the next round of the auto sequence, skipping
    /// players no longer available. Ends the sequence when both lists are
    /// exhausted.
    fn advance_queue(&mut self) {
        loop {
            let db = Arc::clone(&self.db);
            let next = self.queue.next(|id| {
                matches!(
                    db.get_player(id),
                    Ok(Some(p)) if p.status == PlayerStatus::Available && p.owner_team_id.is_none()
                )
            });
            match next {
                Some(player_id) => match self.begin_player_round(&player_id) {
                    Ok(()) => {
                        self.emit_queue_updated();
                        return;
                    }
                    Err(err) => {
                        warn!(player = %player_id, error = %err, "skipping unstartable player");
                    }
                },
                None => {
                    self.auto_running = false;
                    info!("auto sequence completed");
                    self.emit(AuctionEvent::AutoAuctionCompleted);
                    self.emit_queue_updated();
                    return;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Snapshots and broadcasting
    // ------------------------------------------------------------------

    fn build_snapshot(&self) -> Result<AuctionSnapshot, AuctionError> {
        let round = self
            .controller
            .current()
            .map(|r| RoundInfo::build(r, self.controller.phase(), self.countdown.remaining()));

        let counts = self.db.status_counts()?;
        let total_bids = self.db.total_bids()?;
        let highest = self.db.highest_sale()?;

        Ok(AuctionSnapshot {
            round,
            teams: self.team_summaries()?,
            queue: QueueInfo {
                remaining: self.queue.remaining(),
                retry_count: self.queue.retry_count(),
                auto_running: self.auto_running,
            },
            recent_sales: self.recent_sales.iter().map(SaleInfo::from).collect(),
            stats: AuctionStats::build(counts, total_bids, highest.as_ref()),
        })
    }

    fn team_summaries(&self) -> Result<Vec<TeamSummary>, AuctionError> {
        let teams = self.db.list_teams()?;
        Ok(teams
            .iter()
            .map(|t| {
                TeamSummary::build(
                    t,
                    self.config.auction.roster_capacity,
                    self.config.auction.reserve_per_slot,
                )
            })
            .collect())
    }

    fn emit_teams_updated(&self) -> Result<(), AuctionError> {
        let teams = self.team_summaries()?;
        self.emit(AuctionEvent::TeamsUpdated { teams });
        Ok(())
    }

    fn emit_queue_updated(&self) {
        self.emit(AuctionEvent::QueueUpdated {
            remaining: self.queue.remaining(),
            retry_count: self.queue.retry_count(),
        });
    }

    fn emit(&self, event: AuctionEvent) {
        // No subscribers is fine; broadcast failure never affects state.
        let _ = self.events.send(event);
    }
}

/// Drive the engine until the command channel closes.
pub async fn run(
    mut engine: Engine,
    mut commands: mpsc::Receiver<CommandEnvelope>,
    mut timer_rx: mpsc::Receiver<TimerMsg>,
) {
    loop {
        tokio::select! {
            maybe = commands.recv() => match maybe {
                Some(envelope) => {
                    let reply = engine.handle_command(envelope.command);
                    let _ = envelope.reply.send(reply);
                }
                None => break,
            },
            Some(msg) = timer_rx.recv() => engine.handle_timer(msg),
        }
    }
    info!("engine stopped");
}
