// SQLite registry: players, teams, the append-only bid ledger, and the
// singleton round row. All conditional updates the engine relies on
// (compare-and-swap on the high bid, settlement, undo) are enforced here
// with transactions, so a crash can never leave a team debited without the
// player marked SOLD or vice versa.

use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::auction::{BidEntry, HighBid, Player, PlayerStatus, SaleRecord, Team};

/// Outcome of the conditional high-bid update.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The round's high bid still matched the caller's snapshot and was
    /// replaced; the bid is in the ledger.
    Applied,
    /// Another bid won the race. Carries the durable current high bid.
    Conflict(HighBid),
}

/// Counts surfaced in the auction statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatusCounts {
    pub total: usize,
    pub sold: usize,
    pub unsold: usize,
    pub available: usize,
    pub in_round: usize,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS teams (
                id               TEXT PRIMARY KEY,
                name             TEXT NOT NULL,
                captain_name     TEXT NOT NULL DEFAULT '',
                remaining_points INTEGER NOT NULL,
                roster_count     INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS players (
                id            TEXT PRIMARY KEY,
                name          TEXT NOT NULL,
                category      TEXT NOT NULL DEFAULT '',
                base_price    INTEGER NOT NULL,
                status        TEXT NOT NULL DEFAULT 'AVAILABLE',
                owner_team_id TEXT REFERENCES teams(id),
                sold_price    INTEGER,
                sold_at       TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS bids (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                player_id TEXT NOT NULL REFERENCES players(id),
                team_id   TEXT NOT NULL REFERENCES teams(id),
                amount    INTEGER NOT NULL,
                placed_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_bids_player ON bids(player_id, placed_at);

            CREATE TABLE IF NOT EXISTS round (
                id           INTEGER PRIMARY KEY CHECK (id = 1),
                player_id    TEXT REFERENCES players(id),
                high_amount  INTEGER NOT NULL DEFAULT 0,
                high_team_id TEXT REFERENCES teams(id),
                started_at   TEXT
            );

            INSERT OR IGNORE INTO round (id, player_id, high_amount, high_team_id)
                VALUES (1, NULL, 0, NULL);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Registration (seeding; CRUD surfaces live outside this system)
    // ------------------------------------------------------------------

    /// Register a player or update their descriptive fields. Auction state
    /// (status, owner, attempts) is never touched by re-registration.
    pub fn add_player(&self, id: &str, name: &str, category: &str, base_price: u32) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO players (id, name, category, base_price)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name       = excluded.name,
                category   = excluded.category,
                base_price = excluded.base_price",
            params![id, name, category, base_price],
        )
        .context("failed to add player")?;
        Ok(())
    }

    pub fn add_team(
        &self,
        id: &str,
        name: &str,
        captain_name: &str,
        initial_points: u32,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO teams (id, name, captain_name, remaining_points)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name         = excluded.name,
                captain_name = excluded.captain_name",
            params![id, name, captain_name, initial_points],
        )
        .context("failed to add team")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Point-in-time reads
    // ------------------------------------------------------------------

    pub fn get_player(&self, id: &str) -> Result<Option<Player>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, category, base_price, status, owner_team_id,
                    sold_price, sold_at, attempt_count
             FROM players WHERE id = ?1",
            params![id],
            row_to_player,
        )
        .optional()
        .context("failed to query player")
    }

    pub fn get_team(&self, id: &str) -> Result<Option<Team>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, captain_name, remaining_points, roster_count
             FROM teams WHERE id = ?1",
            params![id],
            row_to_team,
        )
        .optional()
        .context("failed to query team")
    }

    pub fn list_players(&self) -> Result<Vec<Player>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, category, base_price, status, owner_team_id,
                        sold_price, sold_at, attempt_count
                 FROM players ORDER BY id",
            )
            .context("failed to prepare list_players query")?;
        let players = stmt
            .query_map([], row_to_player)
            .context("failed to query players")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map player rows")?;
        Ok(players)
    }

    pub fn list_teams(&self) -> Result<Vec<Team>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, captain_name, remaining_points, roster_count
                 FROM teams ORDER BY id",
            )
            .context("failed to prepare list_teams query")?;
        let teams = stmt
            .query_map([], row_to_team)
            .context("failed to query teams")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map team rows")?;
        Ok(teams)
    }

    // ------------------------------------------------------------------
    // Round lifecycle
    // ------------------------------------------------------------------

    /// Mark a player IN_ROUND and seed the round row with the base price.
    /// The status update is conditional on AVAILABLE, so a player sold
    /// between the engine's check and this call is caught here.
    pub fn begin_round(&self, player_id: &str, base_price: u32, started_at: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let updated = tx
            .execute(
                "UPDATE players SET status = 'IN_ROUND'
                 WHERE id = ?1 AND status = 'AVAILABLE'",
                params![player_id],
            )
            .context("failed to mark player in round")?;
        if updated != 1 {
            bail!("player {player_id} is no longer available");
        }

        tx.execute(
            "UPDATE round SET player_id = ?1, high_amount = ?2,
                              high_team_id = NULL, started_at = ?3
             WHERE id = 1",
            params![player_id, base_price, started_at],
        )
        .context("failed to seed round row")?;

        tx.commit().context("failed to commit begin_round")
    }

    /// Compare-and-swap on the durable high bid, appending to the bid
    /// ledger in the same transaction when the swap succeeds.
    ///
    /// The update applies only if the round still holds `expected` for this
    /// player; otherwise the current durable high bid is returned as a
    /// conflict and nothing is written. Two bids validated against the same
    /// prior snapshot can therefore never both land.
    pub fn cas_high_bid(
        &self,
        player_id: &str,
        expected: &HighBid,
        amount: u32,
        team_id: &str,
    ) -> Result<CasOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let swapped = tx
            .execute(
                "UPDATE round SET high_amount = ?1, high_team_id = ?2
                 WHERE id = 1 AND player_id = ?3
                   AND high_amount = ?4 AND high_team_id IS ?5",
                params![
                    amount,
                    team_id,
                    player_id,
                    expected.amount,
                    expected.team_id.as_deref()
                ],
            )
            .context("failed to apply high-bid update")?;

        if swapped != 1 {
            let current = tx
                .query_row(
                    "SELECT high_amount, high_team_id FROM round
                     WHERE id = 1 AND player_id = ?1",
                    params![player_id],
                    |row| {
                        Ok(HighBid {
                            amount: row.get(0)?,
                            team_id: row.get(1)?,
                        })
                    },
                )
                .optional()
                .context("failed to read current high bid")?
                .unwrap_or(HighBid {
                    amount: 0,
                    team_id: None,
                });
            return Ok(CasOutcome::Conflict(current));
        }

        tx.execute(
            "INSERT INTO bids (player_id, team_id, amount) VALUES (?1, ?2, ?3)",
            params![player_id, team_id, amount],
        )
        .context("failed to append to bid ledger")?;

        tx.commit().context("failed to commit bid")?;
        Ok(CasOutcome::Applied)
    }

    /// Commit a sale: debit the team, grow its roster, mark the player SOLD
    /// and clear the round row, all in one transaction.
    pub fn commit_sale(
        &self,
        player_id: &str,
        team_id: &str,
        amount: u32,
        sold_at: &DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let debited = tx
            .execute(
                "UPDATE teams SET remaining_points = remaining_points - ?1,
                                  roster_count = roster_count + 1
                 WHERE id = ?2 AND remaining_points >= ?1",
                params![amount, team_id],
            )
            .context("failed to debit team")?;
        if debited != 1 {
            bail!("team {team_id} cannot cover a sale of {amount}");
        }

        let marked = tx
            .execute(
                "UPDATE players SET status = 'SOLD', owner_team_id = ?1,
                                    sold_price = ?2, sold_at = ?3
                 WHERE id = ?4 AND status = 'IN_ROUND'",
                params![team_id, amount, sold_at.to_rfc3339(), player_id],
            )
            .context("failed to mark player sold")?;
        if marked != 1 {
            bail!("player {player_id} was not in a round at settlement");
        }

        clear_round_tx(&tx)?;
        tx.commit().context("failed to commit sale")
    }

    /// Commit a no-bid outcome: bump the attempt count and either return the
    /// player to AVAILABLE (for a retry) or mark it terminally UNSOLD.
    /// Returns the new attempt count.
    pub fn commit_unsold(&self, player_id: &str, exhausted: bool) -> Result<u32> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let status = if exhausted { "UNSOLD" } else { "AVAILABLE" };
        let updated = tx
            .execute(
                "UPDATE players SET status = ?1, attempt_count = attempt_count + 1
                 WHERE id = ?2 AND status = 'IN_ROUND'",
                params![status, player_id],
            )
            .context("failed to mark player unsold")?;
        if updated != 1 {
            bail!("player {player_id} was not in a round at settlement");
        }

        let attempts: u32 = tx
            .query_row(
                "SELECT attempt_count FROM players WHERE id = ?1",
                params![player_id],
                |row| row.get(0),
            )
            .context("failed to read attempt count")?;

        clear_round_tx(&tx)?;
        tx.commit().context("failed to commit unsold outcome")?;
        Ok(attempts)
    }

    /// Compensating undo of a completed sale: credit the points back, shrink
    /// the roster, clear the player's sold fields and delete that player's
    /// ledger entries. Conditional on the player still being SOLD, so a
    /// double undo fails instead of crediting twice.
    pub fn commit_undo(&self, player_id: &str) -> Result<(String, u32)> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let (team_id, amount): (String, u32) = tx
            .query_row(
                "SELECT owner_team_id, sold_price FROM players
                 WHERE id = ?1 AND status = 'SOLD'",
                params![player_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("failed to read sale to undo")?
            .with_context(|| format!("player {player_id} is not sold"))?;

        tx.execute(
            "UPDATE teams SET remaining_points = remaining_points + ?1,
                              roster_count = roster_count - 1
             WHERE id = ?2",
            params![amount, team_id],
        )
        .context("failed to credit team")?;

        tx.execute(
            "UPDATE players SET status = 'AVAILABLE', owner_team_id = NULL,
                                sold_price = NULL, sold_at = NULL
             WHERE id = ?1",
            params![player_id],
        )
        .context("failed to clear sold fields")?;

        tx.execute("DELETE FROM bids WHERE player_id = ?1", params![player_id])
            .context("failed to delete ledger entries")?;

        tx.commit().context("failed to commit undo")?;
        Ok((team_id, amount))
    }

    /// The durable round row, if one is open.
    pub fn load_round(&self) -> Result<Option<(String, HighBid)>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT player_id, high_amount, high_team_id FROM round WHERE id = 1",
                [],
                |row| {
                    let player_id: Option<String> = row.get(0)?;
                    match player_id {
                        Some(pid) => Ok(Some((
                            pid,
                            HighBid {
                                amount: row.get(1)?,
                                team_id: row.get(2)?,
                            },
                        ))),
                        None => Ok(None),
                    }
                },
            )
            .context("failed to load round row")?;
        Ok(row)
    }

    // ------------------------------------------------------------------
    // Ledger queries and statistics
    // ------------------------------------------------------------------

    /// Ledger entries for one player, newest first.
    pub fn bids_for_player(&self, player_id: &str) -> Result<Vec<BidEntry>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT player_id, team_id, amount, placed_at
                 FROM bids WHERE player_id = ?1
                 ORDER BY placed_at DESC, id DESC",
            )
            .context("failed to prepare bid history query")?;
        let bids = stmt
            .query_map(params![player_id], |row| {
                Ok(BidEntry {
                    player_id: row.get(0)?,
                    team_id: row.get(1)?,
                    amount: row.get(2)?,
                    placed_at: row.get(3)?,
                })
            })
            .context("failed to query bid history")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map bid rows")?;
        Ok(bids)
    }

    pub fn total_bids(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM bids", [], |row| row.get(0))
            .context("failed to count bids")?;
        Ok(count as usize)
    }

    pub fn status_counts(&self) -> Result<StatusCounts> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM players GROUP BY status")
            .context("failed to prepare status counts query")?;
        let rows = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count as usize))
            })
            .context("failed to query status counts")?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row.context("failed to read status count row")?;
            counts.total += count;
            match PlayerStatus::parse(&status) {
                Some(PlayerStatus::Sold) => counts.sold = count,
                Some(PlayerStatus::Unsold) => counts.unsold = count,
                Some(PlayerStatus::Available) => counts.available = count,
                Some(PlayerStatus::InRound) => counts.in_round = count,
                None => {}
            }
        }
        Ok(counts)
    }

    /// The most expensive completed sale, if any.
    pub fn highest_sale(&self) -> Result<Option<SaleRecord>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, owner_team_id, sold_price, sold_at
             FROM players WHERE status = 'SOLD'
             ORDER BY sold_price DESC LIMIT 1",
            [],
            |row| {
                let sold_at: Option<String> = row.get(4)?;
                Ok(SaleRecord {
                    player_id: row.get(0)?,
                    player_name: row.get(1)?,
                    team_id: row.get(2)?,
                    amount: row.get(3)?,
                    sold_at: parse_timestamp(sold_at.as_deref()),
                })
            },
        )
        .optional()
        .context("failed to query highest sale")
    }

    // ------------------------------------------------------------------
    // Reset and recovery
    // ------------------------------------------------------------------

    /// Restore the whole event to its pre-auction state: every player back
    /// to AVAILABLE with zero attempts, every budget back to
    /// `initial_budget`, the ledger emptied and the round cleared.
    pub fn reset_auction(&self, initial_budget: u32) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        tx.execute("DELETE FROM bids", [])
            .context("failed to clear bid ledger")?;
        tx.execute(
            "UPDATE players SET status = 'AVAILABLE', owner_team_id = NULL,
                                sold_price = NULL, sold_at = NULL, attempt_count = 0",
            [],
        )
        .context("failed to reset players")?;
        tx.execute(
            "UPDATE teams SET remaining_points = ?1, roster_count = 0",
            params![initial_budget],
        )
        .context("failed to reset teams")?;
        clear_round_tx(&tx)?;

        tx.commit().context("failed to commit reset")
    }

    /// Startup recovery: rebuild authoritative state from entity statuses
    /// and the ledger instead of trusting whatever volatile round/timer
    /// state existed before the crash.
    ///
    /// Any player stranded IN_ROUND goes back to AVAILABLE (its round never
    /// settled), the round row is cleared, and every team's points and
    /// roster count are recomputed from the players it actually owns.
    /// Returns the number of stranded players released.
    pub fn recover(&self, initial_budget: u32) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        let released = tx
            .execute(
                "UPDATE players SET status = 'AVAILABLE'
                 WHERE status = 'IN_ROUND'",
                [],
            )
            .context("failed to release stranded players")?;

        clear_round_tx(&tx)?;

        tx.execute(
            "UPDATE teams SET
                roster_count = (
                    SELECT COUNT(*) FROM players
                    WHERE owner_team_id = teams.id AND status = 'SOLD'
                ),
                remaining_points = ?1 - COALESCE((
                    SELECT SUM(sold_price) FROM players
                    WHERE owner_team_id = teams.id AND status = 'SOLD'
                ), 0)",
            params![initial_budget],
        )
        .context("failed to reconcile team budgets")?;

        tx.commit().context("failed to commit recovery")?;
        Ok(released)
    }
}

fn clear_round_tx(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    tx.execute(
        "UPDATE round SET player_id = NULL, high_amount = 0,
                          high_team_id = NULL, started_at = NULL
         WHERE id = 1",
        [],
    )
    .context("failed to clear round row")?;
    Ok(())
}

fn row_to_player(row: &Row<'_>) -> rusqlite::Result<Player> {
    let status: String = row.get(4)?;
    let sold_at: Option<String> = row.get(7)?;
    Ok(Player {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row.get(2)?,
        base_price: row.get(3)?,
        status: PlayerStatus::parse(&status).unwrap_or(PlayerStatus::Available),
        owner_team_id: row.get(5)?,
        sold_price: row.get(6)?,
        sold_at: sold_at.as_deref().and_then(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        }),
        attempt_count: row.get(8)?,
    })
}

fn row_to_team(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        name: row.get(1)?,
        captain_name: row.get(2)?,
        remaining_points: row.get(3)?,
        roster_count: row.get(4)?,
    })
}

fn parse_timestamp(s: Option<&str>) -> DateTime<Utc> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
    .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    /// Helper: seed two teams and two players.
    fn seeded_db() -> Database {
        let db = test_db();
        db.add_team("T1", "Thunder", "Asha", 110).unwrap();
        db.add_team("T2", "Strikers", "Ravi", 110).unwrap();
        db.add_player("P1", "Vikram", "Batsman", 10).unwrap();
        db.add_player("P2", "Sunil", "Bowler", 5).unwrap();
        db
    }

    fn start_round(db: &Database, player_id: &str, base_price: u32) {
        db.begin_round(player_id, base_price, &Utc::now().to_rfc3339())
            .unwrap();
    }

    fn base_high(amount: u32) -> HighBid {
        HighBid {
            amount,
            team_id: None,
        }
    }

    // ------------------------------------------------------------------
    // Registration and reads
    // ------------------------------------------------------------------

    #[test]
    fn add_and_get_player() {
        let db = seeded_db();
        let player = db.get_player("P1").unwrap().unwrap();
        assert_eq!(player.name, "Vikram");
        assert_eq!(player.base_price, 10);
        assert_eq!(player.status, PlayerStatus::Available);
        assert_eq!(player.attempt_count, 0);
        assert!(db.get_player("P99").unwrap().is_none());
    }

    #[test]
    fn re_registration_keeps_auction_state() {
        let db = seeded_db();
        start_round(&db, "P1", 10);
        db.add_player("P1", "Vikram S", "Batsman", 12).unwrap();

        let player = db.get_player("P1").unwrap().unwrap();
        assert_eq!(player.name, "Vikram S");
        assert_eq!(player.status, PlayerStatus::InRound);
    }

    #[test]
    fn list_players_and_teams() {
        let db = seeded_db();
        assert_eq!(db.list_players().unwrap().len(), 2);
        assert_eq!(db.list_teams().unwrap().len(), 2);
    }

    // ------------------------------------------------------------------
    // Round lifecycle
    // ------------------------------------------------------------------

    #[test]
    fn begin_round_marks_player_and_seeds_high_bid() {
        let db = seeded_db();
        start_round(&db, "P1", 10);

        let player = db.get_player("P1").unwrap().unwrap();
        assert_eq!(player.status, PlayerStatus::InRound);

        let (player_id, high) = db.load_round().unwrap().unwrap();
        assert_eq!(player_id, "P1");
        assert_eq!(high, base_high(10));
    }

    #[test]
    fn begin_round_rejects_non_available_player() {
        let db = seeded_db();
        start_round(&db, "P1", 10);
        let err = db
            .begin_round("P1", 10, &Utc::now().to_rfc3339())
            .unwrap_err();
        assert!(err.to_string().contains("no longer available"));
    }

    // ------------------------------------------------------------------
    // Compare-and-swap bid admission
    // ------------------------------------------------------------------

    #[test]
    fn cas_applies_against_matching_snapshot() {
        let db = seeded_db();
        start_round(&db, "P1", 10);

        let outcome = db.cas_high_bid("P1", &base_high(10), 12, "T1").unwrap();
        assert_eq!(outcome, CasOutcome::Applied);

        let (_, high) = db.load_round().unwrap().unwrap();
        assert_eq!(high.amount, 12);
        assert_eq!(high.team_id.as_deref(), Some("T1"));

        let bids = db.bids_for_player("P1").unwrap();
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].amount, 12);
        assert_eq!(bids[0].team_id, "T1");
    }

    #[test]
    fn cas_rejects_stale_snapshot_and_reports_current() {
        let db = seeded_db();
        start_round(&db, "P1", 10);

        // Two bidders validated against the same base-price snapshot.
        assert_eq!(
            db.cas_high_bid("P1", &base_high(10), 12, "T1").unwrap(),
            CasOutcome::Applied
        );
        let outcome = db.cas_high_bid("P1", &base_high(10), 15, "T2").unwrap();
        match outcome {
            CasOutcome::Conflict(current) => {
                assert_eq!(current.amount, 12);
                assert_eq!(current.team_id.as_deref(), Some("T1"));
            }
            CasOutcome::Applied => panic!("second bid against a stale snapshot must conflict"),
        }

        // The losing bid never reached the ledger.
        assert_eq!(db.bids_for_player("P1").unwrap().len(), 1);
    }

    #[test]
    fn cas_chain_produces_strictly_increasing_ledger() {
        let db = seeded_db();
        start_round(&db, "P1", 10);

        let mut snapshot = base_high(10);
        for (amount, team) in [(12u32, "T1"), (15, "T2"), (20, "T1")] {
            assert_eq!(
                db.cas_high_bid("P1", &snapshot, amount, team).unwrap(),
                CasOutcome::Applied
            );
            snapshot = HighBid {
                amount,
                team_id: Some(team.to_string()),
            };
        }

        let mut amounts: Vec<u32> = db
            .bids_for_player("P1")
            .unwrap()
            .iter()
            .map(|b| b.amount)
            .collect();
        amounts.reverse(); // query returns newest first
        assert_eq!(amounts, vec![12, 15, 20]);
        assert!(amounts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn cas_against_wrong_player_conflicts() {
        let db = seeded_db();
        start_round(&db, "P1", 10);
        let outcome = db.cas_high_bid("P2", &base_high(5), 7, "T1").unwrap();
        assert!(matches!(outcome, CasOutcome::Conflict(_)));
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    #[test]
    fn commit_sale_debits_and_marks_sold_atomically() {
        let db = seeded_db();
        start_round(&db, "P1", 10);
        db.cas_high_bid("P1", &base_high(10), 15, "T2").unwrap();

        db.commit_sale("P1", "T2", 15, &Utc::now()).unwrap();

        let player = db.get_player("P1").unwrap().unwrap();
        assert_eq!(player.status, PlayerStatus::Sold);
        assert_eq!(player.owner_team_id.as_deref(), Some("T2"));
        assert_eq!(player.sold_price, Some(15));
        assert!(player.sold_at.is_some());

        let team = db.get_team("T2").unwrap().unwrap();
        assert_eq!(team.remaining_points, 95);
        assert_eq!(team.roster_count, 1);

        assert!(db.load_round().unwrap().is_none());
    }

    #[test]
    fn commit_sale_refuses_overdraft_and_changes_nothing() {
        let db = seeded_db();
        start_round(&db, "P1", 10);

        let err = db.commit_sale("P1", "T1", 500, &Utc::now()).unwrap_err();
        assert!(err.to_string().contains("cannot cover"));

        // Nothing moved: player still in round, team untouched.
        let player = db.get_player("P1").unwrap().unwrap();
        assert_eq!(player.status, PlayerStatus::InRound);
        let team = db.get_team("T1").unwrap().unwrap();
        assert_eq!(team.remaining_points, 110);
        assert_eq!(team.roster_count, 0);
    }

    #[test]
    fn commit_unsold_requeue_returns_player_to_available() {
        let db = seeded_db();
        start_round(&db, "P1", 10);

        let attempts = db.commit_unsold("P1", false).unwrap();
        assert_eq!(attempts, 1);

        let player = db.get_player("P1").unwrap().unwrap();
        assert_eq!(player.status, PlayerStatus::Available);
        assert_eq!(player.attempt_count, 1);
        assert!(db.load_round().unwrap().is_none());
    }

    #[test]
    fn commit_unsold_exhausted_is_terminal() {
        let db = seeded_db();
        start_round(&db, "P1", 10);
        db.commit_unsold("P1", false).unwrap();
        start_round(&db, "P1", 10);
        let attempts = db.commit_unsold("P1", true).unwrap();

        assert_eq!(attempts, 2);
        let player = db.get_player("P1").unwrap().unwrap();
        assert_eq!(player.status, PlayerStatus::Unsold);
    }

    // ------------------------------------------------------------------
    // Undo
    // ------------------------------------------------------------------

    #[test]
    fn undo_restores_team_and_clears_player() {
        let db = seeded_db();
        start_round(&db, "P1", 10);
        db.cas_high_bid("P1", &base_high(10), 15, "T2").unwrap();
        db.commit_sale("P1", "T2", 15, &Utc::now()).unwrap();

        let (team_id, amount) = db.commit_undo("P1").unwrap();
        assert_eq!(team_id, "T2");
        assert_eq!(amount, 15);

        let team = db.get_team("T2").unwrap().unwrap();
        assert_eq!(team.remaining_points, 110);
        assert_eq!(team.roster_count, 0);

        let player = db.get_player("P1").unwrap().unwrap();
        assert_eq!(player.status, PlayerStatus::Available);
        assert!(player.owner_team_id.is_none());
        assert!(player.sold_price.is_none());
        assert!(player.sold_at.is_none());

        // Ledger entries for the sale are gone.
        assert!(db.bids_for_player("P1").unwrap().is_empty());
    }

    #[test]
    fn double_undo_fails_without_crediting_twice() {
        let db = seeded_db();
        start_round(&db, "P1", 10);
        db.cas_high_bid("P1", &base_high(10), 15, "T2").unwrap();
        db.commit_sale("P1", "T2", 15, &Utc::now()).unwrap();
        db.commit_undo("P1").unwrap();

        assert!(db.commit_undo("P1").is_err());
        let team = db.get_team("T2").unwrap().unwrap();
        assert_eq!(team.remaining_points, 110);
        assert_eq!(team.roster_count, 0);
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    #[test]
    fn status_counts_and_highest_sale() {
        let db = seeded_db();
        start_round(&db, "P1", 10);
        db.cas_high_bid("P1", &base_high(10), 20, "T1").unwrap();
        db.commit_sale("P1", "T1", 20, &Utc::now()).unwrap();

        let counts = db.status_counts().unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.sold, 1);
        assert_eq!(counts.available, 1);
        assert_eq!(counts.unsold, 0);

        assert_eq!(db.total_bids().unwrap(), 1);

        let highest = db.highest_sale().unwrap().unwrap();
        assert_eq!(highest.player_id, "P1");
        assert_eq!(highest.amount, 20);
    }

    // ------------------------------------------------------------------
    // Reset and recovery
    // ------------------------------------------------------------------

    #[test]
    fn reset_restores_pre_auction_state() {
        let db = seeded_db();
        start_round(&db, "P1", 10);
        db.cas_high_bid("P1", &base_high(10), 15, "T2").unwrap();
        db.commit_sale("P1", "T2", 15, &Utc::now()).unwrap();

        db.reset_auction(110).unwrap();

        let player = db.get_player("P1").unwrap().unwrap();
        assert_eq!(player.status, PlayerStatus::Available);
        assert_eq!(player.attempt_count, 0);
        let team = db.get_team("T2").unwrap().unwrap();
        assert_eq!(team.remaining_points, 110);
        assert_eq!(team.roster_count, 0);
        assert_eq!(db.total_bids().unwrap(), 0);
        assert!(db.load_round().unwrap().is_none());
    }

    #[test]
    fn recover_releases_stranded_round_and_reconciles_budgets() {
        let db = seeded_db();

        // A completed sale, then a crash mid-round for another player.
        start_round(&db, "P1", 10);
        db.cas_high_bid("P1", &base_high(10), 15, "T2").unwrap();
        db.commit_sale("P1", "T2", 15, &Utc::now()).unwrap();
        start_round(&db, "P2", 5);

        // Simulate budget drift: corrupt a team's points in place.
        {
            let conn = db.conn();
            conn.execute(
                "UPDATE teams SET remaining_points = 7 WHERE id = 'T2'",
                [],
            )
            .unwrap();
        }

        let released = db.recover(110).unwrap();
        assert_eq!(released, 1);

        let p2 = db.get_player("P2").unwrap().unwrap();
        assert_eq!(p2.status, PlayerStatus::Available);
        assert!(db.load_round().unwrap().is_none());

        // Budgets derived from owned SOLD players, not from the drifted row.
        let t2 = db.get_team("T2").unwrap().unwrap();
        assert_eq!(t2.remaining_points, 95);
        assert_eq!(t2.roster_count, 1);
        let t1 = db.get_team("T1").unwrap().unwrap();
        assert_eq!(t1.remaining_points, 110);
        assert_eq!(t1.roster_count, 0);
    }
}
