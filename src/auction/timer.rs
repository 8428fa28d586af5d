// Countdown timer: one authoritative ticking source per process.
//
// The countdown runs as a spawned task that reports ticks and a single
// expiry over an mpsc channel. Every (re)start bumps a generation counter;
// the engine discards messages carrying a stale generation, so a stopped or
// replaced countdown can never deliver a late expiry into a new round.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Messages from the ticking task to the engine loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMsg {
    Tick { generation: u64, remaining: u32 },
    Expired { generation: u64 },
}

impl TimerMsg {
    pub fn generation(&self) -> u64 {
        match self {
            TimerMsg::Tick { generation, .. } | TimerMsg::Expired { generation } => *generation,
        }
    }
}

/// Engine-side handle to the countdown task.
///
/// Owned by the engine's single writer task; `remaining` is the engine's
/// view of the clock, updated from observed ticks, and survives `stop()` so
/// a paused round can resume with its exact remaining time.
pub struct Countdown {
    generation: u64,
    remaining: u32,
    running: bool,
    task: Option<JoinHandle<()>>,
    tx: mpsc::Sender<TimerMsg>,
}

impl Countdown {
    pub fn new(tx: mpsc::Sender<TimerMsg>) -> Self {
        Countdown {
            generation: 0,
            remaining: 0,
            running: false,
            task: None,
            tx,
        }
    }

    /// Start (or restart) the countdown from `secs`. Any previous ticking
    /// task is aborted and its in-flight messages are stranded on the old
    /// generation.
    pub fn start(&mut self, secs: u32) {
        self.halt_task();
        self.generation = self.generation.wrapping_add(1);
        self.remaining = secs;
        self.running = true;

        let tx = self.tx.clone();
        let generation = self.generation;
        self.task = Some(tokio::spawn(run_countdown(generation, secs, tx)));
    }

    /// Stop ticking without losing the remaining time. Bumps the generation
    /// so any already-queued tick or expiry from the aborted task is
    /// discarded by `observe`.
    pub fn stop(&mut self) {
        self.halt_task();
        self.generation = self.generation.wrapping_add(1);
        self.running = false;
    }

    /// Apply the accepted-bid floor: the countdown restarts with at least
    /// `floor` seconds, keeping the larger of the current remaining time and
    /// the floor. Returns the new remaining time.
    pub fn floor_reset(&mut self, floor: u32) -> u32 {
        let target = self.remaining.max(floor);
        self.start(target);
        target
    }

    /// Filter a received message against the current generation, updating
    /// the engine-side clock for live ticks. Returns `false` for stale
    /// messages, which the caller must ignore.
    pub fn observe(&mut self, msg: &TimerMsg) -> bool {
        if msg.generation() != self.generation {
            return false;
        }
        match msg {
            TimerMsg::Tick { remaining, .. } => self.remaining = *remaining,
            TimerMsg::Expired { .. } => {
                self.remaining = 0;
                self.running = false;
            }
        }
        true
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn halt_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.halt_task();
    }
}

async fn run_countdown(generation: u64, secs: u32, tx: mpsc::Sender<TimerMsg>) {
    let mut remaining = secs;
    while remaining > 0 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        remaining -= 1;
        if tx
            .send(TimerMsg::Tick {
                generation,
                remaining,
            })
            .await
            .is_err()
        {
            return;
        }
    }
    let _ = tx.send(TimerMsg::Expired { generation }).await;
}
