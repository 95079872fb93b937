//! Per-session game state machine: player slots, round lifecycle, scoring,
//! timeout arbitration, and game-over detection.
//!
//! Transport-agnostic: each slot owns an outbound event sender, and every
//! mutation happens under the session lock held by the caller (a player
//! connection or a timer task). Methods report how a round ended; arming
//! timers and scheduling the next round is the gateway's job.

pub mod registry;

use crate::config::GameConfig;
use crate::gateway::protocol::ServerMessage;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Short human-typeable code identifying one session.
pub type GameCode = String;

/// Outbound event sender for one player connection. Delivery is best-effort:
/// a closed receiver never blocks the session or the other player.
pub type EventSender = mpsc::UnboundedSender<ServerMessage>;

/// The round target is this fraction of the two submissions' average.
pub const TARGET_FACTOR: f64 = 0.8;

const MAX_PLAYERS: usize = 2;

/// Scoring thresholds for one session, copied from config at creation.
#[derive(Debug, Clone, Copy)]
pub struct GameRules {
    /// A slot whose score reaches this value loses the game.
    pub losing_score: i32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self { losing_score: -10 }
    }
}

impl From<&GameConfig> for GameRules {
    fn from(game: &GameConfig) -> Self {
        Self {
            losing_score: game.losing_score,
        }
    }
}

/// Why a join was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("no session with that code")]
    NotFound,
    #[error("session already has two players")]
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// One slot filled, waiting for the second player.
    AwaitingOpponent,
    /// A round is accepting submissions.
    RoundOpen,
    /// Terminal; the session is about to be removed from the registry.
    GameOver,
}

/// How a resolved round left the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEnd {
    /// Another round should be started.
    Continue,
    /// A gameOver event was emitted; the caller must remove the session.
    GameOver,
}

/// One player's seat: identity, outbound connection, score, and this round's
/// submission. Slot order is fixed at join time.
struct PlayerSlot {
    name: String,
    score: i32,
    number: Option<f64>,
    tx: EventSender,
}

impl PlayerSlot {
    fn send(&self, event: ServerMessage) {
        let _ = self.tx.send(event);
    }
}

/// One two-player match. Owned by the registry behind an `Arc<Mutex<_>>`
/// ([`registry::SharedSession`]), which serializes its two connections and
/// its timer tasks.
pub struct GameSession {
    code: GameCode,
    players: Vec<PlayerSlot>,
    status: SessionStatus,
    round: u32,
    /// At-most-once resolution guard: once the deadline fires for a round,
    /// late submissions are stored for display but never scored.
    timeout_fired: bool,
    rules: GameRules,
    /// Armed round deadline, if any.
    timer: Option<JoinHandle<()>>,
    /// Scheduled delayed start of the next round, if any.
    restart: Option<JoinHandle<()>>,
}

impl GameSession {
    pub fn new(code: GameCode, owner: impl Into<String>, tx: EventSender, rules: GameRules) -> Self {
        Self {
            code,
            players: vec![PlayerSlot {
                name: owner.into(),
                score: 0,
                number: None,
                tx,
            }],
            status: SessionStatus::AwaitingOpponent,
            round: 0,
            timeout_fired: false,
            rules,
            timer: None,
            restart: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_game_over(&self) -> bool {
        self.status == SessionStatus::GameOver
    }

    pub fn scores(&self) -> Vec<i32> {
        self.players.iter().map(|p| p.score).collect()
    }

    /// Append the second slot. On success, `start` events go to both players
    /// (each addressed with its own 1-based slot number and the opponent's
    /// name); the caller then opens the first round.
    pub fn add_player(&mut self, name: impl Into<String>, tx: EventSender) -> Result<usize, JoinError> {
        if self.players.len() >= MAX_PLAYERS {
            return Err(JoinError::Full);
        }
        self.players.push(PlayerSlot {
            name: name.into(),
            score: 0,
            number: None,
            tx,
        });
        let slot = self.players.len() - 1;
        if self.players.len() == MAX_PLAYERS {
            for (i, p) in self.players.iter().enumerate() {
                p.send(ServerMessage::Start {
                    player_number: i + 1,
                    opponent: self.players[1 - i].name.clone(),
                });
            }
        }
        Ok(slot)
    }

    /// Store one slot's submission. Stray messages — wrong state, unknown
    /// slot, duplicate submission — are no-ops. Returns `Some` when this
    /// submission completed the round.
    pub fn submit_number(&mut self, slot: usize, value: f64) -> Option<RoundEnd> {
        if self.status != SessionStatus::RoundOpen {
            return None;
        }
        let Some(player) = self.players.get_mut(slot) else {
            return None;
        };
        if player.number.is_some() {
            return None;
        }
        player.number = Some(value);
        if self.timeout_fired {
            // Kept for the round summary; scoring already happened.
            return None;
        }
        if self.players.iter().all(|p| p.number.is_some()) {
            Some(self.resolve_by_completion())
        } else {
            None
        }
    }

    /// Resolve the round the deadline way: every slot that has not submitted
    /// loses a point, and the timeout-fired marker suppresses any later
    /// scoring for this round. Returns `None` when there is nothing to do
    /// (stale timer, round already resolved).
    pub fn force_timeout(&mut self) -> Option<RoundEnd> {
        if self.status != SessionStatus::RoundOpen || self.timeout_fired {
            return None;
        }
        if self.players.iter().all(|p| p.number.is_some()) {
            // Already resolved by completion.
            return None;
        }
        self.timeout_fired = true;
        for p in self.players.iter_mut() {
            if p.number.is_none() {
                p.score -= 1;
            }
        }
        let scores = self.scores();
        self.broadcast(ServerMessage::Timeout { scores });
        if self.check_game_over() {
            Some(RoundEnd::GameOver)
        } else {
            Some(RoundEnd::Continue)
        }
    }

    /// Open the next round: clear submissions and the timeout marker, bump
    /// the round counter, and tell both players. No-op once terminal.
    pub fn start_next_round(&mut self) {
        if self.status == SessionStatus::GameOver || self.players.len() < MAX_PLAYERS {
            return;
        }
        for p in self.players.iter_mut() {
            p.number = None;
        }
        self.timeout_fired = false;
        self.round += 1;
        self.status = SessionStatus::RoundOpen;
        self.broadcast(ServerMessage::RoundStart);
    }

    /// Both numbers are in: target = 0.8 × average, the closer slot wins,
    /// the other slot loses a point.
    fn resolve_by_completion(&mut self) -> RoundEnd {
        let (Some(n0), Some(n1)) = (self.players[0].number, self.players[1].number) else {
            return RoundEnd::Continue;
        };
        let average = (n0 + n1) / 2.0;
        let target = average * TARGET_FACTOR;
        let d0 = (n0 - target).abs();
        let d1 = (n1 - target).abs();
        // Strict comparison scanning in slot order: exact ties go to slot 0.
        let winner = if d1 < d0 { 1 } else { 0 };
        self.players[1 - winner].score -= 1;
        let scores = self.scores();
        self.broadcast(ServerMessage::RoundResult {
            numbers: vec![n0, n1],
            average,
            target,
            winner: winner + 1,
            scores,
        });
        if self.check_game_over() {
            RoundEnd::GameOver
        } else {
            RoundEnd::Continue
        }
    }

    /// Checked in slot order: if both slots cross the threshold in the same
    /// resolution, slot 0 is the loser and slot 1 is declared winner.
    fn check_game_over(&mut self) -> bool {
        let Some(loser) = self
            .players
            .iter()
            .position(|p| p.score <= self.rules.losing_score)
        else {
            return false;
        };
        let winner = self.players[1 - loser].name.clone();
        self.broadcast(ServerMessage::GameOver { winner });
        self.status = SessionStatus::GameOver;
        true
    }

    fn broadcast(&self, event: ServerMessage) {
        for p in &self.players {
            p.send(event.clone());
        }
    }

    /// Arm the round deadline, replacing (and cancelling) any previous one.
    pub fn set_timer_task(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.timer.replace(handle) {
            old.abort();
        }
    }

    /// Clear the deadline slot without aborting — used by the timer task
    /// itself once it has fired.
    pub fn take_timer_task(&mut self) -> Option<JoinHandle<()>> {
        self.timer.take()
    }

    /// Cancel the armed deadline (the round resolved by completion first).
    pub fn disarm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Schedule the delayed start of the next round, replacing any previous.
    pub fn set_restart_task(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.restart.replace(handle) {
            old.abort();
        }
    }

    /// Clear the restart slot without aborting — used by the restart task
    /// itself once it runs.
    pub fn take_restart_task(&mut self) -> Option<JoinHandle<()>> {
        self.restart.take()
    }

    /// Cancel every pending task; used on teardown and game over.
    pub fn cancel_tasks(&mut self) {
        self.disarm_timer();
        if let Some(restart) = self.restart.take() {
            restart.abort();
        }
    }

    /// Mark the session terminal so any task that raced past a cancel
    /// finds nothing to do.
    pub fn close(&mut self) {
        self.status = SessionStatus::GameOver;
    }
}
