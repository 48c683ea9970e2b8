//! Match Engine
//!
//! Owns every live match. The collection sits behind one `RwLock` so that
//! lookups run alongside mutations of other matches; each match has its own
//! `Mutex` so that all mutations of a single match are serialized.
//!
//! The engine never settles a match on its own. The gateway observes a
//! winning throw (or a forfeit) and calls [`MatchEngine::end_match`].

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::core::ids::{MatchId, RecordId, SessionToken};
use crate::core::rating::{self, Rating};
use crate::game::board::{Coordinate, Ship};
use crate::game::state::{
    BombResult, MatchError, MatchPhase, MatchState, PlayerSlot, TurnState,
};
use crate::network::auth::SessionRegistry;
use crate::store::{AccountStore, MatchRecord, RecordSide, StoreError};

impl From<StoreError> for MatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AccountNotFound => MatchError::AccountNotFound,
            StoreError::PersistenceFailure(msg) => MatchError::PersistenceFailure(msg),
        }
    }
}

/// What to do when a player lets their turn clock run out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TurnTimeoutPolicy {
    /// Hand the turn to the opponent.
    #[default]
    Pass,
    /// The stalled player loses.
    Forfeit,
    /// Throw at a random untried cell on the player's behalf.
    RandomBomb,
}

impl std::str::FromStr for TurnTimeoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(TurnTimeoutPolicy::Pass),
            "forfeit" => Ok(TurnTimeoutPolicy::Forfeit),
            "random-bomb" | "random_bomb" => Ok(TurnTimeoutPolicy::RandomBomb),
            other => Err(format!("unknown turn timeout policy: {other}")),
        }
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// Result of a fleet placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShipPlacement {
    /// Slot that placed the fleet.
    pub slot: PlayerSlot,
    /// The other participant.
    pub opponent: SessionToken,
    /// This placement was the second one and activated the match.
    pub match_started: bool,
}

/// Whose turn it is after an assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnAssignment {
    /// Match the turn belongs to.
    pub match_id: MatchId,
    /// Both participants, slot order.
    pub players: [SessionToken; 2],
    /// Slot to move.
    pub current: PlayerSlot,
    /// Turn counter.
    pub number: u32,
}

impl TurnAssignment {
    fn from_turn(match_id: MatchId, players: [SessionToken; 2], turn: TurnState) -> Option<Self> {
        turn.current.map(|current| Self {
            match_id,
            players,
            current,
            number: turn.number,
        })
    }

    /// Token of the player to move.
    pub fn current_player(&self) -> SessionToken {
        self.players[self.current.index()]
    }

    /// Whether `player` holds the turn.
    pub fn is_turn_of(&self, player: &SessionToken) -> bool {
        self.current_player() == *player
    }
}

/// A resolved bomb plus routing information.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BombOutcome {
    /// Board-level result.
    pub result: BombResult,
    /// Who threw.
    pub thrower: SessionToken,
    /// Who was targeted.
    pub opponent: SessionToken,
    /// Next turn, `None` if the throw won the match.
    pub next_turn: Option<TurnAssignment>,
}

/// Participants and phase of a live match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Participants {
    /// Both participants, slot order.
    pub players: [SessionToken; 2],
    /// Current phase.
    pub phase: MatchPhase,
}

impl Participants {
    /// The participant facing `player`, if `player` is in the match.
    pub fn opponent_of(&self, player: &SessionToken) -> Option<SessionToken> {
        match self.players {
            [a, b] if a == *player => Some(b),
            [a, b] if b == *player => Some(a),
            _ => None,
        }
    }
}

/// Outcome of a turn timer firing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnExpiry {
    /// The turn moved on (or the match ended) before the timer fired.
    Stale,
    /// The turn was handed to the opponent.
    Passed(TurnAssignment),
    /// The stalled player forfeits; the caller settles.
    Forfeit {
        /// Remaining player.
        winner: SessionToken,
        /// Stalled player.
        loser: SessionToken,
    },
    /// A bomb was thrown on the stalled player's behalf.
    AutoBomb(BombOutcome),
}

/// Ratings and record written by a settlement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settlement {
    /// Winner's rating after the match.
    pub winner_rating: Rating,
    /// Loser's rating after the match.
    pub loser_rating: Rating,
    /// Persisted record id.
    pub record_id: RecordId,
    /// Persisted record.
    pub record: MatchRecord,
}

// =============================================================================
// ENGINE
// =============================================================================

struct LiveMatch {
    /// Never changes after creation, so lookups skip the match lock.
    players: [SessionToken; 2],
    state: Arc<Mutex<MatchState>>,
}

/// Live match collection and settlement.
pub struct MatchEngine {
    sessions: Arc<SessionRegistry>,
    store: Arc<dyn AccountStore>,
    matches: RwLock<BTreeMap<MatchId, LiveMatch>>,
}

impl MatchEngine {
    /// Create an engine with no live matches.
    pub fn new(sessions: Arc<SessionRegistry>, store: Arc<dyn AccountStore>) -> Self {
        Self {
            sessions,
            store,
            matches: RwLock::new(BTreeMap::new()),
        }
    }

    /// Allocate a match awaiting both fleets. `player1` throws first.
    pub async fn create(&self, player1: SessionToken, player2: SessionToken) -> MatchId {
        let id = MatchId::new_v4();
        let live = LiveMatch {
            players: [player1, player2],
            state: Arc::new(Mutex::new(MatchState::new(id, player1, player2))),
        };
        self.matches.write().await.insert(id, live);

        info!("Created match {} ({} vs {})", id.short(), player1.short(), player2.short());
        id
    }

    async fn live(&self, match_id: &MatchId) -> Result<([SessionToken; 2], Arc<Mutex<MatchState>>), MatchError> {
        let matches = self.matches.read().await;
        matches
            .get(match_id)
            .map(|m| (m.players, m.state.clone()))
            .ok_or(MatchError::MatchNotFound)
    }

    /// Store `player`'s fleet.
    pub async fn set_ships(
        &self,
        match_id: &MatchId,
        player: &SessionToken,
        ships: Vec<Ship>,
    ) -> Result<ShipPlacement, MatchError> {
        let (players, state) = self.live(match_id).await?;
        let mut state = state.lock().await;

        let slot = state.slot_of(player)?;
        let match_started = state.set_ships(slot, ships)?;

        debug!("Match {}: fleet placed by {:?}", match_id.short(), slot);
        if match_started {
            info!("Match {} active", match_id.short());
        }

        Ok(ShipPlacement {
            slot,
            opponent: players[slot.other().index()],
            match_started,
        })
    }

    /// Give the first turn to slot one.
    pub async fn start_turns(&self, match_id: &MatchId) -> Result<TurnAssignment, MatchError> {
        let (players, state) = self.live(match_id).await?;
        let turn = state.lock().await.start_turns()?;
        TurnAssignment::from_turn(*match_id, players, turn).ok_or(MatchError::MatchNotActive)
    }

    /// Resolve a throw and advance the turn in one step.
    pub async fn throw_bomb(
        &self,
        match_id: &MatchId,
        player: &SessionToken,
        coordinate: Coordinate,
    ) -> Result<BombOutcome, MatchError> {
        let (players, state) = self.live(match_id).await?;
        let mut state = state.lock().await;

        let slot = state.slot_of(player)?;
        let result = state.throw_bomb(slot, coordinate)?;

        debug!(
            "Match {}: {:?} bombed ({}, {}) hit={} sunk={}",
            match_id.short(), slot, coordinate.x(), coordinate.y(), result.has_hit, result.has_sunk
        );

        Ok(Self::outcome(*match_id, players, result))
    }

    fn outcome(match_id: MatchId, players: [SessionToken; 2], result: BombResult) -> BombOutcome {
        BombOutcome {
            result,
            thrower: players[result.thrower.index()],
            opponent: players[result.thrower.other().index()],
            next_turn: TurnAssignment::from_turn(match_id, players, result.turn),
        }
    }

    /// Live match containing `player`, if any.
    pub async fn get_match(&self, player: &SessionToken) -> Option<MatchId> {
        let matches = self.matches.read().await;
        matches
            .iter()
            .find(|(_, m)| m.players.contains(player))
            .map(|(id, _)| *id)
    }

    /// Participants and phase of a live match.
    pub async fn participants(&self, match_id: &MatchId) -> Option<Participants> {
        let (players, state) = self.live(match_id).await.ok()?;
        let phase = state.lock().await.phase;
        Some(Participants { players, phase })
    }

    /// Number of live matches.
    pub async fn match_count(&self) -> usize {
        self.matches.read().await.len()
    }

    /// Apply the timeout policy if turn `armed_number` is still running.
    pub async fn expire_turn(
        &self,
        match_id: &MatchId,
        armed_number: u32,
        policy: TurnTimeoutPolicy,
    ) -> Result<TurnExpiry, MatchError> {
        let (players, state) = self.live(match_id).await?;
        let mut state = state.lock().await;

        let stalled = match state.current_player() {
            Some(slot) if state.phase == MatchPhase::Active && state.turn_number() == armed_number => slot,
            _ => return Ok(TurnExpiry::Stale),
        };

        debug!("Match {}: turn {} expired ({:?})", match_id.short(), armed_number, policy);

        let expiry = match policy {
            TurnTimeoutPolicy::Pass => Self::pass(*match_id, players, &mut state),
            TurnTimeoutPolicy::Forfeit => {
                // Freeze the board until settlement marks the match finished
                if let Some(turn) = state.turn.as_mut() {
                    turn.current = None;
                }
                TurnExpiry::Forfeit {
                    winner: players[stalled.other().index()],
                    loser: players[stalled.index()],
                }
            }
            TurnTimeoutPolicy::RandomBomb => {
                let target = state.random_unthrown(stalled, &mut rand::thread_rng());
                match target {
                    Some(coordinate) => {
                        let result = state.throw_bomb(stalled, coordinate)?;
                        TurnExpiry::AutoBomb(Self::outcome(*match_id, players, result))
                    }
                    None => Self::pass(*match_id, players, &mut state),
                }
            }
        };

        Ok(expiry)
    }

    fn pass(match_id: MatchId, players: [SessionToken; 2], state: &mut MatchState) -> TurnExpiry {
        state
            .pass_turn()
            .and_then(|turn| TurnAssignment::from_turn(match_id, players, turn))
            .map(TurnExpiry::Passed)
            .unwrap_or(TurnExpiry::Stale)
    }

    /// Drop a match that has not started, without touching ratings.
    /// Returns its participants.
    pub async fn abandon(&self, match_id: &MatchId) -> Result<[SessionToken; 2], MatchError> {
        let (players, state) = self.live(match_id).await?;
        {
            let mut state = state.lock().await;
            if state.phase == MatchPhase::Active {
                return Err(MatchError::MatchAlreadyStarted);
            }
            state.mark_finished()?;
        }
        self.matches.write().await.remove(match_id);

        info!("Match {} abandoned", match_id.short());
        Ok(players)
    }

    /// Settle a match: persist the record and both new ratings.
    ///
    /// Once the match has been marked finished it is removed from the live
    /// set whether or not persistence succeeds. A record that was written
    /// before a later failure stays written.
    pub async fn end_match(
        &self,
        match_id: &MatchId,
        winner: &SessionToken,
        loser: &SessionToken,
    ) -> Result<Settlement, MatchError> {
        let (_, state) = self.live(match_id).await?;

        let (turns, winner_bombs, loser_bombs) = {
            let mut state = state.lock().await;
            let winner_slot = state.slot_of(winner)?;
            let loser_slot = state.slot_of(loser)?;
            if winner_slot == loser_slot {
                return Err(MatchError::InvalidPlayer);
            }
            state.mark_finished()?;
            (
                state.turn_number(),
                state.player(winner_slot).throw_order.clone(),
                state.player(loser_slot).throw_order.clone(),
            )
        };

        let result = self.settle(winner, loser, turns, winner_bombs, loser_bombs).await;
        self.matches.write().await.remove(match_id);

        match &result {
            Ok(settlement) => info!(
                "Match {} settled: winner {} -> {}, loser {} -> {}",
                match_id.short(), winner.short(), settlement.winner_rating,
                loser.short(), settlement.loser_rating
            ),
            Err(e) => error!("Match {} settlement failed, needs reconciliation: {}", match_id.short(), e),
        }

        result
    }

    async fn settle(
        &self,
        winner: &SessionToken,
        loser: &SessionToken,
        turns: u32,
        winner_bombs: Vec<Coordinate>,
        loser_bombs: Vec<Coordinate>,
    ) -> Result<Settlement, MatchError> {
        let winner_id = self.sessions.validate(winner).await.map_err(|_| MatchError::InvalidPlayer)?;
        let loser_id = self.sessions.validate(loser).await.map_err(|_| MatchError::InvalidPlayer)?;

        let winner_account = self.store.get_account_by_id(&winner_id).await?;
        let loser_account = self.store.get_account_by_id(&loser_id).await?;

        let record = MatchRecord {
            turns,
            winner: RecordSide { id: winner_id, bombs_thrown: winner_bombs },
            loser: RecordSide { id: loser_id, bombs_thrown: loser_bombs },
            timestamp: chrono::Utc::now(),
        };
        let record_id = self.store.record_match_result(&record).await?;

        let (winner_rating, loser_rating) = rating::settle(winner_account.rating, loser_account.rating);
        if let Err(e) = self.store.update_rating(&winner_id, winner_rating).await {
            warn!("Rating update for {} failed after record {} was written", winner_id.short(), record_id.short());
            return Err(e.into());
        }
        if let Err(e) = self.store.update_rating(&loser_id, loser_rating).await {
            warn!("Rating update for {} failed after record {} was written", loser_id.short(), record_id.short());
            return Err(e.into());
        }

        Ok(Settlement { winner_rating, loser_rating, record_id, record })
    }
}

// =============================================================================
// TESTS
// =============================================================================
