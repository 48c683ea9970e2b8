//! Match State
//!
//! The authoritative per-match state machine:
//! `AwaitingShips -> Active -> Finished`.
//!
//! Everything here is synchronous and lock-free; the engine wraps each
//! `MatchState` in its own mutex so that a turn check and the mutation it
//! guards are one atomic step.

use std::collections::BTreeSet;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::core::ids::{MatchId, SessionToken};
use crate::game::board::{Coordinate, Ship, SHIPS_PER_FLEET};

// =============================================================================
// SLOTS & PHASES
// =============================================================================

/// One of the two fixed player positions in a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlayerSlot {
    /// Creator of the match; throws first.
    One,
    /// The other side.
    Two,
}

impl PlayerSlot {
    /// Both slots, in order.
    pub const BOTH: [PlayerSlot; 2] = [PlayerSlot::One, PlayerSlot::Two];

    /// Array index of this slot.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            PlayerSlot::One => 0,
            PlayerSlot::Two => 1,
        }
    }

    /// The opposing slot.
    #[inline]
    pub fn other(self) -> PlayerSlot {
        match self {
            PlayerSlot::One => PlayerSlot::Two,
            PlayerSlot::Two => PlayerSlot::One,
        }
    }
}

/// Lifecycle phase of a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchPhase {
    /// Waiting for one or both fleets.
    AwaitingShips,
    /// Both fleets placed, turns running.
    Active,
    /// Settlement started; no further moves accepted.
    Finished,
}

/// Turn bookkeeping. `None` on the match until both fleets are placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnState {
    /// Slot allowed to throw, if any.
    pub current: Option<PlayerSlot>,
    /// Monotonic turn counter. Timers compare against it to detect staleness.
    pub number: u32,
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// One side of a match.
#[derive(Clone, Debug)]
pub struct PlayerState {
    /// Session token identifying the player.
    pub session: SessionToken,
    /// Placed fleet (empty until `set_ships`).
    pub ships: Vec<Ship>,
    /// Every coordinate this player has bombed.
    pub thrown: BTreeSet<Coordinate>,
    /// Same coordinates in throw order, for the match record.
    pub throw_order: Vec<Coordinate>,
    /// How many of this player's ships the opponent has sunk.
    pub sunk_count: u8,
}

impl PlayerState {
    fn new(session: SessionToken) -> Self {
        Self {
            session,
            ships: Vec::new(),
            thrown: BTreeSet::new(),
            throw_order: Vec::new(),
            sunk_count: 0,
        }
    }

    /// Whether a fleet has been placed.
    pub fn has_ships(&self) -> bool {
        !self.ships.is_empty()
    }

    /// Whether every ship of this player has been sunk.
    pub fn fleet_sunk(&self) -> bool {
        self.sunk_count as usize >= SHIPS_PER_FLEET
    }
}

// =============================================================================
// RESULTS & ERRORS
// =============================================================================

/// Outcome of a resolved bomb, computed under the match lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BombResult {
    /// Slot that threw.
    pub thrower: PlayerSlot,
    /// Target cell.
    pub coordinate: Coordinate,
    /// A ship occupies the cell.
    pub has_hit: bool,
    /// That ship is now fully hit.
    pub has_sunk: bool,
    /// Opponent's sunk count after this throw.
    pub opponent_sunk: u8,
    /// Opponent's whole fleet is gone.
    pub winning: bool,
    /// Turn state after the throw.
    pub turn: TurnState,
}

/// Match errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    /// No live match with this id.
    #[error("Match not found")]
    MatchNotFound,

    /// Player is in neither slot.
    #[error("Player is not part of this match")]
    PlayerNotInMatch,

    /// Fleet has the wrong number of ships.
    #[error("Expected {expected} ships, got {got}")]
    InvalidShipCount {
        /// Required ships.
        expected: usize,
        /// Submitted non-empty groups.
        got: usize,
    },

    /// A ship group has no cells.
    #[error("Ship {index} has no cells")]
    EmptyShip {
        /// Position of the group in the submission.
        index: usize,
    },

    /// Fleets can no longer be changed.
    #[error("Match already started")]
    MatchAlreadyStarted,

    /// Turns cannot start before both fleets are placed.
    #[error("Match is not active")]
    MatchNotActive,

    /// Throw out of turn.
    #[error("Not your turn")]
    NotYourTurn,

    /// Coordinate already in the thrower's history.
    #[error("Coordinate already thrown")]
    AlreadyThrown,

    /// Settlement already started for this match.
    #[error("Match already settled")]
    AlreadySettled,

    /// A participant's session no longer resolves to an account.
    #[error("Invalid player")]
    InvalidPlayer,

    /// Account store has no such account.
    #[error("Account not found")]
    AccountNotFound,

    /// Account store write failed.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// Board and turn state of one match.
#[derive(Clone, Debug)]
pub struct MatchState {
    /// Match identifier.
    pub id: MatchId,
    /// Lifecycle phase.
    pub phase: MatchPhase,
    /// Turn state (`None` until both fleets are placed).
    pub turn: Option<TurnState>,
    players: [PlayerState; 2],
}

impl MatchState {
    /// New match awaiting both fleets.
    pub fn new(id: MatchId, player1: SessionToken, player2: SessionToken) -> Self {
        Self {
            id,
            phase: MatchPhase::AwaitingShips,
            turn: None,
            players: [PlayerState::new(player1), PlayerState::new(player2)],
        }
    }

    /// Resolve a session token to its slot.
    pub fn slot_of(&self, player: &SessionToken) -> Result<PlayerSlot, MatchError> {
        PlayerSlot::BOTH
            .into_iter()
            .find(|slot| self.players[slot.index()].session == *player)
            .ok_or(MatchError::PlayerNotInMatch)
    }

    /// State of one side.
    pub fn player(&self, slot: PlayerSlot) -> &PlayerState {
        &self.players[slot.index()]
    }

    /// Session token in `slot`.
    pub fn session(&self, slot: PlayerSlot) -> SessionToken {
        self.players[slot.index()].session
    }

    /// Current turn number (0 before turns start).
    pub fn turn_number(&self) -> u32 {
        self.turn.map(|t| t.number).unwrap_or(0)
    }

    /// Slot whose turn it is, if any.
    pub fn current_player(&self) -> Option<PlayerSlot> {
        self.turn.and_then(|t| t.current)
    }

    /// Place a fleet. Returns `true` when this placement activated the match.
    pub fn set_ships(&mut self, slot: PlayerSlot, ships: Vec<Ship>) -> Result<bool, MatchError> {
        if self.phase != MatchPhase::AwaitingShips {
            return Err(MatchError::MatchAlreadyStarted);
        }

        if ships.len() != SHIPS_PER_FLEET {
            return Err(MatchError::InvalidShipCount { expected: SHIPS_PER_FLEET, got: ships.len() });
        }
        if let Some(index) = ships.iter().position(Ship::is_empty) {
            return Err(MatchError::EmptyShip { index });
        }

        self.players[slot.index()].ships = ships;

        if self.players.iter().all(PlayerState::has_ships) {
            self.phase = MatchPhase::Active;
            self.turn = Some(TurnState { current: None, number: 0 });
            return Ok(true);
        }

        Ok(false)
    }

    /// Hand the first turn to slot one. Idempotent once turns are running.
    pub fn start_turns(&mut self) -> Result<TurnState, MatchError> {
        if self.phase != MatchPhase::Active {
            return Err(MatchError::MatchNotActive);
        }

        let turn = self.turn.get_or_insert(TurnState { current: None, number: 0 });
        if turn.number == 0 {
            *turn = TurnState { current: Some(PlayerSlot::One), number: 1 };
        }
        Ok(*turn)
    }

    /// Give the turn to the other slot.
    pub fn pass_turn(&mut self) -> Option<TurnState> {
        if self.phase != MatchPhase::Active {
            return None;
        }
        let turn = self.turn.as_mut()?;
        let current = turn.current?;
        turn.current = Some(current.other());
        turn.number += 1;
        Some(*turn)
    }

    /// Resolve a bomb thrown by `slot` at `coordinate`.
    ///
    /// On success the turn moves to the opponent, or to nobody if the throw
    /// sank the last ship.
    pub fn throw_bomb(&mut self, slot: PlayerSlot, coordinate: Coordinate) -> Result<BombResult, MatchError> {
        if self.phase != MatchPhase::Active || self.current_player() != Some(slot) {
            return Err(MatchError::NotYourTurn);
        }
        if self.players[slot.index()].thrown.contains(&coordinate) {
            return Err(MatchError::AlreadyThrown);
        }

        let opponent = slot.other();
        {
            let thrower = &mut self.players[slot.index()];
            thrower.thrown.insert(coordinate);
            thrower.throw_order.push(coordinate);
        }

        let thrown = &self.players[slot.index()].thrown;
        let (has_hit, has_sunk) = self.players[opponent.index()]
            .ships
            .iter()
            .find(|ship| ship.occupies(&coordinate))
            .map(|ship| (true, ship.is_sunk_by(thrown)))
            .unwrap_or((false, false));

        let target = &mut self.players[opponent.index()];
        if has_sunk {
            target.sunk_count = (target.sunk_count + 1).min(SHIPS_PER_FLEET as u8);
        }
        let opponent_sunk = target.sunk_count;
        let winning = target.fleet_sunk();

        let turn = self.turn.get_or_insert(TurnState { current: None, number: 0 });
        if winning {
            turn.current = None;
        } else {
            turn.current = Some(opponent);
            turn.number += 1;
        }

        Ok(BombResult {
            thrower: slot,
            coordinate,
            has_hit,
            has_sunk,
            opponent_sunk,
            winning,
            turn: *turn,
        })
    }

    /// A random on-board cell `slot` has not bombed yet.
    pub fn random_unthrown<R: Rng + ?Sized>(&self, slot: PlayerSlot, rng: &mut R) -> Option<Coordinate> {
        let thrown = &self.players[slot.index()].thrown;
        let open: Vec<Coordinate> = Coordinate::all().filter(|c| !thrown.contains(c)).collect();
        open.choose(rng).copied()
    }

    /// Stop accepting moves. Fails if settlement already began.
    pub fn mark_finished(&mut self) -> Result<(), MatchError> {
        if self.phase == MatchPhase::Finished {
            return Err(MatchError::AlreadySettled);
        }
        self.phase = MatchPhase::Finished;
        if let Some(turn) = self.turn.as_mut() {
            turn.current = None;
        }
        Ok(())
    }
}
