//! Game Logic Module
//!
//! Board rules and the match lifecycle.
//!
//! ## Module Structure
//!
//! - `board`: Coordinates, ships and fleet size
//! - `state`: Single-match state machine (placement, turns, bombs)
//! - `engine`: Concurrent live-match collection and settlement

pub mod board;
pub mod engine;
pub mod state;

// Re-export key types
pub use board::{Coordinate, Ship, BOARD_SIZE, SHIPS_PER_FLEET};
pub use engine::{BombOutcome, MatchEngine, Settlement, TurnAssignment, TurnExpiry, TurnTimeoutPolicy};
pub use state::{BombResult, MatchError, MatchPhase, MatchState, PlayerSlot, PlayerState, TurnState};
