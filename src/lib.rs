//! # BatNav Match Server
//!
//! Ranked naval-battle match server: session validation, skill-based
//! pairing, the per-match state machine and settlement of ratings.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     BATNAV SERVER                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Identifiers and pure functions            │
//! │  ├── ids.rs      - UUID newtypes (tokens, accounts, matches) │
//! │  └── rating.rs   - Elo rating function                       │
//! │                                                              │
//! │  game/           - Match logic                               │
//! │  ├── board.rs    - Coordinates and ships                     │
//! │  ├── state.rs    - Per-match state machine                   │
//! │  └── engine.rs   - Live matches, turn expiry, settlement     │
//! │                                                              │
//! │  network/        - Sessions and transport                    │
//! │  ├── auth.rs     - Session registry                          │
//! │  ├── pairing.rs  - Rating-based pairing queue                │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── gateway.rs  - Event routing and turn clock              │
//! │  └── server.rs   - WebSocket server                          │
//! │                                                              │
//! │  store/          - Account store seam                        │
//! │  └── memory.rs   - In-memory implementation                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//!
//! The engine owns every match and the pairing queue owns every waiting
//! searcher. The gateway only maps session tokens to live connections, so
//! a dropped connection can never corrupt match state.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use crate::core::ids::{AccountId, MatchId, RecordId, SessionToken};
pub use crate::core::rating::{Rating, DEFAULT_RATING};
pub use crate::game::board::{Coordinate, Ship};
pub use crate::game::engine::{MatchEngine, TurnTimeoutPolicy};
pub use crate::game::state::{MatchError, MatchPhase, MatchState, PlayerSlot};
pub use crate::network::{Gateway, GameServer};
pub use crate::store::{AccountStore, MemoryAccountStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default listening port
pub const DEFAULT_PORT: u16 = 8080;

/// Seconds a player has to throw before the turn clock expires
pub const TURN_TIMEOUT_SECS: u64 = 45;
