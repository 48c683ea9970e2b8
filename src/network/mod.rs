//! Network Layer
//!
//! Sessions, pairing and the WebSocket transport.
//! All match rules live in `game/`; this layer only routes events.

pub mod auth;
pub mod gateway;
pub mod pairing;
pub mod protocol;
pub mod server;

pub use auth::{AuthConfig, AuthError, SessionRegistry};
pub use gateway::{Gateway, GatewayConfig, TurnConfig};
pub use pairing::{MatchHandoff, PairingConfig, PairingError, PairingQueue, PairingResult};
pub use protocol::{ClientMessage, ErrorCode, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
