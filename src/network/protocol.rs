//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON text message of the form
//! `{"event": "<kebab-case-name>", "data": {...}}` with camelCase fields.

use serde::{Serialize, Deserialize};

use crate::core::ids::{MatchId, SessionToken};
use crate::core::rating::Rating;
use crate::game::board::{Coordinate, Ship};
use crate::store::{Account, MatchRecord};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Bind this connection to a session.
    Authenticate(TokenRequest),

    /// Start searching for a ranked opponent.
    JoinRankedQueue(TokenRequest),

    /// Stop searching.
    LeaveRankedQueue(TokenRequest),

    /// Submit a fleet.
    MatchSetShips(SetShipsRequest),

    /// Throw a bomb.
    MatchThrowBomb(ThrowBombRequest),

    /// Ping for latency measurement.
    Ping(PingRequest),
}

/// Payload carrying only a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    /// Session token issued at login.
    pub token: SessionToken,
}

/// Fleet submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetShipsRequest {
    /// Target match.
    pub match_id: MatchId,
    /// Submitting player's session token.
    pub player_id: SessionToken,
    /// One cell list per ship.
    pub coordinates: Vec<Ship>,
}

/// Bomb throw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrowBombRequest {
    /// Target match.
    pub match_id: MatchId,
    /// Throwing player's session token.
    pub player_id: SessionToken,
    /// Target cell.
    pub coordinates: Coordinate,
}

/// Latency probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRequest {
    /// Client timestamp, echoed back.
    pub timestamp: u64,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Authentication result.
    Authentication(AuthenticationResult),

    /// Queue and pairing result.
    Match(MatchResponse),

    /// Fleet placement acknowledgment (to the submitter).
    MatchShipsSet(ShipsSetInfo),

    /// The opponent placed their fleet.
    MatchShipsReceive(MatchRef),

    /// Both fleets placed, turns begin.
    MatchStart(MatchRef),

    /// Result of the recipient's own throw.
    MatchBombThrown(BombThrownInfo),

    /// The opponent threw at the recipient's board.
    MatchBombReceive(BombReceiveInfo),

    /// Turn (re)assignment.
    MatchTurn(TurnInfo),

    /// Match settled or ended.
    MatchEnd(MatchEndInfo),

    /// Presence broadcast.
    UserConnection(UserConnection),

    /// Pong response.
    Pong(PongInfo),

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown(ShutdownInfo),
}

/// Authentication result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Public profile on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,
    /// Reason on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Queue and pairing result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResponse {
    /// Whether a match was joined.
    pub success: bool,
    /// Joined match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<MatchId>,
    /// Opponent's public profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opponent: Option<Account>,
    /// Whether the client should search again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<bool>,
    /// Human-readable status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MatchResponse {
    /// A joined match.
    pub fn joined(match_id: MatchId, opponent: Account) -> Self {
        Self {
            success: true,
            match_id: Some(match_id),
            opponent: Some(opponent),
            retry: None,
            message: None,
        }
    }

    /// No match; `retry` tells the client whether to queue again.
    pub fn failed(retry: bool, message: impl Into<String>) -> Self {
        Self {
            success: false,
            match_id: None,
            opponent: None,
            retry: Some(retry),
            message: Some(message.into()),
        }
    }
}

/// Reference to a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRef {
    /// Match id.
    pub match_id: MatchId,
}

/// Fleet placement acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipsSetInfo {
    /// Match id.
    pub match_id: MatchId,
    /// Whether the fleet was accepted.
    pub success: bool,
    /// Reason on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of the recipient's own throw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BombThrownInfo {
    /// Match id.
    pub match_id: MatchId,
    /// Whether the throw was accepted.
    pub success: bool,
    /// Target cell.
    pub coordinates: Coordinate,
    /// A ship occupies the cell.
    #[serde(default)]
    pub has_hit: bool,
    /// That ship is now sunk.
    #[serde(default)]
    pub has_sunk: bool,
    /// Opponent ships sunk so far.
    #[serde(default)]
    pub sunk_count: u8,
    /// Reason on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A throw against the recipient's board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BombReceiveInfo {
    /// Match id.
    pub match_id: MatchId,
    /// Target cell.
    pub coordinates: Coordinate,
    /// A ship occupies the cell.
    pub has_hit: bool,
    /// That ship is now sunk.
    pub has_sunk: bool,
}

/// Turn (re)assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInfo {
    /// Match id.
    pub match_id: MatchId,
    /// Whether the recipient should throw.
    pub is_your_turn: bool,
    /// Turn counter.
    pub turn_number: u32,
}

/// Why a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    /// A fleet was sunk.
    Victory,
    /// A player let the turn clock run out.
    Timeout,
    /// A player disconnected mid-match.
    Disconnect,
    /// A player disconnected before both fleets were placed.
    Abandoned,
}

/// Match end notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEndInfo {
    /// Match id.
    pub match_id: MatchId,
    /// Whether settlement succeeded.
    pub success: bool,
    /// Whether the recipient won.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win: Option<bool>,
    /// Recipient's rating after settlement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_rating: Option<Rating>,
    /// Persisted record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_record: Option<MatchRecord>,
    /// Why the match ended.
    pub reason: EndReason,
    /// Detail on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Presence broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConnection {
    /// Name of the player who came online.
    pub username: String,
}

/// Pong response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongInfo {
    /// Echoed client timestamp.
    pub timestamp: u64,
    /// Server wall clock in milliseconds.
    pub server_time: u64,
}

/// Shutdown notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownInfo {
    /// Why the server is going away.
    pub reason: String,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Not authenticated.
    NotAuthenticated,
    /// Payload token differs from the connection's session.
    SessionMismatch,
    /// Invalid input.
    InvalidInput,
    /// Already searching.
    AlreadyQueued,
    /// Already in a live match.
    AlreadyInMatch,
    /// Connection limit reached.
    ServerOverloaded,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Build an `error` event.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError { code, message: message.into() })
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_authenticate() {
        let token = SessionToken::new_v4();
        let raw = json!({ "event": "authenticate", "data": { "token": token.to_string() } }).to_string();

        let msg = ClientMessage::from_json(&raw).unwrap();
        assert_eq!(msg, ClientMessage::Authenticate(TokenRequest { token }));
    }

    #[test]
    fn test_parse_set_ships() {
        let match_id = MatchId::new_v4();
        let player = SessionToken::new_v4();
        let raw = json!({
            "event": "match-set-ships",
            "data": {
                "matchId": match_id.to_string(),
                "playerId": player.to_string(),
                "coordinates": [[[0, 0], [1, 0]], [[5, 5]]],
            }
        })
        .to_string();

        match ClientMessage::from_json(&raw).unwrap() {
            ClientMessage::MatchSetShips(req) => {
                assert_eq!(req.match_id, match_id);
                assert_eq!(req.player_id, player);
                assert_eq!(req.coordinates.len(), 2);
                assert!(req.coordinates[0].occupies(&Coordinate(1, 0)));
            }
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_parse_throw_bomb() {
        let raw = json!({
            "event": "match-throw-bomb",
            "data": {
                "matchId": MatchId::new_v4().to_string(),
                "playerId": SessionToken::new_v4().to_string(),
                "coordinates": [3, 4],
            }
        })
        .to_string();

        match ClientMessage::from_json(&raw).unwrap() {
            ClientMessage::MatchThrowBomb(req) => assert_eq!(req.coordinates, Coordinate(3, 4)),
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_rejected() {
        let raw = json!({ "event": "teleport", "data": {} }).to_string();
        assert!(ClientMessage::from_json(&raw).is_err());
    }

    #[test]
    fn test_turn_wire_shape() {
        let match_id = MatchId::from_bytes([7; 16]);
        let msg = ServerMessage::MatchTurn(TurnInfo { match_id, is_your_turn: true, turn_number: 3 });

        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "match-turn");
        assert_eq!(value["data"]["isYourTurn"], true);
        assert_eq!(value["data"]["turnNumber"], 3);
        assert_eq!(value["data"]["matchId"], match_id.to_string());
    }

    #[test]
    fn test_failed_match_omits_empty_fields() {
        let msg = ServerMessage::Match(MatchResponse::failed(false, "Left the queue"));
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["data"], json!({ "success": false, "retry": false, "message": "Left the queue" }));
    }

    #[test]
    fn test_error_code_serialization() {
        let msg = ServerMessage::error(ErrorCode::NotAuthenticated, "Must authenticate first");
        let json = msg.to_json().unwrap();
        assert!(json.contains("not_authenticated"));
        assert!(json.contains("\"event\":\"error\""));
    }

    #[test]
    fn test_match_end_reason_is_kebab() {
        let msg = ServerMessage::MatchEnd(MatchEndInfo {
            match_id: MatchId::new_v4(),
            success: true,
            win: Some(true),
            new_rating: Some(1030),
            match_record: None,
            reason: EndReason::Victory,
            message: None,
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "match-end");
        assert_eq!(value["data"]["reason"], "victory");
        assert_eq!(value["data"]["newRating"], 1030);
    }
}
