//! Connection Gateway
//!
//! Adapts client events to the session registry, pairing queue and match
//! engine, and fans results out to the right connections. The gateway holds
//! no game state of its own: only which connection currently speaks for
//! which session token.
//!
//! Transport-agnostic. The WebSocket server feeds it decoded messages and
//! hands it one `mpsc::Sender<ServerMessage>` per connection; tests do the
//! same with plain channels.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::core::ids::{MatchId, SessionToken};
use crate::core::rating::Rating;
use crate::game::engine::{BombOutcome, MatchEngine, TurnAssignment, TurnExpiry, TurnTimeoutPolicy};
use crate::game::state::MatchError;
use crate::network::auth::SessionRegistry;
use crate::network::pairing::{MatchHandoff, PairingError, PairingQueue, PairingResult};
use crate::network::protocol::{
    AuthenticationResult, BombReceiveInfo, BombThrownInfo, ClientMessage, EndReason, ErrorCode,
    MatchEndInfo, MatchRef, MatchResponse, PongInfo, ServerMessage, SetShipsRequest, ShipsSetInfo,
    ThrowBombRequest, TurnInfo, UserConnection, unix_millis,
};
use crate::store::{Account, AccountStore};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Turn clock configuration.
#[derive(Clone, Debug)]
pub struct TurnConfig {
    /// Time a player has to throw.
    pub timeout: Duration,
    /// What happens when it runs out.
    pub policy: TurnTimeoutPolicy,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::TURN_TIMEOUT_SECS),
            policy: TurnTimeoutPolicy::Pass,
        }
    }
}

/// Gateway configuration.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// How long the non-creating side waits for the match id.
    pub handoff_timeout: Duration,
    /// Turn clock.
    pub turn: TurnConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            handoff_timeout: Duration::from_secs(10),
            turn: TurnConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let policy = match std::env::var("BATNAV_TURN_TIMEOUT_POLICY") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("{}; using {:?}", e, defaults.turn.policy);
                defaults.turn.policy
            }),
            Err(_) => defaults.turn.policy,
        };

        Self {
            handoff_timeout: std::env::var("BATNAV_HANDOFF_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.handoff_timeout),
            turn: TurnConfig {
                timeout: std::env::var("BATNAV_TURN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.turn.timeout),
                policy,
            },
        }
    }
}

// =============================================================================
// GATEWAY
// =============================================================================

/// Connected client state.
struct ConnectedClient {
    /// Session bound by `authenticate`.
    token: Option<SessionToken>,
    /// Outbound queue of this connection.
    sender: mpsc::Sender<ServerMessage>,
}

/// Armed turn clock.
#[derive(Debug, Clone, Copy)]
struct TurnTimeout {
    match_id: MatchId,
    number: u32,
}

/// Routes client events and pushes match events.
pub struct Gateway {
    config: GatewayConfig,
    sessions: Arc<SessionRegistry>,
    store: Arc<dyn AccountStore>,
    pairing: Arc<PairingQueue>,
    engine: Arc<MatchEngine>,
    /// Every open connection.
    clients: RwLock<BTreeMap<SocketAddr, ConnectedClient>>,
    /// Session token -> connection currently speaking for it.
    presence: RwLock<BTreeMap<SessionToken, (SocketAddr, mpsc::Sender<ServerMessage>)>>,
    /// Tokens with a search running, from queue entry until the match reply.
    searching: Mutex<BTreeSet<SessionToken>>,
    /// Fired turn clocks, drained by the expiry task.
    timer_tx: mpsc::UnboundedSender<TurnTimeout>,
}

impl Gateway {
    /// Create a gateway and start its turn-expiry task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: GatewayConfig,
        sessions: Arc<SessionRegistry>,
        store: Arc<dyn AccountStore>,
        pairing: Arc<PairingQueue>,
        engine: Arc<MatchEngine>,
    ) -> Arc<Self> {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(Self {
            config,
            sessions,
            store,
            pairing,
            engine,
            clients: RwLock::new(BTreeMap::new()),
            presence: RwLock::new(BTreeMap::new()),
            searching: Mutex::new(BTreeSet::new()),
            timer_tx,
        });

        tokio::spawn(Self::run_turn_expiry(Arc::downgrade(&gateway), timer_rx));
        gateway
    }

    /// Session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Pairing queue.
    pub fn pairing(&self) -> &Arc<PairingQueue> {
        &self.pairing
    }

    /// Match engine.
    pub fn engine(&self) -> &Arc<MatchEngine> {
        &self.engine
    }

    /// Register a new connection.
    pub async fn connect(&self, addr: SocketAddr, sender: mpsc::Sender<ServerMessage>) {
        self.clients.write().await.insert(addr, ConnectedClient {
            token: None,
            sender,
        });
        debug!("Client {} connected", addr);
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether `token` is bound to a live connection.
    pub async fn is_bound(&self, token: &SessionToken) -> bool {
        self.presence.read().await.contains_key(token)
    }

    async fn send_to(&self, token: &SessionToken, msg: ServerMessage) {
        let sender = self.presence.read().await.get(token).map(|(_, s)| s.clone());
        match sender {
            Some(sender) => {
                if sender.send(msg).await.is_err() {
                    debug!("Connection for {} already closed", token.short());
                }
            }
            None => debug!("No connection bound for {}", token.short()),
        }
    }

    /// Handle one inbound message.
    pub async fn handle_message(self: &Arc<Self>, addr: SocketAddr, msg: ClientMessage) {
        let (bound, sender) = {
            let clients = self.clients.read().await;
            match clients.get(&addr) {
                Some(client) => (client.token, client.sender.clone()),
                None => {
                    warn!("Message from unknown connection {}", addr);
                    return;
                }
            }
        };

        match msg {
            ClientMessage::Authenticate(req) => {
                self.handle_authenticate(addr, req.token, &sender).await;
            }
            ClientMessage::JoinRankedQueue(req) => {
                if self.require_session(bound, &req.token, &sender).await {
                    self.handle_join(req.token, &sender).await;
                }
            }
            ClientMessage::LeaveRankedQueue(req) => {
                if self.require_session(bound, &req.token, &sender).await {
                    self.pairing.leave(&req.token).await;
                    let _ = sender
                        .send(ServerMessage::Match(MatchResponse::failed(false, "Left the ranked queue")))
                        .await;
                }
            }
            ClientMessage::MatchSetShips(req) => {
                if self.require_session(bound, &req.player_id, &sender).await {
                    self.handle_set_ships(req, &sender).await;
                }
            }
            ClientMessage::MatchThrowBomb(req) => {
                if self.require_session(bound, &req.player_id, &sender).await {
                    self.handle_throw(req, &sender).await;
                }
            }
            ClientMessage::Ping(req) => {
                let _ = sender
                    .send(ServerMessage::Pong(PongInfo { timestamp: req.timestamp, server_time: unix_millis() }))
                    .await;
            }
        }
    }

    /// Check that the connection is bound to `claimed` and that the session is still live.
    async fn require_session(
        &self,
        bound: Option<SessionToken>,
        claimed: &SessionToken,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> bool {
        let rejection = match bound {
            None => Some(ServerMessage::error(ErrorCode::NotAuthenticated, "Must authenticate first")),
            Some(token) if token != *claimed => Some(ServerMessage::error(
                ErrorCode::SessionMismatch,
                "Token does not match this connection's session",
            )),
            Some(token) => match self.sessions.validate(&token).await {
                Ok(_) => None,
                Err(e) => Some(ServerMessage::error(ErrorCode::NotAuthenticated, e.to_string())),
            },
        };

        match rejection {
            Some(msg) => {
                let _ = sender.send(msg).await;
                false
            }
            None => true,
        }
    }

    // -------------------------------------------------------------------------
    // Authentication
    // -------------------------------------------------------------------------

    async fn handle_authenticate(
        &self,
        addr: SocketAddr,
        token: SessionToken,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let account = match self.profile(&token).await {
            Ok(account) => account,
            Err(reason) => {
                debug!("Client {} failed authentication: {}", addr, reason);
                let _ = sender
                    .send(ServerMessage::Authentication(AuthenticationResult {
                        success: false,
                        account: None,
                        error_message: Some(format!("Could not validate the session: {}", reason)),
                    }))
                    .await;
                return;
            }
        };

        {
            let mut clients = self.clients.write().await;
            match clients.get_mut(&addr) {
                Some(client) => client.token = Some(token),
                None => return,
            }
        }
        let previous = self.presence.write().await.insert(token, (addr, sender.clone()));
        if let Some((old_addr, _)) = previous.filter(|(old, _)| *old != addr) {
            debug!("Session {} moved from {} to {}", token.short(), old_addr, addr);
        }

        let username = account.username.clone();
        let _ = sender
            .send(ServerMessage::Authentication(AuthenticationResult {
                success: true,
                account: Some(account),
                error_message: None,
            }))
            .await;

        info!("Client {} authenticated as {}", addr, username);

        let online: Vec<_> = self.presence.read().await.values().map(|(_, s)| s.clone()).collect();
        for peer in online {
            let _ = peer
                .send(ServerMessage::UserConnection(UserConnection { username: username.clone() }))
                .await;
        }
    }

    /// Resolve a token to the public profile of its account.
    async fn profile(&self, token: &SessionToken) -> Result<Account, String> {
        let account_id = self.sessions.validate(token).await.map_err(|e| e.to_string())?;
        self.store.get_account_by_id(&account_id).await.map_err(|e| e.to_string())
    }

    // -------------------------------------------------------------------------
    // Ranked queue
    // -------------------------------------------------------------------------

    async fn handle_join(self: &Arc<Self>, token: SessionToken, sender: &mpsc::Sender<ServerMessage>) {
        let account = match self.profile(&token).await {
            Ok(account) => account,
            Err(reason) => {
                let _ = sender.send(ServerMessage::Match(MatchResponse::failed(false, reason))).await;
                return;
            }
        };

        if !self.searching.lock().await.insert(token) {
            let _ = sender
                .send(ServerMessage::error(ErrorCode::AlreadyQueued, "Already searching for a match"))
                .await;
            return;
        }
        // A finished search creates its match before leaving `searching`
        if self.engine.get_match(&token).await.is_some() {
            self.searching.lock().await.remove(&token);
            let _ = sender
                .send(ServerMessage::error(ErrorCode::AlreadyInMatch, "Already in a match"))
                .await;
            return;
        }

        let gateway = self.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            let reply = gateway.run_search(token, account.rating).await;
            gateway.searching.lock().await.remove(&token);
            if let Some(reply) = reply {
                let _ = sender.send(reply).await;
            }
        });
    }

    async fn run_search(&self, token: SessionToken, rating: Rating) -> Option<ServerMessage> {
        let paired = match self.pairing.search(token, rating).await {
            Ok(paired) => paired,
            Err(PairingError::AlreadyQueued) => {
                return Some(ServerMessage::error(ErrorCode::AlreadyQueued, "Already searching for a match"));
            }
            Err(PairingError::Cancelled) => return None,
        };

        Some(ServerMessage::Match(self.complete_pairing(token, paired).await))
    }

    async fn complete_pairing(&self, token: SessionToken, paired: PairingResult) -> MatchResponse {
        let opponent = paired.opponent;
        let opponent_profile = self.profile(&opponent).await;

        match paired.handoff {
            MatchHandoff::Create(tx) => {
                let opponent_account = match opponent_profile {
                    Ok(account) => account,
                    Err(reason) => {
                        // Dropping `tx` releases the other side
                        warn!("Opponent {} invalid: {}", opponent.short(), reason);
                        return MatchResponse::failed(true, "Opponent is no longer available");
                    }
                };
                if tx.is_closed() {
                    debug!("Opponent {} stopped waiting before match creation", opponent.short());
                    return MatchResponse::failed(true, "Opponent is no longer available");
                }

                let match_id = self.engine.create(token, opponent).await;

                // A disconnect that ran before `create` could not see the match
                if !self.is_bound(&token).await {
                    let _ = self.engine.abandon(&match_id).await;
                    return MatchResponse::failed(true, "Connection closed while pairing");
                }
                if tx.send(match_id).is_err() {
                    warn!("Opponent {} stopped waiting for match {}", opponent.short(), match_id.short());
                    let _ = self.engine.abandon(&match_id).await;
                    return MatchResponse::failed(true, "Opponent is no longer available");
                }
                MatchResponse::joined(match_id, opponent_account)
            }
            MatchHandoff::Await(rx) => {
                let match_id = match tokio::time::timeout(self.config.handoff_timeout, rx).await {
                    Ok(Ok(match_id)) => match_id,
                    Ok(Err(_)) => return MatchResponse::failed(true, "Opponent is no longer available"),
                    Err(_) => {
                        warn!("Handoff from {} timed out", opponent.short());
                        return MatchResponse::failed(true, "Timed out waiting for the match");
                    }
                };

                match opponent_profile {
                    Ok(account) if self.is_bound(&token).await => MatchResponse::joined(match_id, account),
                    _ => {
                        if self.engine.abandon(&match_id).await.is_ok() {
                            self.notify_abandoned(&opponent, match_id).await;
                        }
                        MatchResponse::failed(true, "Opponent is no longer available")
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Match actions
    // -------------------------------------------------------------------------

    async fn handle_set_ships(&self, req: SetShipsRequest, sender: &mpsc::Sender<ServerMessage>) {
        let match_id = req.match_id;
        let placement = match self.engine.set_ships(&match_id, &req.player_id, req.coordinates).await {
            Ok(placement) => placement,
            Err(e) => {
                debug!("Ship placement rejected for {}: {}", req.player_id.short(), e);
                let _ = sender
                    .send(ServerMessage::MatchShipsSet(ShipsSetInfo {
                        match_id,
                        success: false,
                        message: Some(e.to_string()),
                    }))
                    .await;
                return;
            }
        };

        let _ = sender
            .send(ServerMessage::MatchShipsSet(ShipsSetInfo { match_id, success: true, message: None }))
            .await;
        self.send_to(&placement.opponent, ServerMessage::MatchShipsReceive(MatchRef { match_id }))
            .await;

        if placement.match_started {
            self.send_to(&req.player_id, ServerMessage::MatchStart(MatchRef { match_id })).await;
            self.send_to(&placement.opponent, ServerMessage::MatchStart(MatchRef { match_id })).await;

            match self.engine.start_turns(&match_id).await {
                Ok(turn) => self.announce_turn(turn).await,
                Err(e) => error!("Match {} could not start turns: {}", match_id.short(), e),
            }
        }
    }

    async fn handle_throw(&self, req: ThrowBombRequest, sender: &mpsc::Sender<ServerMessage>) {
        let match_id = req.match_id;
        match self.engine.throw_bomb(&match_id, &req.player_id, req.coordinates).await {
            Ok(outcome) => self.deliver_bomb(match_id, outcome).await,
            Err(e) => {
                debug!("Throw rejected for {}: {}", req.player_id.short(), e);
                let _ = sender
                    .send(ServerMessage::MatchBombThrown(BombThrownInfo {
                        match_id,
                        success: false,
                        coordinates: req.coordinates,
                        has_hit: false,
                        has_sunk: false,
                        sunk_count: 0,
                        message: Some(e.to_string()),
                    }))
                    .await;
            }
        }
    }

    async fn deliver_bomb(&self, match_id: MatchId, outcome: BombOutcome) {
        let result = outcome.result;
        self.send_to(&outcome.thrower, ServerMessage::MatchBombThrown(BombThrownInfo {
            match_id,
            success: true,
            coordinates: result.coordinate,
            has_hit: result.has_hit,
            has_sunk: result.has_sunk,
            sunk_count: result.opponent_sunk,
            message: None,
        }))
        .await;
        self.send_to(&outcome.opponent, ServerMessage::MatchBombReceive(BombReceiveInfo {
            match_id,
            coordinates: result.coordinate,
            has_hit: result.has_hit,
            has_sunk: result.has_sunk,
        }))
        .await;

        if result.winning {
            self.settle(match_id, outcome.thrower, outcome.opponent, EndReason::Victory).await;
        } else if let Some(turn) = outcome.next_turn {
            self.announce_turn(turn).await;
        }
    }

    // -------------------------------------------------------------------------
    // Turn clock
    // -------------------------------------------------------------------------

    /// Tell both players whose turn it is and arm the clock.
    async fn announce_turn(&self, turn: TurnAssignment) {
        for player in turn.players {
            self.send_to(&player, ServerMessage::MatchTurn(TurnInfo {
                match_id: turn.match_id,
                is_your_turn: turn.is_turn_of(&player),
                turn_number: turn.number,
            }))
            .await;
        }

        let fired = self.timer_tx.clone();
        let timeout = self.config.turn.timeout;
        let armed = TurnTimeout { match_id: turn.match_id, number: turn.number };
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = fired.send(armed);
        });
    }

    async fn run_turn_expiry(gateway: Weak<Self>, mut fired: mpsc::UnboundedReceiver<TurnTimeout>) {
        while let Some(timeout) = fired.recv().await {
            let Some(gateway) = gateway.upgrade() else {
                break;
            };
            gateway.on_turn_expired(timeout).await;
        }
    }

    async fn on_turn_expired(&self, timeout: TurnTimeout) {
        let policy = self.config.turn.policy;
        let expiry = match self.engine.expire_turn(&timeout.match_id, timeout.number, policy).await {
            Ok(expiry) => expiry,
            Err(MatchError::MatchNotFound) => return,
            Err(e) => {
                warn!("Turn expiry for match {} failed: {}", timeout.match_id.short(), e);
                return;
            }
        };

        match expiry {
            TurnExpiry::Stale => {}
            TurnExpiry::Passed(turn) => {
                info!("Match {}: turn {} timed out, passing", turn.match_id.short(), timeout.number);
                self.announce_turn(turn).await;
            }
            TurnExpiry::Forfeit { winner, loser } => {
                info!("Match {}: {} forfeits on timeout", timeout.match_id.short(), loser.short());
                self.settle(timeout.match_id, winner, loser, EndReason::Timeout).await;
            }
            TurnExpiry::AutoBomb(outcome) => {
                info!("Match {}: random bomb for {}", timeout.match_id.short(), outcome.thrower.short());
                self.deliver_bomb(timeout.match_id, outcome).await;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Settlement
    // -------------------------------------------------------------------------

    async fn settle(&self, match_id: MatchId, winner: SessionToken, loser: SessionToken, reason: EndReason) {
        match self.engine.end_match(&match_id, &winner, &loser).await {
            Ok(settlement) => {
                for (player, win, rating) in [
                    (winner, true, settlement.winner_rating),
                    (loser, false, settlement.loser_rating),
                ] {
                    self.send_to(&player, ServerMessage::MatchEnd(MatchEndInfo {
                        match_id,
                        success: true,
                        win: Some(win),
                        new_rating: Some(rating),
                        match_record: Some(settlement.record.clone()),
                        reason,
                        message: None,
                    }))
                    .await;
                }
            }
            Err(MatchError::AlreadySettled) | Err(MatchError::MatchNotFound) => {
                debug!("Match {} already settled", match_id.short());
            }
            Err(e) => {
                for player in [winner, loser] {
                    self.send_to(&player, ServerMessage::MatchEnd(MatchEndInfo {
                        match_id,
                        success: false,
                        win: None,
                        new_rating: None,
                        match_record: None,
                        reason,
                        message: Some(format!("Settlement failed: {}", e)),
                    }))
                    .await;
                }
            }
        }
    }

    async fn notify_abandoned(&self, player: &SessionToken, match_id: MatchId) {
        self.send_to(player, ServerMessage::MatchEnd(MatchEndInfo {
            match_id,
            success: false,
            win: None,
            new_rating: None,
            match_record: None,
            reason: EndReason::Abandoned,
            message: Some("Opponent left before the match started; join the queue again".to_string()),
        }))
        .await;
    }

    // -------------------------------------------------------------------------
    // Disconnect
    // -------------------------------------------------------------------------

    /// Forget a connection. Forfeits or abandons its match if it still
    /// speaks for the session.
    pub async fn disconnect(&self, addr: SocketAddr) {
        let Some(client) = self.clients.write().await.remove(&addr) else {
            return;
        };
        let Some(token) = client.token else {
            debug!("Client {} disconnected", addr);
            return;
        };

        {
            let mut presence = self.presence.write().await;
            match presence.get(&token) {
                Some((bound, _)) if *bound == addr => {
                    presence.remove(&token);
                }
                // Session has moved to another connection
                _ => return,
            }
        }

        self.pairing.leave(&token).await;

        if let Some(match_id) = self.engine.get_match(&token).await {
            self.leave_match(match_id, token).await;
        }

        info!("Client {} ({}) disconnected", addr, token.short());
    }

    async fn leave_match(&self, match_id: MatchId, token: SessionToken) {
        match self.engine.abandon(&match_id).await {
            Ok(players) => {
                for other in players.iter().filter(|p| **p != token) {
                    self.notify_abandoned(other, match_id).await;
                }
            }
            Err(MatchError::MatchAlreadyStarted) => {
                let opponent = self
                    .engine
                    .participants(&match_id)
                    .await
                    .and_then(|p| p.opponent_of(&token));
                if let Some(opponent) = opponent {
                    info!("Match {}: {} forfeits on disconnect", match_id.short(), token.short());
                    self.settle(match_id, opponent, token, EndReason::Disconnect).await;
                }
            }
            Err(e) => debug!("Match {} not left: {}", match_id.short(), e),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
