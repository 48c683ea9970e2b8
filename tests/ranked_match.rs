//! End-to-end ranked matches driven through the gateway with plain channels.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use batnav::game::board::{Coordinate, Ship};
use batnav::game::engine::{MatchEngine, TurnTimeoutPolicy};
use batnav::network::protocol::{
    ClientMessage, EndReason, MatchEndInfo, SetShipsRequest, ServerMessage, ThrowBombRequest,
    TokenRequest, TurnInfo,
};
use batnav::network::{
    Gateway, GatewayConfig, MatchHandoff, PairingConfig, PairingError, PairingQueue, PairingResult,
    SessionRegistry, TurnConfig,
};
use batnav::store::MemoryAccountStore;
use batnav::{MatchId, SessionToken};

const WAIT: Duration = Duration::from_secs(5);

struct Player {
    addr: SocketAddr,
    token: SessionToken,
    rx: mpsc::Receiver<ServerMessage>,
}

struct Harness {
    gateway: Arc<Gateway>,
    store: Arc<MemoryAccountStore>,
}

fn harness(turn: TurnConfig) -> Harness {
    harness_with(GatewayConfig { turn, ..Default::default() })
}

fn harness_with(config: GatewayConfig) -> Harness {
    let sessions = Arc::new(SessionRegistry::default());
    let store = Arc::new(MemoryAccountStore::new());
    let pairing = Arc::new(PairingQueue::new(PairingConfig {
        sweep_interval: Duration::from_millis(10),
        ..Default::default()
    }));
    let engine = Arc::new(MatchEngine::new(sessions.clone(), store.clone()));
    let gateway = Gateway::new(config, sessions, store.clone(), pairing.clone(), engine);
    tokio::spawn(pairing.run());
    Harness { gateway, store }
}

/// Skip messages until `pick` accepts one.
async fn recv_until<T>(
    rx: &mut mpsc::Receiver<ServerMessage>,
    mut pick: impl FnMut(ServerMessage) -> Option<T>,
) -> Result<T> {
    tokio::time::timeout(WAIT, async {
        while let Some(msg) = rx.recv().await {
            if let Some(found) = pick(msg) {
                return Ok(found);
            }
        }
        Err(anyhow!("connection closed"))
    })
    .await
    .map_err(|_| anyhow!("timed out waiting for message"))?
}

async fn login(h: &Harness, name: &str, port: u16) -> Result<Player> {
    let account = h.store.create_account(name, 1000).await;
    let token = h.gateway.sessions().create(account.id).await;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let (tx, mut rx) = mpsc::channel(256);

    h.gateway.connect(addr, tx).await;
    h.gateway
        .handle_message(addr, ClientMessage::Authenticate(TokenRequest { token }))
        .await;
    let ok = recv_until(&mut rx, |m| match m {
        ServerMessage::Authentication(r) => Some(r.success),
        _ => None,
    })
    .await?;
    assert!(ok);

    Ok(Player { addr, token, rx })
}

async fn join(h: &Harness, player: &mut Player) -> Result<MatchId> {
    h.gateway
        .handle_message(player.addr, ClientMessage::JoinRankedQueue(TokenRequest { token: player.token }))
        .await;
    recv_until(&mut player.rx, |m| match m {
        ServerMessage::Match(r) if r.success => r.match_id,
        _ => None,
    })
    .await
}

/// Eight ships on rows 0..8, lengths 5, 4, 3, 3, 2, 2, 1, 1.
fn fleet() -> Vec<Ship> {
    [5u8, 4, 3, 3, 2, 2, 1, 1]
        .iter()
        .enumerate()
        .map(|(row, len)| Ship::new((0..*len).map(|x| Coordinate(x, row as u8))))
        .collect()
}

async fn place(h: &Harness, player: &Player, match_id: MatchId) {
    let req = SetShipsRequest { match_id, player_id: player.token, coordinates: fleet() };
    h.gateway.handle_message(player.addr, ClientMessage::MatchSetShips(req)).await;
}

async fn throw(h: &Harness, player: &Player, match_id: MatchId, at: Coordinate) {
    let req = ThrowBombRequest { match_id, player_id: player.token, coordinates: at };
    h.gateway.handle_message(player.addr, ClientMessage::MatchThrowBomb(req)).await;
}

async fn next_turn(player: &mut Player) -> Result<TurnInfo> {
    recv_until(&mut player.rx, |m| match m {
        ServerMessage::MatchTurn(t) => Some(t),
        _ => None,
    })
    .await
}

async fn match_end(player: &mut Player) -> Result<MatchEndInfo> {
    recv_until(&mut player.rx, |m| match m {
        ServerMessage::MatchEnd(e) => Some(e),
        _ => None,
    })
    .await
}

/// Pair two fresh players and place both fleets. Returns (first, second, match).
async fn start_match(h: &Harness) -> Result<(Player, Player, MatchId)> {
    let mut alice = login(h, "alice", 1).await?;
    let mut bob = login(h, "bob", 2).await?;

    let (a, b) = tokio::join!(join(h, &mut alice), join(h, &mut bob));
    let match_id = a?;
    assert_eq!(b?, match_id);

    place(h, &alice, match_id).await;
    place(h, &bob, match_id).await;

    let alice_turn = next_turn(&mut alice).await?;
    let bob_turn = next_turn(&mut bob).await?;
    assert_eq!(alice_turn.turn_number, 1);
    assert_eq!(bob_turn.turn_number, 1);
    assert_ne!(alice_turn.is_your_turn, bob_turn.is_your_turn);

    if alice_turn.is_your_turn {
        Ok((alice, bob, match_id))
    } else {
        Ok((bob, alice, match_id))
    }
}

#[tokio::test]
async fn test_full_ranked_match() -> Result<()> {
    let h = harness(TurnConfig::default());
    let (mut first, mut second, match_id) = start_match(&h).await?;

    let targets: Vec<Coordinate> = fleet().iter().flat_map(|s| s.cells().iter().copied().collect::<Vec<_>>()).collect();
    let mut misses = (8..10u8).flat_map(|y| (0..10u8).map(move |x| Coordinate(x, y)));

    for (i, at) in targets.iter().enumerate() {
        throw(&h, &first, match_id, *at).await;
        let thrown = recv_until(&mut first.rx, |m| match m {
            ServerMessage::MatchBombThrown(b) => Some(b),
            _ => None,
        })
        .await?;
        assert!(thrown.success);
        assert!(thrown.has_hit);

        // Third cell of the three-long ship on row 2
        if *at == Coordinate(2, 2) {
            assert!(thrown.has_sunk);
            assert_eq!(thrown.sunk_count, 3);
        }

        if i + 1 == targets.len() {
            break;
        }

        recv_until(&mut second.rx, |m| match m {
            ServerMessage::MatchTurn(t) if t.is_your_turn => Some(()),
            _ => None,
        })
        .await?;
        let miss = misses.next().ok_or_else(|| anyhow!("out of water cells"))?;
        throw(&h, &second, match_id, miss).await;
        let thrown = recv_until(&mut second.rx, |m| match m {
            ServerMessage::MatchBombThrown(b) => Some(b),
            _ => None,
        })
        .await?;
        assert!(!thrown.has_hit);
    }

    let won = match_end(&mut first).await?;
    let lost = match_end(&mut second).await?;
    assert_eq!(won.reason, EndReason::Victory);
    assert_eq!(won.win, Some(true));
    assert_eq!(won.new_rating, Some(1030));
    assert_eq!(lost.win, Some(false));
    assert_eq!(lost.new_rating, Some(970));

    let record = won.match_record.ok_or_else(|| anyhow!("missing record"))?;
    assert_eq!(record.winner.bombs_thrown.len(), targets.len());
    assert_eq!(h.store.record_count().await, 1);
    assert_eq!(h.gateway.engine().match_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_out_of_turn_throw_rejected() -> Result<()> {
    let h = harness(TurnConfig::default());
    let (_first, mut second, match_id) = start_match(&h).await?;

    throw(&h, &second, match_id, Coordinate(0, 0)).await;
    let reply = recv_until(&mut second.rx, |m| match m {
        ServerMessage::MatchBombThrown(b) => Some(b),
        _ => None,
    })
    .await?;
    assert!(!reply.success);
    assert!(reply.message.is_some());
    Ok(())
}

#[tokio::test]
async fn test_disconnect_forfeits_active_match() -> Result<()> {
    let h = harness(TurnConfig::default());
    let (first, mut second, _match_id) = start_match(&h).await?;

    h.gateway.disconnect(first.addr).await;

    let end = match_end(&mut second).await?;
    assert_eq!(end.reason, EndReason::Disconnect);
    assert_eq!(end.win, Some(true));
    assert_eq!(end.new_rating, Some(1030));
    assert_eq!(h.gateway.engine().match_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_disconnect_during_placement_abandons() -> Result<()> {
    let h = harness(TurnConfig::default());
    let mut alice = login(&h, "alice", 1).await?;
    let mut bob = login(&h, "bob", 2).await?;

    let (a, b) = tokio::join!(join(&h, &mut alice), join(&h, &mut bob));
    let match_id = a?;
    assert_eq!(b?, match_id);

    h.gateway.disconnect(alice.addr).await;

    let end = match_end(&mut bob).await?;
    assert_eq!(end.reason, EndReason::Abandoned);
    assert!(!end.success);
    assert_eq!(end.new_rating, None);

    let bob_account = h.store.get_account_by_name("bob").await.ok_or_else(|| anyhow!("no bob"))?;
    assert_eq!(bob_account.rating, 1000);
    assert_eq!(h.store.record_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_turn_timeout_passes() -> Result<()> {
    let h = harness(TurnConfig { timeout: Duration::from_millis(100), policy: TurnTimeoutPolicy::Pass });
    let (mut first, mut second, _match_id) = start_match(&h).await?;

    let first_turn = next_turn(&mut first).await?;
    let second_turn = next_turn(&mut second).await?;
    assert_eq!(first_turn.turn_number, 2);
    assert!(!first_turn.is_your_turn);
    assert!(second_turn.is_your_turn);
    Ok(())
}

#[tokio::test]
async fn test_turn_timeout_forfeits() -> Result<()> {
    let h = harness(TurnConfig { timeout: Duration::from_millis(100), policy: TurnTimeoutPolicy::Forfeit });
    let (mut first, mut second, _match_id) = start_match(&h).await?;

    let lost = match_end(&mut first).await?;
    let won = match_end(&mut second).await?;
    assert_eq!(lost.reason, EndReason::Timeout);
    assert_eq!(lost.win, Some(false));
    assert_eq!(lost.new_rating, Some(970));
    assert_eq!(won.new_rating, Some(1030));
    Ok(())
}

#[tokio::test]
async fn test_random_bomb_on_timeout() -> Result<()> {
    let h = harness(TurnConfig { timeout: Duration::from_millis(100), policy: TurnTimeoutPolicy::RandomBomb });
    let (mut first, mut second, _match_id) = start_match(&h).await?;

    let thrown = recv_until(&mut first.rx, |m| match m {
        ServerMessage::MatchBombThrown(b) => Some(b),
        _ => None,
    })
    .await?;
    assert!(thrown.success);
    assert!(thrown.coordinates.on_board());

    let turn = next_turn(&mut second).await?;
    assert_eq!(turn.turn_number, 2);
    assert!(turn.is_your_turn);
    Ok(())
}

#[tokio::test]
async fn test_settlement_failure_reported() -> Result<()> {
    let h = harness(TurnConfig::default());
    let (first, mut second, _match_id) = start_match(&h).await?;

    h.store.set_fail_rating_updates(true);
    h.gateway.disconnect(first.addr).await;

    let end = match_end(&mut second).await?;
    assert!(!end.success);
    assert_eq!(end.reason, EndReason::Disconnect);
    assert_eq!(end.new_rating, None);
    assert!(end.message.is_some());
    assert_eq!(h.gateway.engine().match_count().await, 0);
    Ok(())
}

/// Queue `name` without a connection, always as the creating side.
async fn silent_creator(
    h: &Harness,
    name: &str,
) -> Result<(SessionToken, JoinHandle<Result<PairingResult, PairingError>>)> {
    let account = h.store.create_account(name, 1000).await;
    let token = h.gateway.sessions().create(account.id).await;
    let pairing = h.gateway.pairing().clone();
    let search = tokio::spawn(async move { pairing.search_with_priority(token, 1000, u32::MAX).await });
    while h.gateway.pairing().is_empty().await {
        tokio::task::yield_now().await;
    }
    Ok((token, search))
}

async fn match_failure(player: &mut Player) -> Result<Option<bool>> {
    recv_until(&mut player.rx, |m| match m {
        ServerMessage::Match(r) if !r.success => Some(r.retry),
        _ => None,
    })
    .await
}

#[tokio::test]
async fn test_handoff_timeout_lets_player_requeue() -> Result<()> {
    let h = harness_with(GatewayConfig {
        handoff_timeout: Duration::from_millis(100),
        ..Default::default()
    });
    let (_bob, _bob_search) = silent_creator(&h, "bob").await?;
    let mut alice = login(&h, "alice", 1).await?;

    h.gateway
        .handle_message(alice.addr, ClientMessage::JoinRankedQueue(TokenRequest { token: alice.token }))
        .await;
    assert_eq!(match_failure(&mut alice).await?, Some(true));
    assert!(h.gateway.engine().get_match(&alice.token).await.is_none());

    // Nothing is left holding the player, so queueing again works
    h.gateway
        .handle_message(alice.addr, ClientMessage::JoinRankedQueue(TokenRequest { token: alice.token }))
        .await;
    tokio::time::timeout(WAIT, async {
        while h.gateway.pairing().is_empty().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn test_invalid_opponent_cancels_match() -> Result<()> {
    let h = harness(TurnConfig::default());
    let (bob, bob_search) = silent_creator(&h, "bob").await?;
    h.gateway.sessions().invalidate(&bob).await;
    let mut alice = login(&h, "alice", 1).await?;

    h.gateway
        .handle_message(alice.addr, ClientMessage::JoinRankedQueue(TokenRequest { token: alice.token }))
        .await;

    let paired = bob_search.await??;
    let MatchHandoff::Create(tx) = paired.handoff else {
        return Err(anyhow!("bob should create the match"));
    };
    let match_id = h.gateway.engine().create(bob, alice.token).await;
    tx.send(match_id).map_err(|_| anyhow!("alice stopped waiting"))?;

    assert_eq!(match_failure(&mut alice).await?, Some(true));
    assert_eq!(h.gateway.engine().match_count().await, 0);
    Ok(())
}
