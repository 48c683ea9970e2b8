//! Pairing Queue
//!
//! Skill-based matchmaking. Searchers wait in a pool; a periodic sweep pairs
//! each unmatched entry with the closest-rated other entry inside its search
//! radius, and widens the radius of everyone left over.
//!
//! A searcher suspends on a oneshot until the sweep resolves it. Each pair is
//! handed a second oneshot so that exactly one side creates the match and the
//! other side learns its id without polling.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::time::interval;
use tracing::{debug, info};

use crate::core::ids::{MatchId, SessionToken};
use crate::core::rating::Rating;

/// Pairing configuration.
#[derive(Clone, Debug)]
pub struct PairingConfig {
    /// Time between sweeps.
    pub sweep_interval: Duration,
    /// Search radius of a fresh entry.
    pub initial_radius: Rating,
    /// Radius growth per unsuccessful sweep.
    pub radius_step: Rating,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            initial_radius: 50,
            radius_step: 20,
        }
    }
}

impl PairingConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sweep_interval: std::env::var("BATNAV_PAIRING_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
            initial_radius: std::env::var("BATNAV_PAIRING_RADIUS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.initial_radius),
            radius_step: std::env::var("BATNAV_PAIRING_STEP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.radius_step),
        }
    }
}

/// Pairing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingError {
    /// The token already has a waiting entry.
    #[error("Already searching for a match")]
    AlreadyQueued,

    /// The entry left the pool before it was paired.
    #[error("Search cancelled")]
    Cancelled,
}

/// How a paired side learns the match id.
#[derive(Debug)]
pub enum MatchHandoff {
    /// This side creates the match and sends its id.
    Create(oneshot::Sender<MatchId>),
    /// This side waits for the creator.
    Await(oneshot::Receiver<MatchId>),
}

/// A resolved search.
#[derive(Debug)]
pub struct PairingResult {
    /// Paired opponent.
    pub opponent: SessionToken,
    /// This side's priority.
    pub my_priority: u32,
    /// Opponent's priority.
    pub opponent_priority: u32,
    /// Match creation handoff.
    pub handoff: MatchHandoff,
}

impl PairingResult {
    /// Whether this side creates the match.
    pub fn is_creator(&self) -> bool {
        matches!(self.handoff, MatchHandoff::Create(_))
    }
}

/// Whether side `a` creates the match when paired with side `b`.
///
/// Strictly greater priority wins; on equal priority the smaller token does.
pub fn creates_match(a: (&SessionToken, u32), b: (&SessionToken, u32)) -> bool {
    match a.1.cmp(&b.1) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => a.0 < b.0,
    }
}

/// One waiting searcher.
#[derive(Debug)]
struct PairingEntry {
    token: SessionToken,
    rating: Rating,
    search_radius: Rating,
    priority: u32,
    assigned_opponent: Option<(SessionToken, u32)>,
    notify: oneshot::Sender<PairingResult>,
}

/// The pairing pool.
pub struct PairingQueue {
    config: PairingConfig,
    pool: Mutex<Vec<PairingEntry>>,
}

impl PairingQueue {
    /// Create an empty queue.
    pub fn new(config: PairingConfig) -> Self {
        Self {
            config,
            pool: Mutex::new(Vec::new()),
        }
    }

    /// Queue configuration.
    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    /// Wait for an opponent.
    pub async fn search(&self, token: SessionToken, rating: Rating) -> Result<PairingResult, PairingError> {
        self.search_with_priority(token, rating, rand::random()).await
    }

    /// Wait for an opponent with a fixed creation priority.
    pub async fn search_with_priority(
        &self,
        token: SessionToken,
        rating: Rating,
        priority: u32,
    ) -> Result<PairingResult, PairingError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pool = self.pool.lock().await;
            if pool.iter().any(|e| e.token == token) {
                return Err(PairingError::AlreadyQueued);
            }
            pool.push(PairingEntry {
                token,
                rating,
                search_radius: self.config.initial_radius,
                priority,
                assigned_opponent: None,
                notify: tx,
            });
        }

        debug!("Player {} searching at rating {}", token.short(), rating);
        rx.await.map_err(|_| PairingError::Cancelled)
    }

    /// Remove a waiting entry. The pending `search` resolves with `Cancelled`.
    pub async fn leave(&self, token: &SessionToken) -> bool {
        let mut pool = self.pool.lock().await;
        match pool.iter().position(|e| e.token == *token) {
            Some(index) => {
                pool.remove(index);
                debug!("Player {} left the queue", token.short());
                true
            }
            None => false,
        }
    }

    /// Number of waiting entries.
    pub async fn len(&self) -> usize {
        self.pool.lock().await.len()
    }

    /// True if nobody is waiting.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run one pairing pass. Returns the number of pairs formed.
    pub async fn sweep(&self) -> usize {
        let mut pool = self.pool.lock().await;

        // Searchers whose caller went away
        pool.retain(|e| !e.notify.is_closed());

        let mut pairs = Vec::new();
        for i in 0..pool.len() {
            if pool[i].assigned_opponent.is_some() {
                continue;
            }

            let (rating, radius) = (pool[i].rating, pool[i].search_radius);
            let mut best: Option<(usize, Rating)> = None;
            for (j, other) in pool.iter().enumerate() {
                if j == i || other.assigned_opponent.is_some() {
                    continue;
                }
                let gap = (other.rating - rating).abs();
                if gap <= radius && best.map_or(true, |(_, g)| gap < g) {
                    best = Some((j, gap));
                }
            }

            if let Some((j, _)) = best {
                let mine = (pool[i].token, pool[i].priority);
                let theirs = (pool[j].token, pool[j].priority);
                pool[i].assigned_opponent = Some(theirs);
                pool[j].assigned_opponent = Some(mine);
                pairs.push((i, j));
            }
        }

        let step = self.config.radius_step;
        for entry in pool.iter_mut().filter(|e| e.assigned_opponent.is_none()) {
            entry.search_radius += step;
        }

        if pairs.is_empty() {
            return 0;
        }

        let mut slots: Vec<Option<PairingEntry>> = pool.drain(..).map(Some).collect();
        for (i, j) in &pairs {
            if let (Some(a), Some(b)) = (slots[*i].take(), slots[*j].take()) {
                Self::resolve(a, b);
            }
        }
        pool.extend(slots.into_iter().flatten());

        pairs.len()
    }

    fn resolve(a: PairingEntry, b: PairingEntry) {
        let (tx, rx) = oneshot::channel();
        let a_creates = creates_match((&a.token, a.priority), (&b.token, b.priority));
        let (a_handoff, b_handoff) = if a_creates {
            (MatchHandoff::Create(tx), MatchHandoff::Await(rx))
        } else {
            (MatchHandoff::Await(rx), MatchHandoff::Create(tx))
        };

        info!(
            "Paired {} ({}) with {} ({})",
            a.token.short(), a.rating, b.token.short(), b.rating
        );

        let _ = a.notify.send(PairingResult {
            opponent: b.token,
            my_priority: a.priority,
            opponent_priority: b.priority,
            handoff: a_handoff,
        });
        let _ = b.notify.send(PairingResult {
            opponent: a.token,
            my_priority: b.priority,
            opponent_priority: a.priority,
            handoff: b_handoff,
        });
    }

    /// Sweep forever at the configured interval.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.config.sweep_interval);
        loop {
            ticker.tick().await;
            let paired = self.sweep().await;
            if paired > 0 {
                debug!("Sweep formed {} pair(s)", paired);
            }
        }
    }
}

impl Default for PairingQueue {
    fn default() -> Self {
        Self::new(PairingConfig::default())
    }
}

// =============================================================================
// TESTS
// =============================================================================
