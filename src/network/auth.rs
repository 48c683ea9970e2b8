//! Session Registry
//!
//! Maps opaque session tokens back to accounts. Tokens are issued at login
//! (by the web gateway, or by the binary for development accounts) and
//! checked on every privileged operation.
//!
//! One active session per account: issuing a new token for an account
//! silently retires the previous one.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::ids::{AccountId, SessionToken};

/// Session configuration.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Idle lifetime of a session. `None` disables expiry.
    pub session_ttl: Option<Duration>,
    /// Measure the TTL from the last successful validation instead of issue time.
    pub sliding_refresh: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl: Some(Duration::from_secs(24 * 60 * 60)),
            sliding_refresh: true,
        }
    }
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let session_ttl = match std::env::var("BATNAV_SESSION_TTL_SECS").ok().and_then(|v| v.parse::<u64>().ok()) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.session_ttl,
        };
        Self {
            session_ttl,
            sliding_refresh: std::env::var("BATNAV_SESSION_SLIDING")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.sliding_refresh),
        }
    }
}

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Token unknown, replaced, invalidated, or expired.
    #[error("The requested session is invalid or has expired")]
    InvalidSession,
}

/// A live login.
#[derive(Debug, Clone)]
pub struct Session {
    /// Account this session belongs to.
    pub account_id: AccountId,
    /// Session token.
    pub token: SessionToken,
    /// When the token was issued.
    pub issued_at: Instant,
    /// Last successful validation.
    pub last_seen: Instant,
}

#[derive(Default)]
struct Registry {
    by_account: BTreeMap<AccountId, SessionToken>,
    by_token: BTreeMap<SessionToken, Session>,
}

impl Registry {
    fn remove_token(&mut self, token: &SessionToken) -> Option<Session> {
        let session = self.by_token.remove(token)?;
        if self.by_account.get(&session.account_id) == Some(token) {
            self.by_account.remove(&session.account_id);
        }
        Some(session)
    }
}

/// Token ↔ account mapping with expiry.
pub struct SessionRegistry {
    config: AuthConfig,
    inner: RwLock<Registry>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Registry::default()),
        }
    }

    /// Issue a fresh token for `account_id`, replacing any previous one.
    pub async fn create(&self, account_id: AccountId) -> SessionToken {
        let token = SessionToken::new_v4();
        let now = Instant::now();

        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.by_account.insert(account_id, token) {
            inner.by_token.remove(&previous);
        }
        inner.by_token.insert(token, Session {
            account_id,
            token,
            issued_at: now,
            last_seen: now,
        });

        debug!("Issued session {} for account {}", token.short(), account_id.short());
        token
    }

    /// Resolve a token to its account.
    pub async fn validate(&self, token: &SessionToken) -> Result<AccountId, AuthError> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;

        let session = inner.by_token.get_mut(token).ok_or(AuthError::InvalidSession)?;
        if self.is_expired(session, now) {
            debug!("Session {} expired", token.short());
            inner.remove_token(token);
            return Err(AuthError::InvalidSession);
        }

        session.last_seen = now;
        Ok(session.account_id)
    }

    /// Drop a session. Returns whether it existed.
    pub async fn invalidate(&self, token: &SessionToken) -> bool {
        self.inner.write().await.remove_token(token).is_some()
    }

    /// Drop every expired session. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write().await;

        let expired: Vec<SessionToken> = inner.by_token.values()
            .filter(|s| self.is_expired(s, now))
            .map(|s| s.token)
            .collect();

        for token in &expired {
            inner.remove_token(token);
        }
        expired.len()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.by_token.len()
    }

    /// True if no sessions are live.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn is_expired(&self, session: &Session, now: Instant) -> bool {
        let Some(ttl) = self.config.session_ttl else {
            return false;
        };
        let since = if self.config.sliding_refresh { session.last_seen } else { session.issued_at };
        now.duration_since(since) > ttl
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(AuthConfig::default())
    }
}

// =============================================================================
// TESTS
// =============================================================================
