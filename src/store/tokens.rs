//! Short-lived join tokens keyed by nickname
//!
//! A token is issued by the join handshake and consumed by the WebSocket
//! upgrade. Each nickname holds at most one live token; consuming deletes
//! it so a token can never be replayed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// How long a join token stays valid
pub const TOKEN_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
struct PendingToken {
    token: Uuid,
    expires_at: Instant,
}

impl PendingToken {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("nickname already has a pending join")]
    Pending,

    #[error("invalid, expired or already used token")]
    Invalid,
}

/// In-process ephemeral key/value store for join tokens
#[derive(Clone)]
pub struct TokenStore {
    entries: Arc<DashMap<String, PendingToken>>,
    ttl: Duration,
}

impl TokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Issue a fresh token for `nickname` unless one is still live
    pub fn issue(&self, nickname: &str) -> Result<Uuid, TokenError> {
        let now = Instant::now();
        let pending = PendingToken {
            token: Uuid::new_v4(),
            expires_at: now + self.ttl,
        };

        match self.entries.entry(nickname.to_string()) {
            Entry::Occupied(entry) if entry.get().is_live(now) => Err(TokenError::Pending),
            Entry::Occupied(mut entry) => {
                entry.insert(pending);
                Ok(pending.token)
            }
            Entry::Vacant(entry) => {
                entry.insert(pending);
                Ok(pending.token)
            }
        }
    }

    /// Validate and delete the token in one step
    pub fn consume(&self, nickname: &str, token: &str) -> Result<(), TokenError> {
        let token: Uuid = token.parse().map_err(|_| TokenError::Invalid)?;
        let now = Instant::now();

        let removed = self
            .entries
            .remove_if(nickname, |_, pending| pending.token == token && pending.is_live(now));

        match removed {
            Some(_) => Ok(()),
            None => Err(TokenError::Invalid),
        }
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, pending| pending.is_live(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged, "Purged expired join tokens");
        }
        purged
    }

    /// Periodically purge expired tokens for the lifetime of the process
    pub async fn run_janitor(self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            self.purge_expired();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
impl TokenStore {
    /// Whether a live token exists for `nickname`
    pub fn is_pending(&self, nickname: &str) -> bool {
        let now = Instant::now();
        self.entries
            .get(nickname)
            .map(|p| p.is_live(now))
            .unwrap_or(false)
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(TOKEN_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_single_use() {
        let store = TokenStore::default();
        let token = store.issue("alice").unwrap().to_string();

        assert_eq!(store.consume("alice", &token), Ok(()));
        assert_eq!(store.consume("alice", &token), Err(TokenError::Invalid));
        assert!(!store.is_pending("alice"));
    }

    #[test]
    fn wrong_token_or_nickname_is_rejected_and_kept() {
        let store = TokenStore::default();
        let token = store.issue("alice").unwrap().to_string();

        assert_eq!(
            store.consume("alice", &Uuid::new_v4().to_string()),
            Err(TokenError::Invalid)
        );
        assert_eq!(store.consume("bob", &token), Err(TokenError::Invalid));
        assert_eq!(store.consume("alice", "not-a-uuid"), Err(TokenError::Invalid));
        assert_eq!(store.consume("alice", &token), Ok(()));
    }

    #[test]
    fn live_token_blocks_second_issue() {
        let store = TokenStore::default();
        store.issue("alice").unwrap();
        assert_eq!(store.issue("alice"), Err(TokenError::Pending));
        assert!(store.is_pending("alice"));
    }

    #[test]
    fn expired_token_is_rejected_and_replaceable() {
        let store = TokenStore::new(Duration::ZERO);
        let token = store.issue("alice").unwrap().to_string();

        assert_eq!(store.consume("alice", &token), Err(TokenError::Invalid));
        assert!(!store.is_pending("alice"));
        assert!(store.issue("alice").is_ok());
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }
}
