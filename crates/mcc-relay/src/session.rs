//! Process-wide session (CSRF) token cache.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::upstream::{Upstream, UpstreamError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenState {
    Absent,
    Valid(String),
    Invalid,
}

/// Caches the session token required for non-idempotent API calls.
///
/// The state lock is held across a fetch, so concurrent callers of
/// [`SessionManager::token`] wait for the in-flight fetch and then share its
/// result instead of issuing their own.
pub struct SessionManager {
    upstream: Arc<dyn Upstream>,
    state: Mutex<TokenState>,
}

impl SessionManager {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self {
            upstream,
            state: Mutex::new(TokenState::Absent),
        }
    }

    /// Return the cached token, fetching one if there is none.
    ///
    /// Fetch failures are reported as [`UpstreamError::Token`] and leave the
    /// cache empty.
    pub async fn token(&self) -> Result<String, UpstreamError> {
        let mut state = self.state.lock().await;
        if let TokenState::Valid(token) = &*state {
            return Ok(token.clone());
        }

        debug!(state = ?*state, "Fetching session token");
        let token = self
            .upstream
            .fetch_session_token()
            .await
            .map_err(|e| match e {
                UpstreamError::Token(_) => e,
                other => UpstreamError::Token(other.to_string()),
            })?;
        info!("Session token refreshed");
        *state = TokenState::Valid(token.clone());
        Ok(token)
    }

    /// Force the next [`SessionManager::token`] call to fetch.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        if matches!(*state, TokenState::Valid(_)) {
            debug!("Session token invalidated");
        }
        *state = TokenState::Invalid;
    }

    /// The cached token, without fetching.
    pub async fn cached(&self) -> Option<String> {
        match &*self.state.lock().await {
            TokenState::Valid(token) => Some(token.clone()),
            TokenState::Absent | TokenState::Invalid => None,
        }
    }
}
