//! Application state management

use prodtrack_core::{AppConfig, Repositories};
use std::time::Instant;

use crate::auth::jwt::TokenCodec;
use crate::auth::password::{CredentialHasher, PasswordConfig};
use crate::auth::session::SessionIndex;

/// Application state shared across handlers
///
/// Built once by the process entry point and injected into the router; no
/// part of it is a process-wide global.
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Principal, role and permission stores
    pub repos: Repositories,
    pub hasher: CredentialHasher,
    pub tokens: TokenCodec,
    /// Best-effort session tracking
    pub sessions: SessionIndex,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, repos: Repositories, sessions: SessionIndex) -> Self {
        let hasher = CredentialHasher::new(PasswordConfig::from(&config.auth));
        Self::with_hasher(config, repos, sessions, hasher)
    }

    /// Same as [`AppState::new`] with explicit hashing costs
    pub fn with_hasher(
        config: AppConfig,
        repos: Repositories,
        sessions: SessionIndex,
        hasher: CredentialHasher,
    ) -> Self {
        let tokens = TokenCodec::from_config(&config.auth);
        Self {
            config,
            repos,
            hasher,
            tokens,
            sessions,
            start_time: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
