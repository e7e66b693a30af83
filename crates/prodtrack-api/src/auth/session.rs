//! Session index
//!
//! Tracks issued access tokens by their `jti`:
//! - `session:{jti}` holds `{user_id, metadata}` with a TTL
//! - `user_sessions:{user_id}` is the set of that user's session ids
//!
//! Tracking is best effort. Every tracking operation degrades to `false`, `None` or
//! `0` when the store is absent or failing, and never returns an error.
//! The per-user set is not pruned when a session key expires on its own, so
//! its cardinality is an upper bound on live sessions.

use prodtrack_core::AppConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::kv::{KeyValueStore, KvOp, RedisStore};

/// Stored session payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn user_sessions_key(user_id: &str) -> String {
    format!("user_sessions:{user_id}")
}

/// Redis-backed index of active sessions
#[derive(Clone)]
pub struct SessionIndex {
    store: Option<Arc<dyn KeyValueStore>>,
    default_ttl_secs: u64,
}

impl SessionIndex {
    /// Wrap `store`, probing it once; an unreachable store leaves the index
    /// disconnected
    pub async fn connect(store: Arc<dyn KeyValueStore>, default_ttl_secs: u64) -> Self {
        match store.ping().await {
            Ok(()) => {
                tracing::info!("Connected to session store");
                Self {
                    store: Some(store),
                    default_ttl_secs,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to session store, session tracking disabled");
                Self::disconnected(default_ttl_secs)
            }
        }
    }

    /// Wrap a store already known to be reachable
    pub fn with_store(store: Arc<dyn KeyValueStore>, default_ttl_secs: u64) -> Self {
        Self {
            store: Some(store),
            default_ttl_secs,
        }
    }

    /// Index with no backing store
    pub fn disconnected(default_ttl_secs: u64) -> Self {
        Self {
            store: None,
            default_ttl_secs,
        }
    }

    /// Build from configuration, connecting to Redis when a URL is set
    pub async fn from_config(config: &AppConfig) -> Self {
        let default_ttl = config.auth.access_token_ttl_secs().max(0) as u64;

        let Some(url) = config.redis.url.as_deref() else {
            tracing::warn!("Redis URL not configured, session tracking disabled");
            return Self::disconnected(default_ttl);
        };

        match RedisStore::connect(
            url,
            Duration::from_secs(config.redis.connect_timeout_secs),
            Duration::from_secs(config.redis.response_timeout_secs),
        )
        .await
        {
            Ok(store) => Self::connect(Arc::new(store), default_ttl).await,
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to Redis, session tracking disabled");
                Self::disconnected(default_ttl)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.store.is_some()
    }

    /// Round-trip to the store; a disconnected index reports why
    pub async fn ping(&self) -> Result<(), String> {
        match &self.store {
            Some(store) => store.ping().await.map_err(|e| e.to_string()),
            None => Err("not connected".to_string()),
        }
    }

    /// A missing or zero TTL falls back to the default; SETEX refuses 0
    fn session_ttl(&self, requested: Option<u64>) -> u64 {
        requested
            .filter(|ttl| *ttl > 0)
            .unwrap_or(self.default_ttl_secs)
            .max(1)
    }

    /// Record a session and add it to the user's index in one transaction
    ///
    /// `ttl_secs` defaults to the access-token lifetime.
    pub async fn create_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        metadata: Option<Map<String, Value>>,
        ttl_secs: Option<u64>,
    ) -> bool {
        let Some(store) = &self.store else {
            return false;
        };

        let user_id = user_id.to_string();
        let record = SessionRecord {
            user_id: user_id.clone(),
            metadata: metadata.unwrap_or_default(),
        };
        let payload = match serde_json::to_string(&record) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize session");
                return false;
            }
        };

        let ops = vec![
            KvOp::SetEx {
                key: session_key(session_id),
                value: payload,
                ttl_secs: self.session_ttl(ttl_secs),
            },
            KvOp::SAdd {
                key: user_sessions_key(&user_id),
                member: session_id.to_string(),
            },
        ];

        match store.atomic(ops).await {
            Ok(_) => {
                tracing::debug!(session_id, user_id = %user_id, "Created session");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to create session");
                false
            }
        }
    }

    pub async fn get_session(&self, session_id: &str) -> Option<SessionRecord> {
        let store = self.store.as_ref()?;

        match store.get(&session_key(session_id)).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::error!(error = %e, session_id, "Corrupt session record");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::error!(error = %e, "Failed to get session");
                None
            }
        }
    }

    /// Remove a session and unlink it from its owner
    ///
    /// Deleting a session that no longer exists is a success.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        let Some(store) = &self.store else {
            return false;
        };

        let owner = self.get_session(session_id).await.map(|r| r.user_id);

        let mut ops = vec![KvOp::Del {
            key: session_key(session_id),
        }];
        if let Some(user_id) = owner {
            ops.push(KvOp::SRem {
                key: user_sessions_key(&user_id),
                member: session_id.to_string(),
            });
        }

        match store.atomic(ops).await {
            Ok(_) => {
                tracing::debug!(session_id, "Deleted session");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to delete session");
                false
            }
        }
    }

    /// Delete every session the user has, returning how many still existed
    pub async fn delete_user_sessions(&self, user_id: Uuid) -> u64 {
        let Some(store) = &self.store else {
            return 0;
        };
        let index_key = user_sessions_key(&user_id.to_string());

        let members = match store.smembers(&index_key).await {
            Ok(members) => members,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read user sessions");
                return 0;
            }
        };
        if members.is_empty() {
            return 0;
        }

        let session_count = members.len();
        let mut ops: Vec<KvOp> = members
            .iter()
            .map(|sid| KvOp::Del {
                key: session_key(sid),
            })
            .collect();
        ops.push(KvOp::Del { key: index_key });

        match store.atomic(ops).await {
            Ok(replies) => {
                let deleted: i64 = replies.iter().take(session_count).sum();
                tracing::info!(user_id = %user_id, deleted, "Deleted user sessions");
                deleted.max(0) as u64
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to delete user sessions");
                0
            }
        }
    }

    /// Reset a session's TTL; false when it no longer exists
    pub async fn extend_session(&self, session_id: &str, ttl_secs: u64) -> bool {
        let Some(store) = &self.store else {
            return false;
        };

        match store.expire(&session_key(session_id), ttl_secs).await {
            Ok(extended) => extended,
            Err(e) => {
                tracing::error!(error = %e, "Failed to extend session");
                false
            }
        }
    }

    /// Size of the user's session set (may include expired sessions)
    pub async fn get_user_sessions_count(&self, user_id: Uuid) -> u64 {
        let Some(store) = &self.store else {
            return 0;
        };

        match store.scard(&user_sessions_key(&user_id.to_string())).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to count user sessions");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvError, MemoryKvStore};
    use async_trait::async_trait;

    async fn index() -> SessionIndex {
        SessionIndex::connect(Arc::new(MemoryKvStore::new()), 1800).await
    }

    /// Store whose ping succeeds but every later call fails
    struct FailingStore;

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn ping(&self) -> Result<(), KvError> {
            Ok(())
        }
        async fn get(&self, _: &str) -> Result<Option<String>, KvError> {
            Err(KvError::Timeout)
        }
        async fn expire(&self, _: &str, _: u64) -> Result<bool, KvError> {
            Err(KvError::Timeout)
        }
        async fn smembers(&self, _: &str) -> Result<Vec<String>, KvError> {
            Err(KvError::Backend("down".to_string()))
        }
        async fn scard(&self, _: &str) -> Result<u64, KvError> {
            Err(KvError::Backend("down".to_string()))
        }
        async fn atomic(&self, _: Vec<KvOp>) -> Result<Vec<i64>, KvError> {
            Err(KvError::Backend("down".to_string()))
        }
    }

    /// Store that cannot be reached at all
    struct UnreachableStore;

    #[async_trait]
    impl KeyValueStore for UnreachableStore {
        async fn ping(&self) -> Result<(), KvError> {
            Err(KvError::Backend("connection refused".to_string()))
        }
        async fn get(&self, _: &str) -> Result<Option<String>, KvError> {
            unreachable!("disconnected index must not call the store")
        }
        async fn expire(&self, _: &str, _: u64) -> Result<bool, KvError> {
            unreachable!("disconnected index must not call the store")
        }
        async fn smembers(&self, _: &str) -> Result<Vec<String>, KvError> {
            unreachable!("disconnected index must not call the store")
        }
        async fn scard(&self, _: &str) -> Result<u64, KvError> {
            unreachable!("disconnected index must not call the store")
        }
        async fn atomic(&self, _: Vec<KvOp>) -> Result<Vec<i64>, KvError> {
            unreachable!("disconnected index must not call the store")
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let index = index().await;
        let user = Uuid::new_v4();

        let mut metadata = Map::new();
        metadata.insert("username".to_string(), Value::from("alice"));
        assert!(index.create_session("s1", user, Some(metadata), None).await);

        let record = index.get_session("s1").await.unwrap();
        assert_eq!(record.user_id, user.to_string());
        assert_eq!(record.metadata["username"], "alice");
        assert!(index.get_user_sessions_count(user).await >= 1);

        assert!(index.delete_session("s1").await);
        assert!(index.get_session("s1").await.is_none());
        assert_eq!(index.get_user_sessions_count(user).await, 0);
    }

    #[tokio::test]
    async fn test_delete_missing_session_is_success() {
        let index = index().await;
        assert!(index.delete_session("nope").await);
    }

    #[tokio::test]
    async fn test_bulk_revoke() {
        let index = index().await;
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();

        for sid in ["s1", "s2", "s3"] {
            assert!(index.create_session(sid, user, None, None).await);
        }
        assert!(index.create_session("keep", other, None, None).await);

        assert_eq!(index.delete_user_sessions(user).await, 3);
        for sid in ["s1", "s2", "s3"] {
            assert!(index.get_session(sid).await.is_none());
        }
        assert_eq!(index.get_user_sessions_count(user).await, 0);
        assert!(index.get_session("keep").await.is_some());
        assert_eq!(index.delete_user_sessions(user).await, 0);
    }

    #[tokio::test]
    async fn test_expired_sessions_stay_in_the_user_set() {
        let store = Arc::new(MemoryKvStore::new());
        let index = SessionIndex::with_store(store.clone(), 1800);
        let user = Uuid::new_v4();

        assert!(index.create_session("short", user, None, None).await);
        assert!(index.create_session("long", user, None, None).await);

        // Expiry drops the session key but leaves the set untouched
        store
            .atomic(vec![KvOp::Del {
                key: session_key("short"),
            }])
            .await
            .unwrap();

        assert!(index.get_session("short").await.is_none());
        // Upper bound, not exact
        assert_eq!(index.get_user_sessions_count(user).await, 2);
        // Only keys that still existed are counted
        assert_eq!(index.delete_user_sessions(user).await, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_uses_default() {
        let index = index().await;
        let user = Uuid::new_v4();

        assert!(index.create_session("z", user, None, Some(0)).await);
        assert!(index.get_session("z").await.is_some());

        // A zero default still yields a TTL the store accepts
        let index = SessionIndex::with_store(Arc::new(MemoryKvStore::new()), 0);
        assert!(index.create_session("y", user, None, None).await);
        assert!(index.get_session("y").await.is_some());
    }

    #[tokio::test]
    async fn test_extend_session() {
        let index = index().await;
        let user = Uuid::new_v4();
        assert!(index.create_session("s1", user, None, Some(60)).await);

        assert!(index.extend_session("s1", 3600).await);
        assert!(!index.extend_session("missing", 3600).await);
        assert!(index.get_session("s1").await.is_some());
    }

    #[tokio::test]
    async fn test_degraded_mode_when_unreachable() {
        let index = SessionIndex::connect(Arc::new(UnreachableStore), 1800).await;
        let user = Uuid::new_v4();

        assert!(!index.is_connected());
        assert!(!index.create_session("s1", user, None, None).await);
        assert!(index.get_session("s1").await.is_none());
        assert!(!index.delete_session("s1").await);
        assert_eq!(index.delete_user_sessions(user).await, 0);
        assert!(!index.extend_session("s1", 60).await);
        assert_eq!(index.get_user_sessions_count(user).await, 0);
    }

    #[tokio::test]
    async fn test_backend_errors_become_safe_defaults() {
        let index = SessionIndex::connect(Arc::new(FailingStore), 1800).await;
        let user = Uuid::new_v4();

        assert!(index.is_connected());
        assert!(!index.create_session("s1", user, None, None).await);
        assert!(index.get_session("s1").await.is_none());
        assert!(!index.delete_session("s1").await);
        assert_eq!(index.delete_user_sessions(user).await, 0);
        assert!(!index.extend_session("s1", 60).await);
        assert_eq!(index.get_user_sessions_count(user).await, 0);
    }

    #[tokio::test]
    async fn test_ping_reflects_connection() {
        assert!(index().await.ping().await.is_ok());
        assert_eq!(
            SessionIndex::disconnected(60).ping().await,
            Err("not connected".to_string())
        );
    }

    #[tokio::test]
    async fn test_disconnected_from_config_without_url() {
        let config = AppConfig::default();
        let index = SessionIndex::from_config(&config).await;
        assert!(!index.is_connected());
    }
}
