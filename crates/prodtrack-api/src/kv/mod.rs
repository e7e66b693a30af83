//! Key-value store abstraction used by the session index
//!
//! Only the handful of string and set commands the index needs, plus an
//! atomic batch that runs as one MULTI/EXEC transaction.

use async_trait::async_trait;
use thiserror::Error;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod redis_store;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryKvStore;
pub use redis_store::RedisStore;

/// Key-value backend errors
#[derive(Debug, Error)]
pub enum KvError {
    #[error("Key-value backend error: {0}")]
    Backend(String),

    #[error("Key-value operation timed out")]
    Timeout,
}

/// One write inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    /// SETEX: set a string with a TTL
    SetEx {
        key: String,
        value: String,
        ttl_secs: u64,
    },
    /// DEL: remove a key of any type
    Del { key: String },
    /// SADD: add a member to a set
    SAdd { key: String, member: String },
    /// SREM: remove a member from a set
    SRem { key: String, member: String },
}

/// Minimal async key-value store
///
/// Implementations must be safe to share across concurrent requests.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn ping(&self) -> Result<(), KvError>;

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Reset a key's TTL; false when the key does not exist
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, KvError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError>;

    async fn scard(&self, key: &str) -> Result<u64, KvError>;

    /// Run all ops in one transaction
    ///
    /// Returns one integer reply per op: 1 for SETEX, and the number of keys
    /// or members affected for DEL, SADD and SREM.
    async fn atomic(&self, ops: Vec<KvOp>) -> Result<Vec<i64>, KvError>;
}
