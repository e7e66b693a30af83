//! Redis-backed key-value store
//!
//! Uses a shared `ConnectionManager`, which reconnects on its own and is
//! cheap to clone per call. Every command is bounded by a response timeout.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisResult, Value};
use std::future::Future;
use std::time::Duration;

use super::{KeyValueStore, KvError, KvOp};

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        KvError::Backend(err.to_string())
    }
}

/// Redis implementation of [`KeyValueStore`]
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    response_timeout: Duration,
}

impl RedisStore {
    /// Open a managed connection to `url`
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Self, KvError> {
        let client = redis::Client::open(url)?;
        let manager = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| KvError::Timeout)??;

        Ok(Self {
            manager,
            response_timeout,
        })
    }

    async fn bounded<T>(&self, fut: impl Future<Output = RedisResult<T>>) -> Result<T, KvError> {
        tokio::time::timeout(self.response_timeout, fut)
            .await
            .map_err(|_| KvError::Timeout)?
            .map_err(KvError::from)
    }
}

fn reply_to_int(value: &Value) -> i64 {
    match value {
        Value::Int(n) => *n,
        Value::Okay => 1,
        _ => 0,
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn ping(&self) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        let _: String = self.bounded(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        self.bounded(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, KvError> {
        let mut conn = self.manager.clone();
        let updated: i64 = self
            .bounded(redis::cmd("EXPIRE").arg(key).arg(ttl_secs).query_async(&mut conn))
            .await?;
        Ok(updated == 1)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.manager.clone();
        self.bounded(redis::cmd("SMEMBERS").arg(key).query_async(&mut conn))
            .await
    }

    async fn scard(&self, key: &str) -> Result<u64, KvError> {
        let mut conn = self.manager.clone();
        self.bounded(redis::cmd("SCARD").arg(key).query_async(&mut conn))
            .await
    }

    async fn atomic(&self, ops: Vec<KvOp>) -> Result<Vec<i64>, KvError> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                KvOp::SetEx {
                    key,
                    value,
                    ttl_secs,
                } => pipe.cmd("SETEX").arg(key).arg(*ttl_secs).arg(value),
                KvOp::Del { key } => pipe.cmd("DEL").arg(key),
                KvOp::SAdd { key, member } => pipe.cmd("SADD").arg(key).arg(member),
                KvOp::SRem { key, member } => pipe.cmd("SREM").arg(key).arg(member),
            };
        }

        let mut conn = self.manager.clone();
        let replies: Vec<Value> = self.bounded(pipe.query_async(&mut conn)).await?;
        Ok(replies.iter().map(reply_to_int).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_mapping() {
        assert_eq!(reply_to_int(&Value::Int(3)), 3);
        assert_eq!(reply_to_int(&Value::Okay), 1);
        assert_eq!(reply_to_int(&Value::Nil), 0);
    }

    #[tokio::test]
    #[ignore = "requires redis"]
    async fn test_atomic_batch_against_redis() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let store = RedisStore::connect(&url, Duration::from_secs(5), Duration::from_secs(5))
            .await
            .unwrap();
        store.ping().await.unwrap();

        let replies = store
            .atomic(vec![
                KvOp::SetEx {
                    key: "prodtrack:test:k".to_string(),
                    value: "v".to_string(),
                    ttl_secs: 30,
                },
                KvOp::SAdd {
                    key: "prodtrack:test:s".to_string(),
                    member: "m".to_string(),
                },
            ])
            .await
            .unwrap();
        assert_eq!(replies[0], 1);
        assert_eq!(store.get("prodtrack:test:k").await.unwrap().as_deref(), Some("v"));

        store
            .atomic(vec![
                KvOp::Del {
                    key: "prodtrack:test:k".to_string(),
                },
                KvOp::Del {
                    key: "prodtrack:test:s".to_string(),
                },
            ])
            .await
            .unwrap();
    }
}
