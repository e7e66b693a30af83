//! In-memory key-value store with TTL support

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{KeyValueStore, KvError, KvOp};

#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Process-local [`KeyValueStore`] for tests and local runs
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_slots<T>(&self, f: impl FnOnce(&mut HashMap<String, Slot>) -> T) -> Result<T, KvError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| KvError::Backend("memory store lock poisoned".to_string()))?;
        let now = Instant::now();
        slots.retain(|_, slot| slot.is_live(now));
        Ok(f(&mut slots))
    }
}

fn apply(slots: &mut HashMap<String, Slot>, op: KvOp) -> i64 {
    match op {
        KvOp::SetEx {
            key,
            value,
            ttl_secs,
        } => {
            slots.insert(
                key,
                Slot {
                    entry: Entry::Str(value),
                    expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
                },
            );
            1
        }
        KvOp::Del { key } => i64::from(slots.remove(&key).is_some()),
        KvOp::SAdd { key, member } => {
            let slot = slots.entry(key).or_insert_with(|| Slot {
                entry: Entry::Set(BTreeSet::new()),
                expires_at: None,
            });
            match &mut slot.entry {
                Entry::Set(members) => i64::from(members.insert(member)),
                Entry::Str(_) => 0,
            }
        }
        KvOp::SRem { key, member } => {
            let Some(slot) = slots.get_mut(&key) else {
                return 0;
            };
            let removed = match &mut slot.entry {
                Entry::Set(members) => members.remove(&member),
                Entry::Str(_) => false,
            };
            if matches!(&slot.entry, Entry::Set(members) if members.is_empty()) {
                slots.remove(&key);
            }
            i64::from(removed)
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn ping(&self) -> Result<(), KvError> {
        self.with_slots(|_| ())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.with_slots(|slots| match slots.get(key).map(|s| &s.entry) {
            Some(Entry::Str(value)) => Some(value.clone()),
            _ => None,
        })
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, KvError> {
        self.with_slots(|slots| match slots.get_mut(key) {
            Some(slot) => {
                slot.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
                true
            }
            None => false,
        })
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        self.with_slots(|slots| match slots.get(key).map(|s| &s.entry) {
            Some(Entry::Set(members)) => members.iter().cloned().collect(),
            _ => Vec::new(),
        })
    }

    async fn scard(&self, key: &str) -> Result<u64, KvError> {
        self.with_slots(|slots| match slots.get(key).map(|s| &s.entry) {
            Some(Entry::Set(members)) => members.len() as u64,
            _ => 0,
        })
    }

    async fn atomic(&self, ops: Vec<KvOp>) -> Result<Vec<i64>, KvError> {
        if ops
            .iter()
            .any(|op| matches!(op, KvOp::SetEx { ttl_secs: 0, .. }))
        {
            return Err(KvError::Backend(
                "invalid expire time in 'setex' command".to_string(),
            ));
        }
        // One lock for the whole batch
        self.with_slots(|slots| ops.into_iter().map(|op| apply(slots, op)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_setex_get_and_del() {
        let store = MemoryKvStore::new();
        let replies = store
            .atomic(vec![KvOp::SetEx {
                key: "k".to_string(),
                value: "v".to_string(),
                ttl_secs: 60,
            }])
            .await
            .unwrap();
        assert_eq!(replies, vec![1]);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        let replies = store
            .atomic(vec![
                KvOp::Del { key: "k".to_string() },
                KvOp::Del { key: "k".to_string() },
            ])
            .await
            .unwrap();
        assert_eq!(replies, vec![1, 0]);
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_setex_rejects_batch() {
        let store = MemoryKvStore::new();
        let result = store
            .atomic(vec![
                KvOp::SAdd {
                    key: "s".to_string(),
                    member: "a".to_string(),
                },
                KvOp::SetEx {
                    key: "k".to_string(),
                    value: "v".to_string(),
                    ttl_secs: 0,
                },
            ])
            .await;
        assert!(matches!(result, Err(KvError::Backend(_))));
        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.scard("s").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryKvStore::new();
        let add = |m: &str| KvOp::SAdd {
            key: "s".to_string(),
            member: m.to_string(),
        };
        let replies = store.atomic(vec![add("a"), add("b"), add("a")]).await.unwrap();
        assert_eq!(replies, vec![1, 1, 0]);
        assert_eq!(store.scard("s").await.unwrap(), 2);
        assert_eq!(store.smembers("s").await.unwrap(), vec!["a", "b"]);

        store
            .atomic(vec![KvOp::SRem {
                key: "s".to_string(),
                member: "a".to_string(),
            }])
            .await
            .unwrap();
        assert_eq!(store.smembers("s").await.unwrap(), vec!["b"]);
        assert_eq!(store.scard("missing").await.unwrap(), 0);
    }
}
