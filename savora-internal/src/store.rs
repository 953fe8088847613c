use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use backon::{ExponentialBuilder, Retryable};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, ErrorDetails};

/// Compare-and-swap over a single document key. The empty-string sentinel for
/// ARGV[1] means "expect the key to be absent"; documents are JSON and never
/// empty, so the sentinel cannot collide with a real value.
const CAS_SCRIPT: &str = r"
    local current = redis.call('GET', KEYS[1])
    if ARGV[1] == '' then
        if current == false then
            redis.call('SET', KEYS[1], ARGV[2])
            return 1
        end
        return 0
    end
    if current == ARGV[1] then
        redis.call('SET', KEYS[1], ARGV[2])
        return 1
    end
    return 0
";

/// Client for the shared persistent document store.
///
/// All cross-request coordination goes through this client; handlers are
/// stateless and hold no cross-request memory. Tests construct the `Mock`
/// variant so no component ever reaches for a process-wide singleton.
#[derive(Clone)]
pub enum StoreClient {
    Production {
        conn: MultiplexedConnection,
        cas_script: Script,
    },
    Mock {
        data: Arc<Mutex<MockStoreData>>,
        healthy: bool,
    },
}

#[derive(Debug, Default)]
pub struct MockStoreData {
    docs: HashMap<String, String>,
    lists: HashMap<String, Vec<String>>,
}

impl StoreClient {
    pub async fn new(url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url).map_err(|e| {
            Error::new(ErrorDetails::StoreConnection {
                message: format!("Failed to create store client: {e}"),
            })
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::StoreConnection {
                    message: format!("Failed to connect to document store: {e}"),
                })
            })?;
        Ok(Self::Production {
            conn,
            cas_script: Script::new(CAS_SCRIPT),
        })
    }

    pub fn new_mock() -> Self {
        Self::Mock {
            data: Arc::new(Mutex::new(MockStoreData::default())),
            healthy: true,
        }
    }

    pub async fn healthy(&self) -> bool {
        match self {
            Self::Production { conn, .. } => {
                let mut conn = conn.clone();
                redis::cmd("PING")
                    .query_async::<String>(&mut conn)
                    .await
                    .is_ok()
            }
            Self::Mock { healthy, .. } => *healthy,
        }
    }

    pub async fn get_raw(&self, key: &str) -> Result<Option<String>, Error> {
        match self {
            Self::Production { conn, .. } => {
                let mut conn = conn.clone();
                conn.get::<_, Option<String>>(key).await.map_err(|e| {
                    Error::new(ErrorDetails::StoreQuery {
                        message: format!("GET {key}: {e}"),
                    })
                })
            }
            Self::Mock { data, .. } => {
                #[expect(clippy::expect_used)]
                let data = data.lock().expect("Mutex poisoned");
                Ok(data.docs.get(key).cloned())
            }
        }
    }

    pub async fn put_raw(&self, key: &str, value: &str) -> Result<(), Error> {
        match self {
            Self::Production { conn, .. } => {
                let mut conn = conn.clone();
                conn.set::<_, _, ()>(key, value).await.map_err(|e| {
                    Error::new(ErrorDetails::StoreQuery {
                        message: format!("SET {key}: {e}"),
                    })
                })
            }
            Self::Mock { data, .. } => {
                #[expect(clippy::expect_used)]
                let mut data = data.lock().expect("Mutex poisoned");
                data.docs.insert(key.to_string(), value.to_string());
                Ok(())
            }
        }
    }

    /// Atomically replace `key` only if its current value matches `expected`
    /// (`None` = key must be absent). Returns false on conflict.
    pub async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, Error> {
        match self {
            Self::Production { conn, cas_script } => {
                let mut conn = conn.clone();
                let swapped: i64 = cas_script
                    .key(key)
                    .arg(expected.unwrap_or(""))
                    .arg(new)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| {
                        Error::new(ErrorDetails::StoreQuery {
                            message: format!("CAS {key}: {e}"),
                        })
                    })?;
                Ok(swapped == 1)
            }
            Self::Mock { data, .. } => {
                #[expect(clippy::expect_used)]
                let mut data = data.lock().expect("Mutex poisoned");
                if data.docs.get(key).map(String::as_str) == expected {
                    data.docs.insert(key.to_string(), new.to_string());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        match self.get_raw(key).await? {
            Some(raw) => {
                let value = serde_json::from_str(&raw).map_err(|e| {
                    Error::new(ErrorDetails::Serialization {
                        message: format!("Malformed document at `{key}`: {e}"),
                    })
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), Error> {
        let raw = serde_json::to_string(value).map_err(|e| {
            Error::new(ErrorDetails::Serialization {
                message: e.to_string(),
            })
        })?;
        self.put_raw(key, &raw).await
    }

    /// Optimistic read-modify-write with retry-on-conflict.
    ///
    /// Reads the document at `key`, applies `update`, and writes the result
    /// back only if the document was not changed by a concurrent writer in
    /// the meantime; conflicts retry with exponential backoff. Exhausted
    /// retries fail closed with `StoreConflict`.
    pub async fn update_json_with_retry<T, F>(&self, key: &str, update: F) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(Option<T>) -> T,
    {
        let attempt = || async {
            let current_raw = self.get_raw(key).await?;
            let current: Option<T> = match &current_raw {
                Some(raw) => Some(serde_json::from_str(raw).map_err(|e| {
                    Error::new(ErrorDetails::Serialization {
                        message: format!("Malformed document at `{key}`: {e}"),
                    })
                })?),
                None => None,
            };
            let updated = update(current);
            let new_raw = serde_json::to_string(&updated).map_err(|e| {
                Error::new(ErrorDetails::Serialization {
                    message: e.to_string(),
                })
            })?;
            if self
                .compare_and_swap(key, current_raw.as_deref(), &new_raw)
                .await?
            {
                Ok(updated)
            } else {
                // Retried below; only logged if retries exhaust
                Err(Error::new_without_logging(ErrorDetails::StoreConflict {
                    key: key.to_string(),
                }))
            }
        };

        let result = attempt
            .retry(ExponentialBuilder::default().with_max_times(4))
            .when(|e: &Error| matches!(e.get_details(), ErrorDetails::StoreConflict { .. }))
            .await;

        match result {
            Err(e) if matches!(e.get_details(), ErrorDetails::StoreConflict { .. }) => {
                e.log();
                Err(e)
            }
            other => other,
        }
    }

    pub async fn list_push_front(&self, key: &str, item: &str) -> Result<(), Error> {
        match self {
            Self::Production { conn, .. } => {
                let mut conn = conn.clone();
                conn.lpush::<_, _, ()>(key, item).await.map_err(|e| {
                    Error::new(ErrorDetails::StoreQuery {
                        message: format!("LPUSH {key}: {e}"),
                    })
                })
            }
            Self::Mock { data, .. } => {
                #[expect(clippy::expect_used)]
                let mut data = data.lock().expect("Mutex poisoned");
                data.lists
                    .entry(key.to_string())
                    .or_default()
                    .insert(0, item.to_string());
                Ok(())
            }
        }
    }

    /// First `limit` entries of a list index, most recent first.
    pub async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>, Error> {
        match self {
            Self::Production { conn, .. } => {
                let mut conn = conn.clone();
                conn.lrange::<_, Vec<String>>(key, 0, limit.saturating_sub(1) as isize)
                    .await
                    .map_err(|e| {
                        Error::new(ErrorDetails::StoreQuery {
                            message: format!("LRANGE {key}: {e}"),
                        })
                    })
            }
            Self::Mock { data, .. } => {
                #[expect(clippy::expect_used)]
                let data = data.lock().expect("Mutex poisoned");
                Ok(data
                    .lists
                    .get(key)
                    .map(|items| items.iter().take(limit).cloned().collect())
                    .unwrap_or_default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Counter {
        count: u32,
    }

    #[tokio::test]
    async fn test_cas_requires_matching_value() {
        let store = StoreClient::new_mock();
        assert!(store.compare_and_swap("k", None, "a").await.unwrap());
        // Stale expectation loses
        assert!(!store.compare_and_swap("k", None, "b").await.unwrap());
        assert!(!store.compare_and_swap("k", Some("x"), "b").await.unwrap());
        assert!(store.compare_and_swap("k", Some("a"), "b").await.unwrap());
        assert_eq!(store.get_raw("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_update_json_with_retry_creates_and_increments() {
        let store = StoreClient::new_mock();
        let created = store
            .update_json_with_retry("counter", |current: Option<Counter>| match current {
                Some(c) => Counter { count: c.count + 1 },
                None => Counter { count: 1 },
            })
            .await
            .unwrap();
        assert_eq!(created, Counter { count: 1 });

        let updated = store
            .update_json_with_retry("counter", |current: Option<Counter>| match current {
                Some(c) => Counter { count: c.count + 1 },
                None => Counter { count: 1 },
            })
            .await
            .unwrap();
        assert_eq!(updated, Counter { count: 2 });
    }

    #[tokio::test]
    async fn test_list_range_is_most_recent_first() {
        let store = StoreClient::new_mock();
        store.list_push_front("idx", "a").await.unwrap();
        store.list_push_front("idx", "b").await.unwrap();
        store.list_push_front("idx", "c").await.unwrap();
        assert_eq!(store.list_range("idx", 2).await.unwrap(), vec!["c", "b"]);
    }
}
