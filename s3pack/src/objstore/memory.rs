//! An in-process [`Bucket`] implementation that holds its objects in memory.
//!
//! Useful for exercising the bundling pipeline without a real object store, including simulating
//! the failure modes a real one exhibits: listing errors, failed, flaky and hung retrievals, and
//! slow reads.
use super::{Bucket, ListPage};
use crate::Result;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Counters describing the reads performed against a [`MemoryBucket`] and all of its clones.
#[derive(Debug, Default)]
pub struct ReadStats {
    reads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ReadStats {
    /// Total number of `read_object` calls, including failed and retried ones
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `read_object` calls running right now
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// The highest number of `read_object` calls that were ever running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn start_read(self: &Arc<Self>) -> InFlightGuard {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        InFlightGuard {
            stats: self.clone(),
        }
    }
}

/// Decrements the in-flight count when a read finishes, including when the read future is
/// dropped because it timed out
struct InFlightGuard {
    stats: Arc<ReadStats>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Debug)]
pub struct MemoryBucket {
    name: String,
    objects: Arc<BTreeMap<String, Bytes>>,
    page_size: usize,
    list_error: Option<String>,
    failing_keys: HashSet<String>,
    hanging_keys: HashSet<String>,

    /// Keys which fail a certain number of times before they succeed, and the number of failures
    /// left for each
    flaky_keys: Arc<Mutex<HashMap<String, usize>>>,
    read_delay: Duration,
    stats: Arc<ReadStats>,
}

impl MemoryBucket {
    pub fn new<K, V>(name: impl Into<String>, objects: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Bytes>,
    {
        Self {
            name: name.into(),
            objects: Arc::new(
                objects
                    .into_iter()
                    .map(|(key, data)| (key.into(), data.into()))
                    .collect(),
            ),
            page_size: 1000,
            list_error: None,
            failing_keys: HashSet::new(),
            hanging_keys: HashSet::new(),
            flaky_keys: Default::default(),
            read_delay: Duration::ZERO,
            stats: Default::default(),
        }
    }

    /// Maximum number of keys returned per listing page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        assert!(page_size > 0, "BUG: page size must be at least 1");
        self.page_size = page_size;
        self
    }

    /// Every listing call fails with this message
    pub fn with_list_error(mut self, message: impl Into<String>) -> Self {
        self.list_error = Some(message.into());
        self
    }

    /// Every read of `key` fails as if the network dropped
    pub fn with_failing_key(mut self, key: impl Into<String>) -> Self {
        self.failing_keys.insert(key.into());
        self
    }

    /// Reads of `key` never complete
    pub fn with_hanging_key(mut self, key: impl Into<String>) -> Self {
        self.hanging_keys.insert(key.into());
        self
    }

    /// The first `failures` reads of `key` fail, the ones after that succeed
    pub fn with_flaky_key(self, key: impl Into<String>, failures: usize) -> Self {
        self.flaky_keys
            .lock()
            .unwrap()
            .insert(key.into(), failures);
        self
    }

    /// Every read takes at least this long
    pub fn with_read_delay(mut self, read_delay: Duration) -> Self {
        self.read_delay = read_delay;
        self
    }

    pub fn stats(&self) -> &ReadStats {
        &self.stats
    }

    fn read_error(&self, key: &str) -> crate::S3PackError {
        crate::error::ReadObjectSnafu {
            bucket: self.name.clone(),
            key: key.to_string(),
            message: "simulated network error",
        }
        .build()
    }
}

#[async_trait::async_trait]
impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_objects_page(&self, continuation_token: Option<String>) -> Result<ListPage> {
        if let Some(message) = &self.list_error {
            return crate::error::ListObjectsSnafu {
                bucket: self.name.clone(),
                message: message.clone(),
            }
            .fail();
        }

        // The continuation token is the offset of the first key on the page
        let offset = match continuation_token {
            None => 0,
            Some(token) => token.parse::<usize>().map_err(|_| {
                crate::error::ListObjectsSnafu {
                    bucket: self.name.clone(),
                    message: format!("invalid continuation token '{token}'"),
                }
                .build()
            })?,
        };

        let keys = self
            .objects
            .keys()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .collect::<Vec<_>>();

        let next_offset = offset + keys.len();
        let continuation_token = if next_offset < self.objects.len() {
            Some(next_offset.to_string())
        } else {
            None
        };

        debug!(bucket = %self.name, offset, keys = keys.len(), ?continuation_token, "Listed page of in-memory objects");

        Ok(ListPage {
            keys,
            continuation_token,
        })
    }

    async fn read_object(&self, key: String) -> Result<Bytes> {
        let _guard = self.stats.start_read();

        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }

        if self.hanging_keys.contains(&key) {
            std::future::pending::<()>().await;
        }

        if self.failing_keys.contains(&key) {
            return Err(self.read_error(&key));
        }

        {
            let mut flaky_keys = self.flaky_keys.lock().unwrap();
            if let Some(failures) = flaky_keys.get_mut(&key) {
                if *failures > 0 {
                    *failures -= 1;
                    return Err(self.read_error(&key));
                }
            }
        }

        self.objects.get(&key).cloned().ok_or_else(|| {
            crate::error::ReadObjectSnafu {
                bucket: self.name.clone(),
                key: key.clone(),
                message: "no such key",
            }
            .build()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pages_cover_all_keys() {
        let bucket = MemoryBucket::new("test", [("a", "1"), ("b", "2"), ("c", "3")]).with_page_size(2);

        let first = bucket.list_objects_page(None).await.unwrap();
        assert_eq!(vec!["a", "b"], first.keys);
        assert_eq!(Some("2".to_string()), first.continuation_token);

        let second = bucket
            .list_objects_page(first.continuation_token)
            .await
            .unwrap();
        assert_eq!(vec!["c"], second.keys);
        assert_eq!(None, second.continuation_token);
    }

    #[tokio::test]
    async fn flaky_key_recovers() {
        let bucket = MemoryBucket::new("test", [("a", "1")]).with_flaky_key("a", 2);

        assert!(bucket.read_object("a".to_string()).await.is_err());
        assert!(bucket.read_object("a".to_string()).await.is_err());
        assert_eq!(
            Bytes::from_static(b"1"),
            bucket.read_object("a".to_string()).await.unwrap()
        );
        assert_eq!(3, bucket.stats().reads());
    }

    #[tokio::test]
    async fn clones_share_stats() {
        let bucket = MemoryBucket::new("test", [("a", "1")]);
        let clone = bucket.clone();

        clone.read_object("a".to_string()).await.unwrap();

        assert_eq!(1, bucket.stats().reads());
        assert_eq!(1, bucket.stats().max_in_flight());
    }
}
