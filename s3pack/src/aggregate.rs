//! Collects the outcomes of the concurrent retrievals into a single [`FileSet`].
//!
//! The [`FileSet`] is owned by exactly one [`Aggregator`], and every retrieval task hands its
//! outcome to it over a channel, so no lock is ever taken on the set of retrieved files.
use crate::bundle::ProgressCallback;
use crate::fetch::FetchOutcome;
use crate::Result;
use bytes::Bytes;
use futures::StreamExt;
use snafu::prelude::*;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// The objects that were retrieved successfully, keyed by object key.
///
/// Iteration is always in key order, so the same set of objects produces the same archive.
///
/// Only the [`Aggregator`] can add files; once it hands the set off it is effectively frozen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileSet {
    files: BTreeMap<String, Bytes>,
}

impl FileSet {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Bytes> {
        self.files.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(|key| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.files.iter().map(|(key, data)| (key.as_str(), data))
    }

    /// Combined size of the data of every file
    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|data| data.len() as u64).sum()
    }

    /// Add a file, unless one with the same key is already present.
    ///
    /// Returns `false` if the key was already present, in which case the existing data is kept.
    pub(crate) fn insert(&mut self, key: String, data: Bytes) -> bool {
        use std::collections::btree_map::Entry;

        match self.files.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(data);
                true
            }
            Entry::Occupied(_) => false,
        }
    }
}

impl FromIterator<(String, Bytes)> for FileSet {
    fn from_iter<T: IntoIterator<Item = (String, Bytes)>>(iter: T) -> Self {
        let mut files = Self::default();
        for (key, data) in iter {
            files.insert(key, data);
        }

        files
    }
}

impl IntoIterator for FileSet {
    type Item = (String, Bytes);
    type IntoIter = std::collections::btree_map::IntoIter<String, Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

/// The single owner of the [`FileSet`] being assembled for one request.
#[derive(Debug)]
pub struct Aggregator {
    bucket: String,
    outcomes: ReceiverStream<(String, FetchOutcome)>,
    files: FileSet,
    attempted: usize,
    failed: usize,
}

impl Aggregator {
    pub fn new(bucket: impl Into<String>, outcomes: mpsc::Receiver<(String, FetchOutcome)>) -> Self {
        Self {
            bucket: bucket.into(),
            outcomes: ReceiverStream::new(outcomes),
            files: FileSet::default(),
            attempted: 0,
            failed: 0,
        }
    }

    /// Consume outcomes until every sender has been dropped.
    ///
    /// Failed retrievals are logged and reported, then forgotten.
    pub async fn drain<P: ProgressCallback + ?Sized>(&mut self, progress: &P) {
        while let Some((key, outcome)) = self.outcomes.next().await {
            self.attempted += 1;

            match outcome {
                FetchOutcome::Success(data) => {
                    let size = data.len();
                    if self.files.insert(key.clone(), data) {
                        progress.object_fetched(&key, size);
                    } else {
                        warn!(%key, "Object was retrieved more than once; keeping the first copy");
                    }
                }
                FetchOutcome::Failure(e) => {
                    self.failed += 1;
                    warn!(%key, kind = %e.kind(), error = %e.detail(), "Object could not be retrieved and will be omitted from the archive");
                    progress.object_failed(&key, &e);
                }
            }
        }

        debug!(
            bucket = %self.bucket,
            attempted = self.attempted,
            failed = self.failed,
            retrieved = self.files.len(),
            "All retrieval outcomes received"
        );
    }

    /// Hand off the completed [`FileSet`].
    ///
    /// Fails if not a single object was retrieved, because an empty archive is never a useful
    /// result.
    pub fn finish(self) -> Result<FileSet> {
        ensure!(
            !self.files.is_empty(),
            crate::error::EmptyResultSnafu {
                bucket: self.bucket,
                attempted: self.attempted,
            }
        );

        Ok(self.files)
    }
}
