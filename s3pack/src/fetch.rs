//! Concurrent retrieval of object data.
//!
//! Every key is retrieved in its own spawned task so retrievals run in parallel, but no more than
//! [`FetchPolicy::max_concurrent_requests`] tasks exist at any one time.  The outcome of each
//! retrieval, success or failure, is sent over a channel to whoever is aggregating the results.
use crate::objstore::Bucket;
use crate::{Config, S3PackError};
use bytes::Bytes;
use futures::StreamExt;
use snafu::IntoError;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn, Instrument};

/// Delay before the first retry of a failed retrieval.  Doubles with each subsequent retry.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on the delay between retries
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// The result of retrieving a single object.
///
/// A failure is not fatal to anything; the object is just left out of the archive.
#[derive(Debug)]
pub enum FetchOutcome {
    Success(Bytes),
    Failure(S3PackError),
}

/// Controls how hard [`FetcherPool`] works to retrieve each object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Maximum number of retrievals in progress at the same time
    pub max_concurrent_requests: usize,

    /// Deadline for each individual attempt
    pub fetch_timeout: Duration,

    /// Number of retries after the first attempt fails
    pub fetch_retries: usize,
}

impl From<&Config> for FetchPolicy {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrent_requests: config.max_concurrent_requests,
            fetch_timeout: config.fetch_timeout(),
            fetch_retries: config.fetch_retries,
        }
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        (&Config::default()).into()
    }
}

#[derive(Clone, Debug)]
pub struct FetcherPool {
    bucket: Box<dyn Bucket>,
    policy: FetchPolicy,
}

impl FetcherPool {
    pub fn new(bucket: Box<dyn Bucket>, policy: FetchPolicy) -> Self {
        Self { bucket, policy }
    }

    /// Retrieve every object in `keys`, sending each outcome to `outcomes` as soon as it's known.
    ///
    /// Returns only once every retrieval has either succeeded or failed.  `outcomes` is dropped
    /// at that point, so the receiving end sees the channel close exactly when the last outcome
    /// has been delivered.
    pub async fn fetch_all(
        &self,
        keys: Vec<String>,
        outcomes: mpsc::Sender<(String, FetchOutcome)>,
    ) {
        let total = keys.len();
        debug!(bucket = %self.bucket.name(), total, max_concurrent_requests = self.policy.max_concurrent_requests, "Retrieving objects");

        let fetch_futs = keys.into_iter().map(|key| {
            let bucket = self.bucket.clone();
            let policy = self.policy.clone();
            let span = tracing::debug_span!("fetch object", %key);

            async move {
                // Spawning here instead of up front means a task exists only once the stream
                // below has a free slot for it
                let mut task = AbortOnDrop(tokio::spawn(
                    {
                        let key = key.clone();
                        async move { fetch_object(bucket.as_ref(), &key, &policy).await }
                    }
                    .instrument(span),
                ));

                let outcome = match (&mut task.0).await {
                    Ok(outcome) => outcome,
                    Err(e) => FetchOutcome::Failure(
                        crate::error::FetchTaskFailedSnafu { key: key.clone() }.into_error(e),
                    ),
                };

                (key, outcome)
            }
        });

        // `buffer_unordered` polls at most this many of the futures at a time, which is what
        // bounds the concurrency
        let mut results = futures::stream::iter(fetch_futs)
            .buffer_unordered(self.policy.max_concurrent_requests.max(1));

        let mut completed = 0usize;
        while let Some(result) = results.next().await {
            completed += 1;

            if outcomes.send(result).await.is_err() {
                // The receiver was dropped, which probably means the request was abandoned.
                // Dropping `results` on the way out aborts the retrievals still in progress
                debug!("outcomes channel is closed; abandoning remaining retrievals");
                break;
            }
        }

        debug!(completed, total, "All retrievals finished");
    }
}

/// Aborts the task if dropped before it completes, so that retrievals nobody is waiting for any
/// more don't keep running in the background
struct AbortOnDrop<T>(tokio::task::JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Retrieve a single object, retrying failed attempts according to the policy.
///
/// Each attempt is subject to the policy's deadline, and an attempt that exceeds it is handled
/// like any other failure.
pub async fn fetch_object(bucket: &dyn Bucket, key: &str, policy: &FetchPolicy) -> FetchOutcome {
    let retry_policy = again::RetryPolicy::exponential(RETRY_BASE_DELAY)
        .with_max_retries(policy.fetch_retries)
        .with_max_delay(RETRY_MAX_DELAY);

    let mut attempt = 0usize;

    let result = retry_policy
        .retry(|| {
            attempt += 1;
            let attempt = attempt;

            async move {
                let result = match tokio::time::timeout(
                    policy.fetch_timeout,
                    bucket.read_object(key.to_string()),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => crate::error::FetchTimeoutSnafu {
                        key,
                        timeout: policy.fetch_timeout,
                    }
                    .fail(),
                };

                if let Err(e) = &result {
                    warn!(%key, attempt, error = %e.detail(), "Attempt to retrieve object failed");
                }

                result
            }
        })
        .await;

    match result {
        Ok(data) => {
            debug!(%key, size = data.len(), "Retrieved object");
            FetchOutcome::Success(data)
        }
        Err(e) => FetchOutcome::Failure(e),
    }
}
