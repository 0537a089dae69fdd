//! Progress reporting for bundling runs, written to the log
use s3pack::{ArchiveFormat, ProgressCallback, S3PackError, Stage};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info};

/// Logs the progress of one bundling run, and keeps a tally so the summary at the end of the run
/// can say how much was retrieved and how much was left out.
#[derive(Debug, Default)]
pub(crate) struct LogProgress {
    listed: AtomicUsize,
    fetched: AtomicUsize,
    fetched_bytes: AtomicU64,
    failed: AtomicUsize,
}

impl LogProgress {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

impl ProgressCallback for LogProgress {
    fn stage_started(&self, stage: Stage) {
        debug!(%stage, "Bundling stage started");
    }

    fn objects_listed(&self, count: usize) {
        self.listed.store(count, Ordering::SeqCst);

        info!(objects = count, "Listed bucket");
    }

    fn object_fetched(&self, key: &str, size: usize) {
        let fetched = self.fetched.fetch_add(1, Ordering::SeqCst) + 1;
        self.fetched_bytes.fetch_add(size as u64, Ordering::SeqCst);

        debug!(
            key,
            size,
            fetched,
            listed = self.listed.load(Ordering::SeqCst),
            "Object retrieved"
        );
    }

    fn object_failed(&self, key: &str, error: &S3PackError) {
        self.failed.fetch_add(1, Ordering::SeqCst);

        debug!(key, kind = %error.kind(), "Object omitted");
    }

    fn archive_built(&self, format: ArchiveFormat, files: usize, size: usize) {
        info!(
            %format,
            files,
            size,
            retrieved_bytes = self.fetched_bytes.load(Ordering::SeqCst),
            omitted = self.failed(),
            "Archive built"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tallies() {
        let progress = LogProgress::new();
        let error = s3pack::S3PackError::MissingBucket;

        progress.objects_listed(3);
        progress.object_fetched("a", 10);
        progress.object_fetched("b", 5);
        progress.object_failed("c", &error);

        assert_eq!(2, progress.fetched.load(Ordering::SeqCst));
        assert_eq!(15, progress.fetched_bytes.load(Ordering::SeqCst));
        assert_eq!(1, progress.failed());
    }
}
