//! Bundling a bucket into an archive, from listing through to the finished archive.
//!
//! A [`BundleJob`] is created once, usually at startup, and then [`BundleJob::run`] is called
//! once per request.  Each run lists the bucket, retrieves every object concurrently, collects
//! whatever was retrieved into a [`FileSet`], and builds the archive from it.
//!
//! Callers who want to follow along can pass an implementation of [`ProgressCallback`].
use crate::aggregate::Aggregator;
use crate::archive::{builder_for_config, ArchiveBuilder, ArchiveFormat, ArchiveResult};
use crate::fetch::{FetchPolicy, FetcherPool};
use crate::objstore::Bucket;
use crate::{Config, FileSet, Result, S3PackError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

/// The stages a bundling run passes through, in order
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum Stage {
    Listing,
    Fetching,
    Aggregating,
    Building,
    Done,
}

/// A trait which callers can implement to get progress updates as a bundling run proceeds.
///
/// Every method has a default no-op implementation so implementors only need the ones they care
/// about.  Methods are called from whichever task the event happens on, so implementations should
/// be quick.
#[allow(unused_variables)]
pub trait ProgressCallback: Sync + Send {
    fn stage_started(&self, stage: Stage) {}

    /// The bucket listing completed
    fn objects_listed(&self, count: usize) {}

    /// An object was retrieved and will be included in the archive
    fn object_fetched(&self, key: &str, size: usize) {}

    /// An object could not be retrieved, even after retrying, and will be left out of the archive
    fn object_failed(&self, key: &str, error: &S3PackError) {}

    fn archive_built(&self, format: ArchiveFormat, files: usize, size: usize) {}
}

/// A [`ProgressCallback`] that ignores every update
pub(crate) struct NoProgress;

impl ProgressCallback for NoProgress {}

/// A reusable job which bundles the contents of one bucket into an archive.
///
/// The job holds no per-run state, so any number of runs may be in progress at once.
#[derive(Clone, Debug)]
pub struct BundleJob {
    bucket: Box<dyn Bucket>,
    policy: FetchPolicy,
    archive_builder: Box<dyn ArchiveBuilder>,
}

impl BundleJob {
    /// Create a job for `bucket`, configured according to `config`.
    ///
    /// The bucket is passed in rather than constructed here, so that the caller controls how (and
    /// how often) the object storage client is set up.
    pub fn new(config: &Config, bucket: Box<dyn Bucket>) -> Self {
        Self {
            bucket,
            policy: config.into(),
            archive_builder: builder_for_config(config),
        }
    }

    /// Replace the archive builder chosen by the config
    pub fn with_archive_builder(mut self, archive_builder: Box<dyn ArchiveBuilder>) -> Self {
        self.archive_builder = archive_builder;
        self
    }

    pub fn bucket_name(&self) -> &str {
        self.bucket.name()
    }

    pub fn archive_format(&self) -> ArchiveFormat {
        self.archive_builder.format()
    }

    /// Alternative to [`Self::run`] which doesn't require a [`ProgressCallback`] implementation,
    /// for callers that do not care about progress information.
    pub async fn run_without_progress(&self) -> Result<ArchiveResult> {
        self.run(&NoProgress).await
    }

    /// Run the job once, returning the finished archive.
    ///
    /// Objects which can't be retrieved are left out of the archive.  Everything else that can go
    /// wrong, including retrieving nothing at all, fails the run.
    #[instrument(skip_all, fields(bucket = %self.bucket.name(), format = %self.archive_builder.format()))]
    pub async fn run<P: ProgressCallback + ?Sized>(&self, progress: &P) -> Result<ArchiveResult> {
        let result = self.run_stages(progress).await;

        match &result {
            Ok(archive) => {
                progress.stage_started(Stage::Done);
                info!(size = archive.data.len(), file_name = %archive.file_name, "Bundle complete");
            }
            Err(e) => {
                error!(kind = %e.kind(), error = %e.detail(), "Bundle failed");
            }
        }

        result
    }

    async fn run_stages<P: ProgressCallback + ?Sized>(&self, progress: &P) -> Result<ArchiveResult> {
        progress.stage_started(Stage::Listing);
        let keys = crate::list_all_keys(self.bucket.as_ref()).await?;
        progress.objects_listed(keys.len());

        let files = self.fetch_and_aggregate(keys, progress).await?;

        progress.stage_started(Stage::Building);
        let file_count = files.len();
        let archive = self.archive_builder.build(files).await?;
        progress.archive_built(archive.format, file_count, archive.data.len());

        Ok(archive)
    }

    /// Retrieve all of `keys` and collect the results.
    ///
    /// The pool and the aggregator run at the same time, connected by a channel.  The pool drops
    /// its end of the channel only after every retrieval has finished, so once both futures have
    /// completed every outcome has been accounted for.
    async fn fetch_and_aggregate<P: ProgressCallback + ?Sized>(
        &self,
        keys: Vec<String>,
        progress: &P,
    ) -> Result<FileSet> {
        progress.stage_started(Stage::Fetching);

        let pool = FetcherPool::new(self.bucket.clone(), self.policy.clone());
        let (sender, receiver) = mpsc::channel(self.policy.max_concurrent_requests.max(1));
        let mut aggregator = Aggregator::new(self.bucket.name(), receiver);

        debug!(objects = keys.len(), "Retrieving and aggregating objects");

        tokio::join!(
            pool.fetch_all(keys, sender),
            aggregator.drain(progress)
        );

        progress.stage_started(Stage::Aggregating);

        aggregator.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ZipBuilder;
    use crate::objstore::MemoryBucket;
    use crate::ErrorKind;
    use assert_matches::assert_matches;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct StageRecorder {
        stages: Mutex<Vec<Stage>>,
    }

    impl ProgressCallback for StageRecorder {
        fn stage_started(&self, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }
    }

    fn zip_job(bucket: MemoryBucket) -> BundleJob {
        BundleJob::new(&Config::for_bucket(bucket.name()), Box::new(bucket))
            .with_archive_builder(Box::new(ZipBuilder::new(Duration::from_secs(30))))
    }

    #[tokio::test]
    async fn stages_run_in_order() {
        let job = zip_job(MemoryBucket::new("test", [("a.txt", "A")]));
        let progress = StageRecorder::default();

        job.run(&progress).await.unwrap();

        assert_eq!(
            vec![
                Stage::Listing,
                Stage::Fetching,
                Stage::Aggregating,
                Stage::Building,
                Stage::Done
            ],
            *progress.stages.lock().unwrap()
        );
    }

    #[tokio::test]
    async fn failed_run_never_reaches_done() {
        let job = zip_job(MemoryBucket::new("test", [("a.txt", "A")]).with_list_error("boom"));
        let progress = StageRecorder::default();

        let error = job.run(&progress).await.unwrap_err();

        assert_eq!(ErrorKind::ListError, error.kind());
        assert_eq!(vec![Stage::Listing], *progress.stages.lock().unwrap());
    }

    #[tokio::test]
    async fn empty_bucket_is_empty_result() {
        let job = zip_job(MemoryBucket::new("test", Vec::<(String, Vec<u8>)>::new()));

        assert_matches!(
            job.run_without_progress().await,
            Err(S3PackError::EmptyResult { attempted: 0, .. })
        );
    }

    #[tokio::test]
    async fn format_follows_config() {
        let config = Config {
            archive_format: ArchiveFormat::Tar,
            ..Config::for_bucket("test")
        };
        let job = BundleJob::new(&config, Box::new(MemoryBucket::new("test", [("a", "A")])));

        assert_eq!(ArchiveFormat::Tar, job.archive_format());
        assert_eq!("test", job.bucket_name());

        let archive = job.run_without_progress().await.unwrap();
        assert_eq!("files.tar", archive.file_name);
    }

    #[tokio::test]
    async fn concurrent_runs_share_a_job() {
        let job = zip_job(MemoryBucket::new("test", [("a", "A"), ("b", "B")]));

        let (first, second) = tokio::join!(job.run_without_progress(), job.run_without_progress());

        assert_eq!(first.unwrap().data, second.unwrap().data);
    }
}
