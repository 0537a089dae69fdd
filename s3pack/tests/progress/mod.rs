//! Test helper that implements [`s3pack::ProgressCallback`] which keeps a record of every progress
//! update in order so we can write tests that verify progress reporting.
use s3pack::{ArchiveFormat, ProgressCallback, S3PackError, Stage};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq, Eq, strum::EnumDiscriminants)]
#[strum_discriminants(derive(Hash))]
pub(crate) enum ProgressEvent {
    StageStarted { stage: Stage },
    ObjectsListed { count: usize },
    ObjectFetched { key: String, size: usize },
    ObjectFailed { key: String, kind: s3pack::ErrorKind },
    ArchiveBuilt { format: ArchiveFormat, files: usize, size: usize },
}

#[derive(Clone, Default)]
pub(crate) struct TestProgressCallback {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl TestProgressCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_of(&self, kind: ProgressEventDiscriminants) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|event| ProgressEventDiscriminants::from(event) == kind)
            .collect()
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::StageStarted { stage } => Some(stage),
                _ => None,
            })
            .collect()
    }

    /// Keys of the objects reported as fetched, sorted
    pub fn fetched_keys(&self) -> Vec<String> {
        let mut keys = self
            .events_of(ProgressEventDiscriminants::ObjectFetched)
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::ObjectFetched { key, .. } => Some(key),
                _ => None,
            })
            .collect::<Vec<_>>();
        keys.sort();

        keys
    }

    /// Keys of the objects reported as failed, sorted
    pub fn failed_keys(&self) -> Vec<String> {
        let mut keys = self
            .events_of(ProgressEventDiscriminants::ObjectFailed)
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::ObjectFailed { key, .. } => Some(key),
                _ => None,
            })
            .collect::<Vec<_>>();
        keys.sort();

        keys
    }

    fn record(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ProgressCallback for TestProgressCallback {
    fn stage_started(&self, stage: Stage) {
        self.record(ProgressEvent::StageStarted { stage });
    }

    fn objects_listed(&self, count: usize) {
        self.record(ProgressEvent::ObjectsListed { count });
    }

    fn object_fetched(&self, key: &str, size: usize) {
        self.record(ProgressEvent::ObjectFetched {
            key: key.to_string(),
            size,
        });
    }

    fn object_failed(&self, key: &str, error: &S3PackError) {
        self.record(ProgressEvent::ObjectFailed {
            key: key.to_string(),
            kind: error.kind(),
        });
    }

    fn archive_built(&self, format: ArchiveFormat, files: usize, size: usize) {
        self.record(ProgressEvent::ArchiveBuilt {
            format,
            files,
            size,
        });
    }
}
