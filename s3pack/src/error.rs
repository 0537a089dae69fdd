use crate::ArchiveFormat;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::{
    get_object::GetObjectError, head_bucket::HeadBucketError,
    list_objects_v2::ListObjectsV2Error,
};
use snafu::prelude::*;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T, E = S3PackError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum S3PackError {
    #[snafu(display("No bucket name was specified"))]
    MissingBucket,

    #[snafu(display(
        "The S3 bucket '{bucket}' either doesn't exist, or your IAM identity is not granted access"
    ))]
    BucketInvalidOrNotAccessible {
        bucket: String,
        source: SdkError<HeadBucketError>,
    },

    #[snafu(display("Error listing objects in S3 bucket '{bucket}'"))]
    ListObjectsInBucket {
        bucket: String,
        source: SdkError<ListObjectsV2Error>,
    },

    #[snafu(display("Error listing objects in bucket '{bucket}': {message}"))]
    ListObjects { bucket: String, message: String },

    #[snafu(display(
        "Listing bucket '{bucket}' returned the continuation token '{token}' twice in a row"
    ))]
    ListContinuationLoop { bucket: String, token: String },

    #[snafu(display("Error getting object '{key}' from S3 bucket '{bucket}'"))]
    GetObject {
        bucket: String,
        key: String,
        source: SdkError<GetObjectError>,
    },

    #[snafu(display("Error reading data of object '{key}' in S3 bucket '{bucket}'"))]
    ReadByteStream {
        bucket: String,
        key: String,
        source: aws_sdk_s3::primitives::ByteStreamError,
    },

    #[snafu(display("Error reading object '{key}' from bucket '{bucket}': {message}"))]
    ReadObject {
        bucket: String,
        key: String,
        message: String,
    },

    #[snafu(display("Retrieving object '{key}' did not complete within {timeout:?}"))]
    FetchTimeout { key: String, timeout: Duration },

    #[snafu(display("The task retrieving object '{key}' panicked or was cancelled"))]
    FetchTaskFailed {
        key: String,
        source: tokio::task::JoinError,
    },

    #[snafu(display(
        "None of the {attempted} object(s) listed in bucket '{bucket}' could be retrieved, so there is nothing to archive"
    ))]
    EmptyResult { bucket: String, attempted: usize },

    #[snafu(display("Error creating the staging area for the archive"))]
    CreateStagingDir { source: std::io::Error },

    #[snafu(display(
        "Object key '{key}' can't be represented as a file path inside the archive"
    ))]
    InvalidStagingPath { key: String },

    #[snafu(display("Error writing staged file '{}'", path.display()))]
    WriteStagedFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("The mastering tool '{}' could not be found", tool.display()))]
    MasteringToolNotFound { tool: PathBuf, source: which::Error },

    #[snafu(display("Error running the mastering tool '{}'", tool.display()))]
    SpawnMasteringTool {
        tool: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("The mastering tool '{}' failed ({status}), output:\n{output}", tool.display()))]
    MasteringToolFailed {
        tool: PathBuf,
        status: String,
        output: String,
    },

    #[snafu(display("Error reading the image file '{}' produced by the mastering tool", path.display()))]
    ReadImage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Error adding object '{key}' to the zip archive"))]
    ZipStartFile {
        key: String,
        source: zip::result::ZipError,
    },

    #[snafu(display("Error writing data of object '{key}' to the zip archive"))]
    ZipWriteData {
        key: String,
        source: std::io::Error,
    },

    #[snafu(display("Error finalizing the zip archive"))]
    ZipFinish { source: zip::result::ZipError },

    #[snafu(display("Error adding object '{key}' to the tar archive"))]
    TarAppendData {
        key: String,
        source: std::io::Error,
    },

    #[snafu(display("Error finalizing the tar archive"))]
    TarFinish { source: std::io::Error },

    #[snafu(display("Building the {format} archive did not complete within {timeout:?}"))]
    ArchiveBuildTimeout {
        format: ArchiveFormat,
        timeout: Duration,
    },

    #[snafu(display("The blocking task building the archive panicked or was cancelled"))]
    SpawnBlocking { source: tokio::task::JoinError },
}

/// The broad class of an [`S3PackError`].
///
/// Callers which need to react to failures (for example the HTTP boundary) should match on this
/// rather than on individual error variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
pub enum ErrorKind {
    /// The bucket could not be listed.  Fatal to the request.
    ListError,

    /// A single object could not be retrieved.  Never fatal; the object is omitted.
    DownloadError,

    /// No objects at all could be retrieved.  Fatal to the request.
    EmptyResultError,

    /// Staging, the mastering tool, or an in-memory archive writer failed.  Fatal to the request.
    ArchiveBuildError,

    /// The object storage client could not be set up.  Fatal to process startup.
    ClientInitError,
}

impl S3PackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingBucket { .. } | Self::BucketInvalidOrNotAccessible { .. } => {
                ErrorKind::ClientInitError
            }

            Self::ListObjectsInBucket { .. }
            | Self::ListObjects { .. }
            | Self::ListContinuationLoop { .. } => ErrorKind::ListError,

            Self::GetObject { .. }
            | Self::ReadByteStream { .. }
            | Self::ReadObject { .. }
            | Self::FetchTimeout { .. }
            | Self::FetchTaskFailed { .. } => ErrorKind::DownloadError,

            Self::EmptyResult { .. } => ErrorKind::EmptyResultError,

            Self::CreateStagingDir { .. }
            | Self::InvalidStagingPath { .. }
            | Self::WriteStagedFile { .. }
            | Self::MasteringToolNotFound { .. }
            | Self::SpawnMasteringTool { .. }
            | Self::MasteringToolFailed { .. }
            | Self::ReadImage { .. }
            | Self::ZipStartFile { .. }
            | Self::ZipWriteData { .. }
            | Self::ZipFinish { .. }
            | Self::TarAppendData { .. }
            | Self::TarFinish { .. }
            | Self::ArchiveBuildTimeout { .. }
            | Self::SpawnBlocking { .. } => ErrorKind::ArchiveBuildError,
        }
    }

    /// The error message followed by the messages of every error in its source chain.
    ///
    /// The AWS SDK errors in particular have a terse `Display` impl with the useful information
    /// buried a few levels down the chain.
    pub fn detail(&self) -> String {
        let mut detail = self.to_string();
        let mut source = std::error::Error::source(self);

        while let Some(error) = source {
            detail.push_str(": ");
            detail.push_str(&error.to_string());
            source = error.source();
        }

        detail
    }
}
