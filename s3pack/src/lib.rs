//! Bundle every object in an S3 bucket into a single downloadable archive.
//!
//! The work is done by a [`BundleJob`], which for each run:
//!
//! 1. lists every key in the bucket, following continuation tokens ([`list_all_keys`]),
//! 2. retrieves the objects concurrently with a bounded number of requests in flight, a deadline
//!    per attempt and a limited number of retries ([`FetcherPool`]),
//! 3. collects whatever was retrieved into a [`FileSet`]; objects which could not be retrieved are
//!    logged and left out ([`Aggregator`]),
//! 4. turns the [`FileSet`] into an ISO 9660 image, zip or tar archive ([`ArchiveBuilder`]).
//!
//! Object storage is reached through the [`Bucket`] trait.  [`connect_s3_bucket`] provides the S3
//! implementation, and [`MemoryBucket`] an in-memory one which is handy for testing.

mod aggregate;
mod archive;
mod bundle;
mod config;
mod error;
mod fetch;
mod list;
mod objstore;

pub use aggregate::{Aggregator, FileSet};
pub use archive::{
    builder_for_config, ArchiveBuilder, ArchiveFormat, ArchiveResult, IsoBuilder, TarBuilder,
    ZipBuilder,
};
pub use bundle::{BundleJob, ProgressCallback, Stage};
pub use config::Config;
pub use error::{ErrorKind, Result, S3PackError};
pub use fetch::{fetch_object, FetchOutcome, FetchPolicy, FetcherPool};
pub use list::list_all_keys;
pub use objstore::{connect_s3_bucket, Bucket, ListPage, MemoryBucket, ReadStats};
