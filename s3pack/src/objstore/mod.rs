use crate::{Config, Result};
use dyn_clone::DynClone;

mod memory;
mod s3;

pub use memory::{MemoryBucket, ReadStats};

/// One page of a bucket listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Keys of the objects on this page
    pub keys: Vec<String>,

    /// Opaque token to pass to the next [`Bucket::list_objects_page`] call to get the next page.
    ///
    /// `None` means this was the last page.
    pub continuation_token: Option<String>,
}

/// A bucket which is like a namespace in which object storage systems store named objects.
///
/// This is the entire surface of object storage that the bundling pipeline depends on, so the S3
/// implementation can be swapped for something else (like [`MemoryBucket`] in tests) without the
/// pipeline knowing.
///
/// Note that all implementations are trivially cloneable such that the cost of a clone is the cost
/// of increasing the ref count on an `Arc`
#[async_trait::async_trait]
pub trait Bucket: DynClone + std::fmt::Debug + Sync + Send + 'static {
    fn name(&self) -> &str;

    /// List one page of the objects in the bucket.
    ///
    /// Pass `None` to get the first page, and the `continuation_token` of the previous page to
    /// get each subsequent page.
    async fn list_objects_page(&self, continuation_token: Option<String>) -> Result<ListPage>;

    /// Read the entire contents of an object in one operation.
    async fn read_object(&self, key: String) -> Result<bytes::Bytes>;
}

dyn_clone::clone_trait_object!(Bucket);

/// Construct the S3 client described by `config` and verify it can access the configured bucket.
///
/// This is meant to be called once at startup, with the resulting bucket shared by every request.
/// Any failure here is a `ClientInitError`.
pub async fn connect_s3_bucket(config: &Config) -> Result<Box<dyn Bucket>> {
    Ok(Box::new(s3::S3Bucket::new(config).await?))
}
