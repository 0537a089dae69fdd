use crate::ArchiveFormat;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// The configuration settings that control which bucket is bundled and how the bundle is built.
///
/// All of these are fixed for the lifetime of the process; nothing here can be changed on a
/// per-request basis.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct Config {
    /// The S3 bucket whose objects are bundled into the archive.
    #[cfg_attr(feature = "clap", clap(long, value_name = "BUCKET"))]
    pub bucket: String,

    /// The AWS region the bucket is located in.
    ///
    /// If not set, the region is deduced from the environment, falling back to `us-east-1`.  If
    /// the bucket turns out to be in a different region, the correct region is detected
    /// automatically when the bucket is first accessed.
    #[cfg_attr(feature = "clap", clap(long, value_name = "REGION"))]
    pub aws_region: Option<String>,

    /// Explicit access key ID to use instead of the credentials found in the environment.
    ///
    /// Only used if `aws_secret_access_key` is also set.
    #[cfg_attr(feature = "clap", clap(long, requires = "aws_secret_access_key"))]
    pub aws_access_key_id: Option<String>,

    /// Explicit secret access key to use instead of the credentials found in the environment.
    #[cfg_attr(feature = "clap", clap(long, requires = "aws_access_key_id"))]
    pub aws_secret_access_key: Option<String>,

    /// Use a custom S3 endpoint instead of AWS.
    ///
    /// Use this to operate on a non-Amazon S3-compatible service.  Path-style addressing is used
    /// when this is set.
    #[cfg_attr(feature = "clap", clap(long, value_name = "URL"))]
    pub s3_endpoint: Option<Url>,

    /// Maximum number of keys requested per page when listing the bucket.
    ///
    /// If not set the service default (1000 for S3) applies.  Mostly useful for testing
    /// pagination.
    #[cfg_attr(feature = "clap", clap(long, value_name = "KEYS"))]
    pub list_page_size: Option<i32>,

    /// The maximum number of concurrent object retrievals.
    ///
    /// Objects beyond this limit are queued until a retrieval slot becomes free.
    #[cfg_attr(feature = "clap", clap(long, default_value = "10"))]
    pub max_concurrent_requests: usize,

    /// Deadline in seconds for a single attempt to retrieve one object.
    ///
    /// An attempt which exceeds the deadline is treated like any other retrieval failure.
    #[cfg_attr(feature = "clap", clap(long, default_value = "60", value_name = "SECONDS"))]
    pub fetch_timeout_secs: u64,

    /// How many times a failed object retrieval is retried before the object is given up on and
    /// omitted from the archive.
    #[cfg_attr(feature = "clap", clap(long, default_value = "2"))]
    pub fetch_retries: usize,

    /// The format of the archive to produce.
    #[cfg_attr(feature = "clap", clap(long, value_enum, default_value_t = ArchiveFormat::Iso))]
    pub archive_format: ArchiveFormat,

    /// The ISO 9660 mastering tool to invoke when `archive_format` is `iso`.
    ///
    /// Any tool accepting `genisoimage`-compatible arguments (`-o`, `-R`, `-J`) works, for example
    /// `genisoimage`, `mkisofs` or `xorrisofs`.  Either a bare name which is looked up in `PATH`,
    /// or a path to the executable.
    #[cfg_attr(feature = "clap", clap(long, default_value = "genisoimage", value_name = "PATH"))]
    pub mastering_tool: PathBuf,

    /// Directory beneath which request-scoped staging directories and intermediate image files
    /// are created.  Defaults to the system temporary directory.
    #[cfg_attr(feature = "clap", clap(long, value_name = "DIR"))]
    pub staging_dir: Option<PathBuf>,

    /// Deadline in seconds for building the archive once all objects have been retrieved.
    ///
    /// For ISO images this covers staging the files, running the mastering tool and reading the
    /// image back.
    #[cfg_attr(feature = "clap", clap(long, default_value = "300", value_name = "SECONDS"))]
    pub build_timeout_secs: u64,
}

impl Config {
    /// Default config for a particular bucket
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        // XXX: Unfortunately this is duplicated here and in the `clap` attributes, unfortunately I
        // can't find a better way unless we unconditionally take a clap dependency in the lib
        // crate which I'm not willing to do
        Self {
            bucket: String::new(),
            aws_region: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            s3_endpoint: None,
            list_page_size: None,
            max_concurrent_requests: 10,
            fetch_timeout_secs: 60,
            fetch_retries: 2,
            archive_format: ArchiveFormat::Iso,
            mastering_tool: PathBuf::from("genisoimage"),
            staging_dir: None,
            build_timeout_secs: 300,
        }
    }
}
