//! Turning a [`FileSet`] into a single archive.
//!
//! There are several interchangeable strategies, each implementing [`ArchiveBuilder`]:
//!
//! - [`IsoBuilder`] stages the files on disk and runs an external ISO 9660 mastering tool
//! - [`ZipBuilder`] writes a zip archive entirely in memory
//! - [`TarBuilder`] writes a tar archive entirely in memory
//!
//! Which one is used is controlled by [`Config::archive_format`].
use crate::{Config, FileSet, Result};
use bytes::Bytes;
use dyn_clone::DynClone;
use std::time::Duration;

mod iso;
mod tar;
mod zip;

pub use self::iso::IsoBuilder;
pub use self::tar::TarBuilder;
pub use self::zip::ZipBuilder;

/// The kinds of archive that can be produced
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ArchiveFormat {
    /// ISO 9660 disk image with Rock Ridge and Joliet extensions
    #[default]
    Iso,

    /// Zip archive
    Zip,

    /// POSIX tar archive (GNU flavor)
    Tar,
}

impl ArchiveFormat {
    /// The file name suggested to clients downloading an archive of this format
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Iso => "files.iso",
            Self::Zip => "files.zip",
            Self::Tar => "files.tar",
        }
    }

    /// The precise media type of this format
    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Iso => "application/x-iso9660-image",
            Self::Zip => "application/zip",
            Self::Tar => "application/x-tar",
        }
    }
}

/// A complete archive, ready to be sent to a client
#[derive(Clone, Debug)]
pub struct ArchiveResult {
    pub data: Bytes,
    pub format: ArchiveFormat,
    pub media_type: &'static str,
    pub file_name: &'static str,
}

impl ArchiveResult {
    pub(crate) fn new(format: ArchiveFormat, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            format,
            media_type: format.media_type(),
            file_name: format.file_name(),
        }
    }
}

/// A strategy for turning a set of files into one archive.
///
/// Every file in the [`FileSet`] becomes exactly one member of the archive, named by its key, so
/// keys containing `/` produce nested directories.  Implementations must not leave anything
/// behind on disk, whether they succeed or fail.
#[async_trait::async_trait]
pub trait ArchiveBuilder: DynClone + std::fmt::Debug + Sync + Send + 'static {
    fn format(&self) -> ArchiveFormat;

    async fn build(&self, files: FileSet) -> Result<ArchiveResult>;
}

dyn_clone::clone_trait_object!(ArchiveBuilder);

/// Construct the archive builder selected by the config
pub fn builder_for_config(config: &Config) -> Box<dyn ArchiveBuilder> {
    match config.archive_format {
        ArchiveFormat::Iso => Box::new(IsoBuilder::from_config(config)),
        ArchiveFormat::Zip => Box::new(ZipBuilder::new(config.build_timeout())),
        ArchiveFormat::Tar => Box::new(TarBuilder::new(config.build_timeout())),
    }
}

/// Run a blocking archive writer on the blocking thread pool, subject to a deadline.
///
/// If the deadline passes the caller gets an error right away, but the blocking thread can't be
/// interrupted and will run to completion in the background.
async fn build_blocking<F>(format: ArchiveFormat, timeout: Duration, f: F) -> Result<Vec<u8>>
where
    F: FnOnce() -> Result<Vec<u8>> + Send + 'static,
{
    use snafu::ResultExt;

    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(result) => result.context(crate::error::SpawnBlockingSnafu)?,
        Err(_) => crate::error::ArchiveBuildTimeoutSnafu { format, timeout }.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn format_names() {
        assert_eq!("iso", ArchiveFormat::Iso.to_string());
        assert_eq!(ArchiveFormat::Zip, ArchiveFormat::from_str("zip").unwrap());
        assert_eq!(ArchiveFormat::Tar, ArchiveFormat::from_str("tar").unwrap());
        assert!(ArchiveFormat::from_str("rar").is_err());
        assert_eq!(ArchiveFormat::Iso, ArchiveFormat::default());
    }

    #[test]
    fn builder_follows_config() {
        for format in [ArchiveFormat::Iso, ArchiveFormat::Zip, ArchiveFormat::Tar] {
            let config = Config {
                archive_format: format,
                ..Config::for_bucket("test")
            };

            assert_eq!(format, builder_for_config(&config).format());
        }
    }

    #[test]
    fn result_metadata_matches_format() {
        let result = ArchiveResult::new(ArchiveFormat::Zip, vec![1, 2, 3]);

        assert_eq!("files.zip", result.file_name);
        assert_eq!("application/zip", result.media_type);
        assert_eq!(3, result.data.len());
    }
}
