//! ISO 9660 images, produced by an external mastering tool like `genisoimage`.
//!
//! The tool works on a directory tree, so every request gets its own staging directory into which
//! the files are written before the tool is run on it.  Empty "folder" objects, whose keys end in
//! `/`, are staged as directories.  The staging directory and the image file
//! are both temporary and are removed when the build finishes, whether it succeeds or not.
use super::{ArchiveBuilder, ArchiveFormat, ArchiveResult};
use crate::{Config, FileSet, Result};
use bytes::Bytes;
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

#[derive(Clone, Debug)]
pub struct IsoBuilder {
    /// Name or path of the mastering tool
    tool: PathBuf,

    /// Where staging directories and image files are created; the system temp dir if `None`
    staging_dir: Option<PathBuf>,

    timeout: Duration,
}

impl IsoBuilder {
    pub fn new(tool: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            tool: tool.into(),
            staging_dir: None,
            timeout,
        }
    }

    pub fn with_staging_dir(mut self, staging_dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(staging_dir.into());
        self
    }

    pub(super) fn from_config(config: &Config) -> Self {
        Self {
            tool: config.mastering_tool.clone(),
            staging_dir: config.staging_dir.clone(),
            timeout: config.build_timeout(),
        }
    }

    fn temp_builder(prefix: &'static str, suffix: &'static str) -> tempfile::Builder<'static, 'static> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix).suffix(suffix);

        builder
    }

    /// Create the directory the files will be written to
    fn create_staging_dir(&self) -> Result<tempfile::TempDir> {
        let builder = Self::temp_builder("s3pack-staging-", "");

        match &self.staging_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .context(crate::error::CreateStagingDirSnafu)
    }

    /// Reserve a unique path for the tool to write the image to.
    ///
    /// The file is created empty; the tool overwrites it.
    fn reserve_image_path(&self) -> Result<tempfile::TempPath> {
        let builder = Self::temp_builder("s3pack-image-", ".iso");

        let file = match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .context(crate::error::CreateStagingDirSnafu)?;

        Ok(file.into_temp_path())
    }

    fn timed_out(&self) -> crate::S3PackError {
        crate::error::ArchiveBuildTimeoutSnafu {
            format: ArchiveFormat::Iso,
            timeout: self.timeout,
        }
        .build()
    }

    /// Write every staged entry beneath `staging`
    async fn stage(&self, staging: &Path, entries: Vec<(StagedEntry, &Bytes)>) -> Result<()> {
        for (entry, data) in entries {
            match entry {
                StagedEntry::Dir(relative_path) => {
                    let path = staging.join(relative_path);

                    tokio::fs::create_dir_all(&path)
                        .await
                        .with_context(|_| crate::error::WriteStagedFileSnafu { path: &path })?;
                }
                StagedEntry::File(relative_path) => {
                    let path = staging.join(relative_path);

                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .with_context(|_| crate::error::WriteStagedFileSnafu { path: parent })?;
                    }

                    tokio::fs::write(&path, data)
                        .await
                        .with_context(|_| crate::error::WriteStagedFileSnafu { path: &path })?;
                }
            }
        }

        Ok(())
    }

    /// Run the tool to completion, or until the deadline passes in which case it's killed
    async fn run_tool(
        &self,
        tool: &Path,
        image: &Path,
        staging: &Path,
        deadline: Instant,
    ) -> Result<()> {
        debug!(tool = %tool.display(), image = %image.display(), staging = %staging.display(), "Running mastering tool");

        let expression = duct::cmd!(tool, "-o", image, "-R", "-J", staging)
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked();

        let handle = Arc::new(
            expression
                .start()
                .with_context(|_| crate::error::SpawnMasteringToolSnafu { tool })?,
        );

        // `wait` blocks, so do it on a thread where that's allowed.  The handle is shared so it
        // can still be killed from here if the deadline passes.
        let waiter = handle.clone();
        let wait = tokio::task::spawn_blocking(move || waiter.wait().map(|output| output.clone()));

        let output = match tokio::time::timeout_at(deadline, wait).await {
            Ok(result) => result
                .context(crate::error::SpawnBlockingSnafu)?
                .with_context(|_| crate::error::SpawnMasteringToolSnafu { tool })?,
            Err(_) => {
                warn!(tool = %tool.display(), timeout = ?self.timeout, "Mastering tool did not finish in time; killing it");

                if let Err(e) = handle.kill() {
                    warn!(err = ?e, "Error killing mastering tool process");
                }

                return Err(self.timed_out());
            }
        };

        let combined_output = String::from_utf8_lossy(&output.stdout);

        ensure!(
            output.status.success(),
            crate::error::MasteringToolFailedSnafu {
                tool,
                status: output.status.to_string(),
                output: combined_output.trim_end(),
            }
        );

        debug!(output = %combined_output.trim_end(), "Mastering tool finished successfully");

        Ok(())
    }
}

#[async_trait::async_trait]
impl ArchiveBuilder for IsoBuilder {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Iso
    }

    #[instrument(skip_all, fields(files = files.len(), total_bytes = files.total_bytes()))]
    async fn build(&self, files: FileSet) -> Result<ArchiveResult> {
        // Staging, the tool and reading the image back all share this one deadline
        let deadline = Instant::now() + self.timeout;

        let tool = which::which(&self.tool).with_context(|_| {
            crate::error::MasteringToolNotFoundSnafu {
                tool: self.tool.clone(),
            }
        })?;

        // Check every key before touching the filesystem.  A key which can't be staged would be
        // missing from the image.
        let entries = files
            .iter()
            .map(|(key, data)| Ok((staged_entry(key, data)?, data)))
            .collect::<Result<Vec<_>>>()?;

        // On any early return these are removed when dropped
        let staging = self.create_staging_dir()?;

        debug!(staging = %staging.path().display(), "Staging files");

        tokio::time::timeout_at(deadline, self.stage(staging.path(), entries))
            .await
            .map_err(|_| self.timed_out())??;

        let image_path = self.reserve_image_path()?;

        self.run_tool(&tool, &image_path, staging.path(), deadline)
            .await?;

        let data = tokio::time::timeout_at(deadline, tokio::fs::read(&image_path))
            .await
            .map_err(|_| self.timed_out())?
            .with_context(|_| crate::error::ReadImageSnafu {
                path: image_path.to_path_buf(),
            })?;

        debug!(size = data.len(), "Built ISO image");

        // Both of these would be removed on drop anyway, but that would swallow any error
        if let Err(e) = staging.close() {
            warn!(err = ?e, "Error removing staging directory");
        }
        if let Err(e) = image_path.close() {
            warn!(err = ?e, "Error removing image file");
        }

        Ok(ArchiveResult::new(ArchiveFormat::Iso, data))
    }
}

/// What an object turns into inside the staging directory, at a path relative to it
#[derive(Debug, PartialEq, Eq)]
enum StagedEntry {
    File(PathBuf),

    /// An empty object whose key ends in `/`.  S3 consoles create these as "folder" placeholders.
    Dir(PathBuf),
}

/// Map the object `key` holding `data` to its place in the staging directory.
///
/// Keys with empty, `.` or `..` segments, or a leading `/`, would escape the staging directory or
/// collide with another entry, so they're rejected.  A single trailing `/` is allowed only on an
/// empty object, which becomes a directory.
fn staged_entry(key: &str, data: &[u8]) -> Result<StagedEntry> {
    let (path, is_dir) = match key.strip_suffix('/') {
        Some(path) => (path, true),
        None => (key, false),
    };

    let valid = !path.is_empty()
        && !path.starts_with('/')
        && !(is_dir && !data.is_empty())
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");

    ensure!(valid, crate::error::InvalidStagingPathSnafu { key });

    let relative_path = path.split('/').collect();

    Ok(if is_dir {
        StagedEntry::Dir(relative_path)
    } else {
        StagedEntry::File(relative_path)
    })
}
