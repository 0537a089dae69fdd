use super::{build_blocking, ArchiveBuilder, ArchiveFormat, ArchiveResult};
use crate::{FileSet, Result};
use snafu::prelude::*;
use std::time::Duration;
use tracing::{debug, instrument};

/// Builds a tar archive in memory, one entry per file.
///
/// Uses GNU headers so keys longer than the 100 bytes a ustar header allows are preserved
/// intact.  Every entry has mode 0644 and a zero mtime, so the same files always produce the same
/// archive.
#[derive(Clone, Debug)]
pub struct TarBuilder {
    timeout: Duration,
}

impl TarBuilder {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait::async_trait]
impl ArchiveBuilder for TarBuilder {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Tar
    }

    #[instrument(skip_all, fields(files = files.len(), total_bytes = files.total_bytes()))]
    async fn build(&self, files: FileSet) -> Result<ArchiveResult> {
        let data = build_blocking(ArchiveFormat::Tar, self.timeout, move || write_tar(files)).await?;

        debug!(size = data.len(), "Built tar archive");

        Ok(ArchiveResult::new(ArchiveFormat::Tar, data))
    }
}

fn write_tar(files: FileSet) -> Result<Vec<u8>> {
    let mut builder = ::tar::Builder::new(Vec::new());

    for (key, data) in files {
        let mut header = ::tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);

        // `append_data` fills in the path (emitting a GNU long name entry if needed) and the
        // checksum
        builder
            .append_data(&mut header, &key, &data[..])
            .with_context(|_| crate::error::TarAppendDataSnafu { key: key.clone() })?;
    }

    builder.into_inner().context(crate::error::TarFinishSnafu)
}
