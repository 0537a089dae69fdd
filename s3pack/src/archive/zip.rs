use super::{build_blocking, ArchiveBuilder, ArchiveFormat, ArchiveResult};
use crate::{FileSet, Result};
use snafu::prelude::*;
use std::io::{Cursor, Write};
use std::time::Duration;
use tracing::{debug, instrument};

/// Builds a zip archive in memory, one entry per file.
///
/// Entries are compressed with deflate and carry a fixed timestamp, so the same files always
/// produce the same archive.
#[derive(Clone, Debug)]
pub struct ZipBuilder {
    timeout: Duration,
}

impl ZipBuilder {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait::async_trait]
impl ArchiveBuilder for ZipBuilder {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    #[instrument(skip_all, fields(files = files.len(), total_bytes = files.total_bytes()))]
    async fn build(&self, files: FileSet) -> Result<ArchiveResult> {
        let data = build_blocking(ArchiveFormat::Zip, self.timeout, move || write_zip(files)).await?;

        debug!(size = data.len(), "Built zip archive");

        Ok(ArchiveResult::new(ArchiveFormat::Zip, data))
    }
}

fn write_zip(files: FileSet) -> Result<Vec<u8>> {
    let mut writer = ::zip::ZipWriter::new(Cursor::new(Vec::new()));

    for (key, data) in files {
        let options = ::zip::write::FileOptions::default()
            .last_modified_time(::zip::DateTime::default())
            .large_file(data.len() as u64 >= u32::MAX as u64);

        writer
            .start_file(key.as_str(), options)
            .with_context(|_| crate::error::ZipStartFileSnafu { key: key.clone() })?;
        writer
            .write_all(&data)
            .with_context(|_| crate::error::ZipWriteDataSnafu { key: key.clone() })?;
    }

    let cursor = writer.finish().context(crate::error::ZipFinishSnafu)?;

    Ok(cursor.into_inner())
}
