//! Test helpers for reading back the archives the bundler produces, so their contents can be
//! validated against expected test data.
use crate::Result;
use color_eyre::eyre::eyre;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use tempfile::TempDir;

/// Read every file in a zip archive into memory, keyed by its name in the archive
pub fn zip_entries(data: &[u8]) -> Result<HashMap<String, Vec<u8>>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
    let mut entries = HashMap::new();

    println!("Zip archive contents:");
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        if file.is_dir() {
            continue;
        }

        println!("  {} ({} bytes)", file.name(), file.size());

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        if entries.insert(file.name().to_string(), contents).is_some() {
            return Err(eyre!("Zip archive contains '{}' more than once", file.name()));
        }
    }

    Ok(entries)
}

/// Read every regular file in a tar archive into memory, keyed by its path in the archive
pub fn tar_entries(data: &[u8]) -> Result<HashMap<String, Vec<u8>>> {
    let mut archive = tar::Archive::new(data);
    let mut entries = HashMap::new();

    println!("Tar archive contents:");
    for result in archive.entries()? {
        let mut entry = result?;
        if entry.header().entry_type() != tar::EntryType::Regular {
            continue;
        }

        let path = entry.path()?.to_string_lossy().into_owned();
        println!("  {} ({} bytes)", path, entry.size());

        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;

        if entries.insert(path.clone(), contents).is_some() {
            return Err(eyre!("Tar archive contains '{path}' more than once"));
        }
    }

    Ok(entries)
}

/// Extract a zip archive to a temp directory, for tests which care about how the archive unpacks
/// on a real filesystem
pub fn extract_zip_to_temp_dir(data: &[u8]) -> Result<TempDir> {
    let temp_dir = tempfile::Builder::new()
        .prefix("s3pack-testing-zip-")
        .tempdir()?;

    zip::ZipArchive::new(Cursor::new(data))?.extract(temp_dir.path())?;

    Ok(temp_dir)
}

/// List every file (not directory) under `path`, as `/`-separated paths relative to `path`
pub fn list_files(path: &Path) -> Result<Vec<String>> {
    let mut files = walkdir::WalkDir::new(path)
        .into_iter()
        .filter(|result| {
            // Errors are passed through so they get reported
            !matches!(result, Ok(entry) if entry.file_type().is_dir())
        })
        .map(|result| {
            let entry = result?;
            let relative_path = entry.path().strip_prefix(path)?;

            Result::<_>::Ok(
                relative_path
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/"),
            )
        })
        .collect::<Result<Vec<_>>>()?;

    files.sort();

    Ok(files)
}

/// True if `path` is a directory with nothing in it
pub fn is_empty_dir(path: &Path) -> Result<bool> {
    Ok(std::fs::read_dir(path)?.next().is_none())
}
