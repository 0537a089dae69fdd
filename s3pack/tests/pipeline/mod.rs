//! End-to-end tests of bundling, from listing a bucket through to the finished archive.
//!
//! These use [`s3pack::MemoryBucket`] so they can simulate every failure mode without a real
//! object store.
use crate::{progress::TestProgressCallback, Result};
use assert_matches::assert_matches;
use more_asserts::*;
use s3pack::{
    ArchiveFormat, ArchiveResult, BundleJob, Config, ErrorKind, MemoryBucket, S3PackError, Stage,
};
use s3pack_testing::{archive, logging::*, test_data};
use std::collections::HashMap;
use std::time::Duration;

fn config(format: ArchiveFormat) -> Config {
    Config {
        archive_format: format,
        fetch_timeout_secs: 5,
        fetch_retries: 0,
        ..Config::for_bucket("test")
    }
}

fn job(bucket: &MemoryBucket, format: ArchiveFormat) -> BundleJob {
    BundleJob::new(&config(format), Box::new(bucket.clone()))
}

/// Read back the archive's entries, whichever in-memory format it's in
fn entries(archive: &ArchiveResult) -> Result<HashMap<String, Vec<u8>>> {
    match archive.format {
        ArchiveFormat::Zip => archive::zip_entries(&archive.data),
        ArchiveFormat::Tar => archive::tar_entries(&archive.data),
        ArchiveFormat::Iso => panic!("BUG: ISO images can't be read back in tests"),
    }
}

fn sample_bucket() -> MemoryBucket {
    MemoryBucket::new(
        "test",
        [
            ("a.txt", b"hello".to_vec()),
            ("b/b.txt", b"nested".to_vec()),
            ("c.bin", vec![0u8, 1, 2, 3, 255]),
        ],
    )
}

#[test]
fn every_object_becomes_one_member() -> Result<()> {
    test_with_logging(async move {
        for format in [ArchiveFormat::Zip, ArchiveFormat::Tar] {
            let archive = job(&sample_bucket(), format).run_without_progress().await?;
            let entries = entries(&archive)?;

            assert_eq!(format, archive.format);
            assert_eq!(3, entries.len(), "{format}");
            assert_eq!(b"hello".to_vec(), entries["a.txt"]);
            assert_eq!(b"nested".to_vec(), entries["b/b.txt"]);
            assert_eq!(vec![0u8, 1, 2, 3, 255], entries["c.bin"]);
        }

        Ok(())
    })
}

#[test]
fn nested_keys_unpack_into_directories() -> Result<()> {
    test_with_logging(async move {
        let archive = job(&sample_bucket(), ArchiveFormat::Zip)
            .run_without_progress()
            .await?;

        let dir = archive::extract_zip_to_temp_dir(&archive.data)?;

        assert_eq!(
            vec!["a.txt", "b/b.txt", "c.bin"],
            archive::list_files(dir.path())?
        );
        assert!(dir.path().join("b").is_dir());

        Ok(())
    })
}

#[test]
fn empty_bucket_is_empty_result() -> Result<()> {
    test_with_logging(async move {
        let bucket = MemoryBucket::new("test", Vec::<(String, Vec<u8>)>::new());
        let progress = TestProgressCallback::new();

        let result = job(&bucket, ArchiveFormat::Zip).run(&progress).await;

        assert_matches!(&result, Err(e) if e.kind() == ErrorKind::EmptyResultError);
        assert_eq!(0, bucket.stats().reads());
        assert!(!progress.stages().contains(&Stage::Building));

        Ok(())
    })
}

#[test]
fn one_failed_object_is_omitted_and_logged() -> Result<()> {
    let logs = test_with_captured_logs(async move {
        let bucket = sample_bucket().with_failing_key("b/b.txt");
        let progress = TestProgressCallback::new();

        let archive = job(&bucket, ArchiveFormat::Zip).run(&progress).await?;
        let entries = entries(&archive)?;

        let mut keys = entries.keys().cloned().collect::<Vec<_>>();
        keys.sort();
        assert_eq!(vec!["a.txt", "c.bin"], keys);
        assert_eq!(vec!["a.txt", "c.bin"], progress.fetched_keys());
        assert_eq!(vec!["b/b.txt"], progress.failed_keys());

        Ok(())
    })?;

    assert!(logs.contains("WARN"), "{logs}");
    assert!(
        logs.contains("Object could not be retrieved and will be omitted from the archive"),
        "{logs}"
    );
    assert!(logs.contains("b/b.txt"), "{logs}");

    Ok(())
}

#[test]
fn all_objects_failing_is_empty_result() -> Result<()> {
    test_with_logging(async move {
        let bucket = MemoryBucket::new("test", [("a", "A"), ("b", "B")])
            .with_failing_key("a")
            .with_failing_key("b");

        let error = job(&bucket, ArchiveFormat::Zip)
            .run_without_progress()
            .await
            .unwrap_err();

        assert_eq!(ErrorKind::EmptyResultError, error.kind());
        assert_matches!(error, S3PackError::EmptyResult { attempted: 2, .. });

        Ok(())
    })
}

#[test]
fn list_failure_fails_before_any_retrieval() -> Result<()> {
    test_with_logging(async move {
        let bucket = sample_bucket().with_list_error("service unavailable");

        let error = job(&bucket, ArchiveFormat::Zip)
            .run_without_progress()
            .await
            .unwrap_err();

        assert_eq!(ErrorKind::ListError, error.kind());
        assert_eq!("ListError", error.kind().to_string());
        assert_eq!(0, bucket.stats().reads());

        Ok(())
    })
}

#[test]
fn many_objects_across_many_pages() -> Result<()> {
    test_with_logging(async move {
        let objects = test_data::make_test_objects(100, 4096);
        let bucket = MemoryBucket::new(
            "test",
            objects
                .iter()
                .map(|object| (object.key.clone(), object.data.clone())),
        )
        .with_page_size(7)
        .with_read_delay(Duration::from_millis(5));

        let config = Config {
            max_concurrent_requests: 3,
            ..config(ArchiveFormat::Tar)
        };
        let progress = TestProgressCallback::new();

        let archive = BundleJob::new(&config, Box::new(bucket.clone()))
            .run(&progress)
            .await?;

        test_data::validate_entries(
            &objects,
            &entries(&archive)?,
            objects.iter().map(|object| object.key.as_str()),
        )?;

        assert_eq!(100, bucket.stats().reads());
        assert_le!(bucket.stats().max_in_flight(), 3);
        assert_eq!(100, progress.fetched_keys().len());

        Ok(())
    })
}

#[test]
fn hung_and_flaky_objects() -> Result<()> {
    test_with_logging(async move {
        let bucket = sample_bucket()
            .with_hanging_key("a.txt")
            .with_flaky_key("c.bin", 1);

        let config = Config {
            fetch_timeout_secs: 1,
            fetch_retries: 1,
            ..config(ArchiveFormat::Zip)
        };

        let archive = BundleJob::new(&config, Box::new(bucket))
            .run_without_progress()
            .await?;

        let mut keys = entries(&archive)?.into_keys().collect::<Vec<_>>();
        keys.sort();
        assert_eq!(vec!["b/b.txt", "c.bin"], keys);

        Ok(())
    })
}

#[test]
fn progress_events_are_consistent() -> Result<()> {
    test_with_logging(async move {
        let bucket = sample_bucket().with_failing_key("c.bin");
        let progress = TestProgressCallback::new();

        let archive = job(&bucket, ArchiveFormat::Tar).run(&progress).await?;

        assert_eq!(
            vec![
                Stage::Listing,
                Stage::Fetching,
                Stage::Aggregating,
                Stage::Building,
                Stage::Done
            ],
            progress.stages()
        );
        assert_eq!(
            vec![crate::progress::ProgressEvent::ObjectsListed { count: 3 }],
            progress.events_of(crate::progress::ProgressEventDiscriminants::ObjectsListed)
        );
        assert_eq!(
            vec![crate::progress::ProgressEvent::ArchiveBuilt {
                format: ArchiveFormat::Tar,
                files: 2,
                size: archive.data.len()
            }],
            progress.events_of(crate::progress::ProgressEventDiscriminants::ArchiveBuilt)
        );

        Ok(())
    })
}

#[test]
fn same_objects_same_archive() -> Result<()> {
    test_with_logging(async move {
        for format in [ArchiveFormat::Zip, ArchiveFormat::Tar] {
            let job = job(&sample_bucket(), format);

            let first = job.run_without_progress().await?;
            let second = job.run_without_progress().await?;

            assert_eq!(first.data, second.data, "{format}");
        }

        Ok(())
    })
}

#[cfg(unix)]
mod iso {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    fn fake_tool(dir: &Path, body: &str) -> Result<PathBuf> {
        let path = dir.join("fake-mkisofs");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;

        Ok(path)
    }

    #[test]
    fn tool_sees_staged_tree() -> Result<()> {
        test_with_logging(async move {
            let tools = tempfile::tempdir()?;
            let staging = tempfile::tempdir()?;

            // The "image" is the list of files the tool found in the staging directory
            let tool = fake_tool(
                tools.path(),
                r#"cd "$5" && find . -type f | sort > "$2""#,
            )?;

            let config = Config {
                mastering_tool: tool,
                staging_dir: Some(staging.path().to_path_buf()),
                ..config(ArchiveFormat::Iso)
            };

            let archive = BundleJob::new(&config, Box::new(sample_bucket()))
                .run_without_progress()
                .await?;

            assert_eq!("files.iso", archive.file_name);
            assert_eq!(
                "./a.txt\n./b/b.txt\n./c.bin\n",
                String::from_utf8(archive.data.to_vec())?
            );
            assert!(archive::is_empty_dir(staging.path())?);

            Ok(())
        })
    }

    #[test]
    fn tool_failure_is_archive_build_error() -> Result<()> {
        test_with_logging(async move {
            let tools = tempfile::tempdir()?;
            let staging = tempfile::tempdir()?;
            let tool = fake_tool(tools.path(), "echo 'mkisofs: No space left on device' >&2\nexit 2")?;

            let config = Config {
                mastering_tool: tool,
                staging_dir: Some(staging.path().to_path_buf()),
                ..config(ArchiveFormat::Iso)
            };

            let error = BundleJob::new(&config, Box::new(sample_bucket()))
                .run_without_progress()
                .await
                .unwrap_err();

            assert_eq!(ErrorKind::ArchiveBuildError, error.kind());
            assert!(error.detail().contains("No space left on device"), "{}", error.detail());
            assert!(archive::is_empty_dir(staging.path())?);

            Ok(())
        })
    }
}
