//! Tests that exercise interaction with a live object store, but which can be performed against a
//! local Minio S3-compatible object storage server for greater convenience and lower cost.
//!
//! These are skipped if `minio` isn't installed.
use crate::{progress::TestProgressCallback, Result};
use s3pack::{BundleJob, ErrorKind, ZipBuilder};
use s3pack_testing::{archive, logging::*, minio, test_data};
use std::time::Duration;

/// Set up the s3pack config to use the specified Minio server
fn config_for_minio(server: &minio::MinioServer, bucket: &str) -> s3pack::Config {
    s3pack::Config {
        aws_region: Some("us-east-1".to_string()),
        aws_access_key_id: Some(minio::ACCESS_KEY_ID.to_string()),
        aws_secret_access_key: Some(minio::SECRET_ACCESS_KEY.to_string()),
        s3_endpoint: Some(server.endpoint_url()),
        // Small pages so listing has to follow continuation tokens
        list_page_size: Some(2),
        ..s3pack::Config::for_bucket(bucket)
    }
}

#[test]
fn bundle_whole_bucket() -> Result<()> {
    test_with_logging(async move {
        let Some(server) = minio::MinioServer::get_if_available().await? else {
            return Ok(());
        };

        let bucket = server.create_bucket("bundle_whole_bucket").await?;
        let objects = test_data::make_test_objects(9, 64 * 1024);
        test_data::upload_test_objects(&server.aws_client().await?, &bucket, &objects).await?;

        let config = config_for_minio(&server, &bucket);
        let s3_bucket = s3pack::connect_s3_bucket(&config).await?;
        let job = BundleJob::new(&config, s3_bucket)
            .with_archive_builder(Box::new(ZipBuilder::new(Duration::from_secs(30))));
        let progress = TestProgressCallback::new();

        let archive = job.run(&progress).await?;

        test_data::validate_entries(
            &objects,
            &archive::zip_entries(&archive.data)?,
            objects.iter().map(|object| object.key.as_str()),
        )?;
        assert!(progress.failed_keys().is_empty());

        Ok(())
    })
}

#[test]
fn empty_bucket() -> Result<()> {
    test_with_logging(async move {
        let Some(server) = minio::MinioServer::get_if_available().await? else {
            return Ok(());
        };

        let bucket = server.create_bucket("empty_bucket").await?;

        let config = config_for_minio(&server, &bucket);
        let job = BundleJob::new(&config, s3pack::connect_s3_bucket(&config).await?)
            .with_archive_builder(Box::new(ZipBuilder::new(Duration::from_secs(30))));

        let error = job.run_without_progress().await.unwrap_err();
        assert_eq!(ErrorKind::EmptyResultError, error.kind());

        Ok(())
    })
}

#[test]
fn nonexistent_bucket_fails_at_startup() -> Result<()> {
    test_with_logging(async move {
        let Some(server) = minio::MinioServer::get_if_available().await? else {
            return Ok(());
        };

        let config = config_for_minio(&server, "s3pack-no-such-bucket");

        let error = s3pack::connect_s3_bucket(&config).await.unwrap_err();
        assert_eq!(ErrorKind::ClientInitError, error.kind());

        Ok(())
    })
}
