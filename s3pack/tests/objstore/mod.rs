//! Integration tests exercising the S3 implementation of [`s3pack::Bucket`].
//!
//! These run against [minio](https://min.io), and skip themselves if minio isn't installed on the
//! local system.

mod minio;
