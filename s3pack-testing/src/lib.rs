//! Testing helpers for use writing unit and integration tests of the `s3pack` crates
//!
//! This is internal to `s3pack` and is not intended for use by any other crates.  Breaking changes
//! can be made at any time.
pub mod archive;
pub mod logging;
pub mod minio;
pub mod test_data;

/// Test code that reports errors can just cheat and use `eyre`
pub type Result<T> = color_eyre::Result<T>;
