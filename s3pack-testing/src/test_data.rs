//! Generate test objects, put them in S3-compatible object storage, and check archives against
//! them
use crate::Result;
use aws_sdk_s3::{primitives::ByteStream, Client};
use bytes::Bytes;
use color_eyre::eyre::eyre;
use futures::StreamExt;
use rand::prelude::*;
use sha2::Digest;
use std::collections::HashMap;

/// Max concurrent S3 operations when dealing with test data
const MAX_CONCURRENCY: usize = 10;

/// An object to put in a bucket, with the random data it contains
#[derive(Clone, Debug)]
pub struct TestObject {
    pub key: String,
    pub data: Vec<u8>,
    pub hash: [u8; 32],
}

impl TestObject {
    /// Make a new test object containing `size` bytes of random data
    pub fn random(key: impl Into<String>, size: usize) -> Self {
        let mut data = vec![0u8; size];
        rand::thread_rng().fill(&mut data[..]);

        Self::with_data(key, data)
    }

    pub fn with_data(key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();

        Self {
            key: key.into(),
            hash: hash(&data),
            data,
        }
    }
}

pub fn hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = sha2::Sha256::new();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());

    hash
}

/// Make `count` test objects of random sizes up to `max_size`, scattered over a few levels of
/// nested "directories" so archives built from them have some structure
pub fn make_test_objects(count: usize, max_size: usize) -> Vec<TestObject> {
    let mut rand = rand::thread_rng();

    (0..count)
        .map(|i| {
            let key = match i % 3 {
                0 => format!("file{i:04}.bin"),
                1 => format!("dir{}/file{i:04}.bin", i % 4),
                _ => format!("dir{}/sub{}/file{i:04}.bin", i % 4, i % 2),
            };

            TestObject::random(key, rand.gen_range(0..=max_size))
        })
        .collect()
}

/// Upload test objects to a bucket
pub async fn upload_test_objects(client: &Client, bucket: &str, objects: &[TestObject]) -> Result<()> {
    let put_futs = objects.iter().map(|object| async move {
        client
            .put_object()
            .bucket(bucket)
            .key(&object.key)
            .body(ByteStream::from(Bytes::from(object.data.clone())))
            .send()
            .await?;

        Result::<_>::Ok(())
    });

    let mut puts = futures::stream::iter(put_futs).buffer_unordered(MAX_CONCURRENCY);

    while let Some(result) = puts.next().await {
        result?;
    }

    Ok(())
}

/// Validate the entries extracted from an archive against the test objects they were made from.
///
/// The archive must contain exactly the objects whose keys are in `expected_keys`, each with the
/// right contents.
#[track_caller]
pub fn validate_entries<'a>(
    objects: &[TestObject],
    entries: &HashMap<String, Vec<u8>>,
    expected_keys: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    let objects = objects
        .iter()
        .map(|object| (object.key.as_str(), object))
        .collect::<HashMap<_, _>>();

    let mut expected_keys = expected_keys.into_iter().collect::<Vec<_>>();
    expected_keys.sort_unstable();
    let mut actual_keys = entries.keys().map(|key| key.as_str()).collect::<Vec<_>>();
    actual_keys.sort_unstable();

    if expected_keys != actual_keys {
        return Err(eyre!(
            "Archive entries don't match.\nExpected: {expected_keys:#?}\nActual: {actual_keys:#?}"
        ));
    }

    for key in expected_keys {
        let object = objects
            .get(key)
            .ok_or_else(|| eyre!("BUG: expected key '{key}' isn't one of the test objects"))?;

        if hash(&entries[key]) != object.hash {
            return Err(eyre!(
                "Archive entry '{key}' has different contents than the test object ({} bytes in the archive, {} in the object)",
                entries[key].len(),
                object.data.len()
            ));
        }
    }

    Ok(())
}
