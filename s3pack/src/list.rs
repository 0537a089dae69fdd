//! Enumerate every key in a bucket, following continuation tokens across pages.
use crate::objstore::Bucket;
use crate::Result;
use itertools::Itertools;
use snafu::prelude::*;
use tracing::{debug, instrument};

/// List all objects in the bucket.
///
/// Keys are returned in the order in which they were first seen, with duplicates (which some
/// providers produce when objects are written while the listing is in progress) removed.
///
/// Any error from the provider fails the whole listing; a partial listing is never returned.
#[instrument(skip(bucket), fields(bucket = %bucket.name()), err)]
pub async fn list_all_keys(bucket: &dyn Bucket) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut continuation_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = bucket
            .list_objects_page(continuation_token.clone())
            .await?;
        pages += 1;

        debug!(page = pages, keys = page.keys.len(), "Received listing page");
        keys.extend(page.keys);

        match page.continuation_token {
            None => break,
            Some(next) => {
                ensure!(
                    continuation_token.as_deref() != Some(next.as_str()),
                    crate::error::ListContinuationLoopSnafu {
                        bucket: bucket.name().to_string(),
                        token: next,
                    }
                );

                continuation_token = Some(next);
            }
        }
    }

    let listed = keys.len();
    let keys = keys.into_iter().unique().collect::<Vec<_>>();

    debug!(
        pages,
        keys = keys.len(),
        duplicates = listed - keys.len(),
        "Listed all objects in bucket"
    );

    Ok(keys)
}
