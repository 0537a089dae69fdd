use super::{Bucket, ListPage};
use crate::{Config, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_types::region::Region;
use snafu::{prelude::*, IntoError};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Implementation of [`Bucket`] for S3 and S3-compatible APIs
#[derive(Clone)]
pub(super) struct S3Bucket {
    inner: Arc<S3BucketInner>,
}
struct S3BucketInner {
    name: String,

    /// The region this bucket is located in, if it's different from the region specified in the
    /// config.
    ///
    /// If a bucket is in a different region, then we need to use a different
    /// [`aws_sdk_s3::Client`] instance to talk to the S3 APIs when dealing with that bucket.
    region: Option<String>,

    list_page_size: Option<i32>,

    /// The client to use to operate on this bucket.
    client: aws_sdk_s3::Client,
}

impl S3Bucket {
    /// Construct a new instance and validate that the current client has access to the bucket.
    ///
    /// If there is no access to the bucket then fail with an error
    pub(super) async fn new(config: &Config) -> Result<Self> {
        let name = config.bucket.as_str();
        ensure!(!name.is_empty(), crate::error::MissingBucketSnafu);

        debug!(bucket = name, "Validating access to bucket");

        let mut client = make_s3_client(config, None).await;

        // If the bucket is in a different region, `head_bucket` will fail and the error will
        // include a header telling us the correct region.  Look for that and handle it properly.
        let region = if let Some(region) = Self::validate_access_and_region(&client, name).await? {
            debug!(bucket = name, %region, "Bucket is in another region; repeating access validation in the correct region");

            client = make_s3_client(config, region.clone()).await;

            // This can fail if we don't have access, but if it reports again that the region is
            // wrong then something has gone really wrong, or (more likely) there's a bug in our
            // code.
            assert_eq!(
                Self::validate_access_and_region(&client, name).await?,
                None,
                "S3 has already redirected us to another region once before"
            );

            Some(region)
        } else {
            None
        };

        debug!(bucket = name, ?region, "Access to bucket is confirmed");

        Ok(Self {
            inner: Arc::new(S3BucketInner {
                name: name.to_string(),
                region,
                list_page_size: config.list_page_size,
                client,
            }),
        })
    }

    /// Perform a HEAD on the bucket to check access.
    ///
    /// If the HEAD check passes, it means the client's configured region is correct, the
    /// configured credentials have access to the bucket, and all is well.  In that case this
    /// function returns `Ok(None)`
    ///
    /// If the HEAD check fails with an error that indicates the bucket is in a different region,
    /// then this will return `Ok(Some($region))`, and the check should be repeated again in that
    /// region.
    ///
    /// If the HEAD check fails for any other error, most likely because the bucket doesn't exist
    /// or the credentials don't have access to it, then this returns the corresponding error.
    async fn validate_access_and_region(
        client: &aws_sdk_s3::Client,
        name: &str,
    ) -> Result<Option<String>> {
        match client.head_bucket().bucket(name).send().await {
            Ok(_) => Ok(None),
            Err(e) => {
                if let Some(response) = e.raw_response() {
                    if response.status().as_u16() == 301 {
                        if let Some(region) = response.headers().get("x-amz-bucket-region") {
                            // This is AWS's way of telling us we have the right bucket, but it is
                            // in another region so we should use the appropriate region endpoint
                            return Ok(Some(region.to_string()));
                        }
                    }
                }

                Err(crate::error::BucketInvalidOrNotAccessibleSnafu {
                    bucket: name.to_string(),
                }
                .into_error(e))
            }
        }
    }
}

#[async_trait::async_trait]
impl Bucket for S3Bucket {
    fn name(&self) -> &str {
        &self.inner.name
    }

    #[instrument(skip(self), fields(bucket = %self.inner.name))]
    async fn list_objects_page(&self, continuation_token: Option<String>) -> Result<ListPage> {
        let output = self
            .inner
            .client
            .list_objects_v2()
            .bucket(&self.inner.name)
            .set_max_keys(self.inner.list_page_size)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .with_context(|_| crate::error::ListObjectsInBucketSnafu {
                bucket: self.inner.name.clone(),
            })?;

        // NOTE: `contents()` is an empty slice, not an error, if the bucket is empty
        let keys = output
            .contents()
            .iter()
            .filter_map(|object| object.key().map(|key| key.to_string()))
            .collect::<Vec<_>>();

        debug!(
            keys = keys.len(),
            truncated = ?output.is_truncated(),
            "Listed page of objects"
        );

        Ok(ListPage {
            keys,
            continuation_token: output.next_continuation_token().map(|token| token.to_string()),
        })
    }

    #[instrument(skip(self), fields(bucket = %self.inner.name))]
    async fn read_object(&self, key: String) -> Result<bytes::Bytes> {
        debug!("Reading object");

        let response = self
            .inner
            .client
            .get_object()
            .bucket(&self.inner.name)
            .key(&key)
            .send()
            .await
            .with_context(|_| crate::error::GetObjectSnafu {
                bucket: self.inner.name.clone(),
                key: key.clone(),
            })?;

        let bytes =
            response
                .body
                .collect()
                .await
                .with_context(|_| crate::error::ReadByteStreamSnafu {
                    bucket: self.inner.name.clone(),
                    key: key.clone(),
                })?;

        Ok(bytes.into_bytes())
    }
}

impl std::fmt::Debug for S3Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Bucket")
            .field("name", &self.inner.name)
            .field("region", &self.inner.region)
            .field("list_page_size", &self.inner.list_page_size)
            .field("client", &"<...>")
            .finish()
    }
}

/// Create a new AWS SDK S3 client, using either an explicit region or the default configuration
/// deduced from the environment
async fn make_s3_client(config: &Config, region: impl Into<Option<String>>) -> aws_sdk_s3::Client {
    let region = region.into().or_else(|| config.aws_region.clone());

    let region_provider = if let Some(region) = region {
        RegionProviderChain::first_try(Region::new(region))
    } else {
        // No explicit region; use the environment
        RegionProviderChain::default_provider().or_else("us-east-1")
    };

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);

    if let (Some(access_key_id), Some(secret_access_key)) =
        (&config.aws_access_key_id, &config.aws_secret_access_key)
    {
        loader = loader.credentials_provider(Credentials::from_keys(
            access_key_id,
            secret_access_key,
            None,
        ));
    }

    let aws_config = loader.load().await;

    let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
    if let Some(s3_endpoint) = &config.s3_endpoint {
        // S3-compatible services rarely support virtual-hosted style bucket addressing
        s3_config_builder = s3_config_builder
            .endpoint_url(s3_endpoint.to_string())
            .force_path_style(true);
    }

    aws_sdk_s3::Client::from_conf(s3_config_builder.build())
}
