//! S3 (and S3-compatible) object store.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::config::{Credentials, StalledStreamProtectionConfig};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;

use crate::{ObjectStore, StorageError, require_env};

/// Maximum number of download attempts (initial + retries).
const MAX_DOWNLOAD_ATTEMPTS: u32 = 3;

/// Base delay between download retries (doubles each attempt).
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Object store backed by an S3 bucket.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    /// Wraps an existing client.
    #[must_use]
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Creates a store for `bucket` from environment variables.
    ///
    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_REGION`
    /// (default `us-east-1`), and `S3_ENDPOINT_URL` (optional; forces
    /// path-style addressing).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MissingEnv`] if credentials are unset.
    pub fn from_env(bucket: &str) -> Result<Self, StorageError> {
        let access_key = require_env("AWS_ACCESS_KEY_ID")?;
        let secret_key = require_env("AWS_SECRET_ACCESS_KEY")?;
        let region = std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let creds = Credentials::new(&access_key, &secret_key, None, None, "canvass-env");

        let mut builder = aws_sdk_s3::Config::builder()
            .region(Region::new(region))
            .credentials_provider(creds)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled());
        if let Ok(endpoint) = std::env::var("S3_ENDPOINT_URL")
            && !endpoint.is_empty()
        {
            builder = builder.endpoint_url(&endpoint).force_path_style(true);
        }

        Ok(Self::new(
            aws_sdk_s3::Client::from_conf(builder.build()),
            bucket,
        ))
    }

    /// Bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    async fn get_once(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(aws_sdk_s3::operation::get_object::GetObjectError::is_no_such_key)
                {
                    return Ok(None);
                }
                return Err(StorageError::Download {
                    store: self.location(),
                    key: key.to_string(),
                    source: Box::new(err),
                });
            }
        };

        let bytes = output.body.collect().await.map_err(|e| StorageError::Download {
            store: self.location(),
            key: key.to_string(),
            source: Box::new(e),
        })?;
        Ok(Some(bytes.into_bytes().to_vec()))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn url_prefix(&self) -> String {
        format!("s3://{}/", self.bucket)
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        content_encoding: Option<&str>,
    ) -> Result<(), StorageError> {
        #[allow(clippy::cast_precision_loss)] // display-only KB value
        let kb = body.len() as f64 / 1024.0;
        log::info!("Pushing s3://{}/{key} ({kb:.1} KB)", self.bucket);

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type);
        if let Some(encoding) = content_encoding {
            request = request.content_encoding(encoding);
        }
        request.send().await.map_err(|e| StorageError::Upload {
            store: self.location(),
            key: key.to_string(),
            source: Box::new(e),
        })?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut last_err: Option<StorageError> = None;

        for attempt in 1..=MAX_DOWNLOAD_ATTEMPTS {
            match self.get_once(key).await {
                Ok(body) => return Ok(body),
                Err(e @ StorageError::Download { .. }) if attempt < MAX_DOWNLOAD_ATTEMPTS => {
                    let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt - 1);
                    log::warn!(
                        "  download attempt {attempt}/{MAX_DOWNLOAD_ATTEMPTS} of {key} failed, \
                         retrying in {delay:.1?}..."
                    );
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| StorageError::Download {
            store: self.location(),
            key: key.to_string(),
            source: "all download attempts exhausted".into(),
        }))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                // NotFound means the object doesn't exist
                if err
                    .as_service_error()
                    .is_some_and(aws_sdk_s3::operation::head_object::HeadObjectError::is_not_found)
                {
                    return Ok(false);
                }
                Err(StorageError::Head {
                    store: self.location(),
                    key: key.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        log::debug!("Listing s3://{}/{prefix}*", self.bucket);

        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(|e| StorageError::List {
                store: self.location(),
                prefix: prefix.to_string(),
                source: Box::new(e),
            })?;

            for obj in output.contents() {
                if let Some(key) = obj.key() {
                    keys.push(key.to_string());
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        log::info!("Deleting s3://{}/{key}", self.bucket);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete {
                store: self.location(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        Ok(())
    }

    async fn sign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let sign_err = |e: Box<dyn std::error::Error + Send + Sync>| StorageError::Sign {
            store: self.location(),
            key: key.to_string(),
            source: e,
        };

        let config = PresigningConfig::expires_in(ttl).map_err(|e| sign_err(Box::new(e)))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| sign_err(Box::new(e)))?;
        Ok(request.uri().to_string())
    }
}
