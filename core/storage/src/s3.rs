//! S3-compatible storage backend.

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use cosi_common::{Error, ObjectKey, Operation, Result};

use crate::config::S3Secret;
use crate::context::OpContext;
use crate::provider::{ByteSink, ByteStream, ObjectBackend};
use crate::transfer::{self, LengthPolicy};

const BACKEND_NAME: &str = "s3";

/// Backend for S3-compatible object storage.
///
/// Holds one client bound to a single endpoint, region, key pair and bucket.
/// The endpoint is not contacted until the first operation.
pub struct S3Backend {
    bucket: String,
    store: Arc<dyn ObjectStore>,
}

impl S3Backend {
    /// Create a backend from an S3 secret.
    ///
    /// # Preconditions
    /// - `bucket_name`, region and both keys are non-empty
    /// - `secret.endpoint` is `host[:port]` without scheme or path
    ///
    /// # Postconditions
    /// - Requests go over HTTPS when `use_ssl` is set, plain HTTP otherwise
    ///
    /// # Errors
    /// - `InvalidInput` if any value has the wrong shape
    pub fn new(bucket_name: &str, secret: &S3Secret, use_ssl: bool) -> Result<Self> {
        if bucket_name.is_empty() {
            return Err(Error::InvalidInput("Bucket name cannot be empty".to_string()));
        }
        if secret.region.is_empty() {
            return Err(Error::InvalidInput("S3 region cannot be empty".to_string()));
        }
        if secret.access_key_id.is_empty() || secret.access_secret_key.is_empty() {
            return Err(Error::InvalidInput(
                "S3 access key ID and secret key are required".to_string(),
            ));
        }

        let endpoint = endpoint_url(&secret.endpoint, use_ssl)?;

        let store = AmazonS3Builder::new()
            .with_bucket_name(bucket_name)
            .with_region(&secret.region)
            .with_endpoint(&endpoint)
            .with_access_key_id(secret.access_key_id.expose())
            .with_secret_access_key(secret.access_secret_key.expose())
            .with_virtual_hosted_style_request(false)
            .with_allow_http(!use_ssl)
            .build()
            .map_err(|e| Error::InvalidInput(format!("Invalid S3 configuration: {}", e)))?;

        info!("Created S3 backend for bucket '{}' at {}", bucket_name, endpoint);
        Ok(Self::from_store(bucket_name, Arc::new(store)))
    }

    /// Wrap an already-built client, e.g. an in-memory store for tests.
    pub fn from_store(bucket_name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket_name.into(),
            store,
        }
    }
}

/// Build the endpoint URL from `host[:port]`.
fn endpoint_url(endpoint: &str, use_ssl: bool) -> Result<String> {
    let invalid = |reason: &str| {
        Error::InvalidInput(format!("Invalid S3 endpoint '{}': {}", endpoint, reason))
    };

    if endpoint.is_empty() {
        return Err(invalid("endpoint is required"));
    }
    if endpoint.contains("://") {
        return Err(invalid("expected host[:port] without a scheme"));
    }

    let scheme = if use_ssl { "https" } else { "http" };
    let url = Url::parse(&format!("{}://{}", scheme, endpoint))
        .map_err(|e| invalid(&e.to_string()))?;

    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("expected host[:port] without a path"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid("credentials belong in the secret, not the endpoint"));
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[async_trait]
impl ObjectBackend for S3Backend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, ctx: &OpContext, key: &ObjectKey, data: ByteStream, size: u64) -> Result<()> {
        debug!("S3 put '{}' ({} bytes) into bucket '{}'", key, size, self.bucket);
        ctx.run(
            Operation::Put,
            key.as_str(),
            transfer::upload(
                self.store.as_ref(),
                BACKEND_NAME,
                key,
                data,
                size,
                LengthPolicy::Exact,
            ),
        )
        .await
    }

    async fn get(&self, ctx: &OpContext, key: &ObjectKey, sink: ByteSink<'_>) -> Result<u64> {
        debug!("S3 get '{}' from bucket '{}'", key, self.bucket);
        ctx.run(
            Operation::Get,
            key.as_str(),
            transfer::download(self.store.as_ref(), BACKEND_NAME, key, sink),
        )
        .await
    }

    async fn delete(&self, ctx: &OpContext, key: &ObjectKey) -> Result<()> {
        debug!("S3 delete '{}' from bucket '{}'", key, self.bucket);
        ctx.run(
            Operation::Delete,
            key.as_str(),
            transfer::remove(self.store.as_ref(), BACKEND_NAME, key),
        )
        .await
    }
}
