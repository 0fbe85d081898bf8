//! Azure Blob storage backend authenticated with a shared-access signature.

use async_trait::async_trait;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::ObjectStore;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use cosi_common::{Error, ObjectKey, Operation, Result};

use crate::config::AzureSecret;
use crate::context::OpContext;
use crate::provider::{ByteSink, ByteStream, ObjectBackend};
use crate::transfer::{self, LengthPolicy};

const BACKEND_NAME: &str = "azure";

/// Public cloud blob host suffix. Accounts on it need no explicit endpoint.
const PUBLIC_BLOB_SUFFIX: &str = ".blob.core.windows.net";

/// Pieces of a SAS URL the client builder needs.
#[derive(Debug, PartialEq, Eq)]
struct SasUrl {
    account: String,
    /// Account URL when it is not the public-cloud default.
    endpoint: Option<String>,
    query_pairs: Vec<(String, String)>,
}

impl SasUrl {
    /// Split a SAS URL such as
    /// `https://acct.blob.core.windows.net/?sv=…&sig=…` or the emulator form
    /// `https://127.0.0.1:10000/devstoreaccount1?sv=…&sig=…`.
    ///
    /// Only `https` is accepted; the signature is a bearer credential.
    fn parse(token: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            Error::InvalidInput(format!("Invalid Azure access token: {}", reason))
        };

        let url = Url::parse(token).map_err(|_| invalid("expected a SAS URL"))?;

        match url.scheme() {
            "https" => {}
            "http" => return Err(invalid("plain HTTP SAS URLs are not accepted")),
            other => return Err(invalid(&format!("unsupported scheme '{}'", other))),
        }

        let query_pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if query_pairs.is_empty() {
            return Err(invalid("URL carries no signature"));
        }

        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;

        if let Some(account) = host.strip_suffix(PUBLIC_BLOB_SUFFIX) {
            if account.is_empty() || account.contains('.') {
                return Err(invalid("cannot determine storage account"));
            }
            return Ok(Self {
                account: account.to_string(),
                endpoint: None,
                query_pairs,
            });
        }

        let origin = url.origin().ascii_serialization();

        // Sovereign clouds and private endpoints keep the account in the host.
        if let Some((account, _)) = host.split_once(".blob.") {
            if account.is_empty() {
                return Err(invalid("cannot determine storage account"));
            }
            return Ok(Self {
                account: account.to_string(),
                endpoint: Some(origin),
                query_pairs,
            });
        }

        // Emulators address the account by the first path segment.
        let account = url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| invalid("cannot determine storage account"))?
            .to_string();

        Ok(Self {
            endpoint: Some(format!("{}/{}", origin, account)),
            account,
            query_pairs,
        })
    }
}

/// Backend for Azure Blob storage.
///
/// Authenticates every request with the SAS token from the secret. The token
/// is never renewed; once it expires the service rejects requests and the
/// rejection surfaces as an unauthenticated transport error.
pub struct AzureBackend {
    container: String,
    store: Arc<dyn ObjectStore>,
}

impl AzureBackend {
    /// Create a backend from an Azure secret.
    ///
    /// # Preconditions
    /// - `container_name` is non-empty
    /// - `secret.access_token` is a SAS URL for the storage account
    ///
    /// # Postconditions
    /// - Requests always go over HTTPS
    /// - The token's expiry is not checked; an expired token only logs a warning
    ///
    /// # Errors
    /// - `InvalidInput` if the token is not a usable SAS URL
    pub fn new(container_name: &str, secret: &AzureSecret) -> Result<Self> {
        if container_name.is_empty() {
            return Err(Error::InvalidInput(
                "Container name cannot be empty".to_string(),
            ));
        }

        let sas = SasUrl::parse(secret.access_token.expose())?;

        if secret.is_expired() {
            warn!(
                "Azure SAS token for container '{}' expired at {}",
                container_name, secret.expiry_timestamp
            );
        }

        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(sas.account.as_str())
            .with_container_name(container_name)
            .with_sas_authorization(sas.query_pairs)
            .with_allow_http(false);
        if let Some(endpoint) = sas.endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        let store = builder
            .build()
            .map_err(|e| Error::InvalidInput(format!("Invalid Azure configuration: {}", e)))?;

        info!(
            "Created Azure backend for container '{}' in account '{}'",
            container_name, sas.account
        );
        Ok(Self::from_store(container_name, Arc::new(store)))
    }

    /// Wrap an already-built client, e.g. an in-memory store for tests.
    pub fn from_store(container_name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            container: container_name.into(),
            store,
        }
    }
}

#[async_trait]
impl ObjectBackend for AzureBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn bucket(&self) -> &str {
        &self.container
    }

    async fn put(&self, ctx: &OpContext, key: &ObjectKey, data: ByteStream, size: u64) -> Result<()> {
        debug!("Azure put '{}' (~{} bytes) into container '{}'", key, size, self.container);
        // Block uploads are not length-signed; size only sizes the buffer.
        ctx.run(
            Operation::Put,
            key.as_str(),
            transfer::upload(
                self.store.as_ref(),
                BACKEND_NAME,
                key,
                data,
                size,
                LengthPolicy::Hint,
            ),
        )
        .await
    }

    async fn get(&self, ctx: &OpContext, key: &ObjectKey, sink: ByteSink<'_>) -> Result<u64> {
        debug!("Azure get '{}' from container '{}'", key, self.container);
        ctx.run(
            Operation::Get,
            key.as_str(),
            transfer::download(self.store.as_ref(), BACKEND_NAME, key, sink),
        )
        .await
    }

    async fn delete(&self, ctx: &OpContext, key: &ObjectKey) -> Result<()> {
        debug!("Azure delete '{}' from container '{}'", key, self.container);
        ctx.run(
            Operation::Delete,
            key.as_str(),
            transfer::remove(self.store.as_ref(), BACKEND_NAME, key),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::stream_from_bytes;
    use chrono::{Duration, Utc};
    use cosi_common::{CancelReason, SecretString};
    use object_store::memory::InMemory;

    const PUBLIC_SAS: &str =
        "https://myaccount.blob.core.windows.net/?sv=2022-11-02&ss=b&srt=co&sp=rwdl&sig=abc%3D";

    fn secret(token: &str, expires_in: Duration) -> AzureSecret {
        AzureSecret {
            access_token: SecretString::new(token),
            expiry_timestamp: Utc::now() + expires_in,
        }
    }

    fn key(k: &str) -> ObjectKey {
        ObjectKey::parse(k).unwrap()
    }

    #[test]
    fn test_parse_public_sas() {
        let sas = SasUrl::parse(PUBLIC_SAS).unwrap();
        assert_eq!(sas.account, "myaccount");
        assert_eq!(sas.endpoint, None);
        assert!(sas
            .query_pairs
            .contains(&("sig".to_string(), "abc=".to_string())));
    }

    #[test]
    fn test_parse_container_sas() {
        let sas = SasUrl::parse("https://acct.blob.core.windows.net/logs?sv=1&sig=x").unwrap();
        assert_eq!(sas.account, "acct");
        assert_eq!(sas.endpoint, None);
    }

    #[test]
    fn test_parse_sovereign_cloud_sas() {
        let sas = SasUrl::parse("https://acct.blob.core.chinacloudapi.cn/?sv=1&sig=x").unwrap();
        assert_eq!(sas.account, "acct");
        assert_eq!(
            sas.endpoint.as_deref(),
            Some("https://acct.blob.core.chinacloudapi.cn")
        );
    }

    #[test]
    fn test_parse_emulator_sas() {
        let sas = SasUrl::parse("https://127.0.0.1:10000/devstoreaccount1?sv=1&sig=x").unwrap();
        assert_eq!(sas.account, "devstoreaccount1");
        assert_eq!(
            sas.endpoint.as_deref(),
            Some("https://127.0.0.1:10000/devstoreaccount1")
        );
    }

    #[test]
    fn test_plain_http_sas_rejected() {
        for token in [
            "http://acct.blob.core.usgovcloudapi.net/?sv=1&sig=x",
            "http://acct.blob.core.windows.net/?sv=1&sig=x",
            "http://127.0.0.1:10000/devstoreaccount1?sv=1&sig=x",
        ] {
            assert!(SasUrl::parse(token).is_err(), "accepted {:?}", token);
            let result = AzureBackend::new("logs", &secret(token, Duration::hours(1)));
            assert!(matches!(result, Err(Error::InvalidInput(_))), "built backend for {:?}", token);
        }
    }

    #[test]
    fn test_parse_rejects_bad_tokens() {
        for bad in [
            "not-a-url",
            "sv=2022&sig=abc",
            "https://myaccount.blob.core.windows.net/",
            "ftp://myaccount.blob.core.windows.net/?sig=x",
            "https://127.0.0.1:10000/?sig=x",
        ] {
            assert!(SasUrl::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_create_backend() {
        let backend = AzureBackend::new("logs", &secret(PUBLIC_SAS, Duration::hours(1))).unwrap();
        assert_eq!(backend.name(), "azure");
        assert_eq!(backend.bucket(), "logs");
    }

    #[test]
    fn test_create_with_expired_token() {
        let backend = AzureBackend::new("logs", &secret(PUBLIC_SAS, Duration::hours(-1)));
        assert!(backend.is_ok());
    }

    #[test]
    fn test_create_rejects_empty_container() {
        let result = AzureBackend::new("", &secret(PUBLIC_SAS, Duration::hours(1)));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_round_trip() {
        let backend = AzureBackend::from_store("logs", Arc::new(InMemory::new()));
        let ctx = OpContext::new();
        let k = key("dir/blob.txt");

        backend
            .put(&ctx, &k, stream_from_bytes(b"azure data".to_vec()), 10)
            .await
            .unwrap();

        let mut out = Vec::new();
        assert_eq!(backend.get(&ctx, &k, &mut out).await.unwrap(), 10);
        assert_eq!(out, b"azure data");

        backend.delete(&ctx, &k).await.unwrap();
        let mut out = Vec::new();
        assert!(backend.get(&ctx, &k, &mut out).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_size_is_a_hint() {
        let backend = AzureBackend::from_store("logs", Arc::new(InMemory::new()));
        let ctx = OpContext::new();
        let k = key("hint");

        backend
            .put(&ctx, &k, stream_from_bytes(vec![1u8; 64]), 0)
            .await
            .unwrap();

        let mut out = Vec::new();
        assert_eq!(backend.get(&ctx, &k, &mut out).await.unwrap(), 64);
    }

    #[tokio::test]
    async fn test_round_trip_edge_cases() {
        let backend = AzureBackend::from_store("logs", Arc::new(InMemory::new()));
        let ctx = OpContext::new();
        let large: Vec<u8> = (0..transfer::PART_SIZE + 4097).map(|i| (i * 31 % 256) as u8).collect();
        let cases: Vec<(&str, Vec<u8>, u64)> = vec![
            ("empty", Vec::new(), 0),
            ("nested/dir/blob.bin", b"nested".to_vec(), 6),
            // Size hint far below the real length forces the multipart path.
            ("large.bin", large, 0),
        ];

        for (k, data, hint) in &cases {
            backend
                .put(&ctx, &key(k), stream_from_bytes(data.clone()), *hint)
                .await
                .unwrap();
        }
        for (k, data, _) in &cases {
            let mut out = Vec::new();
            let written = backend.get(&ctx, &key(k), &mut out).await.unwrap();
            assert_eq!(written, data.len() as u64, "key {}", k);
            assert_eq!(&out, data, "key {}", k);
        }
    }

    #[tokio::test]
    async fn test_cancelled_context_short_circuits() {
        let backend = AzureBackend::from_store("logs", Arc::new(InMemory::new()));
        let ctx = OpContext::new();
        ctx.cancel();

        let err = backend.delete(&ctx, &key("x")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Cancelled {
                operation: Operation::Delete,
                reason: CancelReason::Cancelled,
                ..
            }
        ));
    }
}
