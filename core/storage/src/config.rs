//! Bucket-info configuration model and credential payloads.
//!
//! The document is written by the COSI node adapter into a mounted secret.
//! Parsing only checks JSON shape; consistency between declared protocols and
//! secrets is checked by the registry when a backend is requested.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use cosi_common::{Error, Result, SecretString};

/// Where the COSI node adapter mounts the bucket-info document by default.
pub const DEFAULT_BUCKET_INFO_PATH: &str = "/data/cosi/BucketInfo";

/// Authentication types a bucket access can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationType {
    /// Static key material carried in the secret.
    Key,
    /// Workload identity. Not supported by any backend yet.
    Iam,
}

impl AuthenticationType {
    /// Parse case-insensitively. Returns `None` for unknown values.
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("key") {
            Some(Self::Key)
        } else if value.eq_ignore_ascii_case("iam") {
            Some(Self::Iam)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Key => "Key",
            Self::Iam => "IAM",
        }
    }
}

/// S3 credential payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Secret {
    /// Endpoint as `host[:port]`, without scheme.
    pub endpoint: String,
    pub region: String,
    #[serde(rename = "accessKeyID")]
    pub access_key_id: SecretString,
    #[serde(rename = "accessSecretKey")]
    pub access_secret_key: SecretString,
}

/// Azure credential payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureSecret {
    /// Shared-access-signature URL for the storage account or container.
    pub access_token: SecretString,
    /// When the SAS token stops being accepted. Informational only.
    #[serde(rename = "expiryTimeStamp")]
    pub expiry_timestamp: DateTime<Utc>,
}

impl AzureSecret {
    /// Whether the token has passed its declared expiry.
    ///
    /// Nothing renews the token; callers that care can check this and ask the
    /// orchestrator for a fresh secret.
    pub fn is_expired(&self) -> bool {
        self.expiry_timestamp <= Utc::now()
    }
}

/// Declarative description of one provisioned bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    /// Remote bucket or container name.
    pub bucket_name: String,
    /// Declared authentication type, compared case-insensitively.
    pub authentication_type: String,
    /// Declared protocols in order, compared case-insensitively.
    pub protocols: Vec<String>,
    #[serde(default, rename = "secretS3", skip_serializing_if = "Option::is_none")]
    pub secret_s3: Option<S3Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_azure: Option<AzureSecret>,
}

impl BucketInfo {
    /// Parse a bucket-info document.
    ///
    /// Accepts both the flat form and the Kubernetes `BucketInfo` object, which
    /// carries the fields under `spec`.
    ///
    /// # Errors
    /// - `Serialization` naming the offending field if the JSON does not match
    pub fn from_json(json: &str) -> Result<Self> {
        let invalid =
            |e: serde_json::Error| Error::Serialization(format!("Invalid bucket info: {}", e));

        let mut document: serde_json::Value = serde_json::from_str(json).map_err(invalid)?;
        let body = match document.get_mut("spec") {
            Some(spec) => spec.take(),
            None => document,
        };
        serde_json::from_value(body).map_err(invalid)
    }

    /// Read and parse a bucket-info document from disk.
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `Serialization` if the contents are not a bucket-info document
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&contents)
    }

    /// Whether `protocol` is declared, ignoring ASCII case.
    pub fn declares(&self, protocol: &str) -> bool {
        self.protocols
            .iter()
            .any(|declared| declared.eq_ignore_ascii_case(protocol))
    }

    /// The declared authentication type, if it is a known one.
    pub fn authentication(&self) -> Option<AuthenticationType> {
        AuthenticationType::parse(&self.authentication_type)
    }
}
