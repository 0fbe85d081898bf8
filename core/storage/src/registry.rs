//! Backend registry: selects and constructs a backend from bucket info.

use std::sync::Arc;
use tracing::debug;

use cosi_common::{Error, Result};

use crate::azure::AzureBackend;
use crate::config::{AuthenticationType, BucketInfo};
use crate::provider::ObjectBackend;
use crate::s3::S3Backend;

/// Constructor for one protocol. Receives the bucket info and the
/// transport-security flag.
pub type BackendConstructor =
    Box<dyn Fn(&BucketInfo, bool) -> Result<Arc<dyn ObjectBackend>> + Send + Sync>;

/// Ordered registry of protocol constructors.
///
/// Resolution walks the entries in registration order and builds the first
/// protocol the bucket info declares, so registration order is priority
/// order. There is no fallback: if the first matching protocol cannot be
/// built, resolution fails.
pub struct BackendRegistry {
    entries: Vec<(String, BackendConstructor)>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a constructor for `protocol`, after all existing entries.
    ///
    /// # Errors
    /// - `AlreadyExists` if the protocol is registered (ignoring case)
    pub fn register(
        &mut self,
        protocol: impl Into<String>,
        constructor: BackendConstructor,
    ) -> Result<()> {
        let protocol = protocol.into();
        if self.has_protocol(&protocol) {
            return Err(Error::AlreadyExists(format!(
                "Protocol '{}' is already registered",
                protocol
            )));
        }
        self.entries.push((protocol, constructor));
        Ok(())
    }

    /// Build the backend for the highest-priority declared protocol.
    ///
    /// # Errors
    /// - `UnsupportedProtocol` with the full declared list if nothing matches
    /// - whatever the matching constructor returns
    pub fn resolve(&self, info: &BucketInfo, use_ssl: bool) -> Result<Arc<dyn ObjectBackend>> {
        let (protocol, constructor) = self
            .entries
            .iter()
            .find(|(protocol, _)| info.declares(protocol))
            .ok_or_else(|| Error::UnsupportedProtocol {
                protocols: info.protocols.clone(),
            })?;

        debug!(
            "Selected protocol {} for bucket '{}' (declared {:?})",
            protocol, info.bucket_name, info.protocols
        );
        constructor(info, use_ssl)
    }

    /// Registered protocol names in priority order.
    pub fn protocols(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Check if a protocol is registered, ignoring case.
    pub fn has_protocol(&self, protocol: &str) -> bool {
        self.entries
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(protocol))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Fail unless the bucket info uses static key authentication.
fn require_key_auth(info: &BucketInfo, protocol: &str) -> Result<()> {
    match info.authentication() {
        Some(AuthenticationType::Key) => Ok(()),
        _ => Err(Error::InvalidAuthenticationType {
            protocol: protocol.to_string(),
            authentication_type: info.authentication_type.clone(),
        }),
    }
}

fn missing_credential(protocol: &str) -> Error {
    Error::MissingCredential {
        protocol: protocol.to_string(),
    }
}

fn build_s3(info: &BucketInfo, use_ssl: bool) -> Result<Arc<dyn ObjectBackend>> {
    require_key_auth(info, "S3")?;
    let secret = info.secret_s3.as_ref().ok_or_else(|| missing_credential("S3"))?;
    Ok(Arc::new(S3Backend::new(&info.bucket_name, secret, use_ssl)?))
}

fn build_azure(info: &BucketInfo, _use_ssl: bool) -> Result<Arc<dyn ObjectBackend>> {
    require_key_auth(info, "Azure")?;
    let secret = info
        .secret_azure
        .as_ref()
        .ok_or_else(|| missing_credential("Azure"))?;
    Ok(Arc::new(AzureBackend::new(&info.bucket_name, secret)?))
}

/// Create a registry with the built-in backends: S3 first, then Azure.
pub fn create_default_registry() -> BackendRegistry {
    BackendRegistry {
        entries: vec![
            ("S3".to_string(), Box::new(build_s3) as BackendConstructor),
            ("Azure".to_string(), Box::new(build_azure) as BackendConstructor),
        ],
    }
}

/// Build the backend described by `info` using the built-in backends.
///
/// # Errors
/// - `InvalidAuthenticationType`, `MissingCredential` or `UnsupportedProtocol`
///   for inconsistent bucket info
/// - `InvalidInput` if the selected credential has the wrong shape
pub fn create_backend(info: &BucketInfo, use_ssl: bool) -> Result<Arc<dyn ObjectBackend>> {
    create_default_registry().resolve(info, use_ssl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AzureSecret, S3Secret};
    use chrono::{Duration, Utc};
    use cosi_common::SecretString;
    use object_store::memory::InMemory;
    use proptest::prelude::*;

    fn s3_secret() -> S3Secret {
        S3Secret {
            endpoint: "s3.example.com".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: SecretString::new("AKIAEXAMPLE"),
            access_secret_key: SecretString::new("secret"),
        }
    }

    fn azure_secret(expires_in: Duration) -> AzureSecret {
        AzureSecret {
            access_token: SecretString::new(
                "https://acct.blob.core.windows.net/?sv=2022-11-02&sig=abc",
            ),
            expiry_timestamp: Utc::now() + expires_in,
        }
    }

    fn info(protocols: &[&str], auth: &str) -> BucketInfo {
        BucketInfo {
            bucket_name: "logs".to_string(),
            authentication_type: auth.to_string(),
            protocols: protocols.iter().map(|p| p.to_string()).collect(),
            secret_s3: Some(s3_secret()),
            secret_azure: Some(azure_secret(Duration::hours(1))),
        }
    }

    fn backend_name(info: &BucketInfo) -> Result<String> {
        create_backend(info, true).map(|backend| backend.name().to_string())
    }

    fn expect_err(info: &BucketInfo) -> Error {
        match create_backend(info, true) {
            Ok(backend) => panic!("expected an error, built {}", backend.name()),
            Err(err) => err,
        }
    }

    fn recase(word: &str, upper: &[bool]) -> String {
        word.chars()
            .zip(upper.iter().cycle())
            .map(|(c, &up)| if up { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() })
            .collect()
    }

    #[test]
    fn test_s3_selected() {
        let mut info = info(&["S3"], "Key");
        info.secret_azure = None;
        assert_eq!(backend_name(&info).unwrap(), "s3");
    }

    #[test]
    fn test_s3_backend_keeps_bucket() {
        let backend = create_backend(&info(&["S3"], "Key"), false).ok().unwrap();
        assert_eq!(backend.bucket(), "logs");
    }

    #[test]
    fn test_s3_missing_secret() {
        let mut info = info(&["S3"], "Key");
        info.secret_s3 = None;
        assert!(matches!(
            expect_err(&info),
            Error::MissingCredential { protocol } if protocol == "S3"
        ));
    }

    #[test]
    fn test_s3_iam_rejected() {
        assert!(matches!(
            expect_err(&info(&["S3"], "IAM")),
            Error::InvalidAuthenticationType { protocol, authentication_type }
                if protocol == "S3" && authentication_type == "IAM"
        ));
    }

    #[test]
    fn test_auth_checked_before_secret() {
        let mut info = info(&["S3"], "IAM");
        info.secret_s3 = None;
        assert!(matches!(
            expect_err(&info),
            Error::InvalidAuthenticationType { .. }
        ));
    }

    #[test]
    fn test_unknown_auth_type_rejected() {
        assert!(matches!(
            expect_err(&info(&["Azure"], "Token")),
            Error::InvalidAuthenticationType { protocol, .. } if protocol == "Azure"
        ));
    }

    #[test]
    fn test_auth_type_case_insensitive() {
        assert_eq!(backend_name(&info(&["S3"], "kEy")).unwrap(), "s3");
    }

    #[test]
    fn test_azure_selected() {
        let mut info = info(&["Azure"], "Key");
        info.secret_s3 = None;
        assert_eq!(backend_name(&info).unwrap(), "azure");
    }

    #[test]
    fn test_azure_missing_secret() {
        let mut info = info(&["Azure"], "Key");
        info.secret_azure = None;
        assert!(matches!(
            expect_err(&info),
            Error::MissingCredential { protocol } if protocol == "Azure"
        ));
    }

    #[test]
    fn test_azure_expired_token_still_builds() {
        let mut info = info(&["Azure"], "Key");
        info.secret_azure = Some(azure_secret(Duration::days(-30)));
        assert_eq!(backend_name(&info).unwrap(), "azure");
    }

    #[test]
    fn test_s3_wins_over_azure_in_any_order() {
        assert_eq!(backend_name(&info(&["S3", "Azure"], "Key")).unwrap(), "s3");
        assert_eq!(backend_name(&info(&["Azure", "S3"], "Key")).unwrap(), "s3");
    }

    #[test]
    fn test_no_fallback_to_azure() {
        let mut info = info(&["Azure", "S3"], "Key");
        info.secret_s3 = None;
        assert!(matches!(
            expect_err(&info),
            Error::MissingCredential { protocol } if protocol == "S3"
        ));
    }

    #[test]
    fn test_invalid_s3_endpoint() {
        let mut info = info(&["S3"], "Key");
        if let Some(secret) = info.secret_s3.as_mut() {
            secret.endpoint = "https://s3.example.com".to_string();
        }
        assert!(matches!(expect_err(&info), Error::InvalidInput(_)));
    }

    #[test]
    fn test_unused_malformed_secret_is_ignored() {
        let mut info = info(&["S3"], "Key");
        if let Some(secret) = info.secret_azure.as_mut() {
            secret.access_token = SecretString::new("garbage");
        }
        assert_eq!(backend_name(&info).unwrap(), "s3");
    }

    #[test]
    fn test_empty_protocols_unsupported() {
        assert!(matches!(
            expect_err(&info(&[], "Key")),
            Error::UnsupportedProtocol { protocols } if protocols.is_empty()
        ));
    }

    #[test]
    fn test_default_registry_order() {
        let registry = create_default_registry();
        assert_eq!(registry.protocols(), vec!["S3", "Azure"]);
        assert!(registry.has_protocol("azure"));
        assert!(!registry.has_protocol("gcs"));
    }

    #[test]
    fn test_register_and_resolve_custom() {
        let mut registry = BackendRegistry::new();
        registry
            .register(
                "memory",
                Box::new(|info: &BucketInfo, _: bool| -> Result<Arc<dyn ObjectBackend>> {
                    Ok(Arc::new(S3Backend::from_store(
                        info.bucket_name.clone(),
                        Arc::new(InMemory::new()),
                    )))
                }),
            )
            .unwrap();

        let backend = registry.resolve(&info(&["MEMORY"], "Key"), true).ok().unwrap();
        assert_eq!(backend.bucket(), "logs");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = create_default_registry();
        let result = registry.register("s3", Box::new(build_s3));
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_empty_registry_resolves_nothing() {
        let registry = BackendRegistry::default();
        assert!(matches!(
            registry.resolve(&info(&["S3"], "Key"), true),
            Err(Error::UnsupportedProtocol { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_s3_matching_ignores_case(upper in prop::collection::vec(any::<bool>(), 2)) {
            let protocol = recase("s3", &upper);
            let info = info(&[protocol.as_str()], "Key");
            prop_assert_eq!(backend_name(&info).unwrap(), "s3");
        }

        #[test]
        fn prop_azure_matching_ignores_case(upper in prop::collection::vec(any::<bool>(), 5)) {
            let protocol = recase("azure", &upper);
            let info = info(&[protocol.as_str()], "Key");
            prop_assert_eq!(backend_name(&info).unwrap(), "azure");
        }

        #[test]
        fn prop_unrecognized_protocols_are_reported(
            protocols in prop::collection::vec("[A-Za-z0-9]{0,8}", 0..5)
        ) {
            prop_assume!(protocols.iter().all(|p| {
                !p.eq_ignore_ascii_case("s3") && !p.eq_ignore_ascii_case("azure")
            }));
            let refs: Vec<&str> = protocols.iter().map(String::as_str).collect();
            match create_backend(&info(&refs, "Key"), true) {
                Err(Error::UnsupportedProtocol { protocols: reported }) => {
                    prop_assert_eq!(&reported, &protocols);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
                Ok(backend) => prop_assert!(false, "unexpectedly built {}", backend.name()),
            }
        }
    }
}
