//! Common types used throughout the storage client.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroize;

/// Name of an object within a bucket or container.
///
/// Keys are flat strings on the remote side, but `/` is accepted as a
/// separator so callers can use path-like names.
///
/// This is narrower than what S3 or Azure accept: names with a leading or
/// trailing `/`, an empty segment (`a//b`) or a `.`/`..` segment are valid
/// remote object names but cannot be addressed through this client, because
/// the transport maps keys onto normalized `/`-separated paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Parse and validate an object key.
    ///
    /// # Preconditions
    /// - `key` is non-empty
    /// - `key` has no leading or trailing `/` and no empty segments
    /// - no segment is `.` or `..`
    /// - `key` has no control characters
    ///
    /// # Errors
    /// - Returns `InvalidInput` if any rule is violated
    pub fn parse(key: impl Into<String>) -> crate::Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Object key cannot be empty".to_string(),
            ));
        }
        if key.chars().any(char::is_control) {
            return Err(crate::Error::InvalidInput(format!(
                "Object key contains control characters: {:?}",
                key
            )));
        }
        for segment in key.split('/') {
            if segment.is_empty() {
                return Err(crate::Error::InvalidInput(format!(
                    "Object key has an empty segment: {}",
                    key
                )));
            }
            if segment == "." || segment == ".." {
                return Err(crate::Error::InvalidInput(format!(
                    "Object key has a relative segment: {}",
                    key
                )));
            }
        }
        Ok(Self(key))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the `/`-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(value)
    }
}

impl From<ObjectKey> for String {
    fn from(key: ObjectKey) -> Self {
        key.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secret text that zeroizes on drop and never prints its value.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret for handing to a client library.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        subtle_eq(self.0.as_bytes(), other.0.as_bytes())
    }
}

impl Eq for SecretString {}

impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}

fn subtle_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
