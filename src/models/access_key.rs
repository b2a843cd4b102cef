use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

/// An issued IAM access key.
///
/// Serialized with the `access_key` / `secret_key` field names used by the
/// local credential record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeyPair {
    #[serde(rename = "access_key")]
    pub access_key_id: String,
    #[serde(rename = "secret_key")]
    pub secret_access_key: Zeroizing<String>,
}

impl AccessKeyPair {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: Zeroizing::new(secret_access_key.into()),
        }
    }

    pub fn secret(&self) -> &str {
        self.secret_access_key.as_str()
    }
}

impl fmt::Debug for AccessKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessKeyPair")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}
