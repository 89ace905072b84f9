//! Credentials
//!
//! GCP認証情報の指定方法

/// Credential material for a [`crate::BigQueryHelper`].
///
/// Explicit credentials always take precedence. `ApplicationDefault`
/// falls back to the SDK's discovery chain: the
/// `GOOGLE_APPLICATION_CREDENTIALS` / `GOOGLE_APPLICATION_CREDENTIALS_JSON`
/// environment variables, then the metadata server.
#[derive(Debug, Clone, Default)]
pub enum Credentials {
    /// Path to a service account JSON key file. A leading `~` is
    /// expanded to the home directory.
    File(String),
    /// Service account key material as an in-memory JSON string.
    Json(String),
    /// Ambient credential discovery.
    #[default]
    ApplicationDefault,
}

impl Credentials {
    /// Creates a file-based credential from a key file path.
    pub fn file(path: impl Into<String>) -> Self {
        Self::File(path.into())
    }

    /// Creates an in-memory credential from raw key JSON.
    pub fn json(raw: impl Into<String>) -> Self {
        Self::Json(raw.into())
    }
}

/// Expands tilde in path and returns the full path
pub(crate) fn expand_key_path(key_path: &str) -> String {
    shellexpand::tilde(key_path).to_string()
}
