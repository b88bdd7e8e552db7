use crate::config::{ResolvedConfig, StoreCredentials};
use crate::domain::Locator;

/// Object-store connection settings, built once per run and passed by reference.
#[derive(Debug, Clone)]
pub struct StoreSession {
    endpoint: String,
    default_bucket: Option<String>,
    credentials: Option<StoreCredentials>,
}

impl StoreSession {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            default_bucket: None,
            credentials: None,
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            endpoint: config.store_endpoint.trim_end_matches('/').to_string(),
            default_bucket: config.bucket.clone(),
            credentials: config.credentials.clone(),
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.default_bucket = Some(bucket.into());
        self
    }

    pub fn with_credentials(mut self, credentials: StoreCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn default_bucket(&self) -> Option<&str> {
        self.default_bucket.as_deref()
    }

    pub fn credentials(&self) -> Option<&StoreCredentials> {
        self.credentials.as_ref()
    }

    /// `s3://store/key` form used to reference remote files in study documents.
    pub fn uri(&self, locator: &Locator) -> String {
        format!("s3://{}/{}", locator.store, locator.key())
    }
}
