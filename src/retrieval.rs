use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{Encoding, Locator};
use crate::error::MmitError;
use crate::object_store::ObjectStoreClient;
use crate::session::StoreSession;
use crate::sink::{Payload, Sink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetrievalStatus {
    Success,
    NotFound,
    TransferError,
}

/// Result of one retrieval attempt.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub locator: Locator,
    pub status: RetrievalStatus,
    pub payload: Option<Payload>,
    pub bytes_written: Option<u64>,
    pub written_to: Option<Utf8PathBuf>,
    pub detail: Option<String>,
}

impl RetrievalOutcome {
    fn failed(locator: Locator, status: RetrievalStatus, detail: String) -> Self {
        Self {
            locator,
            status,
            payload: None,
            bytes_written: None,
            written_to: None,
            detail: Some(detail),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RetrievalStatus::Success
    }
}

pub struct RetrievalEngine<'s, C: ObjectStoreClient> {
    session: &'s StoreSession,
    client: C,
    sink: Sink,
}

impl<'s, C: ObjectStoreClient> RetrievalEngine<'s, C> {
    pub fn new(session: &'s StoreSession, client: C, sink: Sink) -> Self {
        Self {
            session,
            client,
            sink,
        }
    }

    pub fn sink(&self) -> &Sink {
        &self.sink
    }

    /// Fetches one artifact and, on success, writes it below the sink root.
    pub fn fetch_one(&self, locator: &Locator, encoding: Encoding) -> RetrievalOutcome {
        info!(uri = %self.session.uri(locator), "Getting file {}", locator.key());

        let bytes = match self
            .client
            .get(&locator.store, &locator.path_prefix, &locator.file_name)
        {
            Ok(bytes) => bytes,
            Err(MmitError::ObjectNotFound(key)) => {
                warn!(%locator, "object not found");
                return RetrievalOutcome::failed(
                    locator.clone(),
                    RetrievalStatus::NotFound,
                    format!("object not found: {key}"),
                );
            }
            Err(err) => {
                warn!(%locator, error = %err, "Failed to download");
                return RetrievalOutcome::failed(
                    locator.clone(),
                    RetrievalStatus::TransferError,
                    err.to_string(),
                );
            }
        };

        let payload = match encoding {
            Encoding::Binary => Payload::Binary(bytes),
            Encoding::Text => match String::from_utf8(bytes) {
                Ok(text) => Payload::Text(text),
                Err(_) => {
                    let err = MmitError::TextDecode(locator.to_string());
                    warn!(%locator, "payload is not valid UTF-8");
                    return RetrievalOutcome::failed(
                        locator.clone(),
                        RetrievalStatus::TransferError,
                        err.to_string(),
                    );
                }
            },
        };

        match self
            .sink
            .write(&locator.path_prefix, &locator.file_name, &payload)
        {
            Ok((path, bytes_written)) => {
                debug!(%path, bytes_written, "artifact written");
                RetrievalOutcome {
                    locator: locator.clone(),
                    status: RetrievalStatus::Success,
                    payload: Some(payload),
                    bytes_written: Some(bytes_written),
                    written_to: Some(path),
                    detail: None,
                }
            }
            Err(err) => {
                warn!(%locator, error = %err, "failed to write artifact");
                RetrievalOutcome::failed(
                    locator.clone(),
                    RetrievalStatus::TransferError,
                    err.to_string(),
                )
            }
        }
    }

    /// Lazily fetches every locator in input order; one outcome per locator,
    /// failures included.
    pub fn fetch_many<'e, I>(&'e self, locators: I) -> impl Iterator<Item = RetrievalOutcome> + 'e
    where
        I: IntoIterator<Item = (Locator, Encoding)>,
        I::IntoIter: 'e,
    {
        locators
            .into_iter()
            .map(move |(locator, encoding)| self.fetch_one(&locator, encoding))
    }

    /// Lists objects under `prefix` and returns their locators. Without an
    /// explicit store the session's default bucket is used.
    pub fn discover(&self, store: Option<&str>, prefix: &str) -> Result<Vec<Locator>, MmitError> {
        let store = store
            .or_else(|| self.session.default_bucket())
            .ok_or_else(|| {
                MmitError::InvalidArtifactPath("no store given and no default bucket".to_string())
            })?;
        let keys = self.client.list(store, prefix)?;
        Ok(keys
            .iter()
            .filter_map(|key| Locator::from_key(store, key))
            .collect())
    }
}
