//! FAQ corpus loading.
//!
//! Corpora come from one of two places:
//!
//! | Source | Location | Missing / failing |
//! |--------|----------|-------------------|
//! | Local  | `<data_dir>/faq_data_<lang>.json` | missing file → empty dataset |
//! | Remote | any `http(s)` URL returning JSON | non-2xx, network, or shape error → [`SourceError`] |
//!
//! Both accept the same three payload shapes, normalized by [`FaqPayload`]:
//!
//! ```json
//! { "faq":  [ { "question": "...", "answer": "..." } ] }
//! { "faqs": [ { "question": "...", "answer": "..." } ] }
//! [ { "question": "...", "answer": "..." } ]
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::models::{FaqDataset, FaqEntry, SourceIdentity};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported FAQ payload shape (expected an object with \"faq\" or \"faqs\", or a list)")]
    Shape,
}

/// Which corpus a request should be matched against.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FaqSource {
    /// The local file for the detected language.
    #[default]
    Local,
    /// A remote JSON document.
    Remote(String),
}

/// The accepted payload shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum FaqPayload {
    Faq { faq: Vec<FaqEntry> },
    Faqs { faqs: Vec<FaqEntry> },
    List(Vec<FaqEntry>),
}

impl FaqPayload {
    /// Classify an already-parsed JSON document.
    pub fn from_value(value: serde_json::Value) -> Result<Self, SourceError> {
        FaqPayload::deserialize(value).map_err(|_| SourceError::Shape)
    }

    /// Parse raw bytes. Malformed JSON is a [`SourceError::Json`]; well-formed
    /// JSON of any other shape is a [`SourceError::Shape`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SourceError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    pub fn into_entries(self) -> Vec<FaqEntry> {
        match self {
            FaqPayload::Faq { faq } => faq,
            FaqPayload::Faqs { faqs } => faqs,
            FaqPayload::List(entries) => entries,
        }
    }
}

/// Path of the local corpus for `language`.
pub fn local_path(data_dir: &Path, language: &str) -> PathBuf {
    data_dir.join(format!("faq_data_{}.json", language))
}

/// Load the local corpus for `language`.
///
/// A missing file is not an error: it yields an empty dataset.
pub fn load_local(data_dir: &Path, language: &str) -> Result<FaqDataset, SourceError> {
    let path = local_path(data_dir, language);
    let source = SourceIdentity::Local {
        language: language.to_string(),
    };

    if !path.exists() {
        tracing::warn!(path = %path.display(), "FAQ data file not found");
        return Ok(FaqDataset {
            source,
            entries: Vec::new(),
        });
    }

    let bytes = std::fs::read(&path).map_err(|e| SourceError::Io {
        path: path.clone(),
        source: e,
    })?;
    let entries = FaqPayload::from_slice(&bytes)?.into_entries();

    tracing::debug!(path = %path.display(), entries = entries.len(), "loaded local FAQ data");
    Ok(FaqDataset { source, entries })
}

/// Fetch a remote corpus, bounding the whole request by `timeout`.
pub async fn fetch_remote(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<FaqDataset, SourceError> {
    let request_err = |e: reqwest::Error| SourceError::Request {
        url: url.to_string(),
        source: e,
    };

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(request_err)?;

    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let bytes = response.bytes().await.map_err(request_err)?;
    let entries = FaqPayload::from_slice(&bytes)?.into_entries();

    tracing::debug!(url, entries = entries.len(), "fetched remote FAQ data");
    Ok(FaqDataset {
        source: SourceIdentity::Remote {
            url: url.to_string(),
        },
        entries,
    })
}
