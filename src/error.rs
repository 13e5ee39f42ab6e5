use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid server URL '{0}'")]
    InvalidBaseUrl(String),

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl ApiError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_owned(),
            }
        } else if err.is_decode() {
            Self::Decode {
                url: url.to_owned(),
                source: err,
            }
        } else {
            Self::Network {
                url: url.to_owned(),
                source: err,
            }
        }
    }

    /// Unauthorized responses are not worth retrying until credentials change.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("stream '{0}' has no decoded frame yet")]
    NotReady(String),

    #[error("frame buffer does not match {width}x{height}")]
    BadFrame { width: u32, height: u32 },

    #[error("image encoding failed: {0}")]
    Encode(String),
}
