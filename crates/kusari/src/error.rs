use std::path::PathBuf;

use thiserror::Error;

/// Errors reported synchronously while building a [`Sequencer`](crate::Sequencer).
#[derive(Error, Debug)]
pub enum ConstructionError {
    #[error("Invalid target #{index} `{input}`: {source}")]
    InvalidTarget {
        index: usize,
        input: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Target #{index} `{target}` is not supported by the fetcher")]
    UnsupportedTarget { index: usize, target: String },

    #[error("Invalid path template `{template}`: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Targets #{first} and #{second} would both be written to {}", path.display())]
    DuplicateDestination {
        first: usize,
        second: usize,
        path: PathBuf,
    },

    #[error("Sequencer must be created inside a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Failure of a single fetch. Delivered through the item's result, never
/// returned from [`Sequencer::resume`](crate::Sequencer::resume).
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("{0}")]
    Custom(String),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

impl FetchError {
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
