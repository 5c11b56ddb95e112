pub mod http;

use std::{future::Future, path::PathBuf, sync::Arc};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{destination::FetchDestination, error::FetchResult, progress::ItemProgress, Target};

/// Successful outcome of one fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Body kept in memory.
    Bytes(Bytes),
    /// Body written to this file.
    File(PathBuf),
}

impl Payload {
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Bytes(bytes) => Some(bytes),
            Payload::File(_) => None,
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Payload::Bytes(_) => None,
            Payload::File(path) => Some(path),
        }
    }
}

/// Everything a [`Fetcher`] needs to perform one transfer.
#[derive(Debug)]
pub struct FetchRequest {
    pub index: usize,
    pub target: Target,
    pub destination: FetchDestination,
    pub progress: ItemProgress,
    /// Cancelled when the sequence is asked to stop. Fetchers should stop
    /// early and resolve, either with what they have or with
    /// [`FetchError::Cancelled`](crate::FetchError::Cancelled).
    pub cancel: CancellationToken,
}

/// Performs a single transfer on behalf of a [`Sequencer`](crate::Sequencer).
///
/// The returned future resolving is the terminal report of the fetch, it is
/// polled to completion exactly once per request even when the request is
/// cancelled.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, request: FetchRequest) -> impl Future<Output = FetchResult<Payload>> + Send;

    /// Whether this fetcher is able to serve `target`. Checked once per
    /// target when the sequencer is built.
    fn supports(&self, _target: &Target) -> bool {
        true
    }
}

impl<F> Fetcher for Arc<F>
where
    F: Fetcher,
{
    fn fetch(&self, request: FetchRequest) -> impl Future<Output = FetchResult<Payload>> + Send {
        self.as_ref().fetch(request)
    }

    fn supports(&self, target: &Target) -> bool {
        self.as_ref().supports(target)
    }
}
