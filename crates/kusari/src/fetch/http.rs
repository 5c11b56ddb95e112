use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::{FetchRequest, Fetcher, Payload};
use crate::{
    destination::FetchDestination,
    error::{FetchError, FetchResult},
    progress::ItemProgress,
    util::http::HttpClient,
    Target,
};

/// Upper bound of the buffer reserved up front from `Content-Length`.
const MAX_PREALLOCATE: usize = 16 * 1024 * 1024;

/// Fetches `http` and `https` targets with a GET request.
#[derive(Clone)]
pub struct HttpFetcher {
    client: HttpClient,
}

impl HttpFetcher {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> FetchResult<Payload> {
        let FetchRequest {
            index,
            target,
            destination,
            progress,
            cancel,
        } = request;
        tracing::debug!("Fetching #{index} {target}");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = self.client.get(target.url().clone()).header(ACCEPT, "*/*").send() => response?,
        };
        if !response.status().is_success() {
            let status = response.status();
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                body = response.text() => body,
            };
            if let Ok(body) = body {
                tracing::warn!("Error body of #{index}: {body}");
            }
            return Err(FetchError::HttpStatus(status));
        }

        let mut body = Body {
            total: response.content_length(),
            received: 0,
            stream: Box::pin(response.bytes_stream()),
            progress,
            cancel,
        };

        match destination {
            FetchDestination::Memory => {
                let capacity = body.total.unwrap_or(0).min(MAX_PREALLOCATE as u64) as usize;
                let mut data = BytesMut::with_capacity(capacity);
                while let Some(chunk) = body.next_chunk().await? {
                    data.extend_from_slice(&chunk);
                }
                body.progress.set(1.);
                Ok(Payload::Bytes(data.freeze()))
            }
            FetchDestination::File(path) => {
                // an existing file at `path` is only replaced by a complete one
                let part = part_path(&path);
                let written = match write_file(&part, &mut body).await {
                    Ok(()) => tokio::fs::rename(&part, &path).await.map_err(FetchError::from),
                    Err(e) => Err(e),
                };
                match written {
                    Ok(()) => {
                        body.progress.set(1.);
                        Ok(Payload::File(path))
                    }
                    Err(e) => {
                        if let Err(remove_error) = tokio::fs::remove_file(&part).await {
                            if remove_error.kind() != std::io::ErrorKind::NotFound {
                                tracing::warn!(
                                    "Failed to remove partial file {}: {remove_error}",
                                    part.display()
                                );
                            }
                        }
                        Err(e)
                    }
                }
            }
        }
    }

    fn supports(&self, target: &Target) -> bool {
        matches!(target.url().scheme(), "http" | "https")
    }
}

struct Body<S> {
    total: Option<u64>,
    received: u64,
    stream: S,
    progress: ItemProgress,
    cancel: CancellationToken,
}

impl<S> Body<S>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    async fn next_chunk(&mut self) -> FetchResult<Option<Bytes>> {
        let chunk = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
            chunk = self.stream.next() => chunk,
        };
        let Some(chunk) = chunk.transpose()? else {
            return Ok(None);
        };

        self.received += chunk.len() as u64;
        if let Some(total) = self.total {
            self.progress.set_ratio(self.received, total);
        }
        Ok(Some(chunk))
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    part.into()
}

async fn write_file<S>(path: &Path, body: &mut Body<S>) -> FetchResult<()>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = File::create(path).await?;
    while let Some(chunk) = body.next_chunk().await? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}
