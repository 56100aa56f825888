//! The transfer primitive: one HTTP download or upload with progress reporting
//! and cooperative cancellation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::StreamExt;
use rand::RngCore;
use reqwest::{Body, Client, Url};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Direction, ThroughputError};

/// Receives the cumulative byte count of the current transfer call.
pub type ProgressTx = mpsc::UnboundedSender<u64>;

/// Slice size used when streaming an upload body.
const UPLOAD_SLICE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: Url,
    pub direction: Direction,
    /// Upload body. Empty for downloads.
    pub payload: Bytes,
}

impl TransferRequest {
    pub fn download(url: Url) -> Self {
        Self {
            url,
            direction: Direction::Download,
            payload: Bytes::new(),
        }
    }

    pub fn upload(url: Url, payload: Bytes) -> Self {
        Self {
            url,
            direction: Direction::Upload,
            payload,
        }
    }
}

/// A timed, abortable, progress-reporting data transfer.
///
/// Implementations send cumulative byte counts on `progress` in non-decreasing
/// order. When `cancel` fires they send one last count and return the bytes
/// moved so far.
#[async_trait::async_trait]
pub trait Transfer: Send + Sync {
    async fn issue(
        &self,
        request: TransferRequest,
        progress: ProgressTx,
        cancel: CancellationToken,
    ) -> Result<u64, ThroughputError>;
}

/// `reqwest`-backed transfer: streamed GET for downloads, streamed POST body
/// for uploads.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("speedprobe/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn download(
        &self,
        url: Url,
        progress: ProgressTx,
        cancel: CancellationToken,
    ) -> Result<u64, ThroughputError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = progress.send(0);
                return Ok(0);
            }
            r = self.client.get(url.clone()).send() => r.map_err(|e| unreachable(&url, &e))?,
        };

        if !response.status().is_success() {
            return Err(ThroughputError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        debug!(url = %url, content_length = ?response.content_length(), "download started");

        let mut stream = response.bytes_stream();
        let mut total: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = progress.send(total);
                    return Ok(total);
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(chunk)) => {
                        total += chunk.len() as u64;
                        let _ = progress.send(total);
                    }
                    Some(Err(e)) => return Err(unreachable(&url, &e)),
                    None => return Ok(total),
                },
            }
        }
    }

    async fn upload(
        &self,
        url: Url,
        payload: Bytes,
        progress: ProgressTx,
        cancel: CancellationToken,
    ) -> Result<u64, ThroughputError> {
        let sent = Arc::new(AtomicU64::new(0));
        let body = {
            let sent = Arc::clone(&sent);
            let tx = progress.clone();
            let slices: Vec<Bytes> = (0..payload.len())
                .step_by(UPLOAD_SLICE_BYTES)
                .map(|start| payload.slice(start..(start + UPLOAD_SLICE_BYTES).min(payload.len())))
                .collect();
            Body::wrap_stream(futures::stream::iter(slices).map(move |slice| {
                let total = sent.fetch_add(slice.len() as u64, Ordering::Relaxed) + slice.len() as u64;
                let _ = tx.send(total);
                Ok::<Bytes, std::io::Error>(slice)
            }))
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let total = sent.load(Ordering::Relaxed);
                let _ = progress.send(total);
                return Ok(total);
            }
            r = self.client.post(url.clone()).body(body).send() => r.map_err(|e| unreachable(&url, &e))?,
        };

        if !response.status().is_success() {
            return Err(ThroughputError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let total = sent.load(Ordering::Relaxed);
        let _ = progress.send(total);
        Ok(total)
    }
}

#[async_trait::async_trait]
impl Transfer for HttpTransfer {
    async fn issue(
        &self,
        request: TransferRequest,
        progress: ProgressTx,
        cancel: CancellationToken,
    ) -> Result<u64, ThroughputError> {
        match request.direction {
            Direction::Download => self.download(request.url, progress, cancel).await,
            Direction::Upload => {
                self.upload(request.url, request.payload, progress, cancel)
                    .await
            }
        }
    }
}

fn unreachable(url: &Url, err: &reqwest::Error) -> ThroughputError {
    ThroughputError::TransferUnreachable {
        url: url.to_string(),
        reason: err.to_string(),
    }
}

/// Append a `nocache=<unix millis>` query pair so intermediaries can't serve a
/// cached copy.
pub fn cache_busted(url: &Url) -> Url {
    let mut busted = url.clone();
    busted
        .query_pairs_mut()
        .append_pair("nocache", &chrono::Utc::now().timestamp_millis().to_string());
    busted
}

/// Pseudo-random upload payload. Content is irrelevant, only the length is.
pub fn random_payload(len: usize) -> Bytes {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    Bytes::from(buf)
}
