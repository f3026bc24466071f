//! Pre-processor HTTP client
//!
//! Talks to the internal summarizer. The streaming variant returns a
//! channel fed by a reader task; the task stops on cancellation of the
//! caller-supplied token, so the upstream body is released as soon as
//! the generation is abandoned.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Request body for both summarize variants.
#[derive(Debug, Serialize)]
struct SummarizeRequest<'a> {
    content: &'a str,
    article_id: &'a str,
    title: &'a str,
}

/// Response of `POST /api/v1/summarize/queue`.
#[derive(Debug, Deserialize)]
struct QueueResponse {
    job_id: String,
}

/// Status of a queued summarize job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

/// Response of `GET /api/v1/summarize/status/<jobId>`.
#[derive(Debug, Clone, Deserialize)]
pub struct SummarizeStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Client for the internal pre-processor service.
pub struct PreProcessorClient {
    http: reqwest::Client,
    base_url: String,
}

impl PreProcessorClient {
    /// Create a client rooted at `base_url`. No total timeout is set on
    /// the transport; stream lifetimes are governed by the caller's
    /// cancellation token.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Network(format!("failed to build http client: {e}")))?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self { http, base_url })
    }

    /// `POST /api/v1/summarize/stream`.
    ///
    /// Returns a receiver of raw body chunks. The reader task exits on
    /// upstream EOF, receiver drop, or cancellation of `cancel`.
    pub async fn stream_summarize(
        &self,
        content: &str,
        article_id: &str,
        title: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<Vec<u8>>>> {
        let response = self
            .http
            .post(format!("{}/api/v1/summarize/stream", self.base_url))
            .json(&SummarizeRequest {
                content,
                article_id,
                title,
            })
            .send()
            .await
            .map_err(|e| Error::Network(format!("summarize stream request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let (tx, rx) = mpsc::channel(32);
        let article_id = article_id.to_string();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(%article_id, "summarize stream canceled, dropping upstream body");
                        let _ = tx.send(Err(Error::Canceled)).await;
                        break;
                    }
                    item = stream.next() => match item {
                        Some(Ok(chunk)) => {
                            if tx.send(Ok(chunk.to_vec())).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            let _ = tx
                                .send(Err(Error::Network(format!("stream read failed: {e}"))))
                                .await;
                            break;
                        }
                        // EOF: closing the channel signals completion.
                        None => break,
                    }
                }
            }
        });

        Ok(rx)
    }

    /// `POST /api/v1/summarize/queue` — async variant, returns the job id.
    pub async fn queue_summarize(
        &self,
        content: &str,
        article_id: &str,
        title: &str,
    ) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/api/v1/summarize/queue", self.base_url))
            .json(&SummarizeRequest {
                content,
                article_id,
                title,
            })
            .send()
            .await
            .map_err(|e| Error::Network(format!("summarize queue request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("failed to read queue response: {e}")))?;
        if !status.is_success() {
            return Err(Error::Upstream {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }
        let parsed: QueueResponse =
            serde_json::from_str(&body).map_err(|e| Error::Decode(e.to_string()))?;
        Ok(parsed.job_id)
    }

    /// `GET /api/v1/summarize/status/<jobId>`.
    pub async fn summarize_status(&self, job_id: &str) -> Result<SummarizeStatusResponse> {
        let response = self
            .http
            .get(format!("{}/api/v1/summarize/status/{job_id}", self.base_url))
            .send()
            .await
            .map_err(|e| Error::Network(format!("status request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("failed to read status response: {e}")))?;
        if !status.is_success() {
            return Err(Error::Upstream {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }
        serde_json::from_str(&body).map_err(|e| Error::Decode(e.to_string()))
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
