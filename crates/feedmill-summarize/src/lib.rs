//! Streaming summarizer plumbing for Feedmill
//!
//! - [`sse`] — buffered SSE event assembly and `data:` payload decoding
//!   (JSON-unescapes Unicode, passes non-JSON through).
//! - [`client`] — HTTP client for the internal pre-processor (streaming
//!   and queued variants).
//! - [`extract`] — HTML title/main-text extraction for URL-sourced
//!   articles.

pub mod client;
pub mod error;
pub mod extract;
pub mod sse;

pub use client::{JobStatus, PreProcessorClient, SummarizeStatusResponse};
pub use error::{Error, Result};
pub use extract::ExtractedContent;
pub use sse::{extract_sse_data, strip_control_chars, SseEventBuffer};
