//! Inoreader API layer for Feedmill
//!
//! Everything that talks to the remote feed API lives here:
//! - [`quota`] — daily Zone 1 / Zone 2 rate-limit tracking from response
//!   headers, with a safety buffer and threshold alerts.
//! - [`oauth`] — the shared OAuth2 token broker (serialized refresh,
//!   encrypted at-rest storage).
//! - [`client`] — the typed, quota-gated API client.
//! - [`transport`] — HTTP client construction with env-tunable timeouts.

pub mod client;
pub mod error;
pub mod oauth;
pub mod quota;
pub mod transport;
pub mod types;

pub use client::InoreaderClient;
pub use error::{Error, Result};
pub use oauth::{OAuth2Token, OAuthConfig, TokenBroker, TokenFileStore, TokenValidity};
pub use quota::{
    AlertSeverity, QuotaAlert, QuotaCounters, QuotaDecision, QuotaSnapshot, QuotaZone,
    RateLimitConfig, RateLimitManager, UsageStore,
};
pub use transport::TransportSettings;
pub use types::{ApiCategory, ApiSubscription, ArticleItem, StreamContentsResponse, SubscriptionList};
