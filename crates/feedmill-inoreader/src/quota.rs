//! Zone quota tracking and gating
//!
//! Tracks the remote's daily Zone 1 (read) / Zone 2 (write) quotas from
//! `X-Reader-Zone*` response headers, applies a configurable safety
//! buffer on top, and gates outbound calls. Counters roll over at local
//! midnight; crossing a configured usage threshold fires an alert to
//! every registered callback exactly once per day.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use reqwest::header::HeaderMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Quota bucket the remote assigns an endpoint to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaZone {
    /// Read operations: list, stream contents, user info, unread counts
    Zone1,
    /// Everything else (mutating operations)
    Zone2,
}

impl std::fmt::Display for QuotaZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaZone::Zone1 => write!(f, "zone1"),
            QuotaZone::Zone2 => write!(f, "zone2"),
        }
    }
}

/// Path prefixes billed against Zone 1. Anything else is Zone 2.
const ZONE1_PREFIXES: &[&str] = &[
    "/subscription/list",
    "/stream/contents",
    "/user-info",
    "/unread-count",
];

/// Classify an endpoint path into its quota zone.
#[must_use]
pub fn classify_endpoint(path: &str) -> QuotaZone {
    let trimmed = path.trim_start_matches('/');
    if ZONE1_PREFIXES
        .iter()
        .any(|p| trimmed.starts_with(p.trim_start_matches('/')))
    {
        QuotaZone::Zone1
    } else {
        QuotaZone::Zone2
    }
}

/// Rate-limit manager configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Daily Zone 1 request limit
    pub zone1_daily_limit: u64,
    /// Daily Zone 2 request limit
    pub zone2_daily_limit: u64,
    /// Fraction of the quota held in reserve, percent
    pub safety_buffer_percent: u64,
    /// Usage percentages at which to notify
    pub alert_thresholds: Vec<u8>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            zone1_daily_limit: 100,
            zone2_daily_limit: 100,
            safety_buffer_percent: 10,
            alert_thresholds: vec![50, 75, 90],
        }
    }
}

/// Daily quota counters, persisted after each header update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaCounters {
    /// Local calendar day the counters belong to
    pub day_key: NaiveDate,
    pub zone1_used: u64,
    pub zone1_limit: u64,
    pub zone2_used: u64,
    pub zone2_limit: u64,
}

impl QuotaCounters {
    fn fresh(day_key: NaiveDate, config: &RateLimitConfig) -> Self {
        Self {
            day_key,
            zone1_used: 0,
            zone1_limit: config.zone1_daily_limit,
            zone2_used: 0,
            zone2_limit: config.zone2_daily_limit,
        }
    }

    fn used(&self, zone: QuotaZone) -> u64 {
        match zone {
            QuotaZone::Zone1 => self.zone1_used,
            QuotaZone::Zone2 => self.zone2_used,
        }
    }

    fn limit(&self, zone: QuotaZone) -> u64 {
        match zone {
            QuotaZone::Zone1 => self.zone1_limit,
            QuotaZone::Zone2 => self.zone2_limit,
        }
    }
}

/// Outcome of a pre-flight quota check.
#[derive(Debug, Clone)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub zone: QuotaZone,
    /// Calls left under the effective (buffered) limit
    pub remaining: u64,
    /// Denial reason when `allowed` is false
    pub reason: Option<String>,
}

/// Severity of a threshold alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    fn for_threshold(threshold_pct: u8) -> Self {
        if threshold_pct >= 90 {
            AlertSeverity::Critical
        } else if threshold_pct >= 75 {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Info
        }
    }

    /// Label used in logs and API payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// A threshold crossing, delivered once per zone/threshold/day.
#[derive(Debug, Clone)]
pub struct QuotaAlert {
    pub zone: QuotaZone,
    pub severity: AlertSeverity,
    pub threshold_pct: u8,
    pub usage_pct: f64,
    pub used: u64,
    pub limit: u64,
    pub day_key: NaiveDate,
}

/// Callback invoked for each alert. Must not block; each delivery runs on
/// its own task.
pub type AlertCallback = Arc<dyn Fn(QuotaAlert) + Send + Sync>;

/// Persistence seam for the daily counters.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Upsert the counters for `counters.day_key`.
    async fn record_daily_usage(&self, counters: &QuotaCounters) -> anyhow::Result<()>;
}

/// Read-only snapshot for status endpoints.
#[derive(Debug, Clone)]
pub struct QuotaSnapshot {
    pub counters: QuotaCounters,
    pub blocked: bool,
    pub zone1_effective_limit: u64,
    pub zone2_effective_limit: u64,
    pub zone1_usage_pct: f64,
    pub zone2_usage_pct: f64,
}

struct QuotaState {
    counters: QuotaCounters,
    blocked: bool,
    /// (zone, threshold) pairs already alerted today
    crossed: HashSet<(QuotaZone, u8)>,
}

/// Tracks quota usage and gates outbound calls.
pub struct RateLimitManager {
    config: RateLimitConfig,
    state: RwLock<QuotaState>,
    callbacks: RwLock<Vec<AlertCallback>>,
    usage_store: Option<Arc<dyn UsageStore>>,
}

impl RateLimitManager {
    /// Create a manager with fresh counters for today.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let today = Local::now().date_naive();
        Self {
            state: RwLock::new(QuotaState {
                counters: QuotaCounters::fresh(today, &config),
                blocked: false,
                crossed: HashSet::new(),
            }),
            callbacks: RwLock::new(Vec::new()),
            usage_store: None,
            config,
        }
    }

    /// Attach the counter persistence seam.
    #[must_use]
    pub fn with_usage_store(mut self, store: Arc<dyn UsageStore>) -> Self {
        self.usage_store = Some(store);
        self
    }

    /// Register an alert callback. Invocation order is unspecified.
    pub async fn register_alert_callback(&self, callback: AlertCallback) {
        self.callbacks.write().await.push(callback);
    }

    /// Effective limit after subtracting the safety buffer.
    #[must_use]
    pub fn effective_limit(&self, limit: u64) -> u64 {
        limit.saturating_sub(limit * self.config.safety_buffer_percent / 100)
    }

    /// Parse zone headers from a response, merge them into the counters,
    /// re-evaluate the blocked flag, fire newly-crossed threshold alerts
    /// and persist the counters.
    pub async fn update_from_headers(&self, headers: &HeaderMap, endpoint: &str) {
        let zone1 = parse_zone_headers(headers, 1);
        let zone2 = parse_zone_headers(headers, 2);
        if !zone1.has_data() && !zone2.has_data() {
            return;
        }

        let today = Local::now().date_naive();
        let mut alerts = Vec::new();
        let snapshot = {
            let mut state = self.state.write().await;
            self.roll_over_if_needed(&mut state, today);

            apply_zone(&mut state.counters, QuotaZone::Zone1, &zone1);
            apply_zone(&mut state.counters, QuotaZone::Zone2, &zone2);

            state.blocked = state.counters.zone1_used
                >= self.effective_limit(state.counters.zone1_limit)
                || state.counters.zone2_used >= self.effective_limit(state.counters.zone2_limit);

            for zone in [QuotaZone::Zone1, QuotaZone::Zone2] {
                let used = state.counters.used(zone);
                let limit = state.counters.limit(zone);
                if limit == 0 {
                    continue;
                }
                let usage_pct = used as f64 / limit as f64 * 100.0;
                for &threshold in &self.config.alert_thresholds {
                    if usage_pct >= f64::from(threshold)
                        && state.crossed.insert((zone, threshold))
                    {
                        alerts.push(QuotaAlert {
                            zone,
                            severity: AlertSeverity::for_threshold(threshold),
                            threshold_pct: threshold,
                            usage_pct,
                            used,
                            limit,
                            day_key: state.counters.day_key,
                        });
                    }
                }
            }

            debug!(
                endpoint,
                zone1_used = state.counters.zone1_used,
                zone2_used = state.counters.zone2_used,
                blocked = state.blocked,
                "quota counters updated"
            );
            state.counters.clone()
        };

        if !alerts.is_empty() {
            let callbacks = self.callbacks.read().await.clone();
            for alert in alerts {
                for callback in &callbacks {
                    let callback = Arc::clone(callback);
                    let alert = alert.clone();
                    tokio::spawn(async move { callback(alert) });
                }
            }
        }

        if let Some(store) = &self.usage_store {
            if let Err(e) = store.record_daily_usage(&snapshot).await {
                warn!("failed to persist quota counters: {e}");
            }
        }
    }

    /// Pre-flight gate for an outbound call.
    pub async fn check_allowed(&self, endpoint: &str) -> QuotaDecision {
        let zone = classify_endpoint(endpoint);
        let today = Local::now().date_naive();
        let mut state = self.state.write().await;
        self.roll_over_if_needed(&mut state, today);

        let used = state.counters.used(zone);
        let effective = self.effective_limit(state.counters.limit(zone));
        let allowed = used < effective;
        QuotaDecision {
            allowed,
            zone,
            remaining: effective.saturating_sub(used),
            reason: (!allowed).then(|| {
                format!("daily quota safety buffer reached for {zone} ({used}/{effective})")
            }),
        }
    }

    /// Reset counters for a new day. Idempotent: calling again on the
    /// same day is a no-op.
    pub async fn reset_daily_usage(&self) {
        let today = Local::now().date_naive();
        let mut state = self.state.write().await;
        self.roll_over_if_needed(&mut state, today);
    }

    /// Whether either zone currently sits at or above its effective limit.
    pub async fn is_blocked(&self) -> bool {
        self.state.read().await.blocked
    }

    /// Snapshot for status endpoints.
    pub async fn snapshot(&self) -> QuotaSnapshot {
        let state = self.state.read().await;
        let counters = state.counters.clone();
        QuotaSnapshot {
            zone1_effective_limit: self.effective_limit(counters.zone1_limit),
            zone2_effective_limit: self.effective_limit(counters.zone2_limit),
            zone1_usage_pct: usage_pct(counters.zone1_used, counters.zone1_limit),
            zone2_usage_pct: usage_pct(counters.zone2_used, counters.zone2_limit),
            blocked: state.blocked,
            counters,
        }
    }

    fn roll_over_if_needed(&self, state: &mut QuotaState, today: NaiveDate) {
        if state.counters.day_key != today {
            debug!(
                old = %state.counters.day_key,
                new = %today,
                "quota day rollover, resetting counters"
            );
            state.counters = QuotaCounters::fresh(today, &self.config);
            state.blocked = false;
            state.crossed.clear();
        }
    }

    #[cfg(test)]
    async fn set_day_key(&self, day: NaiveDate) {
        self.state.write().await.counters.day_key = day;
    }
}

fn usage_pct(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        0.0
    } else {
        used as f64 / limit as f64 * 100.0
    }
}

/// Values parsed from one zone's headers before merging.
#[derive(Debug, Default)]
struct ZoneHeaderValues {
    usage: Option<u64>,
    limit: Option<u64>,
    remaining: Option<u64>,
}

impl ZoneHeaderValues {
    fn has_data(&self) -> bool {
        self.usage.is_some() || self.limit.is_some() || self.remaining.is_some()
    }
}

fn parse_zone_headers(headers: &HeaderMap, zone: u8) -> ZoneHeaderValues {
    ZoneHeaderValues {
        usage: header_u64(headers, &format!("X-Reader-Zone{zone}-Usage")),
        limit: header_u64(headers, &format!("X-Reader-Zone{zone}-Limit")),
        remaining: header_u64(headers, &format!("X-Reader-Zone{zone}-Remaining")),
    }
}

fn apply_zone(counters: &mut QuotaCounters, zone: QuotaZone, values: &ZoneHeaderValues) {
    if !values.has_data() {
        return;
    }
    let (used, limit) = match zone {
        QuotaZone::Zone1 => (&mut counters.zone1_used, &mut counters.zone1_limit),
        QuotaZone::Zone2 => (&mut counters.zone2_used, &mut counters.zone2_limit),
    };
    if let Some(l) = values.limit {
        *limit = l;
    }
    if let Some(u) = values.usage {
        *used = u;
    } else if let (Some(l), Some(r)) = (values.limit, values.remaining) {
        *used = l.saturating_sub(r);
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}
