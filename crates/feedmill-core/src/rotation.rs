//! Subscription rotation cursor
//!
//! A process-local, daily-resetting circular cursor over the
//! subscription id set. Ids are kept in deterministic lexicographic
//! order; one id is handed out per scheduler tick and only leaves the
//! day's pool once marked processed. At day rollover the processed set
//! clears; the index is preserved, or re-randomized when random start
//! is configured.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Rotator configuration.
#[derive(Debug, Clone)]
pub struct RotatorConfig {
    /// Start at a uniformly random index instead of 0
    pub enable_random_start: bool,
    /// Interval between rotation ticks, used for stats estimates
    pub article_fetch_interval: Duration,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            enable_random_start: true,
            article_fetch_interval: Duration::from_secs(30 * 60),
        }
    }
}

/// What `next()` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextSubscription {
    /// The next unprocessed subscription id
    Next(String),
    /// Every subscription was processed today
    AllDone,
    /// No subscriptions are loaded
    Empty,
}

/// Snapshot of rotation progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationStats {
    pub total_subscriptions: usize,
    pub processed_today: usize,
    pub remaining_today: usize,
    pub current_index: usize,
    pub next_processing_time: Option<DateTime<Utc>>,
    pub estimated_completion_time: Option<DateTime<Utc>>,
}

struct RotationState {
    ordered_ids: Vec<String>,
    index: usize,
    day_key: NaiveDate,
    processed_today: HashSet<String>,
}

/// Owns the rotation cursor. All mutation happens under a write lock
/// held only for the duration of the cursor arithmetic.
pub struct SubscriptionRotator {
    config: RotatorConfig,
    state: RwLock<RotationState>,
}

impl SubscriptionRotator {
    /// Create an empty rotator.
    #[must_use]
    pub fn new(config: RotatorConfig) -> Self {
        Self {
            config,
            state: RwLock::new(RotationState {
                ordered_ids: Vec::new(),
                index: 0,
                day_key: Local::now().date_naive(),
                processed_today: HashSet::new(),
            }),
        }
    }

    /// Replace the subscription set. Ids are sorted lexicographically;
    /// processed marks for ids that survived the reload are kept.
    pub async fn load_subscriptions(&self, mut ids: Vec<String>) {
        ids.sort_unstable();
        ids.dedup();

        let mut state = self.state.write().await;
        let first_load = state.ordered_ids.is_empty();
        state.processed_today.retain(|id| ids.binary_search(id).is_ok());
        state.ordered_ids = ids;

        if state.ordered_ids.is_empty() {
            state.index = 0;
        } else if first_load && self.config.enable_random_start {
            state.index = rand::thread_rng().gen_range(0..state.ordered_ids.len());
            info!(index = state.index, "rotator starting at random index");
        } else if state.index >= state.ordered_ids.len() {
            state.index = 0;
        }

        debug!(
            total = state.ordered_ids.len(),
            processed = state.processed_today.len(),
            "rotator subscriptions loaded"
        );
    }

    /// The next unprocessed subscription id, skipping processed ids
    /// circularly. The same id is returned until `mark_processed`.
    pub async fn next(&self) -> NextSubscription {
        let today = Local::now().date_naive();
        let mut state = self.state.write().await;
        self.roll_over_if_needed(&mut state, today);

        if state.ordered_ids.is_empty() {
            return NextSubscription::Empty;
        }
        if state.processed_today.len() >= state.ordered_ids.len() {
            return NextSubscription::AllDone;
        }

        let len = state.ordered_ids.len();
        for offset in 0..len {
            let idx = (state.index + offset) % len;
            let id = state.ordered_ids[idx].clone();
            if !state.processed_today.contains(&id) {
                state.index = idx;
                return NextSubscription::Next(id);
            }
        }
        NextSubscription::AllDone
    }

    /// Record that `id` finished processing and advance the cursor to
    /// the next unprocessed position.
    pub async fn mark_processed(&self, id: &str) {
        let mut state = self.state.write().await;
        state.processed_today.insert(id.to_string());

        let len = state.ordered_ids.len();
        if len == 0 || state.processed_today.len() >= len {
            return;
        }
        for offset in 1..=len {
            let idx = (state.index + offset) % len;
            if !state.processed_today.contains(&state.ordered_ids[idx]) {
                state.index = idx;
                return;
            }
        }
    }

    /// Progress snapshot plus scheduling estimates.
    pub async fn stats(&self) -> RotationStats {
        let today = Local::now().date_naive();
        let mut state = self.state.write().await;
        self.roll_over_if_needed(&mut state, today);

        let total = state.ordered_ids.len();
        let processed = state.processed_today.len();
        let remaining = total - processed;
        let interval = chrono::Duration::from_std(self.config.article_fetch_interval)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let now = Utc::now();

        RotationStats {
            total_subscriptions: total,
            processed_today: processed,
            remaining_today: remaining,
            current_index: state.index,
            next_processing_time: (remaining > 0).then(|| now + interval),
            estimated_completion_time: (remaining > 0)
                .then(|| now + interval * i32::try_from(remaining).unwrap_or(i32::MAX)),
        }
    }

    fn roll_over_if_needed(&self, state: &mut RotationState, today: NaiveDate) {
        if state.day_key == today {
            return;
        }
        info!(old = %state.day_key, new = %today, "rotation day rollover");
        state.day_key = today;
        state.processed_today.clear();
        if self.config.enable_random_start && !state.ordered_ids.is_empty() {
            state.index = rand::thread_rng().gen_range(0..state.ordered_ids.len());
        }
    }

    #[cfg(test)]
    pub(crate) async fn set_day_key(&self, day: NaiveDate) {
        self.state.write().await.day_key = day;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_rotator() -> SubscriptionRotator {
        SubscriptionRotator::new(RotatorConfig {
            enable_random_start: false,
            article_fetch_interval: Duration::from_secs(30 * 60),
        })
    }

    #[tokio::test]
    async fn test_empty_rotator() {
        let rotator = fixed_rotator();
        assert_eq!(rotator.next().await, NextSubscription::Empty);
    }

    #[tokio::test]
    async fn test_rotation_is_deterministic_and_ordered() {
        let rotator = fixed_rotator();
        rotator
            .load_subscriptions(vec!["s3".into(), "s1".into(), "s2".into()])
            .await;

        assert_eq!(rotator.next().await, NextSubscription::Next("s1".into()));
        // Without mark_processed the cursor stays put.
        assert_eq!(rotator.next().await, NextSubscription::Next("s1".into()));

        rotator.mark_processed("s1").await;
        assert_eq!(rotator.next().await, NextSubscription::Next("s2".into()));
        rotator.mark_processed("s2").await;
        assert_eq!(rotator.next().await, NextSubscription::Next("s3".into()));
        rotator.mark_processed("s3").await;
        assert_eq!(rotator.next().await, NextSubscription::AllDone);
    }

    #[tokio::test]
    async fn test_processed_id_never_returns_same_day() {
        let rotator = fixed_rotator();
        rotator
            .load_subscriptions(vec!["a".into(), "b".into()])
            .await;

        rotator.mark_processed("a").await;
        for _ in 0..5 {
            assert_eq!(rotator.next().await, NextSubscription::Next("b".into()));
        }
    }

    #[tokio::test]
    async fn test_day_rollover_resets_processed() {
        let rotator = fixed_rotator();
        rotator
            .load_subscriptions(vec!["s1".into(), "s2".into(), "s3".into()])
            .await;
        rotator.mark_processed("s1").await;
        rotator.mark_processed("s2").await;
        rotator.mark_processed("s3").await;
        assert_eq!(rotator.next().await, NextSubscription::AllDone);

        let yesterday = Local::now().date_naive().pred_opt().unwrap();
        rotator.set_day_key(yesterday).await;

        // New day: the pool refills and s1 comes around again.
        assert_eq!(rotator.next().await, NextSubscription::Next("s1".into()));
        let stats = rotator.stats().await;
        assert_eq!(stats.processed_today, 0);
        assert_eq!(stats.remaining_today, 3);
    }

    #[tokio::test]
    async fn test_invariant_processed_plus_remaining() {
        let rotator = fixed_rotator();
        rotator
            .load_subscriptions(vec!["a".into(), "b".into(), "c".into(), "d".into()])
            .await;

        for processed in 0..=4usize {
            let stats = rotator.stats().await;
            assert_eq!(stats.processed_today, processed);
            assert_eq!(stats.processed_today + stats.remaining_today, 4);
            if let NextSubscription::Next(id) = rotator.next().await {
                rotator.mark_processed(&id).await;
            }
        }
    }

    #[tokio::test]
    async fn test_reload_preserves_processed_marks() {
        let rotator = fixed_rotator();
        rotator
            .load_subscriptions(vec!["a".into(), "b".into(), "c".into()])
            .await;
        rotator.mark_processed("a").await;

        // "c" disappeared upstream, "d" arrived.
        rotator
            .load_subscriptions(vec!["a".into(), "b".into(), "d".into()])
            .await;

        let stats = rotator.stats().await;
        assert_eq!(stats.total_subscriptions, 3);
        assert_eq!(stats.processed_today, 1);

        assert_eq!(rotator.next().await, NextSubscription::Next("b".into()));
    }

    #[tokio::test]
    async fn test_random_start_lands_in_range() {
        let rotator = SubscriptionRotator::new(RotatorConfig {
            enable_random_start: true,
            article_fetch_interval: Duration::from_secs(60),
        });
        rotator
            .load_subscriptions((0..50).map(|i| format!("s{i:02}")).collect())
            .await;

        let stats = rotator.stats().await;
        assert!(stats.current_index < 50);
        // Whatever the start, the full pool drains exactly once.
        let mut seen = HashSet::new();
        while let NextSubscription::Next(id) = rotator.next().await {
            assert!(seen.insert(id.clone()));
            rotator.mark_processed(&id).await;
        }
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn test_stats_estimates() {
        let rotator = fixed_rotator();
        rotator
            .load_subscriptions(vec!["a".into(), "b".into()])
            .await;

        let before = Utc::now();
        let stats = rotator.stats().await;
        let next = stats.next_processing_time.unwrap();
        let done = stats.estimated_completion_time.unwrap();
        assert!(next >= before + chrono::Duration::minutes(29));
        // Two remaining at 30m each.
        assert!(done >= before + chrono::Duration::minutes(59));
        assert!(done <= Utc::now() + chrono::Duration::minutes(61));
    }
}
