//! Latency history learned from solver outcomes.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;

use strata_core::{traits::LatencyHistory, PartitionId, TenantId};

type HistoryKey = (TenantId, PartitionId, String);

/// Suggests escalation intervals from a high percentile of recent latencies
/// per (tenant, partition, query key).
pub struct RollingLatencyHistory {
    window: usize,
    min_samples: usize,
    percentile: f64,
    samples: DashMap<HistoryKey, VecDeque<Duration>>,
}

impl RollingLatencyHistory {
    /// `percentile` is clamped to `0.0..=1.0`
    pub fn new(window: usize, min_samples: usize, percentile: f64) -> Self {
        Self {
            window: window.max(1),
            min_samples: min_samples.max(1),
            percentile: percentile.clamp(0.0, 1.0),
            samples: DashMap::new(),
        }
    }

    pub fn sample_count(&self, tenant: &TenantId, partition: PartitionId, query_key: &str) -> usize {
        self.samples
            .get(&(tenant.clone(), partition, query_key.to_string()))
            .map_or(0, |samples| samples.len())
    }
}

impl Default for RollingLatencyHistory {
    fn default() -> Self {
        Self::new(64, 5, 0.95)
    }
}

impl LatencyHistory for RollingLatencyHistory {
    fn suggest_timeout(&self, tenant: &TenantId, partition: PartitionId, query_key: &str) -> Option<Duration> {
        let samples = self
            .samples
            .get(&(tenant.clone(), partition, query_key.to_string()))?;
        if samples.len() < self.min_samples {
            return None;
        }

        let mut sorted: Vec<Duration> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let rank = ((sorted.len() - 1) as f64 * self.percentile).round() as usize;
        sorted.get(rank).copied()
    }

    fn record(&self, tenant: &TenantId, partition: PartitionId, query_key: &str, elapsed: Duration) {
        let mut samples = self
            .samples
            .entry((tenant.clone(), partition, query_key.to_string()))
            .or_default();
        samples.push_back(elapsed);
        while samples.len() > self.window {
            samples.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_no_suggestion_until_enough_samples() {
        let history = RollingLatencyHistory::new(10, 3, 0.9);
        let tenant = TenantId::new("acme");
        history.record(&tenant, PartitionId(1), "q", ms(10));
        history.record(&tenant, PartitionId(1), "q", ms(20));
        assert_eq!(history.suggest_timeout(&tenant, PartitionId(1), "q"), None);

        history.record(&tenant, PartitionId(1), "q", ms(30));
        assert_eq!(history.suggest_timeout(&tenant, PartitionId(1), "q"), Some(ms(30)));
        assert_eq!(history.suggest_timeout(&tenant, PartitionId(2), "q"), None);
    }

    #[test]
    fn test_window_drops_old_samples() {
        let history = RollingLatencyHistory::new(3, 1, 1.0);
        let tenant = TenantId::new("acme");
        history.record(&tenant, PartitionId(1), "q", ms(500));
        for _ in 0..3 {
            history.record(&tenant, PartitionId(1), "q", ms(5));
        }
        assert_eq!(history.sample_count(&tenant, PartitionId(1), "q"), 3);
        assert_eq!(history.suggest_timeout(&tenant, PartitionId(1), "q"), Some(ms(5)));
    }

    #[test]
    fn test_percentile_picks_high_sample() {
        let history = RollingLatencyHistory::new(100, 1, 0.5);
        let tenant = TenantId::new("acme");
        for n in [10, 20, 30, 40, 50] {
            history.record(&tenant, PartitionId(1), "q", ms(n));
        }
        assert_eq!(history.suggest_timeout(&tenant, PartitionId(1), "q"), Some(ms(30)));
    }
}
