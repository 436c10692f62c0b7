//! Low-latency context monitor
//!
//! Polls context utilization at ~10 ms intervals through the shared
//! [`Coordinator`](crate::coordinator::Coordinator) and drives three
//! callbacks from the single gauge:
//! - `state_change` on every [`ContextState`] transition
//! - `preservation` while utilization sits in [preservation, critical)
//! - `critical` at or above the critical threshold
//!
//! The loop is cooperative: a cancellation token stops it at the next
//! iteration boundary, and overruns skip ticks rather than stacking them.

use crate::coordinator::{AgentState, Coordinator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fixed context window assumed for token accounting.
pub const TOTAL_CONTEXT_TOKENS: u64 = 200_000;

/// Context utilization bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextState {
    /// < 50% utilization
    Safe,

    /// 50-75% utilization
    Moderate,

    /// 75-90% utilization
    High,

    /// >= 90% utilization
    Critical,
}

impl ContextState {
    /// Classify a utilization reading.
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            ContextState::Safe
        } else if utilization < 0.75 {
            ContextState::Moderate
        } else if utilization < 0.90 {
            ContextState::High
        } else {
            ContextState::Critical
        }
    }
}

/// Context utilization metrics sampled on each poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMetrics {
    pub utilization: f64,
    pub state: ContextState,
    pub total_tokens: u64,
    pub used_tokens: u64,
    pub available_tokens: u64,
    pub timestamp: DateTime<Utc>,

    /// Agents currently in the Running state
    pub agent_count: usize,

    /// Read from the coordinator `skill_count` metric
    pub skill_count: usize,

    /// Read from the coordinator `file_count` metric
    pub file_count: usize,
}

/// Async callback invoked with the metrics that triggered it.
pub type MetricsCallback =
    Arc<dyn Fn(ContextMetrics) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Async callback invoked with (previous, new) context state.
pub type StateChangeCallback = Arc<
    dyn Fn(ContextState, ContextState) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync,
>;

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct ContextMonitorConfig {
    /// Target polling period (default 10 ms)
    pub polling_interval: Duration,

    /// Utilization at which preservation fires (default 0.75)
    pub preservation_threshold: f64,

    /// Utilization at which emergency compaction fires (default 0.90)
    pub critical_threshold: f64,
}

impl Default for ContextMonitorConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_millis(10),
            preservation_threshold: 0.75,
            critical_threshold: 0.90,
        }
    }
}

/// Monitoring statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorStatistics {
    pub poll_count: u64,
    pub preservation_count: u64,
    pub critical_count: u64,
    pub total_poll_time_secs: f64,
    pub running: bool,
}

impl MonitorStatistics {
    pub fn avg_poll_time_ms(&self) -> f64 {
        if self.poll_count == 0 {
            0.0
        } else {
            self.total_poll_time_secs * 1000.0 / self.poll_count as f64
        }
    }
}

struct MonitorInner {
    last_metrics: Option<ContextMetrics>,
    /// None until the first poll; the first reading always reports a
    /// transition into its band
    last_state: Option<ContextState>,
    preservation_callback: Option<MetricsCallback>,
    critical_callback: Option<MetricsCallback>,
    state_change_callback: Option<StateChangeCallback>,
    stats: MonitorStatistics,
}

/// High-frequency context monitor.
///
/// All agents read context metrics through the coordinator without blocking;
/// the monitor is the primary writer of the utilization gauge.
#[derive(Clone)]
pub struct ContextMonitor {
    coordinator: Coordinator,
    config: ContextMonitorConfig,
    inner: Arc<RwLock<MonitorInner>>,
    cancel: CancellationToken,
}

impl ContextMonitor {
    pub fn new(coordinator: Coordinator, config: ContextMonitorConfig) -> Self {
        Self {
            coordinator,
            config,
            inner: Arc::new(RwLock::new(MonitorInner {
                last_metrics: None,
                last_state: None,
                preservation_callback: None,
                critical_callback: None,
                state_change_callback: None,
                stats: MonitorStatistics::default(),
            })),
            cancel: CancellationToken::new(),
        }
    }

    /// Set the callback fired when utilization is in [preservation, critical).
    pub async fn set_preservation_callback(&self, callback: MetricsCallback) {
        self.inner.write().await.preservation_callback = Some(callback);
    }

    /// Set the callback fired at or above the critical threshold.
    pub async fn set_critical_callback(&self, callback: MetricsCallback) {
        self.inner.write().await.critical_callback = Some(callback);
    }

    /// Set the callback fired on context-state transitions.
    pub async fn set_state_change_callback(&self, callback: StateChangeCallback) {
        self.inner.write().await.state_change_callback = Some(callback);
    }

    /// Start the monitoring loop. Returns the loop task handle.
    ///
    /// Uses an interval that skips missed ticks, so a slow iteration delays
    /// rather than stacks subsequent polls.
    pub fn start(&self) -> JoinHandle<()> {
        let monitor = self.clone();

        tokio::spawn(async move {
            monitor.inner.write().await.stats.running = true;

            let mut interval = tokio::time::interval(monitor.config.polling_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = monitor.cancel.cancelled() => {
                        debug!("Context monitor stopping");
                        monitor.inner.write().await.stats.running = false;
                        break;
                    }
                    _ = interval.tick() => {
                        monitor.poll_once().await;
                    }
                }
            }
        })
    }

    /// Request a cooperative stop; the loop exits at the next boundary.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run a single monitoring iteration.
    ///
    /// Sequence: sample metrics, write utilization back to the coordinator
    /// (idempotent, gives every reader a consistent moment), fire state
    /// change on transition, then exactly one of preservation/critical by
    /// band. Exposed so tests and embedders can drive the monitor manually.
    pub async fn poll_once(&self) {
        let poll_start = Instant::now();

        let metrics = self.sample_metrics().await;
        self.coordinator
            .update_context_utilization(metrics.utilization)
            .await;

        // Budget check excludes callback time
        let poll_time = poll_start.elapsed();
        if poll_time > Duration::from_millis(1) {
            self.coordinator
                .set_metric("context_monitor_slow_poll", poll_time.as_secs_f64())
                .await;
        }

        self.check_thresholds(&metrics).await;

        let mut inner = self.inner.write().await;
        inner.last_metrics = Some(metrics);
        inner.stats.poll_count += 1;
        inner.stats.total_poll_time_secs += poll_time.as_secs_f64();
    }

    /// Sample current metrics from the coordinator.
    async fn sample_metrics(&self) -> ContextMetrics {
        let utilization = self.coordinator.get_context_utilization().await;
        let agent_count = self
            .coordinator
            .count_agents_in_state(AgentState::Running)
            .await;
        let skill_count = self
            .coordinator
            .get_metric("skill_count")
            .await
            .unwrap_or(0.0) as usize;
        let file_count = self
            .coordinator
            .get_metric("file_count")
            .await
            .unwrap_or(0.0) as usize;

        let used_tokens = (utilization * TOTAL_CONTEXT_TOKENS as f64) as u64;

        ContextMetrics {
            utilization,
            state: ContextState::from_utilization(utilization),
            total_tokens: TOTAL_CONTEXT_TOKENS,
            used_tokens,
            available_tokens: TOTAL_CONTEXT_TOKENS - used_tokens,
            timestamp: Utc::now(),
            agent_count,
            skill_count,
            file_count,
        }
    }

    /// Fire threshold callbacks for one reading.
    ///
    /// Preservation and critical are independent bands: a critical reading
    /// does NOT fire preservation.
    async fn check_thresholds(&self, metrics: &ContextMetrics) {
        let (state_cb, preservation_cb, critical_cb, last_state) = {
            let inner = self.inner.read().await;
            (
                inner.state_change_callback.clone(),
                inner.preservation_callback.clone(),
                inner.critical_callback.clone(),
                inner.last_state,
            )
        };

        if last_state != Some(metrics.state) {
            if let Some(cb) = state_cb {
                cb(last_state.unwrap_or(ContextState::Safe), metrics.state).await;
            }
            self.inner.write().await.last_state = Some(metrics.state);
        }

        if metrics.utilization >= self.config.preservation_threshold
            && metrics.utilization < self.config.critical_threshold
        {
            if let Some(cb) = preservation_cb {
                self.inner.write().await.stats.preservation_count += 1;
                cb(metrics.clone()).await;
            }
        }

        if metrics.utilization >= self.config.critical_threshold {
            warn!(
                "Context utilization critical: {:.1}%",
                metrics.utilization * 100.0
            );
            if let Some(cb) = critical_cb {
                self.inner.write().await.stats.critical_count += 1;
                cb(metrics.clone()).await;
            }
        }
    }

    /// Most recent metrics, if any poll has run.
    pub async fn current_metrics(&self) -> Option<ContextMetrics> {
        self.inner.read().await.last_metrics.clone()
    }

    /// Monitoring statistics.
    pub async fn statistics(&self) -> MonitorStatistics {
        self.inner.read().await.stats.clone()
    }

    /// Whether the last reading calls for preservation.
    pub async fn is_preservation_needed(&self) -> bool {
        self.inner
            .read()
            .await
            .last_metrics
            .as_ref()
            .map(|m| m.utilization >= self.config.preservation_threshold)
            .unwrap_or(false)
    }

    /// Whether the last reading is critical.
    pub async fn is_critical(&self) -> bool {
        self.inner
            .read()
            .await
            .last_metrics
            .as_ref()
            .map(|m| m.utilization >= self.config.critical_threshold)
            .unwrap_or(false)
    }

    /// Token budget still available per the last reading.
    pub async fn available_budget(&self) -> u64 {
        self.inner
            .read()
            .await
            .last_metrics
            .as_ref()
            .map(|m| m.available_tokens)
            .unwrap_or(TOTAL_CONTEXT_TOKENS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(counter: Arc<AtomicUsize>) -> MetricsCallback {
        Arc::new(move |_metrics| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[test]
    fn test_state_classification() {
        assert_eq!(ContextState::from_utilization(0.0), ContextState::Safe);
        assert_eq!(ContextState::from_utilization(0.49), ContextState::Safe);
        assert_eq!(ContextState::from_utilization(0.5), ContextState::Moderate);
        assert_eq!(ContextState::from_utilization(0.74), ContextState::Moderate);
        assert_eq!(ContextState::from_utilization(0.75), ContextState::High);
        assert_eq!(ContextState::from_utilization(0.89), ContextState::High);
        assert_eq!(ContextState::from_utilization(0.90), ContextState::Critical);
        assert_eq!(ContextState::from_utilization(1.0), ContextState::Critical);
    }

    #[tokio::test]
    async fn test_threshold_sequence() {
        // Scenario: utilization walks [0.30, 0.60, 0.78, 0.82, 0.95, 0.50]
        let coordinator = Coordinator::new();
        let monitor = ContextMonitor::new(coordinator.clone(), ContextMonitorConfig::default());

        let preservations = Arc::new(AtomicUsize::new(0));
        let criticals = Arc::new(AtomicUsize::new(0));
        let state_changes = Arc::new(AtomicUsize::new(0));

        monitor
            .set_preservation_callback(counting_callback(preservations.clone()))
            .await;
        monitor
            .set_critical_callback(counting_callback(criticals.clone()))
            .await;
        {
            let state_changes = state_changes.clone();
            monitor
                .set_state_change_callback(Arc::new(move |_old, _new| {
                    let state_changes = state_changes.clone();
                    Box::pin(async move {
                        state_changes.fetch_add(1, Ordering::SeqCst);
                    })
                }))
                .await;
        }

        for utilization in [0.30, 0.60, 0.78, 0.82, 0.95, 0.50] {
            coordinator.update_context_utilization(utilization).await;
            monitor.poll_once().await;
        }

        // Preservation fires on 0.78 and 0.82 only; 0.95 is critical-only
        assert_eq!(preservations.load(Ordering::SeqCst), 2);
        assert_eq!(criticals.load(Ordering::SeqCst), 1);
        // First reading enters Safe, then Safe->Moderate, Moderate->High,
        // High->Critical, Critical->Moderate; 0.82 stays High and is silent
        assert_eq!(state_changes.load(Ordering::SeqCst), 5);

        let stats = monitor.statistics().await;
        assert_eq!(stats.poll_count, 6);
        assert_eq!(stats.preservation_count, 2);
        assert_eq!(stats.critical_count, 1);
    }

    #[tokio::test]
    async fn test_writeback_and_token_accounting() {
        let coordinator = Coordinator::new();
        let monitor = ContextMonitor::new(coordinator.clone(), ContextMonitorConfig::default());

        coordinator.update_context_utilization(0.5).await;
        coordinator.set_metric("skill_count", 7.0).await;
        coordinator.set_metric("file_count", 3.0).await;
        monitor.poll_once().await;

        let metrics = monitor.current_metrics().await.unwrap();
        assert_eq!(metrics.used_tokens, 100_000);
        assert_eq!(metrics.available_tokens, 100_000);
        assert_eq!(metrics.skill_count, 7);
        assert_eq!(metrics.file_count, 3);
        assert_eq!(coordinator.get_context_utilization().await, 0.5);
    }

    #[tokio::test]
    async fn test_loop_start_stop() {
        let coordinator = Coordinator::new();
        let monitor = ContextMonitor::new(
            coordinator.clone(),
            ContextMonitorConfig {
                polling_interval: Duration::from_millis(1),
                ..Default::default()
            },
        );

        let handle = monitor.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.stop();
        handle.await.unwrap();

        let stats = monitor.statistics().await;
        assert!(stats.poll_count > 5, "expected several polls, got {}", stats.poll_count);
        assert!(!stats.running);
    }

    #[tokio::test]
    async fn test_preservation_helpers() {
        let coordinator = Coordinator::new();
        let monitor = ContextMonitor::new(coordinator.clone(), ContextMonitorConfig::default());

        assert!(!monitor.is_preservation_needed().await);
        assert_eq!(monitor.available_budget().await, TOTAL_CONTEXT_TOKENS);

        coordinator.update_context_utilization(0.8).await;
        monitor.poll_once().await;
        assert!(monitor.is_preservation_needed().await);
        assert!(!monitor.is_critical().await);

        coordinator.update_context_utilization(0.95).await;
        monitor.poll_once().await;
        assert!(monitor.is_critical().await);
    }
}
