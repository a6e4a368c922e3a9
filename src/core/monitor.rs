//! Entry point for embedding the engine: owns the aggregator, alert history
//! and broadcaster for one site, and exposes the read and acknowledgement
//! operations consumers call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::alerts::engine::AlertSynthesizer;
use super::alerts::model::{Alert, AlertId, AlertPriority, Payload};
use super::broadcaster::{Broadcaster, SubscriberId, Subscription};
use super::config::Settings;
use super::coordinator::{Aggregator, CycleReport, CycleState};
use super::error::Result;
use super::model::{Category, Observation};
use super::risk::RiskModel;
use super::snapshot::DashboardSnapshot;
use super::sources::SourceSet;

pub struct SiteMonitor {
    settings: Settings,
    aggregator: Arc<Aggregator>,
    alerts: Arc<AlertSynthesizer>,
    broadcaster: Arc<Broadcaster>,
    shutdown: watch::Sender<bool>,
    spawned: AtomicBool,
}

impl SiteMonitor {
    /// Build with the sources named in `settings`.
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let sources = SourceSet::from_settings(&settings)?;
        Self::with_sources(settings, sources)
    }

    /// Build with caller-supplied sources. Categories without a source are
    /// served from fallback data every cycle.
    pub fn with_sources(settings: Settings, sources: SourceSet) -> Result<Self> {
        settings.validate()?;

        let model = RiskModel::new(settings.weights.clone())?;
        let broadcaster = Arc::new(Broadcaster::new(
            DashboardSnapshot::initial(&settings.site.name, &model)?,
            settings.subscriber_buffer,
        ));
        let alerts = Arc::new(AlertSynthesizer::new(
            settings.thresholds.clone(),
            settings.site.name.clone(),
            settings.history_capacity,
        ));
        let aggregator = Arc::new(Aggregator::new(
            settings.site.name.clone(),
            sources,
            model,
            Arc::clone(&alerts),
            Arc::clone(&broadcaster),
            settings.source_timeout(),
        ));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            settings,
            aggregator,
            alerts,
            broadcaster,
            shutdown,
            spawned: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Start the background cycle loop. The first cycle runs immediately.
    /// Returns `None` if the loop was already started.
    pub fn spawn(&self) -> Option<JoinHandle<()>> {
        if self.spawned.swap(true, Ordering::SeqCst) {
            log::warn!("Aggregation loop for {} already started", self.settings.site.name);
            return None;
        }
        Some(tokio::spawn(Arc::clone(&self.aggregator).run(
            self.settings.cycle_interval(),
            self.settings.backoff_interval(),
            self.shutdown.subscribe(),
        )))
    }

    /// Ask the loop to stop after the current cycle.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run one cycle now, outside the schedule.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.aggregator.run_cycle().await
    }

    pub fn cycle_state(&self) -> CycleState {
        self.aggregator.cycle_state()
    }

    pub fn snapshot(&self) -> Arc<DashboardSnapshot> {
        self.broadcaster.current_snapshot()
    }

    /// Active alerts across retained history, priority then recency.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.active_alerts()
    }

    pub fn alert_history(&self) -> Vec<Alert> {
        self.alerts.history()
    }

    pub fn critical_alerts(&self) -> Vec<Alert> {
        self.alerts.critical_alerts()
    }

    pub fn raise_alert(
        &self,
        category: Category,
        message: impl Into<String>,
        priority: AlertPriority,
        location: Option<String>,
        payload: Option<Payload>,
    ) -> Alert {
        self.alerts
            .create(category, message, priority, location, payload)
    }

    pub fn acknowledge_alert(&self, id: AlertId, actor: &str) -> Result<Alert> {
        self.alerts.acknowledge(id, actor)
    }

    pub fn resolve_alert(&self, id: AlertId) -> Result<Alert> {
        self.alerts.resolve(id)
    }

    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    pub async fn pull(&self, category: Category) -> Result<Observation> {
        self.aggregator.pull(category).await
    }
}

impl Drop for SiteMonitor {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::MonitorError;
    use crate::core::risk::FusionWeights;

    #[test]
    fn test_invalid_settings_are_fatal() {
        let settings = Settings {
            weights: serde_json::from_str(r#"{"weather": 0.5, "crowd": 0.6}"#).unwrap(),
            ..Settings::default()
        };
        let err = SiteMonitor::with_sources(settings, SourceSet::new())
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_placeholder_snapshot_before_first_cycle() {
        let monitor = SiteMonitor::with_sources(Settings::default(), SourceSet::new()).unwrap();
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.cycle, 0);
        assert_eq!(snapshot.site, Settings::default().site.name);
        assert_eq!(monitor.cycle_state(), CycleState::Idle);
        assert_eq!(monitor.settings().weights, FusionWeights::default());
    }

    #[test]
    fn test_manual_alert_lifecycle() {
        let monitor = SiteMonitor::with_sources(Settings::default(), SourceSet::new()).unwrap();
        let alert = monitor.raise_alert(
            Category::Crowd,
            "Gate 4 closed",
            AlertPriority::High,
            None,
            None,
        );
        assert_eq!(monitor.alerts().len(), 1);

        let acked = monitor.acknowledge_alert(alert.id, "ops-1").unwrap();
        assert!(acked.acknowledged);
        monitor.resolve_alert(alert.id).unwrap();
        assert!(monitor.alerts().is_empty());
        assert_eq!(monitor.alert_history().len(), 1);

        assert!(matches!(
            monitor.acknowledge_alert(AlertId(99), "ops-1"),
            Err(MonitorError::NotFound(AlertId(99)))
        ));
    }

    #[tokio::test]
    async fn test_loop_starts_once() {
        let monitor = SiteMonitor::with_sources(Settings::default(), SourceSet::new()).unwrap();
        let handle = monitor.spawn().unwrap();
        assert!(monitor.spawn().is_none());

        monitor.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(monitor.spawn().is_none());
    }

    #[tokio::test]
    async fn test_default_monitor_runs_synthetic_cycle() {
        let monitor = SiteMonitor::new(Settings::default()).unwrap();
        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.cycle, 1);
        assert!(report.degraded.is_empty());
        assert!((0.0..=100.0).contains(&monitor.snapshot().risk.overall_score));
    }
}
