use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::alerts::engine::AlertSynthesizer;
use super::alerts::model::{Alert, AlertSummary};
use super::broadcaster::Broadcaster;
use super::error::{MonitorError, Result, SourceError};
use super::model::{Category, Observation};
use super::risk::{RiskLevel, RiskModel};
use super::snapshot::{DashboardSnapshot, SourceHealth};
use super::sources::{SignalSource, SourceSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Running,
}

/// What a completed cycle produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    pub alerts: usize,
    pub critical: usize,
    pub degraded: Vec<Category>,
}

#[cfg(test)]
#[derive(Debug, Clone, Copy)]
enum Fault {
    Fail,
    Panic,
}

/// Resets the running flag even if the cycle future is dropped mid-way.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Pulls every source, fuses, synthesizes alerts and publishes one snapshot
/// per cycle.
pub struct Aggregator {
    site: String,
    sources: SourceSet,
    model: RiskModel,
    alerts: Arc<AlertSynthesizer>,
    broadcaster: Arc<Broadcaster>,
    source_timeout: Duration,
    last_known: Mutex<BTreeMap<Category, Observation>>,
    cycle: AtomicU64,
    running: AtomicBool,
    /// Serializes cycles; a manual cycle waits for a scheduled one.
    cycle_lock: tokio::sync::Mutex<()>,
    #[cfg(test)]
    faults: Mutex<std::collections::VecDeque<Fault>>,
}

impl Aggregator {
    pub fn new(
        site: impl Into<String>,
        sources: SourceSet,
        model: RiskModel,
        alerts: Arc<AlertSynthesizer>,
        broadcaster: Arc<Broadcaster>,
        source_timeout: Duration,
    ) -> Self {
        Self {
            site: site.into(),
            sources,
            model,
            alerts,
            broadcaster,
            source_timeout,
            last_known: Mutex::new(BTreeMap::new()),
            cycle: AtomicU64::new(0),
            running: AtomicBool::new(false),
            cycle_lock: tokio::sync::Mutex::new(()),
            #[cfg(test)]
            faults: Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn cycle_state(&self) -> CycleState {
        if self.running.load(Ordering::SeqCst) {
            CycleState::Running
        } else {
            CycleState::Idle
        }
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    /// Fetch one category on demand. Does not touch the published snapshot
    /// or the fallback cache.
    pub async fn pull(&self, category: Category) -> Result<Observation> {
        let source = self.sources.get(category).ok_or_else(|| MonitorError::SourceUnavailable {
            category,
            reason: SourceError::Unavailable("no source configured".to_string()),
        })?;
        fetch_with_timeout(source, self.source_timeout)
            .await
            .map_err(|reason| MonitorError::SourceUnavailable { category, reason })
    }

    async fn pull_all(&self) -> BTreeMap<Category, std::result::Result<Observation, SourceError>> {
        let mut tasks = JoinSet::new();
        for category in Category::all() {
            if let Some(source) = self.sources.get(*category) {
                let timeout = self.source_timeout;
                let category = *category;
                tasks.spawn(async move { (category, fetch_with_timeout(source, timeout).await) });
            }
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((category, result)) => {
                    results.insert(category, result);
                }
                Err(e) => log::error!("Source task failed: {}", e),
            }
        }
        results
    }

    /// Run a single cycle. Individual source failures degrade to fallback
    /// data; only a failure to fuse fails the cycle, and then nothing is
    /// published.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _serial = self.cycle_lock.lock().await;
        self.running.store(true, Ordering::SeqCst);
        let _running = RunningGuard(&self.running);
        #[cfg(test)]
        self.take_fault()?;

        let mut results = self.pull_all().await;
        let now = Utc::now();

        let mut observations = BTreeMap::new();
        let mut source_health = BTreeMap::new();
        let mut fresh = Vec::new();
        {
            let last_known = self.last_known.lock();
            for category in Category::all() {
                let result = results.remove(category).unwrap_or_else(|| {
                    Err(SourceError::Unavailable("no source configured".to_string()))
                });
                let result = result.and_then(|obs| {
                    if obs.category() == *category {
                        Ok(obs)
                    } else {
                        Err(SourceError::Decode(format!(
                            "expected {} observation, got {}",
                            category,
                            obs.category()
                        )))
                    }
                });

                match result {
                    Ok(obs) => {
                        source_health.insert(*category, SourceHealth::live(obs.observed_at()));
                        fresh.push(obs.clone());
                        observations.insert(*category, obs);
                    }
                    Err(reason) => {
                        let err = MonitorError::SourceUnavailable {
                            category: *category,
                            reason,
                        };
                        log::warn!("{}, using fallback", err);
                        let fallback = last_known
                            .get(category)
                            .cloned()
                            .unwrap_or_else(|| Observation::baseline(*category, now));
                        source_health.insert(
                            *category,
                            SourceHealth::fallback(fallback.observed_at(), err.to_string()),
                        );
                        observations.insert(*category, fallback);
                    }
                }
            }
        }

        let risk = self.model.assess(observations.values(), now)?;

        {
            let mut last_known = self.last_known.lock();
            for obs in fresh {
                last_known.insert(obs.category(), obs);
            }
        }

        let all: Vec<Observation> = observations.values().cloned().collect();
        let alerts = self.alerts.evaluate(&all);
        let critical: Vec<Alert> = alerts.iter().filter(|a| a.is_critical()).cloned().collect();

        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = DashboardSnapshot {
            cycle,
            site: self.site.clone(),
            generated_at: now,
            alert_summary: AlertSummary::from_alerts(&alerts),
            observations,
            source_health,
            risk,
            alerts,
        };

        let report = CycleReport {
            cycle,
            overall_score: snapshot.risk.overall_score,
            risk_level: snapshot.risk.risk_level,
            alerts: snapshot.alerts.len(),
            critical: critical.len(),
            degraded: snapshot.degraded_categories(),
        };

        let delivery = self.broadcaster.publish(snapshot);
        if !critical.is_empty() {
            self.broadcaster.publish_critical(critical);
        }

        log::info!(
            "Cycle {}: risk {:.1} ({:?}), {} alert(s), {} critical, {} degraded, {} subscriber(s)",
            report.cycle,
            report.overall_score,
            report.risk_level,
            report.alerts,
            report.critical,
            report.degraded.len(),
            delivery.delivered
        );

        Ok(report)
    }

    #[cfg(test)]
    fn inject(&self, fault: Fault) {
        self.faults.lock().push_back(fault);
    }

    #[cfg(test)]
    fn take_fault(&self) -> Result<()> {
        let fault = self.faults.lock().pop_front();
        match fault {
            Some(Fault::Fail) => Err(MonitorError::CycleFailure("injected failure".to_string())),
            Some(Fault::Panic) => panic!("injected cycle panic"),
            None => Ok(()),
        }
    }

    /// Run cycles until `shutdown` flips to true or its sender is dropped.
    /// Each cycle runs in its own task so a panic fails that cycle only.
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        backoff: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        log::info!("Aggregation loop started for {}", self.site);
        loop {
            if *shutdown.borrow() {
                break;
            }

            let aggregator = Arc::clone(&self);
            let outcome = tokio::spawn(async move { aggregator.run_cycle().await })
                .await
                .unwrap_or_else(|e| Err(MonitorError::CycleFailure(format!("cycle task aborted: {e}"))));

            let wait = match outcome {
                Ok(_) => interval,
                Err(e) => {
                    log::error!("Cycle failed: {}. Retrying in {:?}", e, backoff);
                    backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("Aggregation loop stopped");
    }
}

async fn fetch_with_timeout(
    source: Arc<dyn SignalSource>,
    timeout: Duration,
) -> std::result::Result<Observation, SourceError> {
    match tokio::time::timeout(timeout, source.fetch()).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(timeout)),
    }
}
