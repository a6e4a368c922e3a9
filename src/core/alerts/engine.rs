// Alert synthesizer - turns observations into alerts and owns the alert history.
//
// History entries are individually locked so acknowledging one alert only
// contends with writers of that same alert. The ledger lock is held just long
// enough to append, evict, or look up an entry.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use super::model::{sort_for_display, Alert, AlertId, AlertPriority, AlertStatus, Payload};
use super::triggers::{evaluate_trigger, AlertThresholds, TriggerOutcome};
use crate::core::error::{MonitorError, Result};
use crate::core::model::{Category, Observation};

/// Rule name recorded on alerts created directly through `create`.
pub const MANUAL_RULE: &str = "manual";

struct Ledger {
    next_id: u64,
    /// Ascending by id; oldest evicted first.
    entries: VecDeque<(AlertId, Arc<Mutex<Alert>>)>,
}

impl Ledger {
    fn find(&self, id: AlertId) -> Option<Arc<Mutex<Alert>>> {
        self.entries
            .binary_search_by_key(&id, |(entry_id, _)| *entry_id)
            .ok()
            .map(|idx| Arc::clone(&self.entries[idx].1))
    }
}

pub struct AlertSynthesizer {
    thresholds: AlertThresholds,
    /// Default location for alerts that do not name one.
    location: String,
    capacity: usize,
    ledger: RwLock<Ledger>,
    /// Critical alerts from the latest evaluation only.
    critical: RwLock<Vec<AlertId>>,
}

impl AlertSynthesizer {
    pub fn new(thresholds: AlertThresholds, location: impl Into<String>, capacity: usize) -> Self {
        Self {
            thresholds,
            location: location.into(),
            capacity: capacity.max(1),
            ledger: RwLock::new(Ledger {
                next_id: 1,
                entries: VecDeque::new(),
            }),
            critical: RwLock::new(Vec::new()),
        }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Run every category's rule table, record at most one alert per
    /// category, and replace the critical view with this evaluation's
    /// critical set. Returns the new alerts in display order.
    pub fn evaluate(&self, observations: &[Observation]) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = observations
            .iter()
            .filter_map(|obs| {
                evaluate_trigger(obs, &self.thresholds)
                    .map(|fired| self.record(obs.category(), fired))
            })
            .collect();
        sort_for_display(&mut alerts);

        let critical_ids: Vec<AlertId> = alerts
            .iter()
            .filter(|a| a.is_critical() && a.is_active())
            .map(|a| a.id)
            .collect();
        if !critical_ids.is_empty() {
            log::warn!("{} critical alert(s) raised this cycle", critical_ids.len());
        }
        *self.critical.write() = critical_ids;

        alerts
    }

    /// Append a new active, unacknowledged alert to the history.
    pub fn create(
        &self,
        category: Category,
        message: impl Into<String>,
        priority: AlertPriority,
        location: Option<String>,
        payload: Option<Payload>,
    ) -> Alert {
        self.push(
            category,
            MANUAL_RULE.to_string(),
            message.into(),
            priority,
            location,
            payload.unwrap_or_default(),
        )
    }

    fn record(&self, category: Category, fired: TriggerOutcome) -> Alert {
        log::debug!("{} rule {} fired: {}", category, fired.rule, fired.message);
        self.push(
            category,
            fired.rule.to_string(),
            fired.message,
            fired.priority,
            None,
            fired.payload,
        )
    }

    fn push(
        &self,
        category: Category,
        rule: String,
        message: String,
        priority: AlertPriority,
        location: Option<String>,
        payload: Payload,
    ) -> Alert {
        let mut ledger = self.ledger.write();
        let id = AlertId(ledger.next_id);
        ledger.next_id += 1;

        let alert = Alert {
            id,
            category,
            rule,
            message,
            priority,
            location: location.unwrap_or_else(|| self.location.clone()),
            created_at: Utc::now(),
            status: AlertStatus::Active,
            payload,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
        };

        ledger
            .entries
            .push_back((id, Arc::new(Mutex::new(alert.clone()))));
        while ledger.entries.len() > self.capacity {
            if let Some((evicted, _)) = ledger.entries.pop_front() {
                log::debug!("Alert history full, evicted {}", evicted);
            }
        }

        alert
    }

    fn entry(&self, id: AlertId) -> Result<Arc<Mutex<Alert>>> {
        self.ledger.read().find(id).ok_or(MonitorError::NotFound(id))
    }

    /// Mark an alert acknowledged. The first actor wins; later calls return
    /// the alert unchanged.
    pub fn acknowledge(&self, id: AlertId, actor: &str) -> Result<Alert> {
        let entry = self.entry(id)?;
        let mut alert = entry.lock();
        if !alert.acknowledged {
            alert.acknowledged = true;
            alert.acknowledged_by = Some(actor.to_string());
            alert.acknowledged_at = Some(Utc::now());
            log::info!("{} acknowledged by {}", id, actor);
        }
        Ok(alert.clone())
    }

    /// Close an alert. Resolving twice keeps the first resolution time.
    pub fn resolve(&self, id: AlertId) -> Result<Alert> {
        let entry = self.entry(id)?;
        let mut alert = entry.lock();
        if alert.status == AlertStatus::Active {
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(Utc::now());
            log::info!("{} resolved", id);
        }
        Ok(alert.clone())
    }

    pub fn get(&self, id: AlertId) -> Option<Alert> {
        self.ledger.read().find(id).map(|entry| entry.lock().clone())
    }

    /// Retained alerts in creation order.
    pub fn history(&self) -> Vec<Alert> {
        self.ledger
            .read()
            .entries
            .iter()
            .map(|(_, entry)| entry.lock().clone())
            .collect()
    }

    /// Active retained alerts in display order.
    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .history()
            .into_iter()
            .filter(Alert::is_active)
            .collect();
        sort_for_display(&mut alerts);
        alerts
    }

    /// Critical alerts raised by the latest evaluation that are still
    /// active. Criticals from earlier cycles drop out once their condition
    /// stops firing, acknowledged or not.
    pub fn critical_alerts(&self) -> Vec<Alert> {
        let ids = self.critical.read().clone();
        let ledger = self.ledger.read();
        let mut alerts: Vec<Alert> = ids
            .into_iter()
            .filter_map(|id| ledger.find(id))
            .map(|entry| entry.lock().clone())
            .filter(Alert::is_active)
            .collect();
        sort_for_display(&mut alerts);
        alerts
    }

    pub fn len(&self) -> usize {
        self.ledger.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
