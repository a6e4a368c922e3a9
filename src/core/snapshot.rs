use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::alerts::model::{Alert, AlertSummary};
use super::error::Result;
use super::model::{Category, Observation, Timestamp};
use super::risk::{CompositeRiskScore, RiskModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Fresh data from this cycle's pull.
    Live,
    /// The pull failed; last-known or baseline data substituted.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub status: SourceStatus,
    pub observed_at: Timestamp,
    pub error: Option<String>,
}

impl SourceHealth {
    pub fn live(observed_at: Timestamp) -> Self {
        Self {
            status: SourceStatus::Live,
            observed_at,
            error: None,
        }
    }

    pub fn fallback(observed_at: Timestamp, error: impl Into<String>) -> Self {
        Self {
            status: SourceStatus::Fallback,
            observed_at,
            error: Some(error.into()),
        }
    }
}

/// Complete published state for one cycle. Never mutated after publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    /// 0 for the placeholder published before the first cycle.
    pub cycle: u64,
    pub site: String,
    pub generated_at: Timestamp,
    pub observations: BTreeMap<Category, Observation>,
    pub source_health: BTreeMap<Category, SourceHealth>,
    pub risk: CompositeRiskScore,
    /// This cycle's alerts, priority descending then most recent first.
    pub alerts: Vec<Alert>,
    pub alert_summary: AlertSummary,
}

impl DashboardSnapshot {
    /// Placeholder built from baseline observations, served until the first
    /// cycle completes.
    pub fn initial(site: &str, model: &RiskModel) -> Result<Self> {
        let now = Utc::now();
        let observations: BTreeMap<Category, Observation> = Category::all()
            .iter()
            .map(|c| (*c, Observation::baseline(*c, now)))
            .collect();
        let source_health = Category::all()
            .iter()
            .map(|c| (*c, SourceHealth::fallback(now, "no data yet")))
            .collect();
        let risk = model.assess(observations.values(), now)?;

        Ok(Self {
            cycle: 0,
            site: site.to_string(),
            generated_at: now,
            observations,
            source_health,
            risk,
            alerts: Vec::new(),
            alert_summary: AlertSummary::default(),
        })
    }

    pub fn observation(&self, category: Category) -> Option<&Observation> {
        self.observations.get(&category)
    }

    pub fn degraded_categories(&self) -> Vec<Category> {
        self.source_health
            .iter()
            .filter(|(_, h)| h.status == SourceStatus::Fallback)
            .map(|(c, _)| *c)
            .collect()
    }
}
