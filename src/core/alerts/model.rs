// Alert model types: the alert record, its priority and lifecycle status.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::model::{Category, Timestamp};

pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Monotonically increasing alert identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alert_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    Moderate,
    High,
    Critical,
}

impl AlertPriority {
    /// Sort rank: critical 4, high 3, moderate 2, low 1.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 4,
            Self::High => 3,
            Self::Moderate => 2,
            Self::Low => 1,
        }
    }
}

impl PartialOrd for AlertPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AlertPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub category: Category,
    /// Name of the rule that produced the alert, e.g. "stampede_risk".
    pub rule: String,
    pub message: String,
    pub priority: AlertPriority,
    pub location: String,
    pub created_at: Timestamp,
    pub status: AlertStatus,
    pub payload: Payload,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<Timestamp>,
    pub resolved_at: Option<Timestamp>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }

    pub fn is_critical(&self) -> bool {
        self.priority == AlertPriority::Critical
    }
}

/// Display order: priority descending, then most recent first. Ids break
/// ties between alerts created in the same instant.
pub fn display_order(a: &Alert, b: &Alert) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
}

pub fn sort_for_display(alerts: &mut [Alert]) {
    alerts.sort_by(display_order);
}

/// Alert counts carried with every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub moderate: usize,
    pub low: usize,
}

impl AlertSummary {
    pub fn from_alerts(alerts: &[Alert]) -> Self {
        let mut summary = Self {
            total: alerts.len(),
            ..Self::default()
        };
        for alert in alerts {
            match alert.priority {
                AlertPriority::Critical => summary.critical += 1,
                AlertPriority::High => summary.high += 1,
                AlertPriority::Moderate => summary.moderate += 1,
                AlertPriority::Low => summary.low += 1,
            }
        }
        summary
    }
}
