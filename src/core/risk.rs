//! Risk model: per-category risk factors and their weighted fusion.
//!
//! Every factor is an additive threshold rule set clamped to [0, 1]. A
//! category with no readings at all scores the neutral baseline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{MonitorError, Result};
use super::model::{
    Category, CrowdObservation, ImageryObservation, Observation, SeismicObservation, Timestamp,
    TrafficLevel, TrafficObservation, WeatherObservation,
};

/// Factor assigned to a category that reported nothing usable.
pub const BASELINE_FACTOR: f64 = 0.1;

/// Only this many of the most recent seismic events contribute.
pub const SEISMIC_EVENT_WINDOW: usize = 5;

const WEIGHT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Minimal,
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Critical
        } else if score >= 60.0 {
            Self::High
        } else if score >= 40.0 {
            Self::Moderate
        } else if score >= 20.0 {
            Self::Low
        } else {
            Self::Minimal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub category: Category,
    pub value: f64,
}

/// Fusion weights per category. Must sum to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FusionWeights(BTreeMap<Category, f64>);

impl Default for FusionWeights {
    fn default() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert(Category::Weather, 0.25);
        weights.insert(Category::Seismic, 0.20);
        weights.insert(Category::Crowd, 0.35);
        weights.insert(Category::Traffic, 0.20);
        Self(weights)
    }
}

impl FusionWeights {
    pub fn new(weights: BTreeMap<Category, f64>) -> Result<Self> {
        let weights = Self(weights);
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some((category, weight)) = self
            .0
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(MonitorError::InvalidConfiguration(format!(
                "weight for {category} must be a non-negative number, got {weight}"
            )));
        }
        let total = self.total();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(MonitorError::InvalidConfiguration(format!(
                "fusion weights must sum to 1.0, got {total}"
            )));
        }
        Ok(())
    }

    pub fn get(&self, category: Category) -> f64 {
        self.0.get(&category).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn as_map(&self) -> &BTreeMap<Category, f64> {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRiskScore {
    /// 0 to 100
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    pub factors: BTreeMap<Category, RiskFactor>,
    pub weights: BTreeMap<Category, f64>,
    pub computed_at: Timestamp,
}

/// Stateless scorer holding the validated fusion weights.
#[derive(Debug, Clone)]
pub struct RiskModel {
    weights: FusionWeights,
}

impl RiskModel {
    pub fn new(weights: FusionWeights) -> Result<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &FusionWeights {
        &self.weights
    }

    /// Risk factor for one observation, always within [0, 1].
    pub fn score(&self, observation: &Observation) -> RiskFactor {
        let value = match observation {
            Observation::Weather(o) => weather_risk(o),
            Observation::Seismic(o) => seismic_risk(o),
            Observation::Crowd(o) => crowd_risk(o),
            Observation::Traffic(o) => traffic_risk(o),
            Observation::Imagery(o) => imagery_risk(o),
        };
        RiskFactor {
            category: observation.category(),
            value,
        }
    }

    /// Weighted fusion of the given factors. Weighted categories with no
    /// factor contribute the baseline.
    pub fn fuse(
        &self,
        factors: BTreeMap<Category, RiskFactor>,
        computed_at: Timestamp,
    ) -> Result<CompositeRiskScore> {
        if let Some(bad) = factors.values().find(|f| !f.value.is_finite()) {
            return Err(MonitorError::CycleFailure(format!(
                "non-finite {} risk factor",
                bad.category
            )));
        }

        let total: f64 = self
            .weights
            .as_map()
            .iter()
            .map(|(category, weight)| {
                let value = factors
                    .get(category)
                    .map(|f| f.value)
                    .unwrap_or(BASELINE_FACTOR);
                value * weight
            })
            .sum();
        let overall_score = (total * 100.0).clamp(0.0, 100.0);

        Ok(CompositeRiskScore {
            overall_score,
            risk_level: RiskLevel::from_score(overall_score),
            factors,
            weights: self.weights.as_map().clone(),
            computed_at,
        })
    }

    /// Scores every observation and fuses the result.
    pub fn assess<'a, I>(&self, observations: I, computed_at: Timestamp) -> Result<CompositeRiskScore>
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        let factors = observations
            .into_iter()
            .map(|obs| {
                let factor = self.score(obs);
                (factor.category, factor)
            })
            .collect();
        self.fuse(factors, computed_at)
    }
}

fn finite_or(value: Option<f64>, default: f64) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(default)
}

pub fn weather_risk(weather: &WeatherObservation) -> f64 {
    if weather.is_empty() {
        return BASELINE_FACTOR;
    }
    let mut risk = 0.0;

    let temperature = finite_or(weather.temperature, 25.0);
    if temperature > 40.0 {
        risk += 0.4;
    } else if temperature > 35.0 {
        risk += 0.2;
    }

    if finite_or(weather.humidity, 50.0) > 80.0 {
        risk += 0.2;
    }
    if finite_or(weather.wind_speed, 5.0) > 30.0 {
        risk += 0.3;
    }
    if finite_or(weather.visibility, 10_000.0) < 5_000.0 {
        risk += 0.2;
    }

    f64::min(1.0, risk)
}

pub fn seismic_risk(seismic: &SeismicObservation) -> f64 {
    if seismic.is_empty() {
        return BASELINE_FACTOR;
    }
    let risk: f64 = seismic
        .recent(SEISMIC_EVENT_WINDOW)
        .iter()
        .map(|event| match event.magnitude {
            m if m >= 5.0 => 0.4,
            m if m >= 4.0 => 0.2,
            m if m >= 3.0 => 0.1,
            _ => 0.0,
        })
        .sum();
    f64::min(1.0, risk)
}

pub fn crowd_risk(crowd: &CrowdObservation) -> f64 {
    let occupancy = crowd.occupancy();
    if occupancy.is_none() && crowd.zones_with_readings().next().is_none() {
        return BASELINE_FACTOR;
    }
    let mut risk = 0.0;

    let occupancy = occupancy.unwrap_or(0.0);
    if occupancy > 90.0 {
        risk += 0.5;
    } else if occupancy > 70.0 {
        risk += 0.3;
    } else if occupancy > 50.0 {
        risk += 0.1;
    }

    if crowd.elevated_zones().next().is_some() {
        risk += 0.3;
    }

    f64::min(1.0, risk)
}

pub fn traffic_risk(traffic: &TrafficObservation) -> f64 {
    if traffic.routes_with_readings().next().is_none() {
        return BASELINE_FACTOR;
    }
    let mut risk = match traffic.overall_level() {
        TrafficLevel::Severe => 0.5,
        TrafficLevel::Poor => 0.3,
        TrafficLevel::Moderate => 0.1,
        TrafficLevel::Good => 0.0,
    };
    if traffic.bottlenecks().next().is_some() {
        risk += 0.2;
    }
    f64::min(1.0, risk)
}

pub fn imagery_risk(imagery: &ImageryObservation) -> f64 {
    match imagery.flood_risk.filter(|r| r.is_finite()) {
        Some(risk) => risk.clamp(0.0, 1.0),
        None => BASELINE_FACTOR,
    }
}
