use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Timestamp = DateTime<Utc>;

/// Signal category. One observation and one source per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Weather,
    Seismic,
    Crowd,
    Traffic,
    Imagery,
}

impl Category {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Weather => "Weather",
            Self::Seismic => "Seismic",
            Self::Crowd => "Crowd",
            Self::Traffic => "Traffic",
            Self::Imagery => "Imagery",
        }
    }

    /// All categories, in the order the cycle pulls and evaluates them.
    pub fn all() -> &'static [Category] {
        &[
            Self::Weather,
            Self::Seismic,
            Self::Crowd,
            Self::Traffic,
            Self::Imagery,
        ]
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub observed_at: Timestamp,
    /// Degrees Celsius
    pub temperature: Option<f64>,
    pub feels_like: Option<f64>,
    /// Relative humidity, percent
    pub humidity: Option<f64>,
    /// hPa
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    /// Metres
    pub visibility: Option<f64>,
    pub rainfall_mm: Option<f64>,
    pub description: Option<String>,
}

impl WeatherObservation {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.humidity.is_none()
            && self.wind_speed.is_none()
            && self.visibility.is_none()
            && self.rainfall_mm.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeismicEvent {
    pub id: String,
    pub magnitude: f64,
    pub depth_km: Option<f64>,
    pub place: String,
    pub occurred_at: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeismicObservation {
    pub observed_at: Timestamp,
    /// Most recent first.
    pub events: Vec<SeismicEvent>,
}

impl SeismicObservation {
    pub fn new(observed_at: Timestamp, mut events: Vec<SeismicEvent>) -> Self {
        events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Self { observed_at, events }
    }

    /// The `n` most recent events.
    pub fn recent(&self, n: usize) -> &[SeismicEvent] {
        &self.events[..self.events.len().min(n)]
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Zone risk level derived from crowd density.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneRisk {
    Low,
    Moderate,
    High,
    Critical,
}

impl ZoneRisk {
    pub fn from_density(density: f64) -> Self {
        if density < 0.3 {
            Self::Low
        } else if density < 0.7 {
            Self::Moderate
        } else if density < 0.9 {
            Self::High
        } else {
            Self::Critical
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrowdZone {
    pub id: String,
    pub name: String,
    pub capacity: u64,
    /// Fraction of capacity, 0.0 to 1.0
    pub density: f64,
    #[serde(default)]
    pub anomalies: Vec<String>,
}

impl CrowdZone {
    pub fn risk_level(&self) -> ZoneRisk {
        ZoneRisk::from_density(self.density)
    }

    /// A NaN or infinite density is a corrupt reading, not a full zone.
    pub fn has_reading(&self) -> bool {
        self.density.is_finite()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrowdObservation {
    pub observed_at: Timestamp,
    pub zones: Vec<CrowdZone>,
    /// Site-wide occupancy, percent. Derived from zones when absent.
    pub occupancy_percentage: Option<f64>,
    #[serde(default)]
    pub bottlenecks: Vec<String>,
}

impl CrowdObservation {
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty() && self.occupancy_percentage.is_none()
    }

    /// Reported occupancy, or the capacity-weighted occupancy of the zones
    /// with a usable density. `None` when neither is available.
    pub fn occupancy(&self) -> Option<f64> {
        if let Some(reported) = self.occupancy_percentage.filter(|p| p.is_finite()) {
            return Some(reported);
        }
        let (capacity, occupied) = self
            .zones_with_readings()
            .fold((0.0_f64, 0.0_f64), |(capacity, occupied), z| {
                let zone_capacity = z.capacity as f64;
                (capacity + zone_capacity, occupied + zone_capacity * z.density)
            });
        if capacity <= 0.0 {
            return None;
        }
        Some(occupied / capacity * 100.0)
    }

    pub fn zones_with_readings(&self) -> impl Iterator<Item = &CrowdZone> {
        self.zones.iter().filter(|z| z.has_reading())
    }

    pub fn elevated_zones(&self) -> impl Iterator<Item = &CrowdZone> {
        self.zones_with_readings()
            .filter(|z| z.risk_level().is_elevated())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Congestion {
    Low,
    Moderate,
    High,
    Severe,
}

impl Congestion {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio < 1.2 {
            Self::Low
        } else if ratio < 1.5 {
            Self::Moderate
        } else if ratio < 2.0 {
            Self::High
        } else {
            Self::Severe
        }
    }

    fn rank(&self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Moderate => 2.0,
            Self::High => 3.0,
            Self::Severe => 4.0,
        }
    }
}

/// Qualitative site-wide traffic level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficLevel {
    Good,
    Moderate,
    Poor,
    Severe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCondition {
    pub id: String,
    pub name: String,
    pub normal_travel_min: f64,
    pub current_travel_min: f64,
    pub open: bool,
    #[serde(default)]
    pub emergency: bool,
}

impl RouteCondition {
    pub fn congestion(&self) -> Congestion {
        if self.normal_travel_min <= 0.0 {
            return Congestion::Low;
        }
        Congestion::from_ratio(self.current_travel_min / self.normal_travel_min)
    }

    pub fn has_reading(&self) -> bool {
        self.normal_travel_min.is_finite() && self.current_travel_min.is_finite()
    }

    pub fn delay_min(&self) -> f64 {
        (self.current_travel_min - self.normal_travel_min).max(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficObservation {
    pub observed_at: Timestamp,
    pub routes: Vec<RouteCondition>,
}

impl TrafficObservation {
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes_with_readings(&self) -> impl Iterator<Item = &RouteCondition> {
        self.routes.iter().filter(|r| r.has_reading())
    }

    /// Mean congestion band over routes with usable travel times.
    pub fn overall_level(&self) -> TrafficLevel {
        let (sum, count) = self
            .routes_with_readings()
            .fold((0.0_f64, 0_usize), |(sum, count), r| {
                (sum + r.congestion().rank(), count + 1)
            });
        if count == 0 {
            return TrafficLevel::Good;
        }
        let mean = sum / count as f64;
        if mean < 1.5 {
            TrafficLevel::Good
        } else if mean < 2.5 {
            TrafficLevel::Moderate
        } else if mean < 3.5 {
            TrafficLevel::Poor
        } else {
            TrafficLevel::Severe
        }
    }

    pub fn bottlenecks(&self) -> impl Iterator<Item = &RouteCondition> {
        self.routes_with_readings()
            .filter(|r| r.congestion() >= Congestion::High)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageryObservation {
    pub observed_at: Timestamp,
    /// Estimated flood risk, 0.0 to 1.0
    pub flood_risk: Option<f64>,
    pub affected_area_km2: Option<f64>,
    /// Metres relative to the previous pass
    pub water_level_change: Option<f64>,
    pub steep_areas: Option<u32>,
    pub flood_prone_areas: Option<u32>,
}

impl ImageryObservation {
    pub fn is_empty(&self) -> bool {
        self.flood_risk.is_none()
    }
}

/// One category's signal snapshot for a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum Observation {
    Weather(WeatherObservation),
    Seismic(SeismicObservation),
    Crowd(CrowdObservation),
    Traffic(TrafficObservation),
    Imagery(ImageryObservation),
}

impl Observation {
    /// An observation carrying no readings, used when a category has never
    /// produced data.
    pub fn baseline(category: Category, observed_at: Timestamp) -> Self {
        match category {
            Category::Weather => Self::Weather(WeatherObservation {
                observed_at,
                ..Default::default()
            }),
            Category::Seismic => Self::Seismic(SeismicObservation {
                observed_at,
                ..Default::default()
            }),
            Category::Crowd => Self::Crowd(CrowdObservation {
                observed_at,
                ..Default::default()
            }),
            Category::Traffic => Self::Traffic(TrafficObservation {
                observed_at,
                ..Default::default()
            }),
            Category::Imagery => Self::Imagery(ImageryObservation {
                observed_at,
                ..Default::default()
            }),
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Self::Weather(_) => Category::Weather,
            Self::Seismic(_) => Category::Seismic,
            Self::Crowd(_) => Category::Crowd,
            Self::Traffic(_) => Category::Traffic,
            Self::Imagery(_) => Category::Imagery,
        }
    }

    pub fn observed_at(&self) -> Timestamp {
        match self {
            Self::Weather(o) => o.observed_at,
            Self::Seismic(o) => o.observed_at,
            Self::Crowd(o) => o.observed_at,
            Self::Traffic(o) => o.observed_at,
            Self::Imagery(o) => o.observed_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Weather(o) => o.is_empty(),
            Self::Seismic(o) => o.is_empty(),
            Self::Crowd(o) => o.is_empty(),
            Self::Traffic(o) => o.is_empty(),
            Self::Imagery(o) => o.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(normal: f64, current: f64) -> RouteCondition {
        RouteCondition {
            id: "r".to_string(),
            name: "Route".to_string(),
            normal_travel_min: normal,
            current_travel_min: current,
            open: true,
            emergency: false,
        }
    }

    #[test]
    fn test_baseline_matches_category() {
        for category in Category::all() {
            let obs = Observation::baseline(*category, Utc::now());
            assert_eq!(obs.category(), *category);
            assert!(obs.is_empty());
        }
    }

    #[test]
    fn test_zone_risk_bands() {
        assert_eq!(ZoneRisk::from_density(0.29), ZoneRisk::Low);
        assert_eq!(ZoneRisk::from_density(0.3), ZoneRisk::Moderate);
        assert_eq!(ZoneRisk::from_density(0.7), ZoneRisk::High);
        assert_eq!(ZoneRisk::from_density(0.9), ZoneRisk::Critical);
    }

    #[test]
    fn test_occupancy_is_capacity_weighted() {
        let crowd = CrowdObservation {
            observed_at: Utc::now(),
            zones: vec![
                CrowdZone {
                    id: "a".to_string(),
                    name: "A".to_string(),
                    capacity: 100,
                    density: 1.0,
                    anomalies: Vec::new(),
                },
                CrowdZone {
                    id: "b".to_string(),
                    name: "B".to_string(),
                    capacity: 300,
                    density: 0.0,
                    anomalies: Vec::new(),
                },
            ],
            occupancy_percentage: None,
            bottlenecks: Vec::new(),
        };
        assert!((crowd.occupancy().unwrap() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_traffic_overall_level() {
        let traffic = TrafficObservation {
            observed_at: Utc::now(),
            routes: vec![route(10.0, 10.0), route(10.0, 25.0)],
        };
        // ranks 1 and 4, mean 2.5
        assert_eq!(traffic.overall_level(), TrafficLevel::Poor);
        assert_eq!(traffic.bottlenecks().count(), 1);
    }

    fn zone(capacity: u64, density: f64) -> CrowdZone {
        CrowdZone {
            id: "z".to_string(),
            name: "Zone".to_string(),
            capacity,
            density,
            anomalies: Vec::new(),
        }
    }

    #[test]
    fn test_occupancy_survives_huge_capacities() {
        let crowd = CrowdObservation {
            observed_at: Utc::now(),
            zones: vec![zone(u64::MAX, 0.5), zone(u64::MAX, 0.5)],
            occupancy_percentage: None,
            bottlenecks: Vec::new(),
        };
        let occupancy = crowd.occupancy().unwrap();
        assert!(occupancy.is_finite());
        assert!((occupancy - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_corrupt_zone_readings_are_skipped() {
        let crowd = CrowdObservation {
            observed_at: Utc::now(),
            zones: vec![zone(100, f64::NAN), zone(100, f64::INFINITY), zone(100, 0.4)],
            occupancy_percentage: Some(f64::NAN),
            bottlenecks: Vec::new(),
        };
        assert_eq!(crowd.zones_with_readings().count(), 1);
        assert_eq!(crowd.elevated_zones().count(), 0);
        assert!((crowd.occupancy().unwrap() - 40.0).abs() < 1e-9);

        let unreadable = CrowdObservation {
            zones: vec![zone(100, f64::NAN)],
            ..crowd
        };
        assert_eq!(unreadable.occupancy(), None);
    }

    #[test]
    fn test_corrupt_routes_are_skipped() {
        let traffic = TrafficObservation {
            observed_at: Utc::now(),
            routes: vec![route(10.0, f64::NAN), route(f64::NAN, 30.0), route(10.0, 10.0)],
        };
        assert_eq!(traffic.routes_with_readings().count(), 1);
        assert_eq!(traffic.overall_level(), TrafficLevel::Good);
        assert_eq!(traffic.bottlenecks().count(), 0);

        let unreadable = TrafficObservation {
            observed_at: Utc::now(),
            routes: vec![route(10.0, f64::INFINITY)],
        };
        assert_eq!(unreadable.overall_level(), TrafficLevel::Good);
    }

    #[test]
    fn test_seismic_events_sorted_recent_first() {
        let now = Utc::now();
        let older = SeismicEvent {
            id: "old".to_string(),
            magnitude: 3.0,
            depth_km: None,
            place: "x".to_string(),
            occurred_at: now - chrono::Duration::hours(2),
        };
        let newer = SeismicEvent {
            id: "new".to_string(),
            occurred_at: now,
            ..older.clone()
        };
        let obs = SeismicObservation::new(now, vec![older, newer]);
        assert_eq!(obs.events[0].id, "new");
        assert_eq!(obs.recent(1).len(), 1);
        assert_eq!(obs.recent(10).len(), 2);
    }

    #[test]
    fn test_observation_serializes_with_category_tag() {
        let obs = Observation::baseline(Category::Crowd, Utc::now());
        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["category"], "crowd");
    }
}
