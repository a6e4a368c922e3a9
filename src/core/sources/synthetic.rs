//! Randomized observation generators.
//!
//! Used when a category has no live feed configured. Crowd and traffic
//! follow the site's daily rhythm (morning rush, midday peak, evening rush,
//! quiet nights) so the fused score moves the way a real day would.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Local, Timelike, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use super::SignalSource;
use crate::core::config::SiteConfig;
use crate::core::error::SourceError;
use crate::core::model::{
    Category, Congestion, CrowdObservation, CrowdZone, ImageryObservation, Observation, RouteCondition,
    SeismicEvent, SeismicObservation, Timestamp, TrafficObservation, WeatherObservation,
    ZoneRisk,
};

/// (id, name, capacity)
const ZONES: [(&str, &str, u64); 4] = [
    ("zone_1", "Main Ghat Area", 100_000),
    ("zone_2", "Prayagraj Fort", 50_000),
    ("zone_3", "Triveni Sangam", 150_000),
    ("zone_4", "Anand Bhavan", 30_000),
];

/// (id, name, normal travel minutes, emergency route)
const ROUTES: [(&str, &str, f64, bool); 4] = [
    ("route_1", "Prayagraj Junction to Triveni Sangam", 8.0, false),
    ("route_2", "Prayagraj Fort to Main Ghat", 5.0, false),
    ("route_3", "Anand Bhavan to Prayagraj Junction", 12.0, false),
    ("route_4", "Emergency Route - Bypass Road", 15.0, true),
];

const WEATHER_DESCRIPTIONS: [&str; 4] =
    ["clear sky", "scattered clouds", "light rain", "moderate rain"];

const ANOMALIES: [&str; 5] = [
    "sudden_density_spike",
    "flow_direction_change",
    "unusual_movement_pattern",
    "crowd_buildup",
    "rapid_dispersal",
];

const PLACES: [&str; 4] = [
    "Near Prayagraj, Uttar Pradesh",
    "Ganga River Basin, India",
    "Indo-Gangetic Plain, India",
    "Himalayan Foothills, India",
];

pub fn for_category(category: Category, site: &SiteConfig) -> Arc<dyn SignalSource> {
    Arc::new(SyntheticSource::new(category, site))
}

pub struct SyntheticSource {
    category: Category,
    name: String,
    site: SiteConfig,
}

impl SyntheticSource {
    pub fn new(category: Category, site: &SiteConfig) -> Self {
        Self {
            category,
            name: format!("synthetic-{}", category.display_name().to_lowercase()),
            site: site.clone(),
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, at: Timestamp) -> Observation {
        let hour = at.with_timezone(&Local).hour();
        match self.category {
            Category::Weather => Observation::Weather(weather(rng, at)),
            Category::Seismic => Observation::Seismic(seismic(rng, at, &self.site)),
            Category::Crowd => Observation::Crowd(crowd(rng, at, hour)),
            Category::Traffic => Observation::Traffic(traffic(rng, at, hour)),
            Category::Imagery => Observation::Imagery(imagery(rng, at)),
        }
    }
}

#[async_trait]
impl SignalSource for SyntheticSource {
    fn category(&self) -> Category {
        self.category
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Observation, SourceError> {
        Ok(self.sample(&mut rand::thread_rng(), Utc::now()))
    }
}

fn weather<R: Rng + ?Sized>(rng: &mut R, at: Timestamp) -> WeatherObservation {
    let temperature = rng.gen_range(25.0..35.0);
    let description = WEATHER_DESCRIPTIONS.choose(rng).copied().unwrap_or("clear sky");
    let rainfall_mm = match description {
        "light rain" => rng.gen_range(0.5..8.0),
        "moderate rain" => rng.gen_range(8.0..25.0),
        _ => 0.0,
    };

    WeatherObservation {
        observed_at: at,
        temperature: Some(temperature),
        feels_like: Some(temperature + rng.gen_range(0.0..3.0)),
        humidity: Some(rng.gen_range(40.0..80.0)),
        pressure: Some(rng.gen_range(1000.0..1020.0)),
        wind_speed: Some(rng.gen_range(2.0..15.0)),
        visibility: Some(rng.gen_range(5000.0..10000.0)),
        rainfall_mm: Some(rainfall_mm),
        description: Some(description.to_string()),
    }
}

fn seismic<R: Rng + ?Sized>(rng: &mut R, at: Timestamp, site: &SiteConfig) -> SeismicObservation {
    let count = rng.gen_range(0..=6);
    let events = (0..count)
        .map(|i| {
            let u: f64 = rng.gen();
            // Skewed towards small quakes; large ones are rare.
            let magnitude = 2.0 + u.powi(3) * 4.0;
            SeismicEvent {
                id: format!("synthetic_{}_{}", at.timestamp(), i),
                magnitude: (magnitude * 10.0).round() / 10.0,
                depth_km: Some(rng.gen_range(5.0..50.0)),
                place: format!(
                    "{} ({:.2}, {:.2})",
                    PLACES.choose(rng).copied().unwrap_or(PLACES[0]),
                    site.latitude + rng.gen_range(-2.0..2.0),
                    site.longitude + rng.gen_range(-2.0..2.0)
                ),
                occurred_at: at - Duration::minutes(rng.gen_range(0..24 * 60)),
            }
        })
        .collect();

    SeismicObservation::new(at, events)
}

fn base_density(hour: u32) -> f64 {
    match hour {
        6..=10 => 0.7,
        11..=15 => 0.9,
        16..=20 => 0.8,
        _ => 0.3,
    }
}

fn crowd<R: Rng + ?Sized>(rng: &mut R, at: Timestamp, hour: u32) -> CrowdObservation {
    let base = base_density(hour);
    let zones: Vec<CrowdZone> = ZONES
        .iter()
        .map(|(id, name, capacity)| {
            let density = (base + rng.gen_range(-0.2..0.2)).clamp(0.0, 1.0);
            let mut anomalies = Vec::new();
            if rng.gen_bool(0.1) {
                if let Some(kind) = ANOMALIES.choose(rng) {
                    anomalies.push((*kind).to_string());
                }
            }
            CrowdZone {
                id: (*id).to_string(),
                name: (*name).to_string(),
                capacity: *capacity,
                density,
                anomalies,
            }
        })
        .collect();

    let bottlenecks = zones
        .iter()
        .filter(|z| z.risk_level() == ZoneRisk::Critical)
        .map(|z| format!("{} entry", z.name))
        .collect();

    CrowdObservation {
        observed_at: at,
        zones,
        occupancy_percentage: None,
        bottlenecks,
    }
}

fn congestion_factor<R: Rng + ?Sized>(rng: &mut R, hour: u32) -> f64 {
    match hour {
        7..=9 => rng.gen_range(1.2..2.0),
        17..=19 => rng.gen_range(1.3..2.2),
        11..=15 => rng.gen_range(1.1..1.8),
        _ => rng.gen_range(0.8..1.2),
    }
}

fn traffic<R: Rng + ?Sized>(rng: &mut R, at: Timestamp, hour: u32) -> TrafficObservation {
    let routes = ROUTES
        .iter()
        .map(|(id, name, normal, emergency)| {
            let factor = congestion_factor(rng, hour) * rng.gen_range(0.9..1.1);
            let mut route = RouteCondition {
                id: (*id).to_string(),
                name: (*name).to_string(),
                normal_travel_min: *normal,
                current_travel_min: (normal * factor).round().max(1.0),
                open: true,
                emergency: *emergency,
            };
            // Severely congested roads are occasionally closed outright.
            if route.congestion() == Congestion::Severe && rng.gen_bool(0.1) {
                route.open = false;
            }
            route
        })
        .collect();

    TrafficObservation {
        observed_at: at,
        routes,
    }
}

fn imagery<R: Rng + ?Sized>(rng: &mut R, at: Timestamp) -> ImageryObservation {
    ImageryObservation {
        observed_at: at,
        flood_risk: Some(rng.gen_range(0.1..0.8)),
        affected_area_km2: Some(rng.gen_range(0.0..50.0)),
        water_level_change: Some(rng.gen_range(-2.0..5.0)),
        steep_areas: Some(rng.gen_range(0..=3)),
        flood_prone_areas: Some(rng.gen_range(0..=5)),
    }
}
