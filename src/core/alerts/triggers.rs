// Trigger evaluation logic for alert rules.
//
// Each category has a small rule table. Every rule is checked against the
// category's observation; the highest-priority rule that fired becomes the
// category's single alert for the cycle (earlier rules win ties).

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::model::{AlertPriority, Payload};
use crate::core::model::{
    CrowdObservation, CrowdZone, ImageryObservation, Observation, SeismicEvent, SeismicObservation,
    TrafficLevel, TrafficObservation, WeatherObservation,
};
use crate::core::risk::SEISMIC_EVENT_WINDOW;

/// Alert thresholds, persisted with the rest of the settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Celsius, strictly above
    pub heat_temperature: f64,
    pub storm_wind_speed: f64,
    pub heavy_rain_mm: f64,
    /// Metres, strictly below
    pub low_visibility_m: f64,
    pub critical_magnitude: f64,
    pub alert_magnitude: f64,
    pub minor_magnitude: f64,
    pub stampede_density: f64,
    pub crowd_density: f64,
    pub flood_critical: f64,
    pub flood_watch: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            heat_temperature: 40.0,
            storm_wind_speed: 30.0,
            heavy_rain_mm: 20.0,
            low_visibility_m: 1000.0,
            critical_magnitude: 5.0,
            alert_magnitude: 4.0,
            minor_magnitude: 3.0,
            stampede_density: 0.9,
            crowd_density: 0.8,
            flood_critical: 0.7,
            flood_watch: 0.4,
        }
    }
}

/// A rule that fired.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOutcome {
    pub rule: &'static str,
    pub priority: AlertPriority,
    pub message: String,
    pub payload: Payload,
}

fn outcome(
    rule: &'static str,
    priority: AlertPriority,
    message: String,
    payload: serde_json::Value,
) -> TriggerOutcome {
    TriggerOutcome {
        rule,
        priority,
        message,
        payload: match payload {
            serde_json::Value::Object(map) => map,
            _ => Payload::new(),
        },
    }
}

/// Evaluate the category's rule table and pick at most one outcome.
pub fn evaluate_trigger(observation: &Observation, thresholds: &AlertThresholds) -> Option<TriggerOutcome> {
    select(fired_rules(observation, thresholds))
}

/// Every rule that fired, in rule-table order.
pub fn fired_rules(observation: &Observation, thresholds: &AlertThresholds) -> Vec<TriggerOutcome> {
    match observation {
        Observation::Weather(o) => weather_rules(o, thresholds),
        Observation::Seismic(o) => seismic_rules(o, thresholds),
        Observation::Crowd(o) => crowd_rules(o, thresholds),
        Observation::Traffic(o) => traffic_rules(o),
        Observation::Imagery(o) => imagery_rules(o, thresholds),
    }
}

/// Highest priority wins; among equals the earliest rule in the table.
pub fn select(fired: Vec<TriggerOutcome>) -> Option<TriggerOutcome> {
    let mut best: Option<TriggerOutcome> = None;
    for candidate in fired {
        match &best {
            Some(current) if current.priority >= candidate.priority => {}
            _ => best = Some(candidate),
        }
    }
    best
}

fn weather_rules(weather: &WeatherObservation, t: &AlertThresholds) -> Vec<TriggerOutcome> {
    let mut fired = Vec::new();

    if let Some(temperature) = weather.temperature.filter(|v| *v > t.heat_temperature) {
        fired.push(outcome(
            "heat_wave",
            AlertPriority::Moderate,
            format!("Heat wave conditions with temperature {temperature:.1}°C"),
            json!({ "temperature": temperature, "humidity": weather.humidity }),
        ));
    }
    if let Some(wind_speed) = weather.wind_speed.filter(|v| *v >= t.storm_wind_speed) {
        fired.push(outcome(
            "storm_warning",
            AlertPriority::High,
            format!("Thunderstorm warning for the area, wind speed {wind_speed:.1}"),
            json!({ "wind_speed": wind_speed }),
        ));
    }
    if let Some(rainfall) = weather.rainfall_mm.filter(|v| *v >= t.heavy_rain_mm) {
        fired.push(outcome(
            "heavy_rain",
            AlertPriority::High,
            format!("Heavy rainfall of {rainfall:.0} mm reported"),
            json!({ "rainfall_mm": rainfall }),
        ));
    }
    if let Some(visibility) = weather.visibility.filter(|v| *v < t.low_visibility_m) {
        fired.push(outcome(
            "low_visibility",
            AlertPriority::Moderate,
            format!("Visibility down to {visibility:.0} m"),
            json!({ "visibility": visibility }),
        ));
    }

    fired
}

fn seismic_rules(seismic: &SeismicObservation, t: &AlertThresholds) -> Vec<TriggerOutcome> {
    // Largest recent event; the first one wins ties so the most recent is reported.
    let mut strongest: Option<&SeismicEvent> = None;
    for event in seismic.recent(SEISMIC_EVENT_WINDOW) {
        if event.magnitude.is_finite() && strongest.map_or(true, |b| event.magnitude > b.magnitude) {
            strongest = Some(event);
        }
    }
    let Some(event) = strongest else {
        return Vec::new();
    };

    let magnitude = event.magnitude;
    let payload = json!({
        "event_id": event.id,
        "magnitude": magnitude,
        "depth_km": event.depth_km,
        "place": event.place,
    });

    let (rule, priority, message) = if magnitude >= t.critical_magnitude {
        (
            "major_earthquake",
            AlertPriority::Critical,
            format!("Earthquake detected! Magnitude {magnitude:.1} - Immediate evacuation recommended"),
        )
    } else if magnitude >= t.alert_magnitude {
        (
            "earthquake",
            AlertPriority::High,
            format!("Earthquake detected! Magnitude {magnitude:.1} - Monitor situation closely"),
        )
    } else if magnitude >= t.minor_magnitude {
        (
            "minor_earthquake",
            AlertPriority::Moderate,
            format!("Minor earthquake detected! Magnitude {magnitude:.1} - No immediate action required"),
        )
    } else {
        return Vec::new();
    };

    vec![outcome(rule, priority, message, payload)]
}

fn crowd_rules(crowd: &CrowdObservation, t: &AlertThresholds) -> Vec<TriggerOutcome> {
    let mut fired = Vec::new();

    let mut densest: Option<&CrowdZone> = None;
    for zone in crowd.zones_with_readings() {
        if densest.map_or(true, |b| zone.density > b.density) {
            densest = Some(zone);
        }
    }

    if let Some(zone) = densest {
        if zone.density >= t.stampede_density {
            fired.push(outcome(
                "stampede_risk",
                AlertPriority::Critical,
                format!("Stampede risk detected in {} - Immediate crowd control required", zone.name),
                json!({ "zone": zone.name, "density": zone.density }),
            ));
        }
        if zone.density >= t.crowd_density {
            fired.push(outcome(
                "high_density",
                AlertPriority::High,
                format!("High crowd density detected in {}", zone.name),
                json!({ "zone": zone.name, "density": zone.density }),
            ));
        }
    }

    if let Some(location) = crowd.bottlenecks.first() {
        fired.push(outcome(
            "bottleneck",
            AlertPriority::High,
            format!("Crowd bottleneck forming at {location}"),
            json!({ "location": location, "bottlenecks": crowd.bottlenecks }),
        ));
    }

    if let Some(zone) = crowd.zones.iter().find(|z| !z.anomalies.is_empty()) {
        fired.push(outcome(
            "flow_anomaly",
            AlertPriority::Moderate,
            format!("Unusual crowd flow pattern detected in {}", zone.name),
            json!({ "zone": zone.name, "anomalies": zone.anomalies }),
        ));
    }

    fired
}

fn traffic_rules(traffic: &TrafficObservation) -> Vec<TriggerOutcome> {
    let mut fired = Vec::new();

    let emergency: Vec<_> = traffic.routes.iter().filter(|r| r.emergency).collect();
    if !emergency.is_empty() && !emergency.iter().any(|r| r.open) {
        let names: Vec<&str> = emergency.iter().map(|r| r.name.as_str()).collect();
        fired.push(outcome(
            "emergency_vehicle_blocked",
            AlertPriority::Critical,
            "Emergency vehicle access blocked: no open emergency route".to_string(),
            json!({ "emergency_routes": names }),
        ));
    }

    let level = traffic.overall_level();
    if matches!(level, TrafficLevel::Poor | TrafficLevel::Severe) {
        let affected: Vec<&str> = traffic.bottlenecks().map(|r| r.name.as_str()).collect();
        let max_delay = traffic
            .bottlenecks()
            .map(|r| r.delay_min())
            .fold(0.0_f64, f64::max);
        fired.push(outcome(
            "severe_congestion",
            AlertPriority::High,
            format!("Severe traffic congestion on {} route(s)", affected.len()),
            json!({ "overall_level": level, "affected_routes": affected, "max_delay_min": max_delay }),
        ));
    }

    if let Some(route) = traffic.routes.iter().find(|r| !r.open) {
        fired.push(outcome(
            "road_closure",
            AlertPriority::Moderate,
            format!("Road closure on {}", route.name),
            json!({ "route": route.name, "route_id": route.id }),
        ));
    }

    fired
}

fn imagery_rules(imagery: &ImageryObservation, t: &AlertThresholds) -> Vec<TriggerOutcome> {
    let Some(risk) = imagery.flood_risk.filter(|r| r.is_finite()) else {
        return Vec::new();
    };
    let payload = json!({
        "flood_risk": risk,
        "affected_area_km2": imagery.affected_area_km2,
        "water_level_change": imagery.water_level_change,
    });

    if risk >= t.flood_critical {
        vec![outcome(
            "flood_warning",
            AlertPriority::Critical,
            "River water level rising, flood alert issued".to_string(),
            payload,
        )]
    } else if risk >= t.flood_watch {
        vec![outcome(
            "flood_watch",
            AlertPriority::Moderate,
            "Elevated flood risk detected from imagery".to_string(),
            payload,
        )]
    } else {
        Vec::new()
    }
}
