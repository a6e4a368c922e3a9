//! Remote feeds: OpenWeatherMap current conditions and the USGS daily
//! earthquake summary.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;

use super::SignalSource;
use crate::core::config::SiteConfig;
use crate::core::error::SourceError;
use crate::core::model::{
    Category, Observation, SeismicEvent, SeismicObservation, Timestamp, WeatherObservation,
};

/// Events kept from a single feed pull.
const MAX_SEISMIC_EVENTS: usize = 20;

const KM_PER_DEGREE: f64 = 111.0;

async fn get_json<T>(request: reqwest::RequestBuilder) -> Result<T, SourceError>
where
    T: for<'de> Deserialize<'de>,
{
    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(SourceError::Http(format!("HTTP {}: {}", status.as_u16(), body)));
    }
    Ok(resp.json().await?)
}

// ============================================================================
// OpenWeatherMap
// ============================================================================

#[derive(Debug, Deserialize)]
struct OwmResponse {
    main: Option<OwmMain>,
    #[serde(default)]
    weather: Vec<OwmCondition>,
    wind: Option<OwmWind>,
    visibility: Option<f64>,
    rain: Option<OwmRain>,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: Option<f64>,
    feels_like: Option<f64>,
    humidity: Option<f64>,
    pressure: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmCondition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwmWind {
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmRain {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
}

impl OwmResponse {
    fn into_observation(self, observed_at: Timestamp) -> WeatherObservation {
        let main = self.main;
        WeatherObservation {
            observed_at,
            temperature: main.as_ref().and_then(|m| m.temp),
            feels_like: main.as_ref().and_then(|m| m.feels_like),
            humidity: main.as_ref().and_then(|m| m.humidity),
            pressure: main.as_ref().and_then(|m| m.pressure),
            wind_speed: self.wind.and_then(|w| w.speed),
            visibility: self.visibility,
            rainfall_mm: self.rain.and_then(|r| r.one_hour),
            description: self.weather.into_iter().next().map(|c| c.description),
        }
    }
}

pub struct OpenWeatherSource {
    client: reqwest::Client,
    url: String,
    api_key: String,
    latitude: f64,
    longitude: f64,
}

impl OpenWeatherSource {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: String, site: &SiteConfig) -> Self {
        Self {
            client,
            url: format!("{}/weather", base_url.trim_end_matches('/')),
            api_key,
            latitude: site.latitude,
            longitude: site.longitude,
        }
    }
}

#[async_trait]
impl SignalSource for OpenWeatherSource {
    fn category(&self) -> Category {
        Category::Weather
    }

    fn name(&self) -> &str {
        "openweathermap"
    }

    async fn fetch(&self) -> Result<Observation, SourceError> {
        let request = self.client.get(&self.url).query(&[
            ("lat", self.latitude.to_string()),
            ("lon", self.longitude.to_string()),
            ("appid", self.api_key.clone()),
            ("units", "metric".to_string()),
        ]);
        let response: OwmResponse = get_json(request).await?;
        Ok(Observation::Weather(response.into_observation(Utc::now())))
    }
}

// ============================================================================
// USGS
// ============================================================================

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    id: String,
    properties: FeatureProperties,
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct FeatureProperties {
    mag: Option<f64>,
    place: Option<String>,
    /// Milliseconds since the epoch
    time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    /// [longitude, latitude, depth_km]
    coordinates: Vec<f64>,
}

/// Flat-earth distance, fine at the scale of the watch radius.
fn approx_distance_km(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    let dlat = lat_a - lat_b;
    let dlon = lon_a - lon_b;
    (dlat * dlat + dlon * dlon).sqrt() * KM_PER_DEGREE
}

impl FeatureCollection {
    fn into_observation(
        self,
        observed_at: Timestamp,
        site: (f64, f64),
        radius_km: f64,
    ) -> SeismicObservation {
        let events = self
            .features
            .into_iter()
            .filter_map(|feature| {
                let coords = feature.geometry?.coordinates;
                if coords.len() < 2 {
                    return None;
                }
                if approx_distance_km(coords[1], coords[0], site.0, site.1) > radius_km {
                    return None;
                }
                let occurred_at = Utc
                    .timestamp_millis_opt(feature.properties.time?)
                    .single()?;
                Some(SeismicEvent {
                    id: feature.id,
                    magnitude: feature.properties.mag.unwrap_or(0.0),
                    depth_km: coords.get(2).copied(),
                    place: feature
                        .properties
                        .place
                        .unwrap_or_else(|| "Unknown location".to_string()),
                    occurred_at,
                })
            })
            .collect();

        let mut observation = SeismicObservation::new(observed_at, events);
        observation.events.truncate(MAX_SEISMIC_EVENTS);
        observation
    }
}

pub struct UsgsSource {
    client: reqwest::Client,
    url: String,
    site: (f64, f64),
    radius_km: f64,
}

impl UsgsSource {
    pub fn new(client: reqwest::Client, base_url: &str, site: &SiteConfig, radius_km: f64) -> Self {
        Self {
            client,
            url: format!("{}/summary/all_day.geojson", base_url.trim_end_matches('/')),
            site: (site.latitude, site.longitude),
            radius_km,
        }
    }
}

#[async_trait]
impl SignalSource for UsgsSource {
    fn category(&self) -> Category {
        Category::Seismic
    }

    fn name(&self) -> &str {
        "usgs"
    }

    async fn fetch(&self) -> Result<Observation, SourceError> {
        let feed: FeatureCollection = get_json(self.client.get(&self.url)).await?;
        let observation = feed.into_observation(Utc::now(), self.site, self.radius_km);
        log::debug!(
            "USGS feed: {} event(s) within {} km",
            observation.events.len(),
            self.radius_km
        );
        Ok(Observation::Seismic(observation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRAYAGRAJ: (f64, f64) = (25.4358, 81.8463);

    #[test]
    fn test_owm_payload_maps_fields() {
        let body = r#"{
            "coord": {"lon": 81.85, "lat": 25.44},
            "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}],
            "main": {"temp": 31.2, "feels_like": 35.0, "pressure": 1004, "humidity": 71},
            "visibility": 6000,
            "wind": {"speed": 4.1, "deg": 240},
            "rain": {"1h": 2.5},
            "clouds": {"all": 75}
        }"#;
        let response: OwmResponse = serde_json::from_str(body).unwrap();
        let weather = response.into_observation(Utc::now());

        assert_eq!(weather.temperature, Some(31.2));
        assert_eq!(weather.humidity, Some(71.0));
        assert_eq!(weather.pressure, Some(1004.0));
        assert_eq!(weather.wind_speed, Some(4.1));
        assert_eq!(weather.visibility, Some(6000.0));
        assert_eq!(weather.rainfall_mm, Some(2.5));
        assert_eq!(weather.description.as_deref(), Some("light rain"));
    }

    #[test]
    fn test_owm_partial_payload() {
        let response: OwmResponse = serde_json::from_str(r#"{"main": {"temp": 29.0}}"#).unwrap();
        let weather = response.into_observation(Utc::now());
        assert_eq!(weather.temperature, Some(29.0));
        assert!(weather.wind_speed.is_none());
        assert!(!weather.is_empty());
    }

    #[test]
    fn test_usgs_filters_by_radius_and_sorts() {
        let body = r#"{
            "type": "FeatureCollection",
            "features": [
                {"id": "near_old", "properties": {"mag": 3.1, "place": "Near Prayagraj", "time": 1700000000000},
                 "geometry": {"type": "Point", "coordinates": [82.0, 25.5, 10.0]}},
                {"id": "far", "properties": {"mag": 6.5, "place": "Chile", "time": 1700000500000},
                 "geometry": {"type": "Point", "coordinates": [-70.0, -30.0, 30.0]}},
                {"id": "near_new", "properties": {"mag": 4.2, "place": null, "time": 1700000900000},
                 "geometry": {"type": "Point", "coordinates": [84.0, 28.0]}},
                {"id": "no_time", "properties": {"mag": 2.0, "place": "x", "time": null},
                 "geometry": {"type": "Point", "coordinates": [81.8, 25.4, 5.0]}}
            ]
        }"#;
        let feed: FeatureCollection = serde_json::from_str(body).unwrap();
        let seismic = feed.into_observation(Utc::now(), PRAYAGRAJ, 1000.0);

        let ids: Vec<&str> = seismic.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["near_new", "near_old"]);
        assert_eq!(seismic.events[0].place, "Unknown location");
        assert!(seismic.events[0].depth_km.is_none());
        assert_eq!(seismic.events[1].depth_km, Some(10.0));
    }

    #[test]
    fn test_approx_distance() {
        let d = approx_distance_km(25.0, 81.0, 26.0, 81.0);
        assert!((d - 111.0).abs() < 1e-9);
    }
}
