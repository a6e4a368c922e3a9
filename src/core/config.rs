use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::alerts::triggers::AlertThresholds;
use super::error::{MonitorError, Result};
use super::model::Category;
use super::risk::FusionWeights;

/// Where a category's observations come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Remote API. Only weather and seismic have one.
    Live,
    #[default]
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: "Prayagraj, Uttar Pradesh".to_string(),
            latitude: 25.4358,
            longitude: 81.8463,
        }
    }
}

/// Engine settings, persisted as `settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub site: SiteConfig,
    pub weights: FusionWeights,
    pub thresholds: AlertThresholds,
    pub cycle_interval_secs: u64,
    /// Wait after a failed cycle before trying again.
    pub backoff_interval_secs: u64,
    pub source_timeout_secs: u64,
    pub history_capacity: usize,
    /// Per-subscriber queue depth before events are dropped.
    pub subscriber_buffer: usize,
    pub sources: BTreeMap<Category, SourceKind>,
    pub openweather_api_key: Option<String>,
    pub openweather_base_url: String,
    pub usgs_base_url: String,
    pub seismic_radius_km: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            weights: FusionWeights::default(),
            thresholds: AlertThresholds::default(),
            cycle_interval_secs: 30,
            backoff_interval_secs: 60,
            source_timeout_secs: 10,
            history_capacity: 10_000,
            subscriber_buffer: 16,
            sources: BTreeMap::new(),
            openweather_api_key: None,
            openweather_base_url: "https://api.openweathermap.org/data/2.5".to_string(),
            usgs_base_url: "https://earthquake.usgs.gov/earthquakes/feed/v1.0".to_string(),
            seismic_radius_km: 1000.0,
        }
    }
}

impl Settings {
    /// Categories not listed in `sources` are synthetic.
    pub fn source_kind(&self, category: Category) -> SourceKind {
        self.sources.get(&category).copied().unwrap_or_default()
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn backoff_interval(&self) -> Duration {
        Duration::from_secs(self.backoff_interval_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn force_synthetic(&mut self) {
        for category in Category::all() {
            self.sources.insert(*category, SourceKind::Synthetic);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;

        let invalid = |msg: String| Err(MonitorError::InvalidConfiguration(msg));

        if self.cycle_interval_secs == 0 {
            return invalid("cycle_interval_secs must be positive".to_string());
        }
        if self.backoff_interval_secs == 0 {
            return invalid("backoff_interval_secs must be positive".to_string());
        }
        if self.source_timeout_secs == 0 {
            return invalid("source_timeout_secs must be positive".to_string());
        }
        if self.history_capacity == 0 {
            return invalid("history_capacity must be positive".to_string());
        }
        if self.subscriber_buffer == 0 {
            return invalid("subscriber_buffer must be positive".to_string());
        }
        if !(-90.0..=90.0).contains(&self.site.latitude) {
            return invalid(format!("latitude {} out of range", self.site.latitude));
        }
        if !(-180.0..=180.0).contains(&self.site.longitude) {
            return invalid(format!("longitude {} out of range", self.site.longitude));
        }
        if !self.seismic_radius_km.is_finite() || self.seismic_radius_km <= 0.0 {
            return invalid(format!(
                "seismic_radius_km must be positive, got {}",
                self.seismic_radius_km
            ));
        }

        for (category, kind) in &self.sources {
            if *kind == SourceKind::Live
                && !matches!(category, Category::Weather | Category::Seismic)
            {
                return invalid(format!("no live source exists for {category}"));
            }
        }
        if self.source_kind(Category::Weather) == SourceKind::Live
            && self
                .openweather_api_key
                .as_deref()
                .map_or(true, |key| key.trim().is_empty())
        {
            return invalid("live weather requires openweather_api_key".to_string());
        }

        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Unparsable values are logged and
    /// ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENWEATHER_API_KEY") {
            if !key.trim().is_empty() {
                self.openweather_api_key = Some(key);
            }
        }
        override_parsed(&lookup, "SITE_LAT", &mut self.site.latitude);
        override_parsed(&lookup, "SITE_LON", &mut self.site.longitude);
        override_parsed(
            &lookup,
            "CROWD_DENSITY_THRESHOLD",
            &mut self.thresholds.crowd_density,
        );
        override_parsed(
            &lookup,
            "EARTHQUAKE_MAGNITUDE_THRESHOLD",
            &mut self.thresholds.alert_magnitude,
        );
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("Ignoring {}: cannot parse {:?}", key, raw),
        }
    }
}

pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            config_path: config_dir.join("settings.json"),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Missing, unreadable or unparsable files all fall back to defaults.
    pub fn load(&self) -> Settings {
        if !self.config_path.exists() {
            return Settings::default();
        }
        match fs::read_to_string(&self.config_path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!(
                        "Could not parse {}, using defaults: {}",
                        self.config_path.display(),
                        e
                    );
                    Settings::default()
                }
            },
            Err(e) => {
                log::warn!(
                    "Could not read {}, using defaults: {}",
                    self.config_path.display(),
                    e
                );
                Settings::default()
            }
        }
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.config_path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().to_path_buf());

        let default = manager.load();
        assert_eq!(default.cycle_interval_secs, 30);
        assert_eq!(default.source_kind(Category::Weather), SourceKind::Synthetic);

        let mut new_settings = Settings {
            cycle_interval_secs: 5,
            openweather_api_key: Some("abc".to_string()),
            ..Settings::default()
        };
        new_settings.sources.insert(Category::Weather, SourceKind::Live);

        manager.save(&new_settings).unwrap();
        let loaded = manager.load();

        assert_eq!(loaded, new_settings);
        assert_eq!(loaded.source_kind(Category::Weather), SourceKind::Live);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().to_path_buf());
        fs::write(manager.path(), r#"{"cycle_interval_secs": 12, "sources": {"seismic": "live"}}"#)
            .unwrap();

        let loaded = manager.load();
        assert_eq!(loaded.cycle_interval_secs, 12);
        assert_eq!(loaded.backoff_interval_secs, 60);
        assert_eq!(loaded.source_kind(Category::Seismic), SourceKind::Live);
        assert_eq!(loaded.weights, FusionWeights::default());
    }

    #[test]
    fn test_garbage_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().to_path_buf());
        fs::write(manager.path(), "not json").unwrap();
        assert_eq!(manager.load(), Settings::default());
    }

    #[test]
    fn test_default_settings_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let cases: Vec<Settings> = vec![
            Settings {
                cycle_interval_secs: 0,
                ..Settings::default()
            },
            Settings {
                source_timeout_secs: 0,
                ..Settings::default()
            },
            Settings {
                history_capacity: 0,
                ..Settings::default()
            },
            Settings {
                subscriber_buffer: 0,
                ..Settings::default()
            },
            Settings {
                site: SiteConfig {
                    latitude: 91.0,
                    ..SiteConfig::default()
                },
                ..Settings::default()
            },
            Settings {
                weights: serde_json::from_str(r#"{"crowd": 0.5, "traffic": 0.2}"#).unwrap(),
                ..Settings::default()
            },
        ];

        for settings in cases {
            let err = settings.validate().unwrap_err();
            assert!(err.is_fatal(), "expected fatal error, got {err}");
        }
    }

    #[test]
    fn test_live_weather_requires_key() {
        let mut settings = Settings::default();
        settings.sources.insert(Category::Weather, SourceKind::Live);
        assert!(settings.validate().is_err());

        settings.openweather_api_key = Some("key".to_string());
        assert!(settings.validate().is_ok());

        settings.sources.insert(Category::Crowd, SourceKind::Live);
        assert!(settings.validate().is_err());

        settings.force_synthetic();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("OPENWEATHER_API_KEY", "secret"),
            ("SITE_LAT", "19.07"),
            ("SITE_LON", "not-a-number"),
            ("CROWD_DENSITY_THRESHOLD", "0.75"),
            ("EARTHQUAKE_MAGNITUDE_THRESHOLD", "4.5"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.openweather_api_key.as_deref(), Some("secret"));
        assert_eq!(settings.site.latitude, 19.07);
        assert_eq!(settings.site.longitude, 81.8463);
        assert_eq!(settings.thresholds.crowd_density, 0.75);
        assert_eq!(settings.thresholds.alert_magnitude, 4.5);
    }
}
