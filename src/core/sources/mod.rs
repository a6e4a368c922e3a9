// Signal sources - one per category, pulled once per cycle.
//
// - synthetic.rs: randomized generators shaped like real site conditions
// - live.rs: OpenWeatherMap and USGS clients
// - scripted.rs: canned responses for tests and replays

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::config::{Settings, SourceKind};
use super::error::{MonitorError, Result, SourceError};
use super::model::{Category, Observation};

pub mod live;
pub mod scripted;
pub mod synthetic;

#[async_trait]
pub trait SignalSource: Send + Sync {
    fn category(&self) -> Category;

    /// Short label for logs.
    fn name(&self) -> &str;

    async fn fetch(&self) -> std::result::Result<Observation, SourceError>;
}

/// At most one source per category.
#[derive(Clone, Default)]
pub struct SourceSet {
    sources: BTreeMap<Category, Arc<dyn SignalSource>>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the configured source for every category.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.source_timeout())
            .build()
            .map_err(|e| MonitorError::InvalidConfiguration(format!("http client: {e}")))?;

        let mut set = Self::new();
        for category in Category::all() {
            let source: Arc<dyn SignalSource> = match (settings.source_kind(*category), category) {
                (SourceKind::Live, Category::Weather) => {
                    let api_key = settings.openweather_api_key.clone().ok_or_else(|| {
                        MonitorError::InvalidConfiguration(
                            "live weather requires openweather_api_key".to_string(),
                        )
                    })?;
                    Arc::new(live::OpenWeatherSource::new(
                        client.clone(),
                        &settings.openweather_base_url,
                        api_key,
                        &settings.site,
                    ))
                }
                (SourceKind::Live, Category::Seismic) => Arc::new(live::UsgsSource::new(
                    client.clone(),
                    &settings.usgs_base_url,
                    &settings.site,
                    settings.seismic_radius_km,
                )),
                (SourceKind::Live, other) => {
                    return Err(MonitorError::InvalidConfiguration(format!(
                        "no live source exists for {other}"
                    )))
                }
                (SourceKind::Synthetic, category) => synthetic::for_category(*category, &settings.site),
            };
            log::info!("{} source: {}", category, source.name());
            set.insert(source);
        }
        Ok(set)
    }

    /// Register a source, replacing any previous one for its category.
    pub fn insert(&mut self, source: Arc<dyn SignalSource>) -> Option<Arc<dyn SignalSource>> {
        self.sources.insert(source.category(), source)
    }

    pub fn with(mut self, source: impl SignalSource + 'static) -> Self {
        self.insert(Arc::new(source));
        self
    }

    pub fn get(&self, category: Category) -> Option<Arc<dyn SignalSource>> {
        self.sources.get(&category).cloned()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
