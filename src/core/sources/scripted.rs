use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::SignalSource;
use crate::core::error::SourceError;
use crate::core::model::{Category, Observation};

type Response = Result<Observation, SourceError>;

/// Source that plays back a fixed list of responses. The last response
/// repeats once the list is exhausted.
pub struct ScriptedSource {
    category: Category,
    name: String,
    responses: Mutex<VecDeque<Response>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            name: format!("scripted-{}", category.display_name().to_lowercase()),
            responses: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then_ok(self, observation: Observation) -> Self {
        self.responses.lock().push_back(Ok(observation));
        self
    }

    pub fn then_err(self, error: SourceError) -> Self {
        self.responses.lock().push_back(Err(error));
        self
    }

    /// Sleep before every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Response {
        let mut responses = self.responses.lock();
        let next = if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().cloned()
        };
        next.unwrap_or_else(|| Err(SourceError::Unavailable("no scripted response".to_string())))
    }
}

#[async_trait]
impl SignalSource for ScriptedSource {
    fn category(&self) -> Category {
        self.category
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Observation, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_response()
    }
}
