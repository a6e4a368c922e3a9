// Alert system: synthesizes prioritized alerts from observations.
//
// Architecture:
// - model.rs: Alert record, priority, status and summary types
// - triggers.rs: Per-category rule tables and thresholds
// - engine.rs: Alert synthesizer, history and acknowledgement

pub mod engine;
pub mod model;
pub mod triggers;
