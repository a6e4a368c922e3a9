pub mod alerts;
pub mod broadcaster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod monitor;
pub mod risk;
pub mod snapshot;
pub mod sources;
