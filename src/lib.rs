pub mod api;
pub mod config;
pub mod dedup;
pub mod error;
pub mod feed;
pub mod model;
pub mod monitor;
pub mod pipeline;
pub mod schedule;
pub mod search;
pub mod services;
pub mod store;

pub use api::Autopilot;
pub use error::{AutopilotError, Result};
