//! KPI form completion dashboard: CSV ingestion, completion-rate pipeline,
//! HTML fragment rendering and a small web front-end.

pub mod config;
pub mod error;
pub mod loader;
pub mod output;
pub mod pipeline;
pub mod pivot;
pub mod rates;
pub mod render;
pub mod reports;
pub mod telemetry;
pub mod types;
pub mod util;
pub mod web;
