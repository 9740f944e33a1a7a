//! AtmoSmart kernel: telemetry polling, compliance evaluation, alerts,
//! narration and exports for an air-quality monitored facility.

pub mod alerts;
pub mod catalog;
pub mod charts;
pub mod compliance;
pub mod config;
pub mod export;
pub mod health;
pub mod http;
pub mod models;
pub mod mqtt;
pub mod narration;
pub mod speech;
pub mod state;
pub mod synthetic;
pub mod telemetry;
pub mod twin;
