#![forbid(unsafe_code)]

// Collaborative IDE load generator - simulated classroom participants

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod session;
