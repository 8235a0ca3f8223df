//! HTTP API: admin surface, dashboard reads and webhook intake.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
