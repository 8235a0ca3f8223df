//! Project-tracker client used by the polling tasks.

pub mod client;
pub mod http;

pub use client::{Build, InMemoryTrackerClient, PullRequest, TrackerClient, TrackerError, WorkItem};
pub use http::HttpTrackerClient;
