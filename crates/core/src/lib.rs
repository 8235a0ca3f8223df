//! `devpulse-core`: identifiers and error primitives shared by every crate.
//!
//! This crate is pure: no I/O, no runtime, no infrastructure concerns.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{ExecutionId, TenantId, TimerId};
