pub mod config;
pub mod event;
pub mod observability;
pub mod profile;
pub mod recurrence;
pub mod scheduler;
pub mod solar;

pub use anyhow::{Context, Result};
