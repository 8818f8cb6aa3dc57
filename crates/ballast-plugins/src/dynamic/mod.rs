//! The load-aware scheduler plugin.

mod plugin;
mod stats;

pub use plugin::{DynamicScheduler, NAME};
