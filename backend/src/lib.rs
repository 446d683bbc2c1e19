//! Library intake
//!
//! Watches download folders and files each finished video into the curated
//! library: parse the name, match or import the catalog entry, compare
//! quality against any existing copy, then move it into place or into the
//! issues folder with a reason code.

pub mod config;
pub mod db;
pub mod jobs;
pub mod services;

pub use config::Config;
pub use db::Database;
pub use services::pipeline::{Disposition, Pipeline, PipelineError, ProcessOutcome};
