//! Intake services: parsing, matching, probing, moving and orchestration

pub mod ffmpeg;
pub mod file_mover;
pub mod file_utils;
pub mod filename_parser;
pub mod metadata;
pub mod organizer;
pub mod pipeline;
pub mod quality_evaluator;
pub mod rate_limiter;
pub mod text_utils;
pub mod tmdb;
pub mod tvdb;
pub mod watcher;

pub use ffmpeg::{FfprobeAnalyzer, MediaProbe};
pub use metadata::MetadataProvider;
pub use pipeline::{Pipeline, ProgressEvent, RunProgress, Stage};
pub use tmdb::TmdbClient;
pub use tvdb::TvdbClient;
pub use watcher::{WatchFolderSource, WatcherConfig};
