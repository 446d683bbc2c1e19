//! Shared file utility functions
//!
//! Extension checks, filename sanitization and directory listing used by
//! the parser, the mover and the pipeline.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::file_mover::TEMP_SUFFIX;

/// Video file extensions (lowercase, no dot)
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "ts", "m2ts", "mpg", "mpeg",
];

/// Check an extension (without the dot) against the video list
pub fn is_video_extension(ext: &str) -> bool {
    let lower = ext.to_ascii_lowercase();
    VIDEO_EXTENSIONS.contains(&lower.as_str())
}

/// Check if a file is a video file based on extension
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(is_video_extension)
}

/// True for the mover's in-progress copies; these are never finished files
pub fn is_temp_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(TEMP_SUFFIX))
}

/// Get the container format from a file's extension
pub fn get_container(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
}

/// Sanitize a string for use as a single path component
///
/// Uses the `sanitize_filename` crate, which strips characters that are
/// invalid on the current OS and reserved names like `CON`.
pub fn sanitize_for_filename(name: &str) -> String {
    let cleaned = sanitize_filename::sanitize(name.replace(['/', '\\'], "-"));
    cleaned.trim().trim_end_matches('.').to_string()
}

/// Every finished video file under `dir`, sorted
pub fn list_video_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_video_file(p) && !is_temp_artifact(p))
        .collect();
    files.sort();
    files
}

/// Format bytes into a human-readable string like "1.5 GB"
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
