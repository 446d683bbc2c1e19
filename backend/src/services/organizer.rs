//! Library and issues-folder layout
//!
//! Turns catalog entries into destination paths:
//! - Show folders (e.g., "Show Name (2024)")
//! - Season folders from the show's season template (e.g., "Season 01")
//! - Episode and movie file names from naming templates
//! - Issues-folder placement by date, reason or flat, with collision-safe names

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::file_utils::sanitize_for_filename;

pub const DEFAULT_MOVIE_TEMPLATE: &str = "{title} ({year})";

/// How files are grouped inside the issues folder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuesOrganization {
    /// `<issues>/<YYYY-MM-DD>/file`
    #[default]
    Date,
    /// `<issues>/<reason>/file`
    Reason,
    /// `<issues>/file`
    Flat,
}

impl IssuesOrganization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Reason => "reason",
            Self::Flat => "flat",
        }
    }
}

/// Why a file ended up in the issues folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueReason {
    ParseFailed,
    ShowNotFound,
    ShowNoFolder,
    MovieNotFound,
    MovieNoFolder,
    Duplicate,
    DuplicateUnverified,
    UpgradeAborted,
    MoveFailed,
    /// Library file displaced by a better copy
    Replaced,
}

impl IssueReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseFailed => "parse_failed",
            Self::ShowNotFound => "show_not_found",
            Self::ShowNoFolder => "show_no_folder",
            Self::MovieNotFound => "movie_not_found",
            Self::MovieNoFolder => "movie_no_folder",
            Self::Duplicate => "duplicate",
            Self::DuplicateUnverified => "duplicate_unverified",
            Self::UpgradeAborted => "upgrade_aborted",
            Self::MoveFailed => "move_failed",
            Self::Replaced => "replaced",
        }
    }
}

impl std::fmt::Display for IssueReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values available to naming templates
///
/// Supported variables:
/// - `{show}` - show name
/// - `{year}` - show premiere year or movie release year
/// - `{season}` / `{season:02}` - season number, optionally zero-padded
/// - `{episode}` / `{episode:02}` - episode number, optionally zero-padded
/// - `{episode_end}` / `{episode_end:02}` - last episode of a multi-episode file
/// - `{title}` - episode or movie title
/// - `{quality}` - quality label parsed from the incoming file name
/// - `{edition}` - movie edition
#[derive(Debug, Clone, Default)]
pub struct TemplateValues {
    pub show: Option<String>,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub episode_end: Option<u32>,
    pub title: Option<String>,
    pub quality: Option<String>,
    pub edition: Option<String>,
}

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_]+)(?::(\d+))?\}").unwrap());
static EMPTY_BRACKETS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*\)|\[\s*\]").unwrap());
static MULTI_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

fn pad(n: u32, width: Option<&str>) -> String {
    match width.and_then(|w| w.parse::<usize>().ok()) {
        Some(w) => format!("{:0>width$}", n, width = w),
        None => n.to_string(),
    }
}

/// Render a single path component from a template
///
/// Unknown placeholders are left untouched. Missing values render empty, and
/// the separators or brackets left dangling around them are removed.
pub fn render_template(template: &str, values: &TemplateValues) -> String {
    // A multi-episode file named by a template without {episode_end} still
    // carries the range in its episode token, e.g. E01-E03
    let inline_range = !template.contains("{episode_end");

    let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &Captures| {
        let width = caps.get(2).map(|m| m.as_str());
        match &caps[1] {
            "show" => values.show.as_deref().map(sanitize_for_filename).unwrap_or_default(),
            "title" => values.title.as_deref().map(sanitize_for_filename).unwrap_or_default(),
            "quality" => values.quality.as_deref().map(sanitize_for_filename).unwrap_or_default(),
            "edition" => values.edition.as_deref().map(sanitize_for_filename).unwrap_or_default(),
            "year" => values.year.map(|y| y.to_string()).unwrap_or_default(),
            "season" => values.season.map(|s| pad(s, width)).unwrap_or_default(),
            "episode" => match (values.episode, values.episode_end) {
                (Some(start), Some(end)) if inline_range && end > start => {
                    format!("{}-E{}", pad(start, width), pad(end, width))
                }
                (Some(start), _) => pad(start, width),
                (None, _) => String::new(),
            },
            "episode_end" => values
                .episode_end
                .or(values.episode)
                .map(|e| pad(e, width))
                .unwrap_or_default(),
            _ => caps[0].to_string(),
        }
    });

    tidy_component(&rendered)
}

fn tidy_component(s: &str) -> String {
    let s = EMPTY_BRACKETS_RE.replace_all(s, "");
    let s = MULTI_SPACE_RE.replace_all(&s, " ");
    s.trim()
        .trim_end_matches(|c: char| c == '-' || c == '.' || c.is_whitespace())
        .trim_start_matches(|c: char| c == '-' || c.is_whitespace())
        .to_string()
}

/// "Name (Year)", or just the name when the year is unknown
pub fn media_folder_name(name: &str, year: Option<i32>) -> String {
    match year {
        Some(y) => format!("{} ({})", sanitize_for_filename(name), y),
        None => sanitize_for_filename(name),
    }
}

fn with_extension(stem: String, extension: &str) -> String {
    let ext = extension.trim_start_matches('.');
    if ext.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, ext)
    }
}

/// Full destination of an episode file inside its show folder
pub fn episode_destination(
    show_folder: &Path,
    season_template: &str,
    episode_template: &str,
    values: &TemplateValues,
    extension: &str,
) -> PathBuf {
    let mut values = values.clone();
    if values.title.as_deref().is_none_or(|t| t.trim().is_empty()) {
        values.title = values.episode.map(|e| format!("Episode {}", e));
    }

    let season_dir = render_template(season_template, &values);
    let file_name = with_extension(render_template(episode_template, &values), extension);

    if season_dir.is_empty() {
        show_folder.join(file_name)
    } else {
        show_folder.join(season_dir).join(file_name)
    }
}

/// Full destination of a movie file inside its movie folder
pub fn movie_destination(
    movie_folder: &Path,
    movie_template: &str,
    values: &TemplateValues,
    extension: &str,
) -> PathBuf {
    let mut stem = render_template(movie_template, values);
    if stem.is_empty() {
        stem = values.title.as_deref().map(sanitize_for_filename).unwrap_or_default();
    }
    movie_folder.join(with_extension(stem, extension))
}

/// Directory a quarantined file goes to, before collision handling
pub fn issues_directory(
    issues_root: &Path,
    reason: IssueReason,
    organization: IssuesOrganization,
    date: NaiveDate,
) -> PathBuf {
    match organization {
        IssuesOrganization::Date => issues_root.join(date.format("%Y-%m-%d").to_string()),
        IssuesOrganization::Reason => issues_root.join(reason.as_str()),
        IssuesOrganization::Flat => issues_root.to_path_buf(),
    }
}

/// File name for a library file displaced by an upgrade: "<Show Name> - <old name>"
pub fn replaced_file_name(owner_name: &str, old_file_name: &str) -> String {
    format!("{} - {}", sanitize_for_filename(owner_name), old_file_name)
}

/// First of `path`, `name (1).ext`, `name (2).ext`, ... that does not exist yet
pub async fn unique_path(path: &Path) -> PathBuf {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return path.to_path_buf();
    }

    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());

    let mut n = 1u32;
    loop {
        let name = match &ext {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        let candidate = parent.join(name);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

/// Collision-free destination for a quarantined file
pub async fn issues_destination(
    issues_root: &Path,
    reason: IssueReason,
    organization: IssuesOrganization,
    file_name: &str,
    date: NaiveDate,
) -> PathBuf {
    let dir = issues_directory(issues_root, reason, organization, date);
    unique_path(&dir.join(file_name)).await
}
