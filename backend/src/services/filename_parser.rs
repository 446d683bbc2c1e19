//! Filename parser for scene-style release names
//!
//! Parses filenames like:
//! - "Show.Name.S02E05.1080p.WEB-DL-GROUP.mkv"
//! - "Show Name 1x04-1x05 720p HDTV x264-GRP.avi"
//! - "Movie.Title.2019.{edition-Director's Cut}.2160p.BluRay.mkv"
//!
//! TV patterns are tried most specific first and the first acceptable hit
//! wins. A hit that overlaps a codec (x264, H.265) or resolution (720p, 1080i)
//! token is rejected and the search moves on. Movies are only considered once
//! no TV pattern is detectable anywhere in the name.

use std::ops::Range;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::file_utils::is_video_extension;

/// Result of parsing a single filename
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ParsedCandidate {
    Tv(TvCandidate),
    Movie(MovieCandidate),
    Unparsed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TvCandidate {
    pub title: String,
    pub season: u32,
    pub episode: u32,
    /// Last episode of a multi-episode file (`S01E01E02`, `1x01-03`)
    pub episode_end: Option<u32>,
    pub quality: Option<String>,
    pub source: Option<String>,
    pub release_group: Option<String>,
    pub year: Option<i32>,
}

impl TvCandidate {
    /// Every episode number the file covers, in order
    pub fn episode_numbers(&self) -> Vec<u32> {
        match self.episode_end {
            Some(end) if end > self.episode => (self.episode..=end).collect(),
            _ => vec![self.episode],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieCandidate {
    pub title: String,
    pub year: Option<i32>,
    pub quality: Option<String>,
    pub source: Option<String>,
    pub release_group: Option<String>,
    pub edition: Option<String>,
}

// ============================================================================
// Patterns
// ============================================================================

static SXXEYY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9])(s(\d{1,2})[ ._-]?e(\d{1,3}))").unwrap()
});
static SXXEYY_CONT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:[ ._-]?e(\d{1,3})|-(\d{1,3})(?:[^0-9a-z]|$))").unwrap()
});
static NXNN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9])((\d{1,2})x(\d{2,3}))(?:[^0-9a-z]|$)").unwrap()
});
static NXNN_CONT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^-(?:\d{1,2}x)?(\d{2,3})(?:[^0-9a-z]|$)").unwrap()
});
static VERBOSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9])(season[ ._-]*(\d{1,2})[ ._,-]*episode[ ._-]*(\d{1,3}))")
        .unwrap()
});
static COMPACT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[ ._-])((\d{1,2})(\d{2}))(?:[ ._-]|$)").unwrap());

static CODEC_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[xh][ ._]?26[45]").unwrap());
static RESOLUTION_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d{3,4}[pi]").unwrap());

/// Quality tiers, highest first
static QUALITY_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("2160P", r"2160[pi]|4k|uhd"),
        ("1080P", r"1080[pi]"),
        ("720P", r"720[pi]"),
        ("576P", r"576[pi]"),
        ("480P", r"480[pi]"),
    ]
    .into_iter()
    .map(|(label, pat)| (label, bounded(pat)))
    .collect()
});

static SOURCE_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("BluRay", r"blu[ ._-]?ray|bdrip|brrip|bdremux|remux"),
        ("WEB-DL", r"web[ ._-]?dl"),
        ("WEBRip", r"web[ ._-]?rip"),
        ("HDTV", r"hdtv"),
        ("DVDRip", r"dvd[ ._-]?rip|dvd"),
        ("HDRip", r"hdrip"),
        ("WEB", r"web"),
    ]
    .into_iter()
    .map(|(label, pat)| (label, bounded(pat)))
    .collect()
});

/// Any quality, source or codec tag; used to find where a movie title ends
static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    bounded(
        r"(?:2160|1080|720|576|480)[pi]|4k|uhd|blu[ ._-]?ray|bdrip|brrip|remux|web[ ._-]?dl|web[ ._-]?rip|hdtv|dvd[ ._-]?rip|dvd|hdrip|web|[xh][ ._]?26[45]|hevc|av1|xvid",
    )
});

static RELEASE_GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-([A-Za-z0-9]+)$").unwrap());
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9]+").unwrap());

static EDITION_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\{edition-([^}]+)\}").unwrap());
static EDITION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("Director's Cut", r"director'?s[ ._-]cut"),
        ("Extended", r"extended(?:[ ._-](?:cut|edition))?"),
        ("Final Cut", r"final[ ._-]cut"),
        ("Ultimate", r"ultimate(?:[ ._-](?:cut|edition))?"),
        ("Unrated", r"unrated"),
        ("Theatrical", r"theatrical(?:[ ._-]cut)?"),
        ("Remastered", r"remastered"),
        ("IMAX", r"imax"),
        ("Criterion", r"criterion"),
        ("Special Edition", r"special[ ._-]edition"),
        ("Anniversary Edition", r"anniversary[ ._-]edition"),
    ]
    .into_iter()
    .map(|(label, pat)| (label, bounded(pat)))
    .collect()
});

static BRACKETED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]|\{[^}]*\}").unwrap());
static AKA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+a\.?k\.?a\.?\s+.*$").unwrap());
static TRAILING_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[(\[]?(?:19|20)\d{2}[)\]]?\s*$").unwrap());
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Wrap a pattern so it only matches between separators
fn bounded(pattern: &str) -> Regex {
    Regex::new(&format!(r"(?i)(?:^|[^a-z0-9])({})(?:[^a-z0-9]|$)", pattern))
        .unwrap()
}

// ============================================================================
// Entry points
// ============================================================================

/// Parse a filename into a TV or movie candidate
pub fn parse(filename: &str) -> ParsedCandidate {
    let result = match parse_tv(filename) {
        Some(tv) => ParsedCandidate::Tv(tv),
        None => match parse_movie(filename) {
            Some(movie) => ParsedCandidate::Movie(movie),
            None => ParsedCandidate::Unparsed,
        },
    };

    debug!(filename = filename, parsed = ?result, "Parsed filename");
    result
}

/// Parse as a TV episode. The title may be empty when the name is just `S01E01`.
pub fn parse_tv(filename: &str) -> Option<TvCandidate> {
    let stem = strip_video_extension(filename);
    let hit = find_episode(stem)?;

    Some(TvCandidate {
        title: strip_trailing_year(&clean_title(&stem[..hit.span.start])),
        season: hit.season,
        episode: hit.episode,
        episode_end: hit.episode_end,
        quality: extract_quality(stem),
        source: extract_source(stem),
        release_group: extract_release_group(stem),
        year: extract_year(stem),
    })
}

/// Parse as a movie. Rejected outright if any TV pattern is present.
pub fn parse_movie(filename: &str) -> Option<MovieCandidate> {
    if has_episode_pattern(filename) {
        return None;
    }
    let stem = strip_video_extension(filename);

    let year_token = year_tokens(stem)
        .into_iter()
        .filter(|(_, span)| span.start > 0)
        .last();

    let title_end = match &year_token {
        Some((_, span)) => span.start,
        None => TAG_RE.captures(stem).and_then(|c| c.get(1)).map(|m| m.start())?,
    };

    let title = clean_title(&stem[..title_end]);
    if title.is_empty() {
        return None;
    }

    Some(MovieCandidate {
        title,
        year: year_token.map(|(y, _)| y),
        quality: extract_quality(stem),
        source: extract_source(stem),
        release_group: extract_release_group(stem),
        edition: extract_edition(stem),
    })
}

// ============================================================================
// Episode detection
// ============================================================================

#[derive(Debug)]
struct EpisodeHit {
    span: Range<usize>,
    season: u32,
    episode: u32,
    episode_end: Option<u32>,
}

/// True if any TV episode pattern is present
pub fn has_episode_pattern(filename: &str) -> bool {
    find_episode(strip_video_extension(filename)).is_some()
}

fn find_episode(stem: &str) -> Option<EpisodeHit> {
    let blocked = blocked_spans(stem);
    let acceptable = |span: &Range<usize>| !blocked.iter().any(|b| overlaps(b, span));

    // 1. S01E02, S01E02E03, S01E02-E03, S01E02-03
    for caps in SXXEYY_RE.captures_iter(stem) {
        let token = caps.get(1)?;
        let mut span = token.range();
        if !acceptable(&span) {
            continue;
        }
        let season = caps[2].parse().ok()?;
        let episode = caps[3].parse().ok()?;
        let mut episode_end = None;
        while let Some(cont) = SXXEYY_CONT_RE.captures(&stem[span.end..]) {
            let m = cont.get(1).or_else(|| cont.get(2))?;
            episode_end = m.as_str().parse().ok();
            span.end += m.end();
        }
        return Some(EpisodeHit {
            span,
            season,
            episode,
            episode_end: episode_end.filter(|e| *e > episode),
        });
    }

    // 2. 1x02, 1x02-1x03, 1x02-03
    for caps in NXNN_RE.captures_iter(stem) {
        let token = caps.get(1)?;
        let span = token.range();
        if !acceptable(&span) {
            continue;
        }
        let season = caps[2].parse().ok()?;
        let episode = caps[3].parse().ok()?;
        let episode_end = NXNN_CONT_RE
            .captures(&stem[span.end..])
            .and_then(|c| c[1].parse().ok())
            .filter(|e| *e > episode);
        return Some(EpisodeHit { span, season, episode, episode_end });
    }

    // 3. Season 1 Episode 2
    for caps in VERBOSE_RE.captures_iter(stem) {
        let token = caps.get(1)?;
        let span = token.range();
        if !acceptable(&span) {
            continue;
        }
        return Some(EpisodeHit {
            span,
            season: caps[2].parse().ok()?,
            episode: caps[3].parse().ok()?,
            episode_end: None,
        });
    }

    // 4. Compact 102 = S01E02, 1012 = S10E12. Episode 00, numbers that are
    //    themselves a year, and numbers followed by a year are almost always
    //    titles ("300", "1917", "The 355 2022").
    let years = year_tokens(stem);
    for caps in COMPACT_RE.captures_iter(stem) {
        let token = caps.get(1)?;
        let span = token.range();
        if !acceptable(&span) {
            continue;
        }
        let season: u32 = caps[2].parse().ok()?;
        let episode: u32 = caps[3].parse().ok()?;
        if season == 0 || episode == 0 {
            continue;
        }
        if years.iter().any(|(_, y)| *y == span || y.start >= span.end) {
            continue;
        }
        return Some(EpisodeHit { span, season, episode, episode_end: None });
    }

    None
}

fn blocked_spans(stem: &str) -> Vec<Range<usize>> {
    CODEC_TOKEN_RE
        .find_iter(stem)
        .chain(RESOLUTION_TOKEN_RE.find_iter(stem))
        .map(|m| m.range())
        .collect()
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

// ============================================================================
// Field extraction
// ============================================================================

/// Highest resolution tier mentioned, e.g. "1080P"
pub fn extract_quality(name: &str) -> Option<String> {
    QUALITY_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(name))
        .map(|(label, _)| label.to_string())
}

pub fn extract_source(name: &str) -> Option<String> {
    SOURCE_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(name))
        .map(|(label, _)| label.to_string())
}

/// Trailing `-GROUP` before the extension
pub fn extract_release_group(name: &str) -> Option<String> {
    let stem = strip_video_extension(name);
    let group = RELEASE_GROUP_RE.captures(stem)?.get(1)?.as_str();

    let upper = group.to_uppercase();
    if group.chars().all(|c| c.is_ascii_digit()) || matches!(upper.as_str(), "DL" | "RIP") {
        return None;
    }
    Some(group.to_string())
}

/// Last plausible release year (1900-2099) standing alone between separators
pub fn extract_year(name: &str) -> Option<i32> {
    year_tokens(name).into_iter().last().map(|(y, _)| y)
}

fn year_tokens(name: &str) -> Vec<(i32, Range<usize>)> {
    TOKEN_RE
        .find_iter(name)
        .filter(|m| m.as_str().len() == 4)
        .filter_map(|m| {
            let y: i32 = m.as_str().parse().ok()?;
            (1900..=2099).contains(&y).then(|| (y, m.range()))
        })
        .collect()
}

/// `{edition-...}` wins over descriptive tokens
pub fn extract_edition(name: &str) -> Option<String> {
    if let Some(caps) = EDITION_TAG_RE.captures(name) {
        let tag = caps[1].trim();
        if !tag.is_empty() {
            return Some(tag.to_string());
        }
    }

    EDITION_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(name))
        .map(|(label, _)| label.to_string())
}

// ============================================================================
// Helpers
// ============================================================================

/// Drop a trailing video extension; other suffixes are left alone so
/// `Show.S01E01` is not mistaken for a file with extension `S01E01`.
fn strip_video_extension(filename: &str) -> &str {
    let path = Path::new(filename);
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or(filename);
    match name.rsplit_once('.') {
        Some((stem, ext)) if is_video_extension(ext) => stem,
        _ => name,
    }
}

/// Turn the text before a match into a display title
pub fn clean_title(raw: &str) -> String {
    let without_tags = BRACKETED_RE.replace_all(raw, " ");
    let spaced = without_tags.replace(['.', '_'], " ");
    let title = SPACE_RE.replace_all(&spaced, " ");
    let title = AKA_RE.replace(title.trim(), "");
    trim_separators(&title).to_string()
}

/// Drop a trailing "2005" or "(2005)"; TV titles carry the year separately
fn strip_trailing_year(title: &str) -> String {
    let stripped = TRAILING_YEAR_RE.replace(title, "");
    match trim_separators(&stripped) {
        // The whole title is a year ("1923")
        "" => title.to_string(),
        rest => rest.to_string(),
    }
}

fn trim_separators(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '(' | '[' | ',' | ':'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn tv(filename: &str) -> TvCandidate {
        match parse(filename) {
            ParsedCandidate::Tv(tv) => tv,
            other => panic!("expected TV for {filename}, got {other:?}"),
        }
    }

    fn movie(filename: &str) -> MovieCandidate {
        match parse(filename) {
            ParsedCandidate::Movie(m) => m,
            other => panic!("expected movie for {filename}, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_sxxeyy() {
        let ep = tv("Show.Name.S02E05.1080p.WEB-DL-GROUP.mkv");
        assert_eq!(ep.title, "Show Name");
        assert_eq!(ep.season, 2);
        assert_eq!(ep.episode, 5);
        assert_eq!(ep.episode_end, None);
        assert_eq!(ep.quality.as_deref(), Some("1080P"));
        assert_eq!(ep.source.as_deref(), Some("WEB-DL"));
        assert_eq!(ep.release_group.as_deref(), Some("GROUP"));
    }

    #[test]
    fn test_codec_token_is_not_an_episode() {
        assert_matches!(parse("Show.Name.x264.mkv"), ParsedCandidate::Unparsed);
        assert!(!has_episode_pattern("Show.Name.H.264.mkv"));
        assert!(!has_episode_pattern("Show.Name.h265.mkv"));
    }

    #[test]
    fn test_resolution_token_is_not_an_episode() {
        assert!(!has_episode_pattern("Show.Name.720p.mkv"));
        assert!(!has_episode_pattern("Movie.Title.2019.480i.DVD.mkv"));
    }

    #[test]
    fn test_parse_multi_episode_forms() {
        assert_eq!(tv("Show.S01E01E02.720p.mkv").episode_end, Some(2));
        assert_eq!(tv("Show.S01E01-E03.720p.mkv").episode_end, Some(3));
        assert_eq!(tv("Show.S01E01-03.mkv").episode_end, Some(3));
        assert_eq!(tv("Show.S01E01-03.mkv").episode_numbers(), vec![1, 2, 3]);
        // A release group starting with E is not a continuation
        assert_eq!(tv("Show.S01E01-EDITH.mkv").episode_end, None);
    }

    #[test]
    fn test_parse_nxnn() {
        let ep = tv("Show Name 3x07 HDTV-LOL.avi");
        assert_eq!((ep.season, ep.episode), (3, 7));
        assert_eq!(ep.title, "Show Name");
        assert_eq!(ep.release_group.as_deref(), Some("LOL"));

        assert_eq!(tv("Show.1x01-1x03.mkv").episode_end, Some(3));
        assert_eq!(tv("Show.1x01-02.mkv").episode_end, Some(2));
    }

    #[test]
    fn test_parse_verbose() {
        let ep = tv("Show Name Season 2 Episode 10.mp4");
        assert_eq!(ep.title, "Show Name");
        assert_eq!((ep.season, ep.episode), (2, 10));
    }

    #[test]
    fn test_parse_compact() {
        let ep = tv("Show.Name.312.HDTV.mkv");
        assert_eq!((ep.season, ep.episode), (3, 12));
        assert_eq!(ep.title, "Show Name");

        let ep = tv("Show.Name.1012.HDTV.mkv");
        assert_eq!((ep.season, ep.episode), (10, 12));
        assert_eq!(ep.title, "Show Name");
    }

    #[test]
    fn test_compact_skips_titles() {
        assert_matches!(parse("300.2006.1080p.BluRay.mkv"), ParsedCandidate::Movie(_));
        assert_matches!(parse("The.355.2022.1080p.WEB.mkv"), ParsedCandidate::Movie(_));
        assert_matches!(parse("1917.2019.1080p.BluRay.mkv"), ParsedCandidate::Movie(_));
        assert_matches!(parse("Blade.Runner.2049.2017.mkv"), ParsedCandidate::Movie(_));
    }

    #[test]
    fn test_title_cleaning() {
        assert_eq!(tv("Doctor.Who.2005.S01E01.720p.mkv").title, "Doctor Who");
        assert_eq!(tv("Doctor.Who.2005.S01E01.720p.mkv").year, Some(2005));
        assert_eq!(tv("Show (2019) - S01E01.mkv").title, "Show");
        assert_eq!(tv("Shogun.AKA.Shougun.S01E03.mkv").title, "Shogun");
        assert_eq!(tv("[Group] Some_Show_S01E02.mkv").title, "Some Show");
        assert_eq!(tv("1923.S01E01.mkv").title, "1923");
    }

    #[test]
    fn test_empty_title_is_still_tv() {
        let ep = tv("S01E04.mkv");
        assert_eq!(ep.title, "");
        assert_eq!(ep.episode, 4);
    }

    #[test]
    fn test_quality_prefers_highest_tier() {
        assert_eq!(extract_quality("Movie.2160p.from.1080p.master").as_deref(), Some("2160P"));
        assert_eq!(extract_quality("Movie.4K.HDR").as_deref(), Some("2160P"));
        assert_eq!(extract_quality("Movie.576p"), Some("576P".to_string()));
        assert_eq!(extract_quality("Movie.DVD"), None);
    }

    #[test]
    fn test_year_bounds() {
        assert_eq!(extract_year("Movie.1899.mkv"), None);
        assert_eq!(extract_year("Movie.2100"), None);
        assert_eq!(extract_year("Movie.1999.1080p"), Some(1999));
        assert_eq!(extract_year("Movie20191080p"), None);
    }

    #[test]
    fn test_release_group_ignores_source_suffix() {
        assert_eq!(extract_release_group("Movie.2019.1080p.WEB-DL.mkv"), None);
        assert_eq!(extract_release_group("Movie.2019.1080p.BluRay.x264-SPARKS.mkv").as_deref(), Some("SPARKS"));
        assert_eq!(extract_release_group("Movie-2019.mkv"), None);
    }

    #[test]
    fn test_parse_movie() {
        let m = movie("The.Matrix.1999.1080p.BluRay.x264-GROUP.mkv");
        assert_eq!(m.title, "The Matrix");
        assert_eq!(m.year, Some(1999));
        assert_eq!(m.quality.as_deref(), Some("1080P"));
        assert_eq!(m.source.as_deref(), Some("BluRay"));
        assert_eq!(m.release_group.as_deref(), Some("GROUP"));
        assert_eq!(m.edition, None);
    }

    #[test]
    fn test_movie_year_is_last_plausible() {
        let m = movie("Blade.Runner.2049.2017.2160p.mkv");
        assert_eq!(m.title, "Blade Runner 2049");
        assert_eq!(m.year, Some(2017));

        let m = movie("1917 (2019).mkv");
        assert_eq!(m.title, "1917");
        assert_eq!(m.year, Some(2019));
    }

    #[test]
    fn test_movie_without_year_uses_first_tag() {
        let m = movie("Some.Documentary.720p.WEBRip.mkv");
        assert_eq!(m.title, "Some Documentary");
        assert_eq!(m.year, None);
        assert_eq!(m.source.as_deref(), Some("WEBRip"));
    }

    #[test]
    fn test_edition_priority() {
        let m = movie("Blade.Runner.1982.{edition-The Final Cut}.Extended.1080p.mkv");
        assert_eq!(m.edition.as_deref(), Some("The Final Cut"));
        assert_eq!(m.title, "Blade Runner");

        let m = movie("Aliens.1986.Directors.Cut.1080p.mkv");
        assert_eq!(m.edition.as_deref(), Some("Director's Cut"));

        let m = movie("Kingdom.of.Heaven.2005.Extended.Edition.BluRay.mkv");
        assert_eq!(m.edition.as_deref(), Some("Extended"));
    }

    #[test]
    fn test_movie_rejected_when_episode_present() {
        assert!(parse_movie("Show.2019.S01E01.1080p.mkv").is_none());
    }

    #[test]
    fn test_unparseable_names() {
        assert_matches!(parse("randomfile.mkv"), ParsedCandidate::Unparsed);
        assert_matches!(parse(""), ParsedCandidate::Unparsed);
        assert_matches!(parse("...."), ParsedCandidate::Unparsed);
    }

    #[test]
    fn test_full_path_is_accepted() {
        let ep = tv("/downloads/complete/Show.Name.S01E02.mkv");
        assert_eq!(ep.title, "Show Name");
    }
}
