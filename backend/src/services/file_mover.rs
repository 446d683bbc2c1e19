//! Crash-safe file moves
//!
//! A move is copy → fsync → rename → delete source. While the copy runs the
//! only thing at the destination is `<dest>.intake-partial`, so after a crash
//! the library holds either nothing new or a partial that the watcher and the
//! next attempt both recognise. Re-running an interrupted move is safe.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{debug, info, warn};

/// Suffix reserved for in-progress copies
pub const TEMP_SUFFIX: &str = ".intake-partial";

/// Language/flag segments allowed between a companion's stem and extension
const COMPANION_FLAGS: &[&str] = &["forced", "sdh", "cc", "default"];

const COMPARE_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum MoveError {
    #[error("source file vanished: {0}")]
    SourceMissing(PathBuf),

    #[error("destination already holds a different file: {0}")]
    DestinationExists(PathBuf),

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no space left while writing {0}")]
    DiskFull(PathBuf),

    #[error("copy {from} -> {to} failed: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("copied but could not remove source {0}")]
    SourceRetained(PathBuf),

    #[error("rename {from} -> {to} failed: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// `<dest>.intake-partial`
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Whether two files hold byte-identical content. Unreadable files are
/// never identical.
pub async fn same_contents(a: &Path, b: &Path) -> bool {
    match compare_files(a, b).await {
        Ok(same) => same,
        Err(e) => {
            debug!(a = %a.display(), b = %b.display(), error = %e, "Could not compare files");
            false
        }
    }
}

async fn compare_files(a: &Path, b: &Path) -> io::Result<bool> {
    let (meta_a, meta_b) = (fs::metadata(a).await?, fs::metadata(b).await?);
    if !meta_a.is_file() || !meta_b.is_file() || meta_a.len() != meta_b.len() {
        return Ok(false);
    }

    let mut reader_a = BufReader::new(fs::File::open(a).await?);
    let mut reader_b = BufReader::new(fs::File::open(b).await?);
    let mut buf_a = vec![0u8; COMPARE_CHUNK];
    let mut buf_b = vec![0u8; COMPARE_CHUNK];
    loop {
        let n = reader_a.read(&mut buf_a).await?;
        if n == 0 {
            return Ok(true);
        }
        reader_b.read_exact(&mut buf_b[..n]).await?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

/// Copy `src` to `dest` without ever exposing a half-written `dest`.
///
/// Returns `false` when `dest` already held exactly the source's bytes (a
/// finished copy from an interrupted earlier run) and nothing was written.
pub async fn safe_copy(src: &Path, dest: &Path) -> Result<bool, MoveError> {
    let src_meta = match fs::metadata(src).await {
        Ok(m) if m.is_file() => m,
        _ => return Err(MoveError::SourceMissing(src.to_path_buf())),
    };

    if fs::metadata(dest).await.is_ok() {
        if same_contents(src, dest).await {
            debug!(dest = %dest.display(), "Destination already complete, skipping copy");
            return Ok(false);
        }
        return Err(MoveError::DestinationExists(dest.to_path_buf()));
    }

    if let Some(parent) = dest.parent() {
        create_dir_all_inherit(parent).await?;
    }

    let temp = temp_path_for(dest);
    if fs::metadata(&temp).await.is_ok() {
        warn!(path = %temp.display(), "Removing stale partial copy");
        let _ = fs::remove_file(&temp).await;
    }

    if let Err(e) = copy_and_sync(src, &temp).await {
        let _ = fs::remove_file(&temp).await;
        if e.kind() == io::ErrorKind::StorageFull {
            return Err(MoveError::DiskFull(dest.to_path_buf()));
        }
        if e.kind() == io::ErrorKind::NotFound && fs::metadata(src).await.is_err() {
            return Err(MoveError::SourceMissing(src.to_path_buf()));
        }
        return Err(MoveError::Copy {
            from: src.to_path_buf(),
            to: temp,
            source: e,
        });
    }

    if let Err(e) = fs::rename(&temp, dest).await {
        let _ = fs::remove_file(&temp).await;
        return Err(MoveError::Rename {
            from: temp,
            to: dest.to_path_buf(),
            source: e,
        });
    }

    if let Some(parent) = dest.parent() {
        match fs::metadata(parent).await {
            Ok(meta) => set_owner_like(dest, &meta),
            Err(e) => debug!(path = %parent.display(), error = %e, "Could not stat parent for ownership"),
        }
    }

    debug!(src = %src.display(), dest = %dest.display(), bytes = src_meta.len(), "Copied file");
    Ok(true)
}

async fn copy_and_sync(src: &Path, temp: &Path) -> io::Result<()> {
    fs::copy(src, temp).await?;
    let file = fs::OpenOptions::new().write(true).open(temp).await?;
    file.sync_all().await
}

/// Best-effort removal of a source whose copy already succeeded
pub async fn safe_delete_source(src: &Path) -> bool {
    match fs::remove_file(src).await {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %src.display(), error = %e, "Could not remove source after copy");
            false
        }
    }
}

/// Copy then delete the source. A move only succeeds once the source is
/// gone; if it cannot be removed the fresh copy is rolled back.
pub async fn move_file(src: &Path, dest: &Path) -> Result<(), MoveError> {
    let copied = safe_copy(src, dest).await?;
    if !safe_delete_source(src).await {
        if copied {
            if let Err(e) = fs::remove_file(dest).await {
                warn!(path = %dest.display(), error = %e, "Failed to roll back copy");
            }
        }
        return Err(MoveError::SourceRetained(src.to_path_buf()));
    }
    info!(src = %src.display(), dest = %dest.display(), "Moved file");
    Ok(())
}

/// Create `dir` and any missing parents, giving each new directory the
/// owner and group of the deepest ancestor that already existed.
pub async fn create_dir_all_inherit(dir: &Path) -> Result<(), MoveError> {
    let mut missing = Vec::new();
    let mut cursor = Some(dir);
    let mut template = None;

    while let Some(current) = cursor {
        match fs::metadata(current).await {
            Ok(meta) => {
                template = Some(meta);
                break;
            }
            Err(_) => {
                missing.push(current.to_path_buf());
                cursor = current.parent();
            }
        }
    }

    for path in missing.into_iter().rev() {
        match fs::create_dir(&path).await {
            Ok(()) => {}
            // Raced with another creator
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(MoveError::CreateDir { path, source }),
        }
        if let Some(meta) = &template {
            set_owner_like(&path, meta);
        }
    }

    Ok(())
}

#[cfg(unix)]
fn set_owner_like(path: &Path, like: &std::fs::Metadata) {
    use std::os::unix::fs::MetadataExt;

    if let Err(e) = std::os::unix::fs::chown(path, Some(like.uid()), Some(like.gid())) {
        // Expected when not running as root
        debug!(path = %path.display(), error = %e, "Could not set ownership");
    }
}

#[cfg(not(unix))]
fn set_owner_like(_path: &Path, _like: &std::fs::Metadata) {}

/// Remove empty directories upward from `start`, never touching a root or
/// anything outside the roots.
pub async fn cleanup_empty_ancestors(start: &Path, roots: &[PathBuf]) -> usize {
    if !roots.iter().any(|r| start.starts_with(r)) {
        return 0;
    }

    let mut removed = 0;
    let mut current = Some(start.to_path_buf());
    while let Some(dir) = current {
        if roots.iter().any(|r| r == &dir) || dir.parent().is_none() {
            break;
        }
        if !is_dir_empty(&dir).await {
            break;
        }
        if let Err(e) = fs::remove_dir(&dir).await {
            debug!(path = %dir.display(), error = %e, "Stopped empty-folder cleanup");
            break;
        }
        debug!(path = %dir.display(), "Removed empty folder");
        removed += 1;
        current = dir.parent().map(Path::to_path_buf);
    }
    removed
}

async fn is_dir_empty(dir: &Path) -> bool {
    match fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

// ============================================================================
// Companion files
// ============================================================================

/// A sidecar that travels with a video: `stem.ext` or `stem.<lang>[.flag].ext`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Companion {
    pub path: PathBuf,
    /// Everything after the video stem, e.g. ".en.forced.srt"
    pub suffix: String,
}

/// Find companions of `video` among its siblings
pub async fn find_companions(video: &Path, extensions: &[String]) -> Vec<Companion> {
    let (Some(dir), Some(stem)) = (video.parent(), video.file_stem().and_then(|s| s.to_str())) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return found;
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path == video || !entry.file_type().await.is_ok_and(|t| t.is_file()) {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(suffix) = name.strip_prefix(stem) else {
            continue;
        };
        if is_companion_suffix(suffix, extensions) {
            found.push(Companion {
                suffix: suffix.to_string(),
                path,
            });
        }
    }

    found.sort_by(|a, b| a.path.cmp(&b.path));
    found
}

fn is_companion_suffix(suffix: &str, extensions: &[String]) -> bool {
    let Some(rest) = suffix.strip_prefix('.') else {
        return false;
    };
    if rest.ends_with(TEMP_SUFFIX) {
        return false;
    }

    let parts: Vec<&str> = rest.split('.').collect();
    let Some((ext, middle)) = parts.split_last() else {
        return false;
    };
    if !extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
        return false;
    }

    match middle {
        [] => true,
        [lang] => is_language_code(lang),
        [lang, flag] => {
            is_language_code(lang) && COMPANION_FLAGS.iter().any(|f| f.eq_ignore_ascii_case(flag))
        }
        _ => false,
    }
}

fn is_language_code(s: &str) -> bool {
    (2..=3).contains(&s.len()) && s.chars().all(|c| c.is_ascii_alphabetic())
}

/// Move every companion of `src` next to `dest`, renamed to `dest`'s stem.
/// Returns the new paths. Individual failures are logged and skipped.
pub async fn move_companions(src: &Path, dest: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let (Some(dest_dir), Some(dest_stem)) = (dest.parent(), dest.file_stem().and_then(|s| s.to_str()))
    else {
        return Vec::new();
    };

    let mut moved = Vec::new();
    for companion in find_companions(src, extensions).await {
        let target = dest_dir.join(format!("{}{}", dest_stem, companion.suffix));
        match move_file(&companion.path, &target).await {
            Ok(()) => moved.push(target),
            Err(e) => warn!(
                companion = %companion.path.display(),
                error = %e,
                "Failed to move companion file"
            ),
        }
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn exts() -> Vec<String> {
        ["srt", "nfo", "jpg"].iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_safe_copy_creates_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.mkv");
        std::fs::write(&src, b"video bytes").unwrap();
        let dest = dir.path().join("lib/Show/Season 01/out.mkv");

        assert!(safe_copy(&src, &dest).await.unwrap());

        assert_eq!(std::fs::read(&dest).unwrap(), b"video bytes");
        assert!(src.exists());
        assert!(!temp_path_for(&dest).exists());
    }

    #[tokio::test]
    async fn test_stale_partial_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.mkv");
        std::fs::write(&src, b"fresh").unwrap();
        let dest = dir.path().join("out/ep.mkv");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(temp_path_for(&dest), b"left over from a crash, much longer").unwrap();

        safe_copy(&src, &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh");
        assert!(!temp_path_for(&dest).exists());
    }

    #[tokio::test]
    async fn test_vanished_source_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = safe_copy(&dir.path().join("gone.mkv"), &dir.path().join("x.mkv")).await;
        assert_matches!(result, Err(MoveError::SourceMissing(_)));
        assert!(!dir.path().join("x.mkv").exists());
    }

    #[tokio::test]
    async fn test_rerun_after_completed_copy_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.mkv");
        let dest = dir.path().join("out.mkv");
        std::fs::write(&src, b"same").unwrap();

        safe_copy(&src, &dest).await.unwrap();
        assert!(!safe_copy(&src, &dest).await.unwrap());
        move_file(&src, &dest).await.unwrap();

        assert!(!src.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"same");
    }

    #[tokio::test]
    async fn test_same_size_stranger_is_not_adopted() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("new.mkv");
        let dest = dir.path().join("lib.mkv");
        std::fs::write(&src, b"NEWBYTES").unwrap();
        std::fs::write(&dest, b"OLDBYTES").unwrap();

        assert_matches!(move_file(&src, &dest).await, Err(MoveError::DestinationExists(_)));
        assert_eq!(std::fs::read(&src).unwrap(), b"NEWBYTES");
        assert_eq!(std::fs::read(&dest).unwrap(), b"OLDBYTES");
    }

    #[tokio::test]
    async fn test_same_contents() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let big: Vec<u8> = (0..COMPARE_CHUNK * 2 + 7).map(|i| (i % 251) as u8).collect();
        std::fs::write(&a, &big).unwrap();
        std::fs::write(&b, &big).unwrap();
        assert!(same_contents(&a, &b).await);

        let mut tail_differs = big.clone();
        *tail_differs.last_mut().unwrap() ^= 1;
        std::fs::write(&b, &tail_differs).unwrap();
        assert!(!same_contents(&a, &b).await);
        assert!(!same_contents(&a, &dir.path().join("missing")).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_undeletable_source_rolls_back_copy() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        let src = locked.join("old.mkv");
        std::fs::write(&src, b"old").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        // Directory permissions are not enforced for privileged users
        if std::fs::write(locked.join("canary"), b"").is_ok() {
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let dest = dir.path().join("issues/old.mkv");
        let result = move_file(&src, &dest).await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert_matches!(result, Err(MoveError::SourceRetained(_)));
        assert!(src.exists());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_different_destination_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.mkv");
        let dest = dir.path().join("out.mkv");
        std::fs::write(&src, b"new file").unwrap();
        std::fs::write(&dest, b"old").unwrap();

        assert_matches!(safe_copy(&src, &dest).await, Err(MoveError::DestinationExists(_)));
        assert_eq!(std::fs::read(&dest).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_delete_missing_source_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert!(safe_delete_source(&dir.path().join("nothing")).await);
    }

    #[tokio::test]
    async fn test_cleanup_stops_at_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("watch");
        let deep = root.join("a/b/c");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(root.join("a/keep.txt"), b"x").unwrap();

        let removed = cleanup_empty_ancestors(&deep, &[root.clone()]).await;
        assert_eq!(removed, 2);
        assert!(root.join("a").exists());
        assert!(!root.join("a/b").exists());

        let empty = root.join("solo");
        std::fs::create_dir_all(&empty).unwrap();
        std::fs::remove_file(root.join("a/keep.txt")).unwrap();
        cleanup_empty_ancestors(&root.join("a"), &[root.clone()]).await;
        assert!(root.exists());
    }

    #[tokio::test]
    async fn test_cleanup_ignores_paths_outside_roots() {
        let dir = tempfile::tempdir().unwrap();
        let stray = dir.path().join("elsewhere/empty");
        std::fs::create_dir_all(&stray).unwrap();

        assert_eq!(cleanup_empty_ancestors(&stray, &[dir.path().join("watch")]).await, 0);
        assert!(stray.exists());
    }

    #[test]
    fn test_companion_suffixes() {
        let e = exts();
        assert!(is_companion_suffix(".srt", &e));
        assert!(is_companion_suffix(".en.srt", &e));
        assert!(is_companion_suffix(".eng.forced.SRT", &e));
        assert!(is_companion_suffix(".nfo", &e));
        assert!(!is_companion_suffix(".english.srt", &e));
        assert!(!is_companion_suffix(".mkv", &e));
        assert!(!is_companion_suffix("E02.srt", &e));
        assert!(!is_companion_suffix(".en.srt.intake-partial", &e));
    }

    #[tokio::test]
    async fn test_move_companions_renames_to_destination_stem() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("Show.S01E01.720p.mkv");
        std::fs::write(&src, b"v").unwrap();
        std::fs::write(dir.path().join("Show.S01E01.720p.srt"), b"s").unwrap();
        std::fs::write(dir.path().join("Show.S01E01.720p.en.srt"), b"s").unwrap();
        std::fs::write(dir.path().join("Show.S01E01.720p.nfo"), b"n").unwrap();
        std::fs::write(dir.path().join("Other.srt"), b"o").unwrap();

        let dest = dir.path().join("lib/Show - S01E01 - Pilot.mkv");
        let moved = move_companions(&src, &dest, &exts()).await;

        assert_eq!(moved.len(), 3);
        assert!(dir.path().join("lib/Show - S01E01 - Pilot.en.srt").exists());
        assert!(dir.path().join("lib/Show - S01E01 - Pilot.srt").exists());
        assert!(dir.path().join("lib/Show - S01E01 - Pilot.nfo").exists());
        assert!(dir.path().join("Other.srt").exists());
        assert!(!dir.path().join("Show.S01E01.720p.en.srt").exists());
    }
}
