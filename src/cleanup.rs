//! Removal of generated segments from the temp directory.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

/// Files directly inside `dir` with one of `extensions`.
fn files_with_extension<'a>(
    dir: &Path,
    extensions: &'a [&'a str],
) -> impl Iterator<Item = PathBuf> + 'a {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Error reading temp directory entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(move |path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn remove(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::info!("Removed temporary file {}", path.display());
            true
        }
        Err(e) => {
            tracing::warn!("Error removing {}: {}", path.display(), e);
            false
        }
    }
}

/// Periodic removal of segments nothing will play any more.
#[derive(Debug, Clone)]
pub struct StaleSegmentCleaner {
    temp_dir: PathBuf,
    excluded: HashSet<String>,
    min_age: Duration,
}

impl StaleSegmentCleaner {
    pub fn new(temp_dir: impl Into<PathBuf>, excluded: &[String], min_age: Duration) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            excluded: excluded.iter().cloned().collect(),
            min_age,
        }
    }

    /// Delete `.mp4` files older than the minimum age that are neither
    /// excluded nor named in `referenced`. Returns how many were removed.
    pub fn remove_stale(&self, referenced: &HashSet<String>) -> io::Result<usize> {
        if !self.temp_dir.is_dir() {
            return Ok(0);
        }

        let now = SystemTime::now();
        let mut removed = 0;
        for path in files_with_extension(&self.temp_dir, &["mp4"]) {
            let name = file_name(&path);
            if self.excluded.contains(&name) || referenced.contains(&name) {
                continue;
            }

            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age > self.min_age && remove(&path) {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!("Stale segment sweep removed {} file(s)", removed);
        }
        Ok(removed)
    }
}

/// Delete every generated `.mp4`/`.txt` file in `temp_dir` and the playlists,
/// keeping anything listed in `excluded`.
pub fn remove_all_temporaries(
    temp_dir: &Path,
    playlists: &[PathBuf],
    excluded: &[String],
) -> usize {
    let mut removed = 0;

    if temp_dir.is_dir() {
        for path in files_with_extension(temp_dir, &["mp4", "txt"]) {
            if excluded.contains(&file_name(&path)) {
                continue;
            }
            if remove(&path) {
                removed += 1;
            }
        }
    }

    for playlist in playlists {
        if playlist.exists() && !excluded.contains(&file_name(playlist)) && remove(playlist) {
            removed += 1;
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn stale_sweep_respects_age_exclusions_and_references() {
        let dir = tempfile::tempdir().unwrap();
        let old = touch(dir.path(), "old.mp4");
        let kept = touch(dir.path(), "placeholder.mp4");
        let playing = touch(dir.path(), "playing.mp4");
        let other = touch(dir.path(), "notes.txt");

        let cleaner = StaleSegmentCleaner::new(
            dir.path(),
            &["placeholder.mp4".to_string()],
            Duration::ZERO,
        );
        let referenced: HashSet<String> = ["playing.mp4".to_string()].into_iter().collect();

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cleaner.remove_stale(&referenced).unwrap(), 1);
        assert!(!old.exists());
        assert!(kept.exists());
        assert!(playing.exists());
        assert!(other.exists());
    }

    #[test]
    fn young_segments_survive() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = touch(dir.path(), "fresh.mp4");
        let cleaner = StaleSegmentCleaner::new(dir.path(), &[], Duration::from_secs(3600));
        assert_eq!(cleaner.remove_stale(&HashSet::new()).unwrap(), 0);
        assert!(fresh.exists());
    }

    #[test]
    fn missing_temp_dir_is_not_an_error() {
        let cleaner = StaleSegmentCleaner::new("/nonexistent/snapfeed", &[], Duration::ZERO);
        assert_eq!(cleaner.remove_stale(&HashSet::new()).unwrap(), 0);
    }

    #[test]
    fn shutdown_sweep_removes_segments_and_playlists() {
        let dir = tempfile::tempdir().unwrap();
        let playlists = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.mp4");
        touch(dir.path(), "log.txt");
        let keep = touch(dir.path(), "placeholder.mp4");
        let image = touch(dir.path(), "frame.jpg");
        let list = touch(playlists.path(), "list_1.txt");

        let removed = remove_all_temporaries(
            dir.path(),
            &[list.clone(), playlists.path().join("list_2.txt")],
            &["placeholder.mp4".to_string()],
        );
        assert_eq!(removed, 3);
        assert!(keep.exists());
        assert!(image.exists());
        assert!(!list.exists());
    }
}
