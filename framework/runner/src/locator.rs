//! Finding the result file a tool wrote once its process has exited.
//!
//! Tools flush their results asynchronously with respect to exiting, so the file may not be there
//! yet when we first look. The directory is polled a bounded number of times and only files
//! modified strictly after the run started are considered, so a result left behind by an earlier
//! run in the same directory is never picked up.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

/// A file name pattern where `*` matches any run of characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPattern {
    pattern: String,
}

impl ArtifactPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        let parts = self.pattern.split('*').collect::<Vec<_>>();
        let (first, rest) = match parts.split_first() {
            Some(split) => split,
            None => return name.is_empty(),
        };
        let Some(mut remaining) = name.strip_prefix(first) else {
            return false;
        };
        let Some((last, middle)) = rest.split_last() else {
            // No wildcard at all.
            return remaining.is_empty();
        };

        for part in middle {
            match remaining.find(part) {
                Some(index) => remaining = &remaining[index + part.len()..],
                None => return false,
            }
        }
        remaining.ends_with(last)
    }
}

impl Display for ArtifactPattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatorConfig {
    /// How many times the directory is scanned before giving up.
    pub attempts: u32,
    /// Pause between scans.
    pub backoff: Duration,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(400),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No file matching '{pattern}' newer than the run start appeared in '{}' after {attempts} attempts", dir.display())]
pub struct ArtifactNotFound {
    pub dir: PathBuf,
    pub pattern: ArtifactPattern,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactLocator {
    config: LocatorConfig,
}

impl ArtifactLocator {
    pub fn new(config: LocatorConfig) -> Self {
        Self { config }
    }

    /// Poll `dir` for the newest file matching `pattern` that was modified strictly after
    /// `min_timestamp`.
    pub async fn locate(
        &self,
        dir: &Path,
        pattern: &ArtifactPattern,
        min_timestamp: SystemTime,
    ) -> Result<PathBuf, ArtifactNotFound> {
        let attempts = self.config.attempts.max(1);
        for attempt in 1..=attempts {
            let scan_dir = dir.to_path_buf();
            let scan_pattern = pattern.clone();
            let found = tokio::task::spawn_blocking(move || {
                newest_match(&scan_dir, &scan_pattern, min_timestamp)
            })
            .await
            .unwrap_or_else(|e| {
                log::error!("Artifact scan task failed: {e}");
                None
            });

            if let Some(path) = found {
                log::debug!(
                    "Located artifact '{}' on attempt {attempt}",
                    path.display()
                );
                return Ok(path);
            }

            if attempt < attempts {
                log::trace!(
                    "No artifact matching '{pattern}' in '{}' yet, attempt {attempt} of {attempts}",
                    dir.display()
                );
                tokio::time::sleep(self.config.backoff).await;
            }
        }

        Err(ArtifactNotFound {
            dir: dir.to_path_buf(),
            pattern: pattern.clone(),
            attempts,
        })
    }
}

/// One scan of the directory. Subdirectories are not searched.
fn newest_match(
    dir: &Path,
    pattern: &ArtifactPattern,
    min_timestamp: SystemTime,
) -> Option<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::trace!("Skipping unreadable entry: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| pattern.matches(&entry.file_name().to_string_lossy()))
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            (modified > min_timestamp).then(|| (modified, entry.into_path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    fn write_with_mtime(dir: &Path, name: &str, modified: SystemTime) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(modified).unwrap();
        path
    }

    fn quick() -> ArtifactLocator {
        ArtifactLocator::new(LocatorConfig {
            attempts: 2,
            backoff: Duration::from_millis(10),
        })
    }

    #[test]
    fn pattern_matching() {
        let pattern = ArtifactPattern::new("cl_*.json*");
        assert!(pattern.matches("cl_20240501.json"));
        assert!(pattern.matches("cl_20240501.json.gz"));
        assert!(pattern.matches("cl_.json"));
        assert!(!pattern.matches("sv_20240501.json"));
        assert!(!pattern.matches("cl_20240501.csv"));

        let exact = ArtifactPattern::new("result.json");
        assert!(exact.matches("result.json"));
        assert!(!exact.matches("result.json.gz"));

        let middle = ArtifactPattern::new("a*b*c");
        assert!(middle.matches("abc"));
        assert!(middle.matches("a-b-c"));
        assert!(!middle.matches("a-c-b"));
    }

    #[tokio::test]
    async fn ignores_files_not_newer_than_start() {
        let dir = tempfile::tempdir().unwrap();
        let start = SystemTime::now() - Duration::from_secs(60);
        write_with_mtime(dir.path(), "host_old.json", start - Duration::from_secs(30));
        write_with_mtime(dir.path(), "host_same.json", start);

        let err = quick()
            .locate(dir.path(), &ArtifactPattern::new("host_*"), start)
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 2);
    }

    #[tokio::test]
    async fn picks_newest_match_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let start = SystemTime::now() - Duration::from_secs(60);
        write_with_mtime(dir.path(), "host_stale.json", start - Duration::from_secs(1));
        write_with_mtime(dir.path(), "host_first.json", start + Duration::from_secs(5));
        let newest = write_with_mtime(dir.path(), "host_second.json", start + Duration::from_secs(10));
        write_with_mtime(dir.path(), "other_newest.json", start + Duration::from_secs(20));

        let found = quick()
            .locate(dir.path(), &ArtifactPattern::new("host_*.json*"), start)
            .await
            .unwrap();

        assert_eq!(found, newest);
    }

    #[tokio::test]
    async fn waits_for_a_late_flush() {
        let dir = tempfile::tempdir().unwrap();
        let start = SystemTime::now() - Duration::from_secs(1);
        let late_dir = dir.path().to_path_buf();

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            std::fs::write(late_dir.join("host_late.json"), b"[]").unwrap();
        });

        let locator = ArtifactLocator::new(LocatorConfig {
            attempts: 10,
            backoff: Duration::from_millis(50),
        });
        let found = locator
            .locate(dir.path(), &ArtifactPattern::new("host_*"), start)
            .await
            .unwrap();
        writer.await.unwrap();

        assert_eq!(found.file_name().unwrap(), "host_late.json");
    }

    #[tokio::test]
    async fn missing_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        let err = quick()
            .locate(&missing, &ArtifactPattern::new("*"), SystemTime::UNIX_EPOCH)
            .await
            .unwrap_err();

        assert_eq!(err.dir, missing);
    }
}
