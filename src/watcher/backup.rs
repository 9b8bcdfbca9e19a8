//! Timestamped backups of replaced definition versions.
//!
//! When the watcher accepts a changed definition, the accepted file is
//! snapshotted into the backup directory, one timestamped copy per
//! replaced version. Backups are retained under a count and age policy
//! applied on every write.

use crate::error::{MusterError, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores and prunes timestamped definition backups.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
    keep_count: usize,
    keep_age: chrono::Duration,
}

impl BackupStore {
    /// Create a store writing to `dir`, retaining at most `keep_count`
    /// backups per agent, none older than `keep_days`.
    pub fn new(dir: impl Into<PathBuf>, keep_count: usize, keep_days: u32) -> Self {
        Self {
            dir: dir.into(),
            keep_count,
            keep_age: chrono::Duration::days(i64::from(keep_days)),
        }
    }

    /// Write a timestamped backup of a definition file.
    ///
    /// The filename embeds the agent name, a millisecond timestamp, and a
    /// content-hash fragment: `{name}_{timestamp}_{hash8}.yaml`.
    pub fn backup(&self, name: &str, source: &Path, content_hash: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            MusterError::Config(format!(
                "failed to create backup directory '{}': {}",
                self.dir.display(),
                e
            ))
        })?;

        let timestamp = Utc::now().format("%Y%m%d-%H%M%S%3f");
        let hash8: String = content_hash.chars().take(8).collect();
        let backup_path = self.dir.join(format!("{}_{}_{}.yaml", name, timestamp, hash8));

        std::fs::copy(source, &backup_path).map_err(|e| {
            MusterError::Config(format!(
                "failed to back up '{}' to '{}': {}",
                source.display(),
                backup_path.display(),
                e
            ))
        })?;

        debug!(name = %name, backup = %backup_path.display(), "definition backed up");
        self.prune(name)?;
        Ok(backup_path)
    }

    /// List backups for one agent, newest first.
    pub fn list(&self, name: &str) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("{}_", name);
        let mut backups: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map_err(|e| {
                MusterError::Config(format!(
                    "failed to read backup directory '{}': {}",
                    self.dir.display(),
                    e
                ))
            })?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix))
            })
            .collect();

        // The embedded timestamp makes filename order chronological.
        backups.sort();
        backups.reverse();
        Ok(backups)
    }

    /// Apply the retention policy for one agent. Returns the number of
    /// backups removed.
    pub fn prune(&self, name: &str) -> Result<usize> {
        let backups = self.list(name)?;
        let mut removed = 0;

        for (index, path) in backups.iter().enumerate() {
            let too_many = index >= self.keep_count;
            let too_old = std::fs::metadata(path)
                .and_then(|meta| meta.modified())
                .map(|mtime| {
                    let age = Utc::now()
                        .signed_duration_since(chrono::DateTime::<Utc>::from(mtime));
                    age > self.keep_age
                })
                .unwrap_or(false);

            if too_many || too_old {
                std::fs::remove_file(path).map_err(|e| {
                    MusterError::Config(format!(
                        "failed to remove stale backup '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_source(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("qa.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_backup_copies_content() {
        let temp_dir = TempDir::new().unwrap();
        let source = write_source(temp_dir.path(), "name: qa\nkind: qa\n");
        let store = BackupStore::new(temp_dir.path().join("backups"), 10, 30);

        let backup = store.backup("qa", &source, "abcdef0123456789").unwrap();
        assert!(backup.exists());
        assert_eq!(
            std::fs::read_to_string(&backup).unwrap(),
            "name: qa\nkind: qa\n"
        );

        let file_name = backup.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("qa_"));
        assert!(file_name.ends_with("_abcdef01.yaml"));
    }

    #[test]
    fn test_list_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        let source = write_source(temp_dir.path(), "v1");
        let store = BackupStore::new(temp_dir.path().join("backups"), 10, 30);

        let first = store.backup("qa", &source, "hash0001").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        std::fs::write(&source, "v2").unwrap();
        let second = store.backup("qa", &source, "hash0002").unwrap();

        let listed = store.list("qa").unwrap();
        assert_eq!(listed, vec![second, first]);
    }

    #[test]
    fn test_count_retention() {
        let temp_dir = TempDir::new().unwrap();
        let source = write_source(temp_dir.path(), "v");
        let store = BackupStore::new(temp_dir.path().join("backups"), 3, 30);

        for i in 0..6 {
            std::fs::write(&source, format!("v{}", i)).unwrap();
            store.backup("qa", &source, &format!("hash{:04}", i)).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let listed = store.list("qa").unwrap();
        assert_eq!(listed.len(), 3);
        // The newest three survive.
        let content = std::fs::read_to_string(&listed[0]).unwrap();
        assert_eq!(content, "v5");
    }

    #[test]
    fn test_retention_is_per_agent() {
        let temp_dir = TempDir::new().unwrap();
        let source = write_source(temp_dir.path(), "v");
        let store = BackupStore::new(temp_dir.path().join("backups"), 2, 30);

        store.backup("qa", &source, "hash0001").unwrap();
        store.backup("docs", &source, "hash0002").unwrap();
        store.backup("docs-agent", &source, "hash0003").unwrap();

        assert_eq!(store.list("qa").unwrap().len(), 1);
        // "docs" must not match "docs-agent" backups.
        assert_eq!(store.list("docs").unwrap().len(), 1);
        assert_eq!(store.list("docs-agent").unwrap().len(), 1);
    }

    #[test]
    fn test_list_empty_when_no_backups() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("backups"), 3, 30);
        assert!(store.list("qa").unwrap().is_empty());
    }
}
