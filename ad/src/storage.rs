//! Storage capacity and per-account cache usage

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::domain::AccountId;

/// Capacity figures the prefetcher budgets against
pub trait StorageMonitor: Send + Sync {
    fn total_bytes(&self) -> io::Result<u64>;

    fn available_bytes(&self) -> io::Result<u64>;

    /// Exact bytes currently stored for an account
    fn account_usage(&self, account_id: AccountId) -> io::Result<u64>;
}

/// Attachment cache laid out as `<root>/<account-id>/<attachment-id>`
#[derive(Debug, Clone)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root if it does not exist yet
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn account_dir(&self, account_id: AccountId) -> PathBuf {
        self.root.join(account_id.to_string())
    }
}

impl StorageMonitor for CacheDir {
    fn total_bytes(&self) -> io::Result<u64> {
        fs2::total_space(&self.root)
    }

    fn available_bytes(&self) -> io::Result<u64> {
        fs2::available_space(&self.root)
    }

    fn account_usage(&self, account_id: AccountId) -> io::Result<u64> {
        let dir = self.account_dir(account_id);
        if !dir.exists() {
            return Ok(0);
        }

        let mut total = 0u64;
        for entry in WalkDir::new(&dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(account_id, error = %e, "CacheDir::account_usage: skipping entry");
                    continue;
                }
            };
            if entry.file_type().is_file() {
                total += entry.metadata().map_err(io::Error::other)?.len();
            }
        }
        debug!(account_id, total, "CacheDir::account_usage: scanned");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_account_usage_sums_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::new(dir.path());

        fs::create_dir_all(cache.account_dir(1).join("nested")).unwrap();
        fs::write(cache.account_dir(1).join("10"), vec![0u8; 300]).unwrap();
        fs::write(cache.account_dir(1).join("nested").join("11"), vec![0u8; 200]).unwrap();
        fs::create_dir_all(cache.account_dir(2)).unwrap();
        fs::write(cache.account_dir(2).join("20"), vec![0u8; 50]).unwrap();

        assert_eq!(cache.account_usage(1).unwrap(), 500);
        assert_eq!(cache.account_usage(2).unwrap(), 50);
        assert_eq!(cache.account_usage(3).unwrap(), 0);
    }

    #[test]
    fn test_capacity_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::new(dir.path().join("cache"));
        cache.ensure().unwrap();

        let total = cache.total_bytes().unwrap();
        let available = cache.available_bytes().unwrap();
        assert!(total > 0);
        assert!(available <= total);
    }
}
