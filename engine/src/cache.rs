//! In-flight path cache.
//!
//! Holds the absolute paths of directories being listed and files queued or
//! being transferred. It is a best-effort dedup guard, not a lock: `check`,
//! `add` and `del` are each atomic, but a `check` followed by an `add` is
//! not. Two scans racing past `check` for the same path both proceed; the
//! only effect is a duplicate enqueue attempt, which the per-file guard then
//! suppresses with the same best-effort semantics.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct ProcessingCache {
    paths: Mutex<HashSet<PathBuf>>,
}

impl ProcessingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report whether `path` is currently in flight.
    pub fn check(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    /// Mark `path` as in flight. Adding a path twice is harmless.
    pub fn add(&self, path: &Path) {
        self.lock().insert(path.to_path_buf());
    }

    /// Release `path`. Releasing an absent path is harmless.
    pub fn del(&self, path: &Path) {
        self.lock().remove(path);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds a path in the cache until dropped.
pub struct CacheMark<'a> {
    cache: &'a ProcessingCache,
    path: PathBuf,
}

impl<'a> CacheMark<'a> {
    pub fn new(cache: &'a ProcessingCache, path: &Path) -> Self {
        cache.add(path);
        CacheMark {
            cache,
            path: path.to_path_buf(),
        }
    }
}

impl Drop for CacheMark<'_> {
    fn drop(&mut self) {
        self.cache.del(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_add_check_del() {
        let cache = ProcessingCache::new();
        let path = Path::new("/in/a.txt");

        assert!(!cache.check(path));
        cache.add(path);
        assert!(cache.check(path));
        cache.add(path);
        assert_eq!(cache.len(), 1);
        cache.del(path);
        assert!(!cache.check(path));
        cache.del(path);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_mark_releases_on_drop() {
        let cache = ProcessingCache::new();
        let dir = Path::new("/in");
        {
            let _mark = CacheMark::new(&cache, dir);
            assert!(cache.check(dir));
        }
        assert!(!cache.check(dir));
    }

    #[test]
    fn test_concurrent_add_and_del() {
        let cache = Arc::new(ProcessingCache::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200 {
                        let path = PathBuf::from(format!("/in/{}/{}", t, i));
                        cache.add(&path);
                        assert!(cache.check(&path));
                        cache.del(&path);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }
        assert!(cache.is_empty());
    }
}
