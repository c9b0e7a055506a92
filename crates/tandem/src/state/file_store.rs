//! Shared virtual file map
//!
//! A [`FileStore`] is an explicit shared-ownership handle over a path → file map.
//! Handles obtained through [`FileStore::share`] point at the same map, so a write
//! through one is visible through all of them. Every write takes the map-wide
//! write lock, which serializes writes to the same path; writes to different paths
//! carry no ordering guarantee relative to each other.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::types::FileData;

/// Handle to a (possibly shared) virtual file map
#[derive(Debug, Default)]
pub struct FileStore {
    files: Arc<RwLock<HashMap<String, FileData>>>,
}

impl FileStore {
    /// Create an independent, empty file map
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an independent map seeded with `files`
    pub fn from_files(files: HashMap<String, FileData>) -> Self {
        Self {
            files: Arc::new(RwLock::new(files)),
        }
    }

    /// Another handle onto the same map
    pub fn share(&self) -> Self {
        Self {
            files: Arc::clone(&self.files),
        }
    }

    /// Whether both handles point at the same map
    pub fn is_shared_with(&self, other: &FileStore) -> bool {
        Arc::ptr_eq(&self.files, &other.files)
    }

    /// Number of live handles onto this map
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.files)
    }

    pub fn read(&self, path: &str) -> Option<FileData> {
        self.files.read().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.read().contains_key(path)
    }

    /// Write `content` to `path`, stamped with the current time under the lock.
    /// An existing file keeps its `created_at`.
    pub fn write(&self, path: impl Into<String>, content: Vec<String>) -> FileData {
        let mut files = self.files.write();
        let now = Utc::now();
        let path = path.into();
        match files.get_mut(&path) {
            Some(existing) => {
                existing.update(content, now);
                existing.clone()
            }
            None => {
                let created = FileData::at(content, now);
                files.insert(path, created.clone());
                created
            }
        }
    }

    /// Write a pre-stamped version of a file. Last write wins by `modified_at`:
    /// returns `false` and leaves the map untouched when the stored version is newer.
    pub fn write_at(&self, path: impl Into<String>, file: FileData) -> bool {
        let mut files = self.files.write();
        let path = path.into();
        match files.get(&path) {
            Some(existing) if existing.modified_at > file.modified_at => false,
            Some(existing) => {
                let created_at = existing.created_at.min(file.created_at);
                let modified_at = file.modified_at.max(created_at);
                files.insert(
                    path,
                    FileData {
                        content: file.content,
                        created_at,
                        modified_at,
                    },
                );
                true
            }
            None => {
                files.insert(path, file);
                true
            }
        }
    }

    pub fn remove(&self, path: &str) -> Option<FileData> {
        self.files.write().remove(path)
    }

    /// Sorted list of paths
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Point-in-time copy of the whole map
    pub fn snapshot(&self) -> HashMap<String, FileData> {
        self.files.read().clone()
    }

    /// Paths modified strictly after `since`
    pub fn modified_since(&self, since: DateTime<Utc>) -> Vec<String> {
        let mut paths: Vec<String> = self
            .files
            .read()
            .iter()
            .filter(|(_, f)| f.modified_at > since)
            .map(|(p, _)| p.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_shared_handles_see_each_others_writes() {
        let parent = FileStore::new();
        let child = parent.share();
        assert!(child.is_shared_with(&parent));
        assert_eq!(parent.handle_count(), 2);

        child.write("/out.md", vec!["hello".into()]);
        assert_eq!(parent.read("/out.md").unwrap().content, vec!["hello"]);
    }

    #[test]
    fn test_independent_store_is_not_shared() {
        let parent = FileStore::new();
        let other = FileStore::new();
        other.write("/x", vec![]);
        assert!(!other.is_shared_with(&parent));
        assert!(!parent.contains("/x"));
    }

    #[test]
    fn test_rewrite_keeps_created_at() {
        let store = FileStore::new();
        let first = store.write("/a", vec!["1".into()]);
        let second = store.write("/a", vec!["2".into()]);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.modified_at >= first.modified_at);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_write_at_is_last_write_wins() {
        let store = FileStore::new();
        let t0 = Utc::now();
        assert!(store.write_at("/a", FileData::at(vec!["new".into()], t0)));
        assert!(!store.write_at(
            "/a",
            FileData::at(vec!["stale".into()], t0 - Duration::seconds(1))
        ));
        assert_eq!(store.read("/a").unwrap().content, vec!["new"]);

        assert!(store.write_at(
            "/a",
            FileData::at(vec!["newer".into()], t0 + Duration::seconds(1))
        ));
        let file = store.read("/a").unwrap();
        assert_eq!(file.content, vec!["newer"]);
        assert_eq!(file.created_at, t0);
    }

    #[test]
    fn test_paths_and_modified_since() {
        let store = FileStore::new();
        let t0 = Utc::now();
        store.write_at("/b", FileData::at(vec![], t0));
        store.write_at("/a", FileData::at(vec![], t0 + Duration::seconds(2)));
        assert_eq!(store.paths(), vec!["/a", "/b"]);
        assert_eq!(store.modified_since(t0), vec!["/a"]);
        assert!(store.remove("/a").is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_writers_to_distinct_paths() {
        let store = FileStore::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let handle = store.share();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        handle.write(format!("/f{}", i), vec![j.to_string()]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 8);
        for i in 0..8 {
            assert_eq!(store.read(&format!("/f{}", i)).unwrap().content, vec!["49"]);
        }
    }
}
