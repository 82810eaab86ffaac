use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Most-recent-first list of book files, bounded by a capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentFiles {
    capacity: usize,
    entries: VecDeque<PathBuf>,
}

impl RecentFiles {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Restores a persisted list, dropping duplicates and the oldest
    /// entries beyond `capacity`.
    pub fn with_entries(capacity: usize, entries: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut recent = Self::new(capacity);
        for path in entries {
            if !recent.contains(&path) && recent.entries.len() < recent.capacity {
                recent.entries.push_back(path);
            }
        }
        recent
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.entries.truncate(self.capacity);
    }

    /// Moves `path` to the front, inserting it if needed.
    pub fn add(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.entries.retain(|existing| existing != &path);
        self.entries.push_front(path);
        self.entries.truncate(self.capacity);
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        let before = self.entries.len();
        self.entries.retain(|existing| existing.as_path() != path);
        before != self.entries.len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|existing| existing.as_path() == path)
    }

    pub fn most_recent(&self) -> Option<&Path> {
        self.entries.front().map(PathBuf::as_path)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn to_vec(&self) -> Vec<PathBuf> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(recent: &RecentFiles) -> Vec<&str> {
        recent.iter().map(|p| p.to_str().unwrap()).collect()
    }

    #[test]
    fn add_promotes_and_evicts_oldest() {
        let mut recent = RecentFiles::new(3);
        recent.add("a.ebk");
        recent.add("b.ebk");
        recent.add("c.ebk");
        recent.add("b.ebk");
        assert_eq!(names(&recent), ["b.ebk", "c.ebk", "a.ebk"]);

        recent.add("d.ebk");
        assert_eq!(names(&recent), ["d.ebk", "b.ebk", "c.ebk"]);
        assert_eq!(recent.most_recent(), Some(Path::new("d.ebk")));
    }

    #[test]
    fn shrinking_capacity_trims_the_tail() {
        let mut recent = RecentFiles::new(5);
        for name in ["a", "b", "c", "d"] {
            recent.add(format!("{name}.ebk"));
        }
        recent.set_capacity(0);
        assert_eq!(recent.capacity(), 1);
        assert_eq!(names(&recent), ["d.ebk"]);
    }

    #[test]
    fn remove_contains_and_clear() {
        let mut recent = RecentFiles::new(3);
        recent.add("x");
        recent.add("y");
        assert!(recent.contains(Path::new("x")));
        assert!(recent.remove(Path::new("x")));
        assert!(!recent.remove(Path::new("missing")));
        assert_eq!(recent.len(), 1);
        recent.clear();
        assert!(recent.is_empty());
        assert_eq!(recent.most_recent(), None);
    }

    #[test]
    fn with_entries_skips_duplicates() {
        let paths = ["a", "b", "a", "c"].into_iter().map(PathBuf::from);
        let recent = RecentFiles::with_entries(2, paths);
        assert_eq!(names(&recent), ["a", "b"]);
        assert_eq!(recent.to_vec(), vec![PathBuf::from("a"), PathBuf::from("b")]);
    }
}
