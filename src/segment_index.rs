use crate::error::{Result, ShowError};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// FIFO backlog of segment folders discovered under a base path.
#[derive(Debug, Default)]
pub struct SegmentDirectoryIndex {
    base_path: Option<PathBuf>,
    pending: VecDeque<PathBuf>,
    sort: bool,
}

impl SegmentDirectoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort discovered folders by name instead of keeping listing order.
    pub fn sorted() -> Self {
        SegmentDirectoryIndex {
            sort: true,
            ..Self::default()
        }
    }

    /// Replace the backlog with the immediate subdirectories of `path`.
    /// On failure the backlog is left empty. Returns how many were queued.
    pub fn set_base_path(&mut self, path: &Path) -> Result<usize> {
        self.pending.clear();
        self.base_path = None;

        if !path.exists() {
            return Err(ShowError::invalid_path(path, "does not exist"));
        }
        if !path.is_dir() {
            return Err(ShowError::invalid_path(path, "not a directory"));
        }

        let entries = fs::read_dir(path).map_err(|e| ShowError::invalid_path(path, e))?;
        let mut folders = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ShowError::invalid_path(path, e))?;
            let child = entry.path();
            if child.is_dir() {
                folders.push(child);
            }
        }
        if self.sort {
            folders.sort();
        }

        info!("base path set to {} ({} folders)", path.display(), folders.len());
        self.pending.extend(folders);
        self.base_path = Some(path.to_path_buf());
        Ok(self.pending.len())
    }

    /// Remove and return the next folder, or `None` when the show has run out.
    pub fn dequeue_next(&mut self) -> Option<PathBuf> {
        self.pending.pop_front()
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Path> {
        self.pending.iter().map(PathBuf::as_path)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending folder without touching the base path.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for n in names {
            fs::create_dir(dir.path().join(n)).unwrap();
        }
        dir
    }

    #[test]
    fn queues_every_subdirectory_and_drains_to_empty() {
        let dir = tree(&["a", "b", "c"]);
        fs::write(dir.path().join("notes.txt"), "not a segment").unwrap();

        let mut index = SegmentDirectoryIndex::new();
        assert_eq!(index.set_base_path(dir.path()).unwrap(), 3);
        for _ in 0..3 {
            assert!(index.dequeue_next().is_some());
        }
        assert!(index.dequeue_next().is_none());
    }

    #[test]
    fn sorted_index_is_lexical() {
        let dir = tree(&["c_third", "a_first", "b_second"]);
        let mut index = SegmentDirectoryIndex::sorted();
        index.set_base_path(dir.path()).unwrap();
        let names: Vec<String> = index
            .pending()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a_first", "b_second", "c_third"]);
    }

    #[test]
    fn second_call_replaces_rather_than_merges() {
        let first = tree(&["a", "b"]);
        let second = tree(&["x"]);
        let mut index = SegmentDirectoryIndex::new();
        index.set_base_path(first.path()).unwrap();
        index.set_base_path(second.path()).unwrap();
        assert_eq!(index.pending_count(), 1);
        assert!(index.dequeue_next().unwrap().ends_with("x"));
    }

    #[test]
    fn invalid_base_path_empties_queue() {
        let dir = tree(&["a"]);
        let mut index = SegmentDirectoryIndex::new();
        index.set_base_path(dir.path()).unwrap();

        let err = index.set_base_path(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, ShowError::InvalidPath { .. }));
        assert_eq!(index.pending_count(), 0);
        assert!(index.base_path().is_none());
    }

    #[test]
    fn file_as_base_path_is_rejected() {
        let dir = tree(&[]);
        let file = dir.path().join("show.txt");
        fs::write(&file, "x").unwrap();
        let mut index = SegmentDirectoryIndex::new();
        assert!(index.set_base_path(&file).is_err());
    }
}
