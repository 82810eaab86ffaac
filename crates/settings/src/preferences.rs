use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::recent::RecentFiles;

const PREFERENCES_VERSION: u32 = 1;
const DEFAULT_RECENT_CAPACITY: usize = 10;
const MAX_RECENT_CAPACITY: usize = 50;

#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("failed to read preferences {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse preferences {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize preferences {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write preferences {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub book: BookPreferences,
    #[serde(default)]
    pub search: SearchPreferences,
    #[serde(default)]
    pub recent_files: Vec<PathBuf>,
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
}

fn default_version() -> u32 {
    PREFERENCES_VERSION
}

fn default_recent_capacity() -> usize {
    DEFAULT_RECENT_CAPACITY
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version: PREFERENCES_VERSION,
            book: BookPreferences::default(),
            search: SearchPreferences::default(),
            recent_files: Vec::new(),
            recent_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }
}

impl Preferences {
    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = PREFERENCES_VERSION;
        }
        self.book.sanitize();
        self.recent_capacity = self.recent_capacity.clamp(1, MAX_RECENT_CAPACITY);
        self.recent_files = self.recent().to_vec();
    }

    pub fn recent(&self) -> RecentFiles {
        RecentFiles::with_entries(self.recent_capacity, self.recent_files.iter().cloned())
    }

    /// Records `path` as the most recently used book.
    pub fn remember(&mut self, path: impl Into<PathBuf>) {
        let mut recent = self.recent();
        recent.add(path);
        self.recent_files = recent.to_vec();
    }
}

/// Labels and file format used for new books.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookPreferences {
    #[serde(default = "default_root_label")]
    pub root_label: String,
    #[serde(default = "default_chapter_label")]
    pub new_chapter_label: String,
    #[serde(default = "default_page_label")]
    pub new_page_label: String,
    /// Write new books without the version header.
    #[serde(default)]
    pub write_legacy_format: bool,
}

fn default_root_label() -> String {
    "My Book".to_string()
}

fn default_chapter_label() -> String {
    "New Chapter".to_string()
}

fn default_page_label() -> String {
    "New Page".to_string()
}

impl Default for BookPreferences {
    fn default() -> Self {
        Self {
            root_label: default_root_label(),
            new_chapter_label: default_chapter_label(),
            new_page_label: default_page_label(),
            write_legacy_format: false,
        }
    }
}

impl BookPreferences {
    fn sanitize(&mut self) {
        if self.root_label.trim().is_empty() {
            self.root_label = default_root_label();
        }
        if self.new_chapter_label.trim().is_empty() {
            self.new_chapter_label = default_chapter_label();
        }
        if self.new_page_label.trim().is_empty() {
            self.new_page_label = default_page_label();
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPreferences {
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub whole_word: bool,
}

#[derive(Debug)]
pub struct PreferencesStore {
    path: PathBuf,
    data: Preferences,
}

impl PreferencesStore {
    pub fn new(path: impl Into<PathBuf>, preferences: Preferences) -> Self {
        Self {
            path: path.into(),
            data: preferences,
        }
    }

    /// Reads the file at `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreferencesError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            log::debug!("no preferences at {}, using defaults", path.display());
            let mut data = Preferences::default();
            data.sanitize();
            return Ok(Self { path, data });
        }

        let contents = fs::read_to_string(&path).map_err(|source| PreferencesError::Read {
            path: path.clone(),
            source,
        })?;
        let mut data: Preferences =
            serde_json::from_str(&contents).map_err(|source| PreferencesError::Parse {
                path: path.clone(),
                source,
            })?;
        data.sanitize();
        Ok(Self { path, data })
    }

    pub fn preferences(&self) -> &Preferences {
        &self.data
    }

    pub fn preferences_mut(&mut self) -> &mut Preferences {
        &mut self.data
    }

    /// Applies `op`, sanitises and writes the result.
    pub fn update<F>(&mut self, mut op: F) -> Result<(), PreferencesError>
    where
        F: FnMut(&mut Preferences),
    {
        op(&mut self.data);
        self.data.sanitize();
        self.save()
    }

    pub fn save(&self) -> Result<(), PreferencesError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| PreferencesError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload = serde_json::to_string_pretty(&self.data).map_err(|source| {
            PreferencesError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload.as_bytes()).map_err(|source| PreferencesError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| PreferencesError::Write {
            path: self.path.clone(),
            source,
        })?;
        log::debug!("saved preferences to {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_restores_blank_labels_and_bounds_history() {
        let mut prefs = Preferences {
            version: 0,
            recent_capacity: 0,
            recent_files: vec!["a.ebk".into(), "b.ebk".into(), "a.ebk".into()],
            ..Preferences::default()
        };
        prefs.book.root_label = "  ".into();
        prefs.sanitize();
        assert_eq!(prefs.version, PREFERENCES_VERSION);
        assert_eq!(prefs.book.root_label, "My Book");
        assert_eq!(prefs.recent_capacity, 1);
        assert_eq!(prefs.recent_files, vec![PathBuf::from("a.ebk")]);
    }

    #[test]
    fn remember_promotes_paths() {
        let mut prefs = Preferences::default();
        prefs.remember("one.ebk");
        prefs.remember("two.ebk");
        prefs.remember("one.ebk");
        assert_eq!(
            prefs.recent_files,
            vec![PathBuf::from("one.ebk"), PathBuf::from("two.ebk")]
        );
    }
}
