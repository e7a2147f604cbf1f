use std::path::{Path, PathBuf};

use common::{file_stem, folder_segments};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::debug;

use crate::cache::LruCache;

static YEAR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").unwrap());

/// What the folder layout says about a file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathClassification {
    pub main_category: Option<String>,
    pub genre: Option<String>,
    /// Third segment on its own.
    pub series: Option<String>,
    /// Third and deeper segments joined with the path separator.
    pub sub_genre: Option<String>,
    pub title: Option<String>,
    pub year: Option<String>,
    pub hierarchy_depth: usize,
}

pub fn classify_path(root: &Path, path: &Path) -> PathClassification {
    let folders = folder_segments(root, path);
    let mut out = PathClassification {
        hierarchy_depth: folders.len(),
        ..PathClassification::default()
    };

    let title = file_stem(path);
    if !title.is_empty() {
        out.title = Some(title);
    }

    out.main_category = folders.first().cloned();
    out.genre = folders.get(1).cloned();
    out.series = folders.get(2).cloned();
    if folders.len() > 2 {
        let separator = std::path::MAIN_SEPARATOR.to_string();
        out.sub_genre = Some(folders[2..].join(separator.as_str()));
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    out.year = folders
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(file_name.as_str()))
        .find_map(|segment| YEAR_PATTERN.find(segment).map(|m| m.as_str().to_string()));

    out
}

/// Memoizing front for [`classify_path`] bound to one scan root.
pub struct PathClassifier {
    root: Mutex<PathBuf>,
    cache: Mutex<LruCache<PathBuf, PathClassification>>,
}

impl PathClassifier {
    pub fn new(root: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            root: Mutex::new(root.into()),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Switches the root; cached results are dropped when it changes.
    pub fn set_root(&self, root: &Path) {
        let mut current = self.root.lock();
        if current.as_path() != root {
            debug!("Classifier root changed to {:?}; clearing cache", root);
            *current = root.to_path_buf();
            self.cache.lock().clear();
        }
    }

    pub fn classify(&self, path: &Path) -> PathClassification {
        if let Some(hit) = self.cache.lock().get(path) {
            return hit;
        }
        let root = self.root.lock().clone();
        let result = classify_path(&root, path);
        self.cache.lock().insert(path.to_path_buf(), result.clone());
        result
    }

    #[cfg(test)]
    fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}
