use std::collections::HashMap;

use switchyard_types::path::{PATH_DELIMITER, RESOURCE_DELIMITER, index_path};

/// Tracks the current iteration index of every repeated path visited by one codec walk.
///
/// Template paths never carry indices; `resolve` rewrites them into absolute store keys by inserting the tracked
/// index after every tracked prefix.
///
/// ## Usage
///
/// ```
/// use switchyard_store::Tracker;
///
/// let mut tracker = Tracker::new();
/// tracker.track("input:items", 1);
/// assert_eq!(tracker.resolve("input:items.tags"), "input:items[1].tags");
/// ```
#[derive(Debug, Default, Clone)]
pub struct Tracker {
    indices: HashMap<String, usize>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current index for `path`.
    pub fn track(&mut self, path: impl Into<String>, index: usize) {
        self.indices.insert(path.into(), index);
    }

    pub fn index(&self, path: &str) -> Option<usize> {
        self.indices.get(path).copied()
    }

    /// Advance the index for `path` and return the new value. Untracked paths start at 0.
    pub fn next(&mut self, path: &str) -> usize {
        let index = self.indices.entry(path.to_string()).or_insert(0);
        *index += 1;
        *index
    }

    /// Rewrite `path` by inserting `[index]` after every prefix that is currently tracked.
    ///
    /// Prefixes are resolved left to right, so indices of outer arrays are already part of the key when inner
    /// prefixes are looked up.
    pub fn resolve(&self, path: &str) -> String {
        if self.indices.is_empty() {
            return path.to_string();
        }

        let mut resolved = String::with_capacity(path.len() + 8);
        let rest = match path.split_once(RESOURCE_DELIMITER) {
            Some((resource, rest)) => {
                resolved.push_str(resource);
                resolved.push(RESOURCE_DELIMITER);
                self.append_index(&mut resolved);
                rest
            }
            None => path,
        };

        for segment in rest.split(PATH_DELIMITER).filter(|segment| !segment.is_empty()) {
            if !resolved.is_empty() && !resolved.ends_with(RESOURCE_DELIMITER) {
                resolved.push(PATH_DELIMITER);
            }
            resolved.push_str(segment);
            self.append_index(&mut resolved);
        }
        resolved
    }

    fn append_index(&self, resolved: &mut String) {
        if let Some(index) = self.indices.get(resolved.as_str()) {
            *resolved = index_path(resolved, *index);
        }
    }
}
