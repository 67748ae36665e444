//! Per-key outcome maps for batch operations.
//!
//! Publishing and handling both work on batches keyed by a caller-chosen
//! string. The outcome of such a batch is a [`BatchErrors`]: a key is present
//! only when its item failed, so "present" always carries an error and
//! "absent" always means success.

use std::collections::hash_map::{self, HashMap};

/// Errors of a batch operation, keyed by the caller's correlation key.
#[derive(Debug, Clone)]
pub struct BatchErrors<E> {
    errors: HashMap<String, E>,
}

impl<E> BatchErrors<E> {
    /// Creates an empty result, i.e. every item succeeded.
    pub fn new() -> Self {
        Self {
            errors: HashMap::new(),
        }
    }

    /// Records the failure of `key`, replacing any earlier failure.
    pub fn insert(&mut self, key: impl Into<String>, error: E) -> Option<E> {
        self.errors.insert(key.into(), error)
    }

    /// Error recorded for `key`.
    pub fn get(&self, key: &str) -> Option<&E> {
        self.errors.get(key)
    }

    /// True when `key` failed.
    pub fn contains(&self, key: &str) -> bool {
        self.errors.contains_key(key)
    }

    /// True when `key` has no recorded failure.
    pub fn is_success(&self, key: &str) -> bool {
        !self.contains(key)
    }

    /// Number of failed items.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when no item failed.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterates over failed keys and their errors.
    pub fn iter(&self) -> hash_map::Iter<'_, String, E> {
        self.errors.iter()
    }

    /// Iterates over failed keys.
    pub fn keys(&self) -> hash_map::Keys<'_, String, E> {
        self.errors.keys()
    }

    /// Consumes the result, returning the underlying map.
    pub fn into_inner(self) -> HashMap<String, E> {
        self.errors
    }
}

impl<E> Default for BatchErrors<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, K: Into<String>> FromIterator<(K, E)> for BatchErrors<E> {
    fn from_iter<I: IntoIterator<Item = (K, E)>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().map(|(k, e)| (k.into(), e)).collect(),
        }
    }
}

impl<E> IntoIterator for BatchErrors<E> {
    type Item = (String, E);
    type IntoIter = hash_map::IntoIter<String, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<'a, E> IntoIterator for &'a BatchErrors<E> {
    type Item = (&'a String, &'a E);
    type IntoIter = hash_map::Iter<'a, String, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

impl<E> From<HashMap<String, E>> for BatchErrors<E> {
    fn from(errors: HashMap<String, E>) -> Self {
        Self { errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_key_means_success() {
        let mut errors: BatchErrors<&str> = BatchErrors::new();
        errors.insert("b", "boom");

        assert!(errors.is_success("a"));
        assert!(!errors.is_success("b"));
        assert_eq!(errors.get("b"), Some(&"boom"));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn collects_from_pairs() {
        let errors: BatchErrors<u8> = vec![("x", 1), ("y", 2)].into_iter().collect();
        let mut keys: Vec<_> = errors.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["x", "y"]);
    }

    #[test]
    fn empty_result_reports_no_failures() {
        let errors: BatchErrors<String> = BatchErrors::default();
        assert!(errors.is_empty());
        assert_eq!(errors.into_inner().len(), 0);
    }
}
