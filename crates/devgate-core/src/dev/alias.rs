//! Import alias resolution (`@/components/App.vue` → `<root>/src/components/App.vue`).

use serde::Serialize;
use std::path::PathBuf;

/// A single alias entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alias {
    /// The specifier prefix to replace (e.g., `@`).
    pub find: String,
    /// Absolute path substituted for `find`.
    pub replacement: PathBuf,
}

/// Ordered alias table. The first matching entry wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AliasMap {
    entries: Vec<Alias>,
}

impl AliasMap {
    /// Create an empty alias table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an alias. Re-inserting an existing `find` replaces it in place.
    pub fn insert(&mut self, find: impl Into<String>, replacement: impl Into<PathBuf>) {
        let find = find.into();
        let replacement = replacement.into();
        if let Some(existing) = self.entries.iter_mut().find(|a| a.find == find) {
            existing.replacement = replacement;
        } else {
            self.entries.push(Alias { find, replacement });
        }
    }

    /// Builder form of [`AliasMap::insert`].
    pub fn alias(mut self, find: impl Into<String>, replacement: impl Into<PathBuf>) -> Self {
        self.insert(find, replacement);
        self
    }

    /// Resolve an import specifier through the alias table.
    ///
    /// Matches when the specifier equals `find` or starts with `find/`.
    /// Returns `None` when no alias applies.
    #[must_use]
    pub fn resolve(&self, specifier: &str) -> Option<PathBuf> {
        for alias in &self.entries {
            if specifier == alias.find {
                return Some(alias.replacement.clone());
            }
            if let Some(rest) = specifier.strip_prefix(alias.find.as_str()) {
                if let Some(rest) = rest.strip_prefix('/') {
                    let mut path = alias.replacement.clone();
                    path.extend(rest.split('/').filter(|s| !s.is_empty()));
                    return Some(path);
                }
            }
        }
        None
    }

    /// Iterate over entries in match order.
    pub fn iter(&self) -> impl Iterator<Item = &Alias> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
