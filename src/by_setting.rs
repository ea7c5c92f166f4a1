//! Compact maps keyed by setting name
//!
//! [`ListBySetting`] stores its values in one contiguous buffer, stably
//! sorted by setting name so that equal keys form adjacent runs, with a hash
//! index from name to run offset. Lookup is O(1), iterating one setting's
//! values is O(run length), and enumeration order is lexicographic by name
//! with insertion order preserved inside a run. [`BySetting`] is the
//! single-value variant where a duplicate name is a construction error.
//!
//! Both serialize as plain objects: name to value, or name to array of
//! values.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

/// A value addressable by setting name.
pub trait BySettingItem {
    /// The dotted setting name this value belongs to.
    fn setting_name(&self) -> &str;

    /// Restore the name on a value deserialized from the keyed wire form.
    fn set_setting_name(&mut self, name: &str);
}

#[derive(Clone, Copy, Debug)]
struct Run {
    start: usize,
    len: usize,
}

/// Multi-map from setting name to a non-empty run of values.
#[derive(Clone, Debug)]
pub struct ListBySetting<V> {
    entries: Vec<V>,
    index: HashMap<String, Run>,
}

impl<V: BySettingItem> ListBySetting<V> {
    /// Build from an arbitrarily-ordered list of values.
    ///
    /// Duplicate names are allowed; their relative order is preserved.
    #[must_use]
    pub fn new(mut items: Vec<V>) -> Self {
        // Stable sort: insertion order survives within each run.
        items.sort_by(|a, b| a.setting_name().cmp(b.setting_name()));

        let mut index = HashMap::new();
        let mut start = 0;
        while start < items.len() {
            let name = items[start].setting_name();
            let mut end = start + 1;
            while end < items.len() && items[end].setting_name() == name {
                end += 1;
            }
            index.insert(
                name.to_string(),
                Run {
                    start,
                    len: end - start,
                },
            );
            start = end;
        }

        Self {
            entries: items,
            index,
        }
    }

    /// The empty map.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Total number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct setting names.
    #[must_use]
    pub fn setting_count(&self) -> usize {
        self.index.len()
    }

    /// All values for `name`, in insertion order; empty when absent.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[V] {
        match self.index.get(name) {
            Some(run) => &self.entries[run.start..run.start + run.len],
            None => &[],
        }
    }

    /// Whether any value exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All values, lexicographic by name, insertion order within a name.
    pub fn iter(&self) -> std::slice::Iter<'_, V> {
        self.entries.iter()
    }

    /// Runs of values grouped by name, lexicographic by name.
    pub fn iter_runs(&self) -> impl Iterator<Item = (&str, &[V])> {
        RunIter {
            entries: &self.entries,
            pos: 0,
        }
    }
}

struct RunIter<'a, V> {
    entries: &'a [V],
    pos: usize,
}

impl<'a, V: BySettingItem> Iterator for RunIter<'a, V> {
    type Item = (&'a str, &'a [V]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.entries.len() {
            return None;
        }
        let start = self.pos;
        let name = self.entries[start].setting_name();
        let mut end = start + 1;
        while end < self.entries.len() && self.entries[end].setting_name() == name {
            end += 1;
        }
        self.pos = end;
        Some((name, &self.entries[start..end]))
    }
}

impl<V: BySettingItem> Default for ListBySetting<V> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a, V: BySettingItem> IntoIterator for &'a ListBySetting<V> {
    type Item = &'a V;
    type IntoIter = std::slice::Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<V: BySettingItem + Serialize> Serialize for ListBySetting<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.setting_count()))?;
        for (name, run) in self.iter_runs() {
            map.serialize_entry(name, run)?;
        }
        map.end()
    }
}

impl<'de, V: BySettingItem + DeserializeOwned> Deserialize<'de> for ListBySetting<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw: HashMap<String, Vec<V>> = HashMap::deserialize(deserializer)?;
        let mut items = Vec::new();
        for (name, values) in raw {
            for mut value in values {
                value.set_setting_name(&name);
                items.push(value);
            }
        }
        Ok(Self::new(items))
    }
}

/// Map from setting name to exactly one value.
#[derive(Clone, Debug)]
pub struct BySetting<V> {
    inner: ListBySetting<V>,
}

impl<V: BySettingItem> BySetting<V> {
    /// Build from a list of uniquely-named values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateSetting`] when two values share a name.
    pub fn new(items: Vec<V>) -> Result<Self> {
        let inner = ListBySetting::new(items);
        for (name, run) in inner.iter_runs() {
            if run.len() > 1 {
                return Err(Error::DuplicateSetting(name.to_string()));
            }
        }
        Ok(Self { inner })
    }

    /// The empty map.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: ListBySetting::empty(),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The value for `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&V> {
        self.inner.get_all(name).first()
    }

    /// Whether an entry exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains(name)
    }

    /// All values, lexicographic by name.
    pub fn iter(&self) -> std::slice::Iter<'_, V> {
        self.inner.iter()
    }
}

impl<'a, V: BySettingItem> IntoIterator for &'a BySetting<V> {
    type Item = &'a V;
    type IntoIter = std::slice::Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<V: BySettingItem + Serialize> Serialize for BySetting<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for value in self.iter() {
            map.serialize_entry(value.setting_name(), value)?;
        }
        map.end()
    }
}

impl<'de, V: BySettingItem + DeserializeOwned> Deserialize<'de> for BySetting<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw: HashMap<String, V> = HashMap::deserialize(deserializer)?;
        let mut items = Vec::with_capacity(raw.len());
        for (name, mut value) in raw {
            value.set_setting_name(&name);
            items.push(value);
        }
        Self::new(items).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
