//! Unordered sets of labels: inventory items, enemies, objects, location keys.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A set of unique string labels.
///
/// Every operation is total: adding a present label or removing an absent
/// one does nothing. Iteration order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringSet(HashSet<String>);

impl StringSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, item: impl Into<String>) {
        self.0.insert(item.into());
    }

    pub fn add_all<I, S>(&mut self, items: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.extend(items.into_iter().map(Into::into));
    }

    pub fn remove_all<I, S>(&mut self, items: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for item in items {
            self.0.remove(item.as_ref());
        }
    }

    pub fn contains(&self, item: &str) -> bool {
        self.0.contains(item)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Clear the set, then add `items`.
    pub fn replace_all<I, S>(&mut self, items: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clear();
        self.add_all(items);
    }

    /// The members as a vector.
    ///
    /// Sorted so prompts and displays are stable between runs; callers
    /// should still treat the order as meaningless.
    pub fn to_sequence(&self) -> Vec<String> {
        let mut items: Vec<String> = self.0.iter().cloned().collect();
        items.sort();
        items
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for StringSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        set.add_all(iter);
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_are_total() {
        let mut set = StringSet::new();
        set.add_all(["sword", "sword", "shield"]);
        assert_eq!(set.len(), 2);

        set.remove_all(["lantern"]);
        assert_eq!(set.len(), 2);

        set.remove_all(["sword"]);
        assert!(!set.contains("sword"));
        assert!(set.contains("shield"));
    }

    #[test]
    fn test_replace_all() {
        let mut set: StringSet = ["a", "b"].into_iter().collect();
        set.replace_all(["c"]);
        assert_eq!(set.to_sequence(), vec!["c".to_string()]);
    }

    #[test]
    fn test_serializes_as_plain_list() {
        let set: StringSet = ["Goblin"].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["Goblin"]"#);

        let back: StringSet = serde_json::from_str(r#"["Goblin","Goblin"]"#).unwrap();
        assert_eq!(back.len(), 1);
    }
}
