//! The player character.

use crate::string_set::StringSet;
use serde::{Deserialize, Serialize};

/// The player: a name and what they carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    #[serde(default)]
    pub inventory: StringSet,
}

impl Player {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inventory: StringSet::new(),
        }
    }

    pub fn with_inventory<I: IntoIterator<Item = S>, S: Into<String>>(mut self, items: I) -> Self {
        self.inventory.add_all(items);
        self
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new("Adventurer")
    }
}
