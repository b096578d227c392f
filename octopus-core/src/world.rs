//! The location graph.
//!
//! Locations are stored in a flat map keyed by their normalized name and
//! refer to each other only through those keys, so the persisted form is a
//! plain map with no cycles. The world only ever grows: locations are
//! created on first mention and never removed.

use crate::string_set::StringSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Normalize a location name into its map key.
///
/// Lowercases and joins whitespace-separated words with underscores, so
/// "Blue House", "blue house" and " Blue  House " all collide. Returns
/// `None` for a blank name.
pub fn normalize_key(name: &str) -> Option<String> {
    let key = name
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_");
    (!key.is_empty()).then_some(key)
}

/// Errors from constructing or restoring a world.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    #[error("location name must not be blank")]
    BlankName,

    #[error("current location '{0}' is not in the world")]
    MissingCurrent(String),

    #[error("previous location '{0}' is not in the world")]
    MissingPrevious(String),

    #[error("location '{name}' is stored under key '{key}'")]
    KeyMismatch { key: String, name: String },
}

// ============================================================================
// Locations
// ============================================================================

/// One place in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    /// Normalized keys of the locations reachable from here.
    #[serde(default)]
    pub adjacent: StringSet,
    #[serde(default)]
    pub interactive_items: StringSet,
    /// Things lying here that the player could pick up.
    #[serde(default)]
    pub removable_items: StringSet,
    #[serde(default)]
    pub enemies: StringSet,
    /// Seeded notes about this place. Reconciliation never writes these.
    #[serde(default)]
    pub story_threads: Vec<String>,
}

impl Location {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adjacent: StringSet::new(),
            interactive_items: StringSet::new(),
            removable_items: StringSet::new(),
            enemies: StringSet::new(),
            story_threads: Vec::new(),
        }
    }

    pub fn with_interactive_items<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        items: I,
    ) -> Self {
        self.interactive_items.add_all(items);
        self
    }

    pub fn with_removable_items<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        items: I,
    ) -> Self {
        self.removable_items.add_all(items);
        self
    }

    pub fn with_enemies<I: IntoIterator<Item = S>, S: Into<String>>(mut self, enemies: I) -> Self {
        self.enemies.add_all(enemies);
        self
    }

    pub fn with_story_threads<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        threads: I,
    ) -> Self {
        self.story_threads.extend(threads.into_iter().map(Into::into));
        self
    }

    /// The map key for this location. Empty only for a blank name.
    pub fn normalized_key(&self) -> String {
        normalize_key(&self.name).unwrap_or_default()
    }

    /// Record `other` as reachable from here.
    ///
    /// Only this side of the edge is written; `World` keeps both sides in
    /// step. Returns `false` for a blank name or a self-reference.
    pub fn add_adjacent(&mut self, other: &str) -> bool {
        match normalize_key(other) {
            Some(key) if key != self.normalized_key() => {
                self.adjacent.add(key);
                true
            }
            _ => false,
        }
    }

    pub fn is_adjacent_to(&self, other: &str) -> bool {
        normalize_key(other).is_some_and(|key| self.adjacent.contains(&key))
    }
}

// ============================================================================
// World
// ============================================================================

/// The location graph plus the player's position in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WorldRecord", into = "WorldRecord")]
pub struct World {
    locations: BTreeMap<String, Location>,
    current: String,
    previous: Option<String>,
}

impl World {
    /// Create a world containing only `start`, with the player standing there.
    pub fn starting_at(start: Location) -> Result<Self, WorldError> {
        let key = normalize_key(&start.name).ok_or(WorldError::BlankName)?;
        let mut locations = BTreeMap::new();
        locations.insert(key.clone(), start);
        Ok(Self {
            locations,
            current: key,
            previous: None,
        })
    }

    /// Insert a fully described location, replacing any location that
    /// shares its key, and link it both ways with its `adjacent` keys.
    ///
    /// Used for seeding; reconciliation goes through
    /// [`get_or_create_location`](Self::get_or_create_location).
    pub fn insert_location(&mut self, mut location: Location) -> Result<(), WorldError> {
        let key = normalize_key(&location.name).ok_or(WorldError::BlankName)?;
        location.adjacent.remove_all([key.as_str()]);
        let neighbours = location.adjacent.to_sequence();
        self.locations.insert(key.clone(), location);
        for neighbour in neighbours {
            self.get_or_create_location(&neighbour);
            self.link(&key, &neighbour);
        }
        Ok(())
    }

    /// Look up a location by name, creating an empty one if it is unknown.
    ///
    /// Returns `None`, and creates nothing, for a blank name.
    pub fn get_or_create_location(&mut self, name: &str) -> Option<&mut Location> {
        let key = normalize_key(name)?;
        Some(
            self.locations
                .entry(key)
                .or_insert_with(|| Location::new(name.trim())),
        )
    }

    /// Move the player to the named location, creating it if needed.
    ///
    /// Moving somewhere new links the two locations both ways and records
    /// where the player came from. Moving to the current location changes
    /// nothing. Returns `None` for a blank name.
    pub fn move_to(&mut self, name: &str) -> Option<&Location> {
        let key = normalize_key(name)?;
        self.get_or_create_location(name);

        if key != self.current {
            let from = std::mem::replace(&mut self.current, key);
            let to = self.current.clone();
            self.link(&from, &to);
            self.previous = Some(from);
        }

        Some(self.current_location())
    }

    /// Make the named location reachable from the current one, both ways.
    ///
    /// Creates the location if needed. Returns `false` for a blank name or
    /// the current location itself.
    pub fn link_adjacent(&mut self, name: &str) -> bool {
        let Some(key) = normalize_key(name) else {
            return false;
        };
        if key == self.current {
            return false;
        }
        self.get_or_create_location(name);
        let current = self.current.clone();
        self.link(&current, &key);
        true
    }

    fn link(&mut self, a: &str, b: &str) {
        if let Some(location) = self.locations.get_mut(a) {
            location.add_adjacent(b);
        }
        if let Some(location) = self.locations.get_mut(b) {
            location.add_adjacent(a);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Location> {
        normalize_key(name).and_then(|key| self.locations.get(&key))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Location> {
        let key = normalize_key(name)?;
        self.locations.get_mut(&key)
    }

    pub fn current_location(&self) -> &Location {
        // The constructor and deserializer both guarantee the key is present
        // and locations are never removed.
        &self.locations[&self.current]
    }

    pub fn current_location_mut(&mut self) -> &mut Location {
        let key = self.current.clone();
        self.locations.entry(key.clone()).or_insert_with(|| Location::new(key))
    }

    pub fn current_key(&self) -> &str {
        &self.current
    }

    pub fn previous_key(&self) -> Option<&str> {
        self.previous.as_deref()
    }

    pub fn previous_location(&self) -> Option<&Location> {
        self.previous.as_ref().and_then(|key| self.locations.get(key))
    }

    /// Display names of every known location, ordered by key.
    pub fn all_location_names(&self) -> Vec<String> {
        self.locations.values().map(|l| l.name.clone()).collect()
    }

    /// Display names of the locations adjacent to `location`.
    pub fn adjacent_names(&self, location: &Location) -> Vec<String> {
        location
            .adjacent
            .to_sequence()
            .into_iter()
            .map(|key| {
                self.locations
                    .get(&key)
                    .map(|l| l.name.clone())
                    .unwrap_or(key)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Render the graph as an indented depth-first tree rooted at the
    /// current location. Each location appears once.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        let mut visited = HashSet::new();
        self.render_node(&self.current, 0, &mut visited, &mut out);
        out
    }

    fn render_node<'a>(
        &'a self,
        key: &'a str,
        depth: usize,
        visited: &mut HashSet<&'a str>,
        out: &mut String,
    ) {
        let Some(location) = self.locations.get(key) else {
            return;
        };
        if !visited.insert(key) {
            return;
        }

        out.push_str(&"  ".repeat(depth));
        out.push_str(&location.name);
        out.push('\n');

        for neighbour in location.adjacent.iter().collect::<std::collections::BTreeSet<_>>() {
            self.render_node(neighbour, depth + 1, visited, out);
        }
    }
}

/// Persisted shape of a [`World`], validated on the way back in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorldRecord {
    locations: BTreeMap<String, Location>,
    current_location: String,
    #[serde(default)]
    previous_location: Option<String>,
}

impl TryFrom<WorldRecord> for World {
    type Error = WorldError;

    fn try_from(record: WorldRecord) -> Result<Self, Self::Error> {
        let mut locations = record.locations;

        for (key, location) in locations.iter_mut() {
            if normalize_key(&location.name).as_deref() != Some(key.as_str()) {
                return Err(WorldError::KeyMismatch {
                    key: key.clone(),
                    name: location.name.clone(),
                });
            }
            location.adjacent.remove_all([key.as_str()]);
        }

        if !locations.contains_key(&record.current_location) {
            return Err(WorldError::MissingCurrent(record.current_location));
        }
        if let Some(previous) = &record.previous_location {
            if !locations.contains_key(previous) {
                return Err(WorldError::MissingPrevious(previous.clone()));
            }
        }

        Ok(Self {
            locations,
            current: record.current_location,
            previous: record.previous_location,
        })
    }
}

impl From<World> for WorldRecord {
    fn from(world: World) -> Self {
        Self {
            locations: world.locations,
            current_location: world.current,
            previous_location: world.previous,
        }
    }
}
