//! State reconciliation.
//!
//! After each narration the collaborator is asked for a [`StateDelta`]
//! describing what the prose changed. Applying a delta is an idempotent
//! merge: set fields are additive or subtractive, never "replace", so an
//! empty or repeated delta changes nothing. The one exception is
//! `story_threads`, which arrives in full and replaces the log.

use crate::llm::{parse_structured, GenerationError, ResponseMode, TextGenerator};
use crate::prompts;
use crate::session::GameSession;
use crate::string_set::StringSet;
use crate::world::normalize_key;
use crate::StructuredOutput;
use serde::{Deserialize, Deserializer};

/// Labels gained and lost this turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, StructuredOutput)]
pub struct SetChanges {
    /// Labels that appeared
    #[structured(optional)]
    #[serde(default, deserialize_with = "nullable")]
    pub added: Vec<String>,
    /// Labels that are gone
    #[structured(optional)]
    #[serde(default, deserialize_with = "nullable")]
    pub removed: Vec<String>,
}

impl SetChanges {
    /// Union `added`, then subtract `removed`. Blank labels are ignored.
    pub fn apply_to(&self, set: &mut StringSet) {
        set.add_all(
            self.added
                .iter()
                .map(|label| label.trim())
                .filter(|label| !label.is_empty()),
        );
        set.remove_all(self.removed.iter().map(|label| label.trim()));
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Enemies that appeared or were dealt with this turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, StructuredOutput)]
pub struct EnemyChanges {
    /// Enemies that appeared in the current location
    #[structured(optional)]
    #[serde(default, deserialize_with = "nullable")]
    pub added: Vec<String>,
    /// Enemies that were defeated or left
    #[structured(optional)]
    #[serde(default, deserialize_with = "nullable")]
    pub defeated: Vec<String>,
}

impl EnemyChanges {
    fn as_set_changes(&self) -> SetChanges {
        SetChanges {
            added: self.added.clone(),
            removed: self.defeated.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.defeated.is_empty()
    }
}

/// Changes to the game state implied by the latest narration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, StructuredOutput)]
#[structured(name = "record_state_delta")]
pub struct StateDelta {
    /// Name of the location the player is in after the narration
    #[serde(default)]
    pub current_location: Option<String>,
    /// Locations newly reachable from the player's location
    #[structured(optional)]
    #[serde(default, deserialize_with = "nullable")]
    pub adjacent_locations_added: Vec<String>,
    #[structured(optional)]
    #[serde(default, deserialize_with = "nullable")]
    pub inventory_updates: SetChanges,
    #[structured(optional)]
    #[serde(default, deserialize_with = "nullable")]
    pub interactive_objects_updates: SetChanges,
    #[structured(optional)]
    #[serde(default, deserialize_with = "nullable")]
    pub removable_items_updates: SetChanges,
    #[structured(optional)]
    #[serde(default, deserialize_with = "nullable")]
    pub enemies_updates: EnemyChanges,
    /// Complete list of active story threads, if they changed
    #[serde(default)]
    pub story_threads: Option<Vec<String>>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl StateDelta {
    /// Merge this delta into `session`.
    ///
    /// Moves first, so adjacency and per-location changes land on the
    /// location the player ends up in.
    pub fn apply(&self, session: &mut GameSession) {
        let world = &mut session.world;

        if let Some(name) = self.current_location.as_deref() {
            if normalize_key(name).is_some_and(|key| key != world.current_key()) {
                world.move_to(name);
            }
        }

        for name in &self.adjacent_locations_added {
            world.link_adjacent(name);
        }

        let here = world.current_location_mut();
        self.interactive_objects_updates
            .apply_to(&mut here.interactive_items);
        self.removable_items_updates
            .apply_to(&mut here.removable_items);
        self.enemies_updates
            .as_set_changes()
            .apply_to(&mut here.enemies);

        self.inventory_updates
            .apply_to(&mut session.player.inventory);

        if let Some(threads) = &self.story_threads {
            session.story_threads = threads.clone();
        }
    }

    /// Whether applying this delta could change anything.
    pub fn is_empty(&self) -> bool {
        self.current_location
            .as_deref()
            .map_or(true, |name| name.trim().is_empty())
            && self.adjacent_locations_added.is_empty()
            && self.inventory_updates.is_empty()
            && self.interactive_objects_updates.is_empty()
            && self.removable_items_updates.is_empty()
            && self.enemies_updates.is_empty()
            && self.story_threads.is_none()
    }
}

/// A parsed delta and what it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub delta: StateDelta,
    pub tokens_used: u64,
}

/// Ask the collaborator what the latest narration changed.
///
/// `session` should already contain the exchange being reconciled.
pub async fn request_delta(
    generator: &dyn TextGenerator,
    session: &GameSession,
    window: usize,
) -> Result<Reconciliation, GenerationError> {
    let messages = prompts::reconcile_messages(session, window);
    let completion = generator
        .send(&messages, &ResponseMode::json::<StateDelta>())
        .await?;

    let delta: StateDelta = parse_structured(&completion)?;
    tracing::debug!(?delta, "received state delta");

    Ok(Reconciliation {
        delta,
        tokens_used: completion.tokens_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StructuredOutput as _;
    use crate::session::NewGame;
    use crate::world::Location;

    fn session_at(name: &str) -> GameSession {
        NewGame::new(Location::new(name)).build().unwrap()
    }

    fn delta(json: &str) -> StateDelta {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_schema_shape() {
        let schema = StateDelta::json_schema();
        assert_eq!(StateDelta::schema_name(), "record_state_delta");
        assert_eq!(schema["required"], serde_json::json!([]));
        assert_eq!(
            schema["properties"]["enemies_updates"]["properties"]["defeated"]["type"],
            "array"
        );
    }

    #[test]
    fn test_nulls_and_missing_fields_are_empty() {
        let parsed = delta(r#"{"inventory_updates": null, "adjacent_locations_added": null}"#);
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_inventory_add_and_remove() {
        let mut session = session_at("Armory");
        session.player.inventory.add("sword");

        let change = delta(r#"{"inventory_updates": {"added": ["shield"], "removed": ["sword"]}}"#);
        change.apply(&mut session);
        assert_eq!(session.player.inventory.to_sequence(), vec!["shield"]);

        let empty = StateDelta::default();
        empty.apply(&mut session);
        empty.apply(&mut session);
        assert_eq!(session.player.inventory.to_sequence(), vec!["shield"]);
    }

    #[test]
    fn test_apply_twice_is_idempotent() {
        let mut session = session_at("Blue House");
        let change = delta(
            r#"{
                "current_location": "Eastern Road",
                "adjacent_locations_added": ["Cave"],
                "enemies_updates": {"added": ["Goblin"]},
                "removable_items_updates": {"added": ["rock"]},
                "story_threads": ["A goblin blocks the road."]
            }"#,
        );

        change.apply(&mut session);
        let once = session.clone();
        change.apply(&mut session);
        assert_eq!(session, once);
    }

    #[test]
    fn test_move_then_link() {
        let mut session = session_at("Blue House");
        delta(
            r#"{
                "current_location": "Eastern Road",
                "adjacent_locations_added": ["Cave"],
                "enemies_updates": {"added": ["Goblin"]}
            }"#,
        )
        .apply(&mut session);

        let world = &session.world;
        assert_eq!(world.current_location().name, "Eastern Road");
        assert!(world.lookup("Blue House").unwrap().is_adjacent_to("Eastern Road"));
        assert!(world.lookup("Cave").unwrap().is_adjacent_to("Eastern Road"));
        assert!(world.current_location().enemies.contains("Goblin"));
        assert!(!world.lookup("Blue House").unwrap().enemies.contains("Goblin"));
    }

    #[test]
    fn test_same_location_in_other_case_does_not_move() {
        let mut session = session_at("Blue House");
        delta(r#"{"current_location": "blue house"}"#).apply(&mut session);
        assert_eq!(session.world.previous_key(), None);
        assert_eq!(session.world.len(), 1);
    }

    #[test]
    fn test_story_threads_replace() {
        let mut session = session_at("Blue House");
        session.story_threads = vec!["A".into(), "B".into()];

        delta(r#"{"story_threads": ["C"]}"#).apply(&mut session);
        assert_eq!(session.story_threads, vec!["C"]);

        delta(r#"{}"#).apply(&mut session);
        assert_eq!(session.story_threads, vec!["C"]);
    }

    #[test]
    fn test_defeated_enemies_removed() {
        let mut session = session_at("River");
        session.world.current_location_mut().enemies.add("Mud Man");

        delta(r#"{"enemies_updates": {"defeated": ["Mud Man"]}}"#).apply(&mut session);
        assert!(session.world.current_location().enemies.is_empty());
    }

    #[test]
    fn test_blank_labels_ignored() {
        let mut session = session_at("River");
        delta(r#"{"inventory_updates": {"added": ["  ", "leaf"]}}"#).apply(&mut session);
        assert_eq!(session.player.inventory.to_sequence(), vec!["leaf"]);
    }
}
