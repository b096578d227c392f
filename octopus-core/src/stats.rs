//! Read-optimized view of a session for status displays.

use crate::session::GameSession;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the player currently sees in the status panel.
///
/// Rebuilt only after a turn's background work finishes, so it may lag the
/// live state by one turn. Never used for merge decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsProjection {
    pub location: String,
    pub previous_location: Option<String>,
    pub adjacent_locations: Vec<String>,
    pub inventory: Vec<String>,
    pub enemies: Vec<String>,
    pub interactive_items: Vec<String>,
    pub removable_items: Vec<String>,
}

impl StatsProjection {
    pub fn from_session(session: &GameSession) -> Self {
        let world = &session.world;
        let here = world.current_location();
        Self {
            location: here.name.clone(),
            previous_location: world.previous_location().map(|l| l.name.clone()),
            adjacent_locations: world.adjacent_names(here),
            inventory: session.player.inventory.to_sequence(),
            enemies: here.enemies.to_sequence(),
            interactive_items: here.interactive_items.to_sequence(),
            removable_items: here.removable_items.to_sequence(),
        }
    }
}

impl fmt::Display for StatsProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Location: {}", self.location)?;
        if let Some(previous) = &self.previous_location {
            writeln!(f, "Came from: {previous}")?;
        }
        if !self.adjacent_locations.is_empty() {
            writeln!(f, "Exits: {}", self.adjacent_locations.join(", "))?;
        }

        if self.inventory.is_empty() {
            writeln!(f, "You're not carrying anything.")?;
        } else {
            writeln!(f, "Inventory: {}", self.inventory.join(", "))?;
        }

        if self.enemies.is_empty() {
            writeln!(f, "You are safe.")?;
        } else {
            writeln!(f, "Enemies: {}", self.enemies.join(", "))?;
        }

        if !self.interactive_items.is_empty() {
            writeln!(f, "Objects: {}", self.interactive_items.join(", "))?;
        }
        if !self.removable_items.is_empty() {
            write!(f, "Items here: {}", self.removable_items.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_of_new_game() {
        let session = GameSession::new_game().unwrap();
        let stats = StatsProjection::from_session(&session);

        assert_eq!(stats.location, "Blue House");
        assert_eq!(stats.previous_location, None);
        assert_eq!(stats.adjacent_locations, vec!["Eastern Road", "River"]);
        assert!(stats.inventory.is_empty());
        assert_eq!(stats.interactive_items, vec!["Boarded Door", "Mailbox"]);
    }

    #[test]
    fn test_empty_lists_render_friendly_text() {
        let stats = StatsProjection {
            location: "Cave".to_string(),
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.contains("You're not carrying anything."));
        assert!(text.contains("You are safe."));
    }
}
