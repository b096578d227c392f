//! Game sessions.
//!
//! A [`GameSession`] is the plain, serializable state of one player's game
//! and the unit of persistence. A [`LiveSession`] wraps it for use while the
//! game is being played: the state sits behind a mutex, a single-flight flag
//! admits one command at a time, and the latest stats projection is
//! published on a watch channel.

use crate::history::MessageHistory;
use crate::player::Player;
use crate::stats::StatsProjection;
use crate::world::{Location, World, WorldError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};

/// Opaque identifier for a stored session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 64 random bits, hex encoded.
    pub fn generate() -> Self {
        Self(format!("{:016x}", rand::random::<u64>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Everything about one player's game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    pub id: SessionId,
    pub world: World,
    pub player: Player,
    /// The fixed premise of the adventure.
    #[serde(default)]
    pub central_plot: String,
    /// Running plot log, replaced wholesale by reconciliation and story
    /// progression.
    #[serde(default)]
    pub story_threads: Vec<String>,
    #[serde(default)]
    pub history: MessageHistory,
    #[serde(default)]
    pub total_tokens_used: u64,
}

impl GameSession {
    /// A fresh game in the standard starting world.
    pub fn new_game() -> Result<Self, WorldError> {
        NewGame::standard().build()
    }

    pub fn add_tokens(&mut self, tokens: u64) {
        self.total_tokens_used = self.total_tokens_used.saturating_add(tokens);
    }
}

// ============================================================================
// New games
// ============================================================================

const STANDARD_CENTRAL_PLOT: &str = "The player starts outside a blue house in a forested area, \
with no specific instructions, but soon discovers that the main goal is to collect treasures and \
bring them back to the house. Along the way the player navigates underground passages filled with \
puzzles, traps and creatures that lurk in dark places. The ultimate objective is to find every \
treasure and secure it in the trophy case inside the blue house.";

const STANDARD_STORY_THREADS: [&str; 4] = [
    "The player starts outside a blue house in a forested area with no memory.",
    "There is a leaflet hidden in the mailbox explaining the general objective of the game.",
    "A crowbar is required to open the boarded door. It is not in this location.",
    "There is a hidden and locked cellar door in the back of the house. It requires a key to open.",
];

/// Builder for the initial state of a game.
#[derive(Debug, Clone)]
pub struct NewGame {
    start: Location,
    locations: Vec<Location>,
    player: Player,
    central_plot: String,
    story_threads: Vec<String>,
}

impl NewGame {
    /// A game that starts at `start` with nothing else seeded.
    pub fn new(start: Location) -> Self {
        Self {
            start,
            locations: Vec::new(),
            player: Player::default(),
            central_plot: String::new(),
            story_threads: Vec::new(),
        }
    }

    /// The blue house by the river.
    pub fn standard() -> Self {
        let blue_house = Location::new("Blue House")
            .with_removable_items(["leaflet"])
            .with_interactive_items(["Mailbox", "Boarded Door"]);

        let mut river = Location::new("River")
            .with_enemies(["Mud Man"])
            .with_removable_items(["leaf"])
            .with_interactive_items(["Boat", "Fish"]);
        river.add_adjacent("Blue House");

        let mut road = Location::new("Eastern Road")
            .with_enemies(["Bandit"])
            .with_removable_items(["rock"])
            .with_interactive_items(["Sign", "Tree"]);
        road.add_adjacent("Blue House");

        Self::new(blue_house)
            .with_location(river)
            .with_location(road)
            .with_central_plot(STANDARD_CENTRAL_PLOT)
            .with_story_threads(STANDARD_STORY_THREADS)
    }

    /// Seed another location. Its `adjacent` keys are linked both ways.
    pub fn with_location(mut self, location: Location) -> Self {
        self.locations.push(location);
        self
    }

    pub fn with_player(mut self, player: Player) -> Self {
        self.player = player;
        self
    }

    pub fn with_central_plot(mut self, plot: impl Into<String>) -> Self {
        self.central_plot = plot.into();
        self
    }

    pub fn with_story_threads<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        threads: I,
    ) -> Self {
        self.story_threads = threads.into_iter().map(Into::into).collect();
        self
    }

    /// Build the session under a freshly generated id.
    pub fn build(self) -> Result<GameSession, WorldError> {
        let mut world = World::starting_at(self.start)?;
        for location in self.locations {
            world.insert_location(location)?;
        }

        Ok(GameSession {
            id: SessionId::generate(),
            world,
            player: self.player,
            central_plot: self.central_plot,
            story_threads: self.story_threads,
            history: MessageHistory::new(),
            total_tokens_used: 0,
        })
    }
}

impl Default for NewGame {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// Live sessions
// ============================================================================

/// A session that is loaded and accepting commands.
#[derive(Debug)]
pub struct LiveSession {
    id: SessionId,
    state: Mutex<GameSession>,
    processing: AtomicBool,
    stats: watch::Sender<StatsProjection>,
}

impl LiveSession {
    pub fn new(session: GameSession) -> Self {
        let (stats, _) = watch::channel(StatsProjection::from_session(&session));
        Self {
            id: session.id.clone(),
            state: Mutex::new(session),
            processing: AtomicBool::new(false),
            stats,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Lock the session state.
    pub async fn lock(&self) -> MutexGuard<'_, GameSession> {
        self.state.lock().await
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> GameSession {
        self.state.lock().await.clone()
    }

    /// Whether a command is in flight, background work included.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Claim the single-flight flag.
    ///
    /// Returns `None` if another command holds it. The flag is released when
    /// the returned guard is dropped.
    pub fn try_begin(self: &Arc<Self>) -> Option<ProcessingGuard> {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ProcessingGuard {
                session: Arc::clone(self),
            })
    }

    /// The projection published at the end of the last completed turn.
    pub fn stats(&self) -> StatsProjection {
        self.stats.borrow().clone()
    }

    /// Watch for new projections.
    pub fn subscribe(&self) -> watch::Receiver<StatsProjection> {
        self.stats.subscribe()
    }

    pub(crate) fn publish(&self, projection: StatsProjection) {
        self.stats.send_replace(projection);
    }
}

/// Holds a session's single-flight flag until dropped.
#[derive(Debug)]
pub struct ProcessingGuard {
    session: Arc<LiveSession>,
}

impl ProcessingGuard {
    pub fn session(&self) -> &Arc<LiveSession> {
        &self.session
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.session.processing.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_is_hex() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), 16);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, SessionId::generate());
    }

    #[test]
    fn test_standard_world() {
        let session = GameSession::new_game().unwrap();
        let world = &session.world;

        assert_eq!(world.current_location().name, "Blue House");
        assert!(world.current_location().is_adjacent_to("River"));
        assert!(world.current_location().is_adjacent_to("Eastern Road"));
        assert!(world.lookup("river").unwrap().enemies.contains("Mud Man"));
        assert!(world.current_location().removable_items.contains("leaflet"));
        assert_eq!(session.player.name, "Adventurer");
        assert!(session.player.inventory.is_empty());
        assert_eq!(session.story_threads.len(), 4);
        assert!(!session.central_plot.is_empty());
    }

    #[test]
    fn test_custom_new_game() {
        let session = NewGame::new(Location::new("Blue House"))
            .with_story_threads(["line 1", "line 2", "line 3"])
            .build()
            .unwrap();
        assert_eq!(session.story_threads, vec!["line 1", "line 2", "line 3"]);
        assert_eq!(session.world.len(), 1);
    }

    #[test]
    fn test_blank_start_is_rejected() {
        assert!(NewGame::new(Location::new(" ")).build().is_err());
    }

    #[test]
    fn test_session_round_trips_through_json() {
        let mut session = GameSession::new_game().unwrap();
        session.history.record_exchange("look", "You see a house.");
        session.add_tokens(42);

        let json = serde_json::to_string(&session).unwrap();
        let back: GameSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }

    #[tokio::test]
    async fn test_single_flight_guard() {
        let live = Arc::new(LiveSession::new(GameSession::new_game().unwrap()));

        let guard = live.try_begin().expect("first claim succeeds");
        assert!(live.is_processing());
        assert!(live.try_begin().is_none());

        drop(guard);
        assert!(!live.is_processing());
        assert!(live.try_begin().is_some());
    }
}
