//! Game state reconciliation engine for an AI-narrated text adventure.
//!
//! This crate provides:
//! - A growing location graph with inventory, enemies and objects
//! - A narrator that turns player commands into prose through a pluggable
//!   text generator
//! - Idempotent reconciliation of structured state deltas derived from
//!   that prose, plus story-thread progression and compaction
//! - Session persistence behind a pluggable store
//!
//! # Quick Start
//!
//! ```ignore
//! use octopus_core::{ClaudeGenerator, CommandOutcome, FileStore, Narrator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let narrator = Narrator::new(
//!         Arc::new(ClaudeGenerator::from_env()?),
//!         Arc::new(FileStore::new("saves")),
//!     );
//!
//!     let session = narrator.new_game().await?;
//!     if let CommandOutcome::Narrated(turn) =
//!         narrator.process_command(session.id(), "open the mailbox").await?
//!     {
//!         println!("{}", turn.narrative);
//!         turn.background.wait().await?;
//!     }
//!     Ok(())
//! }
//! ```

// Lets `#[derive(StructuredOutput)]` name this crate from inside it.
extern crate self as octopus_core;

pub mod config;
pub mod history;
pub mod llm;
pub mod narrator;
pub mod persist;
pub mod player;
pub mod prompts;
pub mod reconcile;
pub mod session;
pub mod stats;
pub mod story;
pub mod string_set;
pub mod testing;
pub mod world;

pub use octopus_macros::StructuredOutput;

// Primary public API
pub use config::NarratorConfig;
pub use history::{ChatMessage, MessageHistory, Role};
pub use llm::{ClaudeGenerator, Completion, GenerationError, ResponseMode, TextGenerator};
pub use narrator::{
    CommandOutcome, Narrator, NarratorError, TaskError, TaskStatus, Turn, TurnHandle, TurnReport,
    BUSY_MESSAGE, EMPTY_COMMAND_MESSAGE,
};
pub use persist::{FileStore, MemoryStore, PersistError, SessionStore};
pub use player::Player;
pub use reconcile::{EnemyChanges, SetChanges, StateDelta};
pub use session::{GameSession, LiveSession, NewGame, SessionId};
pub use stats::StatsProjection;
pub use story::{StoryPolicy, StoryThreads};
pub use string_set::StringSet;
pub use testing::{Channel, ScriptedGenerator, ScriptedReply};
pub use world::{normalize_key, Location, World, WorldError};
