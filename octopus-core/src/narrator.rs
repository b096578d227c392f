//! The narrator: turns player commands into narration and keeps the game
//! state in step with it.
//!
//! A turn has two halves. The foreground half asks for narrative prose and
//! commits the exchange to history atomically: if generation fails nothing
//! changes. The background half runs reconciliation and story progression
//! concurrently against a snapshot, then joins, applies both results under
//! the session lock in a fixed order, rebuilds the stats projection and
//! saves the session. A session admits one command at a time, from the
//! start of the foreground half to the end of the background half.

use crate::config::NarratorConfig;
use crate::history::ChatMessage;
use crate::llm::{Completion, GenerationError, ResponseMode, TextGenerator};
use crate::persist::{self, PersistError, SessionStore};
use crate::prompts;
use crate::reconcile;
use crate::session::{GameSession, LiveSession, NewGame, ProcessingGuard, SessionId};
use crate::stats::StatsProjection;
use crate::story;
use crate::world::WorldError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors surfaced to the caller of the narrator.
#[derive(Debug, Error)]
pub enum NarratorError {
    #[error("The narrator could not respond: {0}")]
    Generation(#[from] GenerationError),

    #[error("No game found for session {0}. Use RESET GAME to start a new one.")]
    SessionNotFound(SessionId),

    #[error("Storage error: {0}")]
    Persist(#[from] PersistError),

    #[error("Could not build the starting world: {0}")]
    World(#[from] WorldError),
}

/// Why a background task did not take effect.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error("generation failed: {0}")]
    Generation(GenerationError),

    #[error("malformed structured response: {0}")]
    Malformed(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("failed to save session: {0}")]
    Persist(String),

    #[error("background work aborted: {0}")]
    Aborted(String),
}

impl From<GenerationError> for TaskError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Malformed(msg) => Self::Malformed(msg),
            GenerationError::Timeout(after) => Self::TimedOut(after),
            other => Self::Generation(other),
        }
    }
}

/// Outcome of one background step.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Applied,
    Failed(TaskError),
}

impl TaskStatus {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// What the background half of a turn did.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub reconciliation: TaskStatus,
    pub story: TaskStatus,
    pub persistence: TaskStatus,
    /// Tokens charged by the background calls that succeeded.
    pub tokens_used: u64,
    /// The projection published at the end of the turn.
    pub projection: StatsProjection,
}

/// Resolves once a turn's background work has been applied and saved.
#[derive(Debug)]
pub struct TurnHandle {
    handle: JoinHandle<TurnReport>,
}

impl TurnHandle {
    pub async fn wait(self) -> Result<TurnReport, TaskError> {
        self.handle
            .await
            .map_err(|e| TaskError::Aborted(e.to_string()))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// A narrated turn.
#[derive(Debug)]
pub struct Turn {
    pub narrative: String,
    /// Tokens charged by the narrative call.
    pub tokens_used: u64,
    pub background: TurnHandle,
}

/// Result of [`Narrator::process_command`].
#[derive(Debug)]
pub enum CommandOutcome {
    Narrated(Turn),
    /// The command was blank; nothing was sent or recorded.
    Empty,
    /// Another command for this session is still in flight.
    Busy,
    /// The reset command started a brand-new game under a new id.
    Reset {
        session_id: SessionId,
        message: String,
    },
}

/// Message shown when a command arrives while the previous one is running.
pub const BUSY_MESSAGE: &str = "The story is still unfolding. Try again shortly.";

/// Message shown for a blank command.
pub const EMPTY_COMMAND_MESSAGE: &str = "Please enter a prompt.";

/// Runs games against a text generator and a session store.
pub struct Narrator {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn SessionStore>,
    config: NarratorConfig,
    /// Live sessions. An entry stays until it is reset or unloaded.
    sessions: RwLock<HashMap<SessionId, Arc<LiveSession>>>,
}

impl std::fmt::Debug for Narrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Narrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Narrator {
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<dyn SessionStore>) -> Self {
        Self::with_config(generator, store, NarratorConfig::default())
    }

    pub fn with_config(
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn SessionStore>,
        config: NarratorConfig,
    ) -> Self {
        Self {
            generator,
            store,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &NarratorConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    /// Start a game in the standard world.
    pub async fn new_game(&self) -> Result<Arc<LiveSession>, NarratorError> {
        self.start_game(NewGame::standard()).await
    }

    /// Start a game from a custom seed.
    pub async fn start_game(&self, seed: NewGame) -> Result<Arc<LiveSession>, NarratorError> {
        let session = seed.build()?;
        info!(session = %session.id, "starting new game");

        self.store
            .save(&session.id, persist::encode_session(&session)?)
            .await?;

        let live = Arc::new(LiveSession::new(session));
        self.sessions
            .write()
            .await
            .insert(live.id().clone(), Arc::clone(&live));
        Ok(live)
    }

    /// Fetch a session, loading it from the store if it is not live.
    pub async fn load(&self, id: &SessionId) -> Result<Arc<LiveSession>, NarratorError> {
        if let Some(live) = self.sessions.read().await.get(id) {
            return Ok(Arc::clone(live));
        }

        let blob = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| NarratorError::SessionNotFound(id.clone()))?;
        let session = persist::decode_session(&blob)?;
        debug!(session = %id, "loaded session from store");

        // Another caller may have loaded it while the store was read.
        let mut sessions = self.sessions.write().await;
        let live = sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(LiveSession::new(session)));
        Ok(Arc::clone(live))
    }

    /// Resume the identified game, or start a new one if there is none.
    pub async fn load_or_create(
        &self,
        id: Option<&SessionId>,
    ) -> Result<Arc<LiveSession>, NarratorError> {
        match id {
            Some(id) => match self.load(id).await {
                Err(NarratorError::SessionNotFound(_)) => self.new_game().await,
                other => other,
            },
            None => self.new_game().await,
        }
    }

    /// Drop an idle session from memory. Its saved state stays in the store
    /// and the next [`Narrator::load`] reads it back.
    ///
    /// Returns `false` if the session is not live or a turn is in flight.
    pub async fn unload(&self, id: &SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(live) = sessions.get(id) else {
            return false;
        };
        // Hold the flag so no turn starts while the entry is removed.
        let Some(_guard) = live.try_begin() else {
            return false;
        };
        sessions.remove(id);
        debug!(session = %id, "unloaded idle session");
        true
    }

    /// Number of sessions held in memory.
    pub async fn live_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// The projection published at the end of the session's last turn.
    pub async fn current_stats_projection(
        &self,
        id: &SessionId,
    ) -> Result<StatsProjection, NarratorError> {
        Ok(self.load(id).await?.stats())
    }

    /// A copy of the session's current state.
    pub async fn snapshot(&self, id: &SessionId) -> Result<GameSession, NarratorError> {
        Ok(self.load(id).await?.snapshot().await)
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Narrate one player command.
    ///
    /// Returns as soon as the narrative is committed; the returned
    /// [`TurnHandle`] tracks the background work. On a generation failure
    /// the session is left exactly as it was.
    #[tracing::instrument(skip(self, id, command), fields(session = %id))]
    pub async fn process_command(
        &self,
        id: &SessionId,
        command: &str,
    ) -> Result<CommandOutcome, NarratorError> {
        let command = command.trim();
        if command.is_empty() {
            debug!("ignoring blank command");
            return Ok(CommandOutcome::Empty);
        }
        if command == self.config.reset_command {
            return self.reset(id).await;
        }

        let live = self.load(id).await?;
        let Some(guard) = live.try_begin() else {
            info!("rejecting command: session busy");
            return Ok(CommandOutcome::Busy);
        };
        info!("command accepted");

        let messages = {
            let state = live.lock().await;
            prompts::narrative_messages(&state, command, self.config.history_window)
        };

        // Dropping the guard on this error path releases the session.
        let completion = match self.generate(&messages, &ResponseMode::FreeText).await {
            Ok(completion) => completion,
            Err(err) => {
                warn!(error = %err, "narrative generation failed");
                return Err(err.into());
            }
        };
        let narrative = completion.text.trim().to_string();

        let snapshot = {
            let mut state = live.lock().await;
            state.history.record_exchange(command, &narrative);
            state.add_tokens(completion.tokens_used);
            state.clone()
        };

        let background = self.spawn_background(guard, snapshot);
        Ok(CommandOutcome::Narrated(Turn {
            narrative,
            tokens_used: completion.tokens_used,
            background,
        }))
    }

    async fn reset(&self, previous: &SessionId) -> Result<CommandOutcome, NarratorError> {
        let live = self.new_game().await?;
        self.sessions.write().await.remove(previous);
        info!(previous = %previous, session = %live.id(), "game reset");

        let location = live.stats().location;
        Ok(CommandOutcome::Reset {
            session_id: live.id().clone(),
            message: format!("The game has been reset. A new adventure begins at the {location}."),
        })
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        mode: &ResponseMode,
    ) -> Result<Completion, GenerationError> {
        bounded(self.config.request_timeout, self.generator.send(messages, mode)).await
    }

    fn spawn_background(&self, guard: ProcessingGuard, snapshot: GameSession) -> TurnHandle {
        let work = Background {
            generator: Arc::clone(&self.generator),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        };

        let handle = tokio::spawn(async move {
            let report = work.run(guard.session(), snapshot).await;
            // Released only after the join point has applied and saved.
            drop(guard);
            report
        });
        TurnHandle { handle }
    }
}

/// Bound a collaborator call by `limit`.
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, GenerationError>>,
) -> Result<T, GenerationError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(GenerationError::Timeout(limit)))
}

/// The background half of a turn.
struct Background {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn SessionStore>,
    config: NarratorConfig,
}

impl Background {
    async fn run(&self, live: &LiveSession, snapshot: GameSession) -> TurnReport {
        let limit = self.config.request_timeout;
        let generator = self.generator.as_ref();

        let (reconciled, progressed) = tokio::join!(
            bounded(
                limit,
                reconcile::request_delta(generator, &snapshot, self.config.reconcile_window)
            ),
            bounded(
                limit,
                story::request_story_update(
                    generator,
                    &snapshot,
                    self.config.story_compaction_threshold
                )
            ),
        );

        let mut tokens_used = 0;
        let (reconciliation, story, projection, blob) = {
            let mut state = live.lock().await;

            let reconciliation = match reconciled {
                Ok(result) => {
                    result.delta.apply(&mut state);
                    tokens_used += result.tokens_used;
                    TaskStatus::Applied
                }
                Err(err) => {
                    warn!(error = %err, "abandoning reconciliation for this turn");
                    TaskStatus::Failed(err.into())
                }
            };

            let story = match progressed {
                Ok(update) => {
                    debug!(policy = ?update.policy, threads = update.story_threads.len(), "story threads updated");
                    update.apply(&mut state);
                    tokens_used += update.tokens_used;
                    TaskStatus::Applied
                }
                Err(err) => {
                    warn!(error = %err, "story threads left unchanged");
                    TaskStatus::Failed(err.into())
                }
            };

            state.add_tokens(tokens_used);
            info!(total_tokens = state.total_tokens_used, "turn reconciled");

            let projection = StatsProjection::from_session(&state);
            (reconciliation, story, projection, persist::encode_session(&state))
        };

        live.publish(projection.clone());

        let persistence = match blob {
            Ok(blob) => match self.store.save(live.id(), blob).await {
                Ok(()) => {
                    debug!("session saved");
                    TaskStatus::Applied
                }
                Err(err) => {
                    warn!(error = %err, "failed to save session");
                    TaskStatus::Failed(TaskError::Persist(err.to_string()))
                }
            },
            Err(err) => {
                warn!(error = %err, "failed to encode session");
                TaskStatus::Failed(TaskError::Persist(err.to_string()))
            }
        };

        TurnReport {
            reconciliation,
            story,
            persistence,
            tokens_used,
            projection,
        }
    }
}
