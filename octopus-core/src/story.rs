//! Story-thread progression.
//!
//! Each turn the running plot log is either extended from the latest
//! exchange or, once it has grown past a threshold, compacted into a shorter
//! equivalent. Either way the collaborator returns the complete new log.

use crate::llm::{parse_structured, GenerationError, ResponseMode, TextGenerator};
use crate::prompts;
use crate::session::GameSession;
use crate::StructuredOutput;
use serde::Deserialize;

/// How this turn's story update is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryPolicy {
    /// Fold the latest exchange into the log.
    Incremental,
    /// Summarize the whole log into fewer threads.
    Compact,
}

impl StoryPolicy {
    /// Compact once the log is longer than `threshold`.
    pub fn choose(threads: &[String], threshold: usize) -> Self {
        if threads.len() > threshold {
            Self::Compact
        } else {
            Self::Incremental
        }
    }
}

/// The complete list of story threads that should be active
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, StructuredOutput)]
#[structured(name = "record_story_threads")]
pub struct StoryThreads {
    /// One sentence per thread
    pub story_threads: Vec<String>,
}

/// A replacement story log.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryUpdate {
    pub policy: StoryPolicy,
    pub story_threads: Vec<String>,
    pub tokens_used: u64,
}

impl StoryUpdate {
    pub fn apply(&self, session: &mut GameSession) {
        session.story_threads = self.story_threads.clone();
    }
}

/// Ask the collaborator for the next story log.
///
/// A compaction that comes back empty is treated as malformed; throwing
/// away the whole log is never what compaction means.
pub async fn request_story_update(
    generator: &dyn TextGenerator,
    session: &GameSession,
    compaction_threshold: usize,
) -> Result<StoryUpdate, GenerationError> {
    let policy = StoryPolicy::choose(&session.story_threads, compaction_threshold);
    tracing::debug!(?policy, threads = session.story_threads.len(), "progressing story threads");

    let messages = prompts::story_messages(session, policy);
    let completion = generator
        .send(&messages, &ResponseMode::json::<StoryThreads>())
        .await?;

    let StoryThreads { story_threads } = parse_structured(&completion)?;
    let story_threads: Vec<String> = story_threads
        .into_iter()
        .map(|thread| thread.trim().to_string())
        .filter(|thread| !thread.is_empty())
        .collect();

    if policy == StoryPolicy::Compact && story_threads.is_empty() {
        return Err(GenerationError::Malformed(
            "compaction returned no story threads".to_string(),
        ));
    }

    Ok(StoryUpdate {
        policy,
        story_threads,
        tokens_used: completion.tokens_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threads(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("thread {i}")).collect()
    }

    #[test]
    fn test_policy_threshold() {
        assert_eq!(StoryPolicy::choose(&threads(3), 10), StoryPolicy::Incremental);
        assert_eq!(StoryPolicy::choose(&threads(10), 10), StoryPolicy::Incremental);
        assert_eq!(StoryPolicy::choose(&threads(11), 10), StoryPolicy::Compact);
    }

    #[test]
    fn test_story_threads_schema_requires_list() {
        use crate::llm::StructuredOutput as _;
        assert_eq!(
            StoryThreads::json_schema()["required"],
            serde_json::json!(["story_threads"])
        );
    }
}
