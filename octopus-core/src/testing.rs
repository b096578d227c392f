//! Testing utilities.
//!
//! [`ScriptedGenerator`] stands in for the text-generation service so games
//! can be played deterministically without network access. Replies are
//! queued per [`Channel`]: the narrator's free-text call and each structured
//! schema get their own queue, so the two background calls of a turn never
//! race for the same reply.

use crate::history::ChatMessage;
use crate::llm::{Completion, GenerationError, ResponseMode, TextGenerator};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Tokens charged for a scripted reply unless stated otherwise.
pub const SCRIPTED_TOKENS: u64 = 10;

/// Which kind of call a reply answers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    FreeText,
    Json(String),
}

impl Channel {
    pub fn narrative() -> Self {
        Self::FreeText
    }

    pub fn delta() -> Self {
        Self::Json("record_state_delta".to_string())
    }

    pub fn story() -> Self {
        Self::Json("record_story_threads".to_string())
    }

    fn of(mode: &ResponseMode) -> Self {
        match mode.schema_name() {
            Some(name) => Self::Json(name.to_string()),
            None => Self::FreeText,
        }
    }
}

/// One queued reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text { text: String, tokens_used: u64 },
    Fail(GenerationError),
    /// Sleep on the tokio clock, then give the inner reply.
    Delayed(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            tokens_used: SCRIPTED_TOKENS,
        }
    }
}

/// A call the generator received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub channel: Channel,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Default)]
struct Script {
    queues: HashMap<Channel, VecDeque<ScriptedReply>>,
    calls: Vec<RecordedCall>,
}

/// A [`TextGenerator`] that plays back queued replies.
///
/// An empty free-text queue answers with a stock line; an empty structured
/// queue answers with [`GenerationError::EmptyResponse`].
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    script: Mutex<Script>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a reply on `channel`.
    pub fn push(&self, channel: Channel, reply: ScriptedReply) {
        self.script()
            .queues
            .entry(channel)
            .or_default()
            .push_back(reply);
    }

    /// Queue narrative prose.
    pub fn narrate(self, text: impl Into<String>) -> Self {
        self.push(Channel::narrative(), ScriptedReply::text(text));
        self
    }

    /// Queue a state delta.
    pub fn delta(self, delta: serde_json::Value) -> Self {
        self.push(Channel::delta(), ScriptedReply::text(delta.to_string()));
        self
    }

    /// Queue a story-thread list.
    pub fn story<I: IntoIterator<Item = S>, S: Into<String>>(self, threads: I) -> Self {
        let threads: Vec<String> = threads.into_iter().map(Into::into).collect();
        let body = serde_json::json!({ "story_threads": threads });
        self.push(Channel::story(), ScriptedReply::text(body.to_string()));
        self
    }

    /// Queue raw text on any channel, for malformed responses.
    pub fn raw(self, channel: Channel, text: impl Into<String>) -> Self {
        self.push(channel, ScriptedReply::text(text));
        self
    }

    /// Queue a failure.
    pub fn fail(self, channel: Channel, error: GenerationError) -> Self {
        self.push(channel, ScriptedReply::Fail(error));
        self
    }

    /// Queue a reply that only arrives after `delay`.
    pub fn delayed(self, channel: Channel, delay: Duration, reply: ScriptedReply) -> Self {
        self.push(channel, ScriptedReply::Delayed(delay, Box::new(reply)));
        self
    }

    /// Every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.script().calls.clone()
    }

    pub fn call_count(&self, channel: &Channel) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|call| &call.channel == channel)
            .count()
    }

    /// Replies still queued on `channel`.
    pub fn remaining(&self, channel: &Channel) -> usize {
        self.script().queues.get(channel).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn send(
        &self,
        messages: &[ChatMessage],
        mode: &ResponseMode,
    ) -> Result<Completion, GenerationError> {
        let channel = Channel::of(mode);
        let reply = {
            let mut script = self.script();
            script.calls.push(RecordedCall {
                channel: channel.clone(),
                messages: messages.to_vec(),
            });
            script
                .queues
                .get_mut(&channel)
                .and_then(VecDeque::pop_front)
        };

        let mut reply = match (reply, &channel) {
            (Some(reply), _) => reply,
            (None, Channel::FreeText) => ScriptedReply::text("Nothing happens."),
            (None, Channel::Json(_)) => return Err(GenerationError::EmptyResponse),
        };

        loop {
            match reply {
                ScriptedReply::Text { text, tokens_used } => {
                    return Ok(Completion { text, tokens_used })
                }
                ScriptedReply::Fail(error) => return Err(error),
                ScriptedReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channels_are_independent() {
        let generator = ScriptedGenerator::new()
            .narrate("You walk east.")
            .story(["A road stretches on."]);

        let story = generator
            .send(
                &[ChatMessage::user("threads")],
                &ResponseMode::json::<crate::story::StoryThreads>(),
            )
            .await
            .unwrap();
        assert!(story.text.contains("A road stretches on."));

        let narrative = generator
            .send(&[ChatMessage::user("go east")], &ResponseMode::FreeText)
            .await
            .unwrap();
        assert_eq!(narrative.text, "You walk east.");
        assert_eq!(narrative.tokens_used, SCRIPTED_TOKENS);
        assert_eq!(generator.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_queues() {
        let generator = ScriptedGenerator::new();
        let text = generator
            .send(&[ChatMessage::user("look")], &ResponseMode::FreeText)
            .await
            .unwrap();
        assert_eq!(text.text, "Nothing happens.");

        let err = generator
            .send(
                &[ChatMessage::user("delta")],
                &ResponseMode::json::<crate::reconcile::StateDelta>(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::EmptyResponse);
    }
}
