//! Prompt assembly for the three kinds of call the narrator makes.

use crate::history::ChatMessage;
use crate::session::GameSession;
use crate::story::StoryPolicy;

const NARRATOR_PROMPT: &str = include_str!("prompts/narrator.txt");
const RECONCILE_PROMPT: &str = include_str!("prompts/reconcile.txt");
const STORY_UPDATE_PROMPT: &str = include_str!("prompts/story_update.txt");
const STORY_COMPACT_PROMPT: &str = include_str!("prompts/story_compact.txt");

/// Render the state the collaborator must stay consistent with.
pub fn state_block(session: &GameSession) -> String {
    let world = &session.world;
    let here = world.current_location();

    let mut block = String::from("[GAME STATE]\n");
    block.push_str(&format!("Current Location: {}\n", here.name));
    block.push_str(&format!(
        "Adjacent Locations: {}\n",
        list(&world.adjacent_names(here))
    ));
    block.push_str(&format!(
        "Inventory: {}\n",
        list(&session.player.inventory.to_sequence())
    ));
    block.push_str(&format!(
        "Enemies in Location: {}\n",
        list(&here.enemies.to_sequence())
    ));
    block.push_str(&format!(
        "Interactive Objects: {}\n",
        list(&here.interactive_items.to_sequence())
    ));
    block.push_str(&format!(
        "Removable Items: {}\n",
        list(&here.removable_items.to_sequence())
    ));

    if !here.story_threads.is_empty() {
        block.push_str("Notes About This Location:\n");
        push_bullets(&mut block, &here.story_threads);
    }

    if !session.central_plot.is_empty() {
        block.push_str(&format!("Central Plot: {}\n", session.central_plot));
    }

    block.push_str("Story Threads:\n");
    push_bullets(&mut block, &session.story_threads);
    block
}

fn list(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn push_bullets(out: &mut String, items: &[String]) {
    if items.is_empty() {
        out.push_str("- none\n");
    }
    for item in items {
        out.push_str(&format!("- {item}\n"));
    }
}

/// Context for the narrative call: preamble, state, a trailing window of
/// history, then the new command.
pub fn narrative_messages(session: &GameSession, command: &str, window: usize) -> Vec<ChatMessage> {
    let mut messages = vec![
        ChatMessage::system(NARRATOR_PROMPT),
        ChatMessage::system(state_block(session)),
    ];
    messages.extend(session.history.recent(window).iter().cloned());
    messages.push(ChatMessage::user(command));
    messages
}

/// Context for the reconciliation call.
///
/// The recent exchanges go in as a transcript inside one user message so the
/// collaborator reads them as evidence rather than continuing the dialogue.
pub fn reconcile_messages(session: &GameSession, window: usize) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(RECONCILE_PROMPT),
        ChatMessage::system(state_block(session)),
        ChatMessage::user(format!(
            "Recent exchanges:\n{}\n\nReport the state changes implied by the latest narration.",
            session.history.transcript(window)
        )),
    ]
}

/// Context for the story-thread call under the given policy.
pub fn story_messages(session: &GameSession, policy: StoryPolicy) -> Vec<ChatMessage> {
    let mut threads = String::new();
    push_bullets(&mut threads, &session.story_threads);

    match policy {
        StoryPolicy::Compact => vec![
            ChatMessage::system(STORY_COMPACT_PROMPT),
            ChatMessage::user(format!("Story threads:\n{threads}")),
        ],
        StoryPolicy::Incremental => vec![
            ChatMessage::system(STORY_UPDATE_PROMPT),
            ChatMessage::user(format!(
                "Story threads:\n{threads}\nLatest exchange:\n{}",
                session.history.transcript(2)
            )),
        ],
    }
}
