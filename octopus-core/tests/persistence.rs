//! Integration tests for saving and resuming games.

use octopus_core::persist::{decode_session, FileStore, SessionStore};
use octopus_core::{CommandOutcome, Narrator, ScriptedGenerator, SessionId};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn scripted_turn() -> ScriptedGenerator {
    ScriptedGenerator::new()
        .narrate("You wade into the river. Something large moves below.")
        .delta(json!({
            "current_location": "River",
            "inventory_updates": {"added": ["wet boots"]}
        }))
        .story(["The Mud Man lurks in the river."])
}

// =============================================================================
// TEST 1: A finished turn is on disk
// =============================================================================

#[tokio::test]
async fn test_turn_is_saved_after_join() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = Arc::new(FileStore::new(temp_dir.path()));
    let narrator = Narrator::new(Arc::new(scripted_turn()), store.clone());

    let session = narrator.new_game().await.unwrap();
    let CommandOutcome::Narrated(turn) = narrator
        .process_command(session.id(), "wade into the river")
        .await
        .unwrap()
    else {
        panic!("expected narration");
    };
    turn.background.wait().await.unwrap();

    let blob = store.load(session.id()).await.unwrap().expect("save exists");
    let saved = decode_session(&blob).unwrap();
    assert_eq!(saved.world.current_location().name, "River");
    assert!(saved.player.inventory.contains("wet boots"));
    assert_eq!(saved.story_threads, vec!["The Mud Man lurks in the river."]);
    assert_eq!(saved.history.len(), 2);
    assert_eq!(saved, session.snapshot().await);
}

// =============================================================================
// TEST 2: A new narrator resumes from the store
// =============================================================================

#[tokio::test]
async fn test_resume_in_new_narrator() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let saves = temp_dir.path().join("saves");

    let id = {
        let narrator = Narrator::new(Arc::new(scripted_turn()), Arc::new(FileStore::new(&saves)));
        let session = narrator.new_game().await.unwrap();
        if let CommandOutcome::Narrated(turn) = narrator
            .process_command(session.id(), "wade into the river")
            .await
            .unwrap()
        {
            turn.background.wait().await.unwrap();
        }
        session.id().clone()
    };

    let narrator = Narrator::new(
        Arc::new(ScriptedGenerator::new()),
        Arc::new(FileStore::new(&saves)),
    );
    let resumed = narrator.load_or_create(Some(&id)).await.unwrap();
    assert_eq!(resumed.id(), &id);

    let state = resumed.snapshot().await;
    assert_eq!(state.world.current_location().name, "River");
    assert_eq!(state.world.previous_location().unwrap().name, "Blue House");
    assert!(state.world.lookup("blue house").unwrap().is_adjacent_to("river"));

    let stats = narrator.current_stats_projection(&id).await.unwrap();
    assert_eq!(stats.location, "River");
    assert_eq!(stats.enemies, vec!["Mud Man"]);
}

// =============================================================================
// TEST 3: Unknown ids start a new game
// =============================================================================

#[tokio::test]
async fn test_load_or_create_unknown_id() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = Arc::new(FileStore::new(temp_dir.path()));
    let narrator = Narrator::new(Arc::new(ScriptedGenerator::new()), store.clone());

    let missing = SessionId::new("deadbeefdeadbeef");
    let session = narrator.load_or_create(Some(&missing)).await.unwrap();
    assert_ne!(session.id(), &missing);
    assert!(store.load(session.id()).await.unwrap().is_some());

    let fresh = narrator.load_or_create(None).await.unwrap();
    assert_ne!(fresh.id(), session.id());
}

// =============================================================================
// TEST 4: Corrupt saves are reported, not replaced
// =============================================================================

#[tokio::test]
async fn test_corrupt_save_is_an_error() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let id = SessionId::new("0123456789abcdef");
    std::fs::write(temp_dir.path().join("0123456789abcdef.json"), "{ nope").unwrap();

    let narrator = Narrator::new(
        Arc::new(ScriptedGenerator::new()),
        Arc::new(FileStore::new(temp_dir.path())),
    );
    let err = narrator.load(&id).await.unwrap_err();
    assert!(matches!(err, octopus_core::NarratorError::Persist(_)));
}
