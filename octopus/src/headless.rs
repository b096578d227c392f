//! Line-oriented game loop.
//!
//! Every input line is a player command, except lines starting with `#`,
//! which are front-end commands (quit, status, state, map, help).

use octopus_core::{
    CommandOutcome, Narrator, SessionId, TaskStatus, BUSY_MESSAGE, EMPTY_COMMAND_MESSAGE,
};
use std::io::{self, BufRead, Write};

/// Play until stdin closes or the player quits.
pub async fn run(narrator: &Narrator, resume: Option<SessionId>) -> anyhow::Result<()> {
    let session = narrator.load_or_create(resume.as_ref()).await?;
    let mut id = session.id().clone();

    println!("=== Octopus ===");
    println!("Session: {id}");
    println!("(use --session {id} to resume this game later)");
    println!();
    println!("{}", session.stats());
    println!();
    print_help();
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('#') {
            match command.trim() {
                "quit" | "exit" => {
                    println!("Goodbye!");
                    break;
                }
                "status" => match narrator.current_stats_projection(&id).await {
                    Ok(stats) => println!("[STATUS]\n{stats}"),
                    Err(e) => println!("[ERROR] {e}"),
                },
                "state" => match narrator.snapshot(&id).await {
                    Ok(state) => match serde_json::to_string_pretty(&state) {
                        Ok(json) => println!("[STATE]\n{json}"),
                        Err(e) => println!("[ERROR] {e}"),
                    },
                    Err(e) => println!("[ERROR] {e}"),
                },
                "map" => match narrator.snapshot(&id).await {
                    Ok(state) => print!("[MAP]\n{}", state.world.render_tree()),
                    Err(e) => println!("[ERROR] {e}"),
                },
                "session" => println!("[SESSION] {id}"),
                "help" => print_help(),
                _ => println!("[ERROR] Unknown command. Type #help for help."),
            }
            stdout.flush().ok();
            continue;
        }

        print!("[PROCESSING]");
        stdout.flush().ok();
        let outcome = narrator.process_command(&id, line).await;
        print!("\r            \r");
        stdout.flush().ok();

        match outcome {
            Ok(CommandOutcome::Narrated(turn)) => {
                println!("[NARRATOR]");
                for para in turn.narrative.split("\n\n") {
                    println!("{para}");
                }
                println!();

                // Settle the turn before reading the next command.
                match turn.background.wait().await {
                    Ok(report) => {
                        report_failure("state update", &report.reconciliation);
                        report_failure("story update", &report.story);
                        report_failure("save", &report.persistence);
                    }
                    Err(e) => println!("[WARN] {e}"),
                }
            }
            Ok(CommandOutcome::Empty) => println!("{EMPTY_COMMAND_MESSAGE}"),
            Ok(CommandOutcome::Busy) => println!("[BUSY] {BUSY_MESSAGE}"),
            Ok(CommandOutcome::Reset {
                session_id,
                message,
            }) => {
                id = session_id;
                println!("[RESET] {message}");
                println!("Session: {id}");
            }
            Err(e) => println!("[ERROR] {e}"),
        }
        stdout.flush().ok();
    }

    Ok(())
}

fn report_failure(what: &str, status: &TaskStatus) {
    if let TaskStatus::Failed(err) = status {
        println!("[WARN] {what} skipped this turn: {err}");
    }
}

fn print_help() {
    println!("Commands:");
    println!("  #quit     - Exit the game");
    println!("  #status   - Show where you are and what you carry");
    println!("  #state    - Dump the full game state as JSON");
    println!("  #map      - Show the locations discovered so far");
    println!("  #session  - Show the session id");
    println!("  #help     - Show this help");
    println!("  RESET GAME starts over in a new session.");
    println!("  (anything else is sent as your action)");
}
