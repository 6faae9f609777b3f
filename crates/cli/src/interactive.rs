//! Interactive mode — line-based chat with slash commands.
//!
//! Reads from stdin, runs each input as a task (outer verification
//! off), and prints the result. Slash commands manage the session:
//! `/resume` and `/model` rebuild the controller so the rest of the
//! conversation continues against the selected session or model.

use std::sync::{Arc, RwLock};

use ironloop_agent::RuntimeController;
use ironloop_config::RuntimeSettings;
use ironloop_core::FatalError;
use ironloop_memory::SessionStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::build_controller;

const HELP: &str = "Commands:
  /help          Show this help
  /clear         Clear the conversation (keeps the session)
  /stats         Show token usage and cost
  /resume [id]   Resume a saved session (no argument lists sessions)
  /model [id]    Show or switch the active model
  /compact       Force a memory compression pass
  /exit          Quit";

/// Run the interactive loop. Returns the process exit code.
pub async fn run(
    current: Arc<RwLock<Arc<RuntimeController>>>,
    settings: &RuntimeSettings,
    model: &str,
    reasoning_effort: Option<String>,
) -> i32 {
    println!("ironloop interactive — type a task, or /help for commands.");

    let mut model = model.to_string();
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line.trim().to_string(),
            Ok(None) => return 0, // EOF (Ctrl+D)
            Err(e) => {
                eprintln!("Input error: {e}");
                return 3;
            }
        };

        if line.is_empty() {
            continue;
        }

        let controller = current.read().unwrap().clone();

        if let Some(command) = line.strip_prefix('/') {
            let mut parts = command.splitn(2, ' ');
            let name = parts.next().unwrap_or("");
            let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

            match name {
                "help" => println!("{HELP}"),
                "exit" | "quit" => return 0,
                "clear" => {
                    controller.memory().clear().await;
                    println!("Conversation cleared.");
                }
                "stats" => {
                    let stats = controller.memory().stats().await;
                    println!(
                        "context tokens: {}\nmessages: {}\ninput tokens: {}\noutput tokens: {}\ncost: ${:.4}\ncompressions: {} ({} tokens saved)",
                        stats.current_tokens,
                        stats.message_count,
                        stats.total_input_tokens,
                        stats.total_output_tokens,
                        stats.total_cost_usd,
                        stats.compression_count,
                        stats.compression_savings,
                    );
                }
                "model" => match arg {
                    None => println!("Active model: {model}"),
                    Some(new_model) => {
                        // Keep the conversation: rebuild against the
                        // current session with the new model.
                        let session = controller.memory().session_id().await;
                        if let Err(e) = controller.memory().save().await {
                            println!("Could not save session before switching: {e}");
                            continue;
                        }
                        let reference = session.simple().to_string();
                        match rebuild(
                            &current,
                            settings,
                            new_model,
                            Some(&reference),
                            reasoning_effort.clone(),
                        )
                        .await
                        {
                            Ok(()) => {
                                model = new_model.to_string();
                                println!("Switched to model {model}.");
                            }
                            Err(msg) => println!("Model switch failed: {msg}"),
                        }
                    }
                },
                "compact" => match controller.memory().force_compress().await {
                    Ok(()) => println!("Memory compressed."),
                    Err(e) => println!("Compression failed: {e}"),
                },
                "resume" => match arg {
                    Some(reference) => match rebuild(
                        &current,
                        settings,
                        &model,
                        Some(reference),
                        reasoning_effort.clone(),
                    )
                    .await
                    {
                        Ok(()) => println!("Resumed session {reference}."),
                        Err(msg) => println!("Resume failed: {msg}"),
                    },
                    None => list_sessions().await,
                },
                other => println!("Unknown command '/{other}'. Try /help."),
            }
            continue;
        }

        match controller.run_task(&line, false).await {
            Ok(result) => println!("{result}"),
            Err(FatalError::Cancelled) => {
                eprintln!("Task cancelled.");
                return 1;
            }
            Err(fatal) => {
                eprintln!("Task failed: {fatal}");
                return 3;
            }
        }
    }
}

async fn rebuild(
    current: &Arc<RwLock<Arc<RuntimeController>>>,
    settings: &RuntimeSettings,
    model: &str,
    resume: Option<&str>,
    reasoning_effort: Option<String>,
) -> Result<(), String> {
    let controller = build_controller(
        settings,
        model,
        resume,
        reasoning_effort,
        CancellationToken::new(),
    )
    .await
    .map_err(|e| e.to_string())?;

    *current.write().unwrap() = Arc::new(controller);
    Ok(())
}

async fn list_sessions() {
    let store = SessionStore::new(RuntimeSettings::sessions_dir());
    match store.list().await {
        Ok(sessions) if sessions.is_empty() => println!("No saved sessions."),
        Ok(sessions) => {
            for entry in sessions.iter().take(20) {
                let short: String = entry.id.simple().to_string().chars().take(8).collect();
                println!(
                    "{short}  {}  {:>4} msgs  {}",
                    entry.updated_at.format("%Y-%m-%d %H:%M"),
                    entry.message_count,
                    entry.preview
                );
            }
        }
        Err(e) => println!("Failed to list sessions: {e}"),
    }
}
