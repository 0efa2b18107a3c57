//! conversation-doctor - inspect conversations persisted by the engine
//!
//! `conversation-doctor list` prints the ids of conversations waiting on a
//! client tool. `conversation-doctor inspect <id>` prints the pairing report
//! and suspension state of one conversation as JSON.

use conversation_engine::engine::outstanding_request;
use conversation_engine::{build_request_messages, validate, Database, EngineConfig};
use serde_json::json;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: conversation-doctor (list | inspect <conversation-id>)";

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conversation_engine=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command: Vec<&str> = args.iter().map(String::as_str).collect();

    match run(&command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "conversation-doctor failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::from_env();
    // Ensure database directory exists
    config.ensure_db_dir()?;
    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    match command {
        ["list"] => {
            for id in db.list_awaiting_client()? {
                println!("{id}");
            }
        }
        ["inspect", id] => {
            let conversation = db.load_conversation(id)?;
            let continuation = conversation.continuation()?;
            let report = json!({
                "id": conversation.id(),
                "phase": conversation.phase(),
                "messages": conversation.messages().len(),
                "activeMessages": conversation.active_messages().count(),
                "requestMessages": build_request_messages(&conversation).len(),
                "violations": validate(&conversation),
                "pendingTools": continuation.map(|c| c.pending_tools).unwrap_or_default(),
                "outstandingRequest": outstanding_request(&conversation)?,
                "executedTools": conversation.executed_tools(),
                "usage": conversation.usage(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => return Err(USAGE.into()),
    }
    Ok(())
}
