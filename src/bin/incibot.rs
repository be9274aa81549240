//! Interactive incident bot.
//!
//! This binary provides a streaming REPL for asking the hosted model about
//! incidents.
//!
//! # Usage
//!
//! ```bash
//! # Read config/app_config.$IB_DEPLOYMENT_ENV.yml (default: dev)
//! incibot
//!
//! # Pick the deployment environment explicitly
//! incibot --env prod
//!
//! # Read a specific file and send prior turns with every question
//! incibot --config /etc/incibot.yml --with-history
//! ```
//!
//! # Commands
//!
//! - `/history` - Show the conversation so far
//! - `/save <path>` - Save the conversation as JSON
//! - `/help` - Show available commands
//! - `/quit` - Exit the application

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use incibot::{
    ChatArgs, ChatCommand, ChatConfig, MemoryPolicy, PlainTextRenderer, Renderer,
    SessionController, SessionId, SessionStore, help_text, parse_command,
};

const CHAT_TITLE: &str = "Welcome to the Incident Bot";
const CHAT_INPUT_TAG_LINE: &str = "Enter your query ? ";

/// Main entry point for the incibot application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("incibot=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("incibot [OPTIONS]");
    let config = ChatConfig::from(args);
    let memory = if config.with_history {
        MemoryPolicy::FullHistory
    } else {
        MemoryPolicy::QuestionOnly
    };

    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    let mut store = SessionStore::new();
    let id = SessionId::generate();
    let session = store.get_or_create(&id);

    println!("{CHAT_TITLE}");
    let controller = SessionController::connect(session, &config.source, memory, &mut renderer)?;
    println!("Type /help for commands, /quit to exit\n");

    let mut rl = DefaultEditor::new()?;
    loop {
        let readline = rl.readline(CHAT_INPUT_TAG_LINE);

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {}", line);
                            }
                        }
                        ChatCommand::History => {
                            if session.message_count() == 0 {
                                renderer.print_info("No messages yet.");
                            } else {
                                controller.replay(session, &mut renderer);
                            }
                        }
                        ChatCommand::Save(path) => match session.save_transcript_to(&path) {
                            Ok(()) => renderer.print_info(&format!("Transcript saved to {path}")),
                            Err(err) => {
                                renderer.print_error(&format!("Failed to save transcript: {err}"))
                            }
                        },
                        ChatCommand::Invalid(message) => {
                            renderer.print_error(&message);
                        }
                    }
                    continue;
                }

                if let Err(e) = controller.handle_input(session, line, &mut renderer).await {
                    renderer.print_error(&e.to_string());
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    store.remove(&id);
    Ok(())
}
