//! Slash command parsing for the chat front-end.
//!
//! Lines starting with `/` control the front-end and are never sent to the
//! model.

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Show the conversation so far.
    History,

    /// Save the conversation to a file.
    Save(String),

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be treated as a question.
///
/// # Examples
///
/// ```
/// # use incibot::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("What is an incident?").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "history" => ChatCommand::History,
        "save" => match argument {
            Some(path) => ChatCommand::Save(path.to_string()),
            None => ChatCommand::Invalid("/save requires a file path".to_string()),
        },
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        other => ChatCommand::Invalid(format!("unknown command: /{other} (try /help)")),
    };
    Some(result)
}

/// Returns the help text listing all commands.
pub fn help_text() -> &'static str {
    "/history      Show the conversation so far
/save <path>  Save the conversation as JSON
/help         Show this help
/quit         Exit"
}
