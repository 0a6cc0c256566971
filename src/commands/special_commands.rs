//! Special commands parser for the interactive session
//!
//! Lines starting with `/` are session commands rather than questions.
//! They let the user:
//! - Run the last generated query and view the result
//! - Replace the current query by hand
//! - Attach an image to the next question (vision pipelines)
//! - Inspect or clear the conversation history
//!
//! Command names are case-insensitive; arguments keep their case.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command was given an unsupported argument
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Commands understood by the interactive session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Execute the current query and print the rows
    Run,

    /// Execute the current query and print the result layer as GeoJSON
    GeoJson,

    /// Print the current query
    ShowSql,

    /// Replace the current query
    SetSql(String),

    /// Attach an image file to the next question
    AttachImage(PathBuf),

    /// Drop a pending image attachment
    DetachImage,

    /// Print the conversation history
    History,

    /// Forget the conversation history
    ClearHistory,

    /// Show session details
    ShowStatus,

    /// Display help information
    Help,

    /// Leave the session
    Exit,

    /// Not a special command; the input is a question
    None,
}

/// Parse a line of user input into a special command
///
/// # Errors
///
/// Returns `CommandError::UnknownCommand` for an unrecognized `/` command,
/// `CommandError::MissingArgument` when a required argument is absent, and
/// `CommandError::UnsupportedArgument` when a command takes no argument but
/// got one.
///
/// # Examples
///
/// ```
/// use spatialmind::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// let cmd = parse_special_command("/sql SELECT name FROM cities;").unwrap();
/// assert_eq!(cmd, SpecialCommand::SetSql("SELECT name FROM cities;".to_string()));
///
/// let cmd = parse_special_command("which rivers cross Berlin?").unwrap();
/// assert_eq!(cmd, SpecialCommand::None);
///
/// assert!(parse_special_command("/foo").is_err());
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') {
        return Ok(match lower.as_str() {
            "exit" | "quit" => SpecialCommand::Exit,
            _ => SpecialCommand::None,
        });
    }

    let (name, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((name, rest)) => (name.to_lowercase(), rest.trim()),
        None => (lower.clone(), ""),
    };

    let no_arg = |command: SpecialCommand| {
        if arg.is_empty() {
            Ok(command)
        } else {
            Err(CommandError::UnsupportedArgument {
                command: name.clone(),
                arg: arg.to_string(),
            })
        }
    };

    match name.as_str() {
        "/run" => no_arg(SpecialCommand::Run),
        "/geojson" | "/map" => no_arg(SpecialCommand::GeoJson),
        "/history" => no_arg(SpecialCommand::History),
        "/clear" => no_arg(SpecialCommand::ClearHistory),
        "/status" => no_arg(SpecialCommand::ShowStatus),
        "/help" | "/?" => no_arg(SpecialCommand::Help),
        "/exit" | "/quit" => no_arg(SpecialCommand::Exit),

        "/sql" if arg.is_empty() => Ok(SpecialCommand::ShowSql),
        "/sql" => Ok(SpecialCommand::SetSql(arg.to_string())),

        "/image" if arg.is_empty() => Err(CommandError::MissingArgument {
            command: "/image".to_string(),
            usage: "/image <path> | /image off".to_string(),
        }),
        "/image" if arg.eq_ignore_ascii_case("off") => Ok(SpecialCommand::DetachImage),
        "/image" => Ok(SpecialCommand::AttachImage(PathBuf::from(arg))),

        _ => Err(CommandError::UnknownCommand(name.clone())),
    }
}

/// Display help text for special commands
pub fn print_help() {
    println!(
        r#"
Special Commands for Interactive Sessions
=========================================

QUERIES:
  /run            - Execute the current query and show the rows
  /geojson        - Execute the current query and print the layer as GeoJSON
  /map            - Same as /geojson
  /sql            - Show the current query
  /sql <query>    - Replace the current query

IMAGES (vision pipelines):
  /image <path>   - Attach an image to the next question
  /image off      - Drop the pending attachment

HISTORY:
  /history        - Show previous questions and answers
  /clear          - Forget the conversation so far

SESSION:
  /status         - Show pipeline, model and database
  /help           - Show this help message
  /?              - Same as /help
  exit            - Leave the session
  quit            - Same as exit

NOTES:
  - Commands are case-insensitive; arguments are not
  - Any other text is sent as a question
  - Each answer that contains SQL becomes the current query
"#
    );
}
