//! Special commands parser for interactive chat mode
//!
//! Special commands control the avatar session instead of being spoken by
//! the avatar. They allow users to:
//! - Join and leave the session
//! - Interrupt the avatar
//! - Mute and unmute the microphone
//! - Stream text to the avatar word by word
//! - Inspect the session and the transcript
//!
//! Commands are prefixed with `/` and are case-insensitive. Arguments keep
//! their original case.

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Provision a new session and join it
    Join,

    /// Leave the current session
    Leave,

    /// Interrupt the avatar's current utterance
    Stop,

    /// Mute the microphone
    Mute,

    /// Unmute the microphone
    Unmute,

    /// Speak text as a stream of word fragments
    Stream(String),

    /// Speak text that cannot be interrupted
    Say(String),

    /// Show session state and remaining time
    ShowStatus,

    /// Print the merged transcript
    Transcript,

    /// Display help information
    Help,

    /// Exit the chat
    Exit,

    /// Not a special command; the input is spoken by the avatar
    None,
}

/// Parse user input into a special command
///
/// # Arguments
///
/// * `input` - The raw input line
///
/// # Returns
///
/// Returns `SpecialCommand::None` for ordinary input
///
/// # Errors
///
/// Returns `CommandError` for unknown commands or missing arguments
///
/// # Examples
///
/// ```
/// use avatalk::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/stop").unwrap(), SpecialCommand::Stop);
/// assert_eq!(parse_special_command("hello").unwrap(), SpecialCommand::None);
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') && lower != "exit" && lower != "quit" {
        return Ok(SpecialCommand::None);
    }

    let (command, argument) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command.to_lowercase(), rest.trim()),
        None => (lower.clone(), ""),
    };

    match command.as_str() {
        "/join" | "/start" => Ok(SpecialCommand::Join),
        "/leave" => Ok(SpecialCommand::Leave),
        "/stop" | "/interrupt" => Ok(SpecialCommand::Stop),
        "/mute" => Ok(SpecialCommand::Mute),
        "/unmute" => Ok(SpecialCommand::Unmute),
        "/stream" | "/say" if argument.is_empty() => Err(CommandError::MissingArgument {
            command: command.clone(),
            usage: format!("{} <text>", command),
        }),
        "/stream" => Ok(SpecialCommand::Stream(argument.to_string())),
        "/say" => Ok(SpecialCommand::Say(argument.to_string())),
        "/status" => Ok(SpecialCommand::ShowStatus),
        "/transcript" | "/history" => Ok(SpecialCommand::Transcript),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/exit" | "/quit" | "exit" | "quit" => Ok(SpecialCommand::Exit),
        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

/// Print help for special commands
pub fn print_help() {
    println!(
        r#"
Special Commands for Interactive Chat Mode
==========================================

SESSION:
  /join           - Provision a new session and join it
  /leave          - Leave the current session
  /status         - Show session state and remaining time

AVATAR:
  <text>          - Ask the avatar to say <text>
  /say <text>     - Say <text> without allowing interruption
  /stream <text>  - Send <text> to the avatar word by word
  /stop           - Interrupt the avatar

MICROPHONE:
  /mute           - Mute the microphone
  /unmute         - Unmute the microphone

OTHER:
  /transcript     - Show the conversation so far
  /help           - Show this help
  /exit           - Leave the session and quit
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(
            parse_special_command("Hello there").unwrap(),
            SpecialCommand::None
        );
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(parse_special_command("/join").unwrap(), SpecialCommand::Join);
        assert_eq!(parse_special_command("/start").unwrap(), SpecialCommand::Join);
        assert_eq!(parse_special_command("/leave").unwrap(), SpecialCommand::Leave);
        assert_eq!(
            parse_special_command("/status").unwrap(),
            SpecialCommand::ShowStatus
        );
    }

    #[test]
    fn test_commands_are_case_insensitive() {
        assert_eq!(parse_special_command("/STOP").unwrap(), SpecialCommand::Stop);
        assert_eq!(parse_special_command("  /Mute ").unwrap(), SpecialCommand::Mute);
    }

    #[test]
    fn test_stream_keeps_argument_case() {
        assert_eq!(
            parse_special_command("/stream Hello World").unwrap(),
            SpecialCommand::Stream("Hello World".to_string())
        );
        assert_eq!(
            parse_special_command("/SAY  Keep Going ").unwrap(),
            SpecialCommand::Say("Keep Going".to_string())
        );
    }

    #[test]
    fn test_stream_requires_argument() {
        assert_eq!(
            parse_special_command("/stream").unwrap_err(),
            CommandError::MissingArgument {
                command: "/stream".to_string(),
                usage: "/stream <text>".to_string(),
            }
        );
    }

    #[test]
    fn test_exit_aliases() {
        for input in ["exit", "quit", "/exit", "/QUIT"] {
            assert_eq!(parse_special_command(input).unwrap(), SpecialCommand::Exit);
        }
    }

    #[test]
    fn test_unknown_command() {
        let err = parse_special_command("/dance").unwrap_err();
        assert_eq!(err, CommandError::UnknownCommand("/dance".to_string()));
        assert!(err.to_string().contains("/help"));
    }
}
