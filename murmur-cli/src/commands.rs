//! Slash-command parsing for the terminal client.
//!
//! Anything not starting with `/` is a chat message. `//text` sends a
//! message that starts with a literal slash.

use murmur_proto::{ProtocolError, RoomId};

pub const HELP: &str = "\
commands:
  <text>                  send a message
  /join <room>            switch to room
  /connect                reconnect to the current room
  /leave                  close and forget the room
  /close                  close, keeping the room
  /typing [on|off]        typing indicator (default on)
  /read <id> [id ...]     mark messages read
  /react <id> <emoji>     add a reaction
  /edit <id> <text>       edit a message
  /delete <id>            delete a message
  /away | /back           set presence
  /status                 show connection state
  /stats                  delivery, queue and heartbeat counters
  /help                   this text
  /quit                   exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Join(RoomId),
    Connect,
    Leave,
    Close,
    Typing(bool),
    Read(Vec<String>),
    React { message_id: String, emoji: String },
    Edit { message_id: String, content: String },
    Delete(String),
    Away,
    Back,
    Status,
    Stats,
    Help,
    Quit,
    /// Blank line
    Nothing,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command /{0} (try /help)")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error(transparent)]
    Room(#[from] ProtocolError),
}

pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Nothing);
    }
    if let Some(literal) = line.strip_prefix("//") {
        return Ok(Command::Say(format!("/{literal}")));
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line.to_string()));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    match name {
        "join" => match args {
            "" => Err(ParseError::Usage("/join <room>")),
            room => Ok(Command::Join(RoomId::new(room)?)),
        },
        "connect" => Ok(Command::Connect),
        "leave" => Ok(Command::Leave),
        "close" => Ok(Command::Close),
        "typing" => match args {
            "" | "on" => Ok(Command::Typing(true)),
            "off" => Ok(Command::Typing(false)),
            _ => Err(ParseError::Usage("/typing [on|off]")),
        },
        "read" => {
            let ids: Vec<String> = args.split_whitespace().map(str::to_string).collect();
            if ids.is_empty() {
                return Err(ParseError::Usage("/read <id> [id ...]"));
            }
            Ok(Command::Read(ids))
        }
        "react" => match two_args(args) {
            Some((id, emoji)) if !emoji.contains(char::is_whitespace) => Ok(Command::React {
                message_id: id.to_string(),
                emoji: emoji.to_string(),
            }),
            _ => Err(ParseError::Usage("/react <id> <emoji>")),
        },
        "edit" => match two_args(args) {
            Some((id, content)) => Ok(Command::Edit {
                message_id: id.to_string(),
                content: content.to_string(),
            }),
            None => Err(ParseError::Usage("/edit <id> <text>")),
        },
        "delete" => match args {
            "" => Err(ParseError::Usage("/delete <id>")),
            id => Ok(Command::Delete(id.to_string())),
        },
        "away" => Ok(Command::Away),
        "back" => Ok(Command::Back),
        "status" => Ok(Command::Status),
        "stats" => Ok(Command::Stats),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

/// First word and the non-empty remainder.
fn two_args(args: &str) -> Option<(&str, &str)> {
    let (first, rest) = args.split_once(char::is_whitespace)?;
    let rest = rest.trim();
    (!rest.is_empty()).then_some((first, rest))
}
