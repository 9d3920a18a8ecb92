//! Line commands read from stdin.

use std::fmt;

use ovio_canvas::{ActionType, ComponentKind, Position, Properties};
use ovio_sync::coordinator::LocalEdit;
use serde_json::Value;

pub const HELP: &str = "\
commands:
  add <kind> <x> <y>                    place a component
  move <id> <x> <y>                     move a component
  set <id> <key> <value>                set a property (JSON or plain text)
  action <id> <type>                    attach an action
  config <id> <action-id> <key> <value> set an action config value
  rm <id>                               remove a component
  rm-action <id> <action-id>            remove an action
  save                                  save now
  list                                  show the canvas
  who                                   show collaborators
  help
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Edit(LocalEdit),
    Save,
    List,
    Who,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    UnknownCommand(String),
    Usage(&'static str),
    InvalidNumber(String),
    NonFiniteNumber(String),
    InvalidKind(String),
    InvalidActionType(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnknownCommand(cmd) => write!(f, "unknown command '{cmd}' (try 'help')"),
            ParseError::Usage(usage) => write!(f, "usage: {usage}"),
            ParseError::InvalidNumber(raw) => write!(f, "not a number: {raw}"),
            ParseError::NonFiniteNumber(raw) => write!(f, "coordinates must be finite: {raw}"),
            ParseError::InvalidKind(e) | ParseError::InvalidActionType(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match name {
        "add" => {
            let [kind, x, y] = exact(&args, "add <kind> <x> <y>")?;
            let kind = kind.parse::<ComponentKind>().map_err(ParseError::InvalidKind)?;
            Command::Edit(LocalEdit::AddComponent { kind, position: position(x, y)? })
        }
        "move" => {
            let [id, x, y] = exact(&args, "move <id> <x> <y>")?;
            Command::Edit(LocalEdit::MoveComponent { id: id.to_string(), position: position(x, y)? })
        }
        "set" => {
            const USAGE: &str = "set <id> <key> <value>";
            if args.len() < 3 {
                return Err(ParseError::Usage(USAGE));
            }
            Command::Edit(LocalEdit::UpdateProperties {
                id: args[0].to_string(),
                partial: single(args[1], &args[2..]),
            })
        }
        "action" => {
            let [id, action_type] = exact(&args, "action <id> <type>")?;
            let action_type = action_type.parse::<ActionType>().map_err(ParseError::InvalidActionType)?;
            Command::Edit(LocalEdit::AddAction { component_id: id.to_string(), action_type })
        }
        "config" => {
            const USAGE: &str = "config <id> <action-id> <key> <value>";
            if args.len() < 4 {
                return Err(ParseError::Usage(USAGE));
            }
            Command::Edit(LocalEdit::UpdateActionConfig {
                component_id: args[0].to_string(),
                action_id: args[1].to_string(),
                partial: single(args[2], &args[3..]),
            })
        }
        "rm" => {
            let [id] = exact(&args, "rm <id>")?;
            Command::Edit(LocalEdit::RemoveComponent { id: id.to_string() })
        }
        "rm-action" => {
            let [id, action_id] = exact(&args, "rm-action <id> <action-id>")?;
            Command::Edit(LocalEdit::RemoveAction { component_id: id.to_string(), action_id: action_id.to_string() })
        }
        "save" => Command::Save,
        "list" | "ls" => Command::List,
        "who" => Command::Who,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

fn exact<'a, const N: usize>(args: &[&'a str], usage: &'static str) -> Result<[&'a str; N], ParseError> {
    <[&'a str; N]>::try_from(args).map_err(|_| ParseError::Usage(usage))
}

fn position(x: &str, y: &str) -> Result<Position, ParseError> {
    let coord = |raw: &str| match raw.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(_) => Err(ParseError::NonFiniteNumber(raw.to_string())),
        Err(_) => Err(ParseError::InvalidNumber(raw.to_string())),
    };
    Ok(Position::new(coord(x)?, coord(y)?))
}

/// `{key: value}` where value is JSON if it parses, text otherwise.
fn single(key: &str, rest: &[&str]) -> Properties {
    let raw = rest.join(" ");
    let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
    let mut props = Properties::new();
    props.insert(key.to_string(), value);
    props
}
