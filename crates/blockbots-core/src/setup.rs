//! Setup DSL: whitespace-separated commands preparing a world before step 0.
//!
//! ```text
//! move <x> <y> <agent>
//! add <x> <y> block|dispenser <type>
//! create task <name> <duration> <x,y,type>[;<x,y,type>]*
//! attach <x1> <y1> <x2> <y2>
//! ```
//!
//! `#` introduces a comment line; parse errors skip the line only.

use crate::geom::Position;
use std::collections::BTreeMap;
use thiserror::Error;

/// One parsed setup command.
#[derive(Debug, Clone, PartialEq)]
pub enum SetupCommand {
    Move {
        position: Position,
        agent: String,
    },
    AddBlock {
        position: Position,
        block_type: String,
    },
    AddDispenser {
        position: Position,
        block_type: String,
    },
    CreateTask {
        name: String,
        duration: u64,
        requirements: BTreeMap<Position, String>,
    },
    Attach {
        first: Position,
        second: Position,
    },
}

/// Why a setup line was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("unknown setup command `{0}`")]
    UnknownCommand(String),
    #[error("malformed `{command}` command: {reason}")]
    Malformed {
        command: &'static str,
        reason: &'static str,
    },
}

impl SetupCommand {
    /// Parse a single line. Comment and blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, SetupError> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        match tokens[0] {
            "move" => {
                let [_, x, y, agent] = tokens[..] else {
                    return Err(malformed("move", "expected `move <x> <y> <agent>`"));
                };
                Ok(Some(Self::Move {
                    position: parse_position("move", x, y)?,
                    agent: agent.to_string(),
                }))
            }
            "add" => {
                let [_, x, y, kind, block_type] = tokens[..] else {
                    return Err(malformed("add", "expected `add <x> <y> block|dispenser <type>`"));
                };
                let position = parse_position("add", x, y)?;
                let block_type = block_type.to_string();
                match kind {
                    "block" => Ok(Some(Self::AddBlock {
                        position,
                        block_type,
                    })),
                    "dispenser" => Ok(Some(Self::AddDispenser {
                        position,
                        block_type,
                    })),
                    _ => Err(malformed("add", "kind must be `block` or `dispenser`")),
                }
            }
            "create" => {
                let [_, "task", name, duration, requirements] = tokens[..] else {
                    return Err(malformed(
                        "create",
                        "expected `create task <name> <duration> <x,y,type>[;..]`",
                    ));
                };
                let duration: u64 = duration
                    .parse()
                    .map_err(|_| malformed("create", "duration must be a non-negative integer"))?;
                let mut parsed = BTreeMap::new();
                for requirement in requirements.split(';') {
                    let mut parts = requirement.split(',');
                    let (Some(x), Some(y), Some(block_type), None) =
                        (parts.next(), parts.next(), parts.next(), parts.next())
                    else {
                        return Err(malformed("create", "requirement must be `<x>,<y>,<type>`"));
                    };
                    parsed.insert(parse_position("create", x, y)?, block_type.to_string());
                }
                Ok(Some(Self::CreateTask {
                    name: name.to_string(),
                    duration,
                    requirements: parsed,
                }))
            }
            "attach" => {
                let [_, x1, y1, x2, y2] = tokens[..] else {
                    return Err(malformed("attach", "expected `attach <x1> <y1> <x2> <y2>`"));
                };
                Ok(Some(Self::Attach {
                    first: parse_position("attach", x1, y1)?,
                    second: parse_position("attach", x2, y2)?,
                }))
            }
            other => Err(SetupError::UnknownCommand(other.to_string())),
        }
    }
}

fn malformed(command: &'static str, reason: &'static str) -> SetupError {
    SetupError::Malformed { command, reason }
}

fn parse_position(command: &'static str, x: &str, y: &str) -> Result<Position, SetupError> {
    let x: i32 = x
        .parse()
        .map_err(|_| malformed(command, "coordinate is not an integer"))?;
    let y: i32 = y
        .parse()
        .map_err(|_| malformed(command, "coordinate is not an integer"))?;
    Ok(Position::new(x, y))
}
