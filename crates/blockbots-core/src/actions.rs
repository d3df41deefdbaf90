//! Agent actions and the result codes their handlers report.

use crate::geom::{Direction, Position, Rotation};
use serde::{Deserialize, Serialize};

/// One action submitted for an agent in the current step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Action {
    Move(Direction),
    Rotate(Rotation),
    Attach(Direction),
    Detach(Direction),
    /// Bridge two rigid groups by connecting a block of the issuing agent
    /// with a block of a partner agent. Block positions are local to their
    /// respective entities.
    Connect {
        block: Position,
        partner: String,
        partner_block: Position,
    },
    Request(Direction),
    Submit {
        task: String,
    },
    /// Charge a clear at a target cell given in entity-local coordinates.
    Clear {
        target: Position,
    },
    /// Deliberate no-op; also what the harness submits on agent timeout.
    Skip,
}

impl Action {
    /// Action name recorded in `last_action`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Move(_) => "move",
            Self::Rotate(_) => "rotate",
            Self::Attach(_) => "attach",
            Self::Detach(_) => "detach",
            Self::Connect { .. } => "connect",
            Self::Request(_) => "request",
            Self::Submit { .. } => "submit",
            Self::Clear { .. } => "clear",
            Self::Skip => "skip",
        }
    }

    /// Stringified parameters recorded in `last_action_params`.
    #[must_use]
    pub fn params(&self) -> Vec<String> {
        match self {
            Self::Move(direction)
            | Self::Attach(direction)
            | Self::Detach(direction)
            | Self::Request(direction) => vec![direction.as_str().to_string()],
            Self::Rotate(rotation) => vec![rotation.as_str().to_string()],
            Self::Connect {
                block,
                partner,
                partner_block,
            } => vec![
                partner.clone(),
                block.x.to_string(),
                block.y.to_string(),
                partner_block.x.to_string(),
                partner_block.y.to_string(),
            ],
            Self::Submit { task } => vec![task.clone()],
            Self::Clear { target } => vec![target.x.to_string(), target.y.to_string()],
            Self::Skip => Vec::new(),
        }
    }
}

/// Outcome of one action handler, surfaced to the agent verbatim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionResult {
    Success,
    Failed,
    FailedPath,
    FailedTarget,
    FailedBlocked,
    FailedStatus,
    FailedRandom,
}

impl ActionResult {
    /// Wire name of the result code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::FailedPath => "failed_path",
            Self::FailedTarget => "failed_target",
            Self::FailedBlocked => "failed_blocked",
            Self::FailedStatus => "failed_status",
            Self::FailedRandom => "failed_random",
        }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}
