//! Positioned things stored in the world arena: entities, blocks, dispensers.

use crate::geom::Position;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Stable handle for things backed by a generational slot map.
    pub struct ThingId;
}

/// Result string an entity reports before its first action of a step resolves.
pub const RESULT_UNINITIALIZED: &str = "uninitialized";

/// A positioned object with a stable external name such as `"e0"` or `"b3"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thing {
    pub name: String,
    pub position: Position,
    pub kind: ThingKind,
}

/// Tagged payload of a thing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ThingKind {
    Entity(EntityState),
    Block { block_type: String },
    Dispenser { block_type: String },
}

impl Thing {
    /// Entities and blocks participate in attachments; dispensers do not.
    #[must_use]
    pub fn is_attachable(&self) -> bool {
        matches!(self.kind, ThingKind::Entity(_) | ThingKind::Block { .. })
    }

    #[must_use]
    pub fn is_entity(&self) -> bool {
        matches!(self.kind, ThingKind::Entity(_))
    }

    #[must_use]
    pub fn is_block(&self) -> bool {
        matches!(self.kind, ThingKind::Block { .. })
    }

    #[must_use]
    pub fn is_dispenser(&self) -> bool {
        matches!(self.kind, ThingKind::Dispenser { .. })
    }

    /// Block type carried by blocks and dispensers.
    #[must_use]
    pub fn block_type(&self) -> Option<&str> {
        match &self.kind {
            ThingKind::Block { block_type } | ThingKind::Dispenser { block_type } => {
                Some(block_type)
            }
            ThingKind::Entity(_) => None,
        }
    }

    /// Borrow the entity state, if this thing is an entity.
    #[must_use]
    pub fn entity(&self) -> Option<&EntityState> {
        match &self.kind {
            ThingKind::Entity(state) => Some(state),
            _ => None,
        }
    }

    /// Mutably borrow the entity state, if this thing is an entity.
    pub fn entity_mut(&mut self) -> Option<&mut EntityState> {
        match &mut self.kind {
            ThingKind::Entity(state) => Some(state),
            _ => None,
        }
    }
}

/// Mutable per-agent state beyond the positioned header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityState {
    pub agent_name: String,
    pub team_name: String,
    pub energy: u32,
    pub disabled_for_steps: u32,
    pub vision: u32,
    pub last_action: String,
    pub last_action_params: Vec<String>,
    pub last_action_result: String,
    clear_counter: u32,
    previous_clear_step: i64,
    previous_clear_position: Position,
}

impl EntityState {
    /// Fresh entity state with full energy and no action history.
    #[must_use]
    pub fn new(
        agent_name: impl Into<String>,
        team_name: impl Into<String>,
        energy: u32,
        vision: u32,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            team_name: team_name.into(),
            energy,
            disabled_for_steps: 0,
            vision,
            last_action: String::new(),
            last_action_params: Vec::new(),
            last_action_result: String::new(),
            clear_counter: 0,
            previous_clear_step: -1,
            previous_clear_position: Position::new(0, 0),
        }
    }

    /// Returns true while the entity is recovering from a clear hit.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled_for_steps > 0
    }

    /// Step-boundary upkeep: tick down the disabled counter, reset the
    /// last-action result, and apply the configured energy recharge.
    pub fn pre_step(&mut self, recharge: u32, max_energy: u32) {
        if self.disabled_for_steps > 0 {
            self.disabled_for_steps -= 1;
        }
        self.last_action_result = RESULT_UNINITIALIZED.to_string();
        if recharge > 0 {
            self.energy = (self.energy + recharge).min(max_energy);
        }
    }

    /// Deduct `cost` energy, saturating at zero.
    pub fn consume_energy(&mut self, cost: u32) {
        self.energy = self.energy.saturating_sub(cost);
    }

    /// Advance the consecutive-clear counter for an attempt aimed at
    /// `target` during `step`, resetting it first unless this attempt
    /// continues an unbroken run on the same cell. Returns the new count.
    pub fn bump_clear_counter(&mut self, step: u64, target: Position) -> u32 {
        if self.previous_clear_step != step as i64 - 1 || self.previous_clear_position != target {
            self.clear_counter = 0;
        }
        self.clear_counter += 1;
        self.clear_counter
    }

    /// Reset the consecutive-clear counter (after a detonation).
    pub fn reset_clear_counter(&mut self) {
        self.clear_counter = 0;
    }

    /// Record the step and target of the latest clear attempt.
    pub fn record_clear(&mut self, step: u64, target: Position) {
        self.previous_clear_step = step as i64;
        self.previous_clear_position = target;
    }
}
