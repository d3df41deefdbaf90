//! Core engine for the BlockBots multi-agent assembly scenario.
//!
//! Teams of agents move across a discrete grid, pick up blocks from
//! dispensers, weld them into rigid groups, and submit the resulting
//! patterns on goal cells to score tasks, while random clear events
//! punch holes into the map. The engine is strictly turn-serialized:
//! [`World::prepare_step`] opens a step, action handlers mutate shared
//! state one at a time, and percepts and snapshots are read back as
//! plain serde records.

mod actions;
mod geom;
mod grid;
mod percept;
mod setup;
mod task;
mod things;
mod world;

pub use actions::{Action, ActionResult};
pub use geom::{Area, Direction, Position, Rotation};
pub use grid::{Grid, MarkerKind, Terrain};
pub use percept::{
    BlockRecord, DispenserRecord, EntityRecord, FinalPercept, InitialPercept, RequirementRecord,
    Snapshot, StepPercept, TaskRecord, TeamResult, ThingRecord, ThingRecordKind,
};
pub use setup::{SetupCommand, SetupError};
pub use task::{Task, TaskBoard};
pub use things::{EntityState, Thing, ThingId, ThingKind, RESULT_UNINITIALIZED};
pub use world::{ClearEvent, Team, World};

use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised when constructing or driving a world.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// An action referenced an agent the world does not know.
    #[error("unknown agent `{0}`")]
    UnknownAgent(String),
}

/// Static configuration for one match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Total number of steps, reported in initial percepts.
    pub steps: u64,
    /// Percent chance that any dispatched action fails spuriously.
    pub random_fail: u32,
    /// Maximum size of a rigid attachment group, entity included.
    pub attach_limit: usize,
    /// Consecutive charged clear actions needed to detonate.
    pub clear_steps: u32,
    /// Energy consumed by a clear detonation.
    pub clear_energy_cost: u32,
    /// Steps an entity stays disabled after a clear hit.
    pub disable_duration: u32,
    /// Energy cap per entity; also the starting energy.
    pub max_energy: u32,
    /// Energy regained per step; the scenario default is none.
    pub energy_recharge: u32,
    /// Perception radius of every entity.
    pub entity_vision: u32,
    /// Bounds for the number of generated block types.
    pub block_types_min: u32,
    pub block_types_max: u32,
    /// Bounds for the number of dispensers per block type.
    pub dispensers_min: u32,
    pub dispensers_max: u32,
    pub tasks: TaskSettings,
    pub events: EventSettings,
    pub grid: GridSettings,
    /// Setup DSL lines applied after world creation.
    pub setup: Vec<String>,
    /// Team name to agent roster.
    pub teams: BTreeMap<String, Vec<String>>,
    /// Optional RNG seed for reproducible matches.
    pub rng_seed: Option<u64>,
}

/// Random task generation parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TaskSettings {
    pub duration_min: u64,
    pub duration_max: u64,
    pub size_min: u32,
    pub size_max: u32,
    /// Per-step chance of creating one new task.
    pub probability: f64,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            duration_min: 100,
            duration_max: 200,
            size_min: 2,
            size_max: 4,
            probability: 0.05,
        }
    }
}

/// Clear event scheduling parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EventSettings {
    /// Percent chance of enqueueing a new event each step.
    pub chance: u32,
    pub radius_min: u32,
    pub radius_max: u32,
    /// Steps between announcement and detonation.
    pub warning: u64,
    /// Bounds for extra obstacles distributed after a detonation.
    pub create_min: u32,
    pub create_max: u32,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            chance: 15,
            radius_min: 3,
            radius_max: 5,
            warning: 5,
            create_min: 5,
            create_max: 10,
        }
    }
}

/// Grid dimensions. Terrain content arrives through a callback instead,
/// see [`World::with_terrain`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridSettings {
    pub width: u32,
    pub height: u32,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            width: 40,
            height: 40,
        }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            steps: 500,
            random_fail: 1,
            attach_limit: 10,
            clear_steps: 3,
            clear_energy_cost: 50,
            disable_duration: 4,
            max_energy: 300,
            energy_recharge: 0,
            entity_vision: 5,
            block_types_min: 3,
            block_types_max: 3,
            dispensers_min: 2,
            dispensers_max: 3,
            tasks: TaskSettings::default(),
            events: EventSettings::default(),
            grid: GridSettings::default(),
            setup: Vec::new(),
            teams: BTreeMap::new(),
            rng_seed: None,
        }
    }
}

impl MatchConfig {
    /// Validates bounds and rosters before a world is built from this.
    pub fn validate(&self) -> Result<(), WorldError> {
        if self.grid.width == 0 || self.grid.height == 0 {
            return Err(WorldError::InvalidConfig(
                "grid dimensions must be non-zero",
            ));
        }
        if self.attach_limit == 0 {
            return Err(WorldError::InvalidConfig("attach_limit must be at least 1"));
        }
        if self.clear_steps == 0 {
            return Err(WorldError::InvalidConfig("clear_steps must be at least 1"));
        }
        if self.block_types_min == 0 || self.block_types_min > self.block_types_max {
            return Err(WorldError::InvalidConfig("invalid block type bounds"));
        }
        if self.dispensers_min > self.dispensers_max {
            return Err(WorldError::InvalidConfig("invalid dispenser bounds"));
        }
        if self.tasks.duration_min == 0 || self.tasks.duration_min > self.tasks.duration_max {
            return Err(WorldError::InvalidConfig("invalid task duration bounds"));
        }
        if self.tasks.size_min == 0 || self.tasks.size_min > self.tasks.size_max {
            return Err(WorldError::InvalidConfig("invalid task size bounds"));
        }
        if !(0.0..=1.0).contains(&self.tasks.probability) {
            return Err(WorldError::InvalidConfig(
                "task probability must be within [0, 1]",
            ));
        }
        if self.events.radius_min > self.events.radius_max {
            return Err(WorldError::InvalidConfig("invalid event radius bounds"));
        }
        if self.events.create_min > self.events.create_max {
            return Err(WorldError::InvalidConfig("invalid event create bounds"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for roster in self.teams.values() {
            for agent in roster {
                if !seen.insert(agent.as_str()) {
                    return Err(WorldError::InvalidConfig(
                        "agent names must be unique across teams",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Returns the configured RNG, seeding from entropy when no seed is set.
    pub(crate) fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}
