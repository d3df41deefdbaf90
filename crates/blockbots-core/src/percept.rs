//! Plain-record outputs read back by the external harness: per-agent
//! percepts, monitor snapshots, and the final match result.

use crate::geom::{Area, Position};
use crate::grid::Terrain;
use crate::task::Task;
use crate::things::{ThingId, ThingKind};
use crate::world::World;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Handed to each agent once before the first step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitialPercept {
    pub agent: String,
    pub team: String,
    pub total_steps: u64,
    pub vision: u32,
}

/// Kind discriminator of a visible thing record.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum ThingRecordKind {
    Entity,
    Block,
    Dispenser,
    Marker,
}

/// One visible thing in observer-local coordinates. `detail` is the team
/// for entities, the block type for blocks and dispensers, and the marker
/// kind for markers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThingRecord {
    pub x: i32,
    pub y: i32,
    pub kind: ThingRecordKind,
    pub detail: String,
}

/// One required block of a task pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequirementRecord {
    pub x: i32,
    pub y: i32,
    #[serde(rename = "type")]
    pub block_type: String,
}

/// Task as shown to agents and the monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRecord {
    pub name: String,
    pub deadline: u64,
    pub reward: u64,
    pub requirements: Vec<RequirementRecord>,
}

impl TaskRecord {
    fn from_task(task: &Task) -> Self {
        Self {
            name: task.name.clone(),
            deadline: task.deadline_step,
            reward: task.reward,
            requirements: task
                .requirements
                .iter()
                .map(|(position, block_type)| RequirementRecord {
                    x: position.x,
                    y: position.y,
                    block_type: block_type.clone(),
                })
                .collect(),
        }
    }
}

/// Everything one agent perceives in one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepPercept {
    pub step: u64,
    pub score: u64,
    pub things: Vec<ThingRecord>,
    /// Non-empty terrain names to sorted local positions.
    pub terrain: BTreeMap<String, Vec<Position>>,
    pub tasks: Vec<TaskRecord>,
    pub energy: u32,
    pub disabled: bool,
    pub last_action: String,
    pub last_action_params: Vec<String>,
    pub last_action_result: String,
    /// Local positions of visible things whose group holds an opposing
    /// entity.
    pub attached: Vec<Position>,
}

/// Handed to each agent after the last step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalPercept {
    pub score: u64,
    pub rank: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityRecord {
    pub id: String,
    pub x: i32,
    pub y: i32,
    pub name: String,
    pub team: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRecord {
    pub x: i32,
    pub y: i32,
    #[serde(rename = "type")]
    pub block_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispenserRecord {
    pub id: String,
    pub x: i32,
    pub y: i32,
    #[serde(rename = "type")]
    pub block_type: String,
}

/// Whole-world view for the external monitor. Completed tasks are
/// omitted; expired ones are kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub entities: Vec<EntityRecord>,
    pub blocks: Vec<BlockRecord>,
    pub dispensers: Vec<DispenserRecord>,
    pub tasks: Vec<TaskRecord>,
}

/// Per-team entry of the final match result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamResult {
    pub score: u64,
}

impl World {
    /// Initial percepts for every agent, keyed by agent name.
    #[must_use]
    pub fn initial_percepts(&self) -> BTreeMap<String, InitialPercept> {
        self.entities
            .iter()
            .filter_map(|(agent, id)| {
                let state = self.entity_state(*id)?;
                Some((
                    agent.clone(),
                    InitialPercept {
                        agent: agent.clone(),
                        team: state.team_name.clone(),
                        total_steps: self.config.steps,
                        vision: state.vision,
                    },
                ))
            })
            .collect()
    }

    /// Assemble the per-agent step percepts. Read-only over the world, so
    /// the per-entity scans run in parallel.
    #[must_use]
    pub fn step_percepts(&self) -> BTreeMap<String, StepPercept> {
        let open_tasks: Vec<TaskRecord> = self
            .tasks
            .open_tasks(self.step)
            .map(TaskRecord::from_task)
            .collect();
        self.entities
            .par_iter()
            .filter_map(|(agent, id)| {
                self.build_percept(*id, &open_tasks)
                    .map(|percept| (agent.clone(), percept))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect()
    }

    fn build_percept(&self, id: ThingId, open_tasks: &[TaskRecord]) -> Option<StepPercept> {
        let observer = self.grid.thing(id)?;
        let state = observer.entity()?;
        let origin = observer.position;

        let mut things = Vec::new();
        let mut terrain: BTreeMap<String, Vec<Position>> = BTreeMap::new();
        let mut attached = Vec::new();
        for cell in Area::new(origin, state.vision as i32) {
            let local = cell.to_local(origin);
            for occupant in self.grid.things_at(cell) {
                let Some(other) = self.grid.thing(*occupant) else {
                    continue;
                };
                let (kind, detail) = match &other.kind {
                    ThingKind::Entity(other_state) => {
                        (ThingRecordKind::Entity, other_state.team_name.clone())
                    }
                    ThingKind::Block { block_type } => {
                        (ThingRecordKind::Block, block_type.clone())
                    }
                    ThingKind::Dispenser { block_type } => {
                        (ThingRecordKind::Dispenser, block_type.clone())
                    }
                };
                things.push(ThingRecord {
                    x: local.x,
                    y: local.y,
                    kind,
                    detail,
                });
                if self.attached_to_opponent(*occupant, &state.team_name) {
                    attached.push(local);
                }
            }
            if let Some(dispenser) = self.grid.dispenser_at(cell) {
                if let Some(thing) = self.grid.thing(dispenser) {
                    things.push(ThingRecord {
                        x: local.x,
                        y: local.y,
                        kind: ThingRecordKind::Dispenser,
                        detail: thing.block_type().unwrap_or_default().to_string(),
                    });
                }
            }
            if let Some(marker) = self.grid.marker_at(cell) {
                things.push(ThingRecord {
                    x: local.x,
                    y: local.y,
                    kind: ThingRecordKind::Marker,
                    detail: marker.name().to_string(),
                });
            }
            let cell_terrain = self.grid.terrain_at(cell);
            if cell_terrain != Terrain::Empty {
                terrain
                    .entry(cell_terrain.name().to_string())
                    .or_default()
                    .push(local);
            }
        }
        things.sort();
        attached.sort();
        for positions in terrain.values_mut() {
            positions.sort();
        }

        Some(StepPercept {
            step: self.step,
            score: self
                .teams
                .get(&state.team_name)
                .map_or(0, |team| team.score),
            things,
            terrain,
            tasks: open_tasks.to_vec(),
            energy: state.energy,
            disabled: state.is_disabled(),
            last_action: state.last_action.clone(),
            last_action_params: state.last_action_params.clone(),
            last_action_result: state.last_action_result.clone(),
            attached,
        })
    }

    /// Final percepts: team score plus 1-based rank, higher score first,
    /// ties broken by team name order.
    #[must_use]
    pub fn final_percepts(&self) -> BTreeMap<String, FinalPercept> {
        let mut ordered: Vec<(&String, u64)> = self
            .teams
            .iter()
            .map(|(name, team)| (name, team.score))
            .collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1));
        let ranks: BTreeMap<&str, u32> = ordered
            .iter()
            .enumerate()
            .map(|(index, (name, _))| (name.as_str(), index as u32 + 1))
            .collect();

        self.entities
            .iter()
            .filter_map(|(agent, id)| {
                let state = self.entity_state(*id)?;
                let team = self.teams.get(&state.team_name)?;
                Some((
                    agent.clone(),
                    FinalPercept {
                        score: team.score,
                        rank: ranks.get(state.team_name.as_str()).copied().unwrap_or(0),
                    },
                ))
            })
            .collect()
    }

    /// Whole-world snapshot for the monitor, with stable record order.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let mut entities = Vec::new();
        let mut blocks = Vec::new();
        let mut dispensers = Vec::new();
        for (_, thing) in self.grid.things() {
            match &thing.kind {
                ThingKind::Entity(state) => entities.push(EntityRecord {
                    id: thing.name.clone(),
                    x: thing.position.x,
                    y: thing.position.y,
                    name: state.agent_name.clone(),
                    team: state.team_name.clone(),
                }),
                ThingKind::Block { block_type } => blocks.push(BlockRecord {
                    x: thing.position.x,
                    y: thing.position.y,
                    block_type: block_type.clone(),
                }),
                ThingKind::Dispenser { block_type } => dispensers.push(DispenserRecord {
                    id: thing.name.clone(),
                    x: thing.position.x,
                    y: thing.position.y,
                    block_type: block_type.clone(),
                }),
            }
        }
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        blocks.sort_by(|a, b| (a.x, a.y, &a.block_type).cmp(&(b.x, b.y, &b.block_type)));
        dispensers.sort_by(|a, b| a.id.cmp(&b.id));
        let tasks = self
            .tasks
            .all_tasks()
            .filter(|task| !task.completed)
            .map(TaskRecord::from_task)
            .collect();
        Snapshot {
            entities,
            blocks,
            dispensers,
            tasks,
        }
    }

    /// Final `{team -> {score}}` record.
    #[must_use]
    pub fn result(&self) -> BTreeMap<String, TeamResult> {
        self.teams
            .iter()
            .map(|(name, team)| (name.clone(), TeamResult { score: team.score }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GridSettings, MatchConfig, Terrain};

    fn fixture_config() -> MatchConfig {
        let mut config = MatchConfig {
            random_fail: 0,
            block_types_min: 1,
            block_types_max: 1,
            dispensers_min: 0,
            dispensers_max: 0,
            grid: GridSettings {
                width: 30,
                height: 30,
            },
            rng_seed: Some(99),
            ..MatchConfig::default()
        };
        config.tasks.probability = 0.0;
        config.events.chance = 0;
        config
            .teams
            .insert("A".to_string(), vec!["agentA1".to_string()]);
        config
            .teams
            .insert("B".to_string(), vec!["agentB1".to_string()]);
        config
    }

    fn fixture_world() -> World {
        let mut world = World::new(fixture_config()).expect("world");
        // park both agents on the bottom row, then place the observer
        let bottom = world.config().grid.height as i32 - 1;
        let mut x = 0;
        for agent in ["agentA1", "agentB1"] {
            loop {
                if world.teleport(agent, Position::new(x, bottom)) {
                    x += 1;
                    break;
                }
                x += 1;
            }
        }
        world
    }

    #[test]
    fn initial_percepts_carry_roster_data() {
        let world = fixture_world();
        let percepts = world.initial_percepts();
        let percept = percepts.get("agentA1").expect("percept");
        assert_eq!(percept.team, "A");
        assert_eq!(percept.total_steps, world.config().steps);
        assert_eq!(percept.vision, 5);
    }

    #[test]
    fn step_percept_uses_local_coordinates() {
        let mut world = fixture_world();
        world.teleport("agentA1", Position::new(10, 10));
        world.create_block(Position::new(11, 10), "b0").expect("block");
        world.create_dispenser(Position::new(10, 12), "b0").expect("dispenser");
        world.set_terrain(Position::new(9, 10), Terrain::Goal);

        let percepts = world.step_percepts();
        let percept = percepts.get("agentA1").expect("percept");
        assert!(percept.things.contains(&ThingRecord {
            x: 1,
            y: 0,
            kind: ThingRecordKind::Block,
            detail: "b0".to_string(),
        }));
        assert!(percept.things.contains(&ThingRecord {
            x: 0,
            y: 2,
            kind: ThingRecordKind::Dispenser,
            detail: "b0".to_string(),
        }));
        // the observer sees itself at the origin
        assert!(percept.things.contains(&ThingRecord {
            x: 0,
            y: 0,
            kind: ThingRecordKind::Entity,
            detail: "A".to_string(),
        }));
        assert_eq!(
            percept.terrain.get("goal"),
            Some(&vec![Position::new(-1, 0)])
        );
        assert!(percept.attached.is_empty());
    }

    #[test]
    fn vision_is_a_diamond() {
        let mut world = fixture_world();
        world.teleport("agentA1", Position::new(10, 10));
        // Chebyshev distance 5 but Manhattan distance 10: invisible.
        world.create_block(Position::new(15, 15), "b0").expect("corner");
        // Manhattan distance 5: visible.
        world.create_block(Position::new(13, 12), "b0").expect("edge");

        let percepts = world.step_percepts();
        let percept = percepts.get("agentA1").expect("percept");
        let blocks: Vec<&ThingRecord> = percept
            .things
            .iter()
            .filter(|record| record.kind == ThingRecordKind::Block)
            .collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!((blocks[0].x, blocks[0].y), (3, 2));
    }

    #[test]
    fn attached_marks_opponent_structures() {
        let mut world = fixture_world();
        world.teleport("agentB1", Position::new(20, 20));
        world.create_block(Position::new(20, 21), "b0").expect("block");
        assert!(world.attach_at(Position::new(20, 20), Position::new(20, 21)));
        world.teleport("agentA1", Position::new(20, 18));

        let percepts = world.step_percepts();
        let percept = percepts.get("agentA1").expect("percept");
        // The block is held by an opposing entity; the entity itself is
        // only attached to a block, which does not count.
        assert_eq!(percept.attached, vec![Position::new(0, 3)]);
        let own = percepts.get("agentB1").expect("own percept");
        // From the owner's side nothing is attached to an opponent.
        assert!(own.attached.is_empty());
    }

    #[test]
    fn snapshot_is_sorted_and_omits_completed_tasks() {
        let mut world = fixture_world();
        world.create_block(Position::new(3, 3), "b0").expect("block");
        world.create_block(Position::new(2, 2), "b0").expect("block");
        let mut requirements = std::collections::BTreeMap::new();
        requirements.insert(Position::new(0, 1), "b0".to_string());
        world.create_task("done", 10, requirements.clone());
        world.create_task("open", 10, requirements);
        world.tasks.task_mut("done").expect("task").completed = true;

        let snapshot = world.snapshot();
        assert_eq!(snapshot.entities.len(), 2);
        assert!(snapshot.entities.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(snapshot.blocks[0].x, 2, "blocks sorted by position");
        let task_names: Vec<&str> =
            snapshot.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(task_names, vec!["open"]);
    }

    #[test]
    fn final_percepts_rank_higher_scores_first() {
        let mut world = fixture_world();
        world.teams.get_mut("B").expect("team").score = 7;
        let percepts = world.final_percepts();
        assert_eq!(percepts["agentB1"], FinalPercept { score: 7, rank: 1 });
        assert_eq!(percepts["agentA1"], FinalPercept { score: 0, rank: 2 });

        // Ties fall back to team insertion order.
        world.teams.get_mut("A").expect("team").score = 7;
        let tied = world.final_percepts();
        assert_eq!(tied["agentA1"].rank, 1);
        assert_eq!(tied["agentB1"].rank, 2);
    }

    #[test]
    fn result_lists_every_team_score() {
        let mut world = fixture_world();
        world.teams.get_mut("A").expect("team").score = 4;
        let result = world.result();
        assert_eq!(result["A"].score, 4);
        assert_eq!(result["B"].score, 0);
    }
}
