//! Root aggregate: step preparation, clear events, and action handlers.

use crate::actions::{Action, ActionResult};
use crate::geom::{Area, Direction, Position, Rotation};
use crate::grid::{Grid, MarkerKind, Terrain};
use crate::setup::SetupCommand;
use crate::task::{Task, TaskBoard};
use crate::things::{EntityState, Thing, ThingId};
use crate::{MatchConfig, StepPercept, WorldError};
use rand::rngs::SmallRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// A scheduled area devastation with a warning period.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearEvent {
    pub center: Position,
    pub fire_step: u64,
    pub radius: u32,
}

/// A competing team and its accumulated score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Team {
    pub name: String,
    pub score: u64,
}

/// The complete simulation state. All mutation goes through
/// [`World::prepare_step`], the action API, and the admin operations;
/// percepts and snapshots read the state back as plain records.
pub struct World {
    pub(crate) config: MatchConfig,
    pub(crate) step: u64,
    pub(crate) grid: Grid,
    pub(crate) rng: SmallRng,
    pub(crate) block_types: Vec<String>,
    pub(crate) teams: BTreeMap<String, Team>,
    /// Agent name to entity handle.
    pub(crate) entities: BTreeMap<String, ThingId>,
    pub(crate) tasks: TaskBoard,
    pub(crate) events: Vec<ClearEvent>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("step", &self.step)
            .field("entities", &self.entities.len())
            .field("teams", &self.teams.len())
            .field("pending_events", &self.events.len())
            .finish()
    }
}

impl World {
    /// Build a world on all-empty terrain.
    pub fn new(config: MatchConfig) -> Result<Self, WorldError> {
        Self::with_terrain(config, |_, _| Terrain::Empty)
    }

    /// Build a world, consulting `terrain` once per cell. Bitmap or file
    /// decoding is the caller's business; the engine only sees the callback.
    pub fn with_terrain(
        config: MatchConfig,
        terrain: impl Fn(u32, u32) -> Terrain,
    ) -> Result<Self, WorldError> {
        config.validate()?;
        let mut rng = config.seeded_rng();
        let mut grid = Grid::new(
            config.grid.width,
            config.grid.height,
            config.attach_limit,
            terrain,
        );

        let type_count = rng.random_range(config.block_types_min..=config.block_types_max);
        let block_types: Vec<String> = (0..type_count).map(|i| format!("b{i}")).collect();

        let mut teams = BTreeMap::new();
        let mut entities = BTreeMap::new();
        for (team_name, roster) in &config.teams {
            teams.insert(
                team_name.clone(),
                Team {
                    name: team_name.clone(),
                    score: 0,
                },
            );
            for agent in roster {
                let position = grid
                    .random_free_position(&mut rng)
                    .ok_or(WorldError::InvalidConfig("no free cell left for an entity"))?;
                let id = grid.add_entity(
                    position,
                    agent,
                    team_name,
                    config.max_energy,
                    config.entity_vision,
                );
                entities.insert(agent.clone(), id);
            }
        }

        for block_type in &block_types {
            let count = rng.random_range(config.dispensers_min..=config.dispensers_max);
            for _ in 0..count {
                match grid.random_free_position(&mut rng) {
                    Some(position) => {
                        grid.add_dispenser(position, block_type);
                    }
                    None => warn!(
                        block_type = block_type.as_str(),
                        "no free cell left for a dispenser"
                    ),
                }
            }
        }

        let mut world = Self {
            step: 0,
            grid,
            rng,
            block_types,
            teams,
            entities,
            tasks: TaskBoard::new(),
            events: Vec::new(),
            config,
        };
        let setup = world.config.setup.clone();
        world.apply_setup(&setup);
        Ok(world)
    }

    /// Apply setup DSL lines. Bad lines are logged and skipped; setup
    /// never aborts.
    pub fn apply_setup(&mut self, lines: &[String]) {
        for line in lines {
            match SetupCommand::parse(line) {
                Ok(None) => {}
                Ok(Some(command)) => self.apply_setup_command(command),
                Err(err) => warn!(line = line.as_str(), %err, "skipping setup line"),
            }
        }
    }

    fn apply_setup_command(&mut self, command: SetupCommand) {
        match command {
            SetupCommand::Move { position, agent } => {
                let Some(id) = self.entities.get(&agent).copied() else {
                    warn!(agent = agent.as_str(), "setup move: unknown agent");
                    return;
                };
                if !self.grid.move_without_attachments(id, position) {
                    warn!(agent = agent.as_str(), ?position, "setup move: cell blocked");
                }
            }
            SetupCommand::AddBlock {
                position,
                block_type,
            } => {
                if self.create_block(position, &block_type).is_none() {
                    warn!(
                        ?position,
                        block_type = block_type.as_str(),
                        "setup add block failed"
                    );
                }
            }
            SetupCommand::AddDispenser {
                position,
                block_type,
            } => {
                if self.create_dispenser(position, &block_type).is_none() {
                    warn!(
                        ?position,
                        block_type = block_type.as_str(),
                        "setup add dispenser failed"
                    );
                }
            }
            SetupCommand::CreateTask {
                name,
                duration,
                requirements,
            } => {
                if self
                    .tasks
                    .create_custom(&name, self.step, duration, requirements)
                    .is_none()
                {
                    warn!(name = name.as_str(), "setup create task failed");
                }
            }
            SetupCommand::Attach { first, second } => {
                if !self.attach_at(first, second) {
                    warn!(?first, ?second, "setup attach failed");
                }
            }
        }
    }

    /// Open a new step: wipe markers, maybe spawn a task, run entity
    /// upkeep, maybe schedule a clear event, fire or announce pending
    /// events, then assemble percepts. The RNG draw order here is fixed;
    /// identical seeds and actions replay bit-identically.
    pub fn prepare_step(&mut self, step: u64) -> BTreeMap<String, StepPercept> {
        self.step = step;
        self.grid.clear_markers();

        if self.rng.random::<f64>() < self.config.tasks.probability {
            let duration = self
                .rng
                .random_range(self.config.tasks.duration_min..=self.config.tasks.duration_max);
            let size = self
                .rng
                .random_range(self.config.tasks.size_min..=self.config.tasks.size_max);
            self.tasks
                .create_random(&mut self.rng, step, duration, size, &self.block_types);
        }

        let ids: Vec<ThingId> = self.entities.values().copied().collect();
        for id in ids {
            if let Some(state) = self.grid.thing_mut(id).and_then(Thing::entity_mut) {
                state.pre_step(self.config.energy_recharge, self.config.max_energy);
            }
        }

        if self.rng.random_range(0..100) < self.config.events.chance {
            let center = self.grid.random_position(&mut self.rng);
            let radius = self
                .rng
                .random_range(self.config.events.radius_min..=self.config.events.radius_max);
            self.events.push(ClearEvent {
                center,
                fire_step: step + self.config.events.warning,
                radius,
            });
        }

        let pending = std::mem::take(&mut self.events);
        let mut remaining = Vec::with_capacity(pending.len());
        for event in pending {
            if event.fire_step == step {
                self.process_event(&event);
            } else {
                for position in Area::new(event.center, event.radius as i32) {
                    self.grid.create_marker(position, MarkerKind::Clear);
                }
                remaining.push(event);
            }
        }
        self.events = remaining;

        self.step_percepts()
    }

    /// Detonate an event: clear the area, then strew obstacles over the
    /// widened surroundings, one per removed block or obstacle plus a
    /// random bonus. Placement ignores occupancy on purpose.
    fn process_event(&mut self, event: &ClearEvent) {
        let removed = self.clear_area(event.center, event.radius as i32);
        let extra = self
            .rng
            .random_range(self.config.events.create_min..=self.config.events.create_max);
        for _ in 0..extra + removed {
            let position = self.grid.random_position_within(
                &mut self.rng,
                event.center,
                event.radius as i32 + 3,
            );
            if self.grid.in_bounds(position) {
                self.grid.set_terrain(position, Terrain::Obstacle);
            }
        }
    }

    /// Devastate the diamond around `center`: disable entities, delete
    /// blocks, flatten obstacles. Returns how many blocks and obstacles
    /// were removed.
    pub fn clear_area(&mut self, center: Position, radius: i32) -> u32 {
        let mut removed = 0;
        for position in Area::new(center, radius) {
            let occupants: Vec<ThingId> = self.grid.things_at(position).to_vec();
            for id in occupants {
                let Some(thing) = self.grid.thing(id) else {
                    continue;
                };
                if thing.is_entity() {
                    self.disable_entity(id);
                } else if thing.is_block() {
                    self.grid.remove_thing(id);
                    removed += 1;
                }
            }
            if self.grid.terrain_at(position) == Terrain::Obstacle {
                self.grid.set_terrain(position, Terrain::Empty);
                removed += 1;
            }
        }
        removed
    }

    /// Knock an entity out: drop its attachments, start the disabled
    /// countdown, and relocate it to a random free cell.
    fn disable_entity(&mut self, id: ThingId) {
        self.grid.detach_all(id);
        if let Some(state) = self.grid.thing_mut(id).and_then(Thing::entity_mut) {
            state.disabled_for_steps = self.config.disable_duration;
        }
        match self.grid.random_free_position(&mut self.rng) {
            Some(position) => {
                self.grid.move_without_attachments(id, position);
            }
            None => warn!("no free cell to relocate a disabled entity"),
        }
    }

    /// Execute one agent's action against the shared state, recording the
    /// action, its parameters, and its result on the entity.
    pub fn execute_action(
        &mut self,
        agent: &str,
        action: &Action,
    ) -> Result<ActionResult, WorldError> {
        let id = *self
            .entities
            .get(agent)
            .ok_or_else(|| WorldError::UnknownAgent(agent.to_string()))?;
        if let Some(state) = self.grid.thing_mut(id).and_then(Thing::entity_mut) {
            state.last_action = action.name().to_string();
            state.last_action_params = action.params();
        }
        let result = self.perform_action(id, action);
        if let Some(state) = self.grid.thing_mut(id).and_then(Thing::entity_mut) {
            state.last_action_result = result.as_str().to_string();
        }
        Ok(result)
    }

    /// Dispatch a batch of actions in lexicographic agent order, the
    /// deterministic order of the turn-serialized model. Later actions
    /// observe the effects of earlier ones.
    pub fn dispatch_actions(
        &mut self,
        actions: &BTreeMap<String, Action>,
    ) -> BTreeMap<String, ActionResult> {
        let mut results = BTreeMap::new();
        for (agent, action) in actions {
            match self.execute_action(agent, action) {
                Ok(result) => {
                    results.insert(agent.clone(), result);
                }
                Err(err) => warn!(%err, "dropping action"),
            }
        }
        results
    }

    fn perform_action(&mut self, id: ThingId, action: &Action) -> ActionResult {
        if self.entity_state(id).is_none_or(EntityState::is_disabled) {
            return ActionResult::FailedStatus;
        }
        if self.rng.random_range(0..100) < self.config.random_fail {
            return ActionResult::FailedRandom;
        }
        match action {
            Action::Move(direction) => self.handle_move(id, *direction),
            Action::Rotate(rotation) => self.handle_rotate(id, *rotation),
            Action::Attach(direction) => self.handle_attach(id, *direction),
            Action::Detach(direction) => self.handle_detach(id, *direction),
            Action::Connect {
                block,
                partner,
                partner_block,
            } => self.handle_connect(id, *block, partner, *partner_block),
            Action::Request(direction) => self.handle_request(id, *direction),
            Action::Submit { task } => self.handle_submit(id, task),
            Action::Clear { target } => self.handle_clear(id, *target),
            Action::Skip => ActionResult::Success,
        }
    }

    fn handle_move(&mut self, id: ThingId, direction: Direction) -> ActionResult {
        if self.grid.move_with_attached(id, direction, 1) {
            ActionResult::Success
        } else {
            ActionResult::FailedPath
        }
    }

    fn handle_rotate(&mut self, id: ThingId, rotation: Rotation) -> ActionResult {
        if self.grid.rotate_with_attached(id, rotation) {
            ActionResult::Success
        } else {
            ActionResult::Failed
        }
    }

    fn handle_attach(&mut self, id: ThingId, direction: Direction) -> ActionResult {
        let Some(position) = self.thing_position(id) else {
            return ActionResult::Failed;
        };
        let target = position.moved(direction, 1);
        let Some(other) = self.grid.unique_attachable_at(target) else {
            return ActionResult::FailedTarget;
        };
        let team = self.entity_team(id);
        if let Some(other_state) = self.entity_state(other) {
            if other_state.team_name != team {
                return ActionResult::FailedTarget;
            }
        }
        if self.attached_to_opponent(other, &team) {
            return ActionResult::Failed;
        }
        if self.grid.attach(id, other) {
            ActionResult::Success
        } else {
            ActionResult::Failed
        }
    }

    fn handle_detach(&mut self, id: ThingId, direction: Direction) -> ActionResult {
        let Some(position) = self.thing_position(id) else {
            return ActionResult::Failed;
        };
        let target = position.moved(direction, 1);
        let Some(other) = self.grid.unique_attachable_at(target) else {
            return ActionResult::FailedTarget;
        };
        let team = self.entity_team(id);
        if let Some(other_state) = self.entity_state(other) {
            if other_state.team_name != team {
                return ActionResult::FailedTarget;
            }
        }
        if self.grid.detach(id, other) {
            ActionResult::Success
        } else {
            ActionResult::Failed
        }
    }

    fn handle_connect(
        &mut self,
        id: ThingId,
        block: Position,
        partner: &str,
        partner_block: Position,
    ) -> ActionResult {
        let Some(partner_id) = self.entities.get(partner).copied() else {
            return ActionResult::FailedTarget;
        };
        let (Some(position), Some(partner_position)) =
            (self.thing_position(id), self.thing_position(partner_id))
        else {
            return ActionResult::FailedTarget;
        };
        let Some(own_block) = self.grid.unique_attachable_at(block.to_global(position)) else {
            return ActionResult::FailedTarget;
        };
        let Some(other_block) = self
            .grid
            .unique_attachable_at(partner_block.to_global(partner_position))
        else {
            return ActionResult::FailedTarget;
        };
        let blocks_only = self.grid.thing(own_block).is_some_and(Thing::is_block)
            && self.grid.thing(other_block).is_some_and(Thing::is_block);
        if !blocks_only {
            return ActionResult::FailedTarget;
        }

        let group = self.grid.collect_group(id);
        if group.contains(&partner_id) {
            return ActionResult::Failed;
        }
        if !group.contains(&own_block) || group.contains(&other_block) {
            return ActionResult::FailedTarget;
        }
        let partner_group = self.grid.collect_group(partner_id);
        if !partner_group.contains(&other_block) || partner_group.contains(&own_block) {
            return ActionResult::FailedTarget;
        }

        if self.grid.attach(own_block, other_block) {
            ActionResult::Success
        } else {
            ActionResult::Failed
        }
    }

    fn handle_request(&mut self, id: ThingId, direction: Direction) -> ActionResult {
        let Some(position) = self.thing_position(id) else {
            return ActionResult::Failed;
        };
        let target = position.moved(direction, 1);
        let Some(dispenser) = self.grid.dispenser_at(target) else {
            return ActionResult::FailedTarget;
        };
        if !self.grid.is_unblocked(target) {
            return ActionResult::FailedBlocked;
        }
        let block_type = self
            .grid
            .thing(dispenser)
            .and_then(|thing| thing.block_type())
            .unwrap_or_default()
            .to_string();
        match self.grid.add_block(target, &block_type) {
            Some(_) => ActionResult::Success,
            None => ActionResult::Failed,
        }
    }

    fn handle_submit(&mut self, id: ThingId, task_name: &str) -> ActionResult {
        let Some(position) = self.thing_position(id) else {
            return ActionResult::Failed;
        };
        let (requirements, reward) = match self.tasks.task(task_name) {
            Some(task) if !task.completed => (task.requirements.clone(), task.reward),
            _ => return ActionResult::FailedTarget,
        };
        if self.grid.terrain_at(position) != Terrain::Goal {
            return ActionResult::Failed;
        }

        let group = self.grid.collect_group(id);
        let mut delivered = Vec::with_capacity(requirements.len());
        for (offset, required_type) in &requirements {
            let check = offset.to_global(position);
            let Some(candidate) = self.grid.unique_attachable_at(check) else {
                return ActionResult::Failed;
            };
            let matches = self
                .grid
                .thing(candidate)
                .is_some_and(|thing| thing.block_type() == Some(required_type.as_str()));
            if !matches || !group.contains(&candidate) {
                return ActionResult::Failed;
            }
            delivered.push(candidate);
        }

        for block in delivered {
            self.grid.remove_thing(block);
        }
        let team = self.entity_team(id);
        if let Some(team) = self.teams.get_mut(&team) {
            team.score += reward;
        }
        if let Some(task) = self.tasks.task_mut(task_name) {
            task.completed = true;
        }
        ActionResult::Success
    }

    fn handle_clear(&mut self, id: ThingId, local_target: Position) -> ActionResult {
        let Some(position) = self.thing_position(id) else {
            return ActionResult::Failed;
        };
        let (vision, energy) = match self.entity_state(id) {
            Some(state) => (state.vision, state.energy),
            None => return ActionResult::Failed,
        };
        let target = local_target.to_global(position);
        if position.distance_to(target) > vision as i32 || !self.grid.in_bounds(target) {
            return ActionResult::FailedTarget;
        }
        if energy < self.config.clear_energy_cost {
            return ActionResult::FailedStatus;
        }

        let step = self.step;
        let counter = self
            .grid
            .thing_mut(id)
            .and_then(Thing::entity_mut)
            .map_or(0, |state| state.bump_clear_counter(step, target));
        if counter == self.config.clear_steps {
            self.clear_area(target, 1);
            let cost = self.config.clear_energy_cost;
            if let Some(state) = self.grid.thing_mut(id).and_then(Thing::entity_mut) {
                state.consume_energy(cost);
                state.reset_clear_counter();
            }
        } else {
            for cell in Area::new(target, 1) {
                self.grid.create_marker(cell, MarkerKind::Clear);
            }
        }
        if let Some(state) = self.grid.thing_mut(id).and_then(Thing::entity_mut) {
            state.record_clear(step, target);
        }
        ActionResult::Success
    }

    /// True when `id`'s attachment group contains an entity, other than
    /// `id` itself, from a team other than `team`.
    pub(crate) fn attached_to_opponent(&self, id: ThingId, team: &str) -> bool {
        self.grid.collect_group(id).iter().any(|member| {
            *member != id
                && self
                    .entity_state(*member)
                    .is_some_and(|state| state.team_name != team)
        })
    }

    pub(crate) fn entity_state(&self, id: ThingId) -> Option<&EntityState> {
        self.grid.thing(id).and_then(Thing::entity)
    }

    fn entity_team(&self, id: ThingId) -> String {
        self.entity_state(id)
            .map(|state| state.team_name.clone())
            .unwrap_or_default()
    }

    fn thing_position(&self, id: ThingId) -> Option<Position> {
        self.grid.thing(id).map(|thing| thing.position)
    }

    // ---- creation and admin operations -------------------------------

    /// Create a block of a known type; fails on unknown types and
    /// blocked cells.
    pub fn create_block(&mut self, position: Position, block_type: &str) -> Option<ThingId> {
        if !self.block_types.iter().any(|known| known == block_type) {
            warn!(block_type, "cannot create block of unknown type");
            return None;
        }
        self.grid.add_block(position, block_type)
    }

    /// Create a dispenser of a known type on an unblocked cell.
    pub fn create_dispenser(&mut self, position: Position, block_type: &str) -> Option<ThingId> {
        if !self.block_types.iter().any(|known| known == block_type) {
            warn!(block_type, "cannot create dispenser of unknown type");
            return None;
        }
        if !self.grid.is_unblocked(position) {
            return None;
        }
        self.grid.add_dispenser(position, block_type)
    }

    /// Register a custom task, as the setup DSL does.
    pub fn create_task(
        &mut self,
        name: &str,
        duration: u64,
        requirements: BTreeMap<Position, String>,
    ) -> Option<&Task> {
        self.tasks.create_custom(name, self.step, duration, requirements)
    }

    /// Teleport an entity to an unblocked cell, attachments left behind.
    pub fn teleport(&mut self, agent: &str, target: Position) -> bool {
        let Some(id) = self.entities.get(agent).copied() else {
            return false;
        };
        self.grid.move_without_attachments(id, target)
    }

    /// Overwrite terrain at a position; out-of-bounds writes are dropped.
    pub fn set_terrain(&mut self, position: Position, terrain: Terrain) {
        self.grid.set_terrain(position, terrain);
    }

    /// Enqueue a clear event, as the per-step scheduler does.
    pub fn schedule_event(&mut self, event: ClearEvent) {
        self.events.push(event);
    }

    /// Attach the unique attachables at two positions.
    pub fn attach_at(&mut self, first: Position, second: Position) -> bool {
        let (Some(a), Some(b)) = (
            self.grid.unique_attachable_at(first),
            self.grid.unique_attachable_at(second),
        ) else {
            return false;
        };
        self.grid.attach(a, b)
    }

    // ---- read access -------------------------------------------------

    /// Current step.
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// Borrow the configuration.
    #[must_use]
    pub const fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Borrow the grid for inspection.
    #[must_use]
    pub const fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Generated block type roster.
    #[must_use]
    pub fn block_types(&self) -> &[String] {
        &self.block_types
    }

    /// Score of a team.
    #[must_use]
    pub fn team_score(&self, team: &str) -> Option<u64> {
        self.teams.get(team).map(|team| team.score)
    }

    /// Entity state of an agent.
    #[must_use]
    pub fn entity(&self, agent: &str) -> Option<&EntityState> {
        self.entities
            .get(agent)
            .and_then(|id| self.entity_state(*id))
    }

    /// Current position of an agent's entity.
    #[must_use]
    pub fn entity_position(&self, agent: &str) -> Option<Position> {
        self.entities
            .get(agent)
            .and_then(|id| self.thing_position(*id))
    }

    /// Borrow a task by name.
    #[must_use]
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.task(name)
    }

    /// Pending clear events, in schedule order.
    #[must_use]
    pub fn pending_events(&self) -> &[ClearEvent] {
        &self.events
    }
}
