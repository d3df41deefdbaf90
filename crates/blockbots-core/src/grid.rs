//! Terrain grid, thing arena, attachment graph, and rigid-body operations.

use crate::geom::{Area, Direction, Position, Rotation};
use crate::things::{EntityState, Thing, ThingId, ThingKind};
use rand::rngs::SmallRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Terrain of a single cell.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Terrain {
    #[default]
    Empty,
    Obstacle,
    Goal,
}

impl Terrain {
    /// Lowercase terrain name used in percepts.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Obstacle => "obstacle",
            Self::Goal => "goal",
        }
    }
}

/// Transient cell overlay repainted every step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Clear,
}

impl MarkerKind {
    /// Lowercase marker name used in percepts.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Clear => "clear",
        }
    }
}

/// Upper bound on rejection-sampling attempts before falling back to a scan.
const FREE_POSITION_ATTEMPTS: u32 = 10_000;

/// Fixed-size terrain grid plus the arena of positioned things and the
/// attachment graph connecting entities and blocks into rigid groups.
#[derive(Debug)]
pub struct Grid {
    width: u32,
    height: u32,
    attach_limit: usize,
    terrain: Vec<Terrain>,
    markers: BTreeMap<Position, MarkerKind>,
    things: SlotMap<ThingId, Thing>,
    /// Occupancy index over entities and blocks. Dispensers never block and
    /// are tracked separately.
    cells: HashMap<Position, Vec<ThingId>>,
    dispensers: HashMap<Position, ThingId>,
    attachments: SecondaryMap<ThingId, BTreeSet<ThingId>>,
    next_entity: u32,
    next_block: u32,
    next_dispenser: u32,
}

impl Grid {
    /// Build a grid, consulting `terrain` once per cell.
    pub fn new(
        width: u32,
        height: u32,
        attach_limit: usize,
        terrain: impl Fn(u32, u32) -> Terrain,
    ) -> Self {
        let mut cells = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                cells.push(terrain(x, y));
            }
        }
        Self {
            width,
            height,
            attach_limit,
            terrain: cells,
            markers: BTreeMap::new(),
            things: SlotMap::with_key(),
            cells: HashMap::new(),
            dispensers: HashMap::new(),
            attachments: SecondaryMap::new(),
            next_entity: 0,
            next_block: 0,
            next_dispenser: 0,
        }
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Returns true if `position` lies on the grid.
    #[must_use]
    pub const fn in_bounds(&self, position: Position) -> bool {
        position.x >= 0
            && position.y >= 0
            && (position.x as u32) < self.width
            && (position.y as u32) < self.height
    }

    #[inline]
    const fn offset(&self, position: Position) -> usize {
        (position.y as usize) * (self.width as usize) + (position.x as usize)
    }

    /// Terrain at `position`. Out-of-bounds cells read as [`Terrain::Empty`].
    #[must_use]
    pub fn terrain_at(&self, position: Position) -> Terrain {
        if self.in_bounds(position) {
            self.terrain[self.offset(position)]
        } else {
            Terrain::Empty
        }
    }

    /// Set terrain at `position`. Out-of-bounds writes are dropped.
    pub fn set_terrain(&mut self, position: Position, terrain: Terrain) {
        if self.in_bounds(position) {
            let offset = self.offset(position);
            self.terrain[offset] = terrain;
        }
    }

    /// Paint a marker at `position`; dropped when out of bounds.
    pub fn create_marker(&mut self, position: Position, kind: MarkerKind) {
        if self.in_bounds(position) {
            self.markers.insert(position, kind);
        }
    }

    /// Remove all markers (top of every step).
    pub fn clear_markers(&mut self) {
        self.markers.clear();
    }

    /// Marker at `position`, if any.
    #[must_use]
    pub fn marker_at(&self, position: Position) -> Option<MarkerKind> {
        self.markers.get(&position).copied()
    }

    /// Borrow a thing by handle.
    #[must_use]
    pub fn thing(&self, id: ThingId) -> Option<&Thing> {
        self.things.get(id)
    }

    /// Mutably borrow a thing by handle.
    pub fn thing_mut(&mut self, id: ThingId) -> Option<&mut Thing> {
        self.things.get_mut(id)
    }

    /// Iterate over all live things.
    pub fn things(&self) -> impl Iterator<Item = (ThingId, &Thing)> {
        self.things.iter()
    }

    /// Entities and blocks occupying `position`, in insertion order.
    #[must_use]
    pub fn things_at(&self, position: Position) -> &[ThingId] {
        self.cells.get(&position).map_or(&[], Vec::as_slice)
    }

    /// The sole entity or block at `position`, or `None` when the cell
    /// holds zero or several.
    #[must_use]
    pub fn unique_attachable_at(&self, position: Position) -> Option<ThingId> {
        match self.things_at(position) {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// Dispenser at `position`, if any.
    #[must_use]
    pub fn dispenser_at(&self, position: Position) -> Option<ThingId> {
        self.dispensers.get(&position).copied()
    }

    /// A cell is unblocked when it is on the grid, not an obstacle, and
    /// free of entities and blocks. Dispensers do not block.
    #[must_use]
    pub fn is_unblocked(&self, position: Position) -> bool {
        self.in_bounds(position)
            && self.terrain_at(position) != Terrain::Obstacle
            && self.things_at(position).is_empty()
    }

    /// Spawn an entity at `position`, returning its handle.
    pub fn add_entity(
        &mut self,
        position: Position,
        agent_name: &str,
        team_name: &str,
        energy: u32,
        vision: u32,
    ) -> ThingId {
        let name = format!("e{}", self.next_entity);
        self.next_entity += 1;
        let id = self.things.insert(Thing {
            name,
            position,
            kind: ThingKind::Entity(EntityState::new(agent_name, team_name, energy, vision)),
        });
        self.cells.entry(position).or_default().push(id);
        id
    }

    /// Create a block at `position`; fails when the cell is blocked.
    pub fn add_block(&mut self, position: Position, block_type: &str) -> Option<ThingId> {
        if !self.is_unblocked(position) {
            return None;
        }
        let name = format!("b{}", self.next_block);
        self.next_block += 1;
        let id = self.things.insert(Thing {
            name,
            position,
            kind: ThingKind::Block {
                block_type: block_type.to_string(),
            },
        });
        self.cells.entry(position).or_default().push(id);
        Some(id)
    }

    /// Create a dispenser at `position`; at most one per cell.
    pub fn add_dispenser(&mut self, position: Position, block_type: &str) -> Option<ThingId> {
        if self.dispensers.contains_key(&position) {
            return None;
        }
        let name = format!("d{}", self.next_dispenser);
        self.next_dispenser += 1;
        let id = self.things.insert(Thing {
            name,
            position,
            kind: ThingKind::Dispenser {
                block_type: block_type.to_string(),
            },
        });
        self.dispensers.insert(position, id);
        Some(id)
    }

    /// Remove a thing from the arena, its cell, and the attachment graph.
    pub fn remove_thing(&mut self, id: ThingId) -> Option<Thing> {
        let thing = self.things.remove(id)?;
        match thing.kind {
            ThingKind::Dispenser { .. } => {
                self.dispensers.remove(&thing.position);
            }
            _ => {
                if let Some(cell) = self.cells.get_mut(&thing.position) {
                    cell.retain(|other| *other != id);
                    if cell.is_empty() {
                        self.cells.remove(&thing.position);
                    }
                }
            }
        }
        if let Some(neighbors) = self.attachments.remove(id) {
            for neighbor in neighbors {
                if let Some(back) = self.attachments.get_mut(neighbor) {
                    back.remove(&id);
                }
            }
        }
        Some(thing)
    }

    /// Attach two attachables. Requires adjacency (Chebyshev distance 1)
    /// and a combined group no larger than the attach limit.
    pub fn attach(&mut self, a: ThingId, b: ThingId) -> bool {
        if a == b {
            return false;
        }
        let (Some(thing_a), Some(thing_b)) = (self.things.get(a), self.things.get(b)) else {
            return false;
        };
        if !thing_a.is_attachable() || !thing_b.is_attachable() {
            return false;
        }
        if thing_a.position.distance_to(thing_b.position) != 1 {
            return false;
        }
        let mut combined = self.collect_group(a);
        combined.extend(self.collect_group(b));
        if combined.len() > self.attach_limit {
            return false;
        }
        if let Some(entry) = self.attachments.entry(a) {
            entry.or_insert_with(BTreeSet::new).insert(b);
        }
        if let Some(entry) = self.attachments.entry(b) {
            entry.or_insert_with(BTreeSet::new).insert(a);
        }
        true
    }

    /// Remove the edge between two attachables; fails when absent.
    pub fn detach(&mut self, a: ThingId, b: ThingId) -> bool {
        let present = self
            .attachments
            .get(a)
            .is_some_and(|neighbors| neighbors.contains(&b));
        if !present {
            return false;
        }
        if let Some(neighbors) = self.attachments.get_mut(a) {
            neighbors.remove(&b);
        }
        if let Some(neighbors) = self.attachments.get_mut(b) {
            neighbors.remove(&a);
        }
        true
    }

    /// Drop every attachment edge touching `id`.
    pub fn detach_all(&mut self, id: ThingId) {
        if let Some(neighbors) = self.attachments.remove(id) {
            for neighbor in neighbors {
                if let Some(back) = self.attachments.get_mut(neighbor) {
                    back.remove(&id);
                }
            }
        }
    }

    /// Connected component of `id` in the attachment graph, including `id`.
    #[must_use]
    pub fn collect_group(&self, id: ThingId) -> BTreeSet<ThingId> {
        let mut group = BTreeSet::new();
        if !self.things.contains_key(id) {
            return group;
        }
        let mut queue = VecDeque::from([id]);
        group.insert(id);
        while let Some(current) = queue.pop_front() {
            if let Some(neighbors) = self.attachments.get(current) {
                for neighbor in neighbors {
                    if group.insert(*neighbor) {
                        queue.push_back(*neighbor);
                    }
                }
            }
        }
        group
    }

    /// Translate `id`'s rigid group by `distance` cells in `direction`.
    /// Validates every target cell before committing; the spatial index is
    /// updated remove-all-then-insert-all so the group never collides with
    /// itself.
    pub fn move_with_attached(
        &mut self,
        id: ThingId,
        direction: Direction,
        distance: i32,
    ) -> bool {
        let group = self.collect_group(id);
        if group.is_empty() || group.len() > self.attach_limit {
            return false;
        }
        let (dx, dy) = direction.offset();
        let targets: Vec<(ThingId, Position)> = group
            .iter()
            .map(|member| {
                let position = self.things[*member].position;
                (*member, position.translate(dx * distance, dy * distance))
            })
            .collect();
        if !self.group_can_occupy(&group, &targets) {
            return false;
        }
        self.commit_moves(&targets);
        true
    }

    /// Rotate `id`'s rigid group a quarter turn around `id`'s position.
    pub fn rotate_with_attached(&mut self, id: ThingId, rotation: Rotation) -> bool {
        let group = self.collect_group(id);
        if group.is_empty() || group.len() > self.attach_limit {
            return false;
        }
        let pivot = self.things[id].position;
        let targets: Vec<(ThingId, Position)> = group
            .iter()
            .map(|member| {
                let position = self.things[*member].position;
                (*member, position.rotated_around(pivot, rotation))
            })
            .collect();
        if !self.group_can_occupy(&group, &targets) {
            return false;
        }
        self.commit_moves(&targets);
        true
    }

    /// Teleport a single entity or block to an unblocked cell, leaving
    /// its attachments untouched.
    pub fn move_without_attachments(&mut self, id: ThingId, target: Position) -> bool {
        if !self.things.get(id).is_some_and(Thing::is_attachable) || !self.is_unblocked(target) {
            return false;
        }
        self.commit_moves(&[(id, target)]);
        true
    }

    fn group_can_occupy(&self, group: &BTreeSet<ThingId>, targets: &[(ThingId, Position)]) -> bool {
        targets.iter().all(|(_, target)| {
            self.in_bounds(*target)
                && self.terrain_at(*target) != Terrain::Obstacle
                && self
                    .things_at(*target)
                    .iter()
                    .all(|occupant| group.contains(occupant))
        })
    }

    /// Two-phase commit: vacate every source cell, then occupy every target.
    fn commit_moves(&mut self, moves: &[(ThingId, Position)]) {
        for (id, _) in moves {
            let position = self.things[*id].position;
            if let Some(cell) = self.cells.get_mut(&position) {
                cell.retain(|other| other != id);
                if cell.is_empty() {
                    self.cells.remove(&position);
                }
            }
        }
        for (id, target) in moves {
            self.things[*id].position = *target;
            self.cells.entry(*target).or_default().push(*id);
        }
    }

    /// Uniformly random grid position.
    pub fn random_position(&self, rng: &mut SmallRng) -> Position {
        Position::new(
            rng.random_range(0..self.width as i32),
            rng.random_range(0..self.height as i32),
        )
    }

    /// Rejection-samples an unblocked cell, scanning row-major as a last
    /// resort. `None` means the grid has no free cell at all.
    pub fn random_free_position(&self, rng: &mut SmallRng) -> Option<Position> {
        for _ in 0..FREE_POSITION_ATTEMPTS {
            let candidate = self.random_position(rng);
            if self.is_unblocked(candidate) {
                return Some(candidate);
            }
        }
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let candidate = Position::new(x, y);
                if self.is_unblocked(candidate) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Uniform draw from the diamond around `center`. The result may be out
    /// of bounds or occupied; callers check what they care about.
    pub fn random_position_within(
        &self,
        rng: &mut SmallRng,
        center: Position,
        radius: i32,
    ) -> Position {
        let cells: Vec<Position> = Area::new(center, radius.max(0)).into_iter().collect();
        cells[rng.random_range(0..cells.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn empty_grid(width: u32, height: u32, attach_limit: usize) -> Grid {
        Grid::new(width, height, attach_limit, |_, _| Terrain::Empty)
    }

    fn entity_at(grid: &mut Grid, position: Position) -> ThingId {
        grid.add_entity(position, "agentA1", "A", 300, 5)
    }

    #[test]
    fn terrain_reads_empty_out_of_bounds_and_drops_writes() {
        let mut grid = Grid::new(4, 4, 4, |x, y| {
            if x == 1 && y == 1 {
                Terrain::Goal
            } else {
                Terrain::Empty
            }
        });
        assert_eq!(grid.terrain_at(Position::new(1, 1)), Terrain::Goal);
        assert_eq!(grid.terrain_at(Position::new(-1, 0)), Terrain::Empty);
        assert_eq!(grid.terrain_at(Position::new(4, 0)), Terrain::Empty);
        grid.set_terrain(Position::new(9, 9), Terrain::Obstacle);
        assert_eq!(grid.terrain_at(Position::new(9, 9)), Terrain::Empty);
    }

    #[test]
    fn dispensers_do_not_block() {
        let mut grid = empty_grid(5, 5, 4);
        let cell = Position::new(2, 2);
        grid.add_dispenser(cell, "b0").expect("dispenser");
        assert!(grid.is_unblocked(cell));
        grid.add_block(cell, "b0").expect("block on dispenser");
        assert!(!grid.is_unblocked(cell));
        assert!(grid.add_dispenser(cell, "b1").is_none());
    }

    #[test]
    fn unique_attachable_requires_exactly_one() {
        let mut grid = empty_grid(5, 5, 4);
        let cell = Position::new(1, 1);
        assert!(grid.unique_attachable_at(cell).is_none());
        let block = grid.add_block(cell, "b0").expect("block");
        assert_eq!(grid.unique_attachable_at(cell), Some(block));
    }

    #[test]
    fn attach_requires_adjacency_and_limit() {
        let mut grid = empty_grid(8, 8, 3);
        let entity = entity_at(&mut grid, Position::new(2, 2));
        let near = grid.add_block(Position::new(3, 2), "b0").expect("near");
        let far = grid.add_block(Position::new(5, 2), "b0").expect("far");
        assert!(grid.attach(entity, near));
        assert!(!grid.attach(entity, far), "not adjacent");

        let third = grid.add_block(Position::new(2, 3), "b0").expect("third");
        assert!(grid.attach(entity, third));
        let fourth = grid.add_block(Position::new(1, 2), "b0").expect("fourth");
        assert!(!grid.attach(entity, fourth), "limit reached");
        assert_eq!(grid.collect_group(entity).len(), 3);
    }

    #[test]
    fn attach_detach_round_trip_restores_groups() {
        let mut grid = empty_grid(6, 6, 8);
        let entity = entity_at(&mut grid, Position::new(2, 2));
        let block = grid.add_block(Position::new(2, 3), "b0").expect("block");
        let before = grid.collect_group(entity);
        assert!(grid.attach(entity, block));
        assert_eq!(grid.collect_group(entity).len(), 2);
        assert!(grid.detach(entity, block));
        assert_eq!(grid.collect_group(entity), before);
        assert!(!grid.detach(entity, block), "edge already gone");
    }

    #[test]
    fn rigid_pair_moves_and_blocks() {
        let mut grid = empty_grid(6, 6, 8);
        let entity = entity_at(&mut grid, Position::new(2, 3));
        let block = grid.add_block(Position::new(3, 3), "b0").expect("block");
        assert!(grid.attach(entity, block));

        assert!(grid.move_with_attached(entity, Direction::South, 1));
        assert_eq!(grid.thing(entity).unwrap().position, Position::new(2, 4));
        assert_eq!(grid.thing(block).unwrap().position, Position::new(3, 4));

        grid.set_terrain(Position::new(3, 5), Terrain::Obstacle);
        assert!(!grid.move_with_attached(entity, Direction::South, 1));
        assert_eq!(grid.thing(entity).unwrap().position, Position::new(2, 4));
    }

    #[test]
    fn group_does_not_collide_with_itself() {
        let mut grid = empty_grid(6, 6, 8);
        let entity = entity_at(&mut grid, Position::new(2, 2));
        let block = grid.add_block(Position::new(3, 2), "b0").expect("block");
        assert!(grid.attach(entity, block));
        // Moving east puts the entity onto the block's old cell.
        assert!(grid.move_with_attached(entity, Direction::East, 1));
        assert_eq!(grid.thing(entity).unwrap().position, Position::new(3, 2));
        assert_eq!(grid.thing(block).unwrap().position, Position::new(4, 2));
    }

    #[test]
    fn rotation_moves_attached_block_around_pivot() {
        let mut grid = empty_grid(11, 11, 8);
        let entity = entity_at(&mut grid, Position::new(5, 5));
        let block = grid.add_block(Position::new(5, 4), "b0").expect("block");
        assert!(grid.attach(entity, block));

        assert!(grid.rotate_with_attached(entity, Rotation::Clockwise));
        assert_eq!(grid.thing(block).unwrap().position, Position::new(6, 5));
        assert_eq!(grid.thing(entity).unwrap().position, Position::new(5, 5));

        assert!(grid.rotate_with_attached(entity, Rotation::CounterClockwise));
        assert_eq!(grid.thing(block).unwrap().position, Position::new(5, 4));
    }

    #[test]
    fn rotation_fails_into_obstacle() {
        let mut grid = empty_grid(11, 11, 8);
        let entity = entity_at(&mut grid, Position::new(5, 5));
        let block = grid.add_block(Position::new(5, 4), "b0").expect("block");
        assert!(grid.attach(entity, block));
        grid.set_terrain(Position::new(6, 5), Terrain::Obstacle);
        assert!(!grid.rotate_with_attached(entity, Rotation::Clockwise));
        assert_eq!(grid.thing(block).unwrap().position, Position::new(5, 4));
    }

    #[test]
    fn removing_a_thing_strips_its_edges() {
        let mut grid = empty_grid(6, 6, 8);
        let entity = entity_at(&mut grid, Position::new(2, 2));
        let block = grid.add_block(Position::new(2, 3), "b0").expect("block");
        assert!(grid.attach(entity, block));
        grid.remove_thing(block);
        assert_eq!(grid.collect_group(entity).len(), 1);
        assert!(grid.things_at(Position::new(2, 3)).is_empty());
    }

    #[test]
    fn random_free_position_avoids_blocked_cells() {
        let mut grid = Grid::new(3, 3, 4, |x, _| {
            if x == 0 {
                Terrain::Obstacle
            } else {
                Terrain::Empty
            }
        });
        for y in 0..3 {
            grid.add_block(Position::new(1, y), "b0").expect("block");
        }
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..20 {
            let p = grid.random_free_position(&mut rng).expect("free cell");
            assert_eq!(p.x, 2);
        }
    }

    #[test]
    fn random_position_within_stays_in_diamond() {
        let grid = empty_grid(10, 10, 4);
        let mut rng = SmallRng::seed_from_u64(3);
        let center = Position::new(0, 0);
        for _ in 0..50 {
            let p = grid.random_position_within(&mut rng, center, 4);
            assert!(Area::new(center, 4).contains(p));
        }
    }
}
