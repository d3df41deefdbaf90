//! Task board: named block-pattern requirements with deadlines and rewards.

use crate::geom::Position;
use rand::rngs::SmallRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A block pattern to assemble, expressed as offsets relative to the
/// submitting entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub name: String,
    pub deadline_step: u64,
    pub reward: u64,
    pub completed: bool,
    pub requirements: BTreeMap<Position, String>,
}

impl Task {
    /// Open tasks are neither completed nor past their deadline.
    #[must_use]
    pub const fn is_open(&self, step: u64) -> bool {
        !self.completed && self.deadline_step >= step
    }
}

/// Registry of every task ever created. Tasks are never removed; expired
/// and completed tasks are only filtered at the percept boundary.
#[derive(Debug, Default)]
pub struct TaskBoard {
    tasks: BTreeMap<String, Task>,
    created: usize,
}

impl TaskBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow a task by name.
    #[must_use]
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    /// Mutably borrow a task by name.
    pub fn task_mut(&mut self, name: &str) -> Option<&mut Task> {
        self.tasks.get_mut(name)
    }

    /// Iterate over tasks still open at `step`, in name order.
    pub fn open_tasks(&self, step: u64) -> impl Iterator<Item = &Task> {
        self.tasks.values().filter(move |task| task.is_open(step))
    }

    /// Iterate over every task ever created, in name order.
    pub fn all_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Generate a task with a fresh `task<N>` name and a random-walk
    /// requirement pattern seeded at `(0, 1)`: per extra requirement the
    /// walk goes left with probability 0.3, right with 0.3, down with 0.4.
    /// The walk may revisit cells, so the reward can end up below `size`.
    pub fn create_random(
        &mut self,
        rng: &mut SmallRng,
        step: u64,
        duration: u64,
        size: u32,
        block_types: &[String],
    ) -> Option<&Task> {
        if size < 1 || duration < 1 || block_types.is_empty() {
            return None;
        }
        let name = format!("task{}", self.created);
        let mut requirements = BTreeMap::new();
        let mut cursor = Position::new(0, 1);
        requirements.insert(
            cursor,
            block_types[rng.random_range(0..block_types.len())].clone(),
        );
        for _ in 1..size {
            let index = rng.random_range(0..block_types.len());
            let u: f64 = rng.random();
            cursor = if u <= 0.3 {
                cursor.translate(-1, 0)
            } else if u <= 0.6 {
                cursor.translate(1, 0)
            } else {
                cursor.translate(0, 1)
            };
            requirements.insert(cursor, block_types[index].clone());
        }
        self.insert(name, step + duration, requirements)
    }

    /// Register a task with an explicit pattern. Requires at least one
    /// requirement and a deadline strictly after the current step.
    pub fn create_custom(
        &mut self,
        name: &str,
        step: u64,
        duration: u64,
        requirements: BTreeMap<Position, String>,
    ) -> Option<&Task> {
        if requirements.is_empty() || duration < 1 {
            return None;
        }
        self.insert(name.to_string(), step + duration, requirements)
    }

    fn insert(
        &mut self,
        name: String,
        deadline_step: u64,
        requirements: BTreeMap<Position, String>,
    ) -> Option<&Task> {
        let task = Task {
            reward: requirements.len() as u64,
            name: name.clone(),
            deadline_step,
            completed: false,
            requirements,
        };
        self.created += 1;
        self.tasks.insert(name.clone(), task);
        self.tasks.get(&name)
    }
}
