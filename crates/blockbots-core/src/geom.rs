//! Grid geometry: integer positions, cardinal directions, and diamond areas.

use serde::{Deserialize, Serialize};

/// Integer cell coordinate. `y` grows southward.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns the position translated by `(dx, dy)`.
    #[must_use]
    pub const fn translate(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    /// Returns the position `distance` cells away in `direction`.
    #[must_use]
    pub const fn moved(self, direction: Direction, distance: i32) -> Self {
        let (dx, dy) = direction.offset();
        self.translate(dx * distance, dy * distance)
    }

    /// Chebyshev distance to `other`.
    #[must_use]
    pub const fn distance_to(self, other: Self) -> i32 {
        let dx = (self.x - other.x).abs();
        let dy = (self.y - other.y).abs();
        if dx > dy { dx } else { dy }
    }

    /// Converts a global position into coordinates local to `anchor`.
    #[must_use]
    pub const fn to_local(self, anchor: Self) -> Self {
        Self::new(self.x - anchor.x, self.y - anchor.y)
    }

    /// Converts a position local to `anchor` back into global coordinates.
    #[must_use]
    pub const fn to_global(self, anchor: Self) -> Self {
        Self::new(self.x + anchor.x, self.y + anchor.y)
    }

    /// Rotates the position a quarter turn around `pivot`.
    #[must_use]
    pub const fn rotated_around(self, pivot: Self, rotation: Rotation) -> Self {
        let dx = self.x - pivot.x;
        let dy = self.y - pivot.y;
        match rotation {
            Rotation::Clockwise => Self::new(pivot.x - dy, pivot.y + dx),
            Rotation::CounterClockwise => Self::new(pivot.x + dy, pivot.y - dx),
        }
    }
}

/// Cardinal movement direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    #[serde(rename = "n")]
    North,
    #[serde(rename = "s")]
    South,
    #[serde(rename = "e")]
    East,
    #[serde(rename = "w")]
    West,
}

impl Direction {
    /// All directions in a fixed order.
    pub const ALL: [Self; 4] = [Self::North, Self::South, Self::East, Self::West];

    /// Unit cell offset of the direction.
    #[must_use]
    pub const fn offset(self) -> (i32, i32) {
        match self {
            Self::North => (0, -1),
            Self::South => (0, 1),
            Self::East => (1, 0),
            Self::West => (-1, 0),
        }
    }

    /// Single-letter wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::North => "n",
            Self::South => "s",
            Self::East => "e",
            Self::West => "w",
        }
    }
}

/// Quarter-turn sense for rotation actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[serde(rename = "cw")]
    Clockwise,
    #[serde(rename = "ccw")]
    CounterClockwise,
}

impl Rotation {
    /// Wire name of the rotation sense.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clockwise => "cw",
            Self::CounterClockwise => "ccw",
        }
    }
}

/// Diamond (Manhattan disk) of cells around a center.
///
/// Enumerates `dx` in `[-r, r]` ascending and, for each `dx`, `dy` in
/// `[-(r - |dx|), r - |dx|]` ascending. The struct is `Copy`, so the
/// sequence can be restarted by iterating again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Area {
    center: Position,
    radius: i32,
}

impl Area {
    /// Area around `center` with the given radius. A negative radius is empty.
    #[must_use]
    pub const fn new(center: Position, radius: i32) -> Self {
        Self { center, radius }
    }

    /// Returns true if `position` lies inside the diamond.
    #[must_use]
    pub const fn contains(&self, position: Position) -> bool {
        let dx = (position.x - self.center.x).abs();
        let dy = (position.y - self.center.y).abs();
        dx + dy <= self.radius
    }
}

impl IntoIterator for Area {
    type Item = Position;
    type IntoIter = AreaIter;

    fn into_iter(self) -> AreaIter {
        AreaIter {
            area: self,
            dx: 0,
            dy: 0,
            started: false,
        }
    }
}

/// Iterator over the cells of an [`Area`].
#[derive(Debug, Clone)]
pub struct AreaIter {
    area: Area,
    dx: i32,
    dy: i32,
    started: bool,
}

impl Iterator for AreaIter {
    type Item = Position;

    fn next(&mut self) -> Option<Position> {
        let radius = self.area.radius;
        if radius < 0 {
            return None;
        }
        if !self.started {
            self.started = true;
            self.dx = -radius;
            self.dy = -(radius - self.dx.abs());
        } else {
            let span = radius - self.dx.abs();
            if self.dy < span {
                self.dy += 1;
            } else {
                self.dx += 1;
                if self.dx > radius {
                    return None;
                }
                self.dy = -(radius - self.dx.abs());
            }
        }
        if self.dx > radius {
            return None;
        }
        Some(self.area.center.translate(self.dx, self.dy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moved_applies_direction_offsets() {
        let origin = Position::new(3, 3);
        assert_eq!(origin.moved(Direction::North, 1), Position::new(3, 2));
        assert_eq!(origin.moved(Direction::South, 2), Position::new(3, 5));
        assert_eq!(origin.moved(Direction::East, 1), Position::new(4, 3));
        assert_eq!(origin.moved(Direction::West, 1), Position::new(2, 3));
    }

    #[test]
    fn distance_is_chebyshev() {
        let a = Position::new(0, 0);
        assert_eq!(a.distance_to(Position::new(3, 1)), 3);
        assert_eq!(a.distance_to(Position::new(-2, -2)), 2);
        assert_eq!(a.distance_to(a), 0);
    }

    #[test]
    fn local_global_round_trip() {
        let anchor = Position::new(7, -2);
        let p = Position::new(10, 4);
        assert_eq!(p.to_local(anchor).to_global(anchor), p);
        assert_eq!(p.to_local(anchor), Position::new(3, 6));
    }

    #[test]
    fn clockwise_rotation_sends_north_to_east() {
        let pivot = Position::new(5, 5);
        let north = Position::new(5, 4);
        let east = north.rotated_around(pivot, Rotation::Clockwise);
        assert_eq!(east, Position::new(6, 5));
        let back = east.rotated_around(pivot, Rotation::CounterClockwise);
        assert_eq!(back, north);
    }

    #[test]
    fn four_quarter_turns_are_identity() {
        let pivot = Position::new(1, 1);
        let mut p = Position::new(4, -3);
        let start = p;
        for _ in 0..4 {
            p = p.rotated_around(pivot, Rotation::Clockwise);
        }
        assert_eq!(p, start);
    }

    #[test]
    fn area_enumerates_diamond_in_order() {
        let cells: Vec<Position> = Area::new(Position::new(0, 0), 1).into_iter().collect();
        assert_eq!(
            cells,
            vec![
                Position::new(-1, 0),
                Position::new(0, -1),
                Position::new(0, 0),
                Position::new(0, 1),
                Position::new(1, 0),
            ]
        );
    }

    #[test]
    fn area_cell_count_matches_closed_form() {
        for radius in 0..6 {
            let count = Area::new(Position::new(9, 9), radius).into_iter().count();
            let expected = (2 * radius * radius + 2 * radius + 1) as usize;
            assert_eq!(count, expected, "radius={radius}");
        }
    }

    #[test]
    fn area_is_restartable() {
        let area = Area::new(Position::new(2, 2), 2);
        let first: Vec<Position> = area.into_iter().collect();
        let second: Vec<Position> = area.into_iter().collect();
        assert_eq!(first, second);
        assert!(first.iter().all(|p| area.contains(*p)));
    }

    #[test]
    fn negative_radius_is_empty() {
        assert_eq!(Area::new(Position::new(0, 0), -1).into_iter().count(), 0);
    }
}
