//! Directional movement against a map's collision grid
//!
//! The tested point is not the player's origin: it is pushed into a foot box
//! (16 right, 24 down) and then led further in the direction of travel, so
//! sprites stop before their feet overlap a wall.

use serde::{Deserialize, Serialize};

use super::maps::LoadedMap;

/// Distance moved per MOVEXY packet
pub const STEP: f64 = 1.0;
/// Horizontal inset of the foot box from the sprite origin
pub const HITBOX_INSET_X: f64 = 16.0;
/// Vertical inset of the foot box from the sprite origin
pub const HITBOX_INSET_Y: f64 = 24.0;
/// Extra probe distance when travelling horizontally
pub const LEAD_X: f64 = 16.0;
/// Extra probe distance when travelling vertically
pub const LEAD_Y: f64 = 24.0;

/// World-space position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A map name plus a position on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub map: String,
    pub position: Position,
}

/// Movement direction from a MOVEXY packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Case-insensitive parse of `up`/`down`/`left`/`right`
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }

    /// Unit offset along x and y
    fn delta(self) -> (f64, f64) {
        match self {
            Self::Up => (0.0, -1.0),
            Self::Down => (0.0, 1.0),
            Self::Left => (-1.0, 0.0),
            Self::Right => (1.0, 0.0),
        }
    }
}

/// Point tested for collision when moving from `from` towards `direction`
pub fn probe_point(from: Position, direction: Direction) -> Position {
    let (dx, dy) = direction.delta();
    Position {
        x: from.x + dx * STEP + HITBOX_INSET_X + dx * LEAD_X,
        y: from.y + dy * STEP + HITBOX_INSET_Y + dy * LEAD_Y,
    }
}

/// True when `point` lands on an impassable cell or outside the map
pub fn would_collide(map: &LoadedMap, point: Position) -> bool {
    let col = (point.x / map.tile_width as f64).floor() as i64;
    let row = (point.y / map.tile_height as f64).floor() as i64;
    map.grid.get(col, row).unwrap_or(true)
}

/// Resolve one step; `None` when the move is blocked
pub fn try_move(map: &LoadedMap, from: Position, direction: Direction) -> Option<Position> {
    if would_collide(map, probe_point(from, direction)) {
        return None;
    }
    let (dx, dy) = direction.delta();
    Some(Position {
        x: from.x + dx * STEP,
        y: from.y + dy * STEP,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::maps::test_maps::map_with_walls;

    #[test]
    fn parses_directions_case_insensitively() {
        assert_eq!(Direction::parse("UP"), Some(Direction::Up));
        assert_eq!(Direction::parse("Left"), Some(Direction::Left));
        assert_eq!(Direction::parse("sideways"), None);
    }

    #[test]
    fn probe_applies_foot_box_and_lead() {
        let origin = Position::new(100.0, 100.0);
        assert_eq!(probe_point(origin, Direction::Down), Position::new(116.0, 149.0));
        assert_eq!(probe_point(origin, Direction::Up), Position::new(116.0, 99.0));
        assert_eq!(probe_point(origin, Direction::Right), Position::new(133.0, 124.0));
        assert_eq!(probe_point(origin, Direction::Left), Position::new(99.0, 124.0));
    }

    #[test]
    fn free_move_advances_one_step() {
        let map = map_with_walls("a", 10, 10, &[]);
        let moved = try_move(&map, Position::new(100.0, 100.0), Direction::Right);
        assert_eq!(moved, Some(Position::new(101.0, 100.0)));
    }

    #[test]
    fn wall_below_feet_blocks_downward_move() {
        // Probe for Down from (100,100) is (116,149): column 3, row 4
        let map = map_with_walls("a", 10, 10, &[(3, 4)]);
        assert!(try_move(&map, Position::new(100.0, 100.0), Direction::Down).is_none());
        // The same wall does not block moving up
        assert!(try_move(&map, Position::new(100.0, 100.0), Direction::Up).is_some());
    }

    #[test]
    fn leaving_the_map_collides() {
        let map = map_with_walls("a", 4, 4, &[]);
        assert!(would_collide(&map, Position::new(-1.0, 10.0)));
        assert!(would_collide(&map, Position::new(10.0, 128.0)));
        assert!(!would_collide(&map, Position::new(0.0, 0.0)));
        assert!(try_move(&map, Position::new(-16.0, 0.0), Direction::Left).is_none());
    }
}
