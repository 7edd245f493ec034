//! World data: maps, collision masks and movement rules

pub mod collision;
pub mod maps;
pub mod movement;

pub use maps::{LoadedMap, MapRegistry};
pub use movement::{Direction, Location, Position};
