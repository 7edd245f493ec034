//! Live player sessions keyed by connection

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::world::{Location, Position};
use crate::ws::identity::ConnectionId;

/// State of an authenticated player (authoritative, in memory)
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub connection_id: ConnectionId,
    pub username: String,
    pub is_admin: bool,
    pub language: String,
    pub location: Location,
}

#[derive(Default)]
struct SessionTable {
    /// Insertion order; SELECTPLAYER and LOAD_PLAYERS iterate in this order
    order: Vec<ConnectionId>,
    by_id: HashMap<ConnectionId, SessionState>,
}

/// Registry of every active session.
///
/// A single lock guards the table so readers never observe a half-applied
/// insert or removal.
#[derive(Default)]
pub struct SessionStore {
    table: RwLock<SessionTable>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session for `state.connection_id`
    pub fn insert(&self, state: SessionState) {
        let mut table = self.table.write();
        if !table.by_id.contains_key(&state.connection_id) {
            table.order.push(state.connection_id.clone());
        }
        table.by_id.insert(state.connection_id.clone(), state);
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<SessionState> {
        let mut table = self.table.write();
        let removed = table.by_id.remove(id)?;
        table.order.retain(|existing| existing != id);
        Some(removed)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<SessionState> {
        self.table.read().by_id.get(id).cloned()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.table.read().by_id.contains_key(id)
    }

    /// Apply `f` to a session in place; returns `None` if it is gone
    pub fn update<T>(&self, id: &ConnectionId, f: impl FnOnce(&mut SessionState) -> T) -> Option<T> {
        self.table.write().by_id.get_mut(id).map(f)
    }

    pub fn set_position(&self, id: &ConnectionId, position: Position) -> bool {
        self.update(id, |session| session.location.position = position)
            .is_some()
    }

    /// All sessions in insertion order
    pub fn snapshot(&self) -> Vec<SessionState> {
        let table = self.table.read();
        table
            .order
            .iter()
            .filter_map(|id| table.by_id.get(id).cloned())
            .collect()
    }

    /// First session on `map` whose position lies strictly within `radius`
    /// of `point` on both axes, in insertion order
    pub fn first_near(&self, map: &str, point: Position, radius: f64) -> Option<SessionState> {
        let table = self.table.read();
        table
            .order
            .iter()
            .filter_map(|id| table.by_id.get(id))
            .filter(|session| session.location.map == map)
            .find(|session| {
                (session.location.position.x - point.x).abs() < radius
                    && (session.location.position.y - point.y).abs() < radius
            })
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.table.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) fn session_at(id: &str, map: &str, x: f64, y: f64) -> SessionState {
    SessionState {
        connection_id: ConnectionId::from(id),
        username: format!("user-{}", id),
        is_admin: false,
        language: "en".to_string(),
        location: Location {
            map: map.to_string(),
            position: Position::new(x, y),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_preserves_insertion_order() {
        let store = SessionStore::new();
        store.insert(session_at("b", "a", 0.0, 0.0));
        store.insert(session_at("a", "a", 0.0, 0.0));
        store.insert(session_at("c", "a", 0.0, 0.0));
        store.remove(&ConnectionId::from("a"));

        let ids: Vec<String> = store
            .snapshot()
            .into_iter()
            .map(|s| s.connection_id.to_string())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn replacing_keeps_original_slot() {
        let store = SessionStore::new();
        store.insert(session_at("x", "a", 0.0, 0.0));
        store.insert(session_at("y", "a", 0.0, 0.0));
        store.insert(session_at("x", "b", 5.0, 5.0));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].location.map, "b");
    }

    #[test]
    fn first_near_picks_first_match_within_radius() {
        let store = SessionStore::new();
        store.insert(session_at("one", "a", 100.0, 100.0));
        store.insert(session_at("two", "a", 200.0, 200.0));
        store.insert(session_at("far", "b", 110.0, 110.0));

        let hit = store.first_near("a", Position::new(110.0, 110.0), 25.0).unwrap();
        assert_eq!(hit.connection_id.as_str(), "one");
        assert!(store.first_near("a", Position::new(500.0, 500.0), 25.0).is_none());
        // Exactly on the radius is outside
        assert!(store.first_near("a", Position::new(125.0, 100.0), 25.0).is_none());
    }

    #[test]
    fn first_near_uses_order_not_distance() {
        let store = SessionStore::new();
        store.insert(session_at("edge", "a", 120.0, 120.0));
        store.insert(session_at("exact", "a", 100.0, 100.0));
        let hit = store.first_near("a", Position::new(100.0, 100.0), 25.0).unwrap();
        assert_eq!(hit.connection_id.as_str(), "edge");
    }

    #[test]
    fn set_position_on_missing_session() {
        let store = SessionStore::new();
        assert!(!store.set_position(&ConnectionId::from("ghost"), Position::new(1.0, 1.0)));
    }
}
