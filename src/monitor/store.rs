//! Position persistence hand-off.

use dashmap::DashMap;

use crate::trading::Position;

/// Receives a position snapshot after every state change.
pub trait PositionStore: Send + Sync {
    /// Persist the latest snapshot of a position.
    fn save(&self, position: &Position);
}

/// In-memory store keyed by position ID.
#[derive(Debug, Default)]
pub struct InMemoryPositionStore {
    positions: DashMap<String, Position>,
}

impl InMemoryPositionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot of a position.
    pub fn get(&self, position_id: &str) -> Option<Position> {
        self.positions.get(position_id).map(|p| p.clone())
    }

    /// Snapshots of every position, sorted by ID.
    pub fn all(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.iter().map(|p| p.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Number of positions seen.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether nothing has been saved.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl PositionStore for InMemoryPositionStore {
    fn save(&self, position: &Position) {
        self.positions.insert(position.id.clone(), position.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::PositionSide;
    use rust_decimal_macros::dec;

    #[test]
    fn keeps_latest_snapshot() {
        let store = InMemoryPositionStore::new();
        let mut pos = Position::new("b", "tok", PositionSide::Long, dec!(10), dec!(0.50));
        store.save(&pos);
        pos.mark(dec!(0.60));
        store.save(&pos);
        store.save(&Position::new("a", "tok", PositionSide::Short, dec!(5), dec!(0.40)));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("b").map(|p| p.current_price), Some(dec!(0.60)));
        let ids: Vec<_> = store.all().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
