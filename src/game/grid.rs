//! Uniform-cell spatial grid for broad-phase collision queries

use std::collections::{HashMap, HashSet};

use super::world::{Rect, Vec2};

/// Entity handle stored in grid cells
pub type EntityId = String;

#[derive(Debug, Clone, Copy)]
struct StoredEntity {
    position: Vec2,
    radius: f64,
}

/// Uniform grid partitioning the arena into `cell_size` squares.
/// Each entity occupies every cell its AABB touches; an id index keeps
/// remove/update at O(cells covered) rather than O(total entities).
#[derive(Debug)]
pub struct SpatialGrid {
    cell_size: f64,
    cells: HashMap<(i32, i32), Vec<EntityId>>,
    index: HashMap<EntityId, StoredEntity>,
}

impl SpatialGrid {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size: cell_size.max(1.0),
            cells: HashMap::new(),
            index: HashMap::new(),
        }
    }

    fn cell_of(&self, x: f64, y: f64) -> (i32, i32) {
        (
            (x / self.cell_size).floor() as i32,
            (y / self.cell_size).floor() as i32,
        )
    }

    /// Inclusive cell range covering a circle's AABB
    fn cell_range(&self, position: Vec2, radius: f64) -> ((i32, i32), (i32, i32)) {
        (
            self.cell_of(position.x - radius, position.y - radius),
            self.cell_of(position.x + radius, position.y + radius),
        )
    }

    pub fn insert(&mut self, id: &str, position: Vec2, radius: f64) {
        // Re-inserting an id moves it
        if self.index.contains_key(id) {
            self.remove(id);
        }

        let ((xmin, ymin), (xmax, ymax)) = self.cell_range(position, radius);
        for cx in xmin..=xmax {
            for cy in ymin..=ymax {
                self.cells
                    .entry((cx, cy))
                    .or_default()
                    .push(id.to_string());
            }
        }
        self.index
            .insert(id.to_string(), StoredEntity { position, radius });
    }

    pub fn remove(&mut self, id: &str) {
        let Some(stored) = self.index.remove(id) else {
            return;
        };

        let ((xmin, ymin), (xmax, ymax)) = self.cell_range(stored.position, stored.radius);
        for cx in xmin..=xmax {
            for cy in ymin..=ymax {
                if let Some(bucket) = self.cells.get_mut(&(cx, cy)) {
                    bucket.retain(|e| e != id);
                    if bucket.is_empty() {
                        self.cells.remove(&(cx, cy));
                    }
                }
            }
        }
    }

    pub fn update(&mut self, id: &str, position: Vec2, radius: f64) {
        // Skip the cell churn when the covered range is unchanged
        if let Some(stored) = self.index.get(id) {
            let old = self.cell_range(stored.position, stored.radius);
            let new = self.cell_range(position, radius);
            if old == new {
                self.index
                    .insert(id.to_string(), StoredEntity { position, radius });
                return;
            }
        }
        self.insert(id, position, radius);
    }

    /// Deduplicated ids of entities whose cells intersect `rect`
    pub fn query_region(&self, rect: Rect) -> HashSet<EntityId> {
        let (xmin, ymin) = self.cell_of(rect.min.x, rect.min.y);
        let (xmax, ymax) = self.cell_of(rect.max.x, rect.max.y);

        let mut out = HashSet::new();
        for cx in xmin..=xmax {
            for cy in ymin..=ymax {
                if let Some(bucket) = self.cells.get(&(cx, cy)) {
                    out.extend(bucket.iter().cloned());
                }
            }
        }
        out
    }

    /// Entities within `radius` of the stored entity's expanded AABB,
    /// excluding the entity itself
    pub fn nearby(&self, id: &str, radius: f64) -> HashSet<EntityId> {
        let Some(stored) = self.index.get(id) else {
            return HashSet::new();
        };

        let mut out = self.query_region(Rect::around(stored.position, stored.radius + radius));
        out.remove(id);
        out
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn position_of(&self, id: &str) -> Option<Vec2> {
        self.index.get(id).map(|s| s.position)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> SpatialGrid {
        SpatialGrid::new(100.0)
    }

    #[test]
    fn insert_then_remove_leaves_no_trace() {
        let mut g = grid();
        g.insert("a", Vec2::new(150.0, 150.0), 10.0);
        g.insert("b", Vec2::new(160.0, 150.0), 10.0);

        assert!(g.nearby("b", 50.0).contains("a"));

        g.remove("a");
        assert!(!g.contains("a"));
        assert!(g.nearby("b", 50.0).is_empty());
        // no stale bucket entries remain
        assert!(g.cells.values().all(|bucket| !bucket.contains(&"a".to_string())));
    }

    #[test]
    fn entity_spanning_cells_is_found_once() {
        let mut g = grid();
        // circle straddles four cells around (100, 100)
        g.insert("big", Vec2::new(100.0, 100.0), 30.0);

        let found = g.query_region(Rect::new(Vec2::new(0.0, 0.0), Vec2::new(200.0, 200.0)));
        assert_eq!(found.len(), 1);
        assert!(found.contains("big"));
    }

    #[test]
    fn update_moves_entity_between_cells() {
        let mut g = grid();
        g.insert("m", Vec2::new(50.0, 50.0), 5.0);
        g.update("m", Vec2::new(550.0, 550.0), 5.0);

        let near_old = g.query_region(Rect::new(Vec2::ZERO, Vec2::new(100.0, 100.0)));
        assert!(near_old.is_empty());

        let near_new = g.query_region(Rect::new(Vec2::new(500.0, 500.0), Vec2::new(600.0, 600.0)));
        assert!(near_new.contains("m"));
    }

    #[test]
    fn update_within_same_cells_keeps_index_current() {
        let mut g = grid();
        g.insert("m", Vec2::new(50.0, 50.0), 5.0);
        g.update("m", Vec2::new(52.0, 51.0), 5.0);
        assert_eq!(g.position_of("m"), Some(Vec2::new(52.0, 51.0)));
    }

    #[test]
    fn nearby_excludes_self() {
        let mut g = grid();
        g.insert("a", Vec2::new(10.0, 10.0), 5.0);
        assert!(!g.nearby("a", 100.0).contains("a"));
    }

    #[test]
    fn query_region_deduplicates() {
        let mut g = grid();
        g.insert("wide", Vec2::new(200.0, 200.0), 150.0);
        let hits = g.query_region(Rect::new(Vec2::new(0.0, 0.0), Vec2::new(400.0, 400.0)));
        assert_eq!(hits.len(), 1);
    }
}
