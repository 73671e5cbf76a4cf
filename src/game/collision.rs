//! Narrow-phase collision resolution over grid candidates

use std::collections::HashSet;

use super::grid::SpatialGrid;
use super::world::{Rect, Vec2, WorldBounds};

/// Collision layers; the allowed-pair matrix is fixed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Player,
    Projectile,
    PowerUp,
    Wall,
}

/// Pairs outside this matrix are skipped in the broad phase
pub fn layers_collide(a: Layer, b: Layer) -> bool {
    use Layer::*;
    matches!(
        (a, b),
        (Player, Player)
            | (Player, Projectile)
            | (Projectile, Player)
            | (Player, PowerUp)
            | (PowerUp, Player)
            | (Player, Wall)
            | (Wall, Player)
            | (Projectile, Wall)
            | (Wall, Projectile)
    )
}

/// A collidable entity as seen by the resolver
#[derive(Debug, Clone)]
pub struct Collider {
    pub id: String,
    pub position: Vec2,
    pub radius: f64,
    pub layer: Layer,
    /// Projectiles never collide with their owner
    pub owner: Option<String>,
}

/// One detected contact
#[derive(Debug, Clone)]
pub struct Collision {
    pub a: String,
    pub b: String,
    pub point: Vec2,
    pub normal: Vec2,
    pub penetration: f64,
}

/// Collision resolver: broad phase via the grid, narrow phase circle tests
pub struct CollisionResolver;

impl CollisionResolver {
    /// Detect all collisions among `colliders` using `grid` for candidates.
    /// Pairs are deduplicated by unordered id pair.
    pub fn detect(grid: &SpatialGrid, colliders: &[Collider]) -> Vec<Collision> {
        let by_id: std::collections::HashMap<&str, &Collider> =
            colliders.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut out = Vec::new();

        for collider in colliders {
            for candidate_id in grid.nearby(&collider.id, collider.radius) {
                let Some(other) = by_id.get(candidate_id.as_str()) else {
                    continue;
                };

                if !layers_collide(collider.layer, other.layer) {
                    continue;
                }
                if Self::is_owner_pair(collider, other) {
                    continue;
                }

                let key = Self::pair_key(&collider.id, &other.id);
                if !seen.insert(key) {
                    continue;
                }

                if let Some(collision) = Self::circle_circle(collider, other) {
                    out.push(collision);
                }
            }
        }

        out
    }

    fn pair_key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    fn is_owner_pair(a: &Collider, b: &Collider) -> bool {
        a.owner.as_deref() == Some(b.id.as_str()) || b.owner.as_deref() == Some(a.id.as_str())
    }

    /// Squared-distance circle test producing a contact record
    fn circle_circle(a: &Collider, b: &Collider) -> Option<Collision> {
        let delta = b.position.sub(a.position);
        let dist_sq = delta.length_sq();
        let radii = a.radius + b.radius;

        if dist_sq > radii * radii {
            return None;
        }

        let dist = dist_sq.sqrt();
        let normal = if dist < 1e-9 {
            // coincident centers, pick a stable axis
            Vec2::new(1.0, 0.0)
        } else {
            delta.scale(1.0 / dist)
        };

        Some(Collision {
            a: a.id.clone(),
            b: b.id.clone(),
            point: a.position.add(normal.scale(a.radius)),
            normal,
            penetration: radii - dist,
        })
    }

    /// Circle vs AABB overlap (obstacles, wall segments)
    pub fn circle_aabb(center: Vec2, radius: f64, rect: &Rect) -> bool {
        let closest = rect.closest_point(center);
        center.sub(closest).length_sq() <= radius * radius
    }

    /// Separate two overlapping players: each displaced along the contact
    /// normal by half the penetration, both re-clamped to bounds.
    pub fn separate(
        pos_a: Vec2,
        pos_b: Vec2,
        collision: &Collision,
        bounds: &WorldBounds,
        radius: f64,
    ) -> (Vec2, Vec2) {
        let push = collision.normal.scale(collision.penetration / 2.0);
        let (new_a, _, _) = bounds.clamp(pos_a.sub(push), radius);
        let (new_b, _, _) = bounds.clamp(pos_b.add(push), radius);
        (new_a, new_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::PLAYER_RADIUS;

    fn player(id: &str, x: f64, y: f64) -> Collider {
        Collider {
            id: id.to_string(),
            position: Vec2::new(x, y),
            radius: PLAYER_RADIUS,
            layer: Layer::Player,
            owner: None,
        }
    }

    fn projectile(id: &str, owner: &str, x: f64, y: f64) -> Collider {
        Collider {
            id: id.to_string(),
            position: Vec2::new(x, y),
            radius: 4.0,
            layer: Layer::Projectile,
            owner: Some(owner.to_string()),
        }
    }

    fn build_grid(colliders: &[Collider]) -> SpatialGrid {
        let mut grid = SpatialGrid::new(100.0);
        for c in colliders {
            grid.insert(&c.id, c.position, c.radius);
        }
        grid
    }

    #[test]
    fn overlapping_players_collide_once() {
        let colliders = vec![player("a", 100.0, 100.0), player("b", 130.0, 100.0)];
        let grid = build_grid(&colliders);

        let collisions = CollisionResolver::detect(&grid, &colliders);
        assert_eq!(collisions.len(), 1);
        let c = &collisions[0];
        assert!((c.penetration - 10.0).abs() < 1e-9);
        // normal points from a toward b
        assert!((c.normal.x - 1.0).abs() < 1e-9);
    }

    #[test]
    fn projectile_skips_its_owner() {
        let colliders = vec![player("a", 100.0, 100.0), projectile("p", "a", 105.0, 100.0)];
        let grid = build_grid(&colliders);

        let collisions = CollisionResolver::detect(&grid, &colliders);
        assert!(collisions.is_empty());
    }

    #[test]
    fn projectile_hits_other_player() {
        let colliders = vec![
            player("a", 100.0, 100.0),
            player("b", 300.0, 100.0),
            projectile("p", "a", 310.0, 100.0),
        ];
        let grid = build_grid(&colliders);

        let collisions = CollisionResolver::detect(&grid, &colliders);
        assert_eq!(collisions.len(), 1);
        let ids = [collisions[0].a.as_str(), collisions[0].b.as_str()];
        assert!(ids.contains(&"b") && ids.contains(&"p"));
    }

    #[test]
    fn projectiles_do_not_collide_with_each_other() {
        let colliders = vec![
            projectile("p1", "a", 100.0, 100.0),
            projectile("p2", "b", 102.0, 100.0),
        ];
        let grid = build_grid(&colliders);
        assert!(CollisionResolver::detect(&grid, &colliders).is_empty());
    }

    #[test]
    fn separation_splits_penetration_and_clamps() {
        let bounds = WorldBounds::new(1000.0, 1000.0);
        let colliders = vec![player("a", 100.0, 100.0), player("b", 130.0, 100.0)];
        let grid = build_grid(&colliders);
        let collisions = CollisionResolver::detect(&grid, &colliders);

        let (new_a, new_b) = CollisionResolver::separate(
            colliders[0].position,
            colliders[1].position,
            &collisions[0],
            &bounds,
            PLAYER_RADIUS,
        );

        assert!((new_b.x - new_a.x) >= 2.0 * PLAYER_RADIUS - 1e-9);
        assert!(bounds.contains(new_a, PLAYER_RADIUS));
        assert!(bounds.contains(new_b, PLAYER_RADIUS));
    }

    #[test]
    fn circle_aabb_overlap() {
        let rect = Rect::new(Vec2::new(0.0, 0.0), Vec2::new(100.0, 100.0));
        assert!(CollisionResolver::circle_aabb(Vec2::new(105.0, 50.0), 10.0, &rect));
        assert!(!CollisionResolver::circle_aabb(Vec2::new(120.0, 50.0), 10.0, &rect));
    }
}
