//! Spatial hash grid shared by collision resolution and AI targeting
//!
//! Divides the world into square cells; an entity is a member of every
//! cell its axis-aligned bounds overlap. Queries return a superset of the
//! truly intersecting entities (false positives bounded by cell
//! granularity; exact containment is the caller's responsibility), never
//! a subset. Membership is updated incrementally as physics moves
//! entities, so staleness never exceeds one tick.

use hashbrown::HashMap;
use rustc_hash::FxHashMap;

use crate::game::registry::EntityId;
use crate::util::vec2::Vec2;

/// Default cell size (world units). Tuned to ~2x the largest common body
/// size so a query touches a small, bounded number of cells.
pub const DEFAULT_CELL_SIZE: f32 = 64.0;

/// Initial capacity for the cell map (expected non-empty cells)
const GRID_INITIAL_CAPACITY: usize = 256;

/// Initial capacity for entity vectors within cells
const CELL_INITIAL_CAPACITY: usize = 8;

/// Grid cell key - (x, y) cell coordinates
pub type CellKey = (i32, i32);

/// Axis-aligned bounds: center plus half extents
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub center: Vec2,
    pub half_w: f32,
    pub half_h: f32,
}

impl Aabb {
    pub fn new(center: Vec2, half_w: f32, half_h: f32) -> Self {
        Self {
            center,
            half_w,
            half_h,
        }
    }

    /// Square bounds from a footprint radius
    pub fn square(center: Vec2, half: f32) -> Self {
        Self::new(center, half, half)
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        (self.center.x - other.center.x).abs() <= self.half_w + other.half_w
            && (self.center.y - other.center.y).abs() <= self.half_h + other.half_h
    }
}

/// Spatial hash grid over entity AABBs
pub struct SpatialGrid {
    cell_size: f32,
    /// Inverse cell size for fast position-to-cell conversion
    inv_cell_size: f32,
    /// Map from cell key to entity ids whose bounds overlap that cell
    cells: HashMap<CellKey, Vec<EntityId>>,
    /// Per-entity inclusive cell range, for incremental removal
    coverage: FxHashMap<EntityId, (CellKey, CellKey)>,
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::with_capacity(GRID_INITIAL_CAPACITY),
            coverage: FxHashMap::default(),
        }
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Inclusive cell range covered by bounds
    #[inline]
    fn cell_range(&self, bounds: &Aabb) -> (CellKey, CellKey) {
        let min = (
            ((bounds.center.x - bounds.half_w) * self.inv_cell_size).floor() as i32,
            ((bounds.center.y - bounds.half_h) * self.inv_cell_size).floor() as i32,
        );
        let max = (
            ((bounds.center.x + bounds.half_w) * self.inv_cell_size).floor() as i32,
            ((bounds.center.y + bounds.half_h) * self.inv_cell_size).floor() as i32,
        );
        (min, max)
    }

    /// Reposition an entity's membership to the cells overlapping
    /// `bounds`, removing it from cells it no longer overlaps
    pub fn update(&mut self, id: EntityId, bounds: Aabb) {
        let range = self.cell_range(&bounds);
        if self.coverage.get(&id) == Some(&range) {
            return; // Same cell footprint; nothing moved across a boundary
        }
        self.remove(id);
        let ((min_x, min_y), (max_x, max_y)) = range;
        for cx in min_x..=max_x {
            for cy in min_y..=max_y {
                self.cells
                    .entry((cx, cy))
                    .or_insert_with(|| Vec::with_capacity(CELL_INITIAL_CAPACITY))
                    .push(id);
            }
        }
        self.coverage.insert(id, range);
    }

    /// Clear all membership for an entity
    pub fn remove(&mut self, id: EntityId) {
        let Some(((min_x, min_y), (max_x, max_y))) = self.coverage.remove(&id) else {
            return;
        };
        for cx in min_x..=max_x {
            for cy in min_y..=max_y {
                if let Some(cell) = self.cells.get_mut(&(cx, cy)) {
                    if let Some(idx) = cell.iter().position(|&e| e == id) {
                        cell.swap_remove(idx);
                    }
                }
            }
        }
    }

    /// Every entity whose bounds may intersect the query rectangle, each
    /// id at most once, in no particular order
    pub fn query(&self, x: f32, y: f32, half_w: f32, half_h: f32) -> Vec<EntityId> {
        let ((min_x, min_y), (max_x, max_y)) =
            self.cell_range(&Aabb::new(Vec2::new(x, y), half_w, half_h));

        let mut results = Vec::new();
        for cx in min_x..=max_x {
            for cy in min_y..=max_y {
                if let Some(cell) = self.cells.get(&(cx, cy)) {
                    results.extend_from_slice(cell);
                }
            }
        }
        // Entities spanning several cells appear once per cell; dedup
        results.sort_unstable();
        results.dedup();
        results
    }

    pub fn clear(&mut self) {
        for cell in self.cells.values_mut() {
            cell.clear();
        }
        self.coverage.clear();
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.coverage.contains_key(&id)
    }

    /// Get statistics about the grid
    pub fn stats(&self) -> SpatialGridStats {
        let non_empty_cells = self.cells.values().filter(|c| !c.is_empty()).count();
        let total_memberships: usize = self.cells.values().map(|c| c.len()).sum();
        let max_per_cell = self.cells.values().map(|c| c.len()).max().unwrap_or(0);

        SpatialGridStats {
            non_empty_cells,
            tracked_entities: self.coverage.len(),
            total_memberships,
            max_per_cell,
        }
    }
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

/// Statistics about the spatial grid
#[derive(Debug, Clone)]
pub struct SpatialGridStats {
    pub non_empty_cells: usize,
    pub tracked_entities: usize,
    pub total_memberships: usize,
    pub max_per_cell: usize,
}
