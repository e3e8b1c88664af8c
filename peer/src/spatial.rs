//! Uniform-grid broad phase over the bounded arena.
//!
//! Objects are inserted with a bounding radius and may occupy several cells.
//! Queries are conservative: anything whose box touches the query box's cells
//! is returned, and callers filter by exact distance.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::entity::PeerId;
use crate::pool::PoolHandle;

/// What the coordinator stores in its index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SpatialKey {
    Entity(PeerId),
    Projectile(PoolHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GridStats {
    pub total_cells: usize,
    pub occupied_cells: usize,
    pub total_entries: usize,
    pub max_per_cell: usize,
}

#[derive(Debug)]
pub struct SpatialIndex<K> {
    cell_size: f64,
    cols: usize,
    rows: usize,
    cells: Vec<Vec<K>>,
    /// Cells each object currently occupies, for O(cells touched) removal
    occupancy: HashMap<K, Vec<usize>>,
}

impl<K: Eq + Hash + Clone> SpatialIndex<K> {
    pub fn new(world_width: f64, world_height: f64, cell_size: f64) -> Self {
        let cols = ((world_width / cell_size).ceil() as usize).max(1);
        let rows = ((world_height / cell_size).ceil() as usize).max(1);
        Self {
            cell_size,
            cols,
            rows,
            cells: vec![Vec::new(); cols * rows],
            occupancy: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: K, x: f64, y: f64, radius: f64) {
        self.remove(&key);
        let covered = self.cells_for_box(x, y, radius);
        for &index in &covered {
            self.cells[index].push(key.clone());
        }
        self.occupancy.insert(key, covered);
    }

    /// Returns true if the object was indexed.
    pub fn remove(&mut self, key: &K) -> bool {
        let Some(covered) = self.occupancy.remove(key) else {
            return false;
        };
        for index in covered {
            let cell = &mut self.cells[index];
            if let Some(pos) = cell.iter().position(|k| k == key) {
                cell.swap_remove(pos);
            }
        }
        true
    }

    /// Every object sharing a cell with the query box, each reported once.
    pub fn get_nearby(&self, x: f64, y: f64, radius: f64) -> Vec<K> {
        let mut seen = HashSet::new();
        let mut nearby = Vec::new();
        for index in self.cells_for_box(x, y, radius) {
            for key in &self.cells[index] {
                if seen.insert(key) {
                    nearby.push(key.clone());
                }
            }
        }
        nearby
    }

    pub fn contains(&self, key: &K) -> bool {
        self.occupancy.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.occupancy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy.is_empty()
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
        self.occupancy.clear();
    }

    pub fn stats(&self) -> GridStats {
        let mut stats = GridStats {
            total_cells: self.cells.len(),
            ..Default::default()
        };
        for cell in self.cells.iter().filter(|c| !c.is_empty()) {
            stats.occupied_cells += 1;
            stats.total_entries += cell.len();
            stats.max_per_cell = stats.max_per_cell.max(cell.len());
        }
        stats
    }

    /// Cell indices overlapped by the box (x±r, y±r), clamped to the grid.
    /// Boxes entirely outside the world cover no cells.
    fn cells_for_box(&self, x: f64, y: f64, radius: f64) -> Vec<usize> {
        let last_col = self.cols as i64 - 1;
        let last_row = self.rows as i64 - 1;
        let start_col = self.cell_of(x - radius).max(0);
        let end_col = self.cell_of(x + radius).min(last_col);
        let start_row = self.cell_of(y - radius).max(0);
        let end_row = self.cell_of(y + radius).min(last_row);

        let mut covered = Vec::new();
        for row in start_row..=end_row {
            for col in start_col..=end_col {
                covered.push(row as usize * self.cols + col as usize);
            }
        }
        covered
    }

    fn cell_of(&self, coord: f64) -> i64 {
        (coord / self.cell_size).floor() as i64
    }
}
