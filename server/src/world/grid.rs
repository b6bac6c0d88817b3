//! Bounded 2-D grid with a per-cell survivor index.

use rescue_proto::Coord;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("coordinate ({x}, {y}) is out of bounds for a {width}x{height} grid")]
pub struct OutOfBounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A bounded `width x height` grid. Allocated once at startup and never
/// resized. Each cell holds the set of survivor ids currently located there,
/// a secondary index over the survivor registry.
pub struct Grid {
    width: i32,
    height: i32,
    cells: Vec<HashSet<String>>,
}

impl Grid {
    pub fn new(width: i32, height: i32) -> Self {
        assert!(width > 0 && height > 0, "grid dimensions must be positive");
        Self {
            width,
            height,
            cells: vec![HashSet::new(); (width * height) as usize],
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn in_bounds(&self, coord: Coord) -> bool {
        coord.x >= 0 && coord.x < self.width && coord.y >= 0 && coord.y < self.height
    }

    fn index(&self, coord: Coord) -> Result<usize, OutOfBounds> {
        if !self.in_bounds(coord) {
            return Err(OutOfBounds {
                x: coord.x,
                y: coord.y,
                width: self.width,
                height: self.height,
            });
        }
        Ok((coord.y * self.width + coord.x) as usize)
    }

    /// Add a survivor id to the cell at `coord`.
    pub fn place(&mut self, survivor_id: &str, coord: Coord) -> Result<(), OutOfBounds> {
        let idx = self.index(coord)?;
        self.cells[idx].insert(survivor_id.to_string());
        Ok(())
    }

    /// Remove a survivor id from the cell at `coord`. Idempotent: removing an
    /// id that is not present is not an error.
    pub fn remove(&mut self, survivor_id: &str, coord: Coord) -> Result<(), OutOfBounds> {
        let idx = self.index(coord)?;
        self.cells[idx].remove(survivor_id);
        Ok(())
    }

    /// Read-only view of the survivor ids present at `coord`.
    pub fn cell(&self, coord: Coord) -> Result<&HashSet<String>, OutOfBounds> {
        let idx = self.index(coord)?;
        Ok(&self.cells[idx])
    }
}
