//! Board Primitives
//!
//! Coordinates and ship cell-groups. Ships are stored as ordered sets so
//! that "is this ship sunk" is a plain subset test against the thrower's
//! bomb history, independent of the order cells were submitted or hit.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};

/// Board edge length (10x10 grid, 0-indexed).
pub const BOARD_SIZE: u8 = 10;

/// Number of ships every fleet must contain.
pub const SHIPS_PER_FLEET: usize = 8;

/// A board cell, serialized as `[x, y]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coordinate(pub u8, pub u8);

impl Coordinate {
    /// Column.
    pub fn x(&self) -> u8 {
        self.0
    }

    /// Row.
    pub fn y(&self) -> u8 {
        self.1
    }

    /// Whether the cell lies on the standard board.
    pub fn on_board(&self) -> bool {
        self.0 < BOARD_SIZE && self.1 < BOARD_SIZE
    }

    /// Every cell of the standard board in row-major order.
    pub fn all() -> impl Iterator<Item = Coordinate> {
        (0..BOARD_SIZE).flat_map(|y| (0..BOARD_SIZE).map(move |x| Coordinate(x, y)))
    }
}

/// One ship: the set of cells it occupies.
///
/// Serialized as an array of coordinates. Duplicate cells in the input
/// collapse into one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ship {
    cells: BTreeSet<Coordinate>,
}

impl Ship {
    /// Build a ship from its cells.
    pub fn new(cells: impl IntoIterator<Item = Coordinate>) -> Self {
        Self { cells: cells.into_iter().collect() }
    }

    /// Occupied cells.
    pub fn cells(&self) -> &BTreeSet<Coordinate> {
        &self.cells
    }

    /// Number of occupied cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True if the ship has no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether `coordinate` is one of this ship's cells.
    pub fn occupies(&self, coordinate: &Coordinate) -> bool {
        self.cells.contains(coordinate)
    }

    /// Whether every cell has been hit by `thrown`.
    pub fn is_sunk_by(&self, thrown: &BTreeSet<Coordinate>) -> bool {
        !self.cells.is_empty() && self.cells.is_subset(thrown)
    }
}
