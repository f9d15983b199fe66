//! Cell grids

mod cell;
mod ghost_cell_grid;

pub use cell::Cell;
pub use ghost_cell_grid::{half_shell_offsets, GhostCellGrid, HALF_SHELL_SIZE};
