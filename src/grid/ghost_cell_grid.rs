//! A cell grid surrounded by a frame of ghost cells

use crate::types::Real3D;
use itertools::iproduct;

/// Number of cells in the interaction neighbourhood of an inner cell: the cell itself plus one
/// half of its 26 surrounding cells
pub const HALF_SHELL_SIZE: usize = 14;

/// Offsets of the half shell, the cell itself first
///
/// Pair interactions are symmetric, so each pair of neighbouring cells only needs to be visited
/// from one side. The other 13 offsets are the mirror images of these.
pub fn half_shell_offsets() -> Vec<[i64; 3]> {
    let mut offsets = vec![[0, 0, 0]];
    for (dz, dy, dx) in iproduct!(-1i64..=1, -1i64..=1, -1i64..=1) {
        if dz > 0 || (dz == 0 && dy > 0) || (dz == 0 && dy == 0 && dx > 0) {
            offsets.push([dx, dy, dz]);
        }
    }
    offsets
}

/// The cell grid of one rank
///
/// The inner cells cover the region owned by the rank. They are surrounded by `frame` layers of
/// ghost cells on every face that mirror cells of the neighbouring ranks. Cells are numbered
/// with the x coordinate running fastest.
#[derive(Debug, Clone)]
pub struct GhostCellGrid {
    inner: [usize; 3],
    frame: usize,
    size: [usize; 3],
    local_left: Real3D,
    local_right: Real3D,
    cell_size: Real3D,
    inverse_cell_size: Real3D,
    neighbours: Vec<Vec<usize>>,
}

impl GhostCellGrid {
    /// Create a grid of `inner` cells covering the box from `local_left` to `local_right`
    pub fn new(inner: [usize; 3], frame: usize, local_left: Real3D, local_right: Real3D) -> Self {
        let mut cell_size = [0.0; 3];
        let mut inverse_cell_size = [0.0; 3];
        let mut size = [0; 3];
        for d in 0..3 {
            cell_size[d] = (local_right[d] - local_left[d]) / inner[d] as f64;
            inverse_cell_size[d] = 1.0 / cell_size[d];
            size[d] = inner[d] + 2 * frame;
        }
        let mut grid = Self {
            inner,
            frame,
            size,
            local_left,
            local_right,
            cell_size,
            inverse_cell_size,
            neighbours: vec![],
        };
        grid.neighbours = grid.build_neighbour_table();
        grid
    }

    fn build_neighbour_table(&self) -> Vec<Vec<usize>> {
        let offsets = half_shell_offsets();
        (0..self.number_of_cells())
            .map(|index| {
                let position = self.grid_position(index);
                if !self.is_inner_cell(position) {
                    return vec![];
                }
                offsets
                    .iter()
                    .map(|offset| {
                        let mut neighbour = [0; 3];
                        for d in 0..3 {
                            // inner cells are at least `frame >= 1` cells away from the border
                            neighbour[d] = (position[d] as i64 + offset[d]) as usize;
                        }
                        self.linear_index(neighbour)
                    })
                    .collect()
            })
            .collect()
    }

    /// Number of inner cells along each axis
    pub fn inner_grid(&self) -> [usize; 3] {
        self.inner
    }

    /// Number of ghost layers on each face
    pub fn frame_width(&self) -> usize {
        self.frame
    }

    /// Number of cells along each axis, ghost frame included
    pub fn grid_size(&self) -> [usize; 3] {
        self.size
    }

    /// Total number of cells
    pub fn number_of_cells(&self) -> usize {
        self.size[0] * self.size[1] * self.size[2]
    }

    /// Number of inner cells
    pub fn number_of_inner_cells(&self) -> usize {
        self.inner[0] * self.inner[1] * self.inner[2]
    }

    /// Size of a cell along each axis
    pub fn cell_size(&self) -> Real3D {
        self.cell_size
    }

    /// Lower corner of the owned region
    pub fn local_left(&self) -> Real3D {
        self.local_left
    }

    /// Upper corner of the owned region
    pub fn local_right(&self) -> Real3D {
        self.local_right
    }

    /// The linear index of the cell at a grid position
    pub fn linear_index(&self, position: [usize; 3]) -> usize {
        position[0] + self.size[0] * (position[1] + self.size[1] * position[2])
    }

    /// The grid position of the cell with a linear index
    pub fn grid_position(&self, index: usize) -> [usize; 3] {
        [
            index % self.size[0],
            (index / self.size[0]) % self.size[1],
            index / (self.size[0] * self.size[1]),
        ]
    }

    /// Is the grid position inside the ghost frame?
    pub fn is_inner_cell(&self, position: [usize; 3]) -> bool {
        (0..3).all(|d| position[d] >= self.frame && position[d] < self.frame + self.inner[d])
    }

    /// The cells a force loop visits from an inner cell: the cell itself and its half shell.
    /// Ghost cells have no neighbours.
    pub fn neighbours(&self, index: usize) -> &[usize] {
        &self.neighbours[index]
    }

    /// Unclipped grid position of a point; may lie outside the grid
    pub fn map_position_to_grid(&self, position: &Real3D) -> [i64; 3] {
        let mut out = [0; 3];
        for d in 0..3 {
            out[d] = ((position[d] - self.local_left[d]) * self.inverse_cell_size[d]).floor()
                as i64
                + self.frame as i64;
        }
        out
    }

    /// The inner cell closest to a point
    pub fn map_position_to_cell_clipped(&self, position: &Real3D) -> usize {
        let unclipped = self.map_position_to_grid(position);
        let mut clipped = [0; 3];
        for d in 0..3 {
            let low = self.frame as i64;
            let high = (self.frame + self.inner[d] - 1) as i64;
            clipped[d] = unclipped[d].clamp(low, high) as usize;
        }
        self.linear_index(clipped)
    }

    /// The inner cell containing a point, or `None` if the point is outside the owned region
    pub fn map_position_to_cell_checked(&self, position: &Real3D) -> Option<usize> {
        for d in 0..3 {
            if !(position[d] >= self.local_left[d] && position[d] < self.local_right[d]) {
                return None;
            }
        }
        // rounding can put a point just below the upper edge into the ghost frame
        Some(self.map_position_to_cell_clipped(position))
    }

    /// The cells whose coordinate along `axis` equals `layer`, in linear order
    pub fn slab(&self, axis: usize, layer: usize) -> Vec<usize> {
        iproduct!(0..self.size[2], 0..self.size[1], 0..self.size[0])
            .map(|(o, n, m)| [m, n, o])
            .filter(|position| position[axis] == layer)
            .map(|position| self.linear_index(position))
            .collect()
    }
}
