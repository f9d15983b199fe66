//! The grid of ranks
use crate::types::Real3D;

/// Position of a rank in the grid of ranks and the region of the box it owns
///
/// Ranks are numbered with the x position running fastest. Neighbours wrap around periodically.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeGrid {
    grid: [usize; 3],
    position: [usize; 3],
    box_l: Real3D,
    local_left: Real3D,
    local_right: Real3D,
}

impl NodeGrid {
    /// The node grid as seen from `rank`
    pub fn new(grid: [usize; 3], rank: usize, box_l: Real3D) -> Self {
        let position = Self::position_in(grid, rank);
        let mut local_left = [0.0; 3];
        let mut local_right = [0.0; 3];
        for d in 0..3 {
            local_left[d] = position[d] as f64 * box_l[d] / grid[d] as f64;
            local_right[d] = if position[d] + 1 == grid[d] {
                box_l[d]
            } else {
                (position[d] + 1) as f64 * box_l[d] / grid[d] as f64
            };
        }
        Self {
            grid,
            position,
            box_l,
            local_left,
            local_right,
        }
    }

    fn position_in(grid: [usize; 3], rank: usize) -> [usize; 3] {
        [
            rank % grid[0],
            (rank / grid[0]) % grid[1],
            rank / (grid[0] * grid[1]),
        ]
    }

    /// Number of ranks along each axis
    pub fn grid(&self) -> [usize; 3] {
        self.grid
    }

    /// Total number of ranks
    pub fn number_of_nodes(&self) -> usize {
        self.grid.iter().product()
    }

    /// Position of this rank
    pub fn node_position(&self) -> [usize; 3] {
        self.position
    }

    /// The rank at a grid position
    pub fn rank_of(&self, position: [usize; 3]) -> usize {
        position[0] + self.grid[0] * (position[1] + self.grid[1] * position[2])
    }

    /// The grid position of a rank
    pub fn position_of(&self, rank: usize) -> [usize; 3] {
        Self::position_in(self.grid, rank)
    }

    /// The neighbouring rank along `dim`; direction 0 is left, 1 is right
    pub fn neighbour_rank(&self, dim: usize, dir: usize) -> usize {
        let mut position = self.position;
        position[dim] = if dir == 0 {
            (position[dim] + self.grid[dim] - 1) % self.grid[dim]
        } else {
            (position[dim] + 1) % self.grid[dim]
        };
        self.rank_of(position)
    }

    /// Does this rank touch the lower face of the box along `dim`?
    pub fn is_left_boundary(&self, dim: usize) -> bool {
        self.position[dim] == 0
    }

    /// Does this rank touch the upper face of the box along `dim`?
    pub fn is_right_boundary(&self, dim: usize) -> bool {
        self.position[dim] + 1 == self.grid[dim]
    }

    /// Side lengths of the whole box
    pub fn box_l(&self) -> Real3D {
        self.box_l
    }

    /// Lower corner of the owned region
    pub fn local_left(&self) -> Real3D {
        self.local_left
    }

    /// Upper corner of the owned region
    pub fn local_right(&self) -> Real3D {
        self.local_right
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_positions() {
        let grid = NodeGrid::new([2, 3, 2], 7, [4.0, 6.0, 8.0]);
        assert_eq!(grid.node_position(), [1, 0, 1]);
        assert_eq!(grid.number_of_nodes(), 12);
        for rank in 0..12 {
            assert_eq!(grid.rank_of(grid.position_of(rank)), rank);
        }
        assert_eq!(grid.local_left(), [2.0, 0.0, 4.0]);
        assert_eq!(grid.local_right(), [4.0, 2.0, 8.0]);
        assert!(grid.is_right_boundary(0));
        assert!(grid.is_left_boundary(1));
        assert!(!grid.is_right_boundary(1));
    }

    #[test]
    fn test_neighbours() {
        let grid = NodeGrid::new([2, 3, 2], 7, [4.0, 6.0, 8.0]);
        assert_eq!(grid.neighbour_rank(0, 0), 6);
        assert_eq!(grid.neighbour_rank(0, 1), 6);
        assert_eq!(grid.neighbour_rank(1, 0), 11);
        assert_eq!(grid.neighbour_rank(1, 1), 9);
        assert_eq!(grid.neighbour_rank(2, 0), 1);

        let single = NodeGrid::new([1, 1, 1], 0, [1.0; 3]);
        assert_eq!(single.neighbour_rank(2, 1), 0);
    }
}
