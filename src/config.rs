//! Decomposition setup
use crate::types::{Error, Real3D, Result};
use itertools::iproduct;

/// Parameters of a domain decomposition
///
/// `node_grid` is the number of ranks along each axis and `cell_grid` the number of inner cells
/// of every rank along each axis. All ranks share the same configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DecompositionConfig {
    /// Side lengths of the periodic box
    pub box_l: Real3D,
    /// Ranks along each axis
    pub node_grid: [usize; 3],
    /// Inner cells of each rank along each axis
    pub cell_grid: [usize; 3],
    /// Verlet skin
    pub skin: f64,
    /// Largest interaction cutoff
    pub max_cutoff: f64,
    /// Shear rate of a Lees-Edwards boundary, zero for plain periodic boundaries
    pub shear_rate: f64,
    /// Keep a Verlet list of the pairs within `max_cutoff + skin` between redistributions
    pub verlet_list: bool,
}

impl DecompositionConfig {
    /// Create a configuration without cutoff, skin or shear
    pub fn new(box_l: Real3D, node_grid: [usize; 3], cell_grid: [usize; 3]) -> Self {
        Self {
            box_l,
            node_grid,
            cell_grid,
            skin: 0.0,
            max_cutoff: 0.0,
            shear_rate: 0.0,
            verlet_list: false,
        }
    }

    /// Set the skin
    pub fn with_skin(mut self, skin: f64) -> Self {
        self.skin = skin;
        self
    }

    /// Set the largest interaction cutoff
    pub fn with_cutoff(mut self, max_cutoff: f64) -> Self {
        self.max_cutoff = max_cutoff;
        self
    }

    /// Set the shear rate
    pub fn with_shear_rate(mut self, shear_rate: f64) -> Self {
        self.shear_rate = shear_rate;
        self
    }

    /// Keep a Verlet list
    pub fn with_verlet_list(mut self, verlet_list: bool) -> Self {
        self.verlet_list = verlet_list;
        self
    }

    /// Interaction range a cell has to cover
    pub fn range(&self) -> f64 {
        self.max_cutoff + self.skin
    }

    /// Number of cells along each axis over all ranks
    pub fn global_cell_grid(&self) -> [usize; 3] {
        [
            self.node_grid[0] * self.cell_grid[0],
            self.node_grid[1] * self.cell_grid[1],
            self.node_grid[2] * self.cell_grid[2],
        ]
    }

    /// Size of a cell along each axis
    pub fn cell_size(&self) -> Real3D {
        let cells = self.global_cell_grid();
        [
            self.box_l[0] / cells[0] as f64,
            self.box_l[1] / cells[1] as f64,
            self.box_l[2] / cells[2] as f64,
        ]
    }

    /// Check the configuration for a communicator of `n_ranks` ranks
    pub fn validate(&self, n_ranks: usize) -> Result<()> {
        if self.node_grid.contains(&0) {
            return Err(Error::NodeGridIllegal(self.node_grid));
        }
        if self.cell_grid.contains(&0) {
            return Err(Error::CellGridIllegal(self.cell_grid));
        }
        let product = self.node_grid.iter().product::<usize>();
        if product != n_ranks {
            return Err(Error::NodeGridMismatch {
                grid: self.node_grid,
                product,
                size: n_ranks,
            });
        }
        if self.box_l.iter().any(|l| !(l.is_finite() && *l > 0.0)) {
            return Err(Error::IllegalBox(self.box_l));
        }
        let range = self.range();
        for (axis, cell_size) in self.cell_size().into_iter().enumerate() {
            if cell_size < range {
                return Err(Error::CellTooSmall {
                    axis,
                    cell_size,
                    range,
                });
            }
        }
        Ok(())
    }

    /// Choose node and cell grids for a box
    ///
    /// The node grid is the factorisation of `n_ranks` with the smallest surface between
    /// neighbouring ranks. Every rank then gets as many cells as fit the interaction range.
    pub fn automatic(box_l: Real3D, n_ranks: usize, max_cutoff: f64, skin: f64) -> Result<Self> {
        if box_l.iter().any(|l| !(l.is_finite() && *l > 0.0)) {
            return Err(Error::IllegalBox(box_l));
        }
        let node_grid = most_cubic_node_grid(box_l, n_ranks)?;
        let range = max_cutoff + skin;
        let mut cell_grid = [0; 3];
        for d in 0..3 {
            let local = box_l[d] / node_grid[d] as f64;
            cell_grid[d] = if range > 0.0 {
                (local / range).floor() as usize
            } else {
                1
            };
            if cell_grid[d] == 0 {
                return Err(Error::CellTooSmall {
                    axis: d,
                    cell_size: local,
                    range,
                });
            }
        }
        Ok(Self::new(box_l, node_grid, cell_grid)
            .with_cutoff(max_cutoff)
            .with_skin(skin))
    }
}

fn most_cubic_node_grid(box_l: Real3D, n_ranks: usize) -> Result<[usize; 3]> {
    if n_ranks == 0 {
        return Err(Error::NodeGridIllegal([0; 3]));
    }
    let surface = |g: [usize; 3]| {
        let l = [
            box_l[0] / g[0] as f64,
            box_l[1] / g[1] as f64,
            box_l[2] / g[2] as f64,
        ];
        l[0] * l[1] + l[1] * l[2] + l[0] * l[2]
    };
    let mut best = [n_ranks, 1, 1];
    for (x, y) in iproduct!(1..=n_ranks, 1..=n_ranks) {
        if n_ranks % (x * y) != 0 {
            continue;
        }
        let candidate = [x, y, n_ranks / (x * y)];
        if surface(candidate) < surface(best) {
            best = candidate;
        }
    }
    Ok(best)
}
