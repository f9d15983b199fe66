//! Domain decomposition
//!
//! The box is split into a regular grid of regions, one per rank. Every rank stores its region
//! as a [GhostCellGrid] whose ghost frame mirrors the boundary cells of the neighbouring ranks.
//! Particles that leave the region of their rank are sent to the neighbour that owns their new
//! position, one axis at a time.

mod ghosts;
mod migration;
mod node_grid;
mod resort;
mod shear;

pub use node_grid::NodeGrid;
pub use resort::ResortTracker;
pub use shear::ShearRemap;

use crate::bc::OrthorhombicBC;
use crate::comm::ErrorCollector;
use crate::config::DecompositionConfig;
use crate::grid::{Cell, GhostCellGrid};
use crate::particle::{Particle, ParticleHandle};
use crate::signals::SignalBus;
use crate::storage::CellStorage;
use crate::traits::{BoundaryCondition, Communicator, Storage};
use crate::types::{Real3D, Result};
use ghosts::ExchangePlan;
use log::{debug, info};

/// Width of the ghost frame in cells
pub const GHOST_LAYERS: usize = 1;

/// Particle storage distributed over a regular grid of ranks
pub struct DomainDecomposition<C: Communicator> {
    comm: C,
    boundary: OrthorhombicBC,
    node_grid: NodeGrid,
    grid: GhostCellGrid,
    cells: CellStorage,
    signals: SignalBus,
    plans: Vec<ExchangePlan>,
    cell_grid: [usize; 3],
    skin: f64,
    max_cutoff: f64,
    shear_rate: f64,
    shear_shift: i64,
    use_verlet_list: bool,
    verlet_list: Option<Vec<(ParticleHandle, ParticleHandle)>>,
}

impl<C: Communicator> std::fmt::Debug for DomainDecomposition<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainDecomposition")
            .field("rank", &self.comm.rank())
            .field("node_grid", &self.node_grid)
            .field("cell_grid", &self.cell_grid)
            .field("real_particles", &self.cells.n_real_particles())
            .field("ghost_particles", &self.cells.n_ghost_particles())
            .finish()
    }
}

impl<C: Communicator> DomainDecomposition<C> {
    /// Set up the decomposition of this rank
    ///
    /// The configuration is checked before any message is sent, so an invalid configuration
    /// fails on every rank without blocking.
    pub fn new(comm: C, config: &DecompositionConfig) -> Result<Self> {
        config.validate(comm.size())?;
        let node_grid = NodeGrid::new(config.node_grid, comm.rank(), config.box_l);
        let grid = GhostCellGrid::new(
            config.cell_grid,
            GHOST_LAYERS,
            node_grid.local_left(),
            node_grid.local_right(),
        );
        let cells = (0..grid.number_of_cells())
            .map(|index| {
                let position = grid.grid_position(index);
                Cell::new(index, position, grid.is_inner_cell(position))
            })
            .collect();
        let mut dd = Self {
            boundary: OrthorhombicBC::new(config.box_l),
            cells: CellStorage::new(cells),
            signals: SignalBus::new(),
            plans: vec![],
            cell_grid: config.cell_grid,
            skin: config.skin,
            max_cutoff: config.max_cutoff,
            shear_rate: config.shear_rate,
            shear_shift: 0,
            use_verlet_list: config.verlet_list,
            verlet_list: None,
            comm,
            node_grid,
            grid,
        };
        dd.plans = dd.build_plans();
        info!(
            "rank {}: domain decomposition with node grid {:?}, {:?} cells per rank, local box {:?} to {:?}",
            dd.comm.rank(),
            config.node_grid,
            config.cell_grid,
            dd.node_grid.local_left(),
            dd.node_grid.local_right()
        );
        Ok(dd)
    }

    /// The grid of ranks
    pub fn node_grid(&self) -> &NodeGrid {
        &self.node_grid
    }

    /// Inner cells of this rank along each axis
    pub fn cell_grid(&self) -> [usize; 3] {
        self.cell_grid
    }

    /// The cell grid of this rank, ghost frame included
    pub fn grid(&self) -> &GhostCellGrid {
        &self.grid
    }

    /// Lower and upper corner of the region owned by this rank
    pub fn local_box(&self) -> (Real3D, Real3D) {
        (self.node_grid.local_left(), self.node_grid.local_right())
    }

    /// Is the cell with this linear index an inner cell?
    pub fn is_inner_cell(&self, index: usize) -> bool {
        self.grid.is_inner_cell(self.grid.grid_position(index))
    }

    /// Verlet skin
    pub fn skin(&self) -> f64 {
        self.skin
    }

    /// Largest interaction cutoff
    pub fn max_cutoff(&self) -> f64 {
        self.max_cutoff
    }

    /// Shear rate of the boundary
    pub fn shear_rate(&self) -> f64 {
        self.shear_rate
    }

    /// Current cell shift across the sheared boundary
    pub fn shear_shift(&self) -> i64 {
        self.shear_shift
    }

    /// The underlying communicator
    pub fn communicator(&self) -> &C {
        &self.comm
    }

    /// Mutable access to two different particles, for pair loops
    pub fn particle_pair_mut(
        &mut self,
        a: ParticleHandle,
        b: ParticleHandle,
    ) -> Option<(&mut Particle, &mut Particle)> {
        self.cells.particle_pair_mut(a, b)
    }

    /// Pairs of resident particles closer than `cutoff`, each pair once
    ///
    /// The first particle of every pair is real. Pairs are found by visiting the half shell of
    /// every inner cell, so a pair between two ranks is reported by exactly one of them.
    pub fn neighbour_pairs(&self, cutoff: f64) -> Vec<(ParticleHandle, ParticleHandle)> {
        let cutoff_sqr = cutoff * cutoff;
        let within = |a: &Particle, b: &Particle| distance_sqr(a, b) <= cutoff_sqr;
        let mut pairs = vec![];
        for &index in self.cells.active_cell_indices() {
            let own = self.cells.cell(index).particles();
            let neighbours = self.grid.neighbours(index);
            for (i, a) in own.iter().enumerate() {
                for (j, b) in own.iter().enumerate().skip(i + 1) {
                    if within(a, b) {
                        pairs.push((ParticleHandle::new(index, i), ParticleHandle::new(index, j)));
                    }
                }
            }
            for &other in neighbours.iter().skip(1) {
                let their = self.cells.cell(other).particles();
                for (i, a) in own.iter().enumerate() {
                    for (j, b) in their.iter().enumerate() {
                        if within(a, b) {
                            pairs.push((ParticleHandle::new(index, i), ParticleHandle::new(other, j)));
                        }
                    }
                }
            }
        }
        pairs
    }

    /// The Verlet list built with the last ghost frame, if one is kept
    ///
    /// It holds the pairs within `max_cutoff + skin` and stays valid until the frame is rebuilt.
    /// Particles added in between join it at the next rebuild.
    pub fn verlet_list(&self) -> Option<&[(ParticleHandle, ParticleHandle)]> {
        self.verlet_list.as_deref()
    }

    /// Pairs closer than `cutoff`, taken from the Verlet list when it covers the cutoff
    pub fn pairs_within(&self, cutoff: f64) -> Vec<(ParticleHandle, ParticleHandle)> {
        match &self.verlet_list {
            Some(list) if cutoff <= self.max_cutoff + self.skin => {
                let cutoff_sqr = cutoff * cutoff;
                list.iter()
                    .copied()
                    .filter(|&(a, b)| {
                        match (self.cells.particle(a), self.cells.particle(b)) {
                            (Some(a), Some(b)) => distance_sqr(a, b) <= cutoff_sqr,
                            _ => false,
                        }
                    })
                    .collect()
            }
            _ => self.neighbour_pairs(cutoff),
        }
    }

    /// Rebuild the Verlet list after the handles changed
    fn rebuild_verlet_list(&mut self) {
        if self.use_verlet_list {
            let pairs = self.neighbour_pairs(self.max_cutoff + self.skin);
            debug!("rank {}: Verlet list holds {} pairs", self.comm.rank(), pairs.len());
            self.verlet_list = Some(pairs);
        }
    }

    /// Fire the rebuild signal, recording listener failures
    fn notify_rebuilt(&mut self, errors: &mut ErrorCollector) {
        let listeners = self.signals.live();
        for e in SignalBus::rebuilt(&listeners, &*self) {
            errors.set_error(e);
        }
    }
}

fn distance_sqr(a: &Particle, b: &Particle) -> f64 {
    (0..3).map(|d| (a.position[d] - b.position[d]).powi(2)).sum()
}

impl<C: Communicator> Storage for DomainDecomposition<C> {
    fn cells(&self) -> &CellStorage {
        &self.cells
    }

    fn cells_mut(&mut self) -> &mut CellStorage {
        &mut self.cells
    }

    fn comm(&self) -> &dyn Communicator {
        &self.comm
    }

    fn boundary(&self) -> &dyn BoundaryCondition {
        &self.boundary
    }

    fn signals_mut(&mut self) -> &mut SignalBus {
        &mut self.signals
    }

    fn map_position_to_cell_clipping(&self, position: &Real3D) -> usize {
        self.grid.map_position_to_cell_clipped(position)
    }

    fn map_position_to_cell_checked(&self, position: &Real3D) -> Option<usize> {
        self.grid.map_position_to_cell_checked(position)
    }
}
