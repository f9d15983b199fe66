//! Particle storage
use crate::particle::{Particle, ParticleHandle};
use crate::signals::SignalBus;
use crate::storage::CellStorage;
use crate::traits::{BoundaryCondition, Communicator};
use crate::types::{Error, ParticleId, Real3D, Result};

/// The particle storage of one rank
///
/// An implementation owns a [CellStorage] and decides how positions map to cells. Everything
/// integrators and satellite structures need is provided on top of that.
pub trait Storage {
    /// The cells and the particle index
    fn cells(&self) -> &CellStorage;

    /// Mutable access to the cells and the particle index
    fn cells_mut(&mut self) -> &mut CellStorage;

    /// The communicator
    fn comm(&self) -> &dyn Communicator;

    /// The boundary condition of the simulation box
    fn boundary(&self) -> &dyn BoundaryCondition;

    /// The listeners notified about migrations and rebuilds
    fn signals_mut(&mut self) -> &mut SignalBus;

    /// Map a position to a cell, clamping positions outside the local region onto the closest
    /// cell. Always returns a valid cell index.
    fn map_position_to_cell_clipping(&self, position: &Real3D) -> usize;

    /// Map a position to an active cell, or `None` if the position is outside the region this
    /// rank owns
    fn map_position_to_cell_checked(&self, position: &Real3D) -> Option<usize>;

    /// Check if a position (after folding into the box) is owned by this rank
    fn owns_position(&self, position: &Real3D) -> bool {
        let mut folded = *position;
        self.boundary().fold_position(&mut folded);
        self.map_position_to_cell_checked(&folded).is_some()
    }

    /// Add a new real particle at rest
    fn add_particle(&mut self, id: ParticleId, position: &Real3D) -> Result<ParticleHandle> {
        self.insert_particle(Particle::new(id, *position))
    }

    /// Insert a real particle, keeping its mass, type and velocity
    fn insert_particle(&mut self, mut particle: Particle) -> Result<ParticleHandle> {
        self.boundary().fold_position(&mut particle.position);
        let cell = self
            .map_position_to_cell_checked(&particle.position)
            .ok_or(Error::Placement {
                id: particle.id,
                position: particle.position,
                rank: self.comm().rank(),
            })?;
        if self.cells().real_handle(particle.id).is_some() {
            return Err(Error::Consistency(format!(
                "particle {} already exists on rank {}",
                particle.id,
                self.comm().rank()
            )));
        }
        particle.ghost = false;
        particle.force = [0.0; 3];
        Ok(self.cells_mut().append_indexed(cell, particle))
    }

    /// Look up a particle resident on this rank, real or ghost
    fn lookup_local_particle(&self, id: ParticleId) -> Option<&Particle> {
        self.cells()
            .local_handle(id)
            .and_then(|h| self.cells().particle(h))
    }

    /// Look up a real particle of this rank
    fn lookup_real_particle(&self, id: ParticleId) -> Option<&Particle> {
        self.cells()
            .real_handle(id)
            .and_then(|h| self.cells().particle(h))
    }

    /// Number of real particles on this rank
    fn n_active_particles(&self) -> usize {
        self.cells().n_real_particles()
    }

    /// Import the real particles of another storage that fall into the region of this rank
    fn fetch_particles(&mut self, other: &dyn Storage) -> Result<()> {
        for p in other.cells().real_particles() {
            if self.owns_position(&p.position) {
                self.insert_particle(p.clone())?;
            }
        }
        Ok(())
    }
}
