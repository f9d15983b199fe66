//! Particles

use crate::types::{ParticleId, Real3D};

/// A particle
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    /// Global identifier
    pub id: ParticleId,
    /// Particle type, used by interactions to select parameters
    pub type_id: u32,
    /// Mass
    pub mass: f64,
    /// Position
    pub position: Real3D,
    /// Velocity
    pub velocity: Real3D,
    /// Force accumulator
    pub force: Real3D,
    /// Is this a ghost copy of a particle owned elsewhere?
    pub ghost: bool,
}

impl Particle {
    /// Create a real particle at rest with unit mass
    pub fn new(id: ParticleId, position: Real3D) -> Self {
        Self {
            id,
            type_id: 0,
            mass: 1.0,
            position,
            velocity: [0.0; 3],
            force: [0.0; 3],
            ghost: false,
        }
    }

    /// Create a ghost copy of this particle, the force accumulator is reset
    pub fn ghost_copy(&self) -> Self {
        Self {
            force: [0.0; 3],
            ghost: true,
            ..self.clone()
        }
    }
}

/// Address of a particle inside a storage: the cell index and the slot within the cell
///
/// A handle is only valid until the cell contents change; storages rebuild their index
/// (and notify listeners) whenever that happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticleHandle {
    /// Linear index of the cell
    pub cell: usize,
    /// Position inside the cell
    pub slot: usize,
}

impl ParticleHandle {
    /// Create a handle
    pub fn new(cell: usize, slot: usize) -> Self {
        Self { cell, slot }
    }
}
