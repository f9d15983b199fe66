//! Cells

use crate::particle::Particle;

/// A bucket of particles at a fixed position of the cell grid
#[derive(Debug, Clone)]
pub struct Cell {
    index: usize,
    grid_position: [usize; 3],
    inner: bool,
    pub(crate) particles: Vec<Particle>,
}

impl Cell {
    /// Create an empty cell
    pub fn new(index: usize, grid_position: [usize; 3], inner: bool) -> Self {
        Self {
            index,
            grid_position,
            inner,
            particles: vec![],
        }
    }

    /// Linear index of the cell
    pub fn index(&self) -> usize {
        self.index
    }

    /// Position of the cell in the grid, ghost frame included
    pub fn grid_position(&self) -> [usize; 3] {
        self.grid_position
    }

    /// Is this an active cell holding real particles?
    pub fn is_inner(&self) -> bool {
        self.inner
    }

    /// The particles in the cell
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Mutable access to the particles in the cell
    ///
    /// The slice cannot grow or shrink: adding or removing particles goes through the storage so
    /// that its index stays valid.
    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    /// Number of particles in the cell
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// Is the cell empty?
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}
