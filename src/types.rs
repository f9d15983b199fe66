//! General type definitions

/// A point or vector in three dimensional space
pub type Real3D = [f64; 3];

/// Globally unique particle identifier
pub type ParticleId = u64;

/// Error type
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A node grid axis is zero
    #[error("illegal node grid {0:?}: every axis needs at least one rank")]
    NodeGridIllegal([usize; 3]),
    /// A cell grid axis is zero
    #[error("illegal cell grid {0:?}: every axis needs at least one cell")]
    CellGridIllegal([usize; 3]),
    /// The node grid does not match the communicator size
    #[error("node grid {grid:?} holds {product} ranks but the communicator has {size}")]
    NodeGridMismatch {
        /// The requested node grid
        grid: [usize; 3],
        /// Number of ranks described by the grid
        product: usize,
        /// Communicator size
        size: usize,
    },
    /// The simulation box is degenerate
    #[error("illegal box {0:?}: every side must be positive and finite")]
    IllegalBox(Real3D),
    /// Cells are smaller than the interaction range
    #[error("cell size {cell_size} along axis {axis} is smaller than the interaction range {range}")]
    CellTooSmall {
        /// Axis
        axis: usize,
        /// Cell size along the axis
        cell_size: f64,
        /// Cutoff plus skin
        range: f64,
    },
    /// Sheared boundaries are not supported by this setup
    #[error("sheared boundary unsupported: {0}")]
    ShearUnsupported(String),
    /// A position does not map to a cell this rank owns
    #[error("particle {id} at {position:?} does not belong to any cell of rank {rank}")]
    Placement {
        /// Particle id
        id: ParticleId,
        /// Position after folding
        position: Real3D,
        /// Rank that rejected the particle
        rank: usize,
    },
    /// A required particle is not resident
    #[error("consistency violation: {0}")]
    Consistency(String),
    /// A particle moved further than the decomposition can follow
    #[error("migration overflow: {0}")]
    MigrationOverflow(String),
    /// A received buffer could not be decoded
    #[error("corrupt buffer: {0}")]
    CorruptBuffer(String),
    /// The communication layer failed
    #[error("communication failure: {0}")]
    Communication(String),
    /// Errors reported by one or more ranks during a collective check
    #[error("collective failure:\n{0}")]
    Collective(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
