//! Trait definitions

mod boundary;
mod communicator;
mod listener;
mod storage;

pub use boundary::BoundaryCondition;
pub use communicator::{Communicator, Tag};
pub use listener::ParticleListener;
pub use storage::Storage;
