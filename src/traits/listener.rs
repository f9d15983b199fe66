//! Listeners that follow particles through migrations
use crate::buffer::{InBuffer, OutBuffer};
use crate::particle::Particle;
use crate::traits::Storage;
use crate::types::Result;

/// A structure keeping per-particle bookkeeping that has to move with its particles
///
/// Listeners are invoked synchronously by the storage, in the order they were connected.
pub trait ParticleListener {
    /// Called before `departing` leave this rank. Data owned by these particles is written to
    /// `buffer` and dropped locally.
    fn on_before_send(&mut self, departing: &[Particle], buffer: &mut OutBuffer);

    /// Called after `arrived` have been received. Reads exactly what the sending rank's
    /// [ParticleListener::on_before_send] wrote.
    fn on_after_receive(&mut self, arrived: &[Particle], buffer: &mut InBuffer) -> Result<()>;

    /// Called after the particles of the storage changed cells. Cached handles must be
    /// resolved again. Errors are reported on all ranks by the storage.
    fn on_rebuilt(&mut self, storage: &dyn Storage) -> Result<()>;
}
