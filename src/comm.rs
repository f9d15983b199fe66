//! Communicators and collective error handling

mod collective;
#[cfg(feature = "mpi")]
mod mpi;
mod threaded;

pub use collective::ErrorCollector;
#[cfg(feature = "mpi")]
pub use self::mpi::MpiCommunicator;
pub use threaded::{ThreadCommunicator, ThreadUniverse};
