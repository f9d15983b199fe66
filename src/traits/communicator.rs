//! Communication between ranks
use crate::buffer::{InBuffer, OutBuffer};
use crate::types::Result;

/// Message tag
pub type Tag = i32;

/// A communicator connecting the ranks that share a simulation
///
/// Every method is collective in the sense that all ranks taking part must call it in the same
/// order; [Communicator::exchange] only involves the two named partners.
pub trait Communicator {
    /// The rank of this process
    fn rank(&self) -> usize;

    /// The number of ranks
    fn size(&self) -> usize;

    /// Send `data` to `dest` and receive a message with the same tag from `source`
    ///
    /// The send must not block the receive, so that rings of exchanges cannot deadlock.
    fn exchange(&self, dest: usize, source: usize, tag: Tag, data: OutBuffer) -> Result<InBuffer>;

    /// Sum an integer over all ranks
    fn all_reduce_sum(&self, value: i64) -> Result<i64>;

    /// Maximum of a real over all ranks
    fn all_reduce_max(&self, value: f64) -> Result<f64>;

    /// Gather a string from every rank on every rank, in rank order
    fn all_gather_string(&self, text: &str) -> Result<Vec<String>>;

    /// Broadcast a vector of reals from `root`; on other ranks the input is replaced
    fn broadcast_reals(&self, root: usize, data: &mut Vec<f64>) -> Result<()>;

    /// Wait until every rank has reached this point
    fn barrier(&self) -> Result<()>;
}
