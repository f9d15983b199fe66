//! MPI communicator
use crate::buffer::{InBuffer, OutBuffer};
use crate::traits::{Communicator, Tag};
use crate::types::{Error, Result};
use mpi::{
    collective::{CommunicatorCollectives, Root, SystemOperation},
    datatype::PartitionMut,
    point_to_point::{Destination, Source},
    request::WaitGuard,
    topology::Communicator as MpiCommunicatorTrait,
    Count,
};

/// A [Communicator] backed by an MPI communicator
pub struct MpiCommunicator<C: MpiCommunicatorTrait> {
    comm: C,
}

impl<C: MpiCommunicatorTrait> MpiCommunicator<C> {
    /// Wrap an MPI communicator
    pub fn new(comm: C) -> Self {
        Self { comm }
    }

    /// The wrapped MPI communicator
    pub fn inner(&self) -> &C {
        &self.comm
    }
}

impl<C: MpiCommunicatorTrait> Communicator for MpiCommunicator<C> {
    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn exchange(&self, dest: usize, source: usize, tag: Tag, data: OutBuffer) -> Result<InBuffer> {
        if tag < 0 {
            return Err(Error::Communication(format!("negative tag {tag}")));
        }
        let dest_process = self.comm.process_at_rank(dest as i32);
        let source_process = self.comm.process_at_rank(source as i32);
        let (ints, reals) = mpi::request::scope(|scope| {
            let _ints =
                WaitGuard::from(dest_process.immediate_send_with_tag(scope, &data.ints[..], tag));
            let _reals =
                WaitGuard::from(dest_process.immediate_send_with_tag(scope, &data.reals[..], tag));
            let (ints, _status) = source_process.receive_vec_with_tag::<i64>(tag);
            let (reals, _status) = source_process.receive_vec_with_tag::<f64>(tag);
            (ints, reals)
        });
        Ok(InBuffer::new(ints, reals))
    }

    fn all_reduce_sum(&self, value: i64) -> Result<i64> {
        let mut sum = 0i64;
        self.comm
            .all_reduce_into(&value, &mut sum, SystemOperation::sum());
        Ok(sum)
    }

    fn all_reduce_max(&self, value: f64) -> Result<f64> {
        let mut max = 0.0f64;
        self.comm
            .all_reduce_into(&value, &mut max, SystemOperation::max());
        Ok(max)
    }

    fn all_gather_string(&self, text: &str) -> Result<Vec<String>> {
        let local = text.as_bytes();
        let count = local.len() as Count;
        let mut counts = vec![0 as Count; self.size()];
        self.comm.all_gather_into(&count, &mut counts[..]);

        let displacements = counts
            .iter()
            .scan(0, |offset, c| {
                let d = *offset;
                *offset += c;
                Some(d)
            })
            .collect::<Vec<Count>>();
        let total = counts.iter().sum::<Count>() as usize;
        let mut all = vec![0u8; total];
        {
            let mut partition = PartitionMut::new(&mut all[..], &counts[..], &displacements[..]);
            self.comm.all_gather_varcount_into(local, &mut partition);
        }

        counts
            .iter()
            .zip(&displacements)
            .map(|(c, d)| {
                let bytes = &all[*d as usize..(*d + *c) as usize];
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| Error::CorruptBuffer(format!("invalid report text: {e}")))
            })
            .collect()
    }

    fn broadcast_reals(&self, root: usize, data: &mut Vec<f64>) -> Result<()> {
        let root_process = self.comm.process_at_rank(root as i32);
        let mut n = data.len() as u64;
        root_process.broadcast_into(&mut n);
        if self.rank() != root {
            data.resize(n as usize, 0.0);
        }
        root_process.broadcast_into(&mut data[..]);
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        self.comm.barrier();
        Ok(())
    }
}
