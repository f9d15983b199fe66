//! Ranks as threads of one process
//!
//! Every rank owns the receiving end of a channel and a sender to every other rank. Messages
//! that arrive before they are asked for are kept until a matching receive.

use crate::buffer::{InBuffer, OutBuffer};
use crate::traits::{Communicator, Tag};
use crate::types::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

const REDUCE_TAG: Tag = -1;
const GATHER_TAG: Tag = -2;
const BROADCAST_TAG: Tag = -3;
const BARRIER_TAG: Tag = -4;

/// How long a receive waits before the peer is considered lost
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug)]
enum Payload {
    Buffer(Vec<i64>, Vec<f64>),
    Int(i64),
    Real(f64),
    Reals(Vec<f64>),
    Text(String),
}

#[derive(Debug)]
struct Envelope {
    source: usize,
    tag: Tag,
    payload: Payload,
}

/// Communicator between threads of the same process
#[derive(Debug)]
pub struct ThreadCommunicator {
    rank: usize,
    senders: Vec<Sender<Envelope>>,
    receiver: Receiver<Envelope>,
    pending: RefCell<VecDeque<Envelope>>,
}

/// Factory for connected [ThreadCommunicator]s
pub struct ThreadUniverse;

impl ThreadUniverse {
    /// Create `size` connected communicators, one per rank
    pub fn communicators(size: usize) -> Vec<ThreadCommunicator> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| ThreadCommunicator {
                rank,
                senders: senders.clone(),
                receiver,
                pending: RefCell::new(VecDeque::new()),
            })
            .collect()
    }

    /// Run `f` on `size` ranks, each in its own thread, and return the results in rank order
    ///
    /// A panic on any rank is propagated once all threads have finished.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(ThreadCommunicator) -> R + Sync,
    {
        let f = &f;
        std::thread::scope(|scope| {
            let handles = Self::communicators(size)
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

impl ThreadCommunicator {
    fn send(&self, dest: usize, tag: Tag, payload: Payload) -> Result<()> {
        let sender = self.senders.get(dest).ok_or_else(|| {
            Error::Communication(format!("rank {dest} does not exist"))
        })?;
        sender
            .send(Envelope {
                source: self.rank,
                tag,
                payload,
            })
            .map_err(|_| Error::Communication(format!("rank {dest} has shut down")))
    }

    fn receive(&self, source: usize, tag: Tag) -> Result<Payload> {
        {
            let mut pending = self.pending.borrow_mut();
            if let Some(i) = pending
                .iter()
                .position(|e| e.source == source && e.tag == tag)
            {
                if let Some(envelope) = pending.remove(i) {
                    return Ok(envelope.payload);
                }
            }
        }
        loop {
            let envelope = self
                .receiver
                .recv_timeout(RECEIVE_TIMEOUT)
                .map_err(|e| match e {
                    RecvTimeoutError::Timeout => Error::Communication(format!(
                        "rank {} timed out waiting for rank {source} (tag {tag})",
                        self.rank
                    )),
                    RecvTimeoutError::Disconnected => {
                        Error::Communication("all ranks have shut down".to_string())
                    }
                })?;
            if envelope.source == source && envelope.tag == tag {
                return Ok(envelope.payload);
            }
            self.pending.borrow_mut().push_back(envelope);
        }
    }

    fn send_to_others(&self, tag: Tag, make: impl Fn() -> Payload) -> Result<()> {
        for dest in (0..self.size()).filter(|r| *r != self.rank) {
            self.send(dest, tag, make())?;
        }
        Ok(())
    }

    fn unexpected(&self, source: usize) -> Error {
        Error::Communication(format!(
            "rank {} received an unexpected message from rank {source}",
            self.rank
        ))
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn exchange(&self, dest: usize, source: usize, tag: Tag, data: OutBuffer) -> Result<InBuffer> {
        self.send(dest, tag, Payload::Buffer(data.ints, data.reals))?;
        match self.receive(source, tag)? {
            Payload::Buffer(ints, reals) => Ok(InBuffer::new(ints, reals)),
            _ => Err(self.unexpected(source)),
        }
    }

    fn all_reduce_sum(&self, value: i64) -> Result<i64> {
        self.send_to_others(REDUCE_TAG, || Payload::Int(value))?;
        let mut sum = value;
        for source in (0..self.size()).filter(|r| *r != self.rank) {
            match self.receive(source, REDUCE_TAG)? {
                Payload::Int(v) => sum += v,
                _ => return Err(self.unexpected(source)),
            }
        }
        Ok(sum)
    }

    fn all_reduce_max(&self, value: f64) -> Result<f64> {
        self.send_to_others(REDUCE_TAG, || Payload::Real(value))?;
        let mut max = value;
        for source in (0..self.size()).filter(|r| *r != self.rank) {
            match self.receive(source, REDUCE_TAG)? {
                Payload::Real(v) => max = max.max(v),
                _ => return Err(self.unexpected(source)),
            }
        }
        Ok(max)
    }

    fn all_gather_string(&self, text: &str) -> Result<Vec<String>> {
        self.send_to_others(GATHER_TAG, || Payload::Text(text.to_string()))?;
        (0..self.size())
            .map(|source| {
                if source == self.rank {
                    return Ok(text.to_string());
                }
                match self.receive(source, GATHER_TAG)? {
                    Payload::Text(t) => Ok(t),
                    _ => Err(self.unexpected(source)),
                }
            })
            .collect()
    }

    fn broadcast_reals(&self, root: usize, data: &mut Vec<f64>) -> Result<()> {
        if self.rank == root {
            self.send_to_others(BROADCAST_TAG, || Payload::Reals(data.clone()))
        } else {
            match self.receive(root, BROADCAST_TAG)? {
                Payload::Reals(values) => {
                    *data = values;
                    Ok(())
                }
                _ => Err(self.unexpected(root)),
            }
        }
    }

    fn barrier(&self) -> Result<()> {
        self.send_to_others(BARRIER_TAG, || Payload::Int(0))?;
        for source in (0..self.size()).filter(|r| *r != self.rank) {
            self.receive(source, BARRIER_TAG)?;
        }
        Ok(())
    }
}
