//! Migration signals
//!
//! A storage owns a [SignalBus] and fires three events on it: before particles are sent to
//! another rank, after particles have been received, and after the particles of the rank have
//! been redistributed over the cells. Structures that keep per-particle data connect a
//! [ParticleListener] to the bus instead of being known to the storage.

use crate::buffer::{InBuffer, OutBuffer};
use crate::particle::Particle;
use crate::traits::{ParticleListener, Storage};
use crate::types::{Error, Result};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Identifies a connected listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection(usize);

/// The listeners of a storage, in connection order
#[derive(Default)]
pub struct SignalBus {
    listeners: Vec<(Connection, Weak<RefCell<dyn ParticleListener>>)>,
    next_id: usize,
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl SignalBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a listener. The bus does not keep the listener alive: once the last strong
    /// reference is dropped it is skipped and eventually forgotten.
    pub fn connect(&mut self, listener: Weak<RefCell<dyn ParticleListener>>) -> Connection {
        let connection = Connection(self.next_id);
        self.next_id += 1;
        self.listeners.push((connection, listener));
        connection
    }

    /// Disconnect a listener; returns false if it was not connected
    pub fn disconnect(&mut self, connection: Connection) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(c, _)| *c != connection);
        self.listeners.len() != before
    }

    /// Number of live listeners
    pub fn len(&self) -> usize {
        self.listeners
            .iter()
            .filter(|(_, l)| l.strong_count() > 0)
            .count()
    }

    /// Are there no live listeners?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Strong references to the live listeners, dropping dead ones
    pub fn live(&mut self) -> Vec<Rc<RefCell<dyn ParticleListener>>> {
        self.listeners.retain(|(_, l)| l.strong_count() > 0);
        self.listeners.iter().filter_map(|(_, l)| l.upgrade()).collect()
    }

    /// Fire the pre-migration event
    pub fn before_send(&mut self, departing: &[Particle], buffer: &mut OutBuffer) {
        for listener in self.live() {
            listener.borrow_mut().on_before_send(departing, buffer);
        }
    }

    /// Fire the post-migration event
    pub fn after_receive(&mut self, arrived: &[Particle], buffer: &mut InBuffer) -> Result<()> {
        for listener in self.live() {
            listener.borrow_mut().on_after_receive(arrived, buffer)?;
        }
        Ok(())
    }

    /// Fire the post-rebuild event on listeners taken from [SignalBus::live], returning the
    /// error of every listener that failed
    pub fn rebuilt(
        listeners: &[Rc<RefCell<dyn ParticleListener>>],
        storage: &dyn Storage,
    ) -> Vec<Error> {
        listeners
            .iter()
            .filter_map(|l| l.borrow_mut().on_rebuilt(storage).err())
            .collect()
    }
}
