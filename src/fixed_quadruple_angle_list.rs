//! Fixed quadruples with cached dihedral angles
//!
//! Every quadruple `(p1, p2, p3, p4)` is stored on the rank that owns its anchor `p2` as a real
//! particle, together with the dihedral angle the quadruple had when it was added. The entries
//! travel with the anchor when it migrates. After every redistribution the list resolves the
//! handles of all four particles for the quadruples it holds.
use crate::buffer::{InBuffer, OutBuffer};
use crate::comm::ErrorCollector;
use crate::particle::{Particle, ParticleHandle};
use crate::signals::Connection;
use crate::traits::{BoundaryCondition, ParticleListener, Storage};
use crate::types::{Error, ParticleId, Real3D, Result};
use log::debug;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Partners `(p1, p3, p4)` of an anchor with the cached angle
type Entry = ([ParticleId; 3], f64);

/// Distributed list of particle quadruples keyed by their anchor particle
#[derive(Debug, Default)]
pub struct FixedQuadrupleAngleList {
    table: BTreeMap<ParticleId, Vec<Entry>>,
    local: Vec<[ParticleHandle; 4]>,
    connection: Option<Connection>,
}

fn cross(a: &Real3D, b: &Real3D) -> Real3D {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: &Real3D, b: &Real3D) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// The angle between the planes (p1, p2, p3) and (p2, p3, p4)
pub fn dihedral_angle(bc: &dyn BoundaryCondition, positions: [&Real3D; 4]) -> f64 {
    let r21 = bc.minimum_image_vector(positions[1], positions[0]);
    let r32 = bc.minimum_image_vector(positions[2], positions[1]);
    let r43 = bc.minimum_image_vector(positions[3], positions[2]);
    let n1 = cross(&r21, &r32);
    let n2 = cross(&r32, &r43);
    let cos_phi = dot(&n1, &n2) / (dot(&n1, &n1).sqrt() * dot(&n2, &n2).sqrt());
    cos_phi.clamp(-1.0, 1.0).acos()
}

impl FixedQuadrupleAngleList {
    /// Create an empty list listening to the migrations of a storage
    pub fn new<S: Storage + ?Sized>(storage: &mut S) -> Rc<RefCell<Self>> {
        let list = Rc::new(RefCell::new(Self::default()));
        let listener: Rc<RefCell<dyn ParticleListener>> = list.clone();
        let connection = storage.signals_mut().connect(Rc::downgrade(&listener));
        list.borrow_mut().connection = Some(connection);
        list
    }

    /// Stop listening to the storage; returns false if the list was not connected
    pub fn disconnect<S: Storage + ?Sized>(&mut self, storage: &mut S) -> bool {
        match self.connection.take() {
            Some(c) => storage.signals_mut().disconnect(c),
            None => false,
        }
    }

    /// Add a quadruple. Must be called on every rank with the same arguments.
    ///
    /// Returns true on the rank that owns the anchor `p2`, which caches the current dihedral
    /// angle. That rank has to see the other three particles, otherwise every rank fails.
    pub fn add(
        &mut self,
        storage: &dyn Storage,
        p1: ParticleId,
        p2: ParticleId,
        p3: ParticleId,
        p4: ParticleId,
    ) -> Result<bool> {
        let mut errors = ErrorCollector::new();
        let mut added = false;
        if let Some(h2) = storage.cells().real_handle(p2) {
            let partners = [("p1", p1), ("p3", p3), ("p4", p4)].map(|(name, id)| {
                let handle = storage.cells().local_handle(id);
                if handle.is_none() {
                    errors.set_error(Error::Consistency(format!(
                        "quadruple particle {name} {id} does not exist here and cannot be added"
                    )));
                }
                handle
            });
            if let [Some(h1), Some(h3), Some(h4)] = partners {
                let cells = storage.cells();
                let position = |h| cells.particle(h).map(|p: &Particle| p.position);
                if let (Some(x1), Some(x2), Some(x3), Some(x4)) =
                    (position(h1), position(h2), position(h3), position(h4))
                {
                    let angle = dihedral_angle(storage.boundary(), [&x1, &x2, &x3, &x4]);
                    self.table.entry(p2).or_default().push(([p1, p3, p4], angle));
                    self.local.push([h1, h2, h3, h4]);
                    added = true;
                }
            }
        }
        errors.check(storage.comm())?;
        Ok(added)
    }

    /// The cached angle of a quadruple, if it is stored on this rank
    pub fn get_angle(
        &self,
        p1: ParticleId,
        p2: ParticleId,
        p3: ParticleId,
        p4: ParticleId,
    ) -> Option<f64> {
        self.table
            .get(&p2)?
            .iter()
            .find(|(partners, _)| *partners == [p1, p3, p4])
            .map(|(_, angle)| *angle)
    }

    /// The quadruples stored on this rank as `[p1, p2, p3, p4]`
    pub fn quadruples(&self) -> Vec<[ParticleId; 4]> {
        self.quadruples_angles().into_iter().map(|(q, _)| q).collect()
    }

    /// The quadruples stored on this rank with their cached angles
    pub fn quadruples_angles(&self) -> Vec<([ParticleId; 4], f64)> {
        self.table
            .iter()
            .flat_map(|(p2, entries)| {
                entries
                    .iter()
                    .map(move |([p1, p3, p4], angle)| ([*p1, *p2, *p3, *p4], *angle))
            })
            .collect()
    }

    /// Number of quadruples stored on this rank
    pub fn len(&self) -> usize {
        self.table.values().map(Vec::len).sum()
    }

    /// Are there no quadruples on this rank?
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Handles of the particles of every quadruple stored on this rank
    pub fn local_quadruples(&self) -> &[[ParticleHandle; 4]] {
        &self.local
    }
}

impl ParticleListener for FixedQuadrupleAngleList {
    fn on_before_send(&mut self, departing: &[Particle], buffer: &mut OutBuffer) {
        let mut ints = vec![];
        let mut reals = vec![];
        for p in departing {
            if let Some(entries) = self.table.remove(&p.id) {
                ints.push(p.id as i64);
                ints.push(entries.len() as i64);
                for ([p1, p3, p4], angle) in entries {
                    ints.extend([p1 as i64, p3 as i64, p4 as i64]);
                    reals.push(angle);
                }
            }
        }
        buffer.write_ints(&ints);
        buffer.write_reals(&reals);
    }

    fn on_after_receive(&mut self, _arrived: &[Particle], buffer: &mut InBuffer) -> Result<()> {
        let ints = buffer.read_ints()?;
        let reals = buffer.read_reals()?;
        let as_id = |value: i64| {
            ParticleId::try_from(value)
                .map_err(|_| Error::CorruptBuffer(format!("invalid particle id {value}")))
        };
        let mut ids = ints.into_iter();
        let mut angles = reals.into_iter();
        let mut received = 0;
        while let Some(p2) = ids.next() {
            let p2 = as_id(p2)?;
            let n = ids
                .next()
                .ok_or_else(|| Error::CorruptBuffer(format!("no count for anchor {p2}")))?;
            for _ in 0..n {
                let (Some(p1), Some(p3), Some(p4), Some(angle)) =
                    (ids.next(), ids.next(), ids.next(), angles.next())
                else {
                    return Err(Error::CorruptBuffer(format!(
                        "truncated quadruples of anchor {p2}"
                    )));
                };
                self.table
                    .entry(p2)
                    .or_default()
                    .push(([as_id(p1)?, as_id(p3)?, as_id(p4)?], angle));
                received += 1;
            }
        }
        if angles.next().is_some() {
            return Err(Error::CorruptBuffer(
                "more angles than quadruples received".to_string(),
            ));
        }
        if received > 0 {
            debug!("received {received} quadruples");
        }
        Ok(())
    }

    fn on_rebuilt(&mut self, storage: &dyn Storage) -> Result<()> {
        self.local.clear();
        let mut missing = vec![];
        for (p2, entries) in &self.table {
            let h2 = storage.cells().real_handle(*p2);
            if h2.is_none() {
                missing.push(format!("quadruple particle p2 {p2} does not exist here"));
            }
            for ([p1, p3, p4], _) in entries {
                let partners = [("p1", *p1), ("p3", *p3), ("p4", *p4)].map(|(name, id)| {
                    let handle = storage.cells().local_handle(id);
                    if handle.is_none() {
                        missing.push(format!("quadruple particle {name} {id} does not exist here"));
                    }
                    handle
                });
                if let (Some(h2), [Some(h1), Some(h3), Some(h4)]) = (h2, partners) {
                    self.local.push([h1, h2, h3, h4]);
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Consistency(missing.join("; ")))
        }
    }
}
