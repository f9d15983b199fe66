//! Message buffers
//!
//! A message consists of two streams, one of integers and one of reals. Writers append to the
//! streams in a fixed order and readers consume them in the same order; there is no framing
//! beyond what the writer adds itself.

use crate::particle::Particle;
use crate::types::{Error, Real3D, Result};

/// Buffer for an outgoing message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutBuffer {
    pub(crate) ints: Vec<i64>,
    pub(crate) reals: Vec<f64>,
}

impl OutBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an integer
    pub fn write_int(&mut self, value: i64) {
        self.ints.push(value);
    }

    /// Append a real
    pub fn write_real(&mut self, value: f64) {
        self.reals.push(value);
    }

    /// Append a three dimensional vector
    pub fn write_real3d(&mut self, value: &Real3D) {
        self.reals.extend_from_slice(value);
    }

    /// Append a length-prefixed vector of integers
    pub fn write_ints(&mut self, values: &[i64]) {
        self.ints.push(values.len() as i64);
        self.ints.extend_from_slice(values);
    }

    /// Append a length-prefixed vector of reals
    pub fn write_reals(&mut self, values: &[f64]) {
        self.ints.push(values.len() as i64);
        self.reals.extend_from_slice(values);
    }

    /// Append the full state of a particle, the force accumulator excluded
    pub fn write_particle(&mut self, p: &Particle) {
        self.ints.push(p.id as i64);
        self.ints.push(i64::from(p.type_id));
        self.reals.push(p.mass);
        self.write_real3d(&p.position);
        self.write_real3d(&p.velocity);
    }

    /// The integer stream
    pub fn ints(&self) -> &[i64] {
        &self.ints
    }

    /// The real stream
    pub fn reals(&self) -> &[f64] {
        &self.reals
    }

    /// Is the buffer empty?
    pub fn is_empty(&self) -> bool {
        self.ints.is_empty() && self.reals.is_empty()
    }

    /// Turn an outgoing buffer into an incoming one, as if it had been sent to this rank
    pub fn into_in_buffer(self) -> InBuffer {
        InBuffer::new(self.ints, self.reals)
    }
}

/// Buffer for an incoming message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InBuffer {
    ints: Vec<i64>,
    reals: Vec<f64>,
    int_pos: usize,
    real_pos: usize,
}

impl InBuffer {
    /// Wrap received streams
    pub fn new(ints: Vec<i64>, reals: Vec<f64>) -> Self {
        Self {
            ints,
            reals,
            int_pos: 0,
            real_pos: 0,
        }
    }

    /// Read an integer
    pub fn read_int(&mut self) -> Result<i64> {
        let value = *self.ints.get(self.int_pos).ok_or_else(|| {
            Error::CorruptBuffer(format!(
                "integer stream exhausted after {} entries",
                self.ints.len()
            ))
        })?;
        self.int_pos += 1;
        Ok(value)
    }

    /// Read a non-negative integer as a count
    pub fn read_count(&mut self) -> Result<usize> {
        let value = self.read_int()?;
        usize::try_from(value)
            .map_err(|_| Error::CorruptBuffer(format!("negative count {value}")))
    }

    /// Read a real
    pub fn read_real(&mut self) -> Result<f64> {
        let value = *self.reals.get(self.real_pos).ok_or_else(|| {
            Error::CorruptBuffer(format!(
                "real stream exhausted after {} entries",
                self.reals.len()
            ))
        })?;
        self.real_pos += 1;
        Ok(value)
    }

    /// Read a three dimensional vector
    pub fn read_real3d(&mut self) -> Result<Real3D> {
        Ok([self.read_real()?, self.read_real()?, self.read_real()?])
    }

    /// Read a length-prefixed vector of integers
    pub fn read_ints(&mut self) -> Result<Vec<i64>> {
        let n = self.read_count()?;
        if self.int_pos + n > self.ints.len() {
            return Err(Error::CorruptBuffer(format!(
                "integer vector of length {n} exceeds the message"
            )));
        }
        let values = self.ints[self.int_pos..self.int_pos + n].to_vec();
        self.int_pos += n;
        Ok(values)
    }

    /// Read a length-prefixed vector of reals
    pub fn read_reals(&mut self) -> Result<Vec<f64>> {
        let n = self.read_count()?;
        if self.real_pos + n > self.reals.len() {
            return Err(Error::CorruptBuffer(format!(
                "real vector of length {n} exceeds the message"
            )));
        }
        let values = self.reals[self.real_pos..self.real_pos + n].to_vec();
        self.real_pos += n;
        Ok(values)
    }

    /// Read a particle written with [OutBuffer::write_particle]
    pub fn read_particle(&mut self) -> Result<Particle> {
        let id = self.read_int()?;
        let type_id = self.read_int()?;
        let mass = self.read_real()?;
        let position = self.read_real3d()?;
        let velocity = self.read_real3d()?;
        Ok(Particle {
            id: u64::try_from(id)
                .map_err(|_| Error::CorruptBuffer(format!("negative particle id {id}")))?,
            type_id: u32::try_from(type_id)
                .map_err(|_| Error::CorruptBuffer(format!("invalid particle type {type_id}")))?,
            mass,
            position,
            velocity,
            force: [0.0; 3],
            ghost: false,
        })
    }

    /// Has every entry been read?
    pub fn is_exhausted(&self) -> bool {
        self.int_pos == self.ints.len() && self.real_pos == self.reals.len()
    }
}
