//! Lees-Edwards boundaries
//!
//! Under shear the periodic images above and below the box slide along x. The ghost frame across
//! the z boundary is then filled from x columns shifted by a whole number of cells, which grows
//! with the accumulated boundary displacement.
use super::DomainDecomposition;
use crate::traits::Communicator;
use crate::types::{Error, Result};
use log::{info, warn};

impl<C: Communicator> DomainDecomposition<C> {
    /// Fill the ghost frame across the z boundary from x columns shifted by `shift` cells and
    /// redistribute all particles
    ///
    /// Needs a non-zero shear rate and an x axis that is not split between ranks. Real particles
    /// that later cross the z boundary are moved along x by the same shift and take the velocity
    /// offset of the image they replace.
    pub fn remap_neighbour_cells(&mut self, shift: i64) -> Result<()> {
        if self.node_grid.grid()[0] != 1 {
            return Err(Error::ShearUnsupported(format!(
                "the x axis is split over {} ranks",
                self.node_grid.grid()[0]
            )));
        }
        if self.shear_rate == 0.0 {
            return Err(Error::ShearUnsupported("the shear rate is zero".to_string()));
        }
        if shift == self.shear_shift {
            warn!("rank {}: remapping with unchanged shift {shift}", self.comm.rank());
        }
        self.shear_shift = shift.rem_euclid(self.grid.inner_grid()[0] as i64);
        self.plans = self.build_plans();
        info!(
            "rank {}: neighbour cells remapped with a shift of {} cells",
            self.comm.rank(),
            self.shear_shift
        );
        self.decompose()
    }
}

/// Decides when the shifted neighbourhood of a sheared boundary has to be rebuilt
///
/// The boundary has moved by `shear_rate * time * box_l[2]` along x. Rounded to whole cells this
/// is the target shift; the neighbourhood is remapped whenever the target changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ShearRemap {
    shear_rate: f64,
    cells_per_length: f64,
    box_z: f64,
    shift: i64,
}

impl ShearRemap {
    /// Follow the boundary of a decomposition
    pub fn new<C: Communicator>(dd: &DomainDecomposition<C>) -> Self {
        let box_l = dd.node_grid().box_l();
        let cells_x = dd.node_grid().grid()[0] * dd.cell_grid()[0];
        Self {
            shear_rate: dd.shear_rate(),
            cells_per_length: cells_x as f64 / box_l[0],
            box_z: box_l[2],
            shift: dd.shear_shift(),
        }
    }

    /// The shift in cells at `time`
    pub fn target_shift(&self, time: f64) -> i64 {
        (self.shear_rate * time * self.box_z * self.cells_per_length + 0.5).floor() as i64
    }

    /// The shift applied last
    pub fn shift(&self) -> i64 {
        self.shift
    }

    /// Remap the neighbourhood if the boundary has moved into another cell; returns whether a
    /// remap happened
    pub fn update<C: Communicator>(
        &mut self,
        dd: &mut DomainDecomposition<C>,
        time: f64,
    ) -> Result<bool> {
        let target = self.target_shift(time);
        if target == self.shift {
            return Ok(false);
        }
        dd.remap_neighbour_cells(target)?;
        self.shift = target;
        Ok(true)
    }
}
