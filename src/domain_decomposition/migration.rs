//! Particle migration
use super::DomainDecomposition;
use crate::buffer::OutBuffer;
use crate::comm::ErrorCollector;
use crate::particle::Particle;
use crate::traits::{BoundaryCondition, Communicator, Storage, Tag};
use crate::types::{Error, Result};
use log::{debug, info};

const MIGRATION_TAG: Tag = 100;

/// Fraction of a cell a received particle may lie outside the region of its new rank
const ARRIVAL_TOLERANCE: f64 = 1e-6;

impl<C: Communicator> DomainDecomposition<C> {
    /// Move every real particle whose cell changed since the last call
    ///
    /// Particles that stay on this rank are moved between cells with the index kept up to date.
    /// Particles that left the region of this rank are sent to their new owners. A particle may
    /// move at most one cell along every axis between two calls. The ghost frame is rebuilt and
    /// listeners are notified afterwards.
    pub fn migrate_particles(&mut self) -> Result<()> {
        let mut errors = ErrorCollector::new();
        let mut departing = vec![];
        let active = self.cells.active_cell_indices().to_vec();
        for index in active {
            let cell_position = self.grid.grid_position(index);
            for slot in (0..self.cells.cell(index).len()).rev() {
                let p = &self.cells.cell(index).particles()[slot];
                if p.position.iter().any(|x| !x.is_finite()) {
                    errors.set_error(Error::MigrationOverflow(format!(
                        "particle {} has position {:?}",
                        p.id, p.position
                    )));
                    continue;
                }
                let target = self.grid.map_position_to_grid(&p.position);
                if (0..3).any(|d| (target[d] - cell_position[d] as i64).abs() > 1) {
                    errors.set_error(Error::MigrationOverflow(format!(
                        "particle {} at {:?} moved more than one cell from cell {:?}",
                        p.id, p.position, cell_position
                    )));
                    continue;
                }
                if (0..3).all(|d| target[d] == cell_position[d] as i64) {
                    continue;
                }
                // within one cell of an inner cell, so inside the grid
                let target = [target[0] as usize, target[1] as usize, target[2] as usize];
                if self.grid.is_inner_cell(target) {
                    self.cells
                        .move_indexed(self.grid.linear_index(target), index, slot);
                } else {
                    departing.push(self.cells.remove_indexed(index, slot));
                }
            }
        }

        let n_departing = departing.len();
        let arrivals = self.send_departing(departing, &mut errors)?;
        debug!(
            "rank {}: {} particles left, {} arrived",
            self.comm.rank(),
            n_departing,
            arrivals.len()
        );
        for mut p in arrivals {
            p.ghost = false;
            let cell = self.map_position_to_cell_clipping(&p.position);
            self.cells.append_indexed(cell, p);
        }

        self.exchange_ghosts_recording(&mut errors)?;
        self.notify_rebuilt(&mut errors);
        errors.check(&self.comm)
    }

    /// Redistribute all real particles over the cells and ranks from scratch
    ///
    /// Calling this twice without moving particles leaves every particle in the same cell.
    pub fn decompose(&mut self) -> Result<()> {
        let mut errors = ErrorCollector::new();
        let mut scratch = vec![];
        for i in 0..self.cells.active_cell_indices().len() {
            let index = self.cells.active_cell_indices()[i];
            scratch.extend(self.cells.drain_cell(index));
        }

        let mut departing = vec![];
        for p in scratch {
            match self.grid.map_position_to_cell_checked(&p.position) {
                Some(cell) => {
                    self.cells.append_unindexed(cell, p);
                }
                None => departing.push(p),
            }
        }

        let n_departing = departing.len();
        let arrivals = self.send_departing(departing, &mut errors)?;
        for mut p in arrivals {
            p.ghost = false;
            let cell = self.map_position_to_cell_clipping(&p.position);
            self.cells.append_unindexed(cell, p);
        }
        self.cells.rebuild_index();
        info!(
            "rank {}: decomposed, {} real particles ({} sent away)",
            self.comm.rank(),
            self.cells.n_real_particles(),
            n_departing
        );

        self.exchange_ghosts_recording(&mut errors)?;
        self.notify_rebuilt(&mut errors);
        errors.check(&self.comm)
    }

    /// Pass departing particles on to their owners, one axis at a time
    ///
    /// Along an axis that is not split between ranks positions are only folded into the box.
    /// Otherwise particles below the local region are sent left and particles above it are sent
    /// right, with positions folded into the box when they cross its boundary. Every rank takes
    /// part in every exchange, even without particles to send. Returns the particles that belong
    /// to this rank.
    ///
    /// A particle crossing a sheared z boundary is moved along x and given the velocity of the
    /// image it replaces, the same way its ghost images are.
    fn send_departing(
        &mut self,
        departing: Vec<Particle>,
        errors: &mut ErrorCollector,
    ) -> Result<Vec<Particle>> {
        let left = self.node_grid.local_left();
        let right = self.node_grid.local_right();
        let cell_size = self.grid.cell_size();

        let mut pending = vec![];
        for p in departing {
            if p.position.iter().all(|x| x.is_finite()) {
                pending.push(p);
            } else {
                errors.set_error(Error::MigrationOverflow(format!(
                    "particle {} has position {:?}",
                    p.id, p.position
                )));
            }
        }

        for dim in 0..3 {
            if self.node_grid.grid()[dim] == 1 {
                for p in pending.iter_mut() {
                    self.fold_across_boundary(p, dim);
                }
                continue;
            }

            let mut settled = vec![];
            for dir in 0..2 {
                let (mut sending, staying): (Vec<_>, Vec<_>) =
                    pending.into_iter().partition(|p| {
                        if dir == 0 {
                            p.position[dim] < left[dim]
                        } else {
                            p.position[dim] >= right[dim]
                        }
                    });
                pending = staying;

                let crosses = if dir == 0 {
                    self.node_grid.is_left_boundary(dim)
                } else {
                    self.node_grid.is_right_boundary(dim)
                };
                if crosses {
                    for p in sending.iter_mut() {
                        self.fold_across_boundary(p, dim);
                    }
                }

                let mut out = OutBuffer::new();
                out.write_int(sending.len() as i64);
                for p in &sending {
                    out.write_particle(p);
                }
                self.signals.before_send(&sending, &mut out);

                let dest = self.node_grid.neighbour_rank(dim, dir);
                let source = self.node_grid.neighbour_rank(dim, 1 - dir);
                let tag = MIGRATION_TAG + (2 * dim + dir) as Tag;
                let mut inb = self.transfer(dest, source, tag, out)?;

                let received = (|| -> Result<Vec<Particle>> {
                    let n = inb.read_count()?;
                    let arrived = (0..n)
                        .map(|_| inb.read_particle())
                        .collect::<Result<Vec<_>>>()?;
                    self.signals.after_receive(&arrived, &mut inb)?;
                    Ok(arrived)
                })();
                let Some(arrived) = errors.record(received) else {
                    continue;
                };

                let tolerance = ARRIVAL_TOLERANCE * cell_size[dim];
                for p in arrived {
                    let x = p.position[dim];
                    if x >= left[dim] - tolerance && x < right[dim] + tolerance {
                        settled.push(p);
                    } else {
                        errors.set_error(Error::MigrationOverflow(format!(
                            "particle {} arrived at {:?} on rank {}, more than one rank away \
                             along axis {dim}",
                            p.id,
                            p.position,
                            self.comm.rank()
                        )));
                    }
                }
            }
            pending.extend(settled);
        }
        Ok(pending)
    }

    /// Fold one coordinate of a particle into the box, applying the Lees-Edwards offsets when it
    /// crossed the z boundary
    fn fold_across_boundary(&self, p: &mut Particle, dim: usize) {
        let images = self.boundary.fold_coordinate(&mut p.position, dim);
        if dim != 2 || images == 0 || self.shear_rate == 0.0 {
            return;
        }
        // below the box is the image shifted forward, above it the one shifted back
        let displacement = self.shear_shift as f64 * self.grid.cell_size()[0];
        p.position[0] -= images as f64 * displacement;
        p.velocity[0] -= images as f64 * self.shear_rate * self.boundary.box_l()[2];
        self.boundary.fold_coordinate(&mut p.position, 0);
    }
}

#[cfg(test)]
mod test {
    use crate::comm::ThreadUniverse;
    use crate::config::DecompositionConfig;
    use crate::domain_decomposition::DomainDecomposition;
    use crate::traits::Storage;
    use crate::types::Error;

    #[test]
    fn test_move_within_rank() {
        let comm = ThreadUniverse::communicators(1).remove(0);
        let config = DecompositionConfig::new([4.0; 3], [1, 1, 1], [4, 4, 4]).with_cutoff(1.0);
        let mut dd = DomainDecomposition::new(comm, &config).unwrap();
        for id in 0..4 {
            dd.add_particle(id, &[0.5 + id as f64, 0.5, 0.5]).unwrap();
        }
        dd.decompose().unwrap();

        let h = dd.cells().real_handle(3).unwrap();
        dd.cells_mut().particle_mut(h).unwrap().position[0] = 4.2;
        let h = dd.cells().real_handle(1).unwrap();
        dd.cells_mut().particle_mut(h).unwrap().position[1] = 1.3;
        dd.migrate_particles().unwrap();

        assert_eq!(dd.n_active_particles(), 4);
        assert!(dd.cells().index_is_consistent());
        let p = dd.lookup_real_particle(3).unwrap();
        assert!((p.position[0] - 0.2).abs() < 1e-12);
        let h = dd.cells().real_handle(3).unwrap();
        assert_eq!(dd.grid().grid_position(h.cell), [1, 1, 1]);
        let h = dd.cells().real_handle(1).unwrap();
        assert_eq!(dd.grid().grid_position(h.cell), [2, 2, 1]);
    }

    #[test]
    fn test_overflow_is_reported() {
        let comm = ThreadUniverse::communicators(1).remove(0);
        let config = DecompositionConfig::new([4.0; 3], [1, 1, 1], [4, 4, 4]).with_cutoff(1.0);
        let mut dd = DomainDecomposition::new(comm, &config).unwrap();
        let h = dd.add_particle(0, &[0.5, 0.5, 0.5]).unwrap();
        dd.cells_mut().particle_mut(h).unwrap().position[2] = 2.7;
        match dd.migrate_particles() {
            Err(Error::Collective(text)) => assert!(text.contains("migration overflow")),
            other => panic!("expected an overflow, got {other:?}"),
        }
    }

    #[test]
    fn test_crossing_sheared_boundary() {
        let comm = ThreadUniverse::communicators(1).remove(0);
        let config = DecompositionConfig::new([4.0; 3], [1, 1, 1], [4, 4, 4])
            .with_cutoff(1.0)
            .with_shear_rate(0.5);
        let mut dd = DomainDecomposition::new(comm, &config).unwrap();
        dd.add_particle(0, &[0.5, 1.5, 0.2]).unwrap();
        dd.add_particle(1, &[3.5, 1.5, 3.8]).unwrap();
        dd.remap_neighbour_cells(1).unwrap();

        let h = dd.cells().real_handle(0).unwrap();
        dd.cells_mut().particle_mut(h).unwrap().position[2] = -0.1;
        let h = dd.cells().real_handle(1).unwrap();
        dd.cells_mut().particle_mut(h).unwrap().position[2] = 4.1;
        dd.migrate_particles().unwrap();

        // leaving through the bottom lands on top one cell further along x
        let p = dd.lookup_real_particle(0).unwrap();
        assert!((p.position[0] - 1.5).abs() < 1e-12);
        assert!((p.position[2] - 3.9).abs() < 1e-12);
        assert_eq!(p.velocity[0], 2.0);
        // leaving through the top lands at the bottom one cell back, folded along x
        let p = dd.lookup_real_particle(1).unwrap();
        assert!((p.position[0] - 2.5).abs() < 1e-12);
        assert!((p.position[2] - 0.1).abs() < 1e-12);
        assert_eq!(p.velocity[0], -2.0);
        assert!(dd.cells().index_is_consistent());
    }

    #[test]
    fn test_decompose_is_idempotent() {
        let comm = ThreadUniverse::communicators(1).remove(0);
        let config = DecompositionConfig::new([4.0; 3], [1, 1, 1], [2, 2, 2]).with_cutoff(1.0);
        let mut dd = DomainDecomposition::new(comm, &config).unwrap();
        for id in 0..10 {
            let x = 0.37 * id as f64;
            dd.add_particle(id, &[x, 4.0 - x, 0.5 * x]).unwrap();
        }
        dd.decompose().unwrap();
        let first = dd
            .cells()
            .active_cells()
            .map(|c| c.particles().iter().map(|p| p.id).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        dd.decompose().unwrap();
        let second = dd
            .cells()
            .active_cells()
            .map(|c| c.particles().iter().map(|p| p.id).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(first, second);
    }
}
