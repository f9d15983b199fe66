//! Ghost frame exchange
//!
//! The frame is filled axis by axis in the order z, y, x, each axis in both directions. The
//! slabs sent along an axis span the full grid of the other two axes, ghost layers included, so
//! the edges and corners filled by earlier axes are passed on by later ones. Forces travel the
//! same route backwards.
//!
//! With a sheared z boundary the z slabs cover the inner x columns only. The z images are
//! displaced along x, so the x ghost columns of the z ghost layers are filled by the x phase
//! from the displaced inner columns.
use super::DomainDecomposition;
use crate::buffer::{InBuffer, OutBuffer};
use crate::comm::ErrorCollector;
use crate::particle::Particle;
use crate::storage::CellStorage;
use crate::traits::{Communicator, Tag};
use crate::types::{Error, Real3D, Result};
use log::debug;

const GHOST_TAG: Tag = 200;
const POSITION_TAG: Tag = 300;
const VELOCITY_TAG: Tag = 400;
const FORCE_TAG: Tag = 500;

/// One step of the ghost exchange
#[derive(Debug, Clone)]
pub(super) struct ExchangePlan {
    pub(super) dim: usize,
    pub(super) dir: usize,
    pub(super) dest: usize,
    pub(super) source: usize,
    /// Cells sent to `dest`, in the order `dest` stores them
    pub(super) send_cells: Vec<usize>,
    /// Ghost cells filled from `source`
    pub(super) recv_cells: Vec<usize>,
    /// Added to the positions of sent particles when crossing the box boundary
    position_shift: Real3D,
    /// Displacement along x across a sheared boundary, with the box length along x
    shear: Option<(f64, f64)>,
    /// Added to the x velocity of sent particles across a sheared boundary
    velocity_shift: f64,
}

impl ExchangePlan {
    /// The particle as the receiving rank sees it
    fn image_of(&self, p: &Particle) -> Particle {
        let mut image = p.ghost_copy();
        for d in 0..3 {
            image.position[d] += self.position_shift[d];
        }
        if let Some((displacement, box_x)) = self.shear {
            let x = image.position[0] + displacement;
            image.position[0] = x - (x / box_x).floor() * box_x;
        }
        image.velocity[0] += self.velocity_shift;
        image
    }
}

impl<C: Communicator> DomainDecomposition<C> {
    /// The exchange steps for the current geometry and shear shift
    pub(super) fn build_plans(&self) -> Vec<ExchangePlan> {
        let size = self.grid.grid_size();
        let frame = self.grid.frame_width();
        let inner = self.grid.inner_grid();
        let box_l = self.node_grid.box_l();
        let cell_size = self.grid.cell_size();
        let mut plans = vec![];
        for dim in [2, 1, 0] {
            for dir in [0, 1] {
                let (send_layer, recv_layer) = if dir == 0 {
                    (frame, size[dim] - 1)
                } else {
                    (size[dim] - 1 - frame, 0)
                };
                let crosses = if dir == 0 {
                    self.node_grid.is_left_boundary(dim)
                } else {
                    self.node_grid.is_right_boundary(dim)
                };
                let sign = if dir == 0 { 1.0 } else { -1.0 };
                let mut position_shift = [0.0; 3];
                if crosses {
                    position_shift[dim] = sign * box_l[dim];
                }
                let sheared = dim == 2 && crosses && self.shear_rate != 0.0;
                let column_shift = if sheared {
                    if dir == 0 {
                        self.shear_shift
                    } else {
                        -self.shear_shift
                    }
                } else {
                    0
                };

                let inner_columns_only = dim == 2 && self.shear_rate != 0.0;
                let recv_cells: Vec<usize> = self
                    .grid
                    .slab(dim, recv_layer)
                    .into_iter()
                    .filter(|&r| {
                        let x = self.grid.grid_position(r)[0];
                        !inner_columns_only || (x >= frame && x < frame + inner[0])
                    })
                    .collect();
                let send_cells = recv_cells
                    .iter()
                    .map(|&r| {
                        let mut position = self.grid.grid_position(r);
                        position[dim] = send_layer;
                        if column_shift != 0 {
                            let m = position[0] as i64 - frame as i64 - column_shift;
                            position[0] = m.rem_euclid(inner[0] as i64) as usize + frame;
                        }
                        self.grid.linear_index(position)
                    })
                    .collect();

                plans.push(ExchangePlan {
                    dim,
                    dir,
                    dest: self.node_grid.neighbour_rank(dim, dir),
                    source: self.node_grid.neighbour_rank(dim, 1 - dir),
                    send_cells,
                    recv_cells,
                    position_shift,
                    shear: sheared
                        .then(|| (column_shift as f64 * cell_size[0], box_l[0])),
                    velocity_shift: if sheared {
                        sign * self.shear_rate * box_l[2]
                    } else {
                        0.0
                    },
                });
            }
        }
        plans
    }

    /// Send a buffer to `dest` and receive the matching one from `source`; a rank that is its
    /// own neighbour keeps the buffer
    pub(super) fn transfer(
        &self,
        dest: usize,
        source: usize,
        tag: Tag,
        out: OutBuffer,
    ) -> Result<InBuffer> {
        let rank = self.comm.rank();
        if dest == rank && source == rank {
            Ok(out.into_in_buffer())
        } else {
            self.comm.exchange(dest, source, tag, out)
        }
    }

    /// Rebuild the ghost frame from scratch
    pub fn exchange_ghosts(&mut self) -> Result<()> {
        let mut errors = ErrorCollector::new();
        self.exchange_ghosts_recording(&mut errors)?;
        errors.check(&self.comm)
    }

    /// Rebuild the ghost frame, recording local failures instead of returning them
    ///
    /// Ghost handles change here, so the Verlet list is rebuilt as well.
    pub(super) fn exchange_ghosts_recording(&mut self, errors: &mut ErrorCollector) -> Result<()> {
        self.cells.clear_ghosts();
        for (i, plan) in self.plans.iter().enumerate() {
            let mut out = OutBuffer::new();
            for &c in &plan.send_cells {
                let particles = self.cells.cell(c).particles();
                out.write_int(particles.len() as i64);
                for p in particles {
                    out.write_particle(&plan.image_of(p));
                }
            }
            let mut inb = self.transfer(plan.dest, plan.source, GHOST_TAG + i as Tag, out)?;
            errors.record(receive_ghosts(&mut self.cells, plan, &mut inb));
        }
        debug!(
            "rank {}: ghost frame holds {} particles",
            self.comm.rank(),
            self.cells.n_ghost_particles()
        );
        self.rebuild_verlet_list();
        Ok(())
    }

    /// Copy the positions of the boundary particles into the ghost frames of the neighbours
    pub fn update_ghosts(&mut self) -> Result<()> {
        self.update_ghost_state(false)
    }

    /// Copy positions and velocities of the boundary particles into the ghost frames of the
    /// neighbours
    pub fn update_ghosts_v(&mut self) -> Result<()> {
        self.update_ghost_state(true)
    }

    fn update_ghost_state(&mut self, with_velocity: bool) -> Result<()> {
        let mut errors = ErrorCollector::new();
        let tag = if with_velocity {
            VELOCITY_TAG
        } else {
            POSITION_TAG
        };
        for (i, plan) in self.plans.iter().enumerate() {
            let mut out = OutBuffer::new();
            for &c in &plan.send_cells {
                let particles = self.cells.cell(c).particles();
                out.write_int(particles.len() as i64);
                for p in particles {
                    let image = plan.image_of(p);
                    out.write_real3d(&image.position);
                    if with_velocity {
                        out.write_real3d(&image.velocity);
                    }
                }
            }
            let mut inb = self.transfer(plan.dest, plan.source, tag + i as Tag, out)?;
            errors.record(overwrite_ghosts(
                &mut self.cells,
                plan,
                &mut inb,
                with_velocity,
            ));
        }
        errors.check(&self.comm)
    }

    /// Add the forces accumulated on ghost particles to the real particles they mirror
    ///
    /// Ghost forces are reset once they have been sent.
    pub fn collect_ghost_forces(&mut self) -> Result<()> {
        let mut errors = ErrorCollector::new();
        for (i, plan) in self.plans.iter().enumerate().rev() {
            let mut out = OutBuffer::new();
            for &c in &plan.recv_cells {
                let particles = self.cells.cell_mut(c).particles_mut();
                out.write_int(particles.len() as i64);
                for p in particles.iter_mut() {
                    out.write_real3d(&p.force);
                    p.force = [0.0; 3];
                }
            }
            let mut inb = self.transfer(plan.source, plan.dest, FORCE_TAG + i as Tag, out)?;
            errors.record(add_forces(&mut self.cells, plan, &mut inb));
        }
        errors.check(&self.comm)
    }
}

fn receive_ghosts(cells: &mut CellStorage, plan: &ExchangePlan, inb: &mut InBuffer) -> Result<()> {
    for &c in &plan.recv_cells {
        let n = inb.read_count()?;
        for _ in 0..n {
            let mut p = inb.read_particle()?;
            p.ghost = true;
            cells.append_indexed(c, p);
        }
    }
    Ok(())
}

fn check_count(cell: usize, expected: usize, received: usize, plan: &ExchangePlan) -> Result<()> {
    if expected == received {
        Ok(())
    } else {
        Err(Error::Consistency(format!(
            "cell {cell} holds {expected} particles but {received} arrived (axis {}, direction {})",
            plan.dim, plan.dir
        )))
    }
}

fn overwrite_ghosts(
    cells: &mut CellStorage,
    plan: &ExchangePlan,
    inb: &mut InBuffer,
    with_velocity: bool,
) -> Result<()> {
    for &c in &plan.recv_cells {
        let n = inb.read_count()?;
        check_count(c, cells.cell(c).len(), n, plan)?;
        for p in cells.cell_mut(c).particles_mut() {
            p.position = inb.read_real3d()?;
            if with_velocity {
                p.velocity = inb.read_real3d()?;
            }
        }
    }
    Ok(())
}

fn add_forces(cells: &mut CellStorage, plan: &ExchangePlan, inb: &mut InBuffer) -> Result<()> {
    for &c in &plan.send_cells {
        let n = inb.read_count()?;
        check_count(c, cells.cell(c).len(), n, plan)?;
        for p in cells.cell_mut(c).particles_mut() {
            let f = inb.read_real3d()?;
            for d in 0..3 {
                p.force[d] += f[d];
            }
        }
    }
    Ok(())
}
