//? mpirun -n {{NPROCESSES}} --features "mpi"

#[cfg(feature = "mpi")]
use celldecomp::{
    comm::MpiCommunicator,
    config::DecompositionConfig,
    domain_decomposition::{DomainDecomposition, ResortTracker},
    fixed_quadruple_angle_list::FixedQuadrupleAngleList,
    traits::{Communicator, Storage},
};
#[cfg(feature = "mpi")]
use mpi::{environment::Universe, topology::SimpleCommunicator};

#[cfg(feature = "mpi")]
type Decomposition = DomainDecomposition<MpiCommunicator<SimpleCommunicator>>;

/// Particles on a regular lattice, added on the rank that owns them
#[cfg(feature = "mpi")]
fn fill_lattice(dd: &mut Decomposition, n: usize, box_l: f64) -> usize {
    let spacing = box_l / n as f64;
    let mut added = 0;
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                let x = [
                    (i as f64 + 0.5) * spacing,
                    (j as f64 + 0.5) * spacing,
                    (k as f64 + 0.5) * spacing,
                ];
                if dd.owns_position(&x) {
                    dd.add_particle((i + n * (j + n * k)) as u64, &x).unwrap();
                    added += 1;
                }
            }
        }
    }
    added
}

/// Move every real particle along a fixed drift and redistribute when the skin is used up
#[cfg(feature = "mpi")]
fn drift(dd: &mut Decomposition, tracker: &mut ResortTracker, velocity: [f64; 3], steps: usize) {
    let dt = 0.05;
    let step_length = velocity.iter().map(|v| v * v).sum::<f64>().sqrt() * dt;
    for _ in 0..steps {
        for p in dd.cells_mut().real_particles_mut() {
            for d in 0..3 {
                p.position[d] += velocity[d] * dt;
            }
        }
        tracker.record(step_length);
        if tracker.needs_resort(dd.communicator()).unwrap() {
            dd.migrate_particles().unwrap();
        } else {
            dd.update_ghosts().unwrap();
        }
    }
}

#[cfg(feature = "mpi")]
fn main() {
    let universe: Universe = mpi::initialize().unwrap();
    let world = universe.world();
    let comm = MpiCommunicator::new(world);
    let rank = comm.rank();
    let size = comm.size();

    let box_l = 12.0;
    let config = DecompositionConfig::automatic([box_l; 3], size, 1.5, 0.3).unwrap();
    if rank == 0 {
        println!(
            "Decomposing a box of length {box_l} over {size} ranks: node grid {:?}, cell grid {:?}",
            config.node_grid, config.cell_grid
        );
    }

    let mut dd = DomainDecomposition::new(comm, &config).unwrap();
    let added = fill_lattice(&mut dd, 8, box_l);
    dd.decompose().unwrap();
    let total = dd.communicator().all_reduce_sum(added as i64).unwrap();
    println!(
        "rank {rank}: {} real and {} ghost particles",
        dd.cells().n_real_particles(),
        dd.cells().n_ghost_particles()
    );

    // a quadruple along the x axis, followed while the lattice drifts
    let list = FixedQuadrupleAngleList::new(&mut dd);
    list.borrow_mut().add(&dd, 8, 9, 73, 74).unwrap();

    let mut tracker = ResortTracker::new(dd.skin());
    drift(&mut dd, &mut tracker, [1.0, 0.5, -0.25], 100);

    let real = dd.cells().n_real_particles() as i64;
    let after = dd.communicator().all_reduce_sum(real).unwrap();
    assert_eq!(after, total);
    if let Some(angle) = list.borrow().get_angle(8, 9, 73, 74) {
        println!("rank {rank}: owns the quadruple with angle {angle}");
    }
    if rank == 0 {
        println!("{after} particles after the drift");
    }
}

#[cfg(not(feature = "mpi"))]
fn main() {}
