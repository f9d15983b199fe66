use approx::assert_relative_eq;
use celldecomp::{
    buffer::{InBuffer, OutBuffer},
    comm::{ThreadCommunicator, ThreadUniverse},
    config::DecompositionConfig,
    domain_decomposition::DomainDecomposition,
    particle::Particle,
    traits::{Communicator, ParticleListener, Storage},
    types::{Error, ParticleId, Real3D, Result},
};
use paste::paste;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;

const BOX_L: f64 = 10.0;
const CUTOFF: f64 = 1.0;
const GLOBAL_CELLS: usize = 4;

fn config(node_grid: [usize; 3]) -> DecompositionConfig {
    DecompositionConfig::new(
        [BOX_L; 3],
        node_grid,
        [
            GLOBAL_CELLS / node_grid[0],
            GLOBAL_CELLS / node_grid[1],
            GLOBAL_CELLS / node_grid[2],
        ],
    )
    .with_cutoff(CUTOFF)
    .with_skin(0.3)
}

fn random_positions(n: usize, seed: u64) -> Vec<Real3D> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            [
                rng.gen_range(0.0..BOX_L),
                rng.gen_range(0.0..BOX_L),
                rng.gen_range(0.0..BOX_L),
            ]
        })
        .collect()
}

/// Every rank sees the same positions and keeps the ones it owns
fn populate(dd: &mut DomainDecomposition<ThreadCommunicator>, positions: &[Real3D]) {
    for (id, x) in positions.iter().enumerate() {
        if dd.owns_position(x) {
            dd.add_particle(id as ParticleId, x).unwrap();
        }
    }
}

fn total(dd: &DomainDecomposition<ThreadCommunicator>) -> i64 {
    dd.comm()
        .all_reduce_sum(dd.n_active_particles() as i64)
        .unwrap()
}

fn assert_particles_in_their_cells(dd: &DomainDecomposition<ThreadCommunicator>) {
    for cell in dd.cells().active_cells() {
        for p in cell.particles() {
            assert_eq!(dd.map_position_to_cell_checked(&p.position), Some(cell.index()));
        }
    }
    assert!(dd.cells().index_is_consistent());
}

fn check_particle_count(n_ranks: usize, node_grid: [usize; 3]) {
    let positions = random_positions(300, 11);
    ThreadUniverse::run(n_ranks, |comm| {
        let mut rng = StdRng::seed_from_u64(100 + comm.rank() as u64);
        let mut dd = DomainDecomposition::new(comm, &config(node_grid)).unwrap();
        populate(&mut dd, &positions);
        assert_eq!(total(&dd), 300);

        dd.decompose().unwrap();
        assert_eq!(total(&dd), 300);
        assert_particles_in_their_cells(&dd);

        for _ in 0..5 {
            for p in dd.cells_mut().real_particles_mut() {
                for d in 0..3 {
                    p.position[d] += rng.gen_range(-1.0..1.0);
                }
            }
            dd.migrate_particles().unwrap();
            assert_eq!(total(&dd), 300);
            assert_particles_in_their_cells(&dd);
        }

        let before = dd
            .cells()
            .active_cells()
            .map(|c| c.particles().iter().map(|p| p.id).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        dd.decompose().unwrap();
        let after = dd
            .cells()
            .active_cells()
            .map(|c| c.particles().iter().map(|p| p.id).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(before, after);
        assert_eq!(total(&dd), 300);
    });
}

fn pair_force(a: &Real3D, b: &Real3D) -> Real3D {
    let r = [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
    let dist = (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
    let scale = (CUTOFF - dist).powi(2) / dist;
    [scale * r[0], scale * r[1], scale * r[2]]
}

fn compute_forces(dd: &mut DomainDecomposition<ThreadCommunicator>) {
    for (a, b) in dd.neighbour_pairs(CUTOFF) {
        let (pa, pb) = dd.particle_pair_mut(a, b).unwrap();
        let f = pair_force(&pa.position, &pb.position);
        for d in 0..3 {
            pa.force[d] += f[d];
            pb.force[d] -= f[d];
        }
    }
}

/// Forces on the real particles of every rank, sorted by id
fn forces(n_ranks: usize, node_grid: [usize; 3], positions: &[Real3D]) -> Vec<(ParticleId, Real3D)> {
    let mut all = ThreadUniverse::run(n_ranks, |comm| {
        let mut dd = DomainDecomposition::new(comm, &config(node_grid)).unwrap();
        populate(&mut dd, positions);
        dd.decompose().unwrap();
        compute_forces(&mut dd);
        dd.collect_ghost_forces().unwrap();
        dd.cells()
            .real_particles()
            .map(|p| (p.id, p.force))
            .collect::<Vec<_>>()
    })
    .concat();
    all.sort_by_key(|(id, _)| *id);
    all
}

fn check_forces(n_ranks: usize, node_grid: [usize; 3]) {
    let mut positions = random_positions(400, 5);
    // a pair straddling the boundary between the two lower x ranks
    positions.push([4.8, 5.0, 5.0]);
    positions.push([5.3, 5.0, 5.0]);
    // and one straddling the periodic boundary
    positions.push([9.9, 0.1, 5.0]);
    positions.push([0.2, 9.8, 5.0]);

    let serial = forces(1, [1, 1, 1], &positions);
    let parallel = forces(n_ranks, node_grid, &positions);
    assert_eq!(serial.len(), positions.len());
    assert_eq!(parallel.len(), positions.len());
    for ((id_s, f_s), (id_p, f_p)) in serial.iter().zip(&parallel) {
        assert_eq!(id_s, id_p);
        for d in 0..3 {
            assert_relative_eq!(f_s[d], f_p[d], epsilon = 1e-10);
        }
    }
    let n = positions.len();
    assert!(parallel[n - 4..].iter().all(|(_, f)| *f != [0.0; 3]));
}

fn check_ghost_updates(n_ranks: usize, node_grid: [usize; 3]) {
    let positions = random_positions(200, 3);
    ThreadUniverse::run(n_ranks, |comm| {
        let mut dd = DomainDecomposition::new(comm, &config(node_grid)).unwrap();
        populate(&mut dd, &positions);
        dd.decompose().unwrap();
        for p in dd.cells_mut().real_particles_mut() {
            p.position[1] += 0.01;
            p.velocity = [p.id as f64, 0.0, 1.0];
        }
        dd.update_ghosts_v().unwrap();
        let box_l = [BOX_L; 3];
        for cell in dd.cells().ghost_cells() {
            for ghost in cell.particles() {
                let id = ghost.id as usize;
                assert_eq!(ghost.velocity, [id as f64, 0.0, 1.0]);
                for d in 0..3 {
                    let x = if d == 1 {
                        positions[id][d] + 0.01
                    } else {
                        positions[id][d]
                    };
                    let images = ((ghost.position[d] - x) / box_l[d]).round();
                    assert_relative_eq!(ghost.position[d], x + images * box_l[d], epsilon = 1e-9);
                }
            }
        }
    });
}

fn check_verlet_list(n_ranks: usize, node_grid: [usize; 3]) {
    let positions = random_positions(300, 17);
    ThreadUniverse::run(n_ranks, |comm| {
        let mut rng = StdRng::seed_from_u64(200 + comm.rank() as u64);
        let config = config(node_grid).with_verlet_list(true);
        let mut dd = DomainDecomposition::new(comm, &config).unwrap();
        populate(&mut dd, &positions);
        dd.decompose().unwrap();
        for _ in 0..3 {
            // three steps stay within half the skin
            for p in dd.cells_mut().real_particles_mut() {
                for d in 0..3 {
                    p.position[d] += rng.gen_range(-0.02..0.02);
                }
            }
            dd.update_ghosts().unwrap();
            assert_eq!(dd.pairs_within(CUTOFF), dd.neighbour_pairs(CUTOFF));
        }
        dd.migrate_particles().unwrap();
        assert_eq!(
            dd.verlet_list().unwrap(),
            &dd.neighbour_pairs(CUTOFF + dd.skin())[..]
        );
        assert_eq!(dd.pairs_within(CUTOFF), dd.neighbour_pairs(CUTOFF));
    });
}

macro_rules! decomposition_tests {
    ($($name:ident: $ranks:expr, $node_grid:expr),+) => {
        $(
            paste! {
                #[test]
                fn [<test_particle_count_is_conserved_ $name>]() {
                    check_particle_count($ranks, $node_grid);
                }

                #[test]
                fn [<test_ghost_forces_match_serial_ $name>]() {
                    check_forces($ranks, $node_grid);
                }

                #[test]
                fn [<test_ghost_updates_ $name>]() {
                    check_ghost_updates($ranks, $node_grid);
                }

                #[test]
                fn [<test_verlet_list_ $name>]() {
                    check_verlet_list($ranks, $node_grid);
                }
            }
        )+
    };
}

decomposition_tests!(
    serial: 1, [1, 1, 1],
    slab: 2, [2, 1, 1],
    pencil: 4, [2, 2, 1],
    cube: 8, [2, 2, 2]
);

#[test]
fn test_node_grid_mismatch_fails_before_insertion() {
    let results = ThreadUniverse::run(3, |comm| {
        DomainDecomposition::new(comm, &config([2, 1, 1])).map(|_| ())
    });
    for r in results {
        assert_eq!(
            r,
            Err(Error::NodeGridMismatch {
                grid: [2, 1, 1],
                product: 2,
                size: 3
            })
        );
    }
}

#[test]
fn test_placement_outside_the_local_box() {
    ThreadUniverse::run(2, |comm| {
        let rank = comm.rank();
        let mut dd = DomainDecomposition::new(comm, &config([2, 1, 1])).unwrap();
        let foreign = if rank == 0 { [7.0, 1.0, 1.0] } else { [2.0, 1.0, 1.0] };
        assert!(!dd.owns_position(&foreign));
        assert!(matches!(
            dd.add_particle(1, &foreign),
            Err(Error::Placement { id: 1, .. })
        ));
    });
}

#[test]
fn test_fetch_particles() {
    let positions = random_positions(120, 8);
    let sources = ThreadUniverse::communicators(2);
    let targets = ThreadUniverse::communicators(2);
    let totals = std::thread::scope(|scope| {
        let handles = sources
            .into_iter()
            .zip(targets)
            .map(|(source_comm, target_comm)| {
                let positions = &positions;
                scope.spawn(move || {
                    let mut source =
                        DomainDecomposition::new(source_comm, &config([2, 1, 1])).unwrap();
                    populate(&mut source, positions);
                    let coarse = DecompositionConfig::new([BOX_L; 3], [2, 1, 1], [1, 2, 2]);
                    let mut target = DomainDecomposition::new(target_comm, &coarse).unwrap();
                    target.fetch_particles(&source).unwrap();
                    assert_eq!(target.n_active_particles(), source.n_active_particles());
                    for p in source.cells().real_particles() {
                        assert_eq!(target.lookup_real_particle(p.id), Some(p));
                    }
                    total(&source)
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });
    assert_eq!(totals, vec![120, 120]);
}

/// Sends `3 * id + 1` along with every particle and checks it on arrival
#[derive(Default)]
struct Tracer {
    arrived: Vec<Particle>,
}

impl ParticleListener for Tracer {
    fn on_before_send(&mut self, departing: &[Particle], buffer: &mut OutBuffer) {
        let tags = departing
            .iter()
            .map(|p| 3 * p.id as i64 + 1)
            .collect::<Vec<_>>();
        buffer.write_ints(&tags);
    }

    fn on_after_receive(&mut self, arrived: &[Particle], buffer: &mut InBuffer) -> Result<()> {
        let tags = buffer.read_ints()?;
        assert_eq!(tags.len(), arrived.len());
        for (p, tag) in arrived.iter().zip(tags) {
            assert_eq!(tag, 3 * p.id as i64 + 1);
        }
        self.arrived.extend_from_slice(arrived);
        Ok(())
    }

    fn on_rebuilt(&mut self, _storage: &dyn Storage) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_migration_carries_particle_state() {
    let results = ThreadUniverse::run(2, |comm| {
        let rank = comm.rank();
        let mut dd = DomainDecomposition::new(comm, &config([2, 1, 1])).unwrap();
        let tracer = Rc::new(RefCell::new(Tracer::default()));
        let listener: Rc<RefCell<dyn ParticleListener>> = tracer.clone();
        dd.signals_mut().connect(Rc::downgrade(&listener));

        if rank == 0 {
            let mut p = Particle::new(42, [4.9, 2.0, 3.0]);
            p.velocity = [0.5, -1.0, 2.0];
            p.mass = 3.0;
            p.type_id = 2;
            dd.insert_particle(p).unwrap();
            dd.add_particle(43, &[0.1, 2.0, 3.0]).unwrap();
        }
        dd.decompose().unwrap();

        if let Some(h) = dd.cells().real_handle(42) {
            dd.cells_mut().particle_mut(h).unwrap().position[0] = 5.1;
        }
        if let Some(h) = dd.cells().real_handle(43) {
            dd.cells_mut().particle_mut(h).unwrap().position[0] = -0.2;
        }
        dd.migrate_particles().unwrap();

        let arrived = tracer.borrow().arrived.clone();
        let resident = dd
            .cells()
            .real_particles()
            .map(|p| p.id)
            .collect::<Vec<_>>();
        (arrived, resident, dd.lookup_real_particle(42).cloned())
    });

    let (arrived, resident, p) = &results[1];
    assert_eq!(arrived.len(), 2);
    let mut resident = resident.clone();
    resident.sort();
    assert_eq!(resident, vec![42, 43]);
    let p = p.as_ref().unwrap();
    assert_eq!(p.position, [5.1, 2.0, 3.0]);
    assert_eq!(p.velocity, [0.5, -1.0, 2.0]);
    assert_eq!((p.mass, p.type_id), (3.0, 2));
    assert!(!p.ghost);
    let wrapped = arrived.iter().find(|p| p.id == 43).unwrap();
    assert_relative_eq!(wrapped.position[0], 9.8);

    assert!(results[0].0.is_empty());
    assert!(results[0].1.is_empty());
}

#[test]
fn test_particle_jumping_over_a_rank_is_reported() {
    let results = ThreadUniverse::run(4, |comm| {
        let rank = comm.rank();
        let config = DecompositionConfig::new([BOX_L; 3], [4, 1, 1], [1, 4, 4]).with_cutoff(CUTOFF);
        let mut dd = DomainDecomposition::new(comm, &config).unwrap();
        if rank == 0 {
            dd.add_particle(0, &[1.0, 1.0, 1.0]).unwrap();
            let h = dd.cells().real_handle(0).unwrap();
            dd.cells_mut().particle_mut(h).unwrap().position[0] = 6.0;
        }
        dd.decompose()
    });
    for r in results {
        match r {
            Err(Error::Collective(text)) => assert!(text.contains("migration overflow")),
            other => panic!("expected a collective error, got {other:?}"),
        }
    }
}

#[test]
fn test_shear_remap_keeps_particles() {
    let positions = random_positions(150, 21);
    let results = ThreadUniverse::run(2, |comm| {
        let config = config([1, 1, 2]).with_shear_rate(0.1);
        let mut dd = DomainDecomposition::new(comm, &config).unwrap();
        populate(&mut dd, &positions);
        dd.decompose().unwrap();
        for shift in [1, 2, -1] {
            dd.remap_neighbour_cells(shift).unwrap();
            assert_eq!(total(&dd), 150);
            assert_particles_in_their_cells(&dd);
            dd.update_ghosts_v().unwrap();
            dd.collect_ghost_forces().unwrap();
        }
        (dd.shear_shift(), dd.cells().n_ghost_particles())
    });
    for (shift, ghosts) in results {
        assert_eq!(shift, 3);
        assert!(ghosts > 0);
    }
}
