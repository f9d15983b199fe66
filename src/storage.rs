//! Cell based particle storage

use crate::grid::Cell;
use crate::particle::{Particle, ParticleHandle};
use crate::types::ParticleId;
use std::collections::HashMap;

/// The cells of a rank together with the index from particle id to particle handle
///
/// The index never owns particles. Real particles always take precedence over ghost copies with
/// the same id, so a lookup finds the authoritative copy whenever one is resident.
///
/// Particles are added, moved and removed with two families of primitives. The `indexed` forms
/// keep the index correct after every call and are used for single particle updates. The
/// `unindexed` forms leave the index stale; callers rebuilding many cells use them and call
/// [CellStorage::rebuild_index] once at the end.
#[derive(Debug, Clone)]
pub struct CellStorage {
    cells: Vec<Cell>,
    active: Vec<usize>,
    ghost: Vec<usize>,
    index: HashMap<ParticleId, ParticleHandle>,
}

impl CellStorage {
    /// Create a storage from its cells; the active and ghost partitions are taken from the cells
    pub fn new(cells: Vec<Cell>) -> Self {
        let active = cells
            .iter()
            .filter(|c| c.is_inner())
            .map(|c| c.index())
            .collect();
        let ghost = cells
            .iter()
            .filter(|c| !c.is_inner())
            .map(|c| c.index())
            .collect();
        Self {
            cells,
            active,
            ghost,
            index: HashMap::new(),
        }
    }

    /// All cells, active and ghost
    pub fn all_cells(&self) -> &[Cell] {
        &self.cells
    }

    /// A cell
    pub fn cell(&self, index: usize) -> &Cell {
        &self.cells[index]
    }

    /// Mutable access to a cell
    pub fn cell_mut(&mut self, index: usize) -> &mut Cell {
        &mut self.cells[index]
    }

    /// Indices of the active cells
    pub fn active_cell_indices(&self) -> &[usize] {
        &self.active
    }

    /// Indices of the ghost cells
    pub fn ghost_cell_indices(&self) -> &[usize] {
        &self.ghost
    }

    /// Iterate over the active cells
    pub fn active_cells(&self) -> impl Iterator<Item = &Cell> + '_ {
        self.active.iter().map(move |i| &self.cells[*i])
    }

    /// Iterate over the ghost cells
    pub fn ghost_cells(&self) -> impl Iterator<Item = &Cell> + '_ {
        self.ghost.iter().map(move |i| &self.cells[*i])
    }

    /// Iterate over the real particles
    pub fn real_particles(&self) -> impl Iterator<Item = &Particle> + '_ {
        self.active_cells().flat_map(|c| c.particles().iter())
    }

    /// Iterate mutably over the real particles
    pub fn real_particles_mut(&mut self) -> impl Iterator<Item = &mut Particle> + '_ {
        self.cells
            .iter_mut()
            .filter(|c| c.is_inner())
            .flat_map(|c| c.particles_mut().iter_mut())
    }

    /// Number of real particles
    pub fn n_real_particles(&self) -> usize {
        self.active_cells().map(|c| c.len()).sum()
    }

    /// Number of ghost particles
    pub fn n_ghost_particles(&self) -> usize {
        self.ghost_cells().map(|c| c.len()).sum()
    }

    /// Handle of a resident particle, preferring the real copy
    pub fn local_handle(&self, id: ParticleId) -> Option<ParticleHandle> {
        self.index.get(&id).copied()
    }

    /// Handle of a real particle
    pub fn real_handle(&self, id: ParticleId) -> Option<ParticleHandle> {
        self.local_handle(id)
            .filter(|h| self.particle(*h).is_some_and(|p| !p.ghost))
    }

    /// The particle behind a handle
    pub fn particle(&self, handle: ParticleHandle) -> Option<&Particle> {
        self.cells
            .get(handle.cell)
            .and_then(|c| c.particles.get(handle.slot))
    }

    /// Mutable access to the particle behind a handle
    pub fn particle_mut(&mut self, handle: ParticleHandle) -> Option<&mut Particle> {
        self.cells
            .get_mut(handle.cell)
            .and_then(|c| c.particles.get_mut(handle.slot))
    }

    /// Mutable access to two different particles at once
    pub fn particle_pair_mut(
        &mut self,
        a: ParticleHandle,
        b: ParticleHandle,
    ) -> Option<(&mut Particle, &mut Particle)> {
        if a == b || a.cell >= self.cells.len() || b.cell >= self.cells.len() {
            return None;
        }
        if a.cell == b.cell {
            let particles = &mut self.cells[a.cell].particles;
            if a.slot >= particles.len() || b.slot >= particles.len() {
                return None;
            }
            if a.slot < b.slot {
                let (low, high) = particles.split_at_mut(b.slot);
                Some((&mut low[a.slot], &mut high[0]))
            } else {
                let (low, high) = particles.split_at_mut(a.slot);
                Some((&mut high[0], &mut low[b.slot]))
            }
        } else if a.cell < b.cell {
            let (low, high) = self.cells.split_at_mut(b.cell);
            let pa = low[a.cell].particles.get_mut(a.slot)?;
            let pb = high[0].particles.get_mut(b.slot)?;
            Some((pa, pb))
        } else {
            let (low, high) = self.cells.split_at_mut(a.cell);
            let pb = low[b.cell].particles.get_mut(b.slot)?;
            let pa = high[0].particles.get_mut(a.slot)?;
            Some((pa, pb))
        }
    }

    /// Enter the particles of a cell into the index. Existing entries are only overwritten if
    /// `replace` is set.
    pub fn update_local_particles(&mut self, cell: usize, replace: bool) {
        for (slot, p) in self.cells[cell].particles.iter().enumerate() {
            let handle = ParticleHandle::new(cell, slot);
            if replace {
                self.index.insert(p.id, handle);
            } else {
                self.index.entry(p.id).or_insert(handle);
            }
        }
    }

    /// Rebuild the index from scratch: real particles first, then ghosts where no real copy exists
    pub fn rebuild_index(&mut self) {
        self.index.clear();
        for i in 0..self.active.len() {
            self.update_local_particles(self.active[i], true);
        }
        for i in 0..self.ghost.len() {
            self.update_local_particles(self.ghost[i], false);
        }
    }

    /// Append a particle to a cell without touching the index
    pub fn append_unindexed(&mut self, cell: usize, particle: Particle) -> ParticleHandle {
        let particles = &mut self.cells[cell].particles;
        particles.push(particle);
        ParticleHandle::new(cell, particles.len() - 1)
    }

    /// Append a particle to a cell and enter it into the index
    pub fn append_indexed(&mut self, cell: usize, particle: Particle) -> ParticleHandle {
        let id = particle.id;
        let replace = !particle.ghost;
        let handle = self.append_unindexed(cell, particle);
        if replace {
            self.index.insert(id, handle);
        } else {
            self.index.entry(id).or_insert(handle);
        }
        handle
    }

    /// Move a particle between cells without touching the index
    ///
    /// The last particle of `src` takes the place of the moved one.
    pub fn move_unindexed(&mut self, dst: usize, src: usize, slot: usize) -> ParticleHandle {
        let particle = self.cells[src].particles.swap_remove(slot);
        self.append_unindexed(dst, particle)
    }

    /// Move a particle between cells, keeping the index correct for the moved particle and for
    /// the particle that took its place
    pub fn move_indexed(&mut self, dst: usize, src: usize, slot: usize) -> ParticleHandle {
        let last = self.cells[src].len() - 1;
        let handle = self.move_unindexed(dst, src, slot);
        let moved_id = self.cells[dst].particles[handle.slot].id;
        self.reindex(moved_id, ParticleHandle::new(src, slot), handle);
        if slot < last {
            let swapped_id = self.cells[src].particles[slot].id;
            self.reindex(
                swapped_id,
                ParticleHandle::new(src, last),
                ParticleHandle::new(src, slot),
            );
        }
        handle
    }

    /// Remove a particle from its cell and from the index
    pub fn remove_indexed(&mut self, cell: usize, slot: usize) -> Particle {
        let last = self.cells[cell].len() - 1;
        let particle = self.cells[cell].particles.swap_remove(slot);
        if self.index.get(&particle.id) == Some(&ParticleHandle::new(cell, slot)) {
            self.index.remove(&particle.id);
        }
        if slot < last {
            let swapped_id = self.cells[cell].particles[slot].id;
            self.reindex(
                swapped_id,
                ParticleHandle::new(cell, last),
                ParticleHandle::new(cell, slot),
            );
        }
        particle
    }

    /// Take every particle out of a cell without touching the index
    pub fn drain_cell(&mut self, cell: usize) -> Vec<Particle> {
        std::mem::take(&mut self.cells[cell].particles)
    }

    /// Empty every ghost cell; the index is rebuilt without the ghosts
    pub fn clear_ghosts(&mut self) {
        for i in 0..self.ghost.len() {
            let cell = self.ghost[i];
            self.cells[cell].particles.clear();
        }
        self.rebuild_index();
    }

    fn reindex(&mut self, id: ParticleId, old: ParticleHandle, new: ParticleHandle) {
        if let Some(entry) = self.index.get_mut(&id) {
            if *entry == old {
                *entry = new;
            }
        }
    }

    /// Check that every index entry points at a particle with the right id
    pub fn index_is_consistent(&self) -> bool {
        let entries_valid = self
            .index
            .iter()
            .all(|(id, h)| self.particle(*h).is_some_and(|p| p.id == *id));
        let reals_indexed = self
            .active_cells()
            .flat_map(|c| {
                c.particles()
                    .iter()
                    .enumerate()
                    .map(move |(slot, p)| (p.id, ParticleHandle::new(c.index(), slot)))
            })
            .all(|(id, h)| self.index.get(&id) == Some(&h));
        entries_valid && reals_indexed
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::grid::GhostCellGrid;

    fn example_storage() -> CellStorage {
        let grid = GhostCellGrid::new([2, 1, 1], 1, [0.0; 3], [2.0, 1.0, 1.0]);
        let cells = (0..grid.number_of_cells())
            .map(|i| {
                let position = grid.grid_position(i);
                Cell::new(i, position, grid.is_inner_cell(position))
            })
            .collect();
        CellStorage::new(cells)
    }

    #[test]
    fn test_partition() {
        let storage = example_storage();
        assert_eq!(storage.all_cells().len(), 4 * 3 * 3);
        assert_eq!(storage.active_cell_indices().len(), 2);
        assert_eq!(storage.ghost_cell_indices().len(), 34);
    }

    #[test]
    fn test_indexed_moves() {
        let mut storage = example_storage();
        let a = storage.active_cell_indices()[0];
        let b = storage.active_cell_indices()[1];
        for id in 0..4 {
            storage.append_indexed(a, Particle::new(id, [0.5, 0.5, 0.5]));
        }
        assert!(storage.index_is_consistent());

        let h = storage.move_indexed(b, a, 1);
        assert_eq!(h, ParticleHandle::new(b, 0));
        assert_eq!(storage.local_handle(1), Some(h));
        assert_eq!(storage.local_handle(3), Some(ParticleHandle::new(a, 1)));
        assert!(storage.index_is_consistent());

        let p = storage.remove_indexed(a, 0);
        assert_eq!(p.id, 0);
        assert_eq!(storage.local_handle(0), None);
        assert!(storage.index_is_consistent());
        assert_eq!(storage.n_real_particles(), 3);
    }

    #[test]
    fn test_real_wins_over_ghost() {
        let mut storage = example_storage();
        let active = storage.active_cell_indices()[0];
        let ghost = storage.ghost_cell_indices()[0];
        let real = Particle::new(7, [0.5, 0.5, 0.5]);
        storage.append_indexed(ghost, real.ghost_copy());
        assert_eq!(storage.local_handle(7), Some(ParticleHandle::new(ghost, 0)));
        assert_eq!(storage.real_handle(7), None);

        storage.append_indexed(active, real.clone());
        assert_eq!(storage.real_handle(7), Some(ParticleHandle::new(active, 0)));

        storage.rebuild_index();
        assert_eq!(storage.local_handle(7), Some(ParticleHandle::new(active, 0)));

        storage.clear_ghosts();
        assert_eq!(storage.n_ghost_particles(), 0);
        assert_eq!(storage.n_real_particles(), 1);
    }

    #[test]
    fn test_pair_access() {
        let mut storage = example_storage();
        let a = storage.active_cell_indices()[0];
        let b = storage.active_cell_indices()[1];
        let ha = storage.append_indexed(a, Particle::new(0, [0.5; 3]));
        let hb = storage.append_indexed(b, Particle::new(1, [1.5, 0.5, 0.5]));
        let hc = storage.append_indexed(a, Particle::new(2, [0.6; 3]));

        let (p, q) = storage.particle_pair_mut(hb, ha).unwrap();
        assert_eq!((p.id, q.id), (1, 0));
        let (p, q) = storage.particle_pair_mut(hc, ha).unwrap();
        assert_eq!((p.id, q.id), (2, 0));
        assert!(storage.particle_pair_mut(ha, ha).is_none());
    }
}
