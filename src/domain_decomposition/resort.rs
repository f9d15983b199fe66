//! When to redistribute particles
use crate::particle::Particle;
use crate::traits::Communicator;
use crate::types::Result;

/// Tracks how far particles have moved since the last redistribution
///
/// The cells cover the interaction range plus the skin, so neighbour lists stay valid until some
/// particle has moved by half the skin. Every step adds the largest displacement of that step.
#[derive(Debug, Clone, PartialEq)]
pub struct ResortTracker {
    skin: f64,
    max_displacement: f64,
}

impl ResortTracker {
    /// Create a tracker for a skin
    pub fn new(skin: f64) -> Self {
        Self {
            skin,
            max_displacement: 0.0,
        }
    }

    /// Add the largest displacement of a step
    pub fn record(&mut self, displacement: f64) {
        self.max_displacement += displacement;
    }

    /// Add the largest move between two snapshots of the same particles
    pub fn record_positions(&mut self, before: &[Particle], after: &[Particle]) {
        let step = before
            .iter()
            .zip(after)
            .map(|(a, b)| {
                (0..3)
                    .map(|d| (a.position[d] - b.position[d]).powi(2))
                    .sum::<f64>()
                    .sqrt()
            })
            .fold(0.0, f64::max);
        self.record(step);
    }

    /// Accumulated displacement on this rank
    pub fn displacement(&self) -> f64 {
        self.max_displacement
    }

    /// Does any rank need a redistribution? Must be called on every rank. The accumulated
    /// displacement is reset when the answer is yes.
    pub fn needs_resort(&mut self, comm: &dyn Communicator) -> Result<bool> {
        let global = comm.all_reduce_max(self.max_displacement)?;
        if global > 0.5 * self.skin {
            self.max_displacement = 0.0;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::ThreadUniverse;

    #[test]
    fn test_single_rank() {
        let comm = ThreadUniverse::communicators(1).remove(0);
        let mut tracker = ResortTracker::new(0.4);
        tracker.record(0.15);
        assert!(!tracker.needs_resort(&comm).unwrap());
        tracker.record_positions(
            &[Particle::new(0, [0.0; 3])],
            &[Particle::new(0, [0.0, 0.06, 0.08])],
        );
        assert!((tracker.displacement() - 0.25).abs() < 1e-12);
        assert!(tracker.needs_resort(&comm).unwrap());
        assert_eq!(tracker.displacement(), 0.0);
    }

    #[test]
    fn test_one_rank_moving_decides_for_all() {
        let results = ThreadUniverse::run(3, |comm| {
            let mut tracker = ResortTracker::new(1.0);
            if comm.rank() == 2 {
                tracker.record(0.6);
            }
            tracker.needs_resort(&comm).unwrap()
        });
        assert_eq!(results, vec![true, true, true]);
    }
}
