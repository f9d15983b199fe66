//! Boundary conditions
use crate::types::Real3D;

/// Geometry service for the simulation box
pub trait BoundaryCondition {
    /// Side lengths of the box
    fn box_l(&self) -> Real3D;

    /// Fold one coordinate of a position into the primary image of the box
    ///
    /// Returns the number of box lengths removed, negative for a coordinate below the box.
    fn fold_coordinate(&self, position: &mut Real3D, dim: usize) -> i64;

    /// Fold a position into the primary image of the box
    fn fold_position(&self, position: &mut Real3D) {
        for d in 0..3 {
            self.fold_coordinate(position, d);
        }
    }

    /// The shortest vector from `b` to `a` over all periodic images
    fn minimum_image_vector(&self, a: &Real3D, b: &Real3D) -> Real3D;
}
