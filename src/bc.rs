//! Periodic boundary conditions
use crate::traits::BoundaryCondition;
use crate::types::Real3D;

/// Periodic boundaries on a rectangular box with its lower corner at the origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrthorhombicBC {
    box_l: Real3D,
    inverse_box_l: Real3D,
}

impl OrthorhombicBC {
    /// Create periodic boundaries for a box
    pub fn new(box_l: Real3D) -> Self {
        Self {
            box_l,
            inverse_box_l: [1.0 / box_l[0], 1.0 / box_l[1], 1.0 / box_l[2]],
        }
    }
}

impl BoundaryCondition for OrthorhombicBC {
    fn box_l(&self) -> Real3D {
        self.box_l
    }

    fn fold_coordinate(&self, position: &mut Real3D, dim: usize) -> i64 {
        let mut images = (position[dim] * self.inverse_box_l[dim]).floor();
        position[dim] -= images * self.box_l[dim];
        // folding a tiny negative value can round up to the box length
        if position[dim] >= self.box_l[dim] {
            position[dim] -= self.box_l[dim];
            images += 1.0;
        }
        images as i64
    }

    fn minimum_image_vector(&self, a: &Real3D, b: &Real3D) -> Real3D {
        let mut out = [0.0; 3];
        for d in 0..3 {
            let dist = a[d] - b[d];
            out[d] = dist - (dist * self.inverse_box_l[d]).round() * self.box_l[d];
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fold() {
        let bc = OrthorhombicBC::new([1.0, 2.0, 3.0]);
        let mut p = [1.25, -0.5, 7.0];
        bc.fold_position(&mut p);
        assert_relative_eq!(p[0], 0.25);
        assert_relative_eq!(p[1], 1.5);
        assert_relative_eq!(p[2], 1.0);

        let mut q = [-1e-17, 0.0, 3.0];
        bc.fold_position(&mut q);
        assert!(q[0] >= 0.0 && q[0] < 1.0);
        assert_eq!(q[2], 0.0);
    }

    #[test]
    fn test_fold_single_axis() {
        let bc = OrthorhombicBC::new([1.0, 2.0, 3.0]);
        let mut p = [1.25, -0.5, 7.0];
        assert_eq!(bc.fold_coordinate(&mut p, 1), -1);
        assert_eq!(p, [1.25, 1.5, 7.0]);
        assert_eq!(bc.fold_coordinate(&mut p, 2), 2);
        assert_relative_eq!(p[2], 1.0);
        assert_eq!(bc.fold_coordinate(&mut p, 2), 0);

        let mut q = [-1e-17, 0.0, 0.0];
        let images = bc.fold_coordinate(&mut q, 0);
        assert!(q[0] >= 0.0 && q[0] < 1.0);
        assert_eq!(images, if q[0] == 0.0 { 0 } else { -1 });
    }

    #[test]
    fn test_minimum_image() {
        let bc = OrthorhombicBC::new([10.0, 10.0, 10.0]);
        let v = bc.minimum_image_vector(&[9.5, 1.0, 5.0], &[0.5, 2.0, 5.0]);
        assert_relative_eq!(v[0], -1.0);
        assert_relative_eq!(v[1], -1.0);
        assert_relative_eq!(v[2], 0.0);
    }
}
