//! 1-D finite differences along an image axis, and the per-phase-encoding-
//! group Jacobian images derived from the off-resonance field.
//!
//! Derivatives are taken with respect to voxel index (central differences,
//! boundary replication), so `tau * sign * dF/da` is a displacement
//! derivative along the phase encoding axis.

use ndarray::Array3;

use crate::image::Volume;
use crate::pe::PeScheme;

/// Central-difference derivative of `field` along `axis` (0, 1 or 2), in
/// voxel-index units. The outermost samples are replicated, so the boundary
/// derivative degenerates to half a one-sided difference.
pub fn axis_gradient(field: &Array3<f32>, axis: usize) -> Array3<f32> {
    assert!(axis < 3);
    let dims = field.dim();
    let n = [dims.0, dims.1, dims.2][axis];
    let mut grad = Array3::zeros(dims);
    for ((i, j, k), g) in grad.indexed_iter_mut() {
        let c = [i, j, k][axis];
        let mut lo = [i, j, k];
        let mut hi = [i, j, k];
        lo[axis] = c.saturating_sub(1);
        hi[axis] = (c + 1).min(n - 1);
        *g = 0.5 * (field[hi] - field[lo]);
    }
    grad
}

/// Jacobian image for one phase encoding group:
/// `max(0, 1 + tau * sign * dF/da)` voxel-wise.
pub fn jacobian(field: &Array3<f32>, axis: usize, sign: f64, tau: f64) -> Array3<f32> {
    let multiplier = (sign * tau) as f32;
    let mut jac = axis_gradient(field, axis);
    jac.mapv_inplace(|g| (1.0 + g * multiplier).max(0.0));
    jac
}

/// One Jacobian image per phase encoding group of `pe`, in group order.
pub fn group_jacobians(field: &Volume, pe: &PeScheme) -> Vec<Array3<f32>> {
    (0..pe.group_count())
        .map(|group| {
            let (axis, sign) = pe.axis_and_sign(group);
            jacobian(&field.data, axis, sign, pe.readout_time(group))
        })
        .collect()
}
