//! Real even-degree spherical harmonics and the least-squares machinery used
//! to move between sampled amplitudes and SH coefficients.
//!
//! The basis is the real symmetric variant with orthonormal normalisation:
//! only even degrees l are kept, and for |m| > 0 the real/imaginary parts are
//! scaled by sqrt(2). Coefficients are laid out degree-major, with the m
//! index running from -l to l inside each degree.

use nalgebra::{DMatrix, DVector};

use crate::{DwiError, Result};

/// Singular values below this are treated as zero in pseudo-inverses.
const PINV_EPSILON: f64 = 1e-10;

/// Number of coefficients of an even-degree expansion up to `lmax`.
pub fn num_coefs(lmax: usize) -> usize {
    (lmax + 1) * (lmax + 2) / 2
}

/// Largest even degree whose expansion is determined by `samples` amplitudes.
pub fn lmax_for(samples: usize) -> usize {
    let mut lmax = 0;
    while num_coefs(lmax + 2) <= samples {
        lmax += 2;
    }
    lmax
}

/// Column of the (l, m) coefficient, m in -l..=l, l even.
fn coef_index(l: usize, m: isize) -> usize {
    ((l * (l + 1) / 2) as isize + m) as usize
}

/// (azimuth, elevation) of a direction vector. The zero vector maps to the
/// pole, which is adequate for b=0 rows that never enter an SH fit.
pub fn cartesian2spherical(dir: [f64; 3]) -> [f64; 2] {
    let [x, y, z] = dir;
    let r = (x * x + y * y + z * z).sqrt();
    if r == 0.0 {
        return [0.0, 0.0];
    }
    [y.atan2(x), (z / r).clamp(-1.0, 1.0).acos()]
}

fn factorial(n: usize) -> f64 {
    (2..=n).fold(1.0, |acc, i| acc * i as f64)
}

/// Associated Legendre polynomial P_l^m(x) with the Condon-Shortley phase,
/// by the standard three-term recurrence.
fn legendre_plm(l: usize, m: usize, x: f64) -> f64 {
    debug_assert!(m <= l && x.abs() <= 1.0);
    let somx2 = ((1.0 - x) * (1.0 + x)).sqrt();
    let mut pmm = 1.0;
    for i in 1..=m {
        pmm *= -((2 * i - 1) as f64) * somx2;
    }
    if l == m {
        return pmm;
    }
    let mut pmmp1 = x * (2 * m + 1) as f64 * pmm;
    for ll in m + 2..=l {
        let pll = (x * (2 * ll - 1) as f64 * pmmp1 - (ll + m - 1) as f64 * pmm)
            / (ll - m) as f64;
        pmm = pmmp1;
        pmmp1 = pll;
    }
    pmmp1
}

fn normalisation(l: usize, m: usize) -> f64 {
    ((2 * l + 1) as f64 / (4.0 * std::f64::consts::PI) * factorial(l - m)
        / factorial(l + m))
        .sqrt()
}

/// SH basis evaluation matrix: one row per (azimuth, elevation) direction,
/// one column per coefficient up to `lmax`.
pub fn basis(dirs: &[[f64; 2]], lmax: usize) -> DMatrix<f64> {
    let mut b = DMatrix::zeros(dirs.len(), num_coefs(lmax));
    for (row, &[az, el]) in dirs.iter().enumerate() {
        let x = el.cos();
        for l in (0..=lmax).step_by(2) {
            b[(row, coef_index(l, 0))] = normalisation(l, 0) * legendre_plm(l, 0, x);
            for m in 1..=l {
                let amp = std::f64::consts::SQRT_2
                    * normalisation(l, m)
                    * legendre_plm(l, m, x);
                let ma = m as f64 * az;
                b[(row, coef_index(l, m as isize))] = amp * ma.cos();
                b[(row, coef_index(l, -(m as isize)))] = amp * ma.sin();
            }
        }
    }
    b
}

/// Moore-Penrose pseudo-inverse via SVD.
pub fn pinv(m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    m.clone()
        .pseudo_inverse(PINV_EPSILON)
        .map_err(|e| DwiError::NumericFailure(format!("pseudo-inverse failed: {e}")))
}

/// Weighted least squares operator `(B' W B)^-1 B' W` with `W = diag(w)`.
/// Solved by Cholesky; falls back to the pseudo-inverse of the normal matrix
/// when the weighted system is singular.
pub fn wls(b: &DMatrix<f64>, w: &DVector<f64>) -> Result<DMatrix<f64>> {
    debug_assert_eq!(b.nrows(), w.len());
    let mut btw = b.transpose();
    for (i, mut col) in btw.column_iter_mut().enumerate() {
        col *= w[i];
    }
    let normal = &btw * b;
    match normal.clone().cholesky() {
        Some(chol) => Ok(chol.solve(&btw)),
        None => Ok(pinv(&normal)? * btw),
    }
}

/// Deterministic, reasonably uniform set of directions on the sphere.
/// Used by tests and by callers that need a synthetic dense sampling.
pub fn fibonacci_sphere(n: usize) -> Vec<[f64; 3]> {
    let golden_angle = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
    (0..n)
        .map(|i| {
            let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let r = (1.0 - z * z).sqrt();
            let phi = golden_angle * i as f64;
            [r * phi.cos(), r * phi.sin(), z]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use rstest::rstest;

    #[rstest(/**/ lmax, n,
             case(0,  1),
             case(2,  6),
             case(4, 15),
             case(6, 28),
             case(8, 45),
    )]
    fn coefficient_counts(lmax: usize, n: usize) {
        assert_eq!(num_coefs(lmax), n);
    }

    #[rstest(/**/ samples, lmax,
             case( 1, 0),
             case( 5, 0),
             case( 6, 2),
             case(14, 2),
             case(15, 4),
             case(44, 6),
             case(45, 8),
             case(60, 8),
    )]
    fn degree_for_sample_count(samples: usize, lmax: usize) {
        assert_eq!(lmax_for(samples), lmax);
    }

    #[rstest(/**/ dir,              az,  el,
             case([0.0, 0.0, 1.0],  0.0, 0.0),
             case([1.0, 0.0, 0.0],  0.0, std::f64::consts::FRAC_PI_2),
             case([0.0, 1.0, 0.0],  std::f64::consts::FRAC_PI_2, std::f64::consts::FRAC_PI_2),
             case([0.0, 0.0, -1.0], 0.0, std::f64::consts::PI),
    )]
    fn spherical_coordinates(dir: [f64; 3], az: f64, el: f64) {
        let [a, e] = cartesian2spherical(dir);
        assert_float_eq!(a, az, abs <= 1e-12);
        assert_float_eq!(e, el, abs <= 1e-12);
    }

    #[test]
    fn basis_is_antipodally_symmetric() {
        // even degrees only, so Y(d) == Y(-d)
        for dir in fibonacci_sphere(20) {
            let antipode = [-dir[0], -dir[1], -dir[2]];
            let b = basis(
                &[cartesian2spherical(dir), cartesian2spherical(antipode)],
                6,
            );
            for c in 0..b.ncols() {
                assert_float_eq!(b[(0, c)], b[(1, c)], abs <= 1e-10);
            }
        }
    }

    #[test]
    fn l0_column_is_constant() {
        let dirs: Vec<_> = fibonacci_sphere(30)
            .into_iter()
            .map(cartesian2spherical)
            .collect();
        let b = basis(&dirs, 0);
        let expected = 1.0 / (4.0 * std::f64::consts::PI).sqrt();
        for row in 0..b.nrows() {
            assert_float_eq!(b[(row, 0)], expected, abs <= 1e-12);
        }
    }

    /// Reconstructing a synthetic signal generated from known coefficients
    /// recovers those coefficients.
    #[test]
    fn dense_sampling_roundtrip_lmax8() {
        let dirs: Vec<_> = fibonacci_sphere(90)
            .into_iter()
            .map(cartesian2spherical)
            .collect();
        let b = basis(&dirs, 8);
        let coefs = DVector::from_fn(num_coefs(8), |i, _| {
            0.5 + (i as f64 * 0.37).sin()
        });
        let signal = &b * &coefs;

        let recovered = pinv(&b).unwrap() * &signal;
        for i in 0..coefs.len() {
            assert_float_eq!(recovered[i], coefs[i], abs <= 1e-4);
        }

        let weights = DVector::from_element(dirs.len(), 1.0);
        let recovered = wls(&b, &weights).unwrap() * &signal;
        for i in 0..coefs.len() {
            assert_float_eq!(recovered[i], coefs[i], abs <= 1e-3);
        }
    }

    mod degree_bookkeeping {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // lmax_for is the partial inverse of num_coefs: the chosen degree
            // is determined by the sample count, and the next degree is not
            #[test]
            fn lmax_is_maximal(samples in 1..500_usize) {
                let lmax = lmax_for(samples);
                prop_assert!(lmax % 2 == 0);
                prop_assert!(num_coefs(lmax) <= samples);
                prop_assert!(num_coefs(lmax + 2) > samples);
            }
        }
    }

    #[test]
    fn uniform_wls_matches_pseudo_inverse() {
        let dirs: Vec<_> = fibonacci_sphere(30)
            .into_iter()
            .map(cartesian2spherical)
            .collect();
        let b = basis(&dirs, 4);
        let plain = pinv(&b).unwrap();
        let weighted = wls(&b, &DVector::from_element(dirs.len(), 1.0)).unwrap();
        for r in 0..plain.nrows() {
            for c in 0..plain.ncols() {
                assert_float_eq!(plain[(r, c)], weighted[(r, c)], abs <= 1e-6);
            }
        }
    }

    #[test]
    fn wls_satisfies_the_normal_equations() {
        let dirs: Vec<_> = fibonacci_sphere(25)
            .into_iter()
            .map(cartesian2spherical)
            .collect();
        let b = basis(&dirs, 4);
        let w = DVector::from_fn(dirs.len(), |i, _| 0.2 + 0.05 * i as f64);
        let a = wls(&b, &w).unwrap();

        // (B' W B) A == B' W by construction
        let mut btw = b.transpose();
        for (i, mut col) in btw.column_iter_mut().enumerate() {
            col *= w[i];
        }
        let lhs = (&btw * &b) * &a;
        for r in 0..lhs.nrows() {
            for c in 0..lhs.ncols() {
                assert_float_eq!(lhs[(r, c)], btw[(r, c)], abs <= 1e-8);
            }
        }
    }
}
