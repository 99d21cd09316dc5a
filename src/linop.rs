//! Matrix-free linear operator capability.
//!
//! Iterative reconstruction treats its system matrix as an opaque operator
//! that is never materialised: a solver only needs the operator's shape and
//! its forward/transpose/normal products. Implementations compose this trait
//! rather than inheriting from any matrix hierarchy.

/// A linear map `A: R^cols -> R^rows`, applied through out-parameters so
/// implementations can reuse caller-owned buffers.
pub trait LinearOperator {
    fn rows(&self) -> usize;
    fn cols(&self) -> usize;

    /// `y = A x`
    fn apply(&self, x: &[f64], y: &mut [f64]);

    /// `y = A' x`
    fn apply_transpose(&self, x: &[f64], y: &mut [f64]);

    /// `y = A' A x`. The default routes through `apply`/`apply_transpose`;
    /// implementations with a cheaper normal product override it.
    fn apply_normal(&self, x: &[f64], y: &mut [f64]) {
        let mut tmp = vec![0.0; self.rows()];
        self.apply(x, &mut tmp);
        self.apply_transpose(&tmp, y);
    }
}

/// A dense matrix viewed through the operator capability. Mostly useful for
/// small systems and for exercising solvers against known ground truth.
pub struct DenseOperator {
    rows: usize,
    cols: usize,
    /// row-major
    elements: Vec<f64>,
}

impl DenseOperator {
    pub fn new(rows: usize, cols: usize, elements: Vec<f64>) -> Self {
        assert_eq!(elements.len(), rows * cols);
        DenseOperator {
            rows,
            cols,
            elements,
        }
    }
}

impl LinearOperator for DenseOperator {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        for (r, yr) in y.iter_mut().enumerate() {
            let row = &self.elements[r * self.cols..(r + 1) * self.cols];
            *yr = row.iter().zip(x).map(|(a, b)| a * b).sum();
        }
    }

    fn apply_transpose(&self, x: &[f64], y: &mut [f64]) {
        y.fill(0.0);
        // Fixed row order keeps the accumulation deterministic
        for (r, &xr) in x.iter().enumerate() {
            let row = &self.elements[r * self.cols..(r + 1) * self.cols];
            for (yc, &a) in y.iter_mut().zip(row) {
                *yc += a * xr;
            }
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Solve `min ||A x - b||` by conjugate gradient on the normal equations,
/// consuming only the operator capability. `x` holds the initial guess on
/// entry and the solution on exit; returns the number of iterations run.
pub fn conjugate_gradient<A: LinearOperator + ?Sized>(
    a: &A,
    b: &[f64],
    x: &mut [f64],
    tolerance: f64,
    max_iterations: usize,
) -> usize {
    assert_eq!(b.len(), a.rows());
    assert_eq!(x.len(), a.cols());

    // r = A'(b - A x)
    let mut residual = vec![0.0; a.rows()];
    a.apply(x, &mut residual);
    for (r, &bi) in residual.iter_mut().zip(b) {
        *r = bi - *r;
    }
    let mut r = vec![0.0; a.cols()];
    a.apply_transpose(&residual, &mut r);

    let mut p = r.clone();
    let mut q = vec![0.0; a.cols()];
    let mut rr = dot(&r, &r);
    let threshold = tolerance * tolerance * rr.max(f64::MIN_POSITIVE);

    for iteration in 0..max_iterations {
        if rr <= threshold {
            return iteration;
        }
        a.apply_normal(&p, &mut q);
        let pq = dot(&p, &q);
        if pq <= 0.0 {
            return iteration; // degenerate direction
        }
        let alpha = rr / pq;
        for (xi, &pi) in x.iter_mut().zip(&p) {
            *xi += alpha * pi;
        }
        for (ri, &qi) in r.iter_mut().zip(&q) {
            *ri -= alpha * qi;
        }
        let rr_next = dot(&r, &r);
        let beta = rr_next / rr;
        for (pi, &ri) in p.iter_mut().zip(&r) {
            *pi = ri + beta * *pi;
        }
        rr = rr_next;
    }
    max_iterations
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;

    #[test]
    fn identity_solve_is_immediate() {
        let a = DenseOperator::new(3, 3, vec![1., 0., 0., 0., 1., 0., 0., 0., 1.]);
        let b = [3.0, -1.0, 2.5];
        let mut x = [0.0; 3];
        conjugate_gradient(&a, &b, &mut x, 1e-12, 10);
        for (xi, bi) in x.iter().zip(&b) {
            assert_float_eq!(*xi, *bi, abs <= 1e-10);
        }
    }

    #[test]
    fn spd_system_converges() {
        let a = DenseOperator::new(3, 3, vec![4., 1., 0., 1., 3., 1., 0., 1., 2.]);
        let expected = [1.0, -2.0, 0.5];
        let mut b = [0.0; 3];
        a.apply(&expected, &mut b);
        let mut x = [0.0; 3];
        let iterations = conjugate_gradient(&a, &b, &mut x, 1e-12, 50);
        assert!(iterations <= 50);
        for (xi, ei) in x.iter().zip(&expected) {
            assert_float_eq!(*xi, *ei, abs <= 1e-8);
        }
    }

    #[test]
    fn overdetermined_least_squares() {
        // 4 equations, 2 unknowns, consistent system
        let a = DenseOperator::new(4, 2, vec![1., 0., 0., 1., 1., 1., 1., -1.]);
        let expected = [2.0, -3.0];
        let mut b = [0.0; 4];
        a.apply(&expected, &mut b);
        let mut x = [0.0; 2];
        conjugate_gradient(&a, &b, &mut x, 1e-12, 20);
        for (xi, ei) in x.iter().zip(&expected) {
            assert_float_eq!(*xi, *ei, abs <= 1e-8);
        }
    }

    #[test]
    fn normal_product_matches_composition() {
        let a = DenseOperator::new(3, 2, vec![1., 2., -1., 0.5, 3., -2.]);
        let x = [0.7, -1.3];
        let mut direct = [0.0; 2];
        a.apply_normal(&x, &mut direct);

        let mut ax = [0.0; 3];
        a.apply(&x, &mut ax);
        let mut composed = [0.0; 2];
        a.apply_transpose(&ax, &mut composed);

        for (d, c) in direct.iter().zip(&composed) {
            assert_float_eq!(*d, *c, abs <= 1e-12);
        }
    }
}
