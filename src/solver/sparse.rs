//! Minimal sparse least-squares support for the global solve.
//!
//! The constraint system is assembled as coordinate triplets and
//! compressed once into CSR; the solve is LSQR (Paige & Saunders),
//! which only needs `A·x` and `Aᵀ·y` products. Warm starts go through
//! the correction form: solve `A·δ = b − A·x₀` and return `x₀ + δ`.

/// Row-by-row builder producing a CSR matrix and its right-hand side.
pub struct LeastSquaresBuilder {
    ncols: usize,
    nrows: usize,
    triplets: Vec<(usize, usize, f64)>,
    rhs: Vec<f64>,
}

impl LeastSquaresBuilder {
    pub fn new(ncols: usize) -> Self {
        Self {
            ncols,
            nrows: 0,
            triplets: Vec::new(),
            rhs: Vec::new(),
        }
    }

    /// Append one equation `Σ coeff·x_col = rhs`.
    pub fn add_row(&mut self, entries: &[(usize, f64)], rhs: f64) {
        let row = self.nrows;
        for &(col, value) in entries {
            debug_assert!(col < self.ncols);
            if value != 0.0 {
                self.triplets.push((row, col, value));
            }
        }
        self.rhs.push(rhs);
        self.nrows += 1;
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn build(self) -> (CsrMatrix, Vec<f64>) {
        (
            CsrMatrix::from_triplets(self.nrows, self.ncols, self.triplets),
            self.rhs,
        )
    }
}

/// Compressed sparse row matrix.
pub struct CsrMatrix {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    pub fn from_triplets(nrows: usize, ncols: usize, mut triplets: Vec<(usize, usize, f64)>) -> Self {
        triplets.sort_unstable_by_key(|&(r, c, _)| (r, c));
        let mut indptr = vec![0usize; nrows + 1];
        let mut indices = Vec::with_capacity(triplets.len());
        let mut values = Vec::with_capacity(triplets.len());
        for &(r, c, v) in &triplets {
            indptr[r + 1] += 1;
            indices.push(c);
            values.push(v);
        }
        for i in 0..nrows {
            indptr[i + 1] += indptr[i];
        }
        Self {
            nrows,
            ncols,
            indptr,
            indices,
            values,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// `y = A·x`
    pub fn mul_vec(&self, x: &[f64], y: &mut [f64]) {
        debug_assert_eq!(x.len(), self.ncols);
        debug_assert_eq!(y.len(), self.nrows);
        for row in 0..self.nrows {
            let mut acc = 0.0;
            for k in self.indptr[row]..self.indptr[row + 1] {
                acc += self.values[k] * x[self.indices[k]];
            }
            y[row] = acc;
        }
    }

    /// `y += Aᵀ·x`
    pub fn mul_transpose_add(&self, x: &[f64], y: &mut [f64]) {
        debug_assert_eq!(x.len(), self.nrows);
        debug_assert_eq!(y.len(), self.ncols);
        for row in 0..self.nrows {
            let xi = x[row];
            if xi == 0.0 {
                continue;
            }
            for k in self.indptr[row]..self.indptr[row + 1] {
                y[self.indices[k]] += self.values[k] * xi;
            }
        }
    }
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn scale(v: &mut [f64], s: f64) {
    for x in v.iter_mut() {
        *x *= s;
    }
}

/// LSQR with a warm start. Iterates at most `max_iter` times or until
/// the residual estimate stalls below a fixed tolerance.
pub fn lsqr(a: &CsrMatrix, b: &[f64], x0: &[f64], max_iter: usize) -> Vec<f64> {
    const TOL: f64 = 1e-10;
    let m = a.nrows();
    let n = a.ncols();
    debug_assert_eq!(b.len(), m);
    debug_assert_eq!(x0.len(), n);

    // Correction form: solve A·δ = b − A·x₀.
    let mut u = vec![0.0; m];
    a.mul_vec(x0, &mut u);
    for (ui, bi) in u.iter_mut().zip(b.iter()) {
        *ui = bi - *ui;
    }

    let mut delta = vec![0.0; n];
    let mut beta = norm(&u);
    if beta <= TOL {
        return x0.to_vec();
    }
    scale(&mut u, 1.0 / beta);

    let mut v = vec![0.0; n];
    a.mul_transpose_add(&u, &mut v);
    let mut alpha = norm(&v);
    if alpha <= TOL {
        return x0.to_vec();
    }
    scale(&mut v, 1.0 / alpha);

    let mut w = v.clone();
    let mut phibar = beta;
    let mut rhobar = alpha;
    let b_norm = beta;

    for _ in 0..max_iter {
        // Bidiagonalization step: u = A·v − α·u, v = Aᵀ·u − β·v.
        let mut av = vec![0.0; m];
        a.mul_vec(&v, &mut av);
        for i in 0..m {
            u[i] = av[i] - alpha * u[i];
        }
        beta = norm(&u);
        if beta > 0.0 {
            scale(&mut u, 1.0 / beta);
        }

        let mut atu = vec![0.0; n];
        a.mul_transpose_add(&u, &mut atu);
        for i in 0..n {
            v[i] = atu[i] - beta * v[i];
        }
        alpha = norm(&v);
        if alpha > 0.0 {
            scale(&mut v, 1.0 / alpha);
        }

        // Givens rotation updating the QR factors of the bidiagonal
        // system.
        let rho = rhobar.hypot(beta);
        let c = rhobar / rho;
        let s = beta / rho;
        let theta = s * alpha;
        rhobar = -c * alpha;
        let phi = c * phibar;
        phibar *= s;

        let t1 = phi / rho;
        let t2 = -theta / rho;
        for i in 0..n {
            delta[i] += t1 * w[i];
            w[i] = v[i] + t2 * w[i];
        }

        if phibar <= TOL * b_norm || alpha <= TOL {
            break;
        }
    }

    let mut x = x0.to_vec();
    for i in 0..n {
        x[i] += delta[i];
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_square() -> (CsrMatrix, Vec<f64>) {
        // [2 0; 0 3; 1 1] x = [4, 9, 5] → exact solution (2, 3).
        let mut builder = LeastSquaresBuilder::new(2);
        builder.add_row(&[(0, 2.0)], 4.0);
        builder.add_row(&[(1, 3.0)], 9.0);
        builder.add_row(&[(0, 1.0), (1, 1.0)], 5.0);
        builder.build()
    }

    #[test]
    fn test_consistent_overdetermined_system() {
        let (a, b) = build_square();
        let x = lsqr(&a, &b, &[0.0, 0.0], 100);
        assert!((x[0] - 2.0).abs() < 1e-8, "{x:?}");
        assert!((x[1] - 3.0).abs() < 1e-8, "{x:?}");
    }

    #[test]
    fn test_warm_start_matches_cold_start() {
        let (a, b) = build_square();
        let cold = lsqr(&a, &b, &[0.0, 0.0], 100);
        let warm = lsqr(&a, &b, &[1.9, 3.2], 100);
        assert!((cold[0] - warm[0]).abs() < 1e-8);
        assert!((cold[1] - warm[1]).abs() < 1e-8);
    }

    #[test]
    fn test_inconsistent_system_finds_least_squares_fit() {
        // x = 1 and x = 3 with equal weight → x = 2.
        let mut builder = LeastSquaresBuilder::new(1);
        builder.add_row(&[(0, 1.0)], 1.0);
        builder.add_row(&[(0, 1.0)], 3.0);
        let (a, b) = builder.build();
        let x = lsqr(&a, &b, &[0.0], 50);
        assert!((x[0] - 2.0).abs() < 1e-8, "{x:?}");
    }

    #[test]
    fn test_exact_warm_start_returns_immediately() {
        let (a, b) = build_square();
        let x = lsqr(&a, &b, &[2.0, 3.0], 0);
        assert!((x[0] - 2.0).abs() < 1e-12);
        assert!((x[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_matvec_and_transpose() {
        let (a, _) = build_square();
        let mut y = vec![0.0; 3];
        a.mul_vec(&[1.0, 2.0], &mut y);
        assert_eq!(y, vec![2.0, 6.0, 3.0]);
        let mut z = vec![0.0; 2];
        a.mul_transpose_add(&y, &mut z);
        assert_eq!(z, vec![7.0, 21.0]);
    }
}
