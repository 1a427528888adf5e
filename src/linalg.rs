//! Small dense linear-algebra helpers for the forecaster and scenario sampler.

/// Diagonal floor applied during factorisation so near-singular inputs
/// still produce a usable lower-triangular factor.
const DIAGONAL_FLOOR: f64 = 1e-10;

/// Cholesky factorisation `a = l·lᵀ` of a symmetric positive semi-definite matrix.
///
/// Pivots below [`DIAGONAL_FLOOR`] are clamped, so the result is always finite.
pub fn cholesky(a: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];

    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                l[i][j] = (a[i][i] - sum).max(DIAGONAL_FLOOR).sqrt();
            } else {
                l[i][j] = (a[i][j] - sum) / l[j][j];
            }
        }
    }
    l
}

/// Solves `a·x = b` for symmetric positive-definite `a`.
///
/// Returns `None` when a pivot collapses to the floor, meaning the system is
/// numerically singular.
pub fn solve_spd(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = a.len();
    if n == 0 || b.len() != n {
        return None;
    }
    let l = cholesky(a);
    if l.iter().enumerate().any(|(i, row)| row[i] <= DIAGONAL_FLOOR.sqrt()) {
        return None;
    }

    // Forward: l·y = b
    let mut y = vec![0.0; n];
    for i in 0..n {
        let sum: f64 = (0..i).map(|k| l[i][k] * y[k]).sum();
        y[i] = (b[i] - sum) / l[i][i];
    }
    // Backward: lᵀ·x = y
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let sum: f64 = (i + 1..n).map(|k| l[k][i] * x[k]).sum();
        x[i] = (y[i] - sum) / l[i][i];
    }
    Some(x)
}

/// Multiplies lower-triangular `l` by vector `z`.
pub fn lower_mul(l: &[Vec<f64>], z: &[f64]) -> Vec<f64> {
    l.iter()
        .enumerate()
        .map(|(i, row)| (0..=i).map(|k| row[k] * z[k]).sum())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cholesky_reconstructs_matrix() {
        let a = vec![
            vec![4.0, 2.0, 0.4],
            vec![2.0, 5.0, 1.0],
            vec![0.4, 1.0, 3.0],
        ];
        let l = cholesky(&a);
        for i in 0..3 {
            for j in 0..3 {
                let v: f64 = (0..3).map(|k| l[i][k] * l[j][k]).sum();
                assert!((v - a[i][j]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn solve_spd_matches_known_solution() {
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let x = solve_spd(&a, &[3.0, 5.0]).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-9);
        assert!((x[1] - 1.4).abs() < 1e-9);
    }

    #[test]
    fn singular_system_is_rejected() {
        let a = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        assert!(solve_spd(&a, &[1.0, 1.0]).is_none());
    }

    #[test]
    fn lower_mul_uses_lower_triangle_only() {
        let l = vec![vec![1.0, 9.0], vec![2.0, 3.0]];
        assert_eq!(lower_mul(&l, &[1.0, 1.0]), vec![1.0, 5.0]);
    }
}
