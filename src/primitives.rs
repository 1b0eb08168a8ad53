//! Numerical primitives: the proximal, division, and projection operators.
//!
//! These are the building blocks of the factorization updates:
//! - **soft_threshold**: proximal operator of the L1 penalty, fused with a
//!   magnitude clamp
//! - **mrdivide**: right matrix division, solving `X * A = B`
//! - **project**: nonnegativity plus per-column norm constraint on the
//!   dictionary

use crate::error::{OrnmfError, Result};
use ndarray::{Array2, Axis};
use ndarray_linalg::{LeastSquaresSvd, Solve};

/// Collection of the numerical primitive operations.
pub struct Primitives;

impl Primitives {
    /// Soft-threshold each entry by `shrink`, then clamp its magnitude to
    /// `bound`, preserving sign throughout.
    ///
    /// With `shrink = 0` this degenerates to a pure elementwise clamp to
    /// `[-bound, bound]`; with `bound = f64::INFINITY` it degenerates to the
    /// pure soft-threshold `sign(v) * max(|v| - shrink, 0)`.
    pub fn soft_threshold(values: &Array2<f64>, shrink: f64, bound: f64) -> Array2<f64> {
        values.mapv(|v| {
            let magnitude = (v.abs() - shrink).max(0.0).min(bound);
            magnitude * v.signum()
        })
    }

    /// Solve `X * A = B` for `X`.
    ///
    /// For square `A` this is the exact solution of the transposed system
    /// `A^T * X^T = B^T`; otherwise the least-squares solution. `A` and `B`
    /// must have the same number of columns.
    pub fn mrdivide(b: &Array2<f64>, a: &Array2<f64>) -> Result<Array2<f64>> {
        assert_eq!(
            a.ncols(),
            b.ncols(),
            "mrdivide: A and B must have the same number of columns"
        );

        let transposed = a.t();
        if a.nrows() == a.ncols() {
            let mut solution = Array2::<f64>::zeros((b.nrows(), a.nrows()));
            for (mut out, rhs) in solution.outer_iter_mut().zip(b.outer_iter()) {
                let solved = transposed
                    .solve(&rhs)
                    .map_err(|e| OrnmfError::NumericInstability(format!("exact solve failed: {e}")))?;
                out.assign(&solved);
            }
            Ok(solution)
        } else {
            let result = transposed
                .to_owned()
                .least_squares(&b.t().to_owned())
                .map_err(|e| {
                    OrnmfError::NumericInstability(format!("least-squares solve failed: {e}"))
                })?;
            Ok(result.solution.t().to_owned())
        }
    }

    /// Project a dictionary onto its feasible set: clip negative entries to
    /// zero, then rescale each column whose Euclidean norm exceeds one back
    /// onto the unit ball.
    ///
    /// The rescaling divides by a diagonal matrix of per-column scale factors
    /// through [`Primitives::mrdivide`]. Columns already inside the ball,
    /// including all-zero columns, pass through unchanged.
    pub fn project(dictionary: &Array2<f64>) -> Result<Array2<f64>> {
        let clipped = dictionary.mapv(|v| v.max(0.0));

        let rank = clipped.ncols();
        let mut scales = Array2::<f64>::zeros((rank, rank));
        for (j, column) in clipped.axis_iter(Axis(1)).enumerate() {
            let norm = column.dot(&column).sqrt();
            scales[(j, j)] = norm.max(1.0);
        }

        Self::mrdivide(&clipped, &scales)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_threshold_is_clamp_at_zero_shrink() {
        let values = array![[-20.0, -3.0], [0.0, 20.0]];
        let clamped = Primitives::soft_threshold(&values, 0.0, 15.0);
        assert_eq!(clamped, array![[-15.0, -3.0], [0.0, 15.0]]);
    }

    #[test]
    fn test_threshold_is_soft_threshold_at_infinite_bound() {
        let values = array![[-2.0, -0.5], [0.5, 3.0]];
        let shrunk = Primitives::soft_threshold(&values, 1.0, f64::INFINITY);
        assert_eq!(shrunk, array![[-1.0, 0.0], [0.0, 2.0]]);
    }

    #[test]
    fn test_threshold_shrinks_then_clamps() {
        let values = array![[-30.0, 4.0], [-4.0, 30.0]];
        let result = Primitives::soft_threshold(&values, 2.0, 10.0);
        assert_eq!(result, array![[-10.0, 2.0], [-2.0, 10.0]]);
    }

    #[test]
    fn test_mrdivide_square_exact() {
        let x = array![[1.0, 2.0], [3.0, 4.0], [0.5, -1.0]];
        let a = array![[2.0, 1.0], [0.0, 4.0]];
        let b = x.dot(&a);

        let solved = Primitives::mrdivide(&b, &a).unwrap();
        for (got, want) in solved.iter().zip(x.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_mrdivide_least_squares() {
        // A has full row rank, so X * A = B recovers X exactly in the
        // least-squares sense.
        let x = array![[1.0, -2.0], [0.5, 3.0]];
        let a = array![[1.0, 0.0, 1.0], [0.0, 1.0, 1.0]];
        let b = x.dot(&a);

        let solved = Primitives::mrdivide(&b, &a).unwrap();
        for (got, want) in solved.iter().zip(x.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_mrdivide_singular_errors() {
        let a = Array2::<f64>::zeros((2, 2));
        let b = array![[1.0, 2.0]];
        assert!(matches!(
            Primitives::mrdivide(&b, &a),
            Err(OrnmfError::NumericInstability(_))
        ));
    }

    #[test]
    fn test_project_clips_and_bounds_columns() {
        let w = array![[3.0, -1.0], [4.0, 0.2]];
        let projected = Primitives::project(&w).unwrap();

        for &v in projected.iter() {
            assert!(v >= 0.0, "projection left a negative entry: {v}");
        }
        for column in projected.axis_iter(Axis(1)) {
            let norm = column.dot(&column).sqrt();
            assert!(norm <= 1.0 + 1e-12, "column norm {norm} above bound");
        }
        // First column had norm 5, so it lands exactly on the unit sphere.
        let first = projected.column(0);
        assert_abs_diff_eq!(first.dot(&first).sqrt(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_project_keeps_interior_columns() {
        let w = array![[0.3, 0.0], [0.4, 0.1]];
        let projected = Primitives::project(&w).unwrap();
        for (got, want) in projected.iter().zip(w.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_project_passes_zero_columns() {
        let w = array![[0.0, 2.0], [0.0, 0.0]];
        let projected = Primitives::project(&w).unwrap();
        assert_eq!(projected.column(0).sum(), 0.0);
        assert_abs_diff_eq!(projected[(0, 1)], 1.0, epsilon = 1e-12);
    }
}
