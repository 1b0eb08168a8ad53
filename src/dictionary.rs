//! Projected-gradient update of the dictionary against the accumulated
//! statistics.
//!
//! Minimizes the surrogate for the full-history least-squares fit,
//!
//! ```text
//! g(W) = 1/2 * trace(W^T * W * A) - trace(W^T * B)
//! ```
//!
//! taking gradient steps scaled by the Frobenius norm of `A` and projecting
//! back onto the feasible set after every step, so the dictionary is
//! nonnegative with bounded column norms at all times.

use crate::error::{OrnmfError, Result};
use crate::primitives::Primitives;
use crate::solver::{Convergence, ConvergenceTracker};
use ndarray::Array2;
use ndarray_linalg::OperationNorm;
use std::sync::atomic::{AtomicBool, Ordering};

/// Settings for one dictionary update.
#[derive(Clone, Copy)]
pub(crate) struct DictionarySettings {
    pub step_multiplier: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
}

fn trace(matrix: &Array2<f64>) -> f64 {
    matrix.diag().sum()
}

/// Update the dictionary in place; the projection holds after every step,
/// so the dictionary stays feasible even on a capped or cancelled exit.
pub(crate) fn update_dictionary(
    dictionary: &mut Array2<f64>,
    a: &Array2<f64>,
    b: &Array2<f64>,
    settings: &DictionarySettings,
    cancel: Option<&AtomicBool>,
) -> Result<Convergence> {
    let scale = a
        .opnorm_fro()
        .map_err(|e| OrnmfError::NumericInstability(format!("norm failed: {e}")))?;
    if scale == 0.0 || !scale.is_finite() {
        return Err(OrnmfError::NumericInstability(
            "accumulated statistics have zero or non-finite Frobenius norm".into(),
        ));
    }
    let eta = settings.step_multiplier / scale;

    let mut tracker = ConvergenceTracker::new(settings.tolerance);
    for iteration in 1..=settings.max_iterations {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                return Ok(Convergence::Cancelled {
                    iterations: iteration - 1,
                });
            }
        }

        let stepped = &*dictionary - &((dictionary.dot(a) - b) * eta);
        *dictionary = Primitives::project(&stepped)?;

        let gram = dictionary.t().dot(&*dictionary);
        let objective = 0.5 * trace(&gram.dot(a)) - trace(&dictionary.t().dot(b));

        if tracker.record(objective)? {
            return Ok(Convergence::Converged {
                iterations: iteration,
            });
        }
    }

    log::warn!(
        "dictionary update hit the cap of {} iterations without converging",
        settings.max_iterations
    );
    Ok(Convergence::Capped {
        iterations: settings.max_iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Axis};

    #[test]
    fn test_update_keeps_dictionary_feasible() {
        let mut dictionary = array![[0.9, 0.1], [0.1, 0.8], [0.3, 0.4]];
        let a = array![[2.0, 0.3], [0.3, 1.5]];
        let b = array![[1.0, 0.2], [0.1, 0.9], [0.4, 0.5]];
        let settings = DictionarySettings {
            step_multiplier: 1.0,
            tolerance: 1e-6,
            max_iterations: 1_000,
        };

        update_dictionary(&mut dictionary, &a, &b, &settings, None).unwrap();

        for &v in dictionary.iter() {
            assert!(v >= 0.0, "dictionary entry went negative: {v}");
        }
        for column in dictionary.axis_iter(Axis(1)) {
            let norm = column.dot(&column).sqrt();
            assert!(norm <= 1.0 + 1e-12, "column norm {norm} above bound");
        }
    }

    #[test]
    fn test_update_caps_at_iteration_limit() {
        let mut dictionary = array![[0.9, 0.1], [0.1, 0.8]];
        let a = array![[2.0, 0.3], [0.3, 1.5]];
        let b = array![[1.0, 0.2], [0.1, 0.9]];
        let settings = DictionarySettings {
            step_multiplier: 1.0,
            tolerance: 0.0,
            max_iterations: 5,
        };

        let outcome = update_dictionary(&mut dictionary, &a, &b, &settings, None).unwrap();
        assert_eq!(outcome, Convergence::Capped { iterations: 5 });
    }

    #[test]
    fn test_zero_statistics_are_instability() {
        let mut dictionary = array![[0.9], [0.1]];
        let a = Array2::<f64>::zeros((1, 1));
        let b = Array2::<f64>::zeros((2, 1));
        let settings = DictionarySettings {
            step_multiplier: 1.0,
            tolerance: 1e-5,
            max_iterations: 10,
        };

        assert!(matches!(
            update_dictionary(&mut dictionary, &a, &b, &settings, None),
            Err(OrnmfError::NumericInstability(_))
        ));
    }
}
