//! Alternating projected-gradient solve for coefficients and outliers.
//!
//! For one batch `X` and a fixed dictionary `W`, minimizes
//!
//! ```text
//! f(H, R) = 1/2 ||X - W*H - R||_F^2 + lambda * ||R||_1
//! ```
//!
//! subject to `H >= 0` and `|R| <= clamp`, by alternating a nonnegative
//! projected gradient step on `H` with the soft-threshold-and-clamp proximal
//! step on `R`. The step size is the Lipschitz bound derived from the
//! spectral norm of `W`, computed once per batch.

use crate::error::{OrnmfError, Result};
use crate::primitives::Primitives;
use ndarray::Array2;
use ndarray_linalg::{OperationNorm, SVD};
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of an iterative optimization loop.
///
/// Non-convergence is never silently treated as success: a loop that hits
/// its iteration cap reports `Capped`, and a cooperatively cancelled loop
/// reports `Cancelled` with the passes it completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Convergence {
    /// The relative objective change fell below the tolerance.
    Converged { iterations: usize },
    /// The iteration cap was reached first.
    Capped { iterations: usize },
    /// A cancellation flag was observed mid-loop.
    Cancelled { iterations: usize },
}

impl Convergence {
    /// Whether the loop actually converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Convergence::Converged { .. })
    }

    /// Number of full passes executed.
    pub fn iterations(&self) -> usize {
        match *self {
            Convergence::Converged { iterations }
            | Convergence::Capped { iterations }
            | Convergence::Cancelled { iterations } => iterations,
        }
    }
}

/// Tracks objective values across passes and decides convergence.
///
/// At least two passes are required before the relative-change test is
/// applied. A zero or non-finite previous objective would corrupt the ratio
/// and is reported as numeric instability instead of being glossed over.
pub(crate) struct ConvergenceTracker {
    tolerance: f64,
    previous: Option<f64>,
}

impl ConvergenceTracker {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            previous: None,
        }
    }

    /// Record the objective after a full pass; `Ok(true)` means converged.
    pub fn record(&mut self, objective: f64) -> Result<bool> {
        if !objective.is_finite() {
            return Err(OrnmfError::NumericInstability(
                "objective value became non-finite".into(),
            ));
        }
        let converged = match self.previous {
            None => false,
            Some(previous) => {
                if previous == 0.0 || !previous.is_finite() {
                    return Err(OrnmfError::NumericInstability(
                        "convergence ratio would divide by a zero or non-finite objective".into(),
                    ));
                }
                ((objective - previous) / previous).abs() < self.tolerance
            }
        };
        self.previous = Some(objective);
        Ok(converged)
    }
}

/// Settings for one coefficient/outlier solve.
#[derive(Clone, Copy)]
pub(crate) struct CoefficientSettings {
    pub sparsity_weight: f64,
    pub clamp: f64,
    pub step_multiplier: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
}

/// Solve for the batch's coefficients and outliers in place.
///
/// `coefficients` and `outliers` carry their values from the previous batch
/// as the warm start and are overwritten with the converged (or capped)
/// result.
pub(crate) fn solve_coefficients(
    batch: &Array2<f64>,
    dictionary: &Array2<f64>,
    coefficients: &mut Array2<f64>,
    outliers: &mut Array2<f64>,
    settings: &CoefficientSettings,
    cancel: Option<&AtomicBool>,
) -> Result<Convergence> {
    let (_, singular_values, _) = dictionary.svd(false, false).map_err(|e| {
        OrnmfError::NumericInstability(format!("spectral norm computation failed: {e}"))
    })?;
    let lipschitz = singular_values.first().copied().unwrap_or(0.0).powi(2);
    if lipschitz == 0.0 || !lipschitz.is_finite() {
        return Err(OrnmfError::NumericInstability(
            "dictionary spectral norm is zero or non-finite".into(),
        ));
    }
    let eta = settings.step_multiplier / lipschitz;

    let mut tracker = ConvergenceTracker::new(settings.tolerance);
    for iteration in 1..=settings.max_iterations {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                return Ok(Convergence::Cancelled {
                    iterations: iteration - 1,
                });
            }
        }

        // Gradient step on H against the current outliers, then project
        // onto the nonnegative orthant.
        let gradient = dictionary
            .t()
            .dot(&(dictionary.dot(coefficients) + &*outliers - batch));
        *coefficients -= &(gradient * eta);
        coefficients.mapv_inplace(|v| v.max(0.0));

        // Proximal step on R from the fresh residual.
        *outliers = Primitives::soft_threshold(
            &(batch - &dictionary.dot(coefficients)),
            settings.sparsity_weight,
            settings.clamp,
        );

        let residual = batch - &dictionary.dot(coefficients) - &*outliers;
        let penalty: f64 = outliers.iter().map(|v| v.abs()).sum();
        let objective = 0.5
            * residual
                .opnorm_fro()
                .map_err(|e| OrnmfError::NumericInstability(format!("norm failed: {e}")))?
                .powi(2)
            + settings.sparsity_weight * penalty;

        if tracker.record(objective)? {
            return Ok(Convergence::Converged {
                iterations: iteration,
            });
        }
    }

    log::warn!(
        "coefficient solve hit the cap of {} iterations without converging",
        settings.max_iterations
    );
    Ok(Convergence::Capped {
        iterations: settings.max_iterations,
    })
}
