//! # ornmf: Online Robust Nonnegative Matrix Factorization
//!
//! Factorizes a stream or batch of nonnegative feature vectors into a
//! low-rank dictionary, per-batch coefficients, and a sparse outlier term,
//! one fixed-size batch at a time, so large or unbounded streams can be
//! processed without holding the data in memory.
//!
//! ## Quick Start
//!
//! ```
//! use ndarray::Array2;
//! use ornmf::Ornmf;
//!
//! # fn main() -> ornmf::Result<()> {
//! let data = Array2::from_shape_fn((8, 12), |(i, j)| ((i * 7 + j * 3) % 5) as f64);
//!
//! let mut model = Ornmf::new(2, 4)?
//!     .with_sparsity_weight(0.1)
//!     .with_seed(7);
//! let summary = model.fit(data)?;
//!
//! assert_eq!(summary.batch_count(), 3);
//! assert_eq!(model.dictionary().unwrap().dim(), (8, 2));
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! - **Dictionary `W`**: the learned low-rank basis, features x rank,
//!   nonnegative with unit-bounded column norms
//! - **Coefficients `H`**: nonnegative per-sample weights expressing each
//!   sample in the dictionary basis
//! - **Outliers `R`**: a sparse, magnitude-clamped residual absorbing values
//!   the low-rank model should not explain
//! - **Statistics `A`, `B`**: running aggregates over all past batches that
//!   let the dictionary update proceed without revisiting raw history
//!
//! Batches are processed strictly in order: each batch's coefficient solve
//! reads the dictionary left by the previous batch's update, and the update
//! reads statistics accumulated through the current batch. A single model
//! must not be driven from more than one thread; independent models share
//! nothing and may run in parallel.

pub mod error;
pub mod primitives;
pub mod solver;
pub mod stats;
pub mod stream;

mod batch;
mod dictionary;

pub use error::{OrnmfError, Result};
pub use primitives::Primitives;
pub use solver::Convergence;
pub use stats::{History, Statistics};
pub use stream::SampleSource;

use crate::batch::Batcher;
use crate::dictionary::DictionarySettings;
use crate::solver::CoefficientSettings;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const DEFAULT_CLAMP: f64 = 15.0;
const DEFAULT_COEFFICIENT_TOLERANCE: f64 = 1e-3;
const DEFAULT_DICTIONARY_TOLERANCE: f64 = 1e-5;
const DEFAULT_MAX_COEFFICIENT_ITERATIONS: usize = 100_000;
const DEFAULT_MAX_DICTIONARY_ITERATIONS: usize = 1_000;

/// Per-batch convergence record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchReport {
    /// Outcome of the coefficient/outlier solve.
    pub coefficients: Convergence,
    /// Outcome of the dictionary update.
    pub dictionary: Convergence,
}

/// What one `fit` call did, batch by batch.
///
/// Capped loops are reported here (and logged) rather than silently treated
/// as converged.
#[derive(Clone, Debug, Default)]
pub struct FitSummary {
    /// One report per fully incorporated batch, in processing order.
    pub batches: Vec<BatchReport>,
    /// Whether a cancellation flag cut the run short.
    pub cancelled: bool,
}

impl FitSummary {
    /// Number of batches incorporated into the model.
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Whether every inner loop of every batch converged within tolerance.
    pub fn all_converged(&self) -> bool {
        self.batches
            .iter()
            .all(|report| report.coefficients.is_converged() && report.dictionary.is_converged())
    }
}

/// Mutable model state, created on the first `fit` call.
struct ModelState {
    features: usize,
    dictionary: Array2<f64>,
    coefficients: Array2<f64>,
    outliers: Array2<f64>,
    statistics: Statistics,
    coefficient_history: History,
    outlier_history: History,
}

/// The online robust factorizer - the primary interface of this crate.
///
/// Construct with [`Ornmf::new`], configure with the `with_*` builders
/// before the first fit, then call [`Ornmf::fit`] as many times as data
/// arrives. The first fit fixes the feature count and initializes the
/// dictionary; later fits continue training the same model.
///
/// # Example
///
/// ```
/// use ndarray::{Array1, Array2};
/// use ornmf::{Ornmf, SampleSource};
///
/// # fn main() -> ornmf::Result<()> {
/// let stream = (0..20).map(|i| Array1::from_elem(6, (i % 4) as f64 + 0.5));
///
/// let mut model = Ornmf::new(3, 5)?.with_sparsity_weight(0.2);
/// model.fit(SampleSource::streaming(stream))?;
/// # Ok(())
/// # }
/// ```
pub struct Ornmf {
    rank: usize,
    batch_size: usize,
    sparsity_weight: Option<f64>,
    clamp: f64,
    coefficient_tolerance: f64,
    dictionary_tolerance: f64,
    max_coefficient_iterations: usize,
    max_dictionary_iterations: usize,
    step_multiplier: f64,
    seed: u64,
    history_limit: usize,
    cancel: Option<Arc<AtomicBool>>,
    state: Option<ModelState>,
}

impl Ornmf {
    /// Create a factorizer learning `rank` components from batches of
    /// `batch_size` samples. Both must be positive.
    pub fn new(rank: usize, batch_size: usize) -> Result<Self> {
        if rank == 0 {
            return Err(OrnmfError::Config("rank must be positive".into()));
        }
        if batch_size == 0 {
            return Err(OrnmfError::Config("batch size must be positive".into()));
        }
        Ok(Self {
            rank,
            batch_size,
            sparsity_weight: None,
            clamp: DEFAULT_CLAMP,
            coefficient_tolerance: DEFAULT_COEFFICIENT_TOLERANCE,
            dictionary_tolerance: DEFAULT_DICTIONARY_TOLERANCE,
            max_coefficient_iterations: DEFAULT_MAX_COEFFICIENT_ITERATIONS,
            max_dictionary_iterations: DEFAULT_MAX_DICTIONARY_ITERATIONS,
            step_multiplier: 1.0,
            seed: 0,
            history_limit: 0,
            cancel: None,
            state: None,
        })
    }

    // =========================================================================
    // Configuration (call before the first fit)
    // =========================================================================

    /// Set the L1 sparsity weight applied to the outlier term. Required
    /// before the first fit.
    pub fn with_sparsity_weight(mut self, weight: f64) -> Self {
        self.sparsity_weight = Some(weight);
        self
    }

    /// Set the magnitude bound on outlier entries. Defaults to 15.
    pub fn with_clamp(mut self, bound: f64) -> Self {
        self.clamp = bound;
        self
    }

    /// Seed the random source used for the initial dictionary and buffers.
    /// The same seed and data reproduce the same model exactly.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Scale both gradient step sizes. Defaults to 1.
    pub fn with_step_multiplier(mut self, multiplier: f64) -> Self {
        self.step_multiplier = multiplier;
        self
    }

    /// Set the relative-change tolerances for the coefficient solve and the
    /// dictionary update. Defaults: 1e-3 and 1e-5.
    pub fn with_tolerances(mut self, coefficient: f64, dictionary: f64) -> Self {
        self.coefficient_tolerance = coefficient;
        self.dictionary_tolerance = dictionary;
        self
    }

    /// Set the iteration caps bounding each inner loop. Defaults: 100_000
    /// for the coefficient solve, 1_000 for the dictionary update.
    pub fn with_iteration_caps(mut self, coefficient: usize, dictionary: usize) -> Self {
        self.max_coefficient_iterations = coefficient;
        self.max_dictionary_iterations = dictionary;
        self
    }

    /// Retain the last `limit` per-batch coefficient and outlier matrices.
    /// Recording is off by default so long streams cannot grow memory
    /// without bound.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Install a cooperative cancellation flag, checked at batch boundaries
    /// and at every inner iteration. A cancelled fit returns early with the
    /// model in a valid state.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    // =========================================================================
    // Fitting
    // =========================================================================

    /// Fit the model on a finite matrix or a lazy stream of samples.
    ///
    /// The first call fixes the feature count from the input and draws the
    /// initial dictionary; every later sample must match that length. Each
    /// full batch passes through the coefficient/outlier solve, the
    /// statistics accumulation, and the dictionary update, in that order.
    /// Calling `fit` again continues training on further data.
    pub fn fit(&mut self, input: impl Into<SampleSource>) -> Result<FitSummary> {
        let sparsity_weight = match self.sparsity_weight {
            Some(weight) if weight.is_finite() && weight >= 0.0 => weight,
            Some(weight) => {
                return Err(OrnmfError::Config(format!(
                    "sparsity weight must be finite and nonnegative, got {weight}"
                )))
            }
            None => {
                return Err(OrnmfError::Config(
                    "sparsity weight must be set before fitting".into(),
                ))
            }
        };

        let mut source = input.into();
        if self.state.is_none() {
            self.state = Some(self.initialize(&mut source)?);
        }

        let coefficient_settings = CoefficientSettings {
            sparsity_weight,
            clamp: self.clamp,
            step_multiplier: self.step_multiplier,
            tolerance: self.coefficient_tolerance,
            max_iterations: self.max_coefficient_iterations,
        };
        let dictionary_settings = DictionarySettings {
            step_multiplier: self.step_multiplier,
            tolerance: self.dictionary_tolerance,
            max_iterations: self.max_dictionary_iterations,
        };
        let cancel = self.cancel.clone();
        let cancel = cancel.as_deref();

        let Some(state) = self.state.as_mut() else {
            return Err(OrnmfError::Config("model state missing after setup".into()));
        };

        let mut summary = FitSummary::default();
        let mut batcher = Batcher::new(&mut source, state.features, self.batch_size);

        while let Some(batch) = batcher.next_batch()? {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    summary.cancelled = true;
                    break;
                }
            }

            let coefficients_outcome = solver::solve_coefficients(
                &batch,
                &state.dictionary,
                &mut state.coefficients,
                &mut state.outliers,
                &coefficient_settings,
                cancel,
            )?;
            if matches!(coefficients_outcome, Convergence::Cancelled { .. }) {
                // The batch was never incorporated; drop it.
                summary.cancelled = true;
                break;
            }

            state.coefficient_history.push(state.coefficients.clone());
            state.outlier_history.push(state.outliers.clone());
            state
                .statistics
                .accumulate(&batch, &state.coefficients, &state.outliers);

            let dictionary_outcome = dictionary::update_dictionary(
                &mut state.dictionary,
                state.statistics.a(),
                state.statistics.b(),
                &dictionary_settings,
                cancel,
            )?;

            if !(all_finite(&state.dictionary)
                && all_finite(&state.coefficients)
                && all_finite(&state.outliers))
            {
                return Err(OrnmfError::NumericInstability(
                    "model state became non-finite".into(),
                ));
            }

            log::debug!(
                "batch {}: coefficients {:?}, dictionary {:?}",
                summary.batches.len(),
                coefficients_outcome,
                dictionary_outcome
            );
            summary.batches.push(BatchReport {
                coefficients: coefficients_outcome,
                dictionary: dictionary_outcome,
            });

            if matches!(dictionary_outcome, Convergence::Cancelled { .. }) {
                summary.cancelled = true;
                break;
            }
        }

        Ok(summary)
    }

    /// Fix the feature count and draw the starting model state.
    ///
    /// The initial dictionary is nonnegative uniform noise passed through
    /// the column projection, so the very first coefficient solve already
    /// sees a feasible, well-defined basis.
    fn initialize(&self, source: &mut SampleSource) -> Result<ModelState> {
        let features = source.detect_features()?;
        if features == 0 {
            return Err(OrnmfError::Config("input has no features".into()));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let raw = Array2::from_shape_fn((features, self.rank), |_| rng.gen::<f64>());
        let dictionary = Primitives::project(&raw)?;
        let coefficients =
            Array2::from_shape_fn((self.rank, self.batch_size), |_| rng.gen::<f64>());
        let outliers = Array2::from_shape_fn((features, self.batch_size), |_| rng.gen::<f64>());

        Ok(ModelState {
            features,
            dictionary,
            coefficients,
            outliers,
            statistics: Statistics::new(self.rank, features),
            coefficient_history: History::new(self.history_limit),
            outlier_history: History::new(self.history_limit),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Configured number of components.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Configured batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Feature count fixed by the first sample seen, if any.
    pub fn feature_count(&self) -> Option<usize> {
        self.state.as_ref().map(|state| state.features)
    }

    /// The learned dictionary, features x rank.
    pub fn dictionary(&self) -> Option<&Array2<f64>> {
        self.state.as_ref().map(|state| &state.dictionary)
    }

    /// The accumulated sufficient statistics.
    pub fn statistics(&self) -> Option<&Statistics> {
        self.state.as_ref().map(|state| &state.statistics)
    }

    /// Retained per-batch coefficient matrices, oldest first.
    pub fn coefficient_history(&self) -> Option<&History> {
        self.state.as_ref().map(|state| &state.coefficient_history)
    }

    /// Retained per-batch outlier matrices, oldest first.
    pub fn outlier_history(&self) -> Option<&History> {
        self.state.as_ref().map(|state| &state.outlier_history)
    }
}

fn all_finite(matrix: &Array2<f64>) -> bool {
    matrix.iter().all(|v| v.is_finite())
}
