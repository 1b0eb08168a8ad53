//! Input normalization for the fitting entry point.
//!
//! Fitting accepts either a finite sample matrix or a lazy, possibly
//! unbounded stream of feature vectors. [`SampleSource`] resolves that
//! choice once, up front, into an explicit tag; afterwards both modes are
//! consumed through the same one-sample-at-a-time interface, so downstream
//! code never branches on the input kind again.
//!
//! Progress reporting is the caller's concern: wrap the stream in any
//! transparent iterator adapter (for example [`Iterator::inspect`]) before
//! handing it over. The adapter must yield the same elements in the same
//! order and must not buffer ahead.

use crate::error::{OrnmfError, Result};
use ndarray::{Array1, Array2};

/// A normalized source of feature-vector samples.
///
/// Samples are columns: finite mode wraps a features x N matrix, streaming
/// mode wraps a boxed iterator of feature vectors. In streaming mode the
/// feature dimension is learned by pulling exactly one element, which is
/// held aside and yielded first again later, so no sample is lost to the
/// peek.
pub enum SampleSource {
    /// All samples available up front, as columns of a matrix.
    Finite { data: Array2<f64>, cursor: usize },
    /// Samples produced on demand; the producer may block.
    Streaming {
        peeked: Option<Array1<f64>>,
        iter: Box<dyn Iterator<Item = Array1<f64>>>,
    },
}

impl SampleSource {
    /// Wrap a finite features x N sample matrix.
    pub fn matrix(data: Array2<f64>) -> Self {
        SampleSource::Finite { data, cursor: 0 }
    }

    /// Wrap a lazy stream of feature vectors.
    pub fn streaming<I>(iter: I) -> Self
    where
        I: Iterator<Item = Array1<f64>> + 'static,
    {
        SampleSource::Streaming {
            peeked: None,
            iter: Box::new(iter),
        }
    }

    /// Whether this source produces samples lazily.
    pub fn is_streaming(&self) -> bool {
        matches!(self, SampleSource::Streaming { .. })
    }

    /// Determine the feature dimension without losing any sample.
    ///
    /// Finite mode reads the matrix's first dimension. Streaming mode pulls
    /// one element and keeps it pending; an already-exhausted stream is an
    /// insufficient-data error because no dimension can be established.
    pub(crate) fn detect_features(&mut self) -> Result<usize> {
        match self {
            SampleSource::Finite { data, .. } => Ok(data.nrows()),
            SampleSource::Streaming { peeked, iter } => {
                if let Some(sample) = peeked {
                    return Ok(sample.len());
                }
                match iter.next() {
                    Some(sample) => {
                        let features = sample.len();
                        *peeked = Some(sample);
                        Ok(features)
                    }
                    None => Err(OrnmfError::InsufficientData { needed: 1, got: 0 }),
                }
            }
        }
    }
}

impl Iterator for SampleSource {
    type Item = Array1<f64>;

    fn next(&mut self) -> Option<Array1<f64>> {
        match self {
            SampleSource::Finite { data, cursor } => {
                if *cursor >= data.ncols() {
                    return None;
                }
                let column = data.column(*cursor).to_owned();
                *cursor += 1;
                Some(column)
            }
            SampleSource::Streaming { peeked, iter } => peeked.take().or_else(|| iter.next()),
        }
    }
}

impl From<Array2<f64>> for SampleSource {
    fn from(data: Array2<f64>) -> Self {
        SampleSource::matrix(data)
    }
}
