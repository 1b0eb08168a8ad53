//! Grouping the sample stream into fixed-size batches.
//!
//! Every batch handed downstream has exactly the configured number of
//! columns. When the stream runs out mid-batch, the final batch is
//! backfilled with the trailing columns of the previous one, so some
//! samples are processed twice rather than ever shrinking the batch.

use crate::error::{OrnmfError, Result};
use crate::stream::SampleSource;
use ndarray::{s, Array1, Array2};

/// Pulls samples one at a time and emits features x batch_size matrices.
///
/// Samples are requested strictly on demand, so backpressure from a blocking
/// producer propagates naturally to the caller. Each sample's length is
/// checked against the fixed feature count.
pub(crate) struct Batcher<'a> {
    source: &'a mut SampleSource,
    features: usize,
    batch_size: usize,
    previous: Option<Array2<f64>>,
}

impl<'a> Batcher<'a> {
    pub fn new(source: &'a mut SampleSource, features: usize, batch_size: usize) -> Self {
        Self {
            source,
            features,
            batch_size,
            previous: None,
        }
    }

    /// Produce the next full batch, or `None` once the source is exhausted.
    ///
    /// A final partial group is completed with the trailing
    /// `batch_size - leftover` columns of the previous batch, in original
    /// order, followed by the leftover samples. Leftover samples with no
    /// previous batch to borrow from are an insufficient-data error.
    pub fn next_batch(&mut self) -> Result<Option<Array2<f64>>> {
        let mut pending: Vec<Array1<f64>> = Vec::with_capacity(self.batch_size);
        while pending.len() < self.batch_size {
            match self.source.next() {
                Some(sample) => {
                    if sample.len() != self.features {
                        return Err(OrnmfError::DimensionMismatch {
                            expected: self.features,
                            got: sample.len(),
                        });
                    }
                    pending.push(sample);
                }
                None => break,
            }
        }

        if pending.len() == self.batch_size {
            let mut batch = Array2::zeros((self.features, self.batch_size));
            for (j, sample) in pending.iter().enumerate() {
                batch.column_mut(j).assign(sample);
            }
            self.previous = Some(batch.clone());
            return Ok(Some(batch));
        }

        if pending.is_empty() {
            return Ok(None);
        }

        match self.previous.as_ref() {
            None => Err(OrnmfError::InsufficientData {
                needed: self.batch_size,
                got: pending.len(),
            }),
            Some(previous) => {
                let borrowed = self.batch_size - pending.len();
                let mut batch = Array2::zeros((self.features, self.batch_size));
                batch
                    .slice_mut(s![.., ..borrowed])
                    .assign(&previous.slice(s![.., self.batch_size - borrowed..]));
                for (j, sample) in pending.iter().enumerate() {
                    batch.column_mut(borrowed + j).assign(sample);
                }
                Ok(Some(batch))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn columns(n: usize, features: usize) -> Array2<f64> {
        // Column j is filled with the value j, so batches are easy to read.
        Array2::from_shape_fn((features, n), |(_, j)| j as f64)
    }

    #[test]
    fn test_exact_multiple_produces_disjoint_batches() {
        let mut source = SampleSource::matrix(columns(9, 4));
        let mut batcher = Batcher::new(&mut source, 4, 3);

        let mut seen = Vec::new();
        while let Some(batch) = batcher.next_batch().unwrap() {
            assert_eq!(batch.dim(), (4, 3));
            seen.push(batch);
        }

        assert_eq!(seen.len(), 3);
        for (i, batch) in seen.iter().enumerate() {
            for j in 0..3 {
                assert_eq!(batch[(0, j)], (i * 3 + j) as f64, "sample reused or reordered");
            }
        }
    }

    #[test]
    fn test_partial_tail_is_backfilled_in_order() {
        let mut source = SampleSource::matrix(columns(7, 2));
        let mut batcher = Batcher::new(&mut source, 2, 3);

        let mut seen = Vec::new();
        while let Some(batch) = batcher.next_batch().unwrap() {
            seen.push(batch);
        }

        assert_eq!(seen.len(), 3);
        // Third batch: last two columns of the second batch, then the one
        // leftover sample, all in original order.
        let third = &seen[2];
        assert_eq!(third[(0, 0)], 4.0);
        assert_eq!(third[(0, 1)], 5.0);
        assert_eq!(third[(0, 2)], 6.0);
    }

    #[test]
    fn test_leftover_without_previous_batch_fails() {
        let mut source = SampleSource::matrix(columns(2, 3));
        let mut batcher = Batcher::new(&mut source, 3, 3);

        match batcher.next_batch() {
            Err(OrnmfError::InsufficientData { needed, got }) => {
                assert_eq!(needed, 3);
                assert_eq!(got, 2);
            }
            other => panic!("expected insufficient data, got {other:?}"),
        }
    }

    #[test]
    fn test_sample_length_is_validated() {
        let vectors = vec![
            ndarray::Array1::zeros(4),
            ndarray::Array1::zeros(3),
        ];
        let mut source = SampleSource::streaming(vectors.into_iter());
        let mut batcher = Batcher::new(&mut source, 4, 2);

        match batcher.next_batch() {
            Err(OrnmfError::DimensionMismatch { expected, got }) => {
                assert_eq!(expected, 4);
                assert_eq!(got, 3);
            }
            other => panic!("expected dimension mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_source_yields_no_batches() {
        let mut source = SampleSource::matrix(Array2::zeros((3, 0)));
        let mut batcher = Batcher::new(&mut source, 3, 2);
        assert!(batcher.next_batch().unwrap().is_none());
    }
}
