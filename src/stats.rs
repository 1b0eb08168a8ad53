//! Running sufficient statistics and the bounded batch history.
//!
//! Two additive matrices summarize every batch processed so far, which is
//! what lets the dictionary update proceed without revisiting raw data:
//! `A` accumulates the second moment of the coefficients and `B` the cross
//! term of the outlier-cleaned data with the coefficients. There is no
//! decay; the sums grow monotonically for the life of the instance.

use ndarray::Array2;
use std::collections::VecDeque;

/// Additive sufficient statistics for the dictionary objective.
#[derive(Clone, Debug)]
pub struct Statistics {
    a: Array2<f64>,
    b: Array2<f64>,
}

impl Statistics {
    pub(crate) fn new(rank: usize, features: usize) -> Self {
        Self {
            a: Array2::zeros((rank, rank)),
            b: Array2::zeros((features, rank)),
        }
    }

    /// Fold one batch's result into the running sums:
    /// `A += H * H^T` and `B += (X - R) * H^T`.
    pub(crate) fn accumulate(
        &mut self,
        batch: &Array2<f64>,
        coefficients: &Array2<f64>,
        outliers: &Array2<f64>,
    ) {
        self.a += &coefficients.dot(&coefficients.t());
        self.b += &(batch - outliers).dot(&coefficients.t());
    }

    /// Second moment of the coefficients, rank x rank.
    pub fn a(&self) -> &Array2<f64> {
        &self.a
    }

    /// Cross term of outlier-cleaned data and coefficients, features x rank.
    pub fn b(&self) -> &Array2<f64> {
        &self.b
    }
}

/// A bounded, opt-in ring buffer of per-batch matrices.
///
/// With a limit of zero nothing is retained; otherwise the most recent
/// `limit` entries are kept and older ones are dropped, so long streams
/// cannot grow memory without bound.
#[derive(Clone, Debug)]
pub struct History {
    entries: VecDeque<Array2<f64>>,
    limit: usize,
}

impl History {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
        }
    }

    pub(crate) fn push(&mut self, entry: Array2<f64>) {
        if self.limit == 0 {
            return;
        }
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Configured retention limit; zero means recording is disabled.
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Retained entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Array2<f64>> {
        self.entries.iter()
    }

    /// The most recently recorded entry.
    pub fn latest(&self) -> Option<&Array2<f64>> {
        self.entries.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_statistics_accumulate_additively() {
        let mut stats = Statistics::new(2, 2);

        let batch = array![[1.0, 0.0], [0.0, 1.0]];
        let coefficients = array![[1.0, 2.0], [0.5, 0.0]];
        let outliers = array![[0.1, 0.0], [0.0, 0.2]];

        stats.accumulate(&batch, &coefficients, &outliers);
        let after_one = stats.a().clone();

        stats.accumulate(&batch, &coefficients, &outliers);

        let expected = &after_one + &coefficients.dot(&coefficients.t());
        assert_eq!(stats.a(), &expected);

        let cross = (&batch - &outliers).dot(&coefficients.t());
        assert_eq!(stats.b(), &(&cross + &cross));
    }

    #[test]
    fn test_history_keeps_most_recent() {
        let mut history = History::new(2);
        history.push(array![[1.0]]);
        history.push(array![[2.0]]);
        history.push(array![[3.0]]);

        assert_eq!(history.len(), 2);
        let kept: Vec<f64> = history.iter().map(|m| m[(0, 0)]).collect();
        assert_eq!(kept, vec![2.0, 3.0]);
        assert_eq!(history.latest().unwrap()[(0, 0)], 3.0);
    }

    #[test]
    fn test_history_disabled_by_default_limit() {
        let mut history = History::new(0);
        history.push(array![[1.0]]);
        assert!(history.is_empty());
    }
}
