//! Mk model of discrete trait evolution with a single rate parameter.
//!
//! Every pairwise transition between the `k` states happens at the same
//! instantaneous rate `q`:
//!
//! ```text
//!        | -2q   q    q  |
//!  Q  =  |  q   -2q   q  |      (k = 3)
//!        |  q    q   -2q |
//! ```
//!
//! Each row sums to zero, as required of a continuous-time rate matrix. The
//! transition probabilities after time `t` are `P(t) = exp(Q t)`, computed with
//! `nalgebra`'s matrix exponential.

use nalgebra::DMatrix;

/// Build the `k × k` equal-rates matrix: off-diagonal `rate`, diagonal `-(k-1)·rate`.
///
/// # Example
/// ```
/// # use rust_mk_tree_mcmc::mk::rate_matrix;
/// let q = rate_matrix(1.0, 3);
/// assert_eq!(q[(0, 0)], -2.0);
/// assert_eq!(q[(0, 1)], 1.0);
/// ```
pub fn rate_matrix(rate: f64, n_states: usize) -> DMatrix<f64> {
    let diagonal = -(n_states.saturating_sub(1) as f64) * rate;
    DMatrix::from_fn(n_states, n_states, |i, j| if i == j { diagonal } else { rate })
}

/// Transition probabilities `exp(rate_matrix · branch_length)`.
///
/// Entry `(i, j)` is the probability of ending in state `j` after
/// `branch_length` when starting in state `i`. A zero-length branch gives the
/// identity matrix.
pub fn transition_probabilities(rate_matrix: &DMatrix<f64>, branch_length: f64) -> DMatrix<f64> {
    (rate_matrix * branch_length).exp()
}

/// An Mk model with a fixed rate and state count.
#[derive(Debug, Clone, PartialEq)]
pub struct MkModel {
    rate: f64,
    rate_matrix: DMatrix<f64>,
}

impl MkModel {
    pub fn new(rate: f64, n_states: usize) -> Self {
        MkModel {
            rate,
            rate_matrix: rate_matrix(rate, n_states),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn n_states(&self) -> usize {
        self.rate_matrix.nrows()
    }

    pub fn rate_matrix(&self) -> &DMatrix<f64> {
        &self.rate_matrix
    }

    pub fn transition_probabilities(&self, branch_length: f64) -> DMatrix<f64> {
        transition_probabilities(&self.rate_matrix, branch_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    /// Closed form of the equal-rates model:
    /// P_ii = 1/k + (k-1)/k · e^(-kqt), P_ij = 1/k - 1/k · e^(-kqt)
    fn closed_form(rate: f64, n_states: usize, t: f64, i: usize, j: usize) -> f64 {
        let k = n_states as f64;
        let decay = (-k * rate * t).exp();
        if i == j {
            1.0 / k + (k - 1.0) / k * decay
        } else {
            1.0 / k - decay / k
        }
    }

    #[rstest]
    #[case(1.0, 2)]
    #[case(1.0, 3)]
    #[case(0.5, 4)]
    #[case(0.013, 7)]
    #[case(12.5, 20)]
    fn rows_sum_to_zero(#[case] rate: f64, #[case] n_states: usize) {
        let q = rate_matrix(rate, n_states);
        assert_eq!(q.nrows(), n_states);
        assert_eq!(q.ncols(), n_states);
        for row in q.row_iter() {
            assert_abs_diff_eq!(row.sum(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_three_state_matrix() {
        let q = rate_matrix(1.0, 3);
        let expected = DMatrix::from_row_slice(
            3,
            3,
            &[-2.0, 1.0, 1.0, 1.0, -2.0, 1.0, 1.0, 1.0, -2.0],
        );
        assert_eq!(q, expected);
    }

    #[rstest]
    #[case(1.0, 3, 0.5)]
    #[case(1.0, 3, 2.5)]
    #[case(0.2, 2, 1.0)]
    #[case(3.0, 5, 0.1)]
    fn matches_closed_form(#[case] rate: f64, #[case] n_states: usize, #[case] t: f64) {
        let p = MkModel::new(rate, n_states).transition_probabilities(t);
        for i in 0..n_states {
            for j in 0..n_states {
                let expected = closed_form(rate, n_states, t, i, j);
                assert_abs_diff_eq!(p[(i, j)], expected, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_rows_of_probabilities_sum_to_one() {
        let p = MkModel::new(0.7, 4).transition_probabilities(1.3);
        for row in p.row_iter() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-9);
        }
        assert!(p.iter().all(|&x| x >= 0.0));
    }

    #[test]
    fn test_zero_length_is_identity() {
        let p = MkModel::new(1.0, 3).transition_probabilities(0.0);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(p[(i, j)], expected, epsilon = 1e-12);
            }
        }
    }
}
