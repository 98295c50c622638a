//! Scalar helpers shared by the move kernel and the partitioner.

const MWEIGHT_COEFF: f64 = 0.4;

/// Move-weight curve. Peaks at 1 when `val` hits `optval` and falls off
/// symmetrically in log space on either side.
///
/// Callers pass `val >= 0` and keep `1 + 0.4*(val - optval)` positive;
/// that is a contract of the call sites, not checked here.
#[must_use]
pub fn mweight(val: f64, optval: f64) -> f64 {
    let arg = 1.0 + MWEIGHT_COEFF * (val - optval);
    let lg = arg.log2();
    1.0 / (1.0 + lg * lg)
}

/// Imbalance between a local and a remote count, in `(-1, 1)`.
/// Negative when the local count dominates, positive when the remote
/// does, and 0 when both are empty.
#[must_use]
pub fn imbalance(lcount: u32, rcount: u32) -> f64 {
    if lcount == 0 && rcount == 0 {
        return 0.0;
    }
    let sl = f64::from(lcount).sqrt();
    let sr = f64::from(rcount).sqrt();
    (sr - sl) / (sr + sl)
}

/// Maximum of a data set; 0 for empty input.
#[must_use]
pub fn data_max(data: &[f64]) -> f64 {
    data.iter().fold(0.0, |acc, &v| if v > acc { v } else { acc })
}

/// Sum of a data set.
#[must_use]
pub fn data_sum(data: &[f64]) -> f64 {
    data.iter().sum()
}

/// Mean of a data set; 0 for empty input.
#[must_use]
pub fn data_mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data_sum(data) / data.len() as f64
}

/// Population standard deviation of a data set.
#[must_use]
pub fn data_stddev(data: &[f64]) -> f64 {
    let mean = data_mean(data);
    let mean2: f64 = data
        .iter()
        .map(|&v| {
            let diff = v - mean;
            diff * diff
        })
        .sum();
    (mean2 / data.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mweight_peaks_at_optimum() {
        assert_relative_eq!(mweight(1.5, 1.5), 1.0);
        assert!(mweight(3.0, 1.5) < 1.0);
        assert!(mweight(0.5, 1.5) < 1.0);
        // Heavier crowding drives the weight further down.
        assert!(mweight(5.0, 1.5) < mweight(3.0, 1.5));
    }

    #[test]
    fn imbalance_signs_and_zero_case() {
        assert_eq!(imbalance(0, 0), 0.0);
        assert_eq!(imbalance(4, 4), 0.0);
        assert!(imbalance(9, 1) < 0.0);
        assert!(imbalance(1, 9) > 0.0);
        assert_relative_eq!(imbalance(1, 9), (3.0 - 1.0) / (3.0 + 1.0));
        // Antisymmetric in its arguments.
        assert_relative_eq!(imbalance(2, 7), -imbalance(7, 2));
    }

    #[test]
    fn descriptive_stats() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(data_sum(&data), 40.0);
        assert_relative_eq!(data_mean(&data), 5.0);
        assert_relative_eq!(data_max(&data), 9.0);
        assert_relative_eq!(data_stddev(&data), 2.0);
    }

    #[test]
    fn empty_input_defaults() {
        assert_eq!(data_max(&[]), 0.0);
        assert_eq!(data_sum(&[]), 0.0);
        assert_eq!(data_mean(&[]), 0.0);
    }
}
