//! Small descriptive statistics over timing samples.

/// Arithmetic mean, or `None` for an empty sample.
pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// Population standard deviation, or `None` for an empty sample.
pub fn std_dev(samples: &[f64]) -> Option<f64> {
    let m = mean(samples)?;
    let variance = samples.iter().map(|x| (x - m).powi(2)).sum::<f64>() / samples.len() as f64;
    Some(variance.sqrt())
}

/// Coefficient of variation (`std_dev / mean`).
///
/// `None` when the sample is empty or its mean is zero.
pub fn coefficient_of_variation(samples: &[f64]) -> Option<f64> {
    let m = mean(samples)?;
    if m == 0.0 {
        return None;
    }
    Some(std_dev(samples)? / m)
}

/// Successive differences of a sorted sequence of millisecond timestamps.
pub fn gaps(sorted_millis: &[u64]) -> Vec<f64> {
    sorted_millis
        .windows(2)
        .map(|w| w[1].saturating_sub(w[0]) as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sample_has_no_statistics() {
        assert_eq!(mean(&[]), None);
        assert_eq!(std_dev(&[]), None);
        assert_eq!(coefficient_of_variation(&[]), None);
    }

    #[test]
    fn constant_sample_has_zero_spread() {
        let s = [5.0, 5.0, 5.0];
        assert_eq!(mean(&s), Some(5.0));
        assert_eq!(std_dev(&s), Some(0.0));
        assert_eq!(coefficient_of_variation(&s), Some(0.0));
    }

    #[test]
    fn zero_mean_has_no_cv() {
        assert_eq!(coefficient_of_variation(&[0.0, 0.0]), None);
    }

    #[test]
    fn gaps_of_timestamps() {
        assert_eq!(gaps(&[100, 250, 300]), vec![150.0, 50.0]);
        assert!(gaps(&[100]).is_empty());
    }

    #[test]
    fn std_dev_matches_hand_computation() {
        // mean 5, deviations -3,-1,1,3 → variance (9+1+1+9)/4 = 5
        let sd = std_dev(&[2.0, 4.0, 6.0, 8.0]).unwrap();
        assert!((sd - 5f64.sqrt()).abs() < 1e-12);
    }
}
