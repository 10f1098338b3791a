use crate::error::EngineError;
use serde::{Deserialize, Serialize};

/// Round to 2 decimal places, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Aggregate statistics of one triplicate, all rounded to 2 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriplicateSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub coef_var: f64,
}

/// Turn exactly three finite replicate values into a [`TriplicateSummary`].
///
/// Mean is sum/3. Standard deviation is the Bessel-corrected sample form
/// (n−1), defined as 0.0 outright when the three values are identical.
/// The coefficient of variation is 100×stdev/mean when the rounded mean is
/// nonzero, else 0; it is computed from the already-rounded stdev and mean,
/// so stored CVs agree with what a reader recomputes from the stored
/// columns.
///
/// Anything other than three finite values fails with
/// [`EngineError::InsufficientData`]; missing replicates are never guessed
/// or defaulted.
pub fn aggregate(values: &[f64]) -> Result<TriplicateSummary, EngineError> {
    let finite = values.iter().filter(|v| v.is_finite()).count();
    if values.len() != 3 || finite != 3 {
        return Err(EngineError::InsufficientData { got: finite });
    }

    let raw_mean = (values[0] + values[1] + values[2]) / 3.0;
    let mean = round2(raw_mean);

    let raw_std = if values[0] == values[1] && values[1] == values[2] {
        0.0
    } else {
        let squared: f64 = values.iter().map(|v| (v - raw_mean).powi(2)).sum();
        (squared / 2.0).sqrt()
    };
    let std_dev = round2(raw_std);

    let coef_var = if mean != 0.0 {
        round2(100.0 * std_dev / mean)
    } else {
        0.0
    };

    Ok(TriplicateSummary {
        mean,
        std_dev,
        coef_var,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_values_have_zero_spread() {
        let s = aggregate(&[7.77, 7.77, 7.77]).unwrap();
        assert_eq!(s.mean, 7.77);
        assert_eq!(s.std_dev, 0.0);
        assert_eq!(s.coef_var, 0.0);
    }

    #[test]
    fn round_triplicate() {
        let s = aggregate(&[20.0, 19.0, 21.0]).unwrap();
        assert_eq!(s.mean, 20.00);
        assert_eq!(s.std_dev, 1.00);
        assert_eq!(s.coef_var, 5.00);
    }

    #[test]
    fn cv_uses_rounded_parts() {
        // Raw stdev 0.152752..., raw mean 1.133333...: the unrounded
        // quotient would give 13.48, the stored one must give 13.27.
        let s = aggregate(&[1.0, 1.1, 1.3]).unwrap();
        assert_eq!(s.mean, 1.13);
        assert_eq!(s.std_dev, 0.15);
        assert_eq!(s.coef_var, 13.27);
        assert_ne!(s.coef_var, 13.48);
    }

    #[test]
    fn zero_mean_yields_zero_cv() {
        let s = aggregate(&[-1.0, 0.0, 1.0]).unwrap();
        assert_eq!(s.mean, 0.0);
        assert_eq!(s.std_dev, 1.0);
        assert_eq!(s.coef_var, 0.0);
    }

    #[test]
    fn two_replicates_are_insufficient() {
        let err = aggregate(&[1.0, 2.0]).unwrap_err();
        match err {
            EngineError::InsufficientData { got } => assert_eq!(got, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn four_replicates_are_rejected() {
        assert!(matches!(
            aggregate(&[1.0, 2.0, 3.0, 4.0]),
            Err(EngineError::InsufficientData { .. })
        ));
    }

    #[test]
    fn non_finite_replicate_is_rejected() {
        let err = aggregate(&[1.0, f64::NAN, 2.0]).unwrap_err();
        match err {
            EngineError::InsufficientData { got } => assert_eq!(got, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round2(0.157_578_75), 0.16);
        assert_eq!(round2(19.333_333), 19.33);
        // 0.125 is exact in binary, so the half case is really exercised
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(-0.125), -0.13);
    }
}
