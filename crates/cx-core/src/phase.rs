use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use crate::constants::{EPSILON, GOLDEN_ANGLE};

/// Phase angle on the unit circle, always held in [0, 2π).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Phase {
    pub theta: f64,
}

impl Phase {
    /// Create a phase with the given angle, wrapped into [0, 2π).
    pub fn new(theta: f64) -> Self {
        Self {
            theta: wrap(theta),
        }
    }

    /// Phase from index using golden-angle spacing.
    /// theta = base_theta + index * GOLDEN_ANGLE
    pub fn from_index(index: usize, base_theta: f64) -> Self {
        Self::new(base_theta + index as f64 * GOLDEN_ANGLE)
    }

    /// cos(self - other). +1 in phase, -1 opposed.
    pub fn interference(self, other: Self) -> f64 {
        (self.theta - other.theta).cos()
    }

    /// Signed shortest-arc difference `other - self`, in [-π, π].
    pub fn delta_to(self, other: Self) -> f64 {
        let mut diff = other.theta - self.theta;
        while diff > PI {
            diff -= TAU;
        }
        while diff < -PI {
            diff += TAU;
        }
        diff
    }
}

impl PartialEq for Phase {
    fn eq(&self, other: &Self) -> bool {
        (self.theta - other.theta).abs() < EPSILON
    }
}

/// Wrap any finite angle into [0, 2π). Non-finite input collapses to 0.
pub fn wrap(theta: f64) -> f64 {
    if !theta.is_finite() {
        return 0.0;
    }
    let wrapped = theta.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU { 0.0 } else { wrapped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_phase_normalization() {
        let p = Phase::new(-1.0);
        assert!(p.theta >= 0.0 && p.theta < TAU);

        let p2 = Phase::new(10.0);
        assert!(p2.theta >= 0.0 && p2.theta < TAU);
    }

    #[test]
    fn test_tiny_negative_wraps_below_tau() {
        let p = Phase::new(-1e-18);
        assert!(p.theta < TAU, "got {}", p.theta);
    }

    #[test]
    fn test_nan_wraps_to_zero() {
        assert_eq!(Phase::new(f64::NAN).theta, 0.0);
    }

    #[test]
    fn test_golden_angle_spacing() {
        let p0 = Phase::from_index(0, 0.0);
        let p1 = Phase::from_index(1, 0.0);
        let diff = (p1.theta - p0.theta).abs();
        assert!(
            (diff - GOLDEN_ANGLE).abs() < 1e-10,
            "expected golden angle spacing: got {diff}"
        );
    }

    #[test]
    fn test_interference_out_of_phase() {
        let a = Phase::new(0.0);
        let b = Phase::new(PI);
        assert!((a.interference(b) - (-1.0)).abs() < 1e-10);
    }

    #[test]
    fn test_delta_takes_shortest_arc() {
        let a = Phase::new(0.1);
        let b = Phase::new(6.0);
        let d = a.delta_to(b);
        assert!(d < 0.0, "expected backward arc, got {d}");
        assert!((d - (6.0 - 0.1 - TAU)).abs() < 1e-10);
    }

    proptest! {
        #[test]
        fn wrap_stays_in_range(theta in -1.0e6f64..1.0e6f64) {
            let w = wrap(theta);
            prop_assert!((0.0..TAU).contains(&w));
        }
    }
}
