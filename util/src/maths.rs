//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float
{
    target_range.0
        + ((value - source_range.0)
        * (target_range.1 - target_range.0)
        / (source_range.1 - source_range.0))
}

/// Limit a value to the range `[min, max]`.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T
where
    T: PartialOrd + Copy
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Apply a symmetric deadzone around zero to a value in `[-1, 1]`.
///
/// Values whose magnitude is below `deadzone` become zero, the rest of the range is rescaled so
/// that the output is still continuous and reaches `-1` and `1` at the ends.
pub fn deadzone<T>(value: T, deadzone: T) -> T
where
    T: Float
{
    let zero = T::zero();
    let one = T::one();
    let deadzone = clamp(&deadzone, &zero, &one);

    if value.abs() <= deadzone {
        return zero
    }

    if deadzone >= one {
        return zero
    }

    value.signum() * (value.abs() - deadzone) / (one - deadzone)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lin_map() {
        assert_eq!(lin_map((-1f64, 1f64), (0f64, 180f64), 0f64), 90f64);
        assert_eq!(lin_map((-1f64, 1f64), (0f64, 180f64), -1f64), 0f64);
        assert_eq!(lin_map((-1f64, 1f64), (0f64, 100f64), 1f64), 100f64);
        assert_eq!(lin_map((-1f64, 1f64), (100f64, 0f64), 1f64), 0f64);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(&5, &0, &3), 3);
        assert_eq!(clamp(&-5, &0, &3), 0);
        assert_eq!(clamp(&1.5f64, &0f64, &3f64), 1.5);
    }

    #[test]
    fn test_deadzone() {
        assert_eq!(deadzone(0.05f64, 0.1), 0.0);
        assert_eq!(deadzone(-0.1f64, 0.1), 0.0);
        assert_eq!(deadzone(1f64, 0.1), 1.0);
        assert_eq!(deadzone(-1f64, 0.1), -1.0);
        assert!((deadzone(0.55f64, 0.1) - 0.5).abs() < 1e-12);
        assert_eq!(deadzone(0.3f64, 0.0), 0.3);
        assert_eq!(deadzone(0.99f64, 1.0), 0.0);
    }
}
