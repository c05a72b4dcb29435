//! Assertions for timing-sensitive tests

use std::time::Duration;

/// Assert that two floats are within `epsilon` of each other
///
/// # Examples
///
/// ```
/// use trialflow_common::testing::assertions::assert_approx_eq;
///
/// assert_approx_eq(0.1 + 0.2, 0.3, 1e-9);
/// ```
pub fn assert_approx_eq(actual: f64, expected: f64, epsilon: f64) {
    let diff = (actual - expected).abs();
    assert!(diff < epsilon, "Values not approximately equal: {actual} vs {expected} (diff: {diff})");
}

/// Assert that `actual` is within `tolerance` of `expected`
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use trialflow_common::testing::assertions::assert_duration_in_range;
///
/// let delay = Duration::from_millis(210);
/// assert_duration_in_range(delay, Duration::from_millis(200), Duration::from_millis(50));
/// ```
pub fn assert_duration_in_range(actual: Duration, expected: Duration, tolerance: Duration) {
    let min = expected.saturating_sub(tolerance);
    let max = expected + tolerance;
    assert!(actual >= min && actual <= max, "Duration {actual:?} not in range [{min:?}, {max:?}]");
}
