// Raw torque reading -> physical torque
//
// The drive reports actual torque as current-sensor counts. Dividing by the
// counts-per-amp calibration gives motor current, and the drive-reported
// torque constant turns current into torque.

use std::collections::VecDeque;

/// Current-sensor counts per amp of motor current.
///
/// Device-specific calibration for IONI drives; other drive families use a
/// different scale.
pub const COUNTS_PER_AMP: f64 = 560.0;

/// The torque-constant parameter is reported in units of 1/10000
pub const TORQUE_CONSTANT_SCALE: f64 = 10_000.0;

/// Torque constant used when the drive didn't report one
pub const FALLBACK_TORQUE_CONSTANT: f64 = 1.0;

/// Convert a raw torque reading into physical torque
///
/// A missing torque constant is not an error: the result degrades to motor
/// current scaled by `FALLBACK_TORQUE_CONSTANT`.
pub fn to_physical_torque(raw_counts: i32, torque_constant_raw: Option<i32>) -> f64 {
    let current = raw_counts as f64 / COUNTS_PER_AMP;
    let torque_constant = torque_constant_raw
        .map(|k| k as f64 / TORQUE_CONSTANT_SCALE)
        .unwrap_or(FALLBACK_TORQUE_CONSTANT);

    current * torque_constant
}

/// One torque poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TorqueSample {
    pub raw_counts: i32,
    pub torque_constant_raw: Option<i32>,
}

impl TorqueSample {
    pub fn new(raw_counts: i32, torque_constant_raw: Option<i32>) -> Self {
        Self {
            raw_counts,
            torque_constant_raw,
        }
    }

    pub fn physical(&self) -> f64 {
        to_physical_torque(self.raw_counts, self.torque_constant_raw)
    }
}

/// Rolling mean over the last `capacity` raw torque readings
#[derive(Debug, Clone)]
pub struct TorqueWindow {
    samples: VecDeque<i32>,
    capacity: usize,
}

impl TorqueWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, raw_counts: i32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(raw_counts);
    }

    /// Mean of the buffered readings, `None` before the first reading
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: i64 = self.samples.iter().map(|&s| s as i64).sum();
        Some(sum as f64 / self.samples.len() as f64)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_with_torque_constant() {
        assert_eq!(to_physical_torque(5600, Some(20000)), 20.0);
        assert_eq!(to_physical_torque(5600, Some(20000)), 5600.0 / 560.0 * (20000.0 / 10000.0));
    }

    #[test]
    fn test_conversion_without_torque_constant() {
        assert_eq!(to_physical_torque(560, None), 1.0);
        assert_eq!(to_physical_torque(0, None), 0.0);
    }

    #[test]
    fn test_conversion_keeps_sign_and_precision() {
        assert_eq!(to_physical_torque(-1120, Some(5000)), -1.0);
        let t = to_physical_torque(1, Some(10000));
        assert!((t - 1.0 / 560.0).abs() < 1e-15);
    }

    #[test]
    fn test_sample_physical() {
        assert_eq!(TorqueSample::new(5600, Some(20000)).physical(), 20.0);
        assert_eq!(TorqueSample::new(560, None).physical(), 1.0);
    }

    #[test]
    fn test_window_single_sample_tracks_last() {
        let mut window = TorqueWindow::new(1);
        assert_eq!(window.mean(), None);
        window.push(9000);
        assert_eq!(window.mean(), Some(9000.0));
        window.push(11000);
        assert_eq!(window.mean(), Some(11000.0));
    }

    #[test]
    fn test_window_rolls_over() {
        let mut window = TorqueWindow::new(3);
        for s in [10, 20, 30, 40] {
            window.push(s);
        }
        assert_eq!(window.mean(), Some(30.0));

        window.clear();
        assert_eq!(window.mean(), None);
    }

    #[test]
    fn test_window_zero_capacity_behaves_as_one() {
        let mut window = TorqueWindow::new(0);
        window.push(5);
        window.push(7);
        assert_eq!(window.mean(), Some(7.0));
    }
}
