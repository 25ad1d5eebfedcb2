//! Velocity handling: converting the travel time between a key's two contacts into a linear velocity, and shaping
//! that linear velocity through one of several fixed response curves.

use crate::configuration::CycleConfig;
use embassy_time::Duration;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use wmidi::U7;

/// The loudest velocity MIDI can express.
const MAX_VELOCITY: u8 = 127;

/// Thresholds translating the time between two contacts into a linear velocity.
///
/// A delay at or below `fastest` yields the maximum velocity; a delay at or beyond `slowest` yields the minimum
/// (non-zero) velocity. Delays in between are mapped linearly.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DelayThresholds {
    /// Delays this short or shorter produce a velocity of 127.
    pub fastest: Duration,
    /// Delays this long or longer produce a velocity of 1.
    pub slowest: Duration,
}

impl DelayThresholds {
    /// Constructs [`DelayThresholds`].
    pub const fn new(fastest: Duration, slowest: Duration) -> Self {
        Self { fastest, slowest }
    }

    /// Returns the linear velocity (1-127) for the given delay between contacts.
    pub fn velocity(&self, delay: Duration) -> U7 {
        if delay <= self.fastest {
            return U7::from_u8_lossy(MAX_VELOCITY);
        }

        // a misconfigured window (slowest not beyond fastest) leaves nothing to interpolate
        let window = self.slowest.as_micros().saturating_sub(self.fastest.as_micros());
        if window == 0 {
            return U7::from_u8_lossy(1);
        }

        let excess = (delay.as_micros() - self.fastest.as_micros()).min(window);
        let reduction = excess * u64::from(MAX_VELOCITY) / window;
        let velocity = u64::from(MAX_VELOCITY).saturating_sub(reduction).clamp(1, 127);
        U7::from_u8_lossy(velocity as u8)
    }
}

/// Selects the response curve applied to linear velocities before they are sent.
///
/// All curves map 1-127 onto 1-127 and never decrease as the input increases.
#[derive(Debug, Default, Clone, Copy, ToPrimitive, FromPrimitive, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VelocityCurve {
    /// Velocities pass through unchanged.
    #[default]
    Linear,
    /// Soft playing is lifted, loud playing flattens out.
    Convex,
    /// Soft playing is attenuated; only hard strikes reach the top of the range.
    Concave,
    /// Both ends compressed; most of the resolution is spent in the middle of the range.
    Sigmoid,
    /// Reaches full velocity two thirds of the way up the linear range.
    Saturation,
    /// Halfway between linear and an S-curve.
    Balanced,
    /// Steep lift of quiet strikes, intended for pedal bass.
    BassBoost,
}
impl CycleConfig for VelocityCurve {}

impl VelocityCurve {
    /// Decodes a persisted curve identifier, falling back to [`VelocityCurve::Linear`] for unknown values.
    pub fn from_id(id: u8) -> Self {
        match Self::from_u8(id) {
            Some(curve) => curve,
            None => {
                warn!("Unknown velocity curve {}, falling back to linear", id);
                Self::Linear
            }
        }
    }

    /// Maps a linear velocity through this curve.
    pub fn lookup(&self, velocity: U7) -> U7 {
        let index = usize::from(u8::from(velocity));
        let shaped = match self {
            Self::Linear => return U7::from_u8_lossy(u8::from(velocity).max(1)),
            Self::Convex => CONVEX[index],
            Self::Concave => CONCAVE[index],
            Self::Sigmoid => SIGMOID[index],
            Self::Saturation => SATURATION[index],
            Self::Balanced => BALANCED[index],
            Self::BassBoost => BASS_BOOST[index],
        };
        U7::from_u8_lossy(shaped)
    }
}

const CONVEX: [u8; 128] = [
    1, 3, 5, 7, 9, 11, 13, 15, 16, 18, 20, 22, 24, 25, 27, 29,
    31, 32, 34, 36, 38, 39, 41, 43, 44, 46, 47, 49, 50, 52, 53, 55,
    56, 58, 59, 61, 62, 64, 65, 67, 68, 69, 71, 72, 73, 74, 76, 77,
    78, 79, 81, 82, 83, 84, 85, 87, 88, 89, 90, 91, 92, 93, 94, 95,
    96, 97, 98, 99, 100, 101, 102, 103, 103, 104, 105, 106, 107, 107, 108, 109,
    110, 110, 111, 112, 113, 113, 114, 115, 115, 116, 116, 117, 117, 118, 118, 119,
    119, 120, 120, 121, 121, 122, 122, 123, 123, 123, 124, 124, 124, 124, 125, 125,
    125, 125, 126, 126, 126, 126, 126, 127, 127, 127, 127, 127, 127, 127, 127, 127,
];
const CONCAVE: [u8; 128] = [
    1, 1, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 3, 3,
    3, 3, 4, 4, 4, 4, 5, 5, 5, 6, 6, 7, 7, 8, 8, 9,
    9, 10, 10, 11, 11, 12, 12, 13, 13, 14, 15, 15, 16, 17, 18, 18,
    19, 20, 21, 21, 22, 23, 24, 25, 25, 26, 27, 28, 29, 30, 31, 32,
    33, 34, 35, 36, 37, 38, 39, 40, 41, 43, 44, 45, 46, 47, 49, 50,
    51, 52, 54, 55, 56, 57, 59, 60, 61, 63, 64, 66, 67, 69, 70, 72,
    73, 75, 76, 78, 79, 81, 82, 84, 85, 87, 89, 90, 92, 94, 96, 97,
    99, 101, 103, 104, 106, 108, 110, 112, 113, 115, 117, 119, 121, 123, 125, 127,
];
const SIGMOID: [u8; 128] = [
    1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2, 2, 2, 3, 3,
    3, 3, 4, 4, 4, 4, 5, 5, 6, 6, 6, 7, 7, 8, 9, 9,
    10, 11, 12, 12, 13, 14, 15, 16, 17, 19, 20, 21, 23, 24, 26, 28,
    29, 31, 33, 35, 37, 39, 41, 43, 46, 48, 50, 53, 55, 58, 60, 63,
    65, 68, 70, 73, 75, 78, 80, 82, 85, 87, 89, 91, 93, 95, 97, 99,
    100, 102, 104, 105, 107, 108, 109, 111, 112, 113, 114, 115, 116, 116, 117, 118,
    119, 119, 120, 121, 121, 122, 122, 122, 123, 123, 124, 124, 124, 124, 125, 125,
    125, 125, 126, 126, 126, 126, 126, 126, 126, 126, 127, 127, 127, 127, 127, 127,
];
const SATURATION: [u8; 128] = [
    1, 2, 4, 5, 7, 8, 10, 11, 13, 14, 16, 17, 19, 20, 22, 23,
    25, 26, 28, 29, 31, 32, 34, 35, 37, 38, 40, 41, 43, 44, 46, 47,
    49, 50, 52, 53, 55, 56, 58, 59, 61, 62, 64, 65, 66, 68, 69, 71,
    72, 74, 75, 77, 78, 80, 81, 83, 84, 86, 87, 89, 90, 92, 93, 95,
    96, 98, 99, 101, 102, 104, 105, 107, 108, 110, 111, 113, 114, 116, 117, 119,
    120, 122, 123, 125, 126, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127,
    127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127,
    127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127,
];
const BALANCED: [u8; 128] = [
    1, 2, 2, 3, 3, 4, 4, 5, 6, 6, 7, 8, 9, 9, 10, 11,
    12, 13, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26,
    27, 28, 29, 30, 31, 32, 33, 35, 36, 37, 38, 39, 40, 41, 43, 44,
    45, 46, 47, 49, 50, 51, 52, 53, 55, 56, 57, 58, 60, 61, 62, 63,
    65, 66, 67, 68, 70, 71, 72, 73, 75, 76, 77, 78, 79, 81, 82, 83,
    84, 85, 87, 88, 89, 90, 91, 92, 93, 95, 96, 97, 98, 99, 100, 101,
    102, 103, 104, 105, 106, 107, 108, 109, 110, 111, 112, 113, 114, 115, 115, 116,
    117, 118, 119, 119, 120, 121, 122, 122, 123, 124, 124, 125, 125, 126, 126, 127,
];
const BASS_BOOST: [u8; 128] = [
    1, 19, 25, 29, 33, 36, 38, 41, 43, 45, 47, 48, 50, 52, 53, 55,
    56, 57, 59, 60, 61, 62, 63, 65, 66, 67, 68, 69, 70, 71, 72, 73,
    74, 74, 75, 76, 77, 78, 79, 80, 80, 81, 82, 83, 83, 84, 85, 86,
    86, 87, 88, 88, 89, 90, 90, 91, 92, 92, 93, 94, 94, 95, 96, 96,
    97, 97, 98, 99, 99, 100, 100, 101, 101, 102, 103, 103, 104, 104, 105, 105,
    106, 106, 107, 107, 108, 108, 109, 109, 110, 110, 111, 111, 112, 112, 113, 113,
    114, 114, 115, 115, 116, 116, 116, 117, 117, 118, 118, 119, 119, 120, 120, 120,
    121, 121, 122, 122, 123, 123, 123, 124, 124, 125, 125, 125, 126, 126, 127, 127,
];

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CURVES: [VelocityCurve; 7] = [
        VelocityCurve::Linear,
        VelocityCurve::Convex,
        VelocityCurve::Concave,
        VelocityCurve::Sigmoid,
        VelocityCurve::Saturation,
        VelocityCurve::Balanced,
        VelocityCurve::BassBoost,
    ];

    fn thresholds() -> DelayThresholds {
        DelayThresholds::new(Duration::from_micros(2_000), Duration::from_micros(66_000))
    }

    #[test]
    fn fastest_delay_is_loudest() {
        let t = thresholds();
        for micros in [0, 1, 1_000, 2_000] {
            assert_eq!(
                127,
                u8::from(t.velocity(Duration::from_micros(micros))),
                "Expected left but got right"
            );
        }
    }

    #[test]
    fn slowest_delay_is_softest() {
        let t = thresholds();
        for micros in [66_000, 66_001, 100_000, 10_000_000] {
            assert_eq!(
                1,
                u8::from(t.velocity(Duration::from_micros(micros))),
                "Expected left but got right"
            );
        }
    }

    #[test]
    fn midpoint_delay() {
        // halfway through the window removes half the range: 127 - 32_000 * 127 / 64_000
        let t = thresholds();
        assert_eq!(
            64,
            u8::from(t.velocity(Duration::from_micros(34_000))),
            "Expected left but got right"
        );
    }

    #[test]
    fn velocity_never_increases_with_delay() {
        let t = thresholds();
        let mut previous = 127;
        for micros in (2_000..=66_000).step_by(250) {
            let velocity = u8::from(t.velocity(Duration::from_micros(micros)));
            assert!(velocity <= previous, "{} rose above {}", velocity, previous);
            previous = velocity;
        }
    }

    #[test]
    fn collapsed_window_is_softest_past_fastest() {
        let t = DelayThresholds::new(Duration::from_micros(5_000), Duration::from_micros(5_000));
        assert_eq!(127, u8::from(t.velocity(Duration::from_micros(5_000))));
        assert_eq!(1, u8::from(t.velocity(Duration::from_micros(5_001))));
    }

    #[test]
    fn linear_is_identity() {
        for v in 1..=127 {
            assert_eq!(
                v,
                u8::from(VelocityCurve::Linear.lookup(U7::from_u8_lossy(v))),
                "Expected left but got right"
            );
        }
    }

    #[test]
    fn curves_stay_in_range_and_never_decrease() {
        for curve in ALL_CURVES {
            let mut previous = 1;
            for v in 0..=127 {
                let shaped = u8::from(curve.lookup(U7::from_u8_lossy(v)));
                assert!((1..=127).contains(&shaped), "{:?} produced {}", curve, shaped);
                assert!(shaped >= previous, "{:?} decreased at {}", curve, v);
                previous = shaped;
            }
            assert_eq!(
                127,
                u8::from(curve.lookup(U7::from_u8_lossy(127))),
                "{:?} should reach full velocity",
                curve
            );
        }
    }

    #[test]
    fn unknown_curve_falls_back_to_linear() {
        assert_eq!(VelocityCurve::Linear, VelocityCurve::from_id(42));
        assert_eq!(VelocityCurve::Sigmoid, VelocityCurve::from_id(3));
    }

    #[test]
    fn curve_cycles() {
        assert_eq!(VelocityCurve::Convex, VelocityCurve::Linear.cycle());
        assert_eq!(VelocityCurve::Linear, VelocityCurve::BassBoost.cycle());
    }
}
