use crate::velocity::{DelayThresholds, VelocityCurve};
use embassy_time::Duration;
use wmidi::{Note, U7};

/// Number of column inputs read per matrix row.
pub const MATRIX_COLUMNS: usize = 16;

/// Largest number of matrix rows the scanner drives.
pub const MAX_ROWS: usize = 16;

/// Largest number of keys the scanner tracks.
pub const MAX_KEYS: usize = 128;

/// Configuration of the physical key matrix and of how key travel becomes velocity.
///
/// In two-contact mode, rows come in pairs: the even row of each pair reads the break contacts and the odd row the
/// make contacts of the same sixteen keys. In single-contact mode every row carries sixteen keys of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyboardConfig {
    /// Rows driven by the scanner. Must be even in two-contact mode.
    pub num_rows: u8,
    /// Inputs read high when a contact is closed (the default is active-low).
    pub invert_inputs: bool,
    /// One switch per key (pedals, organ keyboards): no velocity measurement.
    pub single_contact: bool,
    /// Velocity of every note in single-contact mode.
    pub fixed_velocity: u8,
    /// Note played by key 0.
    pub note_offset: u8,
    /// Measure the make-to-break delay on release and send it as Note Off velocity.
    pub release_velocity: bool,
    /// Break-to-make delays at or below this are full velocity.
    pub delay_fastest: Duration,
    /// Replaces `delay_fastest` for black keys, whose shorter travel reads faster; zero means no distinction.
    pub delay_fastest_black_keys: Duration,
    /// Break-to-make delays at or above this are minimum velocity.
    pub delay_slowest: Duration,
    /// Release counterpart of `delay_fastest`.
    pub delay_fastest_release: Duration,
    /// Release counterpart of `delay_slowest`.
    pub delay_slowest_release: Duration,
    /// Response curve applied to measured velocities.
    pub curve: VelocityCurve,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            num_rows: 8,
            invert_inputs: false,
            single_contact: false,
            fixed_velocity: 100,
            note_offset: 36,
            release_velocity: false,
            delay_fastest: Duration::from_micros(2_000),
            delay_fastest_black_keys: Duration::from_micros(0),
            delay_slowest: Duration::from_micros(66_000),
            delay_fastest_release: Duration::from_micros(3_000),
            delay_slowest_release: Duration::from_micros(80_000),
            curve: VelocityCurve::Linear,
        }
    }
}

impl KeyboardConfig {
    /// A 32-note pedalboard: two rows of single-contact switches starting at C2.
    pub fn pedalboard() -> Self {
        Self {
            num_rows: 2,
            single_contact: true,
            fixed_velocity: 127,
            note_offset: 36,
            curve: VelocityCurve::Linear,
            ..Self::default()
        }
    }

    /// Number of keys the configured matrix carries.
    pub fn key_count(&self) -> usize {
        let rows = usize::from(self.num_rows).min(MAX_ROWS);
        let keyed_rows = if self.single_contact { rows } else { rows / 2 };
        (keyed_rows * MATRIX_COLUMNS).min(MAX_KEYS)
    }

    /// The note a key plays, or `None` if the key lies beyond the matrix or the MIDI range.
    pub fn note_for_key(&self, key: usize) -> Option<Note> {
        if key >= self.key_count() {
            return None;
        }
        let note = usize::from(self.note_offset) + key;
        u8::try_from(note)
            .ok()
            .filter(|&n| n <= 127)
            .map(|n| Note::from(U7::from_u8_lossy(n)))
    }

    /// Thresholds for press velocity, which differ for black keys when configured.
    pub fn press_thresholds(&self, note: Note) -> DelayThresholds {
        let fastest = if is_black(note) && self.delay_fastest_black_keys.as_micros() != 0 {
            self.delay_fastest_black_keys
        } else {
            self.delay_fastest
        };
        DelayThresholds::new(fastest, self.delay_slowest)
    }

    /// Thresholds for release velocity.
    pub fn release_thresholds(&self) -> DelayThresholds {
        DelayThresholds::new(self.delay_fastest_release, self.delay_slowest_release)
    }

    /// Velocity sent by single-contact keys.
    pub fn fixed_velocity(&self) -> U7 {
        U7::from_u8_lossy(self.fixed_velocity.clamp(1, 127))
    }
}

/// Determine if a note falls on a black key.
pub fn is_black(note: Note) -> bool {
    matches!(note as u8 % 12, 1 | 3 | 6 | 8 | 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_count() {
        assert_eq!(64, KeyboardConfig::default().key_count(), "Four row pairs of sixteen keys");
        assert_eq!(32, KeyboardConfig::pedalboard().key_count(), "Two rows of sixteen pedals");
    }

    #[test]
    fn note_for_key() {
        let config = KeyboardConfig::default();
        assert_eq!(Some(Note::C2), config.note_for_key(0));
        assert_eq!(Some(Note::C4), config.note_for_key(24));
        assert_eq!(None, config.note_for_key(64), "Key beyond the matrix");
    }

    #[test]
    fn note_for_key_past_midi_range() {
        let config = KeyboardConfig {
            note_offset: 100,
            ..KeyboardConfig::default()
        };
        assert_eq!(Some(Note::G9), config.note_for_key(27));
        assert_eq!(None, config.note_for_key(28));
    }

    #[test]
    fn black_keys() {
        assert!(is_black(Note::Db4));
        assert!(is_black(Note::Bb2));
        assert!(!is_black(Note::C4));
        assert!(!is_black(Note::E4));
    }

    #[test]
    fn black_key_thresholds() {
        let mut config = KeyboardConfig::default();
        assert_eq!(config.delay_fastest, config.press_thresholds(Note::Db4).fastest);

        config.delay_fastest_black_keys = Duration::from_micros(1_500);
        assert_eq!(Duration::from_micros(1_500), config.press_thresholds(Note::Db4).fastest);
        assert_eq!(config.delay_fastest, config.press_thresholds(Note::D4).fastest);
    }
}
