//! Turns raw readings of the key matrix into debounced, velocity-measured key events.
//!
//! The scanner drives one row at a time and hands each 16-bit column reading to [`Scanner::scan_row`]. In two-contact
//! mode rows come in pairs: the even row of a pair reads the break contacts and the odd row the make contacts of the
//! same sixteen keys. Only columns that changed since that row's previous reading are fed to the per-key state
//! machines.

mod key_switch;
pub use key_switch::*;

use crate::configuration::{KeyboardConfig, MATRIX_COLUMNS, MAX_KEYS, MAX_ROWS};
use embassy_time::Instant;
use wmidi::{Note, U7};

const SILENT: U7 = U7::from_u8_lossy(0);

/// A debounced key transition, with the raw (uncurved) velocity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyEvent {
    /// A key went down.
    Pressed {
        /// Linear key index within the matrix.
        key: usize,
        /// Raw note, before any zone transpose.
        note: Note,
        /// Strike velocity.
        velocity: U7,
    },
    /// A key came up.
    Released {
        /// Linear key index within the matrix.
        key: usize,
        /// Raw note, before any zone transpose.
        note: Note,
        /// Release velocity; 0 unless release velocity is measured.
        velocity: U7,
    },
}

#[cfg(feature = "defmt")]
impl defmt::Format for KeyEvent {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::Pressed { key, note, velocity } => {
                defmt::write!(fmt, "Pressed({}, {}, {})", key, note.to_str(), u8::from(*velocity))
            }
            Self::Released { key, note, velocity } => {
                defmt::write!(fmt, "Released({}, {}, {})", key, note.to_str(), u8::from(*velocity))
            }
        }
    }
}

/// Debounce state for the whole matrix.
#[derive(Clone, Debug)]
pub struct Scanner {
    /// Previous reading of each row, with bits set for actuated contacts.
    rows: [u16; MAX_ROWS],
    keys: [KeySwitch; MAX_KEYS],
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    /// Constructs a [`Scanner`] with every key released.
    pub const fn new() -> Self {
        Self {
            rows: [0; MAX_ROWS],
            keys: [KeySwitch::new(); MAX_KEYS],
        }
    }

    /// Processes one reading of a row's sixteen column inputs, taken at `now`.
    pub fn scan_row(
        &mut self,
        config: &KeyboardConfig,
        row: usize,
        columns: u16,
        now: Instant,
        mut emit: impl FnMut(KeyEvent),
    ) {
        if row >= usize::from(config.num_rows) || row >= MAX_ROWS {
            warn!("Row {} is outside the matrix", row);
            return;
        }

        let actuated = if config.invert_inputs { columns } else { !columns };
        let changed = actuated ^ self.rows[row];
        self.rows[row] = actuated;
        if changed == 0 {
            return;
        }

        for column in (0..MATRIX_COLUMNS).filter(|c| changed & (1 << c) != 0) {
            let closed = actuated & (1 << column) != 0;
            if config.single_contact {
                self.notify_key_change(config, row * MATRIX_COLUMNS + column, closed, now, &mut emit);
            } else {
                let key = row / 2 * MATRIX_COLUMNS + column;
                let contact = if row % 2 == 0 { Contact::Break } else { Contact::Make };
                self.notify_contact(config, key, contact, closed, now, &mut emit);
            }
        }
    }

    /// Feeds the state of a key with a single switch, such as a pedal. Presses sound at the fixed velocity.
    pub fn notify_key_change(
        &mut self,
        config: &KeyboardConfig,
        key: usize,
        pressed: bool,
        _now: Instant,
        emit: impl FnMut(KeyEvent),
    ) {
        let Some(switch) = self.keys.get_mut(key) else {
            warn!("Key {} is out of range", key);
            return;
        };
        if let Some(transition) = switch.switch(pressed) {
            Self::resolve(config, key, transition, emit);
        }
    }

    /// Feeds an edge of one contact of a velocity-sensing key.
    pub fn notify_contact(
        &mut self,
        config: &KeyboardConfig,
        key: usize,
        contact: Contact,
        actuated: bool,
        now: Instant,
        emit: impl FnMut(KeyEvent),
    ) {
        let Some(switch) = self.keys.get_mut(key) else {
            warn!("Key {} is out of range", key);
            return;
        };
        match switch.contact(contact, actuated, now) {
            Some(transition) => Self::resolve(config, key, transition, emit),
            None => trace!("Key {} {} edge {} absorbed", key, contact, actuated),
        }
    }

    /// Releases every sounding key, emitting its Note Off, and drops pending edges.
    ///
    /// Row readings are kept, so keys held through a reset don't retrigger until they're played again.
    pub fn reset(&mut self, config: &KeyboardConfig, mut emit: impl FnMut(KeyEvent)) {
        for (key, switch) in self.keys.iter_mut().enumerate() {
            if switch.reset() {
                if let Some(note) = config.note_for_key(key) {
                    emit(KeyEvent::Released {
                        key,
                        note,
                        velocity: SILENT,
                    });
                }
            }
        }
    }

    /// Determine if a key's note is on.
    pub fn is_sounding(&self, key: usize) -> bool {
        self.keys.get(key).is_some_and(KeySwitch::is_sounding)
    }

    fn resolve(config: &KeyboardConfig, key: usize, transition: Transition, mut emit: impl FnMut(KeyEvent)) {
        // keys past the configured range or the MIDI note range have no note
        let Some(note) = config.note_for_key(key) else {
            return;
        };
        let event = match transition {
            Transition::Press(delay) => KeyEvent::Pressed {
                key,
                note,
                velocity: match delay {
                    Some(delay) => config.press_thresholds(note).velocity(delay),
                    None => config.fixed_velocity(),
                },
            },
            Transition::Release(delay) => KeyEvent::Released {
                key,
                note,
                velocity: match delay {
                    Some(delay) if config.release_velocity => config.release_thresholds().velocity(delay),
                    _ => SILENT,
                },
            },
        };
        debug!("{}", event);
        emit(event);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use embassy_time::Duration;
    use std::{vec, vec::Vec};

    fn at(micros: u64) -> Instant {
        Instant::from_micros(micros)
    }

    /// Column reading with the given columns pulled low.
    fn low(columns: &[usize]) -> u16 {
        !columns.iter().fold(0u16, |bits, c| bits | 1 << c)
    }

    fn collect(scanner: &mut Scanner, config: &KeyboardConfig, row: usize, columns: u16, now: Instant) -> Vec<KeyEvent> {
        let mut events = Vec::new();
        scanner.scan_row(config, row, columns, now, |e| events.push(e));
        events
    }

    #[test]
    fn fastest_press_is_full_velocity() {
        let config = KeyboardConfig::default();
        let mut scanner = Scanner::new();

        assert!(collect(&mut scanner, &config, 0, low(&[3]), at(0)).is_empty());
        let events = collect(&mut scanner, &config, 1, low(&[3]), at(1_000));
        assert_eq!(
            vec![KeyEvent::Pressed {
                key: 3,
                note: Note::Eb2,
                velocity: U7::from_u8_lossy(127)
            }],
            events,
            "Expected left but got right"
        );
        assert!(scanner.is_sounding(3));
    }

    #[test]
    fn slowest_press_is_minimum_velocity() {
        let config = KeyboardConfig::default();
        let mut scanner = Scanner::new();

        collect(&mut scanner, &config, 2, low(&[0]), at(0));
        let events = collect(&mut scanner, &config, 3, low(&[0]), at(500_000));
        assert_eq!(
            vec![KeyEvent::Pressed {
                key: 16,
                note: Note::E3,
                velocity: U7::from_u8_lossy(1)
            }],
            events,
            "Expected left but got right"
        );
    }

    #[test]
    fn release_velocity() {
        let config = KeyboardConfig {
            release_velocity: true,
            ..KeyboardConfig::default()
        };
        let mut scanner = Scanner::new();
        collect(&mut scanner, &config, 0, low(&[0]), at(0));
        collect(&mut scanner, &config, 1, low(&[0]), at(2_000));

        assert!(collect(&mut scanner, &config, 1, low(&[]), at(10_000)).is_empty());
        let events = collect(&mut scanner, &config, 0, low(&[]), at(12_000));
        assert_eq!(
            vec![KeyEvent::Released {
                key: 0,
                note: Note::C2,
                velocity: U7::from_u8_lossy(127)
            }],
            events,
            "Expected left but got right"
        );
    }

    #[test]
    fn release_without_tracking_is_silent() {
        let config = KeyboardConfig::default();
        let mut scanner = Scanner::new();
        collect(&mut scanner, &config, 0, low(&[0]), at(0));
        collect(&mut scanner, &config, 1, low(&[0]), at(2_000));
        collect(&mut scanner, &config, 1, low(&[]), at(10_000));
        let events = collect(&mut scanner, &config, 0, low(&[]), at(12_000));
        assert_eq!(
            vec![KeyEvent::Released {
                key: 0,
                note: Note::C2,
                velocity: SILENT
            }],
            events
        );
    }

    #[test]
    fn black_keys_use_their_own_threshold() {
        let config = KeyboardConfig {
            delay_fastest_black_keys: Duration::from_micros(1_000),
            ..KeyboardConfig::default()
        };
        let mut scanner = Scanner::new();
        // keys 0 (C) and 1 (Db) struck equally fast, just beyond the black key threshold
        collect(&mut scanner, &config, 0, low(&[0, 1]), at(0));
        let events = collect(&mut scanner, &config, 1, low(&[0, 1]), at(2_000));
        let velocities: Vec<u8> = events
            .iter()
            .map(|e| match e {
                KeyEvent::Pressed { velocity, .. } => u8::from(*velocity),
                KeyEvent::Released { .. } => 0,
            })
            .collect();
        assert_eq!(127, velocities[0], "White key at its fastest");
        assert!(velocities[1] < 127, "Black key slower than its threshold");
    }

    #[test]
    fn inverted_inputs() {
        let config = KeyboardConfig {
            invert_inputs: true,
            ..KeyboardConfig::default()
        };
        let mut scanner = Scanner::new();
        collect(&mut scanner, &config, 0, 1 << 5, at(0));
        let events = collect(&mut scanner, &config, 1, 1 << 5, at(1_000));
        assert!(matches!(events[..], [KeyEvent::Pressed { key: 5, .. }]));
    }

    #[test]
    fn single_contact_rows() {
        let config = KeyboardConfig::pedalboard();
        let mut scanner = Scanner::new();
        let events = collect(&mut scanner, &config, 1, low(&[2]), at(0));
        assert_eq!(
            vec![KeyEvent::Pressed {
                key: 18,
                note: Note::Gb3,
                velocity: U7::from_u8_lossy(127)
            }],
            events,
            "Expected left but got right"
        );
        let events = collect(&mut scanner, &config, 1, low(&[]), at(100));
        assert!(matches!(events[..], [KeyEvent::Released { key: 18, .. }]));
    }

    #[test]
    fn unchanged_rows_emit_nothing() {
        let config = KeyboardConfig::pedalboard();
        let mut scanner = Scanner::new();
        collect(&mut scanner, &config, 0, low(&[4]), at(0));
        assert!(collect(&mut scanner, &config, 0, low(&[4]), at(1_000)).is_empty());
    }

    #[test]
    fn out_of_range_is_ignored() {
        let config = KeyboardConfig::default();
        let mut scanner = Scanner::new();
        assert!(collect(&mut scanner, &config, 8, low(&[0]), at(0)).is_empty());

        let mut events = Vec::new();
        scanner.notify_key_change(&config, MAX_KEYS, true, at(0), |e| events.push(e));
        // beyond the configured 64 keys, so no note
        scanner.notify_key_change(&config, 100, true, at(0), |e| events.push(e));
        assert!(events.is_empty());
    }

    #[test]
    fn reset_releases_sounding_keys() {
        let config = KeyboardConfig::pedalboard();
        let mut scanner = Scanner::new();
        collect(&mut scanner, &config, 0, low(&[0, 7]), at(0));

        let mut events = Vec::new();
        scanner.reset(&config, |e| events.push(e));
        assert_eq!(2, events.len());
        assert!(events.iter().all(|e| matches!(e, KeyEvent::Released { .. })));
        assert!(!scanner.is_sounding(0));
        assert!(collect(&mut scanner, &config, 0, low(&[0, 7]), at(100)).is_empty(), "Held keys don't retrigger");
    }
}
