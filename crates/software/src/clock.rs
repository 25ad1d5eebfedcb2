//! The musical tick counter, advanced either by an internal timer or by incoming MIDI Timing Clock.

use crate::configuration::{ArpSettings, ClockMode, MAX_PPQN};
use core::ops::Range;
use embassy_time::Duration;

/// Resolution of MIDI Timing Clock.
pub const MIDI_CLOCK_PPQN: u16 = 24;

/// Counts ticks at `ppqn` (1 to [`MAX_PPQN`]) per quarter note.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Clock {
    mode: ClockMode,
    bpm: u16,
    ppqn: u16,
    tick: u32,
    /// Fraction of a tick carried between Timing Clock pulses when `ppqn` isn't a multiple of 24.
    carry: u16,
}

impl Clock {
    /// Constructs a [`Clock`] at tick 0.
    pub fn new(mode: ClockMode, bpm: u16, ppqn: u16) -> Self {
        Self {
            mode,
            bpm: bpm.max(1),
            ppqn: ppqn.clamp(1, MAX_PPQN),
            tick: 0,
            carry: 0,
        }
    }

    /// Constructs a [`Clock`] following the arpeggiator's clock settings.
    pub fn from_settings(settings: &ArpSettings) -> Self {
        Self::new(settings.clock_mode, settings.bpm, settings.ppqn)
    }

    /// Getter.
    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    /// Getter.
    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    /// Getter.
    pub fn ppqn(&self) -> u16 {
        self.ppqn
    }

    /// The next tick to be produced.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Switches between internal and external timing.
    pub fn set_mode(&mut self, mode: ClockMode) {
        self.mode = mode;
        self.carry = 0;
    }

    /// Changes the tempo used in master mode.
    pub fn set_bpm(&mut self, bpm: u16) {
        self.bpm = bpm.max(1);
    }

    /// Changes the resolution.
    pub fn set_ppqn(&mut self, ppqn: u16) {
        self.ppqn = ppqn.clamp(1, MAX_PPQN);
        self.carry = 0;
    }

    /// Time between ticks in master mode.
    pub fn tick_period(&self) -> Duration {
        let ticks_per_minute = u64::from(self.bpm) * u64::from(self.ppqn);
        Duration::from_micros((60_000_000 / ticks_per_minute).max(1))
    }

    /// Produces the next tick in master mode.
    pub fn next_tick(&mut self) -> u32 {
        let tick = self.tick;
        self.tick = self.tick.wrapping_add(1);
        tick
    }

    /// Accounts for one incoming Timing Clock pulse, returning the ticks it covers. Empty in master mode.
    pub fn pulse(&mut self) -> Range<u32> {
        if self.mode == ClockMode::Master {
            return self.tick..self.tick;
        }
        let total = u32::from(self.ppqn) + u32::from(self.carry);
        let ticks = total / u32::from(MIDI_CLOCK_PPQN);
        self.carry = (total % u32::from(MIDI_CLOCK_PPQN)) as u16;

        let start = self.tick;
        self.tick = self.tick.wrapping_add(ticks);
        start..self.tick
    }

    /// Moves to a Song Position Pointer, given in sixteenth notes.
    pub fn song_position(&mut self, sixteenths: u16) {
        self.tick = u32::from(sixteenths) * u32::from(self.ppqn) / 4;
        self.carry = 0;
    }

    /// Returns to tick 0.
    pub fn reset(&mut self) {
        self.tick = 0;
        self.carry = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_period() {
        let clock = Clock::new(ClockMode::Master, 120, 96);
        assert_eq!(Duration::from_micros(5_208), clock.tick_period(), "Expected left but got right");
        let clock = Clock::new(ClockMode::Master, 0, 0);
        assert_eq!(Duration::from_micros(60_000_000), clock.tick_period(), "Zeroes are raised to 1");
    }

    #[test]
    fn master_ticks() {
        let mut clock = Clock::new(ClockMode::Master, 120, 96);
        assert_eq!(0, clock.next_tick());
        assert_eq!(1, clock.next_tick());
        assert!(clock.pulse().is_empty(), "Timing Clock is ignored in master mode");
    }

    #[test]
    fn slave_pulses() {
        let mut clock = Clock::new(ClockMode::Slave, 120, 96);
        assert_eq!(0..4, clock.pulse());
        assert_eq!(4..8, clock.pulse());
    }

    #[test]
    fn slave_pulses_carry_fractions() {
        let mut clock = Clock::new(ClockMode::Slave, 120, 36);
        assert_eq!(0..1, clock.pulse());
        assert_eq!(1..3, clock.pulse());
        assert_eq!(3..4, clock.pulse());
        assert_eq!(4..6, clock.pulse());
    }

    #[test]
    fn resolution_is_bounded() {
        let mut clock = Clock::new(ClockMode::Slave, 120, u16::MAX);
        assert_eq!(MAX_PPQN, clock.ppqn(), "Expected left but got right");
        assert_eq!(0..40, clock.pulse());
        assert_eq!(40..80, clock.pulse());

        clock.set_ppqn(u16::MAX);
        assert_eq!(MAX_PPQN, clock.ppqn());
        clock.set_ppqn(0);
        assert_eq!(1, clock.ppqn());
    }

    #[test]
    fn song_position() {
        let mut clock = Clock::new(ClockMode::Slave, 120, 96);
        clock.song_position(5);
        assert_eq!(120, clock.tick(), "Five sixteenths at 24 ticks each");
        clock.reset();
        assert_eq!(0, clock.tick());
    }
}
