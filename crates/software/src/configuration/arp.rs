use crate::chord::{ChordExtension, Scale};
use num_derive::{FromPrimitive, ToPrimitive};
use wmidi::Channel;

/// Determines what the arpeggiator does with incoming notes.
#[derive(Debug, Default, Clone, Copy, ToPrimitive, FromPrimitive, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArpMode {
    /// Notes pass straight through.
    #[default]
    Off,
    /// A single key selects a chord root; the chord of that scale degree is arpeggiated.
    OneKeyChordArp,
    /// A single key sounds the chord of its scale degree, held for as long as the key is.
    ChordPad,
    /// Every held key is arpeggiated as played.
    MultiKey,
}
impl super::CycleConfig for ArpMode {}

impl ArpMode {
    /// Abbreviation suitable for a character display.
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::OneKeyChordArp => "1Key",
            Self::ChordPad => "Pad",
            Self::MultiKey => "Multi",
        }
    }
}

/// Where musical time comes from.
#[derive(Debug, Default, Clone, Copy, ToPrimitive, FromPrimitive, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockMode {
    /// Ticks are generated internally from the BPM setting.
    #[default]
    Master,
    /// Ticks follow incoming MIDI Timing Clock.
    Slave,
}
impl super::CycleConfig for ClockMode {}

/// Highest supported clock resolution.
pub const MAX_PPQN: u16 = 960;

/// Persisted arpeggiator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpSettings {
    /// Master switch, independent of the mode so that toggling it restores the previous mode.
    pub enabled: bool,
    /// What happens to incoming notes.
    pub mode: ArpMode,
    /// Index into the built-in pattern table.
    pub pattern: u8,
    /// Pitch class (0 = C) the mode scale is rooted on.
    pub root_key: u8,
    /// Mode used to harmonize chord roots and to resolve scale-step offsets.
    pub scale: Scale,
    /// Triads or sevenths.
    pub extension: ChordExtension,
    /// Internal or external clock.
    pub clock_mode: ClockMode,
    /// Tempo in master mode.
    pub bpm: u16,
    /// Ticks per quarter note.
    pub ppqn: u16,
    /// Channel arpeggiated notes are sent on; `None` follows the zone the note falls in.
    pub channel: Option<Channel>,
}

impl Default for ArpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: ArpMode::OneKeyChordArp,
            pattern: 0,
            root_key: 0,
            scale: Scale::Ionian,
            extension: ChordExtension::Triad,
            clock_mode: ClockMode::Master,
            bpm: 120,
            ppqn: 96,
            channel: None,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ArpSettings {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "ArpSettings {{ enabled: {}, mode: {}, pattern: {}, root_key: {}, scale: {}, extension: {}, clock_mode: {}, bpm: {}, ppqn: {}, channel: {} }}",
            self.enabled,
            self.mode,
            self.pattern,
            self.root_key,
            self.scale,
            self.extension,
            self.clock_mode,
            self.bpm,
            self.ppqn,
            self.channel.map(|c| c.number())
        );
    }
}

impl ArpSettings {
    /// Determine if incoming notes go to the arpeggiator.
    pub fn is_active(&self) -> bool {
        self.enabled && self.mode != ArpMode::Off
    }
}
