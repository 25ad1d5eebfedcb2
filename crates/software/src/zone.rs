//! Maps raw note numbers onto output notes, channels and ports, with up to [`MAX_ZONES`] keyboard splits.
//!
//! A preset with unlearned boundaries is in split-learn mode: played notes define the missing boundaries instead of
//! sounding.

use crate::output::Ports;
use tinyvec::ArrayVec;
use wmidi::{Channel, Note, U7};

/// Largest number of zones in a preset.
pub const MAX_ZONES: usize = 4;

/// One contiguous note range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Zone {
    /// Lowest raw note of the zone; `None` while the boundary awaits learning.
    pub start: Option<Note>,
    /// Semitones added to notes in this zone.
    pub transpose: i8,
    /// Channel notes in this zone are sent on.
    pub channel: Channel,
    /// Ports notes in this zone are sent to.
    pub ports: Ports,
}

impl Default for Zone {
    fn default() -> Self {
        Self {
            start: Some(Note::CMinus1),
            transpose: 0,
            channel: Channel::Ch1,
            ports: Ports::Usb1,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Zone {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "Zone {{ start: {}, transpose: {}, channel: {}, ports: {} }}",
            self.start.map(|n| n as u8),
            self.transpose,
            self.channel.number(),
            self.ports
        );
    }
}

impl Zone {
    /// Constructs a learned [`Zone`].
    pub fn new(start: Note, transpose: i8, channel: Channel, ports: Ports) -> Self {
        Self {
            start: Some(start),
            transpose,
            channel,
            ports,
        }
    }

    /// Applies the zone's transpose, clamped to the MIDI note range.
    pub fn transpose(&self, note: Note) -> Note {
        let shifted = (i16::from(note as u8) + i16::from(self.transpose)).clamp(0, 127);
        Note::from(U7::from_u8_lossy(shifted as u8))
    }
}

/// Where a played note goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Send `note` on `channel` to `ports`.
    Play {
        /// The transposed note.
        note: Note,
        /// Output channel.
        channel: Channel,
        /// Output ports.
        ports: Ports,
    },
    /// The preset is learning split points; the note is a calibration input and must not sound.
    Learn,
}

/// Receives notes consumed as zone boundaries during split-learn.
pub trait KeyLearned {
    /// Called once the boundary of `zone` has been set to `note`.
    fn key_learned(&mut self, zone: usize, note: Note);
}

impl<F: FnMut(usize, Note)> KeyLearned for F {
    fn key_learned(&mut self, zone: usize, note: Note) {
        self(zone, note)
    }
}

/// An ordered set of 1 to [`MAX_ZONES`] zones with strictly increasing boundaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZonePreset {
    zones: ArrayVec<[Zone; MAX_ZONES]>,
}

impl Default for ZonePreset {
    fn default() -> Self {
        Self::single(Channel::Ch1, Ports::Usb1)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ZonePreset {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "ZonePreset {}", self.zones.as_slice());
    }
}

impl ZonePreset {
    /// One zone covering the whole keyboard, untransposed.
    pub fn single(channel: Channel, ports: Ports) -> Self {
        let mut zones = ArrayVec::new();
        zones.push(Zone::new(Note::CMinus1, 0, channel, ports));
        Self { zones }
    }

    /// Builds a split preset, or `None` if the zone count is out of range or the boundaries aren't strictly increasing.
    pub fn split(zones: &[Zone]) -> Option<Self> {
        if zones.is_empty() || zones.len() > MAX_ZONES {
            warn!("A preset holds 1 to {} zones, not {}", MAX_ZONES, zones.len());
            return None;
        }
        let increasing = zones
            .windows(2)
            .all(|pair| matches!((pair[0].start, pair[1].start), (Some(low), Some(high)) if low < high));
        if zones[0].start.is_none() || !increasing {
            warn!("Zone boundaries must be learned and strictly increasing");
            return None;
        }

        let mut preset = ArrayVec::new();
        preset.extend_from_slice(zones);
        Some(Self { zones: preset })
    }

    /// Restores a preset from persisted zones without enforcing learned boundaries.
    pub(crate) fn from_zones(zones: ArrayVec<[Zone; MAX_ZONES]>) -> Option<Self> {
        if zones.is_empty() {
            None
        } else {
            Some(Self { zones })
        }
    }

    /// The zones, lowest first.
    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Determine if any boundary still awaits learning.
    pub fn is_learning(&self) -> bool {
        self.zones.iter().any(|zone| zone.start.is_none())
    }

    /// Routes a raw note to the zone whose start is the greatest one not above it.
    ///
    /// Notes below the first zone's start belong to the first zone.
    pub fn route(&self, note: Note) -> Route {
        if self.is_learning() {
            return Route::Learn;
        }
        let zone = self
            .zones
            .iter()
            .rev()
            .find(|zone| zone.start.is_some_and(|start| start <= note))
            .or_else(|| self.zones.first());

        match zone {
            Some(zone) => Route::Play {
                note: zone.transpose(note),
                channel: zone.channel,
                ports: zone.ports,
            },
            None => Route::Learn,
        }
    }

    /// Enters split-learn for `zone_count` zones.
    ///
    /// The first zone keeps starting at the bottom of the range; the boundaries of the others are cleared. Zones that
    /// didn't exist before get the next channel up and the first zone's ports.
    pub fn begin_learn(&mut self, zone_count: usize) -> bool {
        if !(1..=MAX_ZONES).contains(&zone_count) {
            warn!("Can't learn {} zones", zone_count);
            return false;
        }
        let first = self.zones.first().copied().unwrap_or_default();
        self.zones.truncate(zone_count);
        while self.zones.len() < zone_count {
            let index = self.zones.len() as u8;
            let channel = Channel::from_index(first.channel.index() + index).unwrap_or(first.channel);
            self.zones.push(Zone {
                start: None,
                transpose: 0,
                channel,
                ports: first.ports,
            });
        }
        for (index, zone) in self.zones.iter_mut().enumerate() {
            zone.start = if index == 0 { Some(Note::CMinus1) } else { None };
        }
        info!("Learning {} zone boundaries", zone_count - 1);
        true
    }

    /// Consumes a played note as the next missing boundary, returning the zone it was assigned to.
    ///
    /// A note not above the previous boundary is rejected and the zone stays unlearned.
    pub fn learn(&mut self, note: Note) -> Option<usize> {
        let index = self.zones.iter().position(|zone| zone.start.is_none())?;
        let previous = index.checked_sub(1).and_then(|i| self.zones[i].start);
        if previous.is_some_and(|previous| note <= previous) {
            warn!("Boundary {} must lie above {}", note as u8, previous.map(|n| n as u8));
            return None;
        }
        self.zones[index].start = Some(note);
        debug!("Zone {} starts at {}", index, note as u8);
        Some(index)
    }
}
