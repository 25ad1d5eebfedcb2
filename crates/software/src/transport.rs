//! Interprets incoming USB-MIDI data as transport control: Timing Clock pulses and Start, Stop, Continue and Song
//! Position Pointer requests.
//!
//! Requests are accumulated as a bitmask and taken by whichever task drives the clock.

use bitmask_enum::bitmask;
use wmidi::MidiMessage;

/// Transport requests received since they were last taken.
#[bitmask(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportRequest {
    /// Restart from the beginning.
    Start,
    /// Halt, silencing anything still sounding.
    Stop,
    /// Resume from the current position.
    Continue,
    /// Jump to [`Transport::song_position`].
    SongPosition,
}

/// Transport state derived from received MIDI.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transport {
    pending: TransportRequest,
    clock_pulses: u32,
    song_position: u16,
    running: bool,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            pending: TransportRequest::none(),
            clock_pulses: 0,
            song_position: 0,
            running: true,
        }
    }
}

impl Transport {
    /// Updates the transport given a slice of data. Returns the requests found in it.
    ///
    /// Data may contain one or more USB-MIDI Event Packets.
    pub fn update(&mut self, data: &[u8]) -> TransportRequest {
        let mut received = TransportRequest::none();
        data.chunks(4)
            .filter_map(|potential_packet| {
                if potential_packet.len() != 4 {
                    error!("USB-MIDI Event Packets must always be 32 bits long");
                    None
                } else {
                    // the Packet Header is not of interest; the remaining three bytes contain the actual MIDI event
                    MidiMessage::from_bytes(&potential_packet[1..]).ok()
                }
            })
            .for_each(|msg| match msg {
                MidiMessage::TimingClock => {
                    self.clock_pulses = self.clock_pulses.saturating_add(1);
                }
                MidiMessage::Start => {
                    received |= TransportRequest::Start;
                    self.running = true;
                    info!("Received Start");
                }
                MidiMessage::Stop => {
                    received |= TransportRequest::Stop;
                    self.running = false;
                    info!("Received Stop");
                }
                MidiMessage::Continue => {
                    received |= TransportRequest::Continue;
                    self.running = true;
                    info!("Received Continue");
                }
                MidiMessage::SongPositionPointer(position) => {
                    received |= TransportRequest::SongPosition;
                    self.song_position = u16::from(position);
                    info!("Received Song Position Pointer: {}", self.song_position);
                }
                _ => {
                    trace!("Ignoring MIDI message that isn't transport control");
                }
            });
        self.pending |= received;
        received
    }

    /// Returns and clears the pending requests.
    pub fn take_pending(&mut self) -> TransportRequest {
        core::mem::replace(&mut self.pending, TransportRequest::none())
    }

    /// Returns and clears the number of Timing Clock pulses received.
    pub fn take_clock_pulses(&mut self) -> u32 {
        core::mem::take(&mut self.clock_pulses)
    }

    /// Most recent Song Position Pointer, in sixteenth notes.
    pub fn song_position(&self) -> u16 {
        self.song_position
    }

    /// Determine if the transport is running (it is until a Stop arrives).
    pub fn is_running(&self) -> bool {
        self.running
    }
}
