//! Hands outgoing MIDI to the USB task as USB-MIDI event packets.

use defmt::*;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use organum_lib::output::{MidiOutput, Ports};
use wmidi::MidiMessage;

/// Number of packets which may wait for the USB endpoint before further messages are dropped.
const QUEUE_DEPTH: usize = 64;

/// Packets waiting to be written to the USB-MIDI IN endpoint.
pub type PacketQueue = Channel<CriticalSectionRawMutex, [u8; 4], QUEUE_DEPTH>;

/// Outgoing USB-MIDI packets.
pub static PACKETS: PacketQueue = Channel::new();

/// [`MidiOutput`] which encodes messages for the USB cables. The board has no serial, I²C or OSC outputs, so messages
/// sent to those ports are dropped.
pub struct UsbMidiOutput;

impl MidiOutput for UsbMidiOutput {
    fn send(&mut self, port: Ports, message: MidiMessage<'static>) {
        let Some(cable) = port.index().filter(|&cable| cable < 4) else {
            trace!("No output on this board for {}", port);
            return;
        };

        let Some(packet) = encode(cable, &message) else {
            warn!("Can't encode MIDI message as a single USB-MIDI packet");
            return;
        };

        if PACKETS.try_send(packet).is_err() {
            warn!("USB-MIDI output queue is full, dropping message");
        }
    }
}

/// Builds the USB-MIDI event packet of a channel voice message: cable number and code index number, then the MIDI bytes.
fn encode(cable: u8, message: &MidiMessage<'_>) -> Option<[u8; 4]> {
    let mut bytes = [0; 3];
    message.copy_to_slice(&mut bytes).ok()?;
    let code_index = bytes[0] >> 4;
    Some([cable << 4 | code_index, bytes[0], bytes[1], bytes[2]])
}
