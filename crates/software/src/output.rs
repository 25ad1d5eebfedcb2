//! MIDI output primitives: the set of physical/virtual ports a message may be sent to, and the trait through which
//! the engine hands messages to whatever transmits them.

mod queue;
pub use queue::*;

use bitmask_enum::bitmask;
use wmidi::MidiMessage;

/// A set of MIDI output ports.
#[bitmask(u16)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ports {
    /// USB cable 1.
    Usb1,
    /// USB cable 2.
    Usb2,
    /// USB cable 3.
    Usb3,
    /// USB cable 4.
    Usb4,
    /// Serial MIDI out 1.
    Uart1,
    /// Serial MIDI out 2.
    Uart2,
    /// Serial MIDI out 3.
    Uart3,
    /// Serial MIDI out 4.
    Uart4,
    /// I²C MIDI expansion 1.
    Iic1,
    /// I²C MIDI expansion 2.
    Iic2,
    /// I²C MIDI expansion 3.
    Iic3,
    /// I²C MIDI expansion 4.
    Iic4,
    /// OSC target 1.
    Osc1,
    /// OSC target 2.
    Osc2,
    /// OSC target 3.
    Osc3,
    /// OSC target 4.
    Osc4,
}

/// Every single port, in bit order.
const EACH_PORT: [Ports; 16] = [
    Ports::Usb1,
    Ports::Usb2,
    Ports::Usb3,
    Ports::Usb4,
    Ports::Uart1,
    Ports::Uart2,
    Ports::Uart3,
    Ports::Uart4,
    Ports::Iic1,
    Ports::Iic2,
    Ports::Iic3,
    Ports::Iic4,
    Ports::Osc1,
    Ports::Osc2,
    Ports::Osc3,
    Ports::Osc4,
];

impl Ports {
    /// Returns an [`Iterator`] over the individual ports enabled in this set, lowest bit first.
    pub fn enabled(self) -> impl Iterator<Item = Ports> {
        EACH_PORT.into_iter().filter(move |&port| self.contains(port))
    }

    /// Zero-based index of a single port (e.g. the USB cable number); `None` for empty or multi-port sets.
    pub fn index(self) -> Option<u8> {
        let mut enabled = self.enabled();
        match (enabled.next(), enabled.next()) {
            (Some(port), None) => EACH_PORT.iter().position(|&p| p == port).map(|i| i as u8),
            _ => None,
        }
    }

    /// Encodes the set as a little-endian bit field for persistence.
    pub fn to_raw(self) -> u16 {
        EACH_PORT
            .iter()
            .enumerate()
            .filter(|&(_, &port)| self.contains(port))
            .fold(0, |raw, (bit, _)| raw | 1 << bit)
    }

    /// Decodes a bit field produced by [`Ports::to_raw`].
    pub fn from_raw(raw: u16) -> Self {
        EACH_PORT
            .iter()
            .enumerate()
            .filter(|&(bit, _)| raw & (1 << bit) != 0)
            .fold(Ports::none(), |ports, (_, &port)| ports | port)
    }
}

/// Anything capable of transmitting MIDI messages, e.g. a USB-MIDI class or a UART.
///
/// Transmission is fire-and-forget: there is no acknowledgement and no backpressure.
pub trait MidiOutput {
    /// Sends one message to one port.
    fn send(&mut self, port: Ports, message: MidiMessage<'static>);

    /// Sends one message to every port in the set.
    fn send_to(&mut self, ports: Ports, message: MidiMessage<'static>) {
        for port in ports.enabled() {
            self.send(port, message.clone());
        }
    }
}
