//! A fixed-capacity queue of note events scheduled against the musical tick counter.
//!
//! Scheduling a note enqueues its Note On and the matching Note Off `length` ticks later. The queue is drained on
//! every tick, and can be flushed at any moment, sending every pending Note Off immediately so that no note is left
//! sounding.

use super::{MidiOutput, Ports};
use tinyvec::{ArrayVec, array_vec};
use wmidi::{Channel, MidiMessage, Note, U7};

/// Default number of events the queue holds. Each scheduled note occupies two.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

const SILENT: U7 = U7::from_u8_lossy(0);

/// Everything needed to voice one note.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteEvent {
    /// Where the note is sent.
    pub ports: Ports,
    /// MIDI channel.
    pub channel: Channel,
    /// The note itself.
    pub note: Note,
    /// Strike velocity; note-offs are always sent with velocity 0.
    pub velocity: U7,
}

#[cfg(feature = "defmt")]
impl defmt::Format for NoteEvent {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "NoteEvent {{ ports: {}, channel: {}, note: {}, velocity: {} }}",
            self.ports,
            self.channel.number(),
            self.note.to_str(),
            u8::from(self.velocity)
        );
    }
}

/// Reasons scheduling can fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScheduleError {
    /// There isn't room for both the Note On and its Note Off; neither was queued.
    QueueFull,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Kind {
    // declared first so that, at equal due ticks, offs are sent before ons and a retriggered note isn't cut short
    NoteOff,
    NoteOn,
}

#[derive(Clone, Copy, Debug)]
struct Pending {
    due: u32,
    kind: Kind,
    ports: Ports,
    channel: Channel,
    note: U7,
    velocity: U7,
}

impl Default for Pending {
    fn default() -> Self {
        Self {
            due: 0,
            kind: Kind::NoteOff,
            ports: Ports::none(),
            channel: Channel::Ch1,
            note: SILENT,
            velocity: SILENT,
        }
    }
}

impl Pending {
    fn message(&self) -> MidiMessage<'static> {
        let note = Note::from(self.note);
        match self.kind {
            Kind::NoteOn => MidiMessage::NoteOn(self.channel, note, self.velocity),
            Kind::NoteOff => MidiMessage::NoteOff(self.channel, note, SILENT),
        }
    }
}

/// The scheduled-send primitive: a bounded queue of future Note On/Off events.
#[derive(Clone, Debug)]
pub struct OutQueue<const N: usize = DEFAULT_QUEUE_CAPACITY> {
    pending: ArrayVec<[Pending; N]>,
}

impl<const N: usize> Default for OutQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> OutQueue<N> {
    /// Constructs an empty [`OutQueue`].
    pub fn new() -> Self {
        Self { pending: array_vec!() }
    }

    /// Queues a Note On due at `due` and its Note Off due `length` ticks later.
    pub fn schedule(&mut self, event: NoteEvent, due: u32, length: u16) -> Result<(), ScheduleError> {
        if self.pending.capacity() - self.pending.len() < 2 {
            return Err(ScheduleError::QueueFull);
        }

        let on = Pending {
            due,
            kind: Kind::NoteOn,
            ports: event.ports,
            channel: event.channel,
            note: U7::from_u8_lossy(event.note as u8),
            velocity: event.velocity,
        };
        self.pending.push(on);
        self.pending.push(Pending {
            due: due.saturating_add(u32::from(length)),
            kind: Kind::NoteOff,
            ..on
        });
        Ok(())
    }

    /// Sends every event due at or before `now`, earliest first. Returns how many were sent.
    pub fn drain_due(&mut self, now: u32, out: &mut impl MidiOutput) -> usize {
        let mut sent = 0;
        while let Some(index) = self.next_due(now) {
            let event = self.pending.remove(index);
            out.send_to(event.ports, event.message());
            sent += 1;
        }
        sent
    }

    /// Sends every pending Note Off immediately and discards every pending Note On. Returns how many were sent.
    pub fn flush(&mut self, out: &mut impl MidiOutput) -> usize {
        let mut sent = 0;
        for event in self.pending.iter().filter(|e| e.kind == Kind::NoteOff) {
            out.send_to(event.ports, event.message());
            sent += 1;
        }
        self.pending.clear();
        if sent > 0 {
            debug!("Flushed {} pending note-offs", sent);
        }
        sent
    }

    /// Number of events waiting to be sent.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Determine if nothing is waiting to be sent.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn next_due(&self, now: u32) -> Option<usize> {
        self.pending
            .iter()
            .enumerate()
            .filter(|(_, e)| e.due <= now)
            .min_by_key(|(_, e)| (e.due, e.kind))
            .map(|(i, _)| i)
    }
}
