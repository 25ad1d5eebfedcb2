//! The arpeggiator: collects held notes (expanding chord roots where the mode calls for it), renders them through the
//! selected pattern and plays the result in time with the tick clock.
//!
//! Whatever the arpeggiator sounds goes through a [`NoteSink`], which is responsible for routing notes to outputs and
//! for the queue of scheduled Note Offs. Every transition that discards held notes flushes that queue first, so no
//! note is left sounding.

mod note_stack;
pub use note_stack::*;

mod pattern;
pub use pattern::*;

mod sequencer;
pub use sequencer::*;

mod step_buffer;
pub use step_buffer::*;

use crate::{
    chord::{ChordExtension, Scale, chord_for_note},
    configuration::{ArpMode, ArpSettings, ClockMode},
};
use core::fmt;
use wmidi::{Channel, Note, U7};

const LCG_SEED: u32 = 0x2545_F491;

const KEY_NAMES: [&str; 12] = ["C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B"];

/// Receives what the arpeggiator plays.
pub trait NoteSink {
    /// Sounds a note immediately (chord pad).
    fn note_on(&mut self, note: Note, velocity: U7);

    /// Silences a note immediately (chord pad).
    fn note_off(&mut self, note: Note);

    /// Schedules a sequenced note and its Note Off.
    fn schedule(&mut self, trigger: StepTrigger);

    /// Sends every pending scheduled Note Off now and drops pending Note Ons.
    fn flush(&mut self);

    /// Sends All Notes Off as a safety net.
    fn all_notes_off(&mut self);
}

/// Arpeggiator state.
pub struct Arpeggiator {
    settings: ArpSettings,
    stack: NoteStack,
    /// The chord root held in the one-key and chord-pad modes.
    root: Option<Note>,
    buffer: SharedStepBuffer,
    sequencer: Sequencer,
    rng: Lcg,
}

impl Arpeggiator {
    /// Constructs an idle [`Arpeggiator`].
    pub fn new(settings: ArpSettings) -> Self {
        Self {
            settings,
            stack: NoteStack::new(),
            root: None,
            buffer: SharedStepBuffer::new(),
            sequencer: Sequencer::new(settings.ppqn),
            rng: Lcg::new(LCG_SEED),
        }
    }

    /// Getter.
    pub fn settings(&self) -> &ArpSettings {
        &self.settings
    }

    /// Determine if incoming notes are consumed.
    pub fn is_active(&self) -> bool {
        self.settings.is_active()
    }

    /// The notes currently feeding the pattern.
    pub fn held(&self) -> &NoteStack {
        &self.stack
    }

    /// Getter.
    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Hands a played note to the arpeggiator. Returns whether it was consumed; if not, the caller plays it directly.
    ///
    /// Notes aren't consumed while the arpeggiator is inactive, when they aren't a chord root in the current scale (in
    /// the chord modes) or when the note stack is full.
    pub fn notify_root_note_on(&mut self, note: Note, velocity: U7, sink: &mut impl NoteSink) -> bool {
        if !self.is_active() {
            return false;
        }
        match self.settings.mode {
            ArpMode::Off => false,
            ArpMode::OneKeyChordArp => {
                if self.root == Some(note) {
                    return true;
                }
                if !self.fill_chord(note, velocity) {
                    return false;
                }
                // a new root mid-pattern: silence the old chord and restart the pattern from step 0
                sink.flush();
                self.root = Some(note);
                self.sequencer.resync();
                self.rebuild();
                true
            }
            ArpMode::ChordPad => {
                if self.root == Some(note) {
                    return true;
                }
                let previous = self.stack;
                if !self.fill_chord(note, velocity) {
                    return false;
                }
                for held in previous.iter() {
                    sink.note_off(held.note());
                }
                self.root = Some(note);
                for held in self.stack.iter() {
                    sink.note_on(held.note(), held.velocity());
                }
                true
            }
            ArpMode::MultiKey => {
                let was_empty = self.stack.is_empty();
                match self.stack.push(note, velocity) {
                    Ok(()) => {
                        if was_empty {
                            self.sequencer.resync();
                        }
                        self.rebuild();
                        true
                    }
                    Err(PushError::Duplicate) => true,
                    Err(PushError::Full) => {
                        debug!("Note stack full, {} passes through", note as u8);
                        false
                    }
                }
            }
        }
    }

    /// Hands a released note to the arpeggiator. Returns whether it was consumed; if not, the caller silences it.
    pub fn notify_root_note_off(&mut self, note: Note, sink: &mut impl NoteSink) -> bool {
        match self.settings.mode {
            // only one chord sounds at a time, so releasing any root that drove it collapses it
            ArpMode::OneKeyChordArp | ArpMode::ChordPad => {
                if self.root.is_none() {
                    return false;
                }
                trace!("Release of {} collapses the chord", note as u8);
                self.release_all(sink);
                true
            }
            ArpMode::MultiKey => match self.stack.pop(note) {
                PopStatus::Removed => {
                    self.rebuild();
                    true
                }
                PopStatus::NowEmpty => {
                    self.release_all(sink);
                    true
                }
                PopStatus::NotFound => false,
            },
            ArpMode::Off => false,
        }
    }

    /// Silences and forgets every held note, returning the sequencer to idle.
    pub fn release_all(&mut self, sink: &mut impl NoteSink) {
        if self.settings.mode == ArpMode::ChordPad {
            for held in self.stack.iter() {
                sink.note_off(held.note());
            }
        }
        sink.flush();
        self.stack.clear();
        self.root = None;
        self.buffer.clear();
        self.sequencer.reset();
    }

    /// Changes the mode, releasing everything held.
    pub fn set_mode(&mut self, mode: ArpMode, sink: &mut impl NoteSink) {
        if mode == self.settings.mode {
            return;
        }
        self.release_all(sink);
        self.settings.mode = mode;
        info!("Arpeggiator mode {}", mode);
    }

    /// Switches the arpeggiator on or off. Switching off releases everything and sends All Notes Off.
    pub fn set_enabled(&mut self, enabled: bool, sink: &mut impl NoteSink) {
        if !enabled && self.settings.enabled {
            self.release_all(sink);
            sink.all_notes_off();
        }
        self.settings.enabled = enabled;
    }

    /// Selects a built-in pattern. Returns `false` (changing nothing) for an unknown index.
    pub fn set_pattern(&mut self, index: usize, sink: &mut impl NoteSink) -> bool {
        let Some(index) = pattern(index).and_then(|_| u8::try_from(index).ok()) else {
            warn!("No pattern {}", index);
            return false;
        };
        sink.flush();
        self.settings.pattern = index;
        self.rebuild();
        true
    }

    /// Sets the pitch class (0 = C) the mode scale is rooted on. Returns `false` (changing nothing) if out of range.
    pub fn set_root_key(&mut self, root_key: u8, sink: &mut impl NoteSink) -> bool {
        if root_key > 11 {
            warn!("Root key {} is out of range", root_key);
            return false;
        }
        self.settings.root_key = root_key;
        self.rechord(sink);
        true
    }

    /// Selects the mode scale chords are drawn from.
    pub fn set_mode_scale(&mut self, scale: Scale, sink: &mut impl NoteSink) {
        self.settings.scale = scale;
        self.rechord(sink);
    }

    /// Selects triads or sevenths.
    pub fn set_extension(&mut self, extension: ChordExtension, sink: &mut impl NoteSink) {
        self.settings.extension = extension;
        self.rechord(sink);
    }

    /// Changes the clock resolution, and with it the length of a grid step.
    pub fn set_ppqn(&mut self, ppqn: u16) {
        self.settings.ppqn = ppqn;
        self.sequencer.set_ppqn(ppqn);
        self.rebuild();
    }

    /// Records where ticks come from.
    pub fn set_clock_mode(&mut self, mode: ClockMode) {
        self.settings.clock_mode = mode;
    }

    /// Records the internal clock's tempo.
    pub fn set_bpm(&mut self, bpm: u16) {
        self.settings.bpm = bpm;
    }

    /// Sends arpeggiated notes on one channel, or on their zone's channel with `None`.
    pub fn set_channel(&mut self, channel: Option<Channel>) {
        self.settings.channel = channel;
    }

    /// Plays whatever falls on `tick`. Returns the step played, if any.
    pub fn tick(&mut self, tick: u32, sink: &mut impl NoteSink) -> Option<usize> {
        if !self.is_active() || self.settings.mode == ArpMode::ChordPad {
            return None;
        }
        self.sequencer.tick(tick, &self.buffer, |trigger| sink.schedule(trigger))
    }

    /// Aligns the pattern with tick 0, following a transport Start.
    pub fn start(&mut self) {
        self.sequencer.start();
    }

    /// Silences scheduled notes following a transport Stop. Held notes stay held.
    pub fn stop(&mut self, sink: &mut impl NoteSink) {
        sink.flush();
    }

    /// A short description of the arpeggiator's state for a character display.
    pub fn state_text(&self) -> ArpStatus {
        let pattern = pattern(usize::from(self.settings.pattern)).unwrap_or(&PATTERNS[0]);
        ArpStatus {
            active: self.is_active(),
            mode: self.settings.mode,
            root_key: self.settings.root_key,
            scale: self.settings.scale,
            extension: self.settings.extension,
            pattern: pattern.name(),
            step: (self.sequencer.state() == SequencerState::Running).then(|| self.sequencer.step()),
        }
    }

    /// Replaces the stack with the chord on `note`. Leaves the stack untouched and returns `false` if there is none.
    fn fill_chord(&mut self, note: Note, velocity: U7) -> bool {
        let s = &self.settings;
        let Some(chord) = chord_for_note(s.scale, s.extension, s.root_key, note) else {
            trace!("{} carries no chord", note as u8);
            return false;
        };
        self.stack.clear();
        for tone in chord {
            match self.stack.push(tone, velocity) {
                Ok(()) => {}
                Err(PushError::Duplicate) => trace!("{} repeats in the chord", tone as u8),
                Err(PushError::Full) => {
                    warn!("Chord on {} exceeds the note stack", note as u8);
                    break;
                }
            }
        }
        true
    }

    /// Re-derives the chord on the held root after a scale setting changed.
    fn rechord(&mut self, sink: &mut impl NoteSink) {
        let Some(root) = self.root else {
            self.rebuild();
            return;
        };
        let velocity = self.stack.get(0).map_or(U7::from_u8_lossy(100), |held| held.velocity());
        self.release_all(sink);
        // the pad is voiced the same way a fresh press would be; the arpeggio restarts from step 0
        self.notify_root_note_on(root, velocity, sink);
    }

    fn rebuild(&mut self) {
        let pattern = pattern(usize::from(self.settings.pattern)).unwrap_or(&PATTERNS[0]);
        let context = RenderContext {
            grid: self.sequencer.grid(),
            scale: self.settings.scale,
            root_key: self.settings.root_key,
        };
        self.buffer.rebuild(pattern, &self.stack, &context, &mut self.rng);
    }
}

/// What [`Arpeggiator::state_text`] displays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpStatus {
    /// Whether notes are being consumed at all.
    pub active: bool,
    /// Arpeggiator mode.
    pub mode: ArpMode,
    /// Pitch class of the mode scale.
    pub root_key: u8,
    /// Mode scale.
    pub scale: Scale,
    /// Triads or sevenths.
    pub extension: ChordExtension,
    /// Name of the selected pattern.
    pub pattern: &'static str,
    /// The step playing, while the pattern runs.
    pub step: Option<usize>,
}

impl fmt::Display for ArpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.active {
            return f.write_str("Arp off");
        }
        let extension = match self.extension {
            ChordExtension::Triad => "Tri",
            ChordExtension::Seventh => "7th",
        };
        write!(
            f,
            "{} {} {} {} {}",
            self.mode.short_name(),
            KEY_NAMES[usize::from(self.root_key % 12)],
            self.scale.short_name(),
            extension,
            self.pattern
        )?;
        if let Some(step) = self.step {
            write!(f, " {:02}", step + 1)?;
        }
        Ok(())
    }
}
