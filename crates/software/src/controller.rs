//! Glue between the key matrix, the arpeggiator, the zone router and the MIDI outputs.
//!
//! The [`Controller`] owns every piece of engine state and the settings driving it. Key events pass through the
//! velocity curve and then go to split-learn, the arpeggiator, or straight through the zone router, in that order of
//! precedence. Settings changes are persisted as they're made.

use crate::{
    arp::{ArpStatus, Arpeggiator, NoteSink, StepTrigger},
    chord::{ChordExtension, Scale},
    clock::Clock,
    configuration::{ArpMode, ClockMode, CycleConfig, KeyboardConfig, MAX_KEYS, Settings, Storage},
    output::{MidiOutput, NoteEvent, OutQueue, Ports, ScheduleError},
    scanner::{Contact, KeyEvent, Scanner},
    transport::{Transport, TransportRequest},
    velocity::VelocityCurve,
    zone::{KeyLearned, Route, ZonePreset},
};
use embassy_time::{Duration, Instant};
use wmidi::{Channel, ControlFunction, MidiMessage, Note, U7};

const SILENT: U7 = U7::from_u8_lossy(0);

/// What a key's press turned into, so that its release undoes exactly that.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Voicing {
    Silent,
    Direct(NoteEvent),
    Arpeggiated(Note),
    Learn,
}

/// The arpeggiator's view of the outputs: notes routed through the zones, with the arpeggiator's channel taking
/// precedence when set.
struct Voice<'a, O> {
    queue: &'a mut OutQueue,
    output: &'a mut O,
    zones: &'a ZonePreset,
    channel: Option<Channel>,
}

impl<O: MidiOutput> Voice<'_, O> {
    fn route(&self, note: Note) -> Option<(Note, Channel, Ports)> {
        match self.zones.route(note) {
            Route::Play { note, channel, ports } => Some((note, self.channel.unwrap_or(channel), ports)),
            Route::Learn => None,
        }
    }
}

impl<O: MidiOutput> NoteSink for Voice<'_, O> {
    fn note_on(&mut self, note: Note, velocity: U7) {
        if let Some((note, channel, ports)) = self.route(note) {
            self.output.send_to(ports, MidiMessage::NoteOn(channel, note, velocity));
        }
    }

    fn note_off(&mut self, note: Note) {
        if let Some((note, channel, ports)) = self.route(note) {
            self.output.send_to(ports, MidiMessage::NoteOff(channel, note, SILENT));
        }
    }

    fn schedule(&mut self, trigger: StepTrigger) {
        let Some((note, channel, ports)) = self.route(trigger.note) else {
            return;
        };
        let event = NoteEvent {
            ports,
            channel,
            note,
            velocity: trigger.velocity,
        };
        if let Err(ScheduleError::QueueFull) = self.queue.schedule(event, trigger.due, trigger.length) {
            warn!("Step note {} dropped at tick {}", note as u8, trigger.due);
        }
    }

    fn flush(&mut self) {
        self.queue.flush(&mut *self.output);
    }

    fn all_notes_off(&mut self) {
        for zone in self.zones.zones() {
            let channel = self.channel.unwrap_or(zone.channel);
            self.output.send_to(
                zone.ports,
                MidiMessage::ControlChange(channel, ControlFunction::ALL_NOTES_OFF, SILENT),
            );
        }
    }
}

/// Everything key events flow through, kept apart from the scanner so that both can be borrowed at once.
struct Engine<O, L> {
    zones: ZonePreset,
    arp: Arpeggiator,
    queue: OutQueue,
    output: O,
    learned: L,
    voicing: [Voicing; MAX_KEYS],
    /// Split-learn finished since settings were last persisted.
    zones_learned: bool,
}

impl<O: MidiOutput, L: KeyLearned> Engine<O, L> {
    fn split(&mut self) -> (&mut Arpeggiator, Voice<'_, O>) {
        let channel = self.arp.settings().channel;
        let voice = Voice {
            queue: &mut self.queue,
            output: &mut self.output,
            zones: &self.zones,
            channel,
        };
        (&mut self.arp, voice)
    }

    fn handle(&mut self, event: KeyEvent, curve: VelocityCurve) {
        match event {
            KeyEvent::Pressed { key, note, velocity } => {
                let velocity = curve.lookup(velocity);
                let voicing = self.press(note, velocity);
                if let Some(slot) = self.voicing.get_mut(key) {
                    *slot = voicing;
                }
            }
            KeyEvent::Released { key, velocity, .. } => {
                let voicing = self
                    .voicing
                    .get_mut(key)
                    .map_or(Voicing::Silent, |slot| core::mem::replace(slot, Voicing::Silent));
                self.release(voicing, velocity);
            }
        }
    }

    fn press(&mut self, note: Note, velocity: U7) -> Voicing {
        if self.zones.is_learning() {
            if let Some(zone) = self.zones.learn(note) {
                self.learned.key_learned(zone, note);
                self.zones_learned = !self.zones.is_learning();
            }
            return Voicing::Learn;
        }

        let (arp, mut voice) = self.split();
        if arp.notify_root_note_on(note, velocity, &mut voice) {
            return Voicing::Arpeggiated(note);
        }
        match self.zones.route(note) {
            Route::Play { note, channel, ports } => {
                let event = NoteEvent {
                    ports,
                    channel,
                    note,
                    velocity,
                };
                self.output.send_to(ports, MidiMessage::NoteOn(channel, note, velocity));
                Voicing::Direct(event)
            }
            Route::Learn => Voicing::Silent,
        }
    }

    fn release(&mut self, voicing: Voicing, velocity: U7) {
        match voicing {
            Voicing::Direct(event) => {
                self.output
                    .send_to(event.ports, MidiMessage::NoteOff(event.channel, event.note, velocity));
            }
            Voicing::Arpeggiated(root) => {
                let (arp, mut voice) = self.split();
                arp.notify_root_note_off(root, &mut voice);
            }
            Voicing::Learn | Voicing::Silent => {}
        }
    }
}

/// The whole controller: scanner, arpeggiator, zones, clock and outputs.
///
/// `O` transmits MIDI, `L` is told about split points learned from the keyboard and `S` keeps the settings.
pub struct Controller<O, L, S> {
    keyboard: KeyboardConfig,
    scanner: Scanner,
    engine: Engine<O, L>,
    clock: Clock,
    transport: Transport,
    storage: S,
}

impl<O: MidiOutput, L: KeyLearned, S: Storage> Controller<O, L, S> {
    /// Constructs a [`Controller`] from explicit settings.
    pub fn new(settings: Settings, output: O, learned: L, storage: S) -> Self {
        let Settings { keyboard, zones, arp } = settings;
        Self {
            keyboard,
            scanner: Scanner::new(),
            engine: Engine {
                zones,
                arp: Arpeggiator::new(arp),
                queue: OutQueue::new(),
                output,
                learned,
                voicing: [Voicing::Silent; MAX_KEYS],
                zones_learned: false,
            },
            clock: Clock::from_settings(&arp),
            transport: Transport::default(),
            storage,
        }
    }

    /// Constructs a [`Controller`] from the settings kept in `storage`, restoring defaults if there are none.
    pub fn load(output: O, learned: L, mut storage: S) -> Self {
        let settings = Settings::load_or_default(&mut storage);
        Self::new(settings, output, learned, storage)
    }

    /// The settings currently in effect.
    pub fn settings(&self) -> Settings {
        Settings {
            keyboard: self.keyboard,
            zones: self.engine.zones.clone(),
            arp: *self.engine.arp.settings(),
        }
    }

    /// Getter.
    pub fn output(&self) -> &O {
        &self.engine.output
    }

    /// Getter.
    pub fn output_mut(&mut self) -> &mut O {
        &mut self.engine.output
    }

    /// Getter.
    pub fn learned(&self) -> &L {
        &self.engine.learned
    }

    /// Getter.
    pub fn arpeggiator(&self) -> &Arpeggiator {
        &self.engine.arp
    }

    /// Getter.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Getter.
    pub fn keyboard(&self) -> &KeyboardConfig {
        &self.keyboard
    }

    /// Getter.
    pub fn zones(&self) -> &ZonePreset {
        &self.engine.zones
    }

    /// Processes one reading of a matrix row.
    pub fn scan_row(&mut self, row: usize, columns: u16, now: Instant) {
        let curve = self.keyboard.curve;
        self.scanner
            .scan_row(&self.keyboard, row, columns, now, |event| self.engine.handle(event, curve));
        self.persist_learned();
    }

    /// Feeds the state of a single-switch key, such as a pedal.
    pub fn notify_key_change(&mut self, key: usize, pressed: bool, now: Instant) {
        let curve = self.keyboard.curve;
        self.scanner
            .notify_key_change(&self.keyboard, key, pressed, now, |event| self.engine.handle(event, curve));
        self.persist_learned();
    }

    /// Feeds an edge of one contact of a velocity-sensing key.
    pub fn notify_contact(&mut self, key: usize, contact: Contact, actuated: bool, now: Instant) {
        let curve = self.keyboard.curve;
        self.scanner.notify_contact(&self.keyboard, key, contact, actuated, now, |event| {
            self.engine.handle(event, curve)
        });
        self.persist_learned();
    }

    /// Hands a note from another source to the arpeggiator. Returns whether it was consumed.
    pub fn notify_root_note_on(&mut self, note: Note, velocity: U7) -> bool {
        let (arp, mut voice) = self.engine.split();
        arp.notify_root_note_on(note, velocity, &mut voice)
    }

    /// Hands a released note from another source to the arpeggiator. Returns whether it was consumed.
    pub fn notify_root_note_off(&mut self, note: Note) -> bool {
        let (arp, mut voice) = self.engine.split();
        arp.notify_root_note_off(note, &mut voice)
    }

    /// Changes the arpeggiator mode.
    pub fn set_arp_mode(&mut self, mode: ArpMode) {
        let (arp, mut voice) = self.engine.split();
        arp.set_mode(mode, &mut voice);
        self.persist();
    }

    /// Advances to the next arpeggiator mode, enabling the arpeggiator for any mode but [`ArpMode::Off`].
    pub fn cycle_arp_mode(&mut self) -> ArpMode {
        let mode = self.engine.arp.settings().mode.cycle();
        let (arp, mut voice) = self.engine.split();
        arp.set_mode(mode, &mut voice);
        arp.set_enabled(mode != ArpMode::Off, &mut voice);
        self.persist();
        mode
    }

    /// Switches the arpeggiator on or off.
    pub fn set_enabled(&mut self, enabled: bool) {
        let (arp, mut voice) = self.engine.split();
        arp.set_enabled(enabled, &mut voice);
        self.persist();
    }

    /// Selects a built-in pattern. Returns `false` for an unknown index.
    pub fn set_pattern(&mut self, index: usize) -> bool {
        let (arp, mut voice) = self.engine.split();
        let changed = arp.set_pattern(index, &mut voice);
        if changed {
            self.persist();
        }
        changed
    }

    /// Sets the pitch class the mode scale is rooted on. Returns `false` if out of range.
    pub fn set_root_key(&mut self, root_key: u8) -> bool {
        let (arp, mut voice) = self.engine.split();
        let changed = arp.set_root_key(root_key, &mut voice);
        if changed {
            self.persist();
        }
        changed
    }

    /// Selects the mode scale.
    pub fn set_mode_scale(&mut self, scale: Scale) {
        let (arp, mut voice) = self.engine.split();
        arp.set_mode_scale(scale, &mut voice);
        self.persist();
    }

    /// Selects triads or sevenths.
    pub fn set_extension(&mut self, extension: ChordExtension) {
        let (arp, mut voice) = self.engine.split();
        arp.set_extension(extension, &mut voice);
        self.persist();
    }

    /// Switches between the internal clock and MIDI Timing Clock.
    pub fn set_clock_mode(&mut self, mode: ClockMode) {
        self.clock.set_mode(mode);
        self.engine.arp.set_clock_mode(mode);
        self.persist();
    }

    /// Changes the internal clock's tempo.
    pub fn set_bpm(&mut self, bpm: u16) {
        self.clock.set_bpm(bpm);
        self.engine.arp.set_bpm(self.clock.bpm());
        self.persist();
    }

    /// Changes the clock resolution.
    pub fn set_ppqn(&mut self, ppqn: u16) {
        self.clock.set_ppqn(ppqn);
        self.engine.arp.set_ppqn(self.clock.ppqn());
        self.persist();
    }

    /// Routes arpeggiated notes to one channel, or back through the zones with `None`.
    pub fn set_arp_channel(&mut self, channel: Option<Channel>) {
        let (arp, mut voice) = self.engine.split();
        // whatever sounds must be silenced on the channel it was started on
        arp.release_all(&mut voice);
        arp.set_channel(channel);
        self.persist();
    }

    /// Selects the velocity curve.
    pub fn set_velocity_curve(&mut self, curve: VelocityCurve) {
        self.keyboard.curve = curve;
        self.persist();
    }

    /// Replaces the keyboard configuration, releasing every sounding key first.
    pub fn set_keyboard(&mut self, keyboard: KeyboardConfig) {
        let curve = self.keyboard.curve;
        self.scanner.reset(&self.keyboard, |event| self.engine.handle(event, curve));
        self.keyboard = keyboard;
        self.persist();
    }

    /// Replaces the zone preset, releasing whatever the arpeggiator sounds first. Keys played directly keep the route
    /// they were pressed with.
    pub fn set_zones(&mut self, zones: ZonePreset) {
        let (arp, mut voice) = self.engine.split();
        arp.release_all(&mut voice);
        self.engine.zones = zones;
        self.persist();
    }

    /// Starts learning split points for `zone_count` zones from the next notes played. Returns `false` for an
    /// unsupported zone count.
    pub fn begin_split_learn(&mut self, zone_count: usize) -> bool {
        let (arp, mut voice) = self.engine.split();
        arp.release_all(&mut voice);
        self.engine.zones.begin_learn(zone_count)
    }

    /// Plays whatever the arpeggiator has on `tick`, and sends every scheduled event due by then.
    pub fn tick(&mut self, tick: u32) {
        let (arp, mut voice) = self.engine.split();
        arp.tick(tick, &mut voice);
        self.engine.queue.drain_due(tick, &mut self.engine.output);
    }

    /// Time until the next internal clock tick.
    pub fn tick_period(&self) -> Duration {
        self.clock.tick_period()
    }

    /// Produces and plays the next internal clock tick. Does nothing (returning `None`) when following an external
    /// clock.
    pub fn on_timer(&mut self) -> Option<u32> {
        if self.clock.mode() != ClockMode::Master {
            return None;
        }
        let tick = self.clock.next_tick();
        self.tick(tick);
        Some(tick)
    }

    /// Processes received USB-MIDI data: transport requests, and Timing Clock when following an external clock.
    pub fn midi_in(&mut self, data: &[u8]) {
        self.transport.update(data);

        let requests = self.transport.take_pending();
        if requests.contains(TransportRequest::Start) {
            self.clock.reset();
            self.engine.arp.start();
        }
        if requests.contains(TransportRequest::Stop) {
            let (arp, mut voice) = self.engine.split();
            arp.stop(&mut voice);
        }
        if requests.contains(TransportRequest::SongPosition) {
            self.clock.song_position(self.transport.song_position());
        }

        let pulses = self.transport.take_clock_pulses();
        if self.clock.mode() != ClockMode::Slave || !self.transport.is_running() {
            return;
        }
        for _ in 0..pulses {
            for tick in self.clock.pulse() {
                self.tick(tick);
            }
        }
    }

    /// Describes the arpeggiator's state for a character display.
    pub fn arp_state_text(&self) -> ArpStatus {
        self.engine.arp.state_text()
    }

    fn persist_learned(&mut self) {
        if core::mem::take(&mut self.engine.zones_learned) {
            self.persist();
        }
    }

    fn persist(&mut self) {
        if self.settings().persist(&mut self.storage).is_err() {
            warn!("Failed to persist settings");
        }
    }
}
