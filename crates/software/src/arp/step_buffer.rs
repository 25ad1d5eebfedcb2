//! The step note buffer: a pattern rendered against the currently held notes.
//!
//! The buffer is rebuilt wholesale whenever the note stack changes and is only read while ticking. Rebuilding
//! happens while handling key input and reading happens on the tick path, so the shared form of the buffer,
//! [`SharedStepBuffer`], only hands out access inside a critical section.

use super::{ArpPattern, HeldNote, MAX_STEPS, NoteStack, StepEvent, StepKind};
use crate::chord::Scale;
use core::cell::RefCell;
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use wmidi::{Note, U7};

/// Most notes a single step can sound at once.
pub const MAX_NOTES_PER_STEP: usize = 8;

/// A note placed on a step. A zero `length` marks an unused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepNote {
    /// Note number.
    pub note: U7,
    /// Strike velocity.
    pub velocity: U7,
    /// Duration in ticks.
    pub length: u16,
    /// Ticks relative to the step's grid position at which the note starts; negative starts early.
    pub offset: i16,
}

impl StepNote {
    const EMPTY: Self = Self {
        note: U7::from_u8_lossy(0),
        velocity: U7::from_u8_lossy(0),
        length: 0,
        offset: 0,
    };

    /// Determine if the slot holds a note.
    pub fn is_active(&self) -> bool {
        self.length != 0
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for StepNote {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "StepNote {{ note: {}, velocity: {}, length: {}, offset: {} }}",
            u8::from(self.note),
            u8::from(self.velocity),
            self.length,
            self.offset
        );
    }
}

/// Musical context a pattern is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RenderContext {
    /// Length of one grid step in ticks.
    pub grid: u16,
    /// Mode used by scale-step offsets.
    pub scale: Scale,
    /// Pitch class (0 = C) the mode is rooted on.
    pub root_key: u8,
}

/// A small linear congruential generator used to resolve random steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lcg(u32);

impl Lcg {
    /// Constructs a generator from a seed.
    pub const fn new(seed: u32) -> Self {
        Self(seed)
    }

    /// Returns a value in `0..bound`; `bound` must be non-zero.
    pub fn below(&mut self, bound: usize) -> usize {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (self.0 >> 16) as usize % bound
    }
}

/// Per-step, per-slot notes of a rendered pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepNoteBuffer {
    steps: [[StepNote; MAX_NOTES_PER_STEP]; MAX_STEPS],
    step_count: usize,
}

impl Default for StepNoteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl StepNoteBuffer {
    /// Constructs an empty buffer.
    pub const fn new() -> Self {
        Self {
            steps: [[StepNote::EMPTY; MAX_NOTES_PER_STEP]; MAX_STEPS],
            step_count: 0,
        }
    }

    /// Empties every step.
    pub fn clear(&mut self) {
        self.steps = [[StepNote::EMPTY; MAX_NOTES_PER_STEP]; MAX_STEPS];
        self.step_count = 0;
    }

    /// Number of steps in the rendered pattern.
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// The notes of one step; unused slots have zero length.
    pub fn step(&self, index: usize) -> &[StepNote] {
        self.steps.get(index).map_or(&[][..], |notes| &notes[..])
    }

    /// Renders `pattern` against the held notes, replacing whatever the buffer held before.
    pub fn rebuild<const N: usize>(
        &mut self,
        pattern: &ArpPattern,
        stack: &NoteStack<N>,
        context: &RenderContext,
        rng: &mut Lcg,
    ) {
        self.clear();
        self.step_count = pattern.len().min(MAX_STEPS);
        if stack.is_empty() {
            return;
        }

        let grid = context.grid.max(1);
        // index of the last step that placed notes, for rests to extend
        let mut sounding: Option<usize> = None;

        for (index, step) in pattern.steps().iter().take(MAX_STEPS).enumerate() {
            match step.kind {
                StepKind::Normal | StepKind::Tie | StepKind::Random => {
                    let slot = match step.kind {
                        StepKind::Random => Some(rng.below(stack.len())),
                        _ => usize::from(step.key_select).checked_sub(1),
                    };
                    let Some(held) = slot.and_then(|slot| stack.get(slot)) else {
                        sounding = None;
                        continue;
                    };
                    let (length, offset) = match step.kind {
                        StepKind::Tie => (grid + grid / 4, -((grid / 4) as i16)),
                        _ => (grid, 0),
                    };
                    if self.place(index, 0, held, step, context, length, offset) {
                        sounding = Some(index);
                    } else {
                        sounding = None;
                    }
                }
                StepKind::Chord => {
                    let mut placed = 0;
                    for held in stack.iter() {
                        if placed == MAX_NOTES_PER_STEP {
                            break;
                        }
                        if self.place(index, placed, held, step, context, grid, 0) {
                            placed += 1;
                        }
                    }
                    sounding = (placed > 0).then_some(index);
                }
                StepKind::Rest => {
                    if let Some(previous) = sounding {
                        for note in self.steps[previous].iter_mut().filter(|n| n.is_active()) {
                            note.length = note.length.saturating_add(grid);
                        }
                    }
                }
                StepKind::Off => sounding = None,
            }
        }
    }

    /// Writes one note into a step slot after applying the step's offsets. Returns `false` if the shifted note falls
    /// outside the MIDI range.
    #[allow(clippy::too_many_arguments)]
    fn place(
        &mut self,
        index: usize,
        slot: usize,
        held: HeldNote,
        step: &StepEvent,
        context: &RenderContext,
        length: u16,
        offset: i16,
    ) -> bool {
        let Some(note) = shift(held.note(), step, context) else {
            return false;
        };
        self.steps[index][slot] = StepNote {
            note: U7::from_u8_lossy(note as u8),
            velocity: held.velocity(),
            length,
            offset,
        };
        true
    }
}

fn shift(note: Note, step: &StepEvent, context: &RenderContext) -> Option<Note> {
    let note = context.scale.step(context.root_key, note, step.scale_step)?;
    let shifted = i16::from(note as u8) + i16::from(step.octave) * 12;
    u8::try_from(shifted)
        .ok()
        .filter(|&n| n <= 127)
        .map(|n| Note::from(U7::from_u8_lossy(n)))
}

/// A [`StepNoteBuffer`] which may be rebuilt from the input path while the tick path reads it.
pub struct SharedStepBuffer {
    inner: Mutex<CriticalSectionRawMutex, RefCell<StepNoteBuffer>>,
}

impl Default for SharedStepBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStepBuffer {
    /// Constructs an empty shared buffer; usable in a `static`.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(StepNoteBuffer::new())),
        }
    }

    /// Rebuilds the buffer atomically with respect to readers.
    pub fn rebuild<const N: usize>(
        &self,
        pattern: &ArpPattern,
        stack: &NoteStack<N>,
        context: &RenderContext,
        rng: &mut Lcg,
    ) {
        self.inner
            .lock(|buffer| buffer.borrow_mut().rebuild(pattern, stack, context, rng));
    }

    /// Empties the buffer.
    pub fn clear(&self) {
        self.inner.lock(|buffer| buffer.borrow_mut().clear());
    }

    /// Runs `f` over a consistent view of the buffer.
    pub fn read<R>(&self, f: impl FnOnce(&StepNoteBuffer) -> R) -> R {
        self.inner.lock(|buffer| f(&buffer.borrow()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arp::PATTERNS;

    const GRID: u16 = 24;
    const VELOCITY: U7 = U7::from_u8_lossy(100);

    fn context() -> RenderContext {
        RenderContext {
            grid: GRID,
            scale: Scale::Ionian,
            root_key: 0,
        }
    }

    fn stack(notes: &[Note]) -> NoteStack {
        let mut stack = NoteStack::new();
        for &note in notes {
            stack.push(note, VELOCITY).unwrap();
        }
        stack
    }

    fn render(pattern: &ArpPattern, notes: &[Note]) -> StepNoteBuffer {
        let mut buffer = StepNoteBuffer::new();
        buffer.rebuild(pattern, &stack(notes), &context(), &mut Lcg::new(1));
        buffer
    }

    fn active(buffer: &StepNoteBuffer, step: usize) -> impl Iterator<Item = StepNote> + '_ {
        buffer.step(step).iter().copied().filter(StepNote::is_active)
    }

    fn note(n: Note) -> U7 {
        U7::from_u8_lossy(n as u8)
    }

    static SEVEN_CHORD: [Note; 4] = [Note::C4, Note::E4, Note::G4, Note::B4];

    #[test]
    fn normal_steps_follow_key_select() {
        let buffer = render(&PATTERNS[0], &SEVEN_CHORD);
        assert_eq!(4, buffer.step_count());
        for (step, &expected) in SEVEN_CHORD.iter().enumerate() {
            let mut notes = active(&buffer, step);
            assert_eq!(
                Some(StepNote {
                    note: note(expected),
                    velocity: VELOCITY,
                    length: GRID,
                    offset: 0
                }),
                notes.next(),
                "Unexpected note on step {}",
                step
            );
            assert_eq!(None, notes.next());
        }
    }

    #[test]
    fn missing_slot_leaves_step_silent() {
        let buffer = render(&PATTERNS[0], &[Note::C4, Note::E4]);
        assert_eq!(1, active(&buffer, 1).count());
        assert_eq!(0, active(&buffer, 2).count());
        assert_eq!(0, active(&buffer, 3).count());
    }

    #[test]
    fn tie_step_overlaps() {
        // "UpTie": norm(1), tie(2), norm(3), tie(4)
        let buffer = render(&PATTERNS[3], &SEVEN_CHORD);
        let tied = active(&buffer, 1).next().unwrap();
        assert_eq!(GRID + GRID / 4, tied.length, "Expected left but got right");
        assert_eq!(-((GRID / 4) as i16), tied.offset, "Expected left but got right");
    }

    #[test]
    fn chord_step_plays_everything() {
        let buffer = render(&PATTERNS[4], &SEVEN_CHORD);
        let notes: [Option<U7>; 5] = {
            let mut iter = active(&buffer, 0).map(|n| n.note);
            core::array::from_fn(|_| iter.next())
        };
        assert_eq!(
            [
                Some(note(Note::C4)),
                Some(note(Note::E4)),
                Some(note(Note::G4)),
                Some(note(Note::B4)),
                None
            ],
            notes
        );
        assert_eq!(0, active(&buffer, 1).count(), "Off step should be silent");
    }

    #[test]
    fn rests_extend_previous_notes() {
        // "Pad": chord, rest, rest, rest, chord, rest, off, off
        let buffer = render(&PATTERNS[5], &[Note::C4, Note::G4]);
        assert!(active(&buffer, 0).all(|n| n.length == 4 * GRID));
        assert!(active(&buffer, 4).all(|n| n.length == 2 * GRID));
        assert_eq!(0, active(&buffer, 1).count());
        assert_eq!(0, active(&buffer, 6).count());
    }

    #[test]
    fn octave_and_scale_offsets() {
        // "Oct" alternates each note with its upper octave; "Walk" climbs the scale from the first note
        let buffer = render(&PATTERNS[6], &[Note::C4]);
        assert_eq!(Some(note(Note::C5)), active(&buffer, 1).next().map(|n| n.note));

        let buffer = render(&PATTERNS[8], &[Note::C4]);
        let walk: [Option<U7>; 5] =
            core::array::from_fn(|step| active(&buffer, step).next().map(|n| n.note));
        assert_eq!(
            [
                Some(note(Note::C4)),
                Some(note(Note::D4)),
                Some(note(Note::E4)),
                Some(note(Note::F4)),
                Some(note(Note::G4))
            ],
            walk
        );
    }

    #[test]
    fn random_steps_sample_held_notes() {
        let held = [Note::C4, Note::E4, Note::G4];
        let buffer = render(&PATTERNS[10], &held);
        for step in 0..buffer.step_count() {
            let n = active(&buffer, step).next().unwrap();
            assert!(held.iter().any(|&h| note(h) == n.note));
        }
    }

    #[test]
    fn rebuild_is_idempotent() {
        let mut buffer = StepNoteBuffer::new();
        let held = stack(&SEVEN_CHORD);
        buffer.rebuild(&PATTERNS[5], &held, &context(), &mut Lcg::new(7));
        let first = buffer.clone();
        buffer.rebuild(&PATTERNS[5], &held, &context(), &mut Lcg::new(7));
        assert_eq!(first, buffer, "Rebuilding should not accumulate entries");
    }

    #[test]
    fn rebuild_clears_stale_steps() {
        let mut buffer = StepNoteBuffer::new();
        buffer.rebuild(&PATTERNS[9], &stack(&SEVEN_CHORD), &context(), &mut Lcg::new(1));
        buffer.rebuild(&PATTERNS[0], &stack(&[Note::A3]), &context(), &mut Lcg::new(1));
        assert_eq!(4, buffer.step_count());
        assert_eq!(1, active(&buffer, 0).count());
        assert_eq!(0, (1..MAX_STEPS).map(|s| active(&buffer, s).count()).sum::<usize>());
    }

    #[test]
    fn empty_stack_renders_silence() {
        let buffer = render(&PATTERNS[4], &[]);
        assert_eq!(0, (0..MAX_STEPS).map(|s| active(&buffer, s).count()).sum::<usize>());
    }

    #[test]
    fn shared_buffer() {
        let shared = SharedStepBuffer::new();
        shared.rebuild(&PATTERNS[0], &stack(&SEVEN_CHORD), &context(), &mut Lcg::new(1));
        assert_eq!(4, shared.read(|b| b.step_count()));
        shared.clear();
        assert_eq!(0, shared.read(|b| active(b, 0).count()));
    }
}
