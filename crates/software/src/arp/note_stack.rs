//! Provides [`NoteStack`], the ordered set of held notes the pattern sequencer reads from.
//!
//! Notes are kept in the order they were pushed. That order doubles as the addressing scheme for pattern steps: a
//! step with key select `n` samples the `n`th note pushed (see [`StepEvent`](super::StepEvent)). There is no sorting
//! and no note priority beyond insertion order.

use tinyvec::{ArrayVec, array_vec};
use wmidi::{Note, U7};

/// The largest number of notes any controller variant holds for the arpeggiator.
pub const MAX_HELD_NOTES: usize = 16;

/// A note together with the velocity it was struck with.
///
/// Stored as a pair of [`U7`]s because [`tinyvec`] requires its items to implement [`Default`], which [`Note`] does not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeldNote {
    note: U7,
    velocity: U7,
}

impl HeldNote {
    /// Constructs a [`HeldNote`].
    pub fn new(note: Note, velocity: U7) -> Self {
        Self {
            note: U7::from_u8_lossy(note as u8),
            velocity,
        }
    }

    /// Getter.
    pub fn note(&self) -> Note {
        Note::from(self.note)
    }

    /// Getter.
    pub fn velocity(&self) -> U7 {
        self.velocity
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for HeldNote {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "{} ({}) @ {}",
            self.note().to_str(),
            u8::from(self.note),
            u8::from(self.velocity)
        );
    }
}

/// Reasons a push onto the [`NoteStack`] can be refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PushError {
    /// The note is already held.
    Duplicate,
    /// Every slot is taken.
    Full,
}

/// Outcome of [`NoteStack::pop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PopStatus {
    /// The note was removed and others remain.
    Removed,
    /// The note was removed and it was the last one.
    NowEmpty,
    /// The note wasn't held; nothing changed.
    NotFound,
}

/// A bounded, ordered collection of held notes with no duplicates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteStack<const N: usize = MAX_HELD_NOTES> {
    data: ArrayVec<[HeldNote; N]>,
}

impl<const N: usize> Default for NoteStack<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "defmt")]
impl<const N: usize> defmt::Format for NoteStack<N> {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "NoteStack {{ data: [");
        for (i, held) in self.data.iter().enumerate() {
            if i != 0 {
                defmt::write!(fmt, ",");
            }
            defmt::write!(fmt, " {}", held);
        }
        defmt::write!(fmt, " ] }}");
    }
}

impl<const N: usize> NoteStack<N> {
    /// Constructs an empty [`NoteStack`].
    pub fn new() -> Self {
        Self { data: array_vec!() }
    }

    /// Appends a note to the bottom of the stack.
    ///
    /// Refuses notes that are already held and refuses anything once the stack is full; in both cases the stack is
    /// left untouched.
    pub fn push(&mut self, note: Note, velocity: U7) -> Result<(), PushError> {
        if self.contains(note) {
            return Err(PushError::Duplicate);
        }
        if self.data.len() == self.data.capacity() {
            return Err(PushError::Full);
        }
        self.data.push(HeldNote::new(note, velocity));
        Ok(())
    }

    /// Removes a note, preserving the order of those remaining.
    pub fn pop(&mut self, note: Note) -> PopStatus {
        match self.data.iter().position(|held| held.note() == note) {
            Some(index) => {
                self.data.remove(index);
                if self.data.is_empty() {
                    PopStatus::NowEmpty
                } else {
                    PopStatus::Removed
                }
            }
            None => PopStatus::NotFound,
        }
    }

    /// Empties the stack.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Determine if the given [`Note`] is held.
    pub fn contains(&self, note: Note) -> bool {
        self.data.iter().any(|held| held.note() == note)
    }

    /// Returns the held note in the given zero-based slot, if any.
    pub fn get(&self, slot: usize) -> Option<HeldNote> {
        self.data.get(slot).copied()
    }

    /// Number of notes held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Determine if any notes are held.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Determine if another note can be pushed.
    pub fn is_full(&self) -> bool {
        self.data.len() == self.data.capacity()
    }

    /// Maximum number of notes the stack holds.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Returns an [`Iterator`] over the held notes in the order they were pushed.
    pub fn iter(&self) -> impl Iterator<Item = HeldNote> + '_ {
        self.data.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VELOCITY: U7 = U7::from_u8_lossy(100);

    fn chord() -> NoteStack<5> {
        let mut stack = NoteStack::new();
        for note in [Note::E4, Note::C4, Note::G4] {
            stack.push(note, VELOCITY).unwrap();
        }
        stack
    }

    #[test]
    fn new() {
        let stack = NoteStack::<5>::new();
        assert!(stack.is_empty());
        assert_eq!(5, stack.capacity(), "Expected left but got right");
    }

    #[test]
    fn push_appends_to_bottom() {
        let mut stack = chord();
        assert_eq!(Ok(()), stack.push(Note::D4, VELOCITY));
        let notes: [Note; 4] = core::array::from_fn(|i| stack.get(i).unwrap().note());
        assert_eq!(
            [Note::E4, Note::C4, Note::G4, Note::D4],
            notes,
            "Expected left but got right"
        );
    }

    #[test]
    fn duplicate_push_is_refused() {
        let expected = chord();
        let mut actual = chord();
        assert_eq!(Err(PushError::Duplicate), actual.push(Note::C4, U7::from_u8_lossy(1)));
        assert_eq!(expected, actual, "Expected left but got right");
        assert_eq!(3, actual.len());
    }

    #[test]
    fn push_refuses_rather_than_overflow() {
        let mut stack = chord();
        stack.push(Note::D4, VELOCITY).unwrap();
        stack.push(Note::F4, VELOCITY).unwrap();
        assert!(stack.is_full());
        let expected = stack;

        assert_eq!(Err(PushError::Full), stack.push(Note::A4, VELOCITY));
        assert_eq!(expected, stack, "Expected stack not to change");
        assert!(!stack.contains(Note::A4));
    }

    #[test]
    fn pop_preserves_order() {
        let mut stack = chord();
        assert_eq!(PopStatus::Removed, stack.pop(Note::C4));
        assert_eq!(Some(Note::E4), stack.get(0).map(|h| h.note()));
        assert_eq!(Some(Note::G4), stack.get(1).map(|h| h.note()));
        assert_eq!(None, stack.get(2));
    }

    #[test]
    fn pop_of_missing_note_changes_nothing() {
        let mut stack = chord();
        assert_eq!(PopStatus::NotFound, stack.pop(Note::B4));
        assert_eq!(3, stack.len(), "Expected length not to change");
    }

    #[test]
    fn pop_of_last_note_reports_empty() {
        let mut stack = NoteStack::<5>::new();
        stack.push(Note::C4, VELOCITY).unwrap();
        stack.push(Note::G4, VELOCITY).unwrap();
        assert_eq!(PopStatus::Removed, stack.pop(Note::C4));
        assert_eq!(PopStatus::NowEmpty, stack.pop(Note::G4));
        assert!(stack.is_empty());
    }

    #[test]
    fn clear() {
        let mut stack = chord();
        stack.clear();
        assert!(stack.is_empty());
        assert_eq!(PopStatus::NotFound, stack.pop(Note::E4));
    }

    #[test]
    fn iter_keeps_velocity() {
        let mut stack = NoteStack::<5>::new();
        stack.push(Note::C4, U7::from_u8_lossy(10)).unwrap();
        stack.push(Note::E4, U7::from_u8_lossy(20)).unwrap();
        let mut iter = stack.iter();
        assert_eq!(Some(HeldNote::new(Note::C4, U7::from_u8_lossy(10))), iter.next());
        assert_eq!(Some(HeldNote::new(Note::E4, U7::from_u8_lossy(20))), iter.next());
        assert_eq!(None, iter.next());
    }
}
