//! The chord engine: determines which chord naturally occurs on a given degree of a mode, and spells it out as
//! concrete notes.

use crate::configuration::CycleConfig;
use num_derive::{FromPrimitive, ToPrimitive};
use wmidi::Note;

/// Number of pitch classes in an octave.
const SEMITONES: i16 = 12;

/// MIDI note at which internal octave 0 begins (C2, where middle C is C4 = 60).
const OCTAVE_ZERO_NOTE: i16 = 36;

/// The modes (scales) the chord engine knows how to harmonize.
///
/// Discriminants double as row indices into the chord tables and as persisted identifiers.
#[derive(Debug, Default, Clone, Copy, ToPrimitive, FromPrimitive, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Scale {
    /// Major.
    #[default]
    Ionian,
    /// Minor with a raised sixth.
    Dorian,
    /// Minor with a lowered second.
    Phrygian,
    /// Major with a raised fourth.
    Lydian,
    /// Major with a lowered seventh.
    Mixolydian,
    /// Natural minor.
    Aeolian,
    /// Diminished tonic; lowered second and fifth.
    Locrian,
    /// Natural minor with a raised seventh.
    HarmonicMinor,
}
impl CycleConfig for Scale {}

impl Scale {
    /// Semitone offsets of the seven scale degrees from the root.
    pub fn intervals(&self) -> &'static [u8; 7] {
        match self {
            Self::Ionian => &[0, 2, 4, 5, 7, 9, 11],
            Self::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            Self::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            Self::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            Self::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            Self::Aeolian => &[0, 2, 3, 5, 7, 8, 10],
            Self::Locrian => &[0, 1, 3, 5, 6, 8, 10],
            Self::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
        }
    }

    /// Abbreviation suitable for a two-line character display.
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Ionian => "Ion",
            Self::Dorian => "Dor",
            Self::Phrygian => "Phr",
            Self::Lydian => "Lyd",
            Self::Mixolydian => "Mix",
            Self::Aeolian => "Aeo",
            Self::Locrian => "Loc",
            Self::HarmonicMinor => "HMi",
        }
    }

    /// Determine if the note belongs to this scale when rooted on `root_key` (a pitch class, 0 = C).
    pub fn contains(&self, root_key: u8, note: Note) -> bool {
        self.intervals().contains(&degree_offset(root_key, note))
    }

    /// Moves a note by a number of scale degrees (negative moves down).
    ///
    /// Notes outside the scale are first snapped down to the nearest scale tone. Returns `None` when the result
    /// falls outside the MIDI note range.
    pub fn step(&self, root_key: u8, note: Note, steps: i8) -> Option<Note> {
        if steps == 0 {
            return Some(note);
        }

        let intervals = self.intervals();
        let offset = degree_offset(root_key, note);
        // the root interval is always 0, so there is always a degree at or below the offset
        let degree = intervals.iter().rposition(|&i| i <= offset).unwrap_or(0);
        let snapped = i16::from(note as u8) - i16::from(offset - intervals[degree]);

        let target = degree as i16 + i16::from(steps);
        let octaves = target.div_euclid(7);
        let target_degree = target.rem_euclid(7) as usize;
        let moved = snapped - i16::from(intervals[degree])
            + i16::from(intervals[target_degree])
            + octaves * SEMITONES;

        note_from_i16(moved)
    }
}

/// Selects how far up the stack of thirds chords are built.
#[derive(Debug, Default, Clone, Copy, ToPrimitive, FromPrimitive, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChordExtension {
    /// Root, third and fifth.
    #[default]
    Triad,
    /// Triad plus the seventh.
    Seventh,
}
impl CycleConfig for ChordExtension {}

/// Harmonic structures the chord engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChordType {
    /// Major triad.
    Major,
    /// Minor triad.
    Minor,
    /// Diminished triad.
    Diminished,
    /// Augmented triad.
    Augmented,
    /// Major triad with a major seventh.
    MajorSeventh,
    /// Minor triad with a minor seventh.
    MinorSeventh,
    /// Major triad with a minor seventh.
    DominantSeventh,
    /// Diminished triad with a minor seventh, a.k.a. minor seventh flat five.
    HalfDiminished,
    /// Diminished triad with a diminished seventh.
    DiminishedSeventh,
    /// Minor triad with a major seventh.
    MinorMajorSeventh,
    /// Augmented triad with a major seventh.
    AugmentedMajorSeventh,
}

impl ChordType {
    /// Semitone offsets of the chord tones from the chord root, lowest first.
    pub fn intervals(&self) -> &'static [u8] {
        match self {
            Self::Major => &[0, 4, 7],
            Self::Minor => &[0, 3, 7],
            Self::Diminished => &[0, 3, 6],
            Self::Augmented => &[0, 4, 8],
            Self::MajorSeventh => &[0, 4, 7, 11],
            Self::MinorSeventh => &[0, 3, 7, 10],
            Self::DominantSeventh => &[0, 4, 7, 10],
            Self::HalfDiminished => &[0, 3, 6, 10],
            Self::DiminishedSeventh => &[0, 3, 6, 9],
            Self::MinorMajorSeventh => &[0, 3, 7, 11],
            Self::AugmentedMajorSeventh => &[0, 4, 8, 11],
        }
    }

    /// Chord symbol suffix, e.g. `m7` for [`ChordType::MinorSeventh`].
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Major => "",
            Self::Minor => "m",
            Self::Diminished => "dim",
            Self::Augmented => "+",
            Self::MajorSeventh => "maj7",
            Self::MinorSeventh => "m7",
            Self::DominantSeventh => "7",
            Self::HalfDiminished => "m7b5",
            Self::DiminishedSeventh => "dim7",
            Self::MinorMajorSeventh => "mM7",
            Self::AugmentedMajorSeventh => "+M7",
        }
    }
}

const NONE: Option<ChordType> = None;
const MAJ: Option<ChordType> = Some(ChordType::Major);
const MIN: Option<ChordType> = Some(ChordType::Minor);
const DIM: Option<ChordType> = Some(ChordType::Diminished);
const AUG: Option<ChordType> = Some(ChordType::Augmented);
const MAJ7: Option<ChordType> = Some(ChordType::MajorSeventh);
const MIN7: Option<ChordType> = Some(ChordType::MinorSeventh);
const DOM7: Option<ChordType> = Some(ChordType::DominantSeventh);
const HDIM: Option<ChordType> = Some(ChordType::HalfDiminished);
const DIM7: Option<ChordType> = Some(ChordType::DiminishedSeventh);
const MMAJ7: Option<ChordType> = Some(ChordType::MinorMajorSeventh);
const AMAJ7: Option<ChordType> = Some(ChordType::AugmentedMajorSeventh);

// rows follow the `Scale` discriminants; columns are semitones above the root key
const TRIADS: [[Option<ChordType>; 12]; 8] = [
    // Ionian
    [MAJ, NONE, MIN, NONE, MIN, MAJ, NONE, MAJ, NONE, MIN, NONE, DIM],
    // Dorian
    [MIN, NONE, MIN, MAJ, NONE, MAJ, NONE, MIN, NONE, DIM, MAJ, NONE],
    // Phrygian
    [MIN, MAJ, NONE, MAJ, NONE, MIN, NONE, DIM, MAJ, NONE, MIN, NONE],
    // Lydian
    [MAJ, NONE, MAJ, NONE, MIN, NONE, DIM, MAJ, NONE, MIN, NONE, MIN],
    // Mixolydian
    [MAJ, NONE, MIN, NONE, DIM, MAJ, NONE, MIN, NONE, MIN, MAJ, NONE],
    // Aeolian
    [MIN, NONE, DIM, MAJ, NONE, MIN, NONE, MIN, MAJ, NONE, MAJ, NONE],
    // Locrian
    [DIM, MAJ, NONE, MIN, NONE, MIN, MAJ, NONE, MAJ, NONE, MIN, NONE],
    // Harmonic minor
    [MIN, NONE, DIM, AUG, NONE, MIN, NONE, MAJ, MAJ, NONE, NONE, DIM],
];

const SEVENTHS: [[Option<ChordType>; 12]; 8] = [
    // Ionian
    [MAJ7, NONE, MIN7, NONE, MIN7, MAJ7, NONE, DOM7, NONE, MIN7, NONE, HDIM],
    // Dorian
    [MIN7, NONE, MIN7, MAJ7, NONE, DOM7, NONE, MIN7, NONE, HDIM, MAJ7, NONE],
    // Phrygian
    [MIN7, MAJ7, NONE, DOM7, NONE, MIN7, NONE, HDIM, MAJ7, NONE, MIN7, NONE],
    // Lydian
    [MAJ7, NONE, DOM7, NONE, MIN7, NONE, HDIM, MAJ7, NONE, MIN7, NONE, MIN7],
    // Mixolydian
    [DOM7, NONE, MIN7, NONE, HDIM, MAJ7, NONE, MIN7, NONE, MIN7, MAJ7, NONE],
    // Aeolian
    [MIN7, NONE, HDIM, MAJ7, NONE, MIN7, NONE, MIN7, MAJ7, NONE, DOM7, NONE],
    // Locrian
    [HDIM, MAJ7, NONE, MIN7, NONE, MIN7, MAJ7, NONE, DOM7, NONE, MIN7, NONE],
    // Harmonic minor
    [MMAJ7, NONE, HDIM, AMAJ7, NONE, MIN7, NONE, DOM7, MAJ7, NONE, NONE, DIM7],
];

/// Returns the chord occurring naturally on the pressed note's degree of `scale` rooted on `root_key` (a pitch class,
/// 0 = C), or `None` if the pressed note isn't a degree of the scale.
///
/// `None` is not an error: callers should treat the note as an ordinary single note.
pub fn get_chord(
    scale: Scale,
    extension: ChordExtension,
    root_key: u8,
    pressed: Note,
) -> Option<ChordType> {
    let table = match extension {
        ChordExtension::Triad => &TRIADS,
        ChordExtension::Seventh => &SEVENTHS,
    };
    table[scale as usize][usize::from(degree_offset(root_key, pressed))]
}

/// Maps a MIDI note onto the chord engine's internal octave numbering, where octave 0 spans MIDI notes 36-47.
///
/// Computed as `floor((note - 24) / 12) - 1`.
pub fn chord_octave(note: Note) -> i8 {
    let octave = (i16::from(note as u8) - 24).div_euclid(SEMITONES) - 1;
    octave as i8
}

/// Spells a chord out as notes, rooted on `pitch_class` (0 = C) in the given internal octave.
///
/// Tones that would fall outside the MIDI note range are left out.
pub fn expand_chord(chord: ChordType, octave: i8, pitch_class: u8) -> impl Iterator<Item = Note> {
    let base = OCTAVE_ZERO_NOTE + i16::from(octave) * SEMITONES + i16::from(pitch_class % 12);
    chord
        .intervals()
        .iter()
        .filter_map(move |&interval| note_from_i16(base + i16::from(interval)))
}

/// Spells out the chord on the pressed note, placing its root on the pressed note itself.
///
/// Returns `None` if the pressed note carries no chord in this scale.
pub fn chord_for_note(
    scale: Scale,
    extension: ChordExtension,
    root_key: u8,
    pressed: Note,
) -> Option<impl Iterator<Item = Note>> {
    let chord = get_chord(scale, extension, root_key, pressed)?;
    Some(expand_chord(chord, chord_octave(pressed), pressed as u8 % 12))
}

/// Semitones the note lies above the most recent occurrence of the root key.
fn degree_offset(root_key: u8, note: Note) -> u8 {
    (i16::from(note as u8) - i16::from(root_key % 12)).rem_euclid(SEMITONES) as u8
}

fn note_from_i16(value: i16) -> Option<Note> {
    u8::try_from(value)
        .ok()
        .filter(|&n| n <= 127)
        .map(|n| Note::from(wmidi::U7::from_u8_lossy(n)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const C: u8 = 0;
    const A: u8 = 9;

    fn notes<const N: usize>(iter: impl Iterator<Item = Note>) -> [Option<Note>; N] {
        let mut iter = iter;
        core::array::from_fn(|_| iter.next())
    }

    #[test]
    fn aeolian_tonic_seventh_is_minor_seventh() {
        assert_eq!(
            Some(ChordType::MinorSeventh),
            get_chord(Scale::Aeolian, ChordExtension::Seventh, A, Note::A3),
            "Expected left but got right"
        );
    }

    #[test]
    fn non_diatonic_note_has_no_chord() {
        // C# is not part of C major, and F# is not part of A minor
        assert_eq!(None, get_chord(Scale::Ionian, ChordExtension::Triad, C, Note::Db4));
        assert_eq!(None, get_chord(Scale::Aeolian, ChordExtension::Seventh, A, Note::Gb4));
    }

    #[test]
    fn ionian_triads() {
        let expected = [
            (Note::C4, ChordType::Major),
            (Note::D4, ChordType::Minor),
            (Note::E4, ChordType::Minor),
            (Note::F4, ChordType::Major),
            (Note::G4, ChordType::Major),
            (Note::A4, ChordType::Minor),
            (Note::B4, ChordType::Diminished),
        ];
        for (note, chord) in expected {
            assert_eq!(
                Some(chord),
                get_chord(Scale::Ionian, ChordExtension::Triad, C, note),
                "Unexpected chord on {}",
                note.to_str()
            );
        }
    }

    #[test]
    fn dominant_seventh_on_fifth_degree() {
        // G is the fifth degree of C major and D the fifth of G major
        assert_eq!(
            Some(ChordType::DominantSeventh),
            get_chord(Scale::Ionian, ChordExtension::Seventh, C, Note::G2)
        );
        assert_eq!(
            Some(ChordType::DominantSeventh),
            get_chord(Scale::Ionian, ChordExtension::Seventh, 7, Note::D5)
        );
    }

    #[test]
    fn harmonic_minor_has_augmented_mediant() {
        assert_eq!(
            Some(ChordType::Augmented),
            get_chord(Scale::HarmonicMinor, ChordExtension::Triad, A, Note::C4)
        );
        assert_eq!(
            Some(ChordType::DiminishedSeventh),
            get_chord(Scale::HarmonicMinor, ChordExtension::Seventh, A, Note::Ab4)
        );
    }

    #[test]
    fn octave_numbering() {
        assert_eq!(0, chord_octave(Note::C2));
        assert_eq!(0, chord_octave(Note::B2));
        assert_eq!(2, chord_octave(Note::C4));
        assert_eq!(-1, chord_octave(Note::Gb1));
        assert_eq!(-3, chord_octave(Note::CMinus1));
    }

    #[test]
    fn expansion_roots_chord_on_pressed_note() {
        for raw in 0..=127_u8 {
            let note = Note::from(wmidi::U7::from_u8_lossy(raw));
            let root = expand_chord(ChordType::Major, chord_octave(note), raw % 12).next();
            assert_eq!(Some(note), root, "Chord should be rooted on {}", raw);
        }
    }

    #[test]
    fn c_minor_seventh_from_middle_c() {
        let chord = chord_for_note(Scale::Aeolian, ChordExtension::Seventh, C, Note::C4).unwrap();
        assert_eq!(
            [Some(Note::C4), Some(Note::Eb4), Some(Note::G4), Some(Note::Bb4), None],
            notes::<5>(chord),
            "Expected left but got right"
        );
    }

    #[test]
    fn expansion_drops_notes_above_range() {
        // G9 is MIDI note 127, so only the root survives
        let chord = expand_chord(ChordType::Major, chord_octave(Note::G9), 7);
        assert_eq!([Some(Note::G9), None], notes::<2>(chord));
    }

    #[test]
    fn scale_contains() {
        assert!(Scale::Ionian.contains(C, Note::E4));
        assert!(!Scale::Ionian.contains(C, Note::Eb4));
        assert!(Scale::Dorian.contains(2, Note::C4));
    }

    #[test]
    fn step_by_scale_degrees() {
        // C major: E + 2 degrees = G, E - 3 degrees = B below
        assert_eq!(Some(Note::G4), Scale::Ionian.step(C, Note::E4, 2));
        assert_eq!(Some(Note::B3), Scale::Ionian.step(C, Note::E4, -3));
        // a full seven degrees is an octave
        assert_eq!(Some(Note::A5), Scale::Aeolian.step(A, Note::A4, 7));
    }

    #[test]
    fn step_snaps_foreign_notes_down() {
        // Eb is not in C major; it snaps to D, and one degree up from D is E
        assert_eq!(Some(Note::E4), Scale::Ionian.step(C, Note::Eb4, 1));
    }

    #[test]
    fn step_out_of_range() {
        assert_eq!(None, Scale::Ionian.step(C, Note::C9, 14));
        assert_eq!(None, Scale::Ionian.step(C, Note::CMinus1, -1));
    }
}
