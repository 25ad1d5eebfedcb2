//! Declarative arpeggiator patterns.
//!
//! A pattern is a short (at most [`MAX_STEPS`]) sequence of [`StepEvent`]s played on a sixteenth-note grid. Patterns
//! don't name notes; they name note-stack slots, so the same pattern works for whatever happens to be held.

/// Maximum number of steps in a pattern.
pub const MAX_STEPS: usize = 16;

/// What a pattern step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepKind {
    /// Plays the selected note for one step.
    Normal,
    /// Plays the selected note starting a little early and lasting a little longer, overlapping its neighbour.
    Tie,
    /// Plays every held note at once.
    Chord,
    /// Sustains whatever sounded on the previous step for one more step.
    Rest,
    /// Silence.
    Off,
    /// Plays a randomly chosen held note.
    Random,
}

/// One step of an [`ArpPattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StepEvent {
    /// What the step does.
    pub kind: StepKind,
    /// One-based note-stack slot sampled by [`StepKind::Normal`] and [`StepKind::Tie`] steps.
    pub key_select: u8,
    /// Octaves to shift the note by.
    pub octave: i8,
    /// Scale degrees to shift the note by, within the selected mode.
    pub scale_step: i8,
}

impl StepEvent {
    const fn new(kind: StepKind, key_select: u8) -> Self {
        Self {
            kind,
            key_select,
            octave: 0,
            scale_step: 0,
        }
    }

    /// A [`StepKind::Normal`] step on the given slot.
    pub const fn norm(key_select: u8) -> Self {
        Self::new(StepKind::Normal, key_select)
    }

    /// A [`StepKind::Tie`] step on the given slot.
    pub const fn tie(key_select: u8) -> Self {
        Self::new(StepKind::Tie, key_select)
    }

    /// A [`StepKind::Chord`] step.
    pub const fn chord() -> Self {
        Self::new(StepKind::Chord, 0)
    }

    /// A [`StepKind::Rest`] step.
    pub const fn rest() -> Self {
        Self::new(StepKind::Rest, 0)
    }

    /// A [`StepKind::Off`] step.
    pub const fn off() -> Self {
        Self::new(StepKind::Off, 0)
    }

    /// A [`StepKind::Random`] step.
    pub const fn random() -> Self {
        Self::new(StepKind::Random, 0)
    }

    /// Shifts the step by whole octaves.
    pub const fn octave(self, octave: i8) -> Self {
        Self { octave, ..self }
    }

    /// Shifts the step by scale degrees.
    pub const fn scale_step(self, scale_step: i8) -> Self {
        Self { scale_step, ..self }
    }
}

/// An immutable, named sequence of steps.
#[derive(Debug, PartialEq, Eq)]
pub struct ArpPattern {
    name: &'static str,
    steps: &'static [StepEvent],
}

impl ArpPattern {
    /// Getter.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The pattern's steps, never more than [`MAX_STEPS`].
    pub fn steps(&self) -> &'static [StepEvent] {
        self.steps
    }

    /// Number of steps before the pattern repeats.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always `false` for built-in patterns.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

use StepEvent as S;

/// The built-in pattern table, selected by index.
pub static PATTERNS: [ArpPattern; 11] = [
    ArpPattern {
        name: "Up",
        steps: &[S::norm(1), S::norm(2), S::norm(3), S::norm(4)],
    },
    ArpPattern {
        name: "Down",
        steps: &[S::norm(4), S::norm(3), S::norm(2), S::norm(1)],
    },
    ArpPattern {
        name: "UpDn",
        steps: &[
            S::norm(1),
            S::norm(2),
            S::norm(3),
            S::norm(4),
            S::norm(3),
            S::norm(2),
        ],
    },
    ArpPattern {
        name: "UpTie",
        steps: &[S::norm(1), S::tie(2), S::norm(3), S::tie(4)],
    },
    ArpPattern {
        name: "Stab",
        steps: &[
            S::chord(),
            S::off(),
            S::off(),
            S::chord(),
            S::off(),
            S::off(),
            S::chord(),
            S::off(),
        ],
    },
    ArpPattern {
        name: "Pad",
        steps: &[
            S::chord(),
            S::rest(),
            S::rest(),
            S::rest(),
            S::chord(),
            S::rest(),
            S::off(),
            S::off(),
        ],
    },
    ArpPattern {
        name: "Oct",
        steps: &[
            S::norm(1),
            S::norm(1).octave(1),
            S::norm(2),
            S::norm(2).octave(1),
            S::norm(3),
            S::norm(3).octave(1),
            S::norm(4),
            S::norm(4).octave(1),
        ],
    },
    ArpPattern {
        name: "Albrt",
        steps: &[
            S::norm(1),
            S::norm(3),
            S::norm(2),
            S::norm(3),
            S::norm(1),
            S::norm(3),
            S::norm(2),
            S::norm(3),
        ],
    },
    ArpPattern {
        name: "Walk",
        steps: &[
            S::norm(1),
            S::norm(1).scale_step(1),
            S::norm(1).scale_step(2),
            S::norm(1).scale_step(3),
            S::norm(1).scale_step(4),
            S::norm(1).scale_step(3),
            S::norm(1).scale_step(2),
            S::norm(1).scale_step(1),
        ],
    },
    ArpPattern {
        name: "Pedal",
        steps: &[
            S::norm(1).octave(-1),
            S::norm(2),
            S::norm(1).octave(-1),
            S::norm(3),
            S::norm(1).octave(-1),
            S::norm(4),
            S::norm(1).octave(-1),
            S::norm(3),
            S::norm(1).octave(-1),
            S::norm(2),
            S::norm(1).octave(-1),
            S::norm(3),
            S::norm(1).octave(-1),
            S::norm(4),
            S::tie(3),
            S::rest(),
        ],
    },
    ArpPattern {
        name: "Rand",
        steps: &[
            S::random(),
            S::random(),
            S::random(),
            S::random(),
            S::random(),
            S::random(),
            S::random(),
            S::random(),
        ],
    },
];

/// Looks up a built-in pattern.
pub fn pattern(index: usize) -> Option<&'static ArpPattern> {
    PATTERNS.get(index)
}
