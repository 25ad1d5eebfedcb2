//! The tick-driven half of the arpeggiator: steps through the rendered pattern on a sixteenth-note grid and hands
//! each step's notes on to be scheduled.

use super::{SharedStepBuffer, StepNote};
use wmidi::{Note, U7};

/// Where the sequencer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequencerState {
    /// Nothing held; the step counter rests at 0.
    Idle,
    /// Stepping through the pattern.
    Running,
    /// The next grid tick restarts the pattern at step 0.
    Resynchronizing,
}

/// A note the sequencer wants played, with its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTrigger {
    /// Note to play.
    pub note: Note,
    /// Strike velocity.
    pub velocity: U7,
    /// Tick at which the note starts.
    pub due: u32,
    /// Duration in ticks.
    pub length: u16,
}

/// Tracks the step position against the tick counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequencer {
    state: SequencerState,
    step: usize,
    /// Tick treated as the start of step 0.
    origin: u32,
    ppqn: u16,
}

impl Sequencer {
    /// Constructs an idle [`Sequencer`] for the given clock resolution.
    pub fn new(ppqn: u16) -> Self {
        Self {
            state: SequencerState::Idle,
            step: 0,
            origin: 0,
            ppqn,
        }
    }

    /// Getter.
    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// The step most recently played (or about to be played first).
    pub fn step(&self) -> usize {
        self.step
    }

    /// Ticks per sixteenth note.
    pub fn grid(&self) -> u16 {
        (self.ppqn / 4).max(1)
    }

    /// Changes the clock resolution.
    pub fn set_ppqn(&mut self, ppqn: u16) {
        self.ppqn = ppqn;
    }

    /// Returns to [`SequencerState::Idle`] with the step counter at 0.
    pub fn reset(&mut self) {
        self.state = SequencerState::Idle;
        self.step = 0;
    }

    /// Restarts the pattern from step 0 on the next grid tick.
    pub fn resync(&mut self) {
        self.state = SequencerState::Resynchronizing;
        self.step = 0;
    }

    /// Aligns step 0 with tick 0, as after a transport Start.
    pub fn start(&mut self) {
        self.origin = 0;
        self.step = 0;
        if self.state == SequencerState::Resynchronizing {
            self.state = SequencerState::Running;
        }
    }

    /// Advances on a tick, calling `emit` for every note of the step reached. Returns the step played, if any.
    ///
    /// Only ticks on the sixteenth-note grid do anything.
    pub fn tick(
        &mut self,
        tick: u32,
        buffer: &SharedStepBuffer,
        mut emit: impl FnMut(StepTrigger),
    ) -> Option<usize> {
        if self.state == SequencerState::Idle {
            return None;
        }

        let grid = u32::from(self.grid());
        if tick % grid != 0 {
            return None;
        }

        // a song position pointer may move the clock behind the origin
        if self.state == SequencerState::Resynchronizing || tick < self.origin {
            self.origin = tick;
            self.state = SequencerState::Running;
        }

        buffer.read(|buffer| {
            let step_count = buffer.step_count();
            if step_count == 0 {
                return None;
            }

            self.step = ((tick - self.origin) / grid) as usize % step_count;
            for note in buffer.step(self.step).iter().filter(|n| n.is_active()) {
                emit(trigger(note, tick));
            }
            Some(self.step)
        })
    }
}

fn trigger(note: &StepNote, tick: u32) -> StepTrigger {
    let due = i64::from(tick) + i64::from(note.offset);
    StepTrigger {
        note: Note::from(note.note),
        velocity: note.velocity,
        due: due.max(0) as u32,
        length: note.length,
    }
}
