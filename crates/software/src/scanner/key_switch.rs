use embassy_time::{Duration, Instant};

/// One of the two switches under a velocity-sensing key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Contact {
    /// Actuates first on the way down and restores last on the way up.
    Break,
    /// Actuates at the bottom of the key's travel.
    Make,
}

/// A debounced change of a key's sounding state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transition {
    /// The key went down; carries the break-to-make delay when one was measured.
    Press(Option<Duration>),
    /// The key came up; carries the make-to-break delay when one was measured.
    Release(Option<Duration>),
}

/// Debounce state of a single key.
///
/// A press is the break contact actuating followed by the make contact; the delay between them is the strike speed.
/// A release is the reverse. Edges that don't fit this order are contact bounce and are dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeySwitch {
    /// When the break contact actuated on the way down.
    break_at: Option<Instant>,
    /// When the make contact restored on the way up.
    make_at: Option<Instant>,
    sounding: bool,
}

impl KeySwitch {
    /// A released key with no pending edges.
    pub const fn new() -> Self {
        Self {
            break_at: None,
            make_at: None,
            sounding: false,
        }
    }

    /// Determine if the key's note is on.
    pub fn is_sounding(&self) -> bool {
        self.sounding
    }

    /// Feeds an edge of one contact. `actuated` is the contact's new state.
    pub fn contact(&mut self, contact: Contact, actuated: bool, now: Instant) -> Option<Transition> {
        match (contact, actuated, self.sounding) {
            (Contact::Break, true, false) if self.make_at.is_none() => {
                self.break_at = Some(now);
                None
            }
            (Contact::Make, true, false) => {
                let started = self.break_at.take()?;
                self.sounding = true;
                self.make_at = None;
                Some(Transition::Press(Some(now.saturating_duration_since(started))))
            }
            (Contact::Make, false, true) if self.break_at.is_none() => {
                self.make_at = Some(now);
                None
            }
            (Contact::Break, false, true) => {
                let delay = self.make_at.take().map(|ended| now.saturating_duration_since(ended));
                self.sounding = false;
                self.break_at = None;
                Some(Transition::Release(delay))
            }
            (Contact::Break, false, false) => {
                // the key came back up before reaching the make contact
                self.break_at = None;
                None
            }
            _ => None,
        }
    }

    /// Feeds the state of a key with a single switch.
    pub fn switch(&mut self, pressed: bool) -> Option<Transition> {
        if pressed == self.sounding {
            return None;
        }
        self.sounding = pressed;
        self.break_at = None;
        self.make_at = None;
        Some(if pressed {
            Transition::Press(None)
        } else {
            Transition::Release(None)
        })
    }

    /// Forgets every pending edge, returning whether the key was sounding.
    pub fn reset(&mut self) -> bool {
        let was_sounding = self.sounding;
        *self = Self::new();
        was_sounding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(micros: u64) -> Instant {
        Instant::from_micros(micros)
    }

    #[test]
    fn press_and_release() {
        let mut key = KeySwitch::new();
        assert_eq!(None, key.contact(Contact::Break, true, at(1_000)));
        assert_eq!(
            Some(Transition::Press(Some(Duration::from_micros(4_000)))),
            key.contact(Contact::Make, true, at(5_000)),
            "Expected left but got right"
        );
        assert!(key.is_sounding());

        assert_eq!(None, key.contact(Contact::Make, false, at(9_000)));
        assert_eq!(
            Some(Transition::Release(Some(Duration::from_micros(6_000)))),
            key.contact(Contact::Break, false, at(15_000)),
            "Expected left but got right"
        );
        assert!(!key.is_sounding());
    }

    #[test]
    fn make_without_break_is_bounce() {
        let mut key = KeySwitch::new();
        assert_eq!(None, key.contact(Contact::Make, true, at(1_000)));
        assert!(!key.is_sounding());
    }

    #[test]
    fn break_bounce_while_sounding() {
        let mut key = KeySwitch::new();
        key.contact(Contact::Break, true, at(0));
        key.contact(Contact::Make, true, at(3_000));
        assert_eq!(None, key.contact(Contact::Break, true, at(3_100)));
        assert_eq!(None, key.contact(Contact::Make, true, at(3_200)));
        assert!(key.is_sounding());
    }

    #[test]
    fn half_press_is_abandoned() {
        let mut key = KeySwitch::new();
        key.contact(Contact::Break, true, at(0));
        key.contact(Contact::Break, false, at(10_000));
        key.contact(Contact::Break, true, at(50_000));
        assert_eq!(
            Some(Transition::Press(Some(Duration::from_micros(2_000)))),
            key.contact(Contact::Make, true, at(52_000)),
            "The abandoned press shouldn't count towards the delay"
        );
    }

    #[test]
    fn release_without_make_timestamp() {
        let mut key = KeySwitch::new();
        key.contact(Contact::Break, true, at(0));
        key.contact(Contact::Make, true, at(3_000));
        assert_eq!(Some(Transition::Release(None)), key.contact(Contact::Break, false, at(9_000)));
    }

    #[test]
    fn single_switch() {
        let mut key = KeySwitch::new();
        assert_eq!(Some(Transition::Press(None)), key.switch(true));
        assert_eq!(None, key.switch(true));
        assert_eq!(Some(Transition::Release(None)), key.switch(false));
        assert_eq!(None, key.switch(false));
    }

    #[test]
    fn reset() {
        let mut key = KeySwitch::new();
        key.switch(true);
        assert!(key.reset());
        assert!(!key.reset());
    }
}
