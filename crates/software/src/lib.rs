//! This crate contains architecture-agnostic logic for Organum, a MIDI controller for velocity-sensing keyboards and
//! pedalboards. It turns raw readings of a break/make key matrix into MIDI notes, routes them through keyboard splits,
//! and optionally replaces them with chords and arpeggios played in time with an internal or external
//! [MIDI](https://midi.org/midi-1-0) clock.
//!
//! Nothing here touches hardware: the firmware feeds in matrix readings, timer ticks and received MIDI, and supplies
//! implementations of [`output::MidiOutput`] and [`configuration::Storage`].

#![deny(missing_docs)]
#![no_std]

// must come first so that its macros are visible to the modules below
mod fmt;

pub mod arp;
pub mod chord;
pub mod clock;
pub mod configuration;
pub mod controller;
pub mod output;
pub mod scanner;
pub mod transport;
pub mod velocity;
pub mod zone;
