//! This module contains both user-configurable settings (implemented as enums and plain structs) and traits to make them
//! easier to work with in code.
//!
//! Settings are explicitly owned values handed to the components that need them; nothing here is global. The
//! [`persistence`](Settings::load_or_default) boundary turns them into a fixed-size block and back.

mod arp;
pub use arp::*;

mod keyboard;
pub use keyboard::*;

mod persistence;
pub use persistence::*;

use num_traits::{FromPrimitive, ToPrimitive};

/// A trait which allows infinite cycling of an enum's variants.
///
/// Useful for pushbutton user interfaces, allowing presses to advance from the current to the next variant,
/// cycling back to the beginning when all variants have been exhausted.
pub trait CycleConfig {
    /// Return the next variant, cycling back to the beginning as needed.
    fn cycle(self) -> Self
    where
        Self: FromPrimitive + ToPrimitive + Sized,
    {
        let index = self.to_u8().unwrap_or(u8::MAX);
        match <Self as FromPrimitive>::from_u8(index.wrapping_add(1)) {
            Some(new_selection) => new_selection,
            None => match FromPrimitive::from_u8(0) {
                Some(first) => first,
                // only reachable for an enum whose first discriminant isn't 0
                None => self,
            },
        }
    }
}
