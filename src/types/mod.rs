//! Value types for light state and control.

mod color;
mod power;

pub use color::Hsbk;
pub use power::PowerState;
