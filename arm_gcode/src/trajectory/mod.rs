//! Named G-code programs stored as files, and their playback.

pub mod naming;

mod store;
pub use store::*;

mod player;
pub use player::*;
