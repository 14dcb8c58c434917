#![forbid(unsafe_code)]

// Protocol module - event catalog, envelope codec and payload models

pub mod envelope;
pub mod events;
pub mod payloads;

pub use envelope::{decode, Frame, Inbound};
pub use events::{Action, EventKind, DEFAULT_WEIGHTS};
