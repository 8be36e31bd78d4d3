//! The poll-with-timeout primitive shared by the engine and gateway crates.

pub mod poll;

pub use poll::{PollError, PollOptions, PollOutcome, poll_with_timeout};
