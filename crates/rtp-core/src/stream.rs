//! Lifecycle shared by senders, receivers and relays.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Stream lifecycle: `Idle → Running → Halted`, with no way back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Idle,
    Running,
    Halted,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Idle => "idle",
            StreamState::Running => "running",
            StreamState::Halted => "halted",
        };
        f.write_str(s)
    }
}

/// Atomic holder for a [`StreamState`]
#[derive(Debug)]
pub(crate) struct StreamStateCell(AtomicU8);

impl StreamStateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub(crate) fn get(&self) -> StreamState {
        match self.0.load(Ordering::SeqCst) {
            0 => StreamState::Idle,
            1 => StreamState::Running,
            _ => StreamState::Halted,
        }
    }

    /// Idle → Running; false if the stream already left Idle
    pub(crate) fn try_start(&self) -> bool {
        self.0.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    /// Move to Halted; returns the previous state
    pub(crate) fn halt(&self) -> StreamState {
        match self.0.swap(2, Ordering::SeqCst) {
            0 => StreamState::Idle,
            1 => StreamState::Running,
            _ => StreamState::Halted,
        }
    }
}
