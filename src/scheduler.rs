//! Deferral and ordering of declaration starts until the ready signal.

use std::fmt;

/// Ordering key for buffered starts; lower values start first and ties keep
/// insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u32);

impl Priority {
    /// Base for module declarations.
    pub const DEFINITION: u32 = 0;
    /// Base for dependency requests, which start after every declaration.
    pub const REQUEST: u32 = 100_000;

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Declarations with fewer dependencies start earlier.
    pub fn definition(dependencies: usize) -> Self {
        Self(Self::DEFINITION.saturating_add(saturate(dependencies)))
    }

    pub fn request(dependencies: usize) -> Self {
        Self(Self::REQUEST.saturating_add(saturate(dependencies)))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

fn saturate(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Entry<S> {
    priority: Priority,
    sequence: u64,
    owner: String,
    start: S,
}

/// Buffer of start actions, drained once when the environment is ready.
///
/// Once fired the scheduler stays open: later starts are handed straight
/// back to the caller instead of being buffered.
pub(crate) struct StartupScheduler<S> {
    buffer: Vec<Entry<S>>,
    sequence: u64,
    fired: bool,
}

impl<S> Default for StartupScheduler<S> {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            sequence: 0,
            fired: false,
        }
    }
}

impl<S> StartupScheduler<S> {
    /// Buffer `start`, or return it when the ready signal has already fired.
    pub(crate) fn schedule(&mut self, owner: String, priority: Priority, start: S) -> Option<S> {
        if self.fired {
            return Some(start);
        }
        self.buffer.push(Entry {
            priority,
            sequence: self.sequence,
            owner,
            start,
        });
        self.sequence += 1;
        None
    }

    /// Fire the ready signal, returning the buffered starts in drain order.
    /// `None` if it already fired.
    pub(crate) fn fire(&mut self) -> Option<Vec<(String, S)>> {
        if self.fired {
            return None;
        }
        self.fired = true;
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.sort_by_key(|entry| (entry.priority, entry.sequence));
        Some(
            buffer
                .into_iter()
                .map(|entry| (entry.owner, entry.start))
                .collect(),
        )
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.fired
    }

    /// Buffered owners and priorities, in the order they would drain.
    pub(crate) fn queued(&self) -> Vec<(String, Priority)> {
        let mut entries: Vec<_> = self
            .buffer
            .iter()
            .map(|entry| (entry.priority, entry.sequence, entry.owner.clone()))
            .collect();
        entries.sort();
        entries
            .into_iter()
            .map(|(priority, _, owner)| (owner, priority))
            .collect()
    }
}
