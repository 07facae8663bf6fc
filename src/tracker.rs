//! Readiness bookkeeping.
//!
//! The tracker never invokes a continuation itself: `bind` and `notify`
//! hand satisfied waiters back to the caller, which runs them once no
//! borrow of the tracker is held. Continuations can therefore declare,
//! bind and notify again without disturbing an ongoing pass.

use std::collections::{HashMap, HashSet};

use crate::namespace::Namespace;

pub(crate) type Continuation = Box<dyn FnOnce(&Namespace)>;

/// A continuation waiting on a shrinking set of module names.
pub(crate) struct Waiter {
    owner: String,
    remaining: Vec<String>,
    continuation: Continuation,
}

impl Waiter {
    pub(crate) fn new(owner: String, remaining: Vec<String>, continuation: Continuation) -> Self {
        Self {
            owner,
            remaining,
            continuation,
        }
    }

    pub(crate) fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn remaining(&self) -> &[String] {
        &self.remaining
    }

    /// Drop `name` from the remaining set. True once nothing remains.
    pub(crate) fn observe(&mut self, name: &str) -> bool {
        self.remaining.retain(|remaining| remaining != name);
        self.remaining.is_empty()
    }

    pub(crate) fn run(self, namespace: &Namespace) {
        (self.continuation)(namespace)
    }
}

pub(crate) enum Binding {
    /// Every dependency was already ready; the waiter is handed back to run.
    Satisfied(Waiter),
    /// The waiter is parked on these names.
    Waiting(Vec<String>),
}

#[derive(Default)]
pub(crate) struct ReadinessTracker {
    ready: HashSet<String>,
    defined: HashSet<String>,
    failed: HashMap<String, String>,
    waiters: Vec<Waiter>,
}

impl ReadinessTracker {
    /// Mark `name` as declared but not yet constructed. False when the name
    /// is already declared or bound.
    pub(crate) fn mark_defined(&mut self, name: &str) -> bool {
        if self.ready.contains(name) || self.defined.contains(name) {
            return false;
        }
        self.failed.remove(name);
        self.defined.insert(name.to_string())
    }

    /// Mark `name` as bound. Idempotent: false when it already was.
    pub(crate) fn mark_ready(&mut self, name: &str) -> bool {
        self.defined.remove(name);
        self.failed.remove(name);
        self.ready.insert(name.to_string())
    }

    pub(crate) fn mark_failed(&mut self, name: &str, reason: String) {
        self.defined.remove(name);
        if !self.ready.contains(name) {
            self.failed.insert(name.to_string(), reason);
        }
    }

    pub(crate) fn is_ready(&self, name: &str) -> bool {
        self.ready.contains(name)
    }

    pub(crate) fn is_defined(&self, name: &str) -> bool {
        self.defined.contains(name)
    }

    pub(crate) fn failure(&self, name: &str) -> Option<&str> {
        self.failed.get(name).map(String::as_str)
    }

    pub(crate) fn waiters(&self) -> &[Waiter] {
        &self.waiters
    }

    /// Park `waiter` unless every name it needs is already ready.
    pub(crate) fn bind(&mut self, mut waiter: Waiter) -> Binding {
        let ready = &self.ready;
        waiter.remaining.retain(|name| !ready.contains(name));
        if waiter.remaining.is_empty() {
            return Binding::Satisfied(waiter);
        }
        let missing = waiter.remaining.clone();
        self.waiters.push(waiter);
        Binding::Waiting(missing)
    }

    /// Announce `name` to every parked waiter and take out the ones it
    /// completed, in binding order.
    pub(crate) fn notify(&mut self, name: &str) -> Vec<Waiter> {
        let mut completed = Vec::new();
        let mut index = 0;
        while index < self.waiters.len() {
            if self.waiters[index].observe(name) {
                completed.push(self.waiters.remove(index));
            } else {
                index += 1;
            }
        }
        completed
    }

    /// Take out every parked waiter that still needs `name`.
    pub(crate) fn abandon(&mut self, name: &str) -> Vec<Waiter> {
        let mut abandoned = Vec::new();
        let mut index = 0;
        while index < self.waiters.len() {
            if self.waiters[index].remaining.iter().any(|n| n == name) {
                abandoned.push(self.waiters.remove(index));
            } else {
                index += 1;
            }
        }
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter(owner: &str, names: &[&str]) -> Waiter {
        let remaining = names.iter().map(|n| n.to_string()).collect();
        Waiter::new(owner.to_string(), remaining, Box::new(|_: &Namespace| {}))
    }

    fn owners(waiters: &[Waiter]) -> Vec<&str> {
        waiters.iter().map(Waiter::owner).collect()
    }

    #[test]
    fn notify_completes_waiters_in_binding_order() {
        let mut tracker = ReadinessTracker::default();
        for (owner, names) in [("a", &["x", "y"][..]), ("b", &["x"][..]), ("c", &["y"][..])] {
            assert!(matches!(tracker.bind(waiter(owner, names)), Binding::Waiting(_)));
        }

        tracker.mark_ready("x");
        assert_eq!(owners(&tracker.notify("x")), ["b"]);
        tracker.mark_ready("y");
        assert_eq!(owners(&tracker.notify("y")), ["a", "c"]);
        assert!(tracker.waiters().is_empty());
        assert!(tracker.notify("y").is_empty());
    }

    #[test]
    fn bind_skips_names_already_ready() {
        let mut tracker = ReadinessTracker::default();
        tracker.mark_ready("x");
        assert!(matches!(tracker.bind(waiter("a", &["x"])), Binding::Satisfied(_)));
        match tracker.bind(waiter("b", &["x", "y"])) {
            Binding::Waiting(missing) => assert_eq!(missing, ["y"]),
            Binding::Satisfied(_) => panic!("b still needs y"),
        }
    }

    #[test]
    fn defined_ready_and_failed_states() {
        let mut tracker = ReadinessTracker::default();
        assert!(tracker.mark_defined("m"));
        assert!(!tracker.mark_defined("m"));
        assert!(tracker.is_defined("m"));

        tracker.mark_failed("m", "boom".to_string());
        assert!(!tracker.is_defined("m"));
        assert_eq!(tracker.failure("m"), Some("boom"));

        assert!(tracker.mark_ready("m"));
        assert!(!tracker.mark_ready("m"));
        assert_eq!(tracker.failure("m"), None);
        assert!(!tracker.mark_defined("m"));
    }

    #[test]
    fn abandon_takes_only_waiters_on_the_name() {
        let mut tracker = ReadinessTracker::default();
        tracker.bind(waiter("a", &["x"]));
        tracker.bind(waiter("b", &["y"]));
        tracker.bind(waiter("c", &["y", "x"]));

        assert_eq!(owners(&tracker.abandon("x")), ["a", "c"]);
        assert_eq!(owners(tracker.waiters()), ["b"]);
    }
}
