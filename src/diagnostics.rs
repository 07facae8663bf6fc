use std::fmt;

/// Why a waiter's dependency cannot become ready on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// Never declared, and no loader is configured to fetch it.
    Undeclared,
    /// The loader ran for the name but nothing declared it.
    NotProvidedByLoader,
    /// Loading or constructing the dependency failed.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDependency {
    pub module: String,
    pub dependency: String,
    pub reason: Reason,
}

/// Result of [`Namespace::diagnose`](crate::Namespace::diagnose).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnosis {
    pub unresolved: Vec<UnresolvedDependency>,
    /// Groups of declared modules waiting on each other, names sorted.
    pub cycles: Vec<Vec<String>>,
}

impl Diagnosis {
    pub fn is_clean(&self) -> bool {
        self.unresolved.is_empty() && self.cycles.is_empty()
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.unresolved {
            let why = match &entry.reason {
                Reason::Undeclared => "which is never declared".to_string(),
                Reason::NotProvidedByLoader => "which the loader did not provide".to_string(),
                Reason::Failed(message) => format!("which failed: {message}"),
            };
            writeln!(f, "- '{}' waits on '{}', {why}", entry.module, entry.dependency)?;
        }
        for cycle in &self.cycles {
            writeln!(f, "- Circular dependency between {}", cycle.join(", "))?;
        }
        Ok(())
    }
}
