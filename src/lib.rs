//! Composable Namespace
//!
//! A dependency-resolving module registry: modules are declared under dotted
//! names with the modules they use and the mixins they extend, and each one
//! is constructed once everything it depends on has been bound. Undeclared
//! dependencies can be autoloaded from definition files.

pub use definition::{DefinitionFile, ModuleDefinition};
pub use diagnostics::{Diagnosis, Reason, UnresolvedDependency};
pub use error::{Error, Result};
pub use graph::DependencyGraph;
pub use loader::{AutoloadLocation, AutoloadMap, FileLoader, LoadFailurePolicy, LoadRequest, Loader};
pub use namespace::{Completion, Definition, Failure, Namespace, NamespaceBuilder, Pending};
pub use registry::Registry;
pub use scheduler::Priority;
pub use types::{Dependency, DependencyKind, Factory, Function, Object, Value, is, uses};

pub mod definition;
pub mod diagnostics;
pub mod error;
pub mod graph;
pub mod loader;
pub mod mixin;
pub mod namespace;
pub mod registry;
pub mod resolver;
pub mod scheduler;
mod tracker;
pub mod types;
