use thiserror::Error;

/// Errors raised by the namespace registry.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Module '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("Invalid factory for '{name}': {reason}")]
    InvalidFactoryType { name: String, reason: String },

    #[error("Module '{0}' is already defined")]
    DuplicateDefinition(String),

    /// Duplicate at the global-alias level.
    #[error("Global alias '{0}' is already bound")]
    DuplicateAlias(String),

    #[error("Dependency '{dependency}' of '{module}' is not registered")]
    MissingDependency { module: String, dependency: String },

    #[error("Property '{property}' not found in '{module}'")]
    PropertyNotFound { module: String, property: String },

    #[error("Unable to read property '{property}' of function module '{module}'")]
    InvalidPropertyAccess { module: String, property: String },

    #[error("Module '{0}' not found")]
    NotFound(String),

    #[error("Failed to load '{name}': {source}")]
    LoadFailure {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to construct '{name}': {source}")]
    Construction {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Unresolvable dependency graph:\n{0}")]
    Unresolvable(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
