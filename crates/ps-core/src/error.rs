//! Error types for PSelector

use thiserror::Error;

/// PSelector error type
///
/// Every variant is a generation-time failure. Generation aborts on the first
/// one and produces no partial output.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// Missing required field or otherwise invalid configuration
    #[error("Validation error: {0}")]
    ConfigValidation(String),

    /// Two descriptors share a name
    #[error("duplicate definition of '{name}' ({first} and {second})")]
    DuplicateDefinition {
        /// Colliding name.
        name: String,
        /// Kind of the descriptor registered first.
        first: &'static str,
        /// Kind of the descriptor that collided.
        second: &'static str,
    },

    /// A descriptor references another descriptor that does not exist
    #[error("{kind} '{from}' references unknown {target_kind} '{target}'")]
    UnresolvedReference {
        /// Kind of the referencing descriptor.
        kind: &'static str,
        /// Referencing descriptor name.
        from: String,
        /// Kind of the missing descriptor.
        target_kind: &'static str,
        /// Missing name.
        target: String,
    },

    /// A reference chain revisits a descriptor already being resolved
    #[error("reference cycle: {}", .path.join(" -> "))]
    Cycle {
        /// Names on the active resolution stack, ending with the revisited one.
        path: Vec<String>,
    },

    /// An expression references a symbol that is not defined in its scope
    #[error("undefined reference '{symbol}' in {context}")]
    UndefinedReference {
        /// Missing symbol.
        symbol: String,
        /// Where the symbol was used.
        context: String,
    },

    /// Configuration references a particle role absent from the topology
    #[error("particle role '{role}' referenced by {context} is not in the reaction topology")]
    TopologyMismatch {
        /// Missing role name.
        role: String,
        /// Where the role was referenced.
        context: String,
    },
}

impl Error {
    /// Shorthand for [`Error::ConfigValidation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::ConfigValidation(msg.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
