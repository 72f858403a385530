use thiserror::Error;

/// Failures raised by the geometry kernel.
///
/// Every failing call leaves the document in the state it had before the call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    /// Malformed or degenerate geometry, unknown layer reference, or a
    /// mutation that the model's rules forbid.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The exclusive section is held by another writer and the caller asked
    /// not to wait for it.
    #[error("document is being modified by another caller")]
    Concurrency,
}

/// Failures of the modification engine and intersection routines.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("no boundary intersects the target")]
    NoIntersection,

    #[error("entities are parallel or coincident and have no finite intersection")]
    Parallel,

    #[error("{what} {value} is outside the feasible range (limit {max})")]
    Infeasible {
        what: &'static str,
        value: f64,
        max: f64,
    },

    #[error("offset failed: {0}")]
    Offset(String),

    #[error("{operation} is not supported for {kind}")]
    Unsupported {
        operation: &'static str,
        kind: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, KernelError>;

impl KernelError {
    pub fn validation(message: impl Into<String>) -> Self {
        KernelError::Validation(message.into())
    }

    pub fn entity_not_found(id: impl ToString) -> Self {
        KernelError::NotFound {
            kind: "entity",
            id: id.to_string(),
        }
    }

    pub fn layer_not_found(id: impl ToString) -> Self {
        KernelError::NotFound {
            kind: "layer",
            id: id.to_string(),
        }
    }

    pub fn block_not_found(id: impl ToString) -> Self {
        KernelError::NotFound {
            kind: "block",
            id: id.to_string(),
        }
    }
}
